//! Key Store (§4.4): owns the device's RSA keypair, generating one on first
//! run and signing authorization requests with it. Uses `openssl` directly,
//! the same crate the teacher's `osutils` pulls in for its own PKI work
//! rather than a pure-Rust crypto crate.

use agent_api::error::{AgentError, ErrorKind, Result};
use openssl::{
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::Rsa,
    sign::Signer,
};

const RSA_KEY_BITS: u32 = 3072;

pub struct KeyStore {
    keypair: PKey<Private>,
}

impl KeyStore {
    /// Loads a keypair from an existing PEM, or generates and returns a fresh
    /// one if `existing_pem` is `None` (§4.4: "a missing key file is not an
    /// error; the Key Store creates one").
    pub fn load_or_generate(existing_pem: Option<&[u8]>) -> Result<(Self, Option<Vec<u8>>)> {
        match existing_pem {
            Some(pem) => {
                let keypair = PKey::private_key_from_pem(pem).map_err(|e| {
                    AgentError::with_source(ErrorKind::Config, "failed to parse device key PEM", e)
                })?;
                Ok((KeyStore { keypair }, None))
            }
            None => {
                let rsa = Rsa::generate(RSA_KEY_BITS).map_err(|e| {
                    AgentError::with_source(ErrorKind::Fatal, "failed to generate RSA key", e)
                })?;
                let keypair = PKey::from_rsa(rsa).map_err(|e| {
                    AgentError::with_source(ErrorKind::Fatal, "failed to wrap generated RSA key", e)
                })?;
                let pem = keypair.private_key_to_pem_pkcs8().map_err(|e| {
                    AgentError::with_source(ErrorKind::Fatal, "failed to encode generated key", e)
                })?;
                Ok((KeyStore { keypair }, Some(pem)))
            }
        }
    }

    /// The public key in PEM form, sent as part of the authorization request.
    pub fn public_key_pem(&self) -> Result<Vec<u8>> {
        self.keypair.public_key_to_pem().map_err(|e| {
            AgentError::with_source(ErrorKind::Fatal, "failed to encode public key", e)
        })
    }

    /// Signs `payload` with PKCS#1 v1.5 / SHA-256, the scheme the
    /// authorization endpoint expects in the `X-MEN-Signature` header.
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.keypair).map_err(|e| {
            AgentError::with_source(ErrorKind::Fatal, "failed to initialize signer", e)
        })?;
        signer
            .update(payload)
            .map_err(|e| AgentError::with_source(ErrorKind::Fatal, "failed to hash payload", e))?;
        signer
            .sign_to_vec()
            .map_err(|e| AgentError::with_source(ErrorKind::Fatal, "failed to sign payload", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_a_key_when_none_exists() {
        let (store, generated_pem) = KeyStore::load_or_generate(None).unwrap();
        assert!(generated_pem.is_some());
        assert!(!store.public_key_pem().unwrap().is_empty());
    }

    #[test]
    fn loads_an_existing_key_without_regenerating() {
        let (store, generated_pem) = KeyStore::load_or_generate(None).unwrap();
        let pem = generated_pem.unwrap();

        let (loaded, regenerated) = KeyStore::load_or_generate(Some(&pem)).unwrap();
        assert!(regenerated.is_none());
        assert_eq!(
            loaded.public_key_pem().unwrap(),
            store.public_key_pem().unwrap()
        );
    }

    #[test]
    fn signature_verifies_against_the_public_key() {
        use openssl::{pkey::PKey, sign::Verifier};

        let (store, pem) = KeyStore::load_or_generate(None).unwrap();
        let _ = pem;
        let signature = store.sign(b"hello").unwrap();

        let public = PKey::public_key_from_pem(&store.public_key_pem().unwrap()).unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &public).unwrap();
        verifier.update(b"hello").unwrap();
        assert!(verifier.verify(&signature).unwrap());
    }
}
