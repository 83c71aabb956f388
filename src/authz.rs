//! Authorization Manager (§4.5): composes signed auth requests, persists the
//! returned bearer token, and answers "am I authorized?".

use std::collections::BTreeMap;

use agent_api::{
    error::Result,
    status::AttributeMap,
};
use serde::Serialize;

use crate::{datastore::DataStore, keystore::KeyStore};

#[derive(Serialize)]
struct AuthRequestBody {
    id_data: AttributeMap,
    tenant_token: String,
    pubkey: String,
}

pub struct AuthRequest {
    pub body: Vec<u8>,
    pub signature: Vec<u8>,
    pub tenant_token: String,
}

pub struct AuthorizationManager<'a> {
    tenant_token: String,
    key_store: &'a KeyStore,
    data_store: &'a DataStore,
}

impl<'a> AuthorizationManager<'a> {
    pub fn new(tenant_token: impl Into<String>, key_store: &'a KeyStore, data_store: &'a DataStore) -> Self {
        AuthorizationManager {
            tenant_token: tenant_token.into(),
            key_store,
            data_store,
        }
    }

    pub fn is_authorized(&self) -> Result<bool> {
        Ok(!self.data_store.read_token()?.is_empty())
    }

    /// Builds and signs the authorization request body.
    pub fn make_auth_request(&self, identity: AttributeMap) -> Result<AuthRequest> {
        let pubkey_pem = self.key_store.public_key_pem()?;
        let body = AuthRequestBody {
            id_data: identity,
            tenant_token: self.tenant_token.clone(),
            pubkey: String::from_utf8_lossy(&pubkey_pem).into_owned(),
        };
        let body_bytes = serde_json::to_vec(&body)?;
        let signature = self.key_store.sign(&body_bytes)?;
        Ok(AuthRequest {
            body: body_bytes,
            signature,
            tenant_token: self.tenant_token.clone(),
        })
    }

    /// Persists `bytes` as the bearer token if non-empty; an empty response
    /// is treated as "not authorized yet" rather than clearing the token.
    pub fn receive_auth_response(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.data_store.write_token(bytes)
    }

    pub fn remove_auth_token(&self) -> Result<()> {
        self.data_store.remove_token()
    }

    pub fn auth_token(&self) -> Result<Vec<u8>> {
        self.data_store.read_token()
    }

    pub fn has_key(&self) -> Result<bool> {
        Ok(self.data_store.read_key_pem()?.is_some())
    }
}

pub fn empty_identity() -> AttributeMap {
    BTreeMap::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_authorized_false_until_token_received() {
        let dir = tempfile::tempdir().unwrap();
        let data_store = DataStore::open(dir.path()).unwrap();
        let (key_store, _) = KeyStore::load_or_generate(None).unwrap();
        let manager = AuthorizationManager::new("tenant-1", &key_store, &data_store);

        assert!(!manager.is_authorized().unwrap());
        manager.receive_auth_response(b"token-bytes").unwrap();
        assert!(manager.is_authorized().unwrap());
        assert_eq!(manager.auth_token().unwrap(), b"token-bytes");
    }

    #[test]
    fn empty_response_does_not_clear_existing_token() {
        let dir = tempfile::tempdir().unwrap();
        let data_store = DataStore::open(dir.path()).unwrap();
        let (key_store, _) = KeyStore::load_or_generate(None).unwrap();
        let manager = AuthorizationManager::new("tenant-1", &key_store, &data_store);

        manager.receive_auth_response(b"token-bytes").unwrap();
        manager.receive_auth_response(b"").unwrap();
        assert_eq!(manager.auth_token().unwrap(), b"token-bytes");
    }

    #[test]
    fn remove_auth_token_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let data_store = DataStore::open(dir.path()).unwrap();
        let (key_store, _) = KeyStore::load_or_generate(None).unwrap();
        let manager = AuthorizationManager::new("tenant-1", &key_store, &data_store);

        manager.remove_auth_token().unwrap();
        manager.receive_auth_response(b"token-bytes").unwrap();
        manager.remove_auth_token().unwrap();
        manager.remove_auth_token().unwrap();
        assert!(!manager.is_authorized().unwrap());
    }

    #[test]
    fn make_auth_request_signs_the_body() {
        let dir = tempfile::tempdir().unwrap();
        let data_store = DataStore::open(dir.path()).unwrap();
        let (key_store, _) = KeyStore::load_or_generate(None).unwrap();
        let manager = AuthorizationManager::new("tenant-1", &key_store, &data_store);

        let request = manager.make_auth_request(empty_identity()).unwrap();
        assert!(!request.body.is_empty());
        assert!(!request.signature.is_empty());
        assert_eq!(request.tenant_token, "tenant-1");
    }
}
