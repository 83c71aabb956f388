//! Checkpoint persistence for the state machine, built directly on the
//! `StateCheckpoint` record and `DataStore::{read,write,clear}_checkpoint`
//! already defined for the standalone deployment state (§3, §4.9).

use agent_api::{error::Result, status::StateCheckpoint};

use crate::datastore::DataStore;

use super::StateId;

/// Persists `state` before a state transition whose failure mode cannot be
/// safely retried from scratch (§4.9: "before entering any state whose
/// failure mode is cannot safely retry from scratch... the State Checkpoint
/// is written").
pub fn persist(
    data_store: &DataStore,
    state: StateId,
    deployment_id: &str,
    payload_types: &[String],
    artifact_name: &str,
    rollback_supported: bool,
    reboot_needed: bool,
) -> Result<()> {
    let mut checkpoint = StateCheckpoint::new(state.as_str());
    checkpoint.deployment_id = deployment_id.to_string();
    checkpoint.payload_types = payload_types.to_vec();
    checkpoint.artifact_name = artifact_name.to_string();
    checkpoint.rollback_supported = rollback_supported;
    checkpoint.reboot_needed = reboot_needed;
    data_store.write_checkpoint(&checkpoint)
}

pub fn load(data_store: &DataStore) -> Result<Option<StateCheckpoint>> {
    data_store.read_checkpoint()
}

pub fn clear(data_store: &DataStore) -> Result<()> {
    data_store.clear_checkpoint()
}

/// Maps a persisted checkpoint to the state the daemon should resume into.
/// A state that cannot safely be continued from a bare restart (anything
/// mid-install without resumable module support) collapses to the nearest
/// safe terminal state, `Rollback` if the checkpoint claims rollback
/// support, `Failure` otherwise (§4.9).
pub fn resume_state(checkpoint: &StateCheckpoint) -> StateId {
    let persisted = StateId::from_str(&checkpoint.state_id).unwrap_or(StateId::Idle);
    if persisted.is_resumable() {
        persisted
    } else if checkpoint.rollback_supported {
        StateId::Rollback
    } else {
        StateId::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_from_verify_reboot_continues_in_place() {
        let checkpoint = StateCheckpoint::new(StateId::VerifyReboot.as_str());
        assert_eq!(resume_state(&checkpoint), StateId::VerifyReboot);
    }

    #[test]
    fn resume_from_unsafe_mid_install_without_rollback_goes_to_failure() {
        let mut checkpoint = StateCheckpoint::new(StateId::UpdateInstall.as_str());
        checkpoint.rollback_supported = false;
        assert_eq!(resume_state(&checkpoint), StateId::Failure);
    }

    #[test]
    fn resume_from_unsafe_mid_install_with_rollback_goes_to_rollback() {
        let mut checkpoint = StateCheckpoint::new(StateId::UpdateInstall.as_str());
        checkpoint.rollback_supported = true;
        assert_eq!(resume_state(&checkpoint), StateId::Rollback);
    }
}
