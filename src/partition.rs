//! Partition Resolver (§4.2): figures out which of the two rootfs partitions
//! is currently active and which is the inactive counterpart to write an
//! update to, cross-checking the mounted root against what the bootloader
//! thinks is active.

use std::path::{Path, PathBuf};

use agent_api::{
    error::{AgentError, ErrorKind, Result},
    status::boot_vars,
};
use osutils::{block_devices, findmnt};

use crate::bootenv::BootEnvironment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    /// The value the bootloader's `mender_boot_part` variable uses for this
    /// slot, derived from the partition number (slot A is always the lower
    /// of the two partition numbers configured in §6).
    fn matches_part_number(self, part_number: u32, a_number: u32, b_number: u32) -> bool {
        match self {
            Slot::A => part_number == a_number,
            Slot::B => part_number == b_number,
        }
    }
}

pub struct PartitionResolver {
    root_part: PathBuf,
    other_part: PathBuf,
}

impl PartitionResolver {
    /// Resolves the active/inactive rootfs device nodes given the two
    /// candidate partitions from configuration (§6: `RootfsPartA`,
    /// `RootfsPartB`) and the live mount table, cross-checked against the
    /// bootloader's own idea of which slot is active.
    pub fn resolve(
        rootfs_part_a: &Path,
        rootfs_part_b: &Path,
        boot_env: &BootEnvironment,
    ) -> Result<Self> {
        let mounted_root = findmnt::source_for_mountpoint(Path::new("/"))
            .map_err(|e| AgentError::with_source(ErrorKind::Io, "findmnt failed", e))?;

        let active = match mounted_root {
            Some(source) if source == rootfs_part_a => Slot::A,
            Some(source) if source == rootfs_part_b => Slot::B,
            Some(source) => Self::resolve_by_device_id(&source, rootfs_part_a, rootfs_part_b)?,
            None => {
                return Err(AgentError::new(
                    ErrorKind::Fatal,
                    "root filesystem is not reported as mounted",
                ))
            }
        };

        Self::cross_check_with_boot_env(active, rootfs_part_a, rootfs_part_b, boot_env)?;

        let device_for = |slot: Slot| match slot {
            Slot::A => rootfs_part_a.to_path_buf(),
            Slot::B => rootfs_part_b.to_path_buf(),
        };
        Ok(PartitionResolver {
            root_part: device_for(active),
            other_part: device_for(active.other()),
        })
    }

    /// Mount source didn't literally match either configured path (e.g. a
    /// symlink or an alternate naming scheme); fall back to comparing device
    /// ids (step 3 of the resolution algorithm).
    fn resolve_by_device_id(source: &Path, part_a: &Path, part_b: &Path) -> Result<Slot> {
        let mounted_id = block_devices::device_id_of_mountpoint(Path::new("/")).map_err(|e| {
            AgentError::with_source(ErrorKind::Io, "failed to stat mounted root", e)
        })?;
        let _ = source;

        for (slot, candidate) in [(Slot::A, part_a), (Slot::B, part_b)] {
            if let Ok(candidate_id) = block_devices::device_id_of_mountpoint(candidate) {
                if candidate_id == mounted_id {
                    return Ok(slot);
                }
            }
        }

        if let Some(found) = block_devices::find_block_device_by_rdev(mounted_id)
            .map_err(|e| AgentError::with_source(ErrorKind::Io, "failed to scan /dev", e))?
        {
            if found == part_a {
                return Ok(Slot::A);
            }
            if found == part_b {
                return Ok(Slot::B);
            }
        }

        Err(AgentError::new(
            ErrorKind::Fatal,
            "mounted root does not match either configured rootfs partition",
        ))
    }

    /// Cross-checks the mount-derived active slot against `mender_boot_part`
    /// (§4.2 edge case: BootPartMismatch). A mismatch is reported as a fatal
    /// error rather than silently trusting one source over the other, since
    /// it usually means a previous update left the bootloader state
    /// inconsistent with what's actually running.
    fn cross_check_with_boot_env(
        active: Slot,
        part_a: &Path,
        part_b: &Path,
        boot_env: &BootEnvironment,
    ) -> Result<()> {
        let vars = boot_env.read(&[boot_vars::MENDER_BOOT_PART])?;
        let Some(raw) = vars.get(boot_vars::MENDER_BOOT_PART) else {
            return Ok(());
        };
        let boot_part_number: u32 = raw.trim().parse().map_err(|_| {
            AgentError::new(
                ErrorKind::Parse,
                format!("mender_boot_part is not a number: '{raw}'"),
            )
        })?;

        let a_number = block_devices::partition_number(part_a).ok_or_else(|| {
            AgentError::new(ErrorKind::Config, "RootfsPartA has no partition number")
        })?;
        let b_number = block_devices::partition_number(part_b).ok_or_else(|| {
            AgentError::new(ErrorKind::Config, "RootfsPartB has no partition number")
        })?;

        if !active.matches_part_number(boot_part_number, a_number, b_number) {
            return Err(AgentError::new(
                ErrorKind::Fatal,
                format!(
                    "bootloader reports mender_boot_part={boot_part_number} but the mounted \
                     root matches the other slot"
                ),
            ));
        }
        Ok(())
    }

    pub fn active_device(&self) -> &Path {
        &self.root_part
    }

    pub fn inactive_device(&self) -> &Path {
        &self.other_part
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_other_flips() {
        assert_eq!(Slot::A.other(), Slot::B);
        assert_eq!(Slot::B.other(), Slot::A);
    }

    #[test]
    fn matches_part_number_picks_correct_slot() {
        assert!(Slot::A.matches_part_number(2, 2, 3));
        assert!(!Slot::A.matches_part_number(3, 2, 3));
        assert!(Slot::B.matches_part_number(3, 2, 3));
    }
}
