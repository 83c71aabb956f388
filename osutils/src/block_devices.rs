use std::{
    fs,
    os::unix::fs::{FileTypeExt, MetadataExt},
    path::{Path, PathBuf},
};

use nix::sys::stat::stat;

/// The device id (`st_dev`) of whatever filesystem is mounted at `path`.
pub fn device_id_of_mountpoint(path: &Path) -> std::io::Result<u64> {
    let st = stat(path).map_err(std::io::Error::from)?;
    Ok(st.st_dev)
}

/// The device id (`st_rdev`) a block-special file in `/dev` represents.
fn rdev_of_block_device(path: &Path) -> std::io::Result<Option<u64>> {
    let meta = fs::metadata(path)?;
    if !meta.file_type().is_block_device() {
        return Ok(None);
    }
    Ok(Some(meta.rdev()))
}

/// Scans `/dev` for the block-special file whose `Rdev` equals `target`,
/// used when the mounted root can't be matched by path alone (step 3 of the
/// partition-resolution algorithm).
pub fn find_block_device_by_rdev(target: u64) -> std::io::Result<Option<PathBuf>> {
    find_block_device_by_rdev_in(Path::new("/dev"), target)
}

fn find_block_device_by_rdev_in(dir: &Path, target: u64) -> std::io::Result<Option<PathBuf>> {
    let mut matches: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if let Ok(Some(rdev)) = rdev_of_block_device(&path) {
            if rdev == target {
                matches.push(path);
            }
        }
    }
    matches.sort();
    Ok(matches.into_iter().next())
}

/// Size in bytes of a block device, read from sysfs (`/sys/class/block/<name>/size`,
/// in 512-byte sectors) rather than opening the device and seeking, which
/// would require elevated access just to answer a size query.
pub fn device_size_bytes(dev_path: &Path) -> std::io::Result<u64> {
    let name = dev_path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"))?
        .to_string_lossy();
    let sysfs_size = PathBuf::from("/sys/class/block").join(name.as_ref()).join("size");
    let sectors: u64 = fs::read_to_string(sysfs_size)?.trim().parse().map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed sysfs size file")
    })?;
    Ok(sectors * 512)
}

/// Extracts the trailing decimal partition number from a device path, e.g.
/// `/dev/mmcblk0p3` -> `3`, `/dev/sda2` -> `2`.
pub fn partition_number(dev_path: &Path) -> Option<u32> {
    let name = dev_path.file_name()?.to_str()?;
    let digits_start = name.rfind(|c: char| !c.is_ascii_digit())?;
    name[digits_start + 1..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_partition_number() {
        assert_eq!(partition_number(Path::new("/dev/mmcblk0p3")), Some(3));
        assert_eq!(partition_number(Path::new("/dev/sda2")), Some(2));
        assert_eq!(partition_number(Path::new("/dev/sda")), None);
    }
}
