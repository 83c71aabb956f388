pub mod block_devices;
pub mod dependencies;
pub mod findmnt;
pub mod scripts;
