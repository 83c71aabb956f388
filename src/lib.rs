pub mod authz;
pub mod blockdev;
pub mod bootenv;
pub mod cli;
pub mod datastore;
pub mod deploylog;
pub mod deploylog_hook;
pub mod installer;
pub mod inventory;
pub mod identity;
pub mod keystore;
pub mod partition;
pub mod retry;
pub mod statemachine;
pub mod transport;
