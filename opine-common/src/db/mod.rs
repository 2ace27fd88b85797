//! Database access layer

pub mod init;
pub mod models;

pub use init::{init_database, init_schema};
