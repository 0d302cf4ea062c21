//! Backup storage destinations: encrypted credentials, visibility rules and
//! connection checks for every supported backend.

pub mod audit;
pub mod backends;
pub mod config;
pub mod connection;
pub mod errors;
pub mod models;
pub mod service;
pub mod store;
pub mod vault;
pub mod workspace;

pub use errors::StorageError;
pub use models::{Actor, Storage, StorageConfig, StorageType, StorageView};
pub use service::{ServiceSettings, StorageService};
