pub mod actor;
pub mod storage;

pub use actor::{Actor, Permission, UserRole, WorkspaceRole};
pub use storage::{Storage, StorageConfig, StorageType, StorageView};
