mod core;
mod csv;
mod fs;
mod hashmap;

pub use self::core::{CheckpointStore, StorageError};
pub use fs::FsStore;
pub use hashmap::HashMapStore;
