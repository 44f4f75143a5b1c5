// Re-export the storage trait
pub use crate::storage_traits::SnapshotStore;

mod file;
pub use file::FileSnapshotStore;

// Export implementations
#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSnapshotStore;

#[cfg(feature = "rocksdb")]
mod rocksdb;
#[cfg(feature = "rocksdb")]
pub use self::rocksdb::RocksDbSnapshotStore;
