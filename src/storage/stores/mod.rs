//! Built-in implementors of [`Storage`](super::Storage) for the indexed
//! chain data.

#[cfg(feature = "in-memory")]
mod in_memory;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "in-memory")]
pub use super::stores::in_memory::{InMemory, InMemoryStorageError};
#[cfg(feature = "sqlite")]
pub use super::stores::sqlite::{Sqlite, SqliteStorageError};
