use crate::error::StoreError;
use crate::memory::InMemoryGraphStore;
use crate::sqlite::SqliteGraphStore;
use crate::traits::{GraphReader, GraphStore, GraphTx};

/// A graph store whose backend is chosen at runtime (from configuration).
pub enum GraphBackend {
    Memory(InMemoryGraphStore),
    Sqlite(SqliteGraphStore),
}

impl From<InMemoryGraphStore> for GraphBackend {
    fn from(store: InMemoryGraphStore) -> Self {
        Self::Memory(store)
    }
}

impl From<SqliteGraphStore> for GraphBackend {
    fn from(store: SqliteGraphStore) -> Self {
        Self::Sqlite(store)
    }
}

impl GraphStore for GraphBackend {
    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn GraphReader) -> Result<T, E>,
        E: From<StoreError>,
    {
        match self {
            Self::Memory(store) => store.read(f),
            Self::Sqlite(store) => store.read(f),
        }
    }

    fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn GraphTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        match self {
            Self::Memory(store) => store.write(f),
            Self::Sqlite(store) => store.write(f),
        }
    }

    fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(store) => store.backend_name(),
            Self::Sqlite(store) => store.backend_name(),
        }
    }
}
