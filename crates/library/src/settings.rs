use std::path::Path;
use std::sync::Arc;

use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError,
};

const SETTINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");

/// Durable string settings keyed by name.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;
}

#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(err) => write!(f, "io error: {}", err),
            SettingsError::Redb(err) => write!(f, "db error: {}", err),
            SettingsError::Bincode(err) => write!(f, "bincode error: {}", err),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<std::io::Error> for SettingsError {
    fn from(err: std::io::Error) -> Self {
        SettingsError::Io(err)
    }
}

impl From<redb::Error> for SettingsError {
    fn from(err: redb::Error) -> Self {
        SettingsError::Redb(err)
    }
}

impl From<DatabaseError> for SettingsError {
    fn from(err: DatabaseError) -> Self {
        SettingsError::Redb(err.into())
    }
}

impl From<TableError> for SettingsError {
    fn from(err: TableError) -> Self {
        SettingsError::Redb(err.into())
    }
}

impl From<TransactionError> for SettingsError {
    fn from(err: TransactionError) -> Self {
        SettingsError::Redb(err.into())
    }
}

impl From<StorageError> for SettingsError {
    fn from(err: StorageError) -> Self {
        SettingsError::Redb(err.into())
    }
}

impl From<CommitError> for SettingsError {
    fn from(err: CommitError) -> Self {
        SettingsError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for SettingsError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        SettingsError::Bincode(err)
    }
}

#[derive(Clone)]
pub struct RedbSettings {
    db: Arc<Database>,
}

impl RedbSettings {
    pub fn open(path: &Path) -> Result<Self, SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };
        Ok(Self { db: Arc::new(db) })
    }
}

impl SettingsStore for RedbSettings {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(SETTINGS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let value = match table.get(key)? {
            Some(value) => Some(bincode::deserialize::<String>(value.value())?),
            None => None,
        };
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let bytes = bincode::serialize(value)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SETTINGS_TABLE)?;
            table.insert(key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
