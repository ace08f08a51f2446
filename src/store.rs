use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info};
use rusqlite::{Connection, params};
use serde_json::Value;

use crate::config::{StoreBackend, StoreConfig};
use crate::model::{PipelineError, Result};

/// Append-only destination for pipeline output, one named collection per result.
pub trait DocumentStore {
    /// Appends `documents` to `collection` and returns how many were written.
    fn append(&mut self, collection: &str, documents: &[Value]) -> Result<usize>;
}

fn check_name(kind: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(PipelineError::Config(format!("invalid {} name '{}'", kind, name)));
    }
    Ok(())
}

/// Newline-delimited JSON files under `<location>/<database>/<collection>.jsonl`.
pub struct JsonLinesStore {
    root: PathBuf,
}

impl JsonLinesStore {
    pub fn open(location: &Path, database: &str) -> Result<Self> {
        check_name("database", database)?;
        let root = location.join(database);
        std::fs::create_dir_all(&root).map_err(|err| PipelineError::io(&root, err))?;
        Ok(Self { root })
    }

    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", collection))
    }
}

impl DocumentStore for JsonLinesStore {
    fn append(&mut self, collection: &str, documents: &[Value]) -> Result<usize> {
        check_name("collection", collection)?;
        if documents.is_empty() {
            return Ok(0);
        }
        let path = self.collection_path(collection);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| PipelineError::io(&path, err))?;

        let mut writer = BufWriter::new(file);
        for document in documents {
            serde_json::to_writer(&mut writer, document)?;
            writer.write_all(b"\n").map_err(|err| PipelineError::io(&path, err))?;
        }
        writer.flush().map_err(|err| PipelineError::io(&path, err))?;

        debug!("Appended {} document(s) to {}", documents.len(), path.display());
        Ok(documents.len())
    }
}

/// Documents as JSON text rows in a single SQLite table.
pub struct SqliteStore {
    conn: Connection,
    database: String,
}

impl SqliteStore {
    pub fn open(path: &Path, database: &str) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
        }
        Self::with_connection(Connection::open(path)?, database)
    }

    #[cfg(test)]
    pub fn open_in_memory(database: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, database)
    }

    fn with_connection(conn: Connection, database: &str) -> Result<Self> {
        check_name("database", database)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                database TEXT NOT NULL,
                collection TEXT NOT NULL,
                body TEXT NOT NULL,
                inserted_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS documents_by_collection
                ON documents (database, collection);",
        )?;
        Ok(Self {
            conn,
            database: database.to_string(),
        })
    }

    #[cfg(test)]
    pub fn count(&self, collection: &str) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE database = ?1 AND collection = ?2",
            params![self.database, collection],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(count as usize)
    }
}

impl DocumentStore for SqliteStore {
    fn append(&mut self, collection: &str, documents: &[Value]) -> Result<usize> {
        check_name("collection", collection)?;
        let inserted_at = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO documents (database, collection, body, inserted_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for document in documents {
                let body = serde_json::to_string(document)?;
                stmt.execute(params![self.database, collection, body, inserted_at])?;
            }
        }
        tx.commit()?;
        Ok(documents.len())
    }
}

pub fn open_store(config: &StoreConfig) -> Result<Box<dyn DocumentStore>> {
    info!(
        "Opening {:?} document store '{}' at {}",
        config.backend,
        config.database,
        config.location.display()
    );
    match config.backend {
        StoreBackend::Jsonl => Ok(Box::new(JsonLinesStore::open(&config.location, &config.database)?)),
        StoreBackend::Sqlite => Ok(Box::new(SqliteStore::open(&config.location, &config.database)?)),
    }
}

/// Keeps appended documents in memory, keyed by collection.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    pub collections: std::collections::BTreeMap<String, Vec<Value>>,
}

#[cfg(test)]
impl DocumentStore for MemoryStore {
    fn append(&mut self, collection: &str, documents: &[Value]) -> Result<usize> {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .extend_from_slice(documents);
        Ok(documents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn jsonl_appends_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonLinesStore::open(dir.path(), "healthcare_db").unwrap();
        store.append("cleaning_report", &[json!({"duplicate_records": 0})]).unwrap();
        store.append("cleaning_report", &[json!({"duplicate_records": 2})]).unwrap();

        let content = std::fs::read_to_string(
            dir.path().join("healthcare_db").join("cleaning_report.jsonl"),
        )
        .unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![json!({"duplicate_records": 0}), json!({"duplicate_records": 2})]
        );
    }

    #[test]
    fn jsonl_empty_batch_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonLinesStore::open(dir.path(), "healthcare_db").unwrap();
        assert_eq!(store.append("age_category_data", &[]).unwrap(), 0);
        assert!(!store.collection_path("age_category_data").exists());
    }

    #[test]
    fn jsonl_rejects_path_like_collection() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonLinesStore::open(dir.path(), "healthcare_db").unwrap();
        let err = store.append("../escape", &[json!({})]).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn sqlite_counts_per_collection() {
        let mut store = SqliteStore::open_in_memory("healthcare_db").unwrap();
        let written = store
            .append("age_category_data", &[json!({"count": 1}), json!({"count": 2})])
            .unwrap();
        assert_eq!(written, 2);
        store.append("age_category_data", &[]).unwrap();
        store.append("most_common_diseases_data", &[json!({"count": 3})]).unwrap();

        assert_eq!(store.count("age_category_data").unwrap(), 2);
        assert_eq!(store.count("most_common_diseases_data").unwrap(), 1);
        assert_eq!(store.count("senior_citizen_flag_data").unwrap(), 0);
    }

    #[test]
    fn sqlite_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("store.sqlite");
        {
            let mut store = SqliteStore::open(&path, "healthcare_db").unwrap();
            store.append("cleaning_report", &[json!({"rows_read": 4})]).unwrap();
        }
        let store = SqliteStore::open(&path, "healthcare_db").unwrap();
        assert_eq!(store.count("cleaning_report").unwrap(), 1);
    }
}
