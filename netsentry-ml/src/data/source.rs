//! Document record stores the ingestion stage exports from.
//!
//! A store holds named collections of JSON documents. Two backends ship with
//! the crate: a directory of JSON Lines files and a SQLite database with one
//! table per collection. Both assign an `_id` to each inserted document; the
//! ingestion stage drops that column again.

use crate::data::dataset::{Dataset, Scalar};
use crate::error::MlError;
use async_trait::async_trait;
use netsentry_core::{SourceConfig, StoreKind};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// One stored record.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Field name of the identifier the store assigns on insert.
pub const ID_FIELD: &str = "_id";

/// Trait for reading and writing document collections.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every document of `collection`, in insertion order. A collection that
    /// was never written to is empty, not an error.
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>, MlError>;

    /// Append documents to `collection`, assigning `_id`. Returns the number
    /// inserted.
    async fn insert_many(&self, collection: &str, documents: Vec<Document>)
    -> Result<usize, MlError>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

/// Open the store described by `config`.
pub fn open_store(config: &SourceConfig) -> Box<dyn RecordStore> {
    match config.store {
        StoreKind::Jsonl => Box::new(JsonlRecordStore::new(config.root.join(&config.database))),
        StoreKind::Sqlite => Box::new(SqliteRecordStore::new(
            config.root.join(format!("{}.db", config.database)),
        )),
    }
}

/// Flatten documents into a [`Dataset`]. Columns are the union of document
/// keys in first-seen order; absent keys become missing cells.
pub fn documents_to_dataset(documents: &[Document]) -> Result<Dataset, MlError> {
    let mut columns: Vec<String> = Vec::new();
    for doc in documents {
        for key in doc.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    let rows = documents
        .iter()
        .map(|doc| {
            columns
                .iter()
                .map(|col| doc.get(col).map_or(Scalar::Missing, Scalar::from_json))
                .collect()
        })
        .collect();
    Dataset::from_rows(columns, rows)
}

/// Convert dataset rows into documents, one per row.
pub fn dataset_to_documents(dataset: &Dataset) -> Vec<Document> {
    dataset
        .rows()
        .iter()
        .map(|row| {
            dataset
                .columns()
                .iter()
                .zip(row)
                .map(|(col, cell)| (col.clone(), cell.to_json()))
                .collect()
        })
        .collect()
}

/// Insert documents in batches of `batch_size`. Returns the total inserted.
pub async fn push_records(
    store: &dyn RecordStore,
    collection: &str,
    documents: Vec<Document>,
    batch_size: usize,
) -> Result<usize, MlError> {
    if batch_size == 0 {
        return Err(MlError::invalid_input("batch size must be at least 1"));
    }
    let total = documents.len();
    let mut inserted = 0;
    let mut remaining = documents.into_iter().peekable();
    while remaining.peek().is_some() {
        let batch: Vec<Document> = remaining.by_ref().take(batch_size).collect();
        inserted += store.insert_many(collection, batch).await?;
        tracing::debug!(collection, inserted, total, "Inserted batch");
    }
    tracing::info!(collection, inserted, store = %store.location(), "Records pushed");
    Ok(inserted)
}

// Collection names become file names and table names.
fn check_collection_name(collection: &str) -> Result<(), MlError> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(MlError::invalid_input(format!(
            "Invalid collection name '{collection}': use letters, digits, '_' or '-'"
        )))
    }
}

// ---------------------------------------------------------------------------
// JsonlRecordStore
// ---------------------------------------------------------------------------

/// Directory-backed store: `<dir>/<collection>.jsonl`, one document per line.
pub struct JsonlRecordStore {
    pub dir: PathBuf,
}

impl JsonlRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.jsonl"))
    }
}

async fn read_jsonl(path: &Path) -> Result<Vec<Document>, MlError> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut documents = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line)? {
            serde_json::Value::Object(map) => documents.push(map),
            _ => {
                return Err(MlError::dataset(format!(
                    "{}:{}: expected a JSON object",
                    path.display(),
                    line_no + 1
                )));
            }
        }
    }
    Ok(documents)
}

#[async_trait]
impl RecordStore for JsonlRecordStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>, MlError> {
        check_collection_name(collection)?;
        if !self.dir.is_dir() {
            return Err(MlError::source_unavailable(format!(
                "store directory {} does not exist",
                self.dir.display()
            )));
        }
        let path = self.collection_path(collection);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_jsonl(&path).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<usize, MlError> {
        check_collection_name(collection)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MlError::source_unavailable(format!("{}: {e}", self.dir.display())))?;

        let path = self.collection_path(collection);
        let mut next_id = if path.exists() {
            read_jsonl(&path).await?.len() as u64
        } else {
            0
        };

        let mut buf = String::new();
        for mut doc in documents.iter().cloned() {
            next_id += 1;
            doc.insert(ID_FIELD.to_string(), serde_json::Value::from(next_id));
            buf.push_str(&serde_json::to_string(&doc)?);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(documents.len())
    }

    fn location(&self) -> String {
        format!("jsonl:{}", self.dir.display())
    }
}

// ---------------------------------------------------------------------------
// SqliteRecordStore
// ---------------------------------------------------------------------------

/// SQLite-backed store. Each collection is a table `(_id INTEGER PRIMARY KEY,
/// doc TEXT)` holding the document as JSON.
pub struct SqliteRecordStore {
    pub db_path: PathBuf,
}

impl SqliteRecordStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>, MlError> {
        check_collection_name(collection)?;
        let db_path = self.db_path.clone();
        let collection = collection.to_string();

        // Run blocking SQLite operations on a blocking thread
        tokio::task::spawn_blocking(move || {
            if !db_path.exists() {
                return Err(MlError::source_unavailable(format!(
                    "database {} does not exist",
                    db_path.display()
                )));
            }
            let conn = rusqlite::Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )
            .map_err(|e| MlError::source_unavailable(format!("{}: {e}", db_path.display())))?;

            let table_exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [&collection],
                |row| row.get(0),
            )?;
            if !table_exists {
                return Ok(Vec::new());
            }

            let mut stmt =
                conn.prepare(&format!("SELECT _id, doc FROM \"{collection}\" ORDER BY _id"))?;
            let mut rows = stmt.query([])?;
            let mut documents = Vec::new();
            while let Some(row) = rows.next()? {
                let id = match row.get_ref(0)? {
                    rusqlite::types::ValueRef::Integer(n) => serde_json::Value::from(n),
                    _ => serde_json::Value::Null,
                };
                let raw: String = row.get(1)?;
                let mut doc = match serde_json::from_str::<serde_json::Value>(&raw)? {
                    serde_json::Value::Object(map) => map,
                    _ => {
                        return Err(MlError::dataset(format!(
                            "row {id} of '{collection}' is not a JSON object"
                        )));
                    }
                };
                doc.insert(ID_FIELD.to_string(), id);
                documents.push(doc);
            }
            Ok(documents)
        })
        .await
        .map_err(|e| MlError::dataset(format!("SQLite task join error: {e}")))?
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<usize, MlError> {
        check_collection_name(collection)?;
        let db_path = self.db_path.clone();
        let collection = collection.to_string();

        tokio::task::spawn_blocking(move || -> Result<usize, MlError> {
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let mut conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| MlError::source_unavailable(format!("{}: {e}", db_path.display())))?;
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS \"{collection}\" (
                        _id INTEGER PRIMARY KEY AUTOINCREMENT,
                        doc TEXT NOT NULL
                    )"
                ),
                [],
            )?;

            let tx = conn.transaction()?;
            {
                let mut stmt =
                    tx.prepare(&format!("INSERT INTO \"{collection}\" (doc) VALUES (?1)"))?;
                for doc in &documents {
                    let mut doc = doc.clone();
                    doc.remove(ID_FIELD);
                    stmt.execute([serde_json::to_string(&doc)?])?;
                }
            }
            tx.commit()?;
            Ok(documents.len())
        })
        .await
        .map_err(|e| MlError::dataset(format!("SQLite task join error: {e}")))?
    }

    fn location(&self) -> String {
        format!("sqlite:{}", self.db_path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(pairs: &[(&str, serde_json::Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_documents_to_dataset_union_of_keys() {
        let docs = vec![
            doc(&[("a", serde_json::json!(1)), ("b", serde_json::json!("x"))]),
            doc(&[("a", serde_json::json!(2)), ("c", serde_json::json!(null))]),
        ];
        let ds = documents_to_dataset(&docs).unwrap();
        assert_eq!(ds.columns(), ["a", "b", "c"]);
        assert_eq!(ds.rows()[1][1], Scalar::Missing);
        assert_eq!(ds.rows()[0][0], Scalar::Number(1.0));
    }

    #[test]
    fn test_dataset_to_documents_keeps_column_order() {
        let ds = Dataset::from_rows(
            vec!["z".into(), "a".into()],
            vec![vec![Scalar::Number(1.0), Scalar::Missing]],
        )
        .unwrap();
        let docs = dataset_to_documents(&ds);
        let keys: Vec<_> = docs[0].keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert_eq!(docs[0]["a"], serde_json::Value::Null);
    }

    #[test]
    fn test_invalid_collection_name() {
        assert!(check_collection_name("flows").is_ok());
        assert!(check_collection_name("net-data_2").is_ok());
        assert!(check_collection_name("x\"; DROP TABLE y").is_err());
        assert!(check_collection_name("").is_err());
    }

    #[tokio::test]
    async fn test_jsonl_store_roundtrip_assigns_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonlRecordStore::new(dir.path().join("db"));

        let docs = vec![
            doc(&[("rate", serde_json::json!(0.5))]),
            doc(&[("rate", serde_json::json!(1.5))]),
        ];
        assert_eq!(push_records(&store, "flows", docs, 1).await.unwrap(), 2);

        let fetched = store.fetch_all("flows").await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0][ID_FIELD], serde_json::json!(1));
        assert_eq!(fetched[1][ID_FIELD], serde_json::json!(2));
        assert_eq!(fetched[1]["rate"], serde_json::json!(1.5));
    }

    #[tokio::test]
    async fn test_jsonl_store_missing_dir_is_unavailable() {
        let store = JsonlRecordStore::new("/nonexistent/netsentry/store");
        let result = store.fetch_all("flows").await;
        assert!(matches!(result, Err(MlError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_jsonl_store_unknown_collection_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonlRecordStore::new(dir.path());
        assert!(store.fetch_all("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = SqliteRecordStore::new(dir.path().join("network.db"));

        let docs = vec![
            doc(&[("b", serde_json::json!("tcp")), ("a", serde_json::json!(3))]),
            doc(&[("b", serde_json::json!("udp")), ("a", serde_json::json!(4))]),
        ];
        assert_eq!(store.insert_many("flows", docs).await.unwrap(), 2);

        let fetched = store.fetch_all("flows").await.unwrap();
        assert_eq!(fetched.len(), 2);
        let keys: Vec<_> = fetched[0].keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a", ID_FIELD]);
        assert_eq!(fetched[1][ID_FIELD], serde_json::json!(2));

        assert!(store.fetch_all("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_store_missing_db_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = SqliteRecordStore::new(dir.path().join("absent.db"));
        let result = store.fetch_all("flows").await;
        assert!(matches!(result, Err(MlError::SourceUnavailable(_))));
    }

    #[test]
    fn test_open_store_paths() {
        let config = SourceConfig {
            store: StoreKind::Sqlite,
            root: PathBuf::from("/data"),
            database: "net".into(),
            ..SourceConfig::default()
        };
        assert_eq!(open_store(&config).location(), "sqlite:/data/net.db");
    }
}
