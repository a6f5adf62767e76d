use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use log::{debug, info, warn};
use mongodb::bson::doc;
use mongodb::{Client, Collection};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{Config, MongoConfig};
use crate::error::{QuizError, Result};
use crate::quiz::analytics::SessionReport;
use crate::quiz::session::AnsweredItem;

const COLLECTION: &str = "quiz_history";

/// A finished quiz as it is kept on disk or in the database.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub owner: String,
    pub timestamp: DateTime<Utc>,
    pub report: SessionReport,
    pub answers: Vec<AnsweredItem>,
}

impl HistoryRecord {
    pub fn new(owner: impl Into<String>, report: SessionReport, answers: Vec<AnsweredItem>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            timestamp: Utc::now(),
            report,
            answers,
        }
    }
}

pub enum HistoryStore {
    Json(JsonFileStore),
    Mongo(MongoStore),
}

impl HistoryStore {
    /// Uses MongoDB when it is configured and answers a ping, the JSON file otherwise.
    pub async fn connect(config: &Config) -> Self {
        if let Some(mongo) = &config.mongo {
            let store = MongoStore::new(mongo.clone());
            match store.ping().await {
                Ok(()) => {
                    info!("Storing quiz history in MongoDB database {}", mongo.db_name);
                    return HistoryStore::Mongo(store);
                }
                Err(err) => warn!("MongoDB unavailable ({err}), using local JSON history"),
            }
        }
        info!("Storing quiz history in {}", config.history_file.display());
        HistoryStore::Json(JsonFileStore::new(&config.history_file))
    }

    pub fn describe(&self) -> &'static str {
        match self {
            HistoryStore::Json(_) => "local JSON file",
            HistoryStore::Mongo(_) => "MongoDB",
        }
    }

    pub async fn append(&self, record: &HistoryRecord) -> Result<()> {
        match self {
            HistoryStore::Json(store) => store.append(record).await,
            HistoryStore::Mongo(store) => store.append(record).await,
        }
    }

    /// Every record, oldest first.
    pub async fn list_all(&self) -> Result<Vec<HistoryRecord>> {
        match self {
            HistoryStore::Json(store) => store.list_all().await,
            HistoryStore::Mongo(store) => store.list(None).await,
        }
    }

    /// The owner's most recent `limit` records, oldest first.
    pub async fn list_for_owner(&self, owner: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        let mut records: Vec<HistoryRecord> = match self {
            HistoryStore::Json(store) => store
                .list_all()
                .await?
                .into_iter()
                .filter(|r| r.owner == owner)
                .collect(),
            HistoryStore::Mongo(store) => store.list(Some(owner)).await?,
        };
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
        Ok(records)
    }

    /// Removes every record of `owner`. Returns how many were deleted.
    pub async fn clear_owner(&self, owner: &str) -> Result<usize> {
        match self {
            HistoryStore::Json(store) => store.clear_owner(owner).await,
            HistoryStore::Mongo(store) => store.clear_owner(owner).await,
        }
    }

    /// Appends with a single retry. A record that still cannot be stored is
    /// dropped, the caller keeps its in-memory report either way.
    pub async fn persist(&self, record: &HistoryRecord) -> bool {
        for attempt in 1..=2 {
            match self.append(record).await {
                Ok(()) => return true,
                Err(err) => warn!("Saving quiz {} failed (attempt {attempt}): {err}", record.id),
            }
        }
        warn!("Dropping quiz {} from history", record.id);
        false
    }
}

/// All records in one JSON array. Writes go to a sibling temp file that is
/// then renamed over the original.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn append(&self, record: &HistoryRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read().await?;
        records.push(record.clone());
        self.write(&records).await?;
        debug!("Appended quiz {} to {}", record.id, self.path.display());
        Ok(())
    }

    pub async fn list_all(&self) -> Result<Vec<HistoryRecord>> {
        self.read().await
    }

    pub async fn clear_owner(&self, owner: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read().await?;
        let before = records.len();
        records.retain(|r| r.owner != owner);
        let removed = before - records.len();
        if removed > 0 {
            self.write(&records).await?;
        }
        Ok(removed)
    }

    async fn read(&self) -> Result<Vec<HistoryRecord>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(store_error(&self.path, err)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&raw).map_err(|err| store_error(&self.path, err))
    }

    async fn write(&self, records: &[HistoryRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records).map_err(|err| store_error(&self.path, err))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|err| store_error(&tmp, err))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| store_error(&self.path, err))
    }
}

fn store_error(path: &Path, err: impl std::fmt::Display) -> QuizError {
    QuizError::StoreUnavailable(format!("{}: {err}", path.display()))
}

/// One document per record. A client is created for each operation and
/// dropped when it returns.
pub struct MongoStore {
    config: MongoConfig,
}

impl MongoStore {
    pub fn new(config: MongoConfig) -> Self {
        Self { config }
    }

    async fn collection(&self) -> Result<Collection<HistoryRecord>> {
        let client = Client::with_uri_str(&self.config.uri)
            .await
            .map_err(mongo_error)?;
        Ok(client.database(&self.config.db_name).collection(COLLECTION))
    }

    async fn ping(&self) -> Result<()> {
        let client = Client::with_uri_str(&self.config.uri)
            .await
            .map_err(mongo_error)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(mongo_error)?;
        Ok(())
    }

    async fn append(&self, record: &HistoryRecord) -> Result<()> {
        self.collection()
            .await?
            .insert_one(record, None)
            .await
            .map_err(mongo_error)?;
        Ok(())
    }

    async fn list(&self, owner: Option<&str>) -> Result<Vec<HistoryRecord>> {
        let filter = owner.map(|owner| doc! { "owner": owner });
        let mut records: Vec<HistoryRecord> = self
            .collection()
            .await?
            .find(filter, None)
            .await
            .map_err(mongo_error)?
            .try_collect()
            .await
            .map_err(mongo_error)?;
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    async fn clear_owner(&self, owner: &str) -> Result<usize> {
        let result = self
            .collection()
            .await?
            .delete_many(doc! { "owner": owner }, None)
            .await
            .map_err(mongo_error)?;
        Ok(result.deleted_count as usize)
    }
}

fn mongo_error(err: mongodb::error::Error) -> QuizError {
    QuizError::StoreUnavailable(format!("mongodb: {err}"))
}
