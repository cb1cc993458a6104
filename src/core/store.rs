use std::{
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use sqlx::{migrate::MigrateDatabase, sqlite::Sqlite, SqlitePool};

use crate::{
    core::{document::Document, settings::StorageKind},
    error::RaffleError,
};

const LOAD_ATTEMPTS: u32 = 3;
const LOAD_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Backend holding the persisted [`Document`].
pub trait DocumentStore: Send + Sync + 'static {
    /// Load the stored document, or a default one if nothing was stored yet.
    fn load(&self) -> impl Future<Output = Result<Document, RaffleError>> + Send;

    /// Replace the stored document.
    fn save(&self, document: &Document) -> impl Future<Output = Result<(), RaffleError>> + Send;
}

/// Stores the document as a pretty-printed JSON file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "database.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl DocumentStore for JsonFileStore {
    async fn load(&self) -> Result<Document, RaffleError> {
        let mut attempt = 1;
        loop {
            match tokio::fs::read_to_string(&self.path).await {
                Ok(text) => return Document::from_json(&text),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    log::info!(
                        "Database file {} does not exist, starting empty",
                        self.path.display()
                    );
                    return Ok(Document::default());
                }
                Err(e) if attempt < LOAD_ATTEMPTS => {
                    log::warn!(
                        "Failed to read {} (attempt {}/{}): {}",
                        self.path.display(),
                        attempt,
                        LOAD_ATTEMPTS,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(LOAD_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn save(&self, document: &Document) -> Result<(), RaffleError> {
        let json = document.to_json()?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            if let Err(why) = tokio::fs::remove_file(&temp).await {
                log::warn!("Failed to remove {}: {}", temp.display(), why);
            }
            return Err(e.into());
        }
        Ok(())
    }
}

/// Stores the document as a single row of a SQLite database.
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    pub async fn open(file: &Path) -> Result<Self, RaffleError> {
        let url = format!("sqlite://{}", file.display());
        if !Sqlite::database_exists(&url).await? {
            Sqlite::create_database(&url).await?;
        }

        let db = SqlitePool::connect(&url).await?;
        sqlx::query(
            "create table if not exists documents(
                        id integer primary key not null,
                        body text not null
                    );",
        )
        .execute(&db)
        .await?;

        Ok(SqliteStore { db })
    }
}

impl DocumentStore for SqliteStore {
    async fn load(&self) -> Result<Document, RaffleError> {
        let body: Option<String> = sqlx::query_scalar("select body from documents where id = 1")
            .fetch_optional(&self.db)
            .await?;

        match body {
            Some(body) => Document::from_json(&body),
            None => Ok(Document::default()),
        }
    }

    async fn save(&self, document: &Document) -> Result<(), RaffleError> {
        let body = document.to_json()?;
        sqlx::query("insert or replace into documents(id, body) values(1, ?)")
            .bind(body)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

/// The backend selected by [`StorageKind`].
pub enum ConfiguredStore {
    Json(JsonFileStore),
    Sqlite(SqliteStore),
}

impl ConfiguredStore {
    pub async fn open(kind: StorageKind, path: PathBuf) -> Result<Self, RaffleError> {
        Ok(match kind {
            StorageKind::Json => ConfiguredStore::Json(JsonFileStore::new(path)),
            StorageKind::Sqlite => ConfiguredStore::Sqlite(SqliteStore::open(&path).await?),
        })
    }
}

impl DocumentStore for ConfiguredStore {
    async fn load(&self) -> Result<Document, RaffleError> {
        match self {
            ConfiguredStore::Json(store) => store.load().await,
            ConfiguredStore::Sqlite(store) => store.load().await,
        }
    }

    async fn save(&self, document: &Document) -> Result<(), RaffleError> {
        match self {
            ConfiguredStore::Json(store) => store.save(document).await,
            ConfiguredStore::Sqlite(store) => store.save(document).await,
        }
    }
}

/// In-memory store for tests, optionally failing every save.
#[cfg(test)]
pub struct MemoryStore {
    pub body: std::sync::Mutex<Option<String>>,
    pub fail_saves: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            body: std::sync::Mutex::new(None),
            fail_saves: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn stored(&self) -> Option<Document> {
        let body = self.body.lock().unwrap().clone();
        body.map(|b| Document::from_json(&b).unwrap())
    }
}

#[cfg(test)]
impl DocumentStore for MemoryStore {
    async fn load(&self) -> Result<Document, RaffleError> {
        let body = self.body.lock().unwrap().clone();
        match body {
            Some(body) => Document::from_json(&body),
            None => Ok(Document::default()),
        }
    }

    async fn save(&self, document: &Document) -> Result<(), RaffleError> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RaffleError::Persistence("disk full".to_owned()));
        }
        *self.body.lock().unwrap() = Some(document.to_json()?);
        Ok(())
    }
}
