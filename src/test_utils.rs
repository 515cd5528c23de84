#![cfg(test)]

use crate::app::create_app;
use crate::auth::hash_password;
use crate::config::Config;
use crate::database::{init_database, DbPool};
use crate::media_host::{
    BlobFetcher, ByteStream, FetchError, MediaHost, MediaHostError, RemoteBlob,
};
use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderName, HeaderValue};
use bytes::Bytes;
use futures::StreamExt;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type BlobStore = Arc<Mutex<HashMap<String, Vec<u8>>>>;

const FAKE_CHUNK_SIZE: usize = 16 * 1024;

/// Create an in-memory SQLite database pool with full schema applied
pub fn create_test_db() -> DbPool {
    let manager = SqliteConnectionManager::memory().with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(())
    });

    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("Failed to create test database pool");

    let conn = pool.get().expect("Failed to get connection from pool");
    init_database(&conn).expect("Failed to initialize test database schema");

    pool
}

/// Everything a route test needs: database, fake remote store, config.
pub struct TestContext {
    pub pool: DbPool,
    pub media_host: Arc<FakeMediaHost>,
    pub fetcher: Arc<FakeBlobFetcher>,
    pub config: Arc<Config>,
}

impl TestContext {
    pub fn new() -> Self {
        let store: BlobStore = Arc::default();
        Self {
            pool: create_test_db(),
            media_host: Arc::new(FakeMediaHost::new(store.clone())),
            fetcher: Arc::new(FakeBlobFetcher::with_store(store)),
            config: Arc::new(Config::default()),
        }
    }
}

pub fn create_test_server(ctx: &TestContext) -> axum_test::TestServer {
    let app = create_app(
        ctx.config.clone(),
        ctx.pool.clone(),
        ctx.media_host.clone(),
        ctx.fetcher.clone(),
    );
    axum_test::TestServer::new(app).expect("Failed to start test server")
}

/// Test fixture: create a user directly in the database
pub fn create_test_user(pool: &DbPool, username: &str, email: &str) -> i64 {
    let conn = pool.get().expect("Failed to get connection");
    let hashed = hash_password("password123").expect("Failed to hash fixture password");

    conn.execute(
        "INSERT INTO users (username, email, hashed_password) VALUES (?, ?, ?)",
        rusqlite::params![username, email, hashed],
    )
    .expect("Failed to insert test user");

    conn.last_insert_rowid()
}

/// Test fixture: create a gallery with a known secret link
pub fn create_test_gallery(pool: &DbPool, user_id: i64, title: &str, secret_link: &str) -> i64 {
    let conn = pool.get().expect("Failed to get connection");

    conn.execute(
        "INSERT INTO galleries (user_id, title, secret_link) VALUES (?, ?, ?)",
        rusqlite::params![user_id, title, secret_link],
    )
    .expect("Failed to insert test gallery");

    conn.last_insert_rowid()
}

/// Test fixture: store a blob in the fake remote store and register it as
/// gallery media. Returns the blob's public id.
pub fn create_test_media(
    ctx: &TestContext,
    gallery_id: i64,
    file_name: &str,
    content: Vec<u8>,
) -> String {
    let url = format!("https://media.test/galleries/{}/{}", gallery_id, file_name);
    let public_id = format!("galleries/{}/{}", gallery_id, file_name);

    ctx.media_host.store_blob(&url, content);
    insert_media_row(&ctx.pool, gallery_id, file_name, &url, &public_id);

    public_id
}

/// Test fixture: register gallery media whose URL has no blob behind it.
pub fn create_test_media_row(pool: &DbPool, gallery_id: i64, file_name: &str, url: &str) {
    let public_id = format!("galleries/{}/{}", gallery_id, file_name);
    insert_media_row(pool, gallery_id, file_name, url, &public_id);
}

fn insert_media_row(pool: &DbPool, gallery_id: i64, file_name: &str, url: &str, public_id: &str) {
    let conn = pool.get().expect("Failed to get connection");
    let position: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM gallery_media WHERE gallery_id = ?",
            [gallery_id],
            |row| row.get(0),
        )
        .expect("Failed to compute media position");

    conn.execute(
        "INSERT INTO gallery_media (gallery_id, url, public_id, file_name, media_type, position)
         VALUES (?, ?, ?, ?, 'image', ?)",
        rusqlite::params![gallery_id, url, public_id, file_name, position],
    )
    .expect("Failed to insert test media");
}

pub async fn register_and_login(
    server: &axum_test::TestServer,
    username: &str,
    email: &str,
) -> String {
    let response = server
        .post("/api/auth/register")
        .json(&serde_json::json!({
            "username": username,
            "email": email,
            "password": "password123"
        }))
        .await;

    let body: serde_json::Value = response.json();
    body["token"]
        .as_str()
        .expect("register should return a token")
        .to_string()
}

pub fn auth_header(token: &str) -> (HeaderName, HeaderValue) {
    (
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).expect("token should be ASCII"),
    )
}

/// In-memory stand-in for the remote media host management API.
pub struct FakeMediaHost {
    store: BlobStore,
    upload_counter: AtomicUsize,
    fail_uploads_containing: Mutex<Option<String>>,
    deleted_blobs: Mutex<Vec<String>>,
    deleted_folders: Mutex<Vec<String>>,
}

impl FakeMediaHost {
    pub fn new(store: BlobStore) -> Self {
        Self {
            store,
            upload_counter: AtomicUsize::new(0),
            fail_uploads_containing: Mutex::new(None),
            deleted_blobs: Mutex::new(Vec::new()),
            deleted_folders: Mutex::new(Vec::new()),
        }
    }

    pub fn store_blob(&self, url: &str, content: Vec<u8>) {
        self.store.lock().unwrap().insert(url.to_string(), content);
    }

    /// Make uploads whose file name contains `needle` fail, to exercise
    /// per-file isolation in batch uploads.
    pub fn fail_uploads_containing(&self, needle: &str) {
        *self.fail_uploads_containing.lock().unwrap() = Some(needle.to_string());
    }

    pub fn deleted_blobs(&self) -> Vec<String> {
        self.deleted_blobs.lock().unwrap().clone()
    }

    pub fn deleted_folders(&self) -> Vec<String> {
        self.deleted_folders.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaHost for FakeMediaHost {
    async fn upload(
        &self,
        folder: &str,
        file_name: &str,
        _content_type: &str,
        data: Bytes,
    ) -> Result<RemoteBlob, MediaHostError> {
        if let Some(needle) = self.fail_uploads_containing.lock().unwrap().as_deref() {
            if file_name.contains(needle) {
                return Err(MediaHostError::Status(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                ));
            }
        }

        let n = self.upload_counter.fetch_add(1, Ordering::SeqCst);
        let url = format!("https://media.test/{}/{}", folder, file_name);
        let public_id = format!("{}/{}-{}", folder, file_name, n);

        self.store.lock().unwrap().insert(url.clone(), data.to_vec());

        Ok(RemoteBlob { url, public_id })
    }

    async fn delete_blob(&self, public_id: &str) -> Result<(), MediaHostError> {
        self.deleted_blobs.lock().unwrap().push(public_id.to_string());
        Ok(())
    }

    async fn delete_folder(&self, folder: &str) -> Result<(), MediaHostError> {
        self.deleted_folders.lock().unwrap().push(folder.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct FetchStats {
    current: AtomicUsize,
    max: AtomicUsize,
    total: AtomicUsize,
}

struct InFlightGuard(Arc<FetchStats>);

impl InFlightGuard {
    fn new(stats: Arc<FetchStats>) -> Self {
        let current = stats.current.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max.fetch_max(current, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serves blobs from the shared in-memory store and records how many fetch
/// streams were ever alive at once.
pub struct FakeBlobFetcher {
    store: BlobStore,
    broken: Mutex<HashMap<String, Vec<u8>>>,
    stats: Arc<FetchStats>,
}

impl FakeBlobFetcher {
    pub fn new() -> Self {
        Self::with_store(Arc::default())
    }

    pub fn with_store(store: BlobStore) -> Self {
        Self {
            store,
            broken: Mutex::new(HashMap::new()),
            stats: Arc::default(),
        }
    }

    pub fn with_blob(self, url: &str, content: Vec<u8>) -> Self {
        self.store.lock().unwrap().insert(url.to_string(), content);
        self
    }

    /// The stream for `url` yields `prefix` and then fails mid-read.
    pub fn with_broken_stream(self, url: &str, prefix: Vec<u8>) -> Self {
        self.broken.lock().unwrap().insert(url.to_string(), prefix);
        self
    }

    pub fn fetches(&self) -> usize {
        self.stats.total.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.stats.max.load(Ordering::SeqCst)
    }

    fn chunked(content: &[u8]) -> Vec<Result<Bytes, FetchError>> {
        content
            .chunks(FAKE_CHUNK_SIZE)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }
}

#[async_trait]
impl BlobFetcher for FakeBlobFetcher {
    async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
        self.stats.total.fetch_add(1, Ordering::SeqCst);

        if let Some(prefix) = self.broken.lock().unwrap().get(url) {
            let mut items = Self::chunked(prefix);
            items.push(Err(FetchError::Interrupted(
                "connection reset by fake".to_string(),
            )));
            let guard = InFlightGuard::new(self.stats.clone());
            let stream = futures::stream::iter(items).map(move |item| {
                let _held = &guard;
                item
            });
            return Ok(Box::pin(stream));
        }

        let content = match self.store.lock().unwrap().get(url) {
            Some(content) => content.clone(),
            None => return Err(FetchError::Status(reqwest::StatusCode::NOT_FOUND)),
        };

        let guard = InFlightGuard::new(self.stats.clone());
        let stream = futures::stream::iter(Self::chunked(&content)).map(move |item| {
            let _held = &guard;
            item
        });

        Ok(Box::pin(stream))
    }
}
