use std::{
    collections::{BTreeMap, BTreeSet},
    io::{Read, Write},
    net::TcpListener,
    sync::{Arc, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::Duration,
};

use async_trait::async_trait;
use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use time::OffsetDateTime;
use tokio::runtime::Runtime;

use crate::{
    config::{GcsConfig, S3Config},
    model::{
        error::{StorageError, StorageResult},
        gcs::{GcsApi, RewriteProgress},
        http::HttpMethod,
        object::md5_hex,
        s3::{DeleteFailure, S3Api},
    },
};

const PAGE_SIZE: usize = 2;
const REWRITE_CHUNK: usize = 4;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Debug)]
struct Entry {
    data: Vec<u8>,
    content_type: String,
    updated: OffsetDateTime,
    composite: bool,
    multipart: bool,
}

impl Entry {
    fn new(data: Vec<u8>, content_type: &str) -> Self {
        Entry {
            data,
            content_type: content_type.to_string(),
            updated: OffsetDateTime::now_utc(),
            composite: false,
            multipart: false,
        }
    }
}

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, BTreeMap<String, Entry>>,
    policies: BTreeMap<String, String>,
    failing_deletes: BTreeSet<String>,
    failing_stats: BTreeSet<String>,
    failing_policies: bool,
    bucket_delete_calls: usize,
    rewrite_calls: usize,
}

impl State {
    fn bucket(&self, bucket: &str, code: &str) -> StorageResult<&BTreeMap<String, Entry>> {
        self.buckets
            .get(bucket)
            .ok_or_else(|| StorageError::provider(code, format!("bucket {} not found", bucket)))
    }

    fn bucket_mut(
        &mut self,
        bucket: &str,
        code: &str,
    ) -> StorageResult<&mut BTreeMap<String, Entry>> {
        self.buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::provider(code, format!("bucket {} not found", bucket)))
    }

    fn entry(&self, bucket: &str, key: &str, code: &str) -> StorageResult<&Entry> {
        self.bucket(bucket, code)?
            .get(key)
            .ok_or_else(|| StorageError::provider(code, format!("object {} not found", key)))
    }

    fn page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<String>,
        code: &str,
    ) -> StorageResult<(Vec<(String, Entry)>, Option<String>)> {
        let start = token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        let matching: Vec<(String, Entry)> = self
            .bucket(bucket, code)?
            .iter()
            .filter(|(key, _)| prefix.map_or(true, |p| key.starts_with(p)))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();

        let end = (start + PAGE_SIZE).min(matching.len());
        let next = if end < matching.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok((matching[start.min(end)..end].to_vec(), next))
    }

    fn delete_bucket(&mut self, bucket: &str, missing: &str, not_empty: &str) -> StorageResult<()> {
        self.bucket_delete_calls += 1;
        if !self.bucket(bucket, missing)?.is_empty() {
            return Err(StorageError::provider(
                not_empty,
                format!("bucket {} is not empty", bucket),
            ));
        }

        self.buckets.remove(bucket);
        self.policies.remove(bucket);
        Ok(())
    }
}

/// Serves one HTTP exchange on a local port. Returns the endpoint and a
/// handle yielding the raw request head, lowercased.
pub fn serve_once(response: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind local listener");
    let endpoint = format!("http://{}", listener.local_addr().expect("local addr"));

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).expect("read request");
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }
        stream.write_all(response.as_bytes()).expect("write response");
        String::from_utf8_lossy(&head).to_ascii_lowercase()
    });

    (endpoint, handle)
}

pub fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

/// Both providers, in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("failed to acquire `state` guard")
    }

    /// Deleting `key` will fail, whichever bucket it is in.
    pub fn fail_delete_of(&self, key: &str) {
        self.lock().failing_deletes.insert(key.to_string());
    }

    /// Metadata lookups of `key` fail with a permission error.
    pub fn fail_stat_of(&self, key: &str) {
        self.lock().failing_stats.insert(key.to_string());
    }

    /// Every `put_bucket_policy` call is rejected.
    pub fn fail_bucket_policy(&self) {
        self.lock().failing_policies = true;
    }

    pub fn bucket_delete_calls(&self) -> usize {
        self.lock().bucket_delete_calls
    }

    pub fn rewrite_calls(&self) -> usize {
        self.lock().rewrite_calls
    }

    pub fn bucket_policy(&self, bucket: &str) -> Option<String> {
        self.lock().policies.get(bucket).cloned()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.lock()
            .buckets
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key))
    }

    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|entry| entry.content_type.clone())
    }

    /// Stores an object the way a multipart upload would leave it.
    pub fn insert_multipart(&self, bucket: &str, key: &str, data: &[u8]) {
        let mut entry = Entry::new(data.to_vec(), "application/octet-stream");
        entry.multipart = true;
        self.lock()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), entry);
    }
}

#[async_trait]
impl GcsApi for MemoryStore {
    fn connect(_config: &GcsConfig, _runtime: &Runtime) -> StorageResult<Self> {
        Ok(MemoryStore::new())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self.lock().buckets.contains_key(bucket))
    }

    async fn insert_bucket(&self, _project: &str, bucket: &str) -> StorageResult<()> {
        let mut state = self.lock();
        if state.buckets.contains_key(bucket) {
            return Err(StorageError::provider("409", "bucket already exists"));
        }

        state.buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.lock().delete_bucket(bucket, "404", "409")
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<Option<google_cloud_storage::http::objects::Object>> {
        let state = self.lock();
        if state.failing_stats.contains(key) {
            return Err(StorageError::provider("403", format!("forbidden: {}", key)));
        }
        let Some(entry) = state.buckets.get(bucket).and_then(|objects| objects.get(key)) else {
            return Ok(None);
        };

        let md5_hash = if entry.composite {
            None
        } else {
            Some(STANDARD.encode(Md5::digest(&entry.data)))
        };

        Ok(Some(google_cloud_storage::http::objects::Object {
            name: key.to_string(),
            bucket: bucket.to_string(),
            size: entry.data.len() as i64,
            content_type: Some(entry.content_type.clone()),
            md5_hash,
            updated: Some(entry.updated),
            ..Default::default()
        }))
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        self.lock()
            .bucket_mut(bucket, "404")?
            .insert(key.to_string(), Entry::new(body, content_type));
        Ok(())
    }

    async fn download_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        Ok(self.lock().entry(bucket, key, "404")?.data.clone())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut state = self.lock();
        if state.failing_deletes.contains(key) {
            return Err(StorageError::provider("403", format!("cannot delete {}", key)));
        }

        state
            .bucket_mut(bucket, "404")?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::provider("404", format!("object {} not found", key)))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<String>,
    ) -> StorageResult<(Vec<google_cloud_storage::http::objects::Object>, Option<String>)> {
        let (entries, next) = self.lock().page(bucket, prefix, page_token, "404")?;

        let objects = entries
            .into_iter()
            .map(|(key, entry)| google_cloud_storage::http::objects::Object {
                name: key,
                bucket: bucket.to_string(),
                size: entry.data.len() as i64,
                updated: Some(entry.updated),
                ..Default::default()
            })
            .collect();

        Ok((objects, next))
    }

    async fn rewrite_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        destination_bucket: &str,
        destination_key: &str,
        rewrite_token: Option<String>,
    ) -> StorageResult<RewriteProgress> {
        let mut state = self.lock();
        state.rewrite_calls += 1;

        let source = state.entry(source_bucket, source_key, "404")?.clone();
        let offset = rewrite_token
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0);
        let rewritten = (offset + REWRITE_CHUNK).min(source.data.len());
        let done = rewritten == source.data.len();

        if done {
            let mut copy = Entry::new(source.data.clone(), &source.content_type);
            copy.composite = source.composite;
            state
                .bucket_mut(destination_bucket, "404")?
                .insert(destination_key.to_string(), copy);
        }

        Ok(RewriteProgress {
            bytes_rewritten: rewritten as i64,
            object_size: source.data.len() as i64,
            done,
            rewrite_token: if done { None } else { Some(rewritten.to_string()) },
        })
    }

    async fn compose_object(
        &self,
        bucket: &str,
        destination: &str,
        sources: &[&str],
    ) -> StorageResult<()> {
        let mut state = self.lock();

        let mut data = Vec::new();
        for source in sources {
            data.extend_from_slice(&state.entry(bucket, source, "404")?.data);
        }

        let mut entry = Entry::new(data, "application/octet-stream");
        entry.composite = true;
        state
            .bucket_mut(bucket, "404")?
            .insert(destination.to_string(), entry);
        Ok(())
    }

    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        method: HttpMethod,
        expires: Duration,
        _content_type: Option<&str>,
        hostname: Option<&str>,
    ) -> StorageResult<String> {
        // a bucket-bound hostname stands for the bucket
        let base = match hostname {
            Some(hostname) => format!("https://{}/{}", hostname, key),
            None => format!("https://storage.googleapis.com/{}/{}", bucket, key),
        };

        Ok(format!(
            "{}?X-Goog-Algorithm=GOOG4-RSA-SHA256&X-Goog-Expires={}&X-Goog-Method={}&X-Goog-Signature=00",
            base,
            expires.as_secs(),
            method
        ))
    }
}

#[async_trait]
impl S3Api for MemoryStore {
    fn connect(_config: &S3Config, _runtime: &Runtime) -> StorageResult<Self> {
        Ok(MemoryStore::new())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self.lock().buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str, _region: &str) -> StorageResult<()> {
        let mut state = self.lock();
        if state.buckets.contains_key(bucket) {
            return Err(StorageError::provider(
                "BucketAlreadyOwnedByYou",
                "bucket already exists",
            ));
        }

        state.buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> StorageResult<()> {
        let mut state = self.lock();
        state.bucket(bucket, "NoSuchBucket")?;
        if state.failing_policies {
            return Err(StorageError::provider("AccessDenied", format!("policy rejected: {}", bucket)));
        }
        state.policies.insert(bucket.to_string(), policy.to_string());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.lock()
            .delete_bucket(bucket, "NoSuchBucket", "BucketNotEmpty")
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Option<HeadObjectOutput>> {
        let state = self.lock();
        if state.failing_stats.contains(key) {
            return Err(StorageError::provider("AccessDenied", format!("forbidden: {}", key)));
        }
        let Some(entry) = state.buckets.get(bucket).and_then(|objects| objects.get(key)) else {
            return Ok(None);
        };

        let etag = if entry.multipart {
            format!("\"{}-2\"", md5_hex(&entry.data))
        } else {
            format!("\"{}\"", md5_hex(&entry.data))
        };

        Ok(Some(
            HeadObjectOutput::builder()
                .e_tag(etag)
                .content_length(entry.data.len() as i64)
                .content_type(entry.content_type.clone())
                .build(),
        ))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        self.lock()
            .bucket_mut(bucket, "NoSuchBucket")?
            .insert(key.to_string(), Entry::new(body, content_type));
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        Ok(self.lock().entry(bucket, key, "NoSuchKey")?.data.clone())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut state = self.lock();
        if state.failing_deletes.contains(key) {
            return Err(StorageError::provider("AccessDenied", format!("cannot delete {}", key)));
        }

        state.bucket_mut(bucket, "NoSuchBucket")?.remove(key);
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> StorageResult<Vec<DeleteFailure>> {
        let mut state = self.lock();
        let failing = state.failing_deletes.clone();
        let objects = state.bucket_mut(bucket, "NoSuchBucket")?;

        let mut failures = Vec::new();
        for key in keys {
            if failing.contains(&key) {
                failures.push(DeleteFailure {
                    message: format!("cannot delete {}", key),
                    key,
                    code: "AccessDenied".to_string(),
                });
            } else {
                objects.remove(&key);
            }
        }

        Ok(failures)
    }

    async fn list_objects_v2(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<String>,
    ) -> StorageResult<(Vec<aws_sdk_s3::types::Object>, Option<String>)> {
        let (entries, next) = self
            .lock()
            .page(bucket, prefix, continuation_token, "NoSuchBucket")?;

        let objects = entries
            .into_iter()
            .map(|(key, entry)| {
                aws_sdk_s3::types::Object::builder()
                    .key(key)
                    .size(entry.data.len() as i64)
                    .last_modified(aws_sdk_s3::primitives::DateTime::from_secs(
                        entry.updated.unix_timestamp(),
                    ))
                    .build()
            })
            .collect();

        Ok((objects, next))
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        destination_bucket: &str,
        destination_key: &str,
    ) -> StorageResult<()> {
        let mut state = self.lock();
        let source = state.entry(source_bucket, source_key, "NoSuchKey")?.clone();

        state
            .bucket_mut(destination_bucket, "NoSuchBucket")?
            .insert(
                destination_key.to_string(),
                Entry::new(source.data, &source.content_type),
            );
        Ok(())
    }
}
