//! S3 Storage Gateway
//!
//! Implementation of the `ObjectStorageGateway` trait for Amazon S3 and
//! S3-compatible endpoints (LocalStack, MinIO).
//!
//! Requests are signed with AWS Signature Version 4 and sent through reqwest,
//! avoiding the heavyweight aws-sdk-s3 dependency. Listings use ListObjectsV2;
//! page N of a directory is reached through cached continuation tokens.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, Method, Response, StatusCode};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{
    DirectoryListing, DownloadedFile, HttpRetryConfig, ObjectMeta, ObjectStorageGateway,
    ProgressCallback, S3Config, SnapshotEntry, StorageError, TypeHint, UploadFile,
    send_with_retry,
};
use crate::paths;

type HmacSha256 = Hmac<Sha256>;

/// Maximum keys per ListObjectsV2 / DeleteObjects request
const MAX_KEYS_PER_REQUEST: usize = 1000;

/// Maximum presigned URL lifetime accepted by S3 (7 days)
const MAX_PRESIGN_SECS: u32 = 604_800;

/// Upper bound on remembered continuation tokens across all prefixes
const MAX_CACHED_PAGE_TOKENS: usize = 4096;

/// How a request is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestMode {
    /// Idempotent read: short timeout, retried on 429/5xx
    Read,
    /// State-changing call: short timeout, sent once
    Mutation,
    /// Upload or download body: long timeout, sent once
    Transfer,
}

/// Continuation token cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PageKey {
    prefix: String,
    page_size: u32,
    page: u32,
}

/// Where a requested page starts
enum PageStart {
    First,
    Token(String),
    /// The listing ends before the requested page
    PastEnd,
}

/// One parsed ListObjectsV2 response
#[derive(Debug, Default)]
struct ListObjectsPage {
    common_prefixes: Vec<String>,
    objects: Vec<ObjectMeta>,
    next_token: Option<String>,
    is_truncated: bool,
}

/// S3 Storage Gateway
pub struct S3Gateway {
    config: S3Config,
    client: Client,
    transfer_client: Client,
    retry: HttpRetryConfig,
    page_tokens: Mutex<HashMap<PageKey, String>>,
}

impl S3Gateway {
    /// Create a new S3 gateway with the given configuration
    pub fn new(config: S3Config) -> Result<Self, StorageError> {
        if config.bucket.trim().is_empty() {
            return Err(StorageError::InvalidConfig("S3 bucket name is required".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| StorageError::InvalidConfig(format!("HTTP client: {}", e)))?;
        let transfer_client = Client::builder()
            .timeout(Duration::from_secs(config.transfer_timeout_secs.max(1)))
            .build()
            .map_err(|e| StorageError::InvalidConfig(format!("HTTP client: {}", e)))?;
        let retry = HttpRetryConfig::with_max_retries(config.max_retries);

        Ok(Self {
            config,
            client,
            transfer_client,
            retry,
            page_tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Get the S3 endpoint URL
    fn endpoint(&self) -> String {
        if let Some(ref endpoint) = self.config.endpoint {
            endpoint.trim_end_matches('/').to_string()
        } else {
            format!("https://s3.{}.amazonaws.com", self.config.region)
        }
    }

    /// Build the object URL; `key` must already be URI-encoded
    fn build_url(&self, key: &str) -> String {
        let endpoint = self.endpoint();
        let key = key.trim_start_matches('/');

        if self.config.path_style {
            // Path-style: https://endpoint/bucket/key
            if key.is_empty() {
                format!("{}/{}", endpoint, self.config.bucket)
            } else {
                format!("{}/{}/{}", endpoint, self.config.bucket, key)
            }
        } else {
            // Virtual-hosted style: https://bucket.endpoint/key
            let endpoint_without_scheme = endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://");
            let scheme = if endpoint.starts_with("http://") { "http" } else { "https" };

            if key.is_empty() {
                format!("{}://{}.{}", scheme, self.config.bucket, endpoint_without_scheme)
            } else {
                format!("{}://{}.{}/{}", scheme, self.config.bucket, endpoint_without_scheme, key)
            }
        }
    }

    /// Full request URL with a canonical (sorted, encoded) query string
    fn request_url(&self, key: &str, query: &[(&str, &str)]) -> String {
        let base = self.build_url(&encode_key(key));
        let query = canonical_query(query);
        if query.is_empty() {
            base
        } else {
            format!("{}?{}", base, query)
        }
    }

    fn credential_scope(&self, date_stamp: &str) -> String {
        format!("{}/{}/s3/aws4_request", date_stamp, self.config.region)
    }

    fn signing_key(&self, date_stamp: &str) -> Result<Vec<u8>, StorageError> {
        let secret = format!("AWS4{}", self.config.secret_access_key.expose_secret());
        let k_date = hmac_sha256(secret.as_bytes(), date_stamp.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.config.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, b"s3")?;
        hmac_sha256(&k_service, b"aws4_request")
    }

    /// Sign a request using AWS Signature Version 4.
    ///
    /// Adds `host`, `x-amz-date` and `x-amz-content-sha256` to `headers` and
    /// returns the Authorization header value. Header names must be lowercase.
    fn sign_request(
        &self,
        method: &str,
        url: &str,
        headers: &mut BTreeMap<String, String>,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<String, StorageError> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let parsed = url::Url::parse(url)
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;

        headers.insert("host".to_string(), host_header(&parsed));
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.to_string());

        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            parsed.path(),
            parsed.query().unwrap_or(""),
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = self.credential_scope(&date_stamp);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let signature = hex::encode(hmac_sha256(
            &self.signing_key(&date_stamp)?,
            string_to_sign.as_bytes(),
        )?);

        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.config.access_key_id, credential_scope, signed_headers, signature
        ))
    }

    /// Make a signed request to S3
    async fn s3_request(
        &self,
        method: Method,
        key: &str,
        query: &[(&str, &str)],
        body: Option<Vec<u8>>,
        extra_headers: &[(&str, String)],
        mode: RequestMode,
    ) -> Result<Response, StorageError> {
        let url = self.request_url(key, query);
        let payload_hash = sha256_hex(body.as_deref().unwrap_or(&[]));

        let mut headers = BTreeMap::new();
        for (name, value) in extra_headers {
            headers.insert(name.to_lowercase(), value.clone());
        }
        let authorization =
            self.sign_request(method.as_str(), &url, &mut headers, &payload_hash, Utc::now())?;

        let client = match mode {
            RequestMode::Transfer => &self.transfer_client,
            RequestMode::Read | RequestMode::Mutation => &self.client,
        };

        let mut builder = client.request(method, &url);
        for (name, value) in &headers {
            // reqwest derives Host from the URL
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        builder = builder.header("authorization", authorization);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let request = builder.build()?;

        match mode {
            RequestMode::Read => send_with_retry(client, request, &self.retry).await,
            RequestMode::Mutation | RequestMode::Transfer => Ok(client.execute(request).await?),
        }
    }

    /// One ListObjectsV2 call
    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        max_keys: u32,
        token: Option<&str>,
    ) -> Result<ListObjectsPage, StorageError> {
        let max_keys = max_keys.to_string();
        let mut params: Vec<(&str, &str)> = vec![("list-type", "2"), ("max-keys", &max_keys)];
        if !prefix.is_empty() {
            params.push(("prefix", prefix));
        }
        if let Some(delimiter) = delimiter {
            params.push(("delimiter", delimiter));
        }
        if let Some(token) = token {
            params.push(("continuation-token", token));
        }

        debug!("[S3] ListObjectsV2 prefix='{}' max-keys={}", prefix, max_keys);
        let response = self
            .s3_request(Method::GET, "", &params, None, &[], RequestMode::Read)
            .await?;
        let response = check_status(response, &format!("list '{}'", prefix)).await?;
        let xml = response.text().await?;
        parse_list_objects(&xml)
    }

    /// Every object under `prefix`, following all continuation tokens
    async fn list_all_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .list_objects(prefix, None, MAX_KEYS_PER_REQUEST as u32, token.as_deref())
                .await?;
            objects.extend(page.objects);
            match page.next_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }
        Ok(objects)
    }

    fn cached_token(&self, key: &PageKey) -> Option<String> {
        let tokens = self.page_tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.get(key).cloned()
    }

    fn remember_token(&self, prefix: &str, page_size: u32, page: u32, token: Option<&str>) {
        let key = PageKey {
            prefix: prefix.to_string(),
            page_size,
            page,
        };
        let mut tokens = self.page_tokens.lock().unwrap_or_else(|e| e.into_inner());
        match token {
            Some(token) => {
                if tokens.len() >= MAX_CACHED_PAGE_TOKENS && !tokens.contains_key(&key) {
                    debug!("[S3] Page token cache full, clearing {} entries", tokens.len());
                    tokens.clear();
                }
                tokens.insert(key, token.to_string());
            }
            None => {
                tokens.remove(&key);
            }
        }
    }

    fn forget_tokens(&self, prefix: &str) {
        let mut tokens = self.page_tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.retain(|key, _| key.prefix != prefix);
    }

    /// Resolve the continuation token for `page`, walking forward from the
    /// closest cached page when needed.
    async fn page_start(
        &self,
        prefix: &str,
        page_size: u32,
        page: u32,
    ) -> Result<PageStart, StorageError> {
        if page == 0 {
            // a fresh first page starts a new walk; older tokens may be outdated
            self.forget_tokens(prefix);
            return Ok(PageStart::First);
        }

        let key = |page: u32| PageKey {
            prefix: prefix.to_string(),
            page_size,
            page,
        };

        if let Some(token) = self.cached_token(&key(page)) {
            return Ok(PageStart::Token(token));
        }

        let mut start = 0;
        let mut token: Option<String> = None;
        for known in (1..page).rev() {
            if let Some(cached) = self.cached_token(&key(known)) {
                start = known;
                token = Some(cached);
                break;
            }
        }

        debug!("[S3] Walking '{}' from page {} to page {}", prefix, start, page);
        for current in start..page {
            let listed = self
                .list_objects(prefix, Some("/"), page_size, token.as_deref())
                .await?;
            let next = listed.next_token.filter(|_| listed.is_truncated);
            self.remember_token(prefix, page_size, current + 1, next.as_deref());
            match next {
                Some(next) => token = Some(next),
                None => return Ok(PageStart::PastEnd),
            }
        }

        Ok(token.map(PageStart::Token).unwrap_or(PageStart::PastEnd))
    }

    /// GET one object fully into memory
    async fn fetch_object_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .s3_request(Method::GET, key, &[], None, &[], RequestMode::Transfer)
            .await?;
        let response = check_status(response, key).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// PUT an object body
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<String>,
        mode: RequestMode,
    ) -> Result<Option<String>, StorageError> {
        let mut headers = Vec::new();
        if let Some(content_type) = content_type {
            headers.push(("content-type", content_type));
        }
        let response = self
            .s3_request(Method::PUT, key, &[], Some(body), &headers, mode)
            .await?;
        let response = check_status(response, key).await?;
        Ok(response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string()))
    }

    /// Upload one file without progress reporting
    async fn upload_one(
        &self,
        file: UploadFile,
        directory: &str,
        type_hint: Option<TypeHint>,
    ) -> Result<ObjectMeta, StorageError> {
        if file.name.trim().is_empty() {
            return Err(StorageError::InvalidPath("empty file name".to_string()));
        }

        let key = paths::join(directory, &file.name);
        let content_type = type_hint
            .unwrap_or(TypeHint::Other)
            .content_type_for(&file.name);
        let size = file.len();

        info!("[S3] Uploading {} ({} bytes, {})", key, size, content_type);
        let etag = self
            .put_object(&key, file.bytes, Some(content_type), RequestMode::Transfer)
            .await?;

        let mut meta = ObjectMeta::new(key, size).with_last_modified(Utc::now());
        meta.etag = etag;
        Ok(meta)
    }

    /// Delete keys in DeleteObjects batches
    async fn delete_keys(&self, keys: &[String]) -> Result<(), StorageError> {
        for chunk in keys.chunks(MAX_KEYS_PER_REQUEST) {
            let body = delete_request_body(chunk);
            let headers = [
                ("content-md5", content_md5(body.as_bytes())),
                ("content-type", "application/xml".to_string()),
            ];
            let response = self
                .s3_request(
                    Method::POST,
                    "",
                    &[("delete", "")],
                    Some(body.into_bytes()),
                    &headers,
                    RequestMode::Mutation,
                )
                .await?;
            let response = check_status(response, "delete objects").await?;
            let xml = response.text().await?;
            if let Some((key, message)) = parse_delete_errors(&xml)?.into_iter().next() {
                return Err(StorageError::ServerError(format!(
                    "Failed to delete {}: {}",
                    key, message
                )));
            }
        }
        Ok(())
    }

    fn file_url(path: &Path) -> Result<String, StorageError> {
        url::Url::from_file_path(path)
            .map(|u| u.to_string())
            .map_err(|_| StorageError::InvalidPath(path.display().to_string()))
    }

    /// Build a presigned GET URL at a fixed instant
    fn presign_at(&self, key: &str, ttl_secs: u32, now: DateTime<Utc>) -> Result<String, StorageError> {
        if ttl_secs == 0 || ttl_secs > MAX_PRESIGN_SECS {
            return Err(StorageError::InvalidConfig(format!(
                "Signed URL lifetime must be 1..={} seconds",
                MAX_PRESIGN_SECS
            )));
        }

        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential_scope = self.credential_scope(&date_stamp);
        let credential = format!("{}/{}", self.config.access_key_id, credential_scope);
        let expires = ttl_secs.to_string();

        let url = self.build_url(&encode_key(key));
        let parsed = url::Url::parse(&url)
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;

        let query = canonical_query(&[
            ("X-Amz-Algorithm", "AWS4-HMAC-SHA256"),
            ("X-Amz-Credential", &credential),
            ("X-Amz-Date", &amz_date),
            ("X-Amz-Expires", &expires),
            ("X-Amz-SignedHeaders", "host"),
        ]);

        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            parsed.path(),
            query,
            host_header(&parsed)
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            sha256_hex(canonical_request.as_bytes())
        );
        let signature = hex::encode(hmac_sha256(
            &self.signing_key(&date_stamp)?,
            string_to_sign.as_bytes(),
        )?);

        Ok(format!("{}?{}&X-Amz-Signature={}", url, query, signature))
    }
}

#[async_trait]
impl ObjectStorageGateway for S3Gateway {
    fn display_name(&self) -> String {
        if self.config.endpoint.is_some() {
            format!("s3://{} (custom)", self.config.bucket)
        } else {
            format!("s3://{} ({})", self.config.bucket, self.config.region)
        }
    }

    async fn list_directory(
        &self,
        path: &str,
        page: u32,
        page_size: u32,
    ) -> Result<DirectoryListing, StorageError> {
        if page_size == 0 {
            return Err(StorageError::InvalidConfig("page size must be positive".to_string()));
        }

        let prefix = paths::to_prefix(path);
        let token = match self.page_start(&prefix, page_size, page).await? {
            PageStart::First => None,
            PageStart::Token(token) => Some(token),
            PageStart::PastEnd => {
                return Ok(DirectoryListing {
                    truncated: Some(false),
                    ..Default::default()
                })
            }
        };

        let listed = self
            .list_objects(&prefix, Some("/"), page_size, token.as_deref())
            .await?;
        let next = listed.next_token.clone().filter(|_| listed.is_truncated);
        self.remember_token(&prefix, page_size, page + 1, next.as_deref());

        Ok(listing_from_page(&prefix, listed))
    }

    async fn list_full_tree(&self) -> Result<SnapshotEntry, StorageError> {
        let objects = self.list_all_objects("").await?;
        info!("[S3] Full tree listing: {} objects", objects.len());
        Ok(build_snapshot(objects))
    }

    async fn create_directory(&self, path: &str) -> Result<(), StorageError> {
        if paths::is_root(path) {
            return Err(StorageError::InvalidPath("cannot create the bucket root".to_string()));
        }
        // S3 has no real directories; a zero-byte object with a trailing slash marks one
        let key = paths::normalize_directory(path);
        info!("[S3] Creating directory marker {}", key);
        self.put_object(&key, Vec::new(), None, RequestMode::Mutation).await?;
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<(), StorageError> {
        if paths::is_root(path) {
            return Err(StorageError::InvalidPath("refusing to delete the bucket root".to_string()));
        }

        let prefix = paths::normalize_directory(path);
        let mut keys: Vec<String> = self
            .list_all_objects(&prefix)
            .await?
            .into_iter()
            .map(|o| o.key)
            .collect();
        if !keys.contains(&prefix) {
            keys.push(prefix.clone());
        }

        info!("[S3] Deleting directory {} ({} keys)", prefix, keys.len());
        self.delete_keys(&keys).await
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let key = paths::normalize_key(key);
        if key.is_empty() {
            return Err(StorageError::InvalidPath("empty key".to_string()));
        }

        info!("[S3] Deleting {}", key);
        let response = self
            .s3_request(Method::DELETE, &key, &[], None, &[], RequestMode::Mutation)
            .await?;
        check_status(response, &key).await?;
        Ok(())
    }

    async fn upload_object(
        &self,
        file: UploadFile,
        directory: &str,
        type_hint: Option<TypeHint>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<ObjectMeta, StorageError> {
        let total = file.len();
        if let Some(ref cb) = on_progress {
            cb(0, total);
        }
        let meta = self.upload_one(file, directory, type_hint).await?;
        if let Some(ref cb) = on_progress {
            cb(total, total);
        }
        Ok(meta)
    }

    /// S3 has no multi-object PUT: the batch is one logical operation whose
    /// files are PUT concurrently, with progress aggregated across the batch.
    async fn upload_batch(
        &self,
        files: Vec<UploadFile>,
        directory: &str,
        type_hint: Option<TypeHint>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<ObjectMeta>, StorageError> {
        let total: u64 = files.iter().map(UploadFile::len).sum();
        let transferred = Arc::new(AtomicU64::new(0));
        let on_progress = on_progress.map(Arc::new);

        if let Some(ref cb) = on_progress {
            cb(0, total);
        }

        let uploads = files.into_iter().map(|file| {
            let transferred = Arc::clone(&transferred);
            let on_progress = on_progress.clone();
            async move {
                let size = file.len();
                let meta = self.upload_one(file, directory, type_hint).await?;
                let done = transferred.fetch_add(size, Ordering::SeqCst) + size;
                if let Some(cb) = on_progress {
                    cb(done, total);
                }
                Ok::<ObjectMeta, StorageError>(meta)
            }
        });

        futures_util::future::try_join_all(uploads).await
    }

    async fn create_empty_object(&self, path: &str) -> Result<(), StorageError> {
        let key = paths::normalize_key(path);
        if key.is_empty() || key.ends_with('/') {
            return Err(StorageError::InvalidPath(format!("not an object key: '{}'", path)));
        }
        info!("[S3] Creating empty object {}", key);
        let content_type = TypeHint::Other.content_type_for(&key);
        self.put_object(&key, Vec::new(), Some(content_type), RequestMode::Mutation)
            .await?;
        Ok(())
    }

    async fn get_signed_url(&self, key: &str, ttl_secs: u32) -> Result<String, StorageError> {
        let key = paths::normalize_key(key);
        debug!("[S3] Presigning {} for {}s", key, ttl_secs);
        self.presign_at(&key, ttl_secs, Utc::now())
    }

    async fn download_single(
        &self,
        key: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<DownloadedFile, StorageError> {
        let key = paths::normalize_key(key);
        let filename = sanitize_file_name(paths::last_segment(&key));

        let response = self
            .s3_request(Method::GET, &key, &[], None, &[], RequestMode::Transfer)
            .await?;
        let response = check_status(response, &key).await?;
        let total_size = response.content_length().unwrap_or(0);

        tokio::fs::create_dir_all(&self.config.download_dir).await?;
        let path = unique_download_path(&self.config.download_dir, &filename);
        let partial = PartialFile::new(path.clone());
        let mut file = tokio::fs::File::create(&path).await?;

        // Streaming download: chunked writes instead of buffering the whole object
        let mut stream = response.bytes_stream();
        let mut bytes_received: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::TransferFailed(e.to_string()))?;
            file.write_all(&chunk).await?;
            bytes_received += chunk.len() as u64;
            if let Some(ref cb) = on_progress {
                cb(bytes_received, total_size.max(bytes_received));
            }
        }
        file.flush().await?;
        partial.keep();

        info!("[S3] Downloaded {} -> {}", key, path.display());
        Ok(DownloadedFile {
            url: Self::file_url(&path)?,
            filename,
            path,
        })
    }

    /// Progress for archives counts completed objects, not bytes.
    async fn download_archive(
        &self,
        keys: &[String],
        archive_name: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<DownloadedFile, StorageError> {
        let mut unique: Vec<String> = Vec::new();
        for key in keys {
            let key = paths::normalize_key(key);
            if !key.is_empty() && !key.ends_with('/') && !unique.contains(&key) {
                unique.push(key);
            }
        }
        if unique.is_empty() {
            return Err(StorageError::InvalidPath("no objects to archive".to_string()));
        }

        let filename = format!("{}.zip", sanitize_file_name(archive_name));
        tokio::fs::create_dir_all(&self.config.download_dir).await?;
        let path = unique_download_path(&self.config.download_dir, &filename);
        let partial = PartialFile::new(path.clone());

        let file = std::fs::File::create(&path)?;
        let mut writer = zip::ZipWriter::new(file);
        let total = unique.len() as u64;

        for (index, key) in unique.iter().enumerate() {
            let bytes = self.fetch_object_bytes(key).await?;
            let entry = key.clone();
            writer = tokio::task::spawn_blocking(move || {
                let options = zip::write::SimpleFileOptions::default()
                    .compression_method(zip::CompressionMethod::Deflated);
                writer
                    .start_file(entry, options)
                    .map_err(|e| StorageError::TransferFailed(format!("zip: {}", e)))?;
                writer.write_all(&bytes)?;
                Ok::<_, StorageError>(writer)
            })
            .await
            .map_err(|e| StorageError::Other(format!("archive task failed: {}", e)))??;

            if let Some(ref cb) = on_progress {
                cb(index as u64 + 1, total);
            }
        }

        tokio::task::spawn_blocking(move || writer.finish())
            .await
            .map_err(|e| StorageError::Other(format!("archive task failed: {}", e)))?
            .map_err(|e| StorageError::TransferFailed(format!("zip: {}", e)))?;
        partial.keep();

        info!("[S3] Archived {} objects -> {}", total, path.display());
        Ok(DownloadedFile {
            url: Self::file_url(&path)?,
            filename,
            path,
        })
    }

    async fn tag_object(&self, key: &str, version: &str) -> Result<(), StorageError> {
        let key = paths::normalize_key(key);
        let body = tagging_request_body(&self.config.tag_key, version);
        let headers = [
            ("content-md5", content_md5(body.as_bytes())),
            ("content-type", "application/xml".to_string()),
        ];

        info!("[S3] Tagging {} with {}={}", key, self.config.tag_key, version);
        let response = self
            .s3_request(
                Method::PUT,
                &key,
                &[("tagging", "")],
                Some(body.into_bytes()),
                &headers,
                RequestMode::Mutation,
            )
            .await?;
        check_status(response, &key).await?;
        Ok(())
    }

    async fn get_object_tag_version(&self, key: &str) -> Result<String, StorageError> {
        let key = paths::normalize_key(key);
        let response = self
            .s3_request(Method::GET, &key, &[("tagging", "")], None, &[], RequestMode::Read)
            .await?;
        let response = check_status(response, &key).await?;
        let xml = response.text().await?;
        Ok(parse_tag_value(&xml, &self.config.tag_key)?.unwrap_or_default())
    }
}

// ============ Helpers ============

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| StorageError::Other(format!("HMAC key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn content_md5(body: &[u8]) -> String {
    use md5::Md5;
    let mut hasher = Md5::new();
    hasher.update(body);
    BASE64.encode(hasher.finalize())
}

/// Host header value; the port is kept when it is not the scheme default
fn host_header(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// URI-encode each key segment, keeping the slashes
fn encode_key(key: &str) -> String {
    key.trim_start_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Query string sorted by name with RFC 3986 encoding, as SigV4 expects
fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Map a non-success status to a gateway error
async fn check_status(response: Response, context: &str) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let code = xml_leaf_value(&body, "Code").unwrap_or_default();
    warn!("[S3] {} failed: {} {}", context, status, code);

    Err(match status {
        StatusCode::UNAUTHORIZED => StorageError::AuthenticationFailed(format!("{} ({})", context, code)),
        StatusCode::FORBIDDEN if code == "InvalidAccessKeyId" || code == "SignatureDoesNotMatch" => {
            StorageError::AuthenticationFailed(format!("{} ({})", context, code))
        }
        StatusCode::FORBIDDEN => StorageError::PermissionDenied(context.to_string()),
        StatusCode::NOT_FOUND => StorageError::NotFound(context.to_string()),
        StatusCode::REQUEST_TIMEOUT => StorageError::Timeout,
        status => StorageError::ServerError(format!("{} returned {} {}", context, status, code)),
    })
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '\0') || c.is_control() { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').to_string();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

/// `dir/name`, or `dir/stem (n).ext` when that file already exists
fn unique_download_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
        _ => (filename.to_string(), String::new()),
    };
    (1..)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Removes a partially written download unless `keep()` is called
struct PartialFile {
    path: Option<PathBuf>,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            debug!("[S3] Removing partial download {}", path.display());
            let _ = std::fs::remove_file(path);
        }
    }
}

// ============ Listing conversion ============

fn listing_from_page(prefix: &str, page: ListObjectsPage) -> DirectoryListing {
    let files = page
        .objects
        .into_iter()
        // directory markers are not files
        .filter(|o| o.key != prefix && !o.key.ends_with('/'))
        .collect();

    DirectoryListing {
        directories: page.common_prefixes,
        files,
        truncated: Some(page.is_truncated),
    }
}

/// Assemble a recursive snapshot from a flat, delimiter-less key listing.
///
/// Directory markers (`a/`) and prefixes implied by deeper keys both become
/// directories.
pub(crate) fn build_snapshot(objects: Vec<ObjectMeta>) -> SnapshotEntry {
    #[derive(Default)]
    struct DirAcc {
        dirs: BTreeSet<String>,
        files: Vec<ObjectMeta>,
    }

    let mut dirs: BTreeMap<String, DirAcc> = BTreeMap::new();
    dirs.insert(paths::ROOT_ID.to_string(), DirAcc::default());

    fn register(dirs: &mut BTreeMap<String, DirAcc>, dir: &str) {
        if dirs.contains_key(dir) {
            return;
        }
        dirs.insert(dir.to_string(), DirAcc::default());
        let parent = paths::parent_directory(dir);
        register(dirs, &parent);
        if let Some(acc) = dirs.get_mut(&parent) {
            acc.dirs.insert(dir.to_string());
        }
    }

    for object in objects {
        let key = paths::normalize_key(&object.key);
        if key.is_empty() {
            continue;
        }
        if key.ends_with('/') {
            register(&mut dirs, &paths::normalize_directory(&key));
            continue;
        }
        let parent = paths::parent_directory(&key);
        register(&mut dirs, &parent);
        if let Some(acc) = dirs.get_mut(&parent) {
            acc.files.push(object);
        }
    }

    fn assemble(dirs: &mut BTreeMap<String, DirAcc>, path: &str) -> SnapshotEntry {
        let acc = dirs.remove(path).unwrap_or_default();
        let mut children: Vec<SnapshotEntry> = acc
            .dirs
            .iter()
            .map(|child| assemble(dirs, child))
            .collect();
        children.extend(acc.files.into_iter().map(SnapshotEntry::File));
        SnapshotEntry::Directory {
            path: path.to_string(),
            children,
        }
    }

    assemble(&mut dirs, paths::ROOT_ID)
}

// ============ XML ============

/// Streaming XML visitor event
enum XmlNode<'a> {
    /// Text content of an element, with its parent element name
    Leaf { parent: &'a str, name: &'a str, value: String },
    /// An element closed
    Close { name: &'a str },
}

/// Walk an XML document, reporting leaf values and element ends.
///
/// Entity references are resolved into the text; namespaces are ignored.
fn walk_xml(xml: &str, mut visit: impl FnMut(XmlNode<'_>)) -> Result<(), StorageError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                text.clear();
            }
            Ok(Event::Text(e)) => text.push_str(&String::from_utf8_lossy(&e)),
            Ok(Event::CData(e)) => text.push_str(&String::from_utf8_lossy(&e)),
            Ok(Event::GeneralRef(e)) => {
                let name = String::from_utf8_lossy(&e);
                match e.resolve_char_ref() {
                    Ok(Some(c)) => text.push(c),
                    _ => match resolve_predefined_entity(&name) {
                        Some(value) => text.push_str(value),
                        None => {
                            text.push('&');
                            text.push_str(&name);
                            text.push(';');
                        }
                    },
                }
            }
            Ok(Event::End(_)) => {
                let name = stack.pop().unwrap_or_default();
                let parent = stack.last().map(String::as_str).unwrap_or("");
                let value = std::mem::take(&mut text);
                if !value.trim().is_empty() {
                    visit(XmlNode::Leaf { parent, name: &name, value });
                }
                visit(XmlNode::Close { name: &name });
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(StorageError::ParseError(format!(
                    "XML error at {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

/// First value of a leaf element anywhere in the document
fn xml_leaf_value(xml: &str, element: &str) -> Option<String> {
    let mut found = None;
    walk_xml(xml, |node| {
        if let XmlNode::Leaf { name, value, .. } = node {
            if found.is_none() && name == element {
                found = Some(value);
            }
        }
    })
    .ok()?;
    found
}

/// Parse a ListObjectsV2 XML response
fn parse_list_objects(xml: &str) -> Result<ListObjectsPage, StorageError> {
    let mut page = ListObjectsPage::default();
    let mut current = ObjectMeta::new("", 0);

    walk_xml(xml, |node| match node {
        XmlNode::Leaf { parent: "Contents", name, value } => match name {
            "Key" => current.key = value,
            "Size" => current.size = value.trim().parse().unwrap_or(0),
            "LastModified" => {
                current.last_modified = DateTime::parse_from_rfc3339(value.trim())
                    .ok()
                    .map(|d| d.with_timezone(&Utc))
            }
            "ETag" => current.etag = Some(value.trim().trim_matches('"').to_string()),
            _ => {}
        },
        XmlNode::Leaf { parent: "CommonPrefixes", name: "Prefix", value } => {
            page.common_prefixes.push(value);
        }
        XmlNode::Leaf { parent: "ListBucketResult", name: "NextContinuationToken", value } => {
            page.next_token = Some(value.trim().to_string());
        }
        XmlNode::Leaf { parent: "ListBucketResult", name: "IsTruncated", value } => {
            page.is_truncated = value.trim() == "true";
        }
        XmlNode::Close { name: "Contents" } => {
            let mut object = std::mem::replace(&mut current, ObjectMeta::new("", 0));
            if !object.key.is_empty() {
                object.name = paths::last_segment(&object.key).to_string();
                page.objects.push(object);
            }
        }
        _ => {}
    })?;

    Ok(page)
}

/// Value of tag `tag_key` in a GetObjectTagging response
fn parse_tag_value(xml: &str, tag_key: &str) -> Result<Option<String>, StorageError> {
    let mut key: Option<String> = None;
    let mut value: Option<String> = None;
    let mut found = None;

    walk_xml(xml, |node| match node {
        XmlNode::Leaf { parent: "Tag", name: "Key", value: v } => key = Some(v),
        XmlNode::Leaf { parent: "Tag", name: "Value", value: v } => value = Some(v),
        XmlNode::Close { name: "Tag" } => {
            if found.is_none() && key.as_deref() == Some(tag_key) {
                found = Some(value.take().unwrap_or_default());
            }
            key = None;
            value = None;
        }
        _ => {}
    })?;

    Ok(found)
}

/// `(key, message)` pairs of a DeleteObjects response
fn parse_delete_errors(xml: &str) -> Result<Vec<(String, String)>, StorageError> {
    let mut errors = Vec::new();
    let mut key = String::new();
    let mut message = String::new();

    walk_xml(xml, |node| match node {
        XmlNode::Leaf { parent: "Error", name: "Key", value } => key = value,
        XmlNode::Leaf { parent: "Error", name: "Message", value } => message = value,
        XmlNode::Close { name: "Error" } => {
            errors.push((std::mem::take(&mut key), std::mem::take(&mut message)));
        }
        _ => {}
    })?;

    Ok(errors)
}

fn delete_request_body(keys: &[String]) -> String {
    let mut body = String::from("<Delete><Quiet>true</Quiet>");
    for key in keys {
        body.push_str("<Object><Key>");
        body.push_str(&quick_xml::escape::escape(key.as_str()));
        body.push_str("</Key></Object>");
    }
    body.push_str("</Delete>");
    body
}

fn tagging_request_body(tag_key: &str, version: &str) -> String {
    format!(
        "<Tagging xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"><TagSet><Tag><Key>{}</Key><Value>{}</Value></Tag></TagSet></Tagging>",
        quick_xml::escape::escape(tag_key),
        quick_xml::escape::escape(version)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_config(endpoint: Option<&str>, path_style: bool) -> S3Config {
        S3Config {
            endpoint: endpoint.map(str::to_string),
            region: "us-east-1".to_string(),
            access_key_id: "test".to_string(),
            secret_access_key: secrecy::SecretString::from("test".to_string()),
            bucket: "test-bucket".to_string(),
            path_style,
            request_timeout_secs: 5,
            transfer_timeout_secs: 60,
            max_retries: 0,
            download_dir: std::env::temp_dir(),
            tag_key: "version".to_string(),
        }
    }

    #[test]
    fn test_build_url_path_style() {
        let gateway = S3Gateway::new(test_config(Some("http://localhost:4566"), true)).unwrap();
        assert_eq!(
            gateway.build_url("path/to/file.txt"),
            "http://localhost:4566/test-bucket/path/to/file.txt"
        );
        assert_eq!(gateway.build_url(""), "http://localhost:4566/test-bucket");
    }

    #[test]
    fn test_build_url_virtual_hosted() {
        let mut config = test_config(None, false);
        config.region = "us-west-2".to_string();
        let gateway = S3Gateway::new(config).unwrap();
        assert_eq!(
            gateway.build_url("path/to/file.txt"),
            "https://test-bucket.s3.us-west-2.amazonaws.com/path/to/file.txt"
        );
    }

    #[test]
    fn test_empty_bucket_rejected() {
        let mut config = test_config(None, false);
        config.bucket = "  ".to_string();
        assert!(matches!(S3Gateway::new(config), Err(StorageError::InvalidConfig(_))));
    }

    #[test]
    fn test_request_url_encodes_key_and_sorts_query() {
        let gateway = S3Gateway::new(test_config(Some("http://localhost:4566"), true)).unwrap();
        let url = gateway.request_url(
            "my docs/a+b.txt",
            &[("prefix", "my docs/"), ("list-type", "2"), ("delimiter", "/")],
        );
        assert_eq!(
            url,
            "http://localhost:4566/test-bucket/my%20docs/a%2Bb.txt?delimiter=%2F&list-type=2&prefix=my%20docs%2F"
        );
    }

    #[test]
    fn test_host_header_keeps_custom_port() {
        let with_port = url::Url::parse("http://localhost:4566/b").unwrap();
        assert_eq!(host_header(&with_port), "localhost:4566");
        let default_port = url::Url::parse("https://s3.amazonaws.com/b").unwrap();
        assert_eq!(host_header(&default_port), "s3.amazonaws.com");
    }

    #[test]
    fn test_sign_request_headers() {
        let gateway = S3Gateway::new(test_config(Some("http://localhost:4566"), true)).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());

        let auth = gateway
            .sign_request(
                "PUT",
                "http://localhost:4566/test-bucket/a.txt",
                &mut headers,
                &sha256_hex(b""),
                now,
            )
            .unwrap();

        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=test/20240501/us-east-1/s3/aws4_request, \
             SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date, Signature="
        ));
        assert_eq!(headers.get("x-amz-date").unwrap(), "20240501T120000Z");
        assert_eq!(headers.get("host").unwrap(), "localhost:4566");

        // same inputs sign identically
        let mut again = BTreeMap::new();
        again.insert("content-type".to_string(), "text/plain".to_string());
        let auth_again = gateway
            .sign_request(
                "PUT",
                "http://localhost:4566/test-bucket/a.txt",
                &mut again,
                &sha256_hex(b""),
                now,
            )
            .unwrap();
        assert_eq!(auth, auth_again);
    }

    #[test]
    fn test_presigned_url_shape() {
        let gateway = S3Gateway::new(test_config(Some("http://localhost:4566"), true)).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let url = gateway.presign_at("docs/a b.txt", 3600, now).unwrap();

        assert!(url.starts_with("http://localhost:4566/test-bucket/docs/a%20b.txt?X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Credential=test%2F20240501%2Fus-east-1%2Fs3%2Faws4_request"));
        assert!(url.contains("X-Amz-Expires=3600"));
        let signature = url.rsplit("X-Amz-Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(url, gateway.presign_at("docs/a b.txt", 5, now).unwrap());
        assert!(gateway.presign_at("docs/a.txt", 0, now).is_err());
    }

    #[test]
    fn test_parse_list_objects() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>test-bucket</Name>
  <Prefix>docs/</Prefix>
  <KeyCount>3</KeyCount>
  <MaxKeys>3</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>token-2</NextContinuationToken>
  <Contents>
    <Key>docs/</Key>
    <Size>0</Size>
  </Contents>
  <Contents>
    <Key>docs/R&amp;D notes &#x2116;&#49;.txt</Key>
    <LastModified>2024-05-01T12:00:00.000Z</LastModified>
    <ETag>&quot;abc123&quot;</ETag>
    <Size>120</Size>
  </Contents>
  <CommonPrefixes>
    <Prefix>docs/sub/</Prefix>
  </CommonPrefixes>
</ListBucketResult>"#;

        let page = parse_list_objects(xml).unwrap();
        assert!(page.is_truncated);
        assert_eq!(page.next_token.as_deref(), Some("token-2"));
        assert_eq!(page.common_prefixes, vec!["docs/sub/".to_string()]);
        assert_eq!(page.objects.len(), 2);

        let notes = &page.objects[1];
        assert_eq!(notes.key, "docs/R&D notes \u{2116}1.txt");
        assert_eq!(notes.name, "R&D notes \u{2116}1.txt");
        assert_eq!(notes.size, 120);
        assert_eq!(notes.etag.as_deref(), Some("abc123"));
        assert_eq!(
            notes.last_modified,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );

        let listing = listing_from_page("docs/", page);
        assert_eq!(listing.files.len(), 1, "directory marker is dropped");
        assert_eq!(listing.truncated, Some(true));
    }

    #[tokio::test]
    async fn test_relisting_first_page_forgets_prefix_tokens() {
        let gateway = S3Gateway::new(test_config(Some("http://localhost:4566"), true)).unwrap();
        gateway.remember_token("docs/", 10, 1, Some("docs-1"));
        gateway.remember_token("docs/", 10, 2, Some("docs-2"));
        gateway.remember_token("img/", 10, 1, Some("img-1"));

        assert!(matches!(gateway.page_start("docs/", 10, 0).await.unwrap(), PageStart::First));

        let key = |prefix: &str, page| PageKey { prefix: prefix.to_string(), page_size: 10, page };
        assert_eq!(gateway.cached_token(&key("docs/", 1)), None);
        assert_eq!(gateway.cached_token(&key("docs/", 2)), None);
        assert_eq!(gateway.cached_token(&key("img/", 1)).as_deref(), Some("img-1"));
    }

    #[test]
    fn test_page_token_cache_is_bounded() {
        let gateway = S3Gateway::new(test_config(Some("http://localhost:4566"), true)).unwrap();
        for page in 1..=MAX_CACHED_PAGE_TOKENS as u32 + 10 {
            gateway.remember_token("big/", 1, page, Some("t"));
        }
        let cached = gateway.page_tokens.lock().unwrap().len();
        assert!(cached <= MAX_CACHED_PAGE_TOKENS);
    }

    #[test]
    fn test_parse_list_objects_rejects_garbage() {
        assert!(parse_list_objects("<ListBucketResult><Contents></ListBucketResult>").is_err());
    }

    #[test]
    fn test_build_snapshot() {
        let snapshot = build_snapshot(vec![
            ObjectMeta::new("readme.txt", 120),
            ObjectMeta::new("docs/", 0),
            ObjectMeta::new("docs/a.txt", 1),
            ObjectMeta::new("media/img/cat.png", 2),
            ObjectMeta::new("empty/", 0),
        ]);

        let SnapshotEntry::Directory { path, children } = snapshot else {
            panic!("root must be a directory");
        };
        assert_eq!(path, "/");
        let paths: Vec<&str> = children.iter().map(SnapshotEntry::path).collect();
        assert_eq!(paths, vec!["docs/", "empty/", "media/", "readme.txt"]);

        let SnapshotEntry::Directory { children: media, .. } = &children[2] else {
            panic!("media/ must be a directory");
        };
        assert_eq!(media[0].path(), "media/img/");
        assert_eq!(media[0].file_count(), 1);
    }

    #[test]
    fn test_parse_tag_value() {
        let xml = r#"<Tagging><TagSet>
            <Tag><Key>owner</Key><Value>ops</Value></Tag>
            <Tag><Key>version</Key><Value>1.4.2</Value></Tag>
        </TagSet></Tagging>"#;
        assert_eq!(parse_tag_value(xml, "version").unwrap().as_deref(), Some("1.4.2"));
        assert_eq!(parse_tag_value(xml, "missing").unwrap(), None);
        assert_eq!(
            parse_tag_value("<Tagging><TagSet/></Tagging>", "version").unwrap(),
            None
        );
    }

    #[test]
    fn test_parse_delete_errors() {
        let xml = r#"<DeleteResult>
            <Error><Key>a.txt</Key><Code>AccessDenied</Code><Message>Access Denied</Message></Error>
        </DeleteResult>"#;
        assert_eq!(
            parse_delete_errors(xml).unwrap(),
            vec![("a.txt".to_string(), "Access Denied".to_string())]
        );
        assert!(parse_delete_errors("<DeleteResult></DeleteResult>").unwrap().is_empty());
    }

    #[test]
    fn test_request_bodies_escape_values() {
        let body = delete_request_body(&["a&b.txt".to_string()]);
        assert!(body.contains("<Key>a&amp;b.txt</Key>"));

        let tagging = tagging_request_body("version", "<1.0>");
        assert!(tagging.contains("<Value>&lt;1.0&gt;</Value>"));
    }

    #[test]
    fn test_sanitize_and_unique_paths() {
        assert_eq!(sanitize_file_name("a/b:c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_file_name(".."), "download");

        let dir = tempfile::tempdir().unwrap();
        let first = unique_download_path(dir.path(), "report.pdf");
        assert_eq!(first, dir.path().join("report.pdf"));
        std::fs::write(&first, b"x").unwrap();
        assert_eq!(
            unique_download_path(dir.path(), "report.pdf"),
            dir.path().join("report (1).pdf")
        );
    }

    #[test]
    fn test_partial_file_removed_unless_kept() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = dir.path().join("dropped.bin");
        let kept = dir.path().join("kept.bin");
        std::fs::write(&dropped, b"x").unwrap();
        std::fs::write(&kept, b"x").unwrap();

        drop(PartialFile::new(dropped.clone()));
        PartialFile::new(kept.clone()).keep();

        assert!(!dropped.exists());
        assert!(kept.exists());
    }
}
