//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements the ObjectStore trait from rcopy-core.
//! Identifiers handled here have the form `alias/bucket/key`.

use std::collections::VecDeque;

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use futures::StreamExt as _;
use futures::stream::{self, BoxStream};
use jiff::Timestamp;
use rcopy_core::{
    Alias, Error, ObjectInfo, ObjectReader, ObjectStore, RemotePath, Result, RetryConfig,
    is_retryable_error, retry_with_backoff,
};
use tokio::io::AsyncReadExt as _;

/// Objects up to this size are sent with a single PutObject
pub const MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Part size for multipart uploads
pub const PART_SIZE: usize = 16 * 1024 * 1024;

/// S3 client wrapper
pub struct S3Client {
    inner: aws_sdk_s3::Client,
    alias: Alias,
    retry: RetryConfig,
}

impl S3Client {
    /// Create a new S3 client from an alias configuration
    pub async fn new(alias: Alias) -> Result<Self> {
        let credentials = aws_credential_types::Credentials::new(
            alias.access_key.clone(),
            alias.secret_key.clone(),
            None,
            None,
            "rcopy-static-credentials",
        );

        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(aws_config::Region::new(alias.region.clone()))
            .endpoint_url(&alias.endpoint)
            .load()
            .await;

        // Path-style addressing unless DNS lookup was asked for
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(alias.bucket_lookup != "dns")
            .build();

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            alias,
            retry: RetryConfig::default(),
        })
    }

    /// Retry policy for listing and metadata requests
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn alias(&self) -> &Alias {
        &self.alias
    }

    fn parse(&self, id: &str) -> Result<RemotePath> {
        let path = RemotePath::parse(id)?;
        if path.alias != self.alias.name {
            return Err(Error::InvalidPath(format!(
                "'{id}' does not belong to alias '{}'",
                self.alias.name
            )));
        }
        Ok(path)
    }

    /// Identifier of `key` in `bucket`, as the engine sees it
    fn object_name(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.alias.name, bucket, key.trim_end_matches('/'))
    }

    /// Format AWS SDK error into a detailed error message
    fn format_sdk_error<E: std::fmt::Display>(error: &SdkError<E>) -> String {
        match error {
            SdkError::ServiceError(service_err) => {
                let err = service_err.err();
                let meta = service_err.raw();
                let mut msg = format!("Service error: {}", err);
                if let Some(code) = meta.headers().get("x-amz-error-code")
                    && let Ok(code_str) = std::str::from_utf8(code.as_bytes())
                {
                    msg.push_str(&format!(" (code: {})", code_str));
                }
                msg
            }
            SdkError::ConstructionFailure(err) => {
                format!("Request construction failed: {:?}", err)
            }
            SdkError::TimeoutError(_) => "Request timeout".to_string(),
            SdkError::DispatchFailure(err) => {
                format!("Network dispatch error: {:?}", err)
            }
            SdkError::ResponseError(err) => {
                format!("Response error: {:?}", err)
            }
            _ => error.to_string(),
        }
    }

    /// Map an SDK failure on `what` to NotFound or Network
    fn classify<E>(error: &SdkError<E>, what: &str) -> Error
    where
        E: ProvideErrorMetadata + std::fmt::Display,
    {
        let missing = matches!(
            error.code(),
            Some("NoSuchKey" | "NoSuchBucket" | "NotFound")
        );
        let message = Self::format_sdk_error(error);
        if missing || message.contains("NotFound") {
            Error::NotFound(what.to_string())
        } else {
            Error::Network(message)
        }
    }

    /// Fetch the next page of `listing` into its buffer
    async fn fetch_page(&self, listing: &mut Listing) -> Result<()> {
        let token = match &listing.page {
            Page::First => None,
            Page::Next(token) => Some(token.clone()),
            Page::Done => return Ok(()),
        };
        let bucket = listing.path.bucket.clone();
        let prefix = listing.prefix();
        let recursive = listing.recursive;
        let what = listing.path.to_string();

        let response = retry_with_backoff(
            &self.retry,
            || {
                let mut request = self.inner.list_objects_v2().bucket(&bucket);
                if !prefix.is_empty() {
                    request = request.prefix(&prefix);
                }
                if !recursive {
                    request = request.delimiter("/");
                }
                if let Some(token) = &token {
                    request = request.continuation_token(token);
                }
                let what = what.clone();
                async move {
                    request
                        .send()
                        .await
                        .map_err(|e| Self::classify(&e, &what))
                }
            },
            is_retryable_error,
        )
        .await?;

        let key = listing.key().to_string();
        if !recursive {
            for object in response.contents() {
                let object_key = object.key().unwrap_or_default();
                if key.is_empty() || object_key == key {
                    let info = ObjectInfo::file(
                        self.object_name(&bucket, object_key),
                        object.size().unwrap_or(0).max(0) as u64,
                    )
                    .with_modified(object.last_modified().and_then(|t| to_timestamp(t.secs())));
                    listing.pending.push_back(info);
                }
            }
            for common in response.common_prefixes() {
                let Some(p) = common.prefix() else { continue };
                if key.is_empty() || p.trim_end_matches('/') == key {
                    listing
                        .pending
                        .push_back(ObjectInfo::dir(self.object_name(&bucket, p)));
                }
            }
        } else {
            for object in response.contents() {
                let object_key = object.key().unwrap_or_default();
                // Folder markers carry no data
                if object_key.ends_with('/') {
                    continue;
                }
                let info = ObjectInfo::file(
                    self.object_name(&bucket, object_key),
                    object.size().unwrap_or(0).max(0) as u64,
                )
                .with_modified(object.last_modified().and_then(|t| to_timestamp(t.secs())));
                listing.pending.push_back(info);
            }
        }

        listing.page = match response.next_continuation_token() {
            Some(token) if response.is_truncated().unwrap_or(false) => Page::Next(token.to_string()),
            _ => Page::Done,
        };
        Ok(())
    }

    /// Resolve a key that matched nothing as a prefix
    async fn fallback(&self, listing: &Listing) -> Result<Option<ObjectInfo>> {
        let key = listing.key();
        if key.is_empty() {
            return Ok(None);
        }
        if !listing.recursive {
            return Err(Error::NotFound(listing.path.to_string()));
        }

        let bucket = &listing.path.bucket;
        let what = listing.path.to_string();
        let response = retry_with_backoff(
            &self.retry,
            || {
                let request = self.inner.head_object().bucket(bucket).key(key);
                let what = what.clone();
                async move {
                    request
                        .send()
                        .await
                        .map_err(|e| Self::classify(&e, &what))
                }
            },
            is_retryable_error,
        )
        .await?;

        Ok(Some(
            ObjectInfo::file(
                self.object_name(bucket, key),
                response.content_length().unwrap_or(0).max(0) as u64,
            )
            .with_modified(response.last_modified().and_then(|t| to_timestamp(t.secs()))),
        ))
    }

    async fn next_entry(&self, listing: &mut Listing) -> Option<Result<ObjectInfo>> {
        loop {
            if let Some(info) = listing.pending.pop_front() {
                listing.found = true;
                return Some(Ok(info));
            }

            match listing.page {
                Page::Done if listing.found || listing.exhausted => return None,
                Page::Done => {
                    listing.exhausted = true;
                    return self.fallback(listing).await.transpose();
                }
                _ => {
                    if let Err(e) = self.fetch_page(listing).await {
                        listing.page = Page::Done;
                        listing.exhausted = true;
                        return Some(Err(e));
                    }
                }
            }
        }
    }

    async fn put_single(&self, path: &RemotePath, size: u64, mut reader: ObjectReader) -> Result<()> {
        let mut data = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut data).await?;
        if data.len() as u64 != size {
            tracing::warn!(
                object = %path,
                expected = size,
                read = data.len(),
                "Source size changed during copy"
            );
        }

        self.inner
            .put_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Self::classify(&e, &path.to_string()))?;
        Ok(())
    }

    async fn put_multipart(&self, path: &RemotePath, mut reader: ObjectReader) -> Result<()> {
        let created = self
            .inner
            .create_multipart_upload()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await
            .map_err(|e| Self::classify(&e, &path.to_string()))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::Network(format!("no upload id returned for {path}")))?
            .to_string();

        match self.upload_parts(path, &upload_id, &mut reader).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(abort) = self
                    .inner
                    .abort_multipart_upload()
                    .bucket(&path.bucket)
                    .key(&path.key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!(
                        object = %path,
                        error = %Self::format_sdk_error(&abort),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        path: &RemotePath,
        upload_id: &str,
        reader: &mut ObjectReader,
    ) -> Result<()> {
        let mut parts = Vec::new();
        let mut part_number = 1i32;

        loop {
            let chunk = read_chunk(reader, PART_SIZE).await?;
            if chunk.is_empty() && part_number > 1 {
                break;
            }
            let last = chunk.len() < PART_SIZE;

            let uploaded = self
                .inner
                .upload_part()
                .bucket(&path.bucket)
                .key(&path.key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| Self::classify(&e, &path.to_string()))?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            tracing::trace!(object = %path, part_number, "Uploaded part");

            if last {
                break;
            }
            part_number += 1;
        }

        self.inner
            .complete_multipart_upload()
            .bucket(&path.bucket)
            .key(&path.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Self::classify(&e, &path.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn open(&self, id: &str) -> Result<(ObjectReader, u64)> {
        let path = self.parse(id)?;
        if path.key.is_empty() || path.key.ends_with('/') {
            return Err(Error::IsDirectory(id.to_string()));
        }

        let response = self
            .inner
            .get_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await
            .map_err(|e| Self::classify(&e, id))?;

        let size = response.content_length().unwrap_or(0).max(0) as u64;
        let reader: ObjectReader = Box::pin(response.body.into_async_read());
        Ok((reader, size))
    }

    async fn put(&self, id: &str, size: u64, reader: ObjectReader) -> Result<()> {
        let path = self.parse(id)?;
        if path.key.is_empty() {
            return Err(Error::InvalidPath(format!("'{id}' has no object key")));
        }

        if size <= MULTIPART_THRESHOLD {
            self.put_single(&path, size, reader).await
        } else {
            self.put_multipart(&path, reader).await
        }
    }

    fn list<'a>(&'a self, id: &'a str, recursive: bool) -> BoxStream<'a, Result<ObjectInfo>> {
        let path = match self.parse(id) {
            Ok(path) => path,
            Err(e) => return stream::iter([Err(e)]).boxed(),
        };

        stream::unfold(Listing::new(path, recursive), move |mut listing| async move {
            let entry = self.next_entry(&mut listing).await?;
            Some((entry, listing))
        })
        .boxed()
    }
}

/// Pagination state of one listing
#[derive(Debug, Clone, PartialEq, Eq)]
enum Page {
    First,
    Next(String),
    Done,
}

#[derive(Debug)]
struct Listing {
    path: RemotePath,
    recursive: bool,
    page: Page,
    pending: VecDeque<ObjectInfo>,
    found: bool,
    exhausted: bool,
}

impl Listing {
    fn new(path: RemotePath, recursive: bool) -> Self {
        Self {
            path,
            recursive,
            page: Page::First,
            pending: VecDeque::new(),
            found: false,
            exhausted: false,
        }
    }

    fn key(&self) -> &str {
        self.path.key.trim_end_matches('/')
    }

    /// Request prefix: the key itself when matching one entry, the folder
    /// below it when walking recursively
    fn prefix(&self) -> String {
        let key = self.key();
        if self.recursive && !key.is_empty() {
            format!("{key}/")
        } else {
            key.to_string()
        }
    }
}

fn to_timestamp(secs: i64) -> Option<Timestamp> {
    Timestamp::from_second(secs).ok()
}

/// Read up to `limit` bytes, stopping early only at end of stream
async fn read_chunk(reader: &mut ObjectReader, limit: usize) -> Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(limit);
    let mut taken = reader.take(limit as u64);
    taken.read_to_end(&mut chunk).await?;
    Ok(chunk)
}
