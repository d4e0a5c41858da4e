//! S3 object store
//!
//! Checkpoint directories are mirrored object by object. Objects above the
//! multipart threshold are sent in parts so a single checkpoint shard can
//! exceed the 5 GiB single-request limit. Transient failures are retried with
//! the backoff from [`RetryConfig`].

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use harness_core::config::{RetryConfig, StorageBackend, StorageConfig};
use harness_core::{Error, Result};
use std::future::Future;
use tracing::{debug, info, instrument, warn};

use crate::backend::ObjectStore;

const DEFAULT_REGION: &str = "us-east-1";

/// Smallest part S3 accepts for every part but the last
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

fn storage_error<E, R>(operation: &str, err: SdkError<E, R>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    Error::Storage {
        message: format!("S3 {operation} failed: {}", DisplayErrorContext(&err)),
    }
}

/// Connection settings for [`S3ObjectStore`]
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint for S3-compatible stores such as MinIO
    pub endpoint_url: Option<String>,
    pub region: String,
    /// Path-style addressing, required by most S3-compatible stores
    pub force_path_style: bool,
    pub retry: RetryConfig,
    /// Objects larger than this are uploaded in parts of this size
    pub multipart_part_size: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: DEFAULT_REGION.to_string(),
            force_path_style: false,
            retry: RetryConfig::default(),
            multipart_part_size: MIN_PART_SIZE,
        }
    }
}

impl S3Config {
    /// Build from the harness storage settings
    pub fn from_backend(backend: &StorageBackend, retry: &RetryConfig) -> Result<Self> {
        let StorageBackend::S3 {
            region,
            endpoint,
            force_path_style,
        } = backend
        else {
            return Err(Error::InvalidConfig {
                message: "storage backend is not S3".to_string(),
            });
        };

        Ok(Self {
            endpoint_url: endpoint.clone(),
            region: region.clone(),
            force_path_style: *force_path_style,
            retry: retry.clone(),
            ..Default::default()
        })
    }

    /// Settings for a local MinIO server
    pub fn minio(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint_url: Some(endpoint.into()),
            force_path_style: true,
            ..Default::default()
        }
    }
}

/// S3-compatible object store
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    retry: RetryConfig,
    part_size: usize,
}

impl S3ObjectStore {
    /// Connect using credentials from the environment or instance profile
    pub async fn connect(config: S3Config) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&sdk_config).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        info!(
            region = %config.region,
            endpoint = config.endpoint_url.as_deref().unwrap_or("aws"),
            "Connected S3 object store"
        );
        Self {
            client: Client::from_conf(builder.build()),
            retry: config.retry,
            part_size: config.multipart_part_size.max(MIN_PART_SIZE),
        }
    }

    /// Connect using the harness storage settings
    pub async fn from_storage_config(storage: &StorageConfig) -> Result<Self> {
        let config = S3Config::from_backend(&storage.backend, &storage.retry)?;
        Ok(Self::connect(config).await)
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying S3 request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn multipart_upload(&self, bucket: &str, key: &str, data: Bytes) -> Result<u64> {
        let created = self
            .with_retry("create_multipart_upload", || async {
                self.client
                    .create_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| storage_error("create_multipart_upload", e))
            })
            .await?;
        let upload_id = created.upload_id().ok_or_else(|| Error::Storage {
            message: format!("S3 returned no upload id for {bucket}/{key}"),
        })?;

        match self.upload_parts(bucket, key, upload_id, &data).await {
            Ok(parts) => {
                self.with_retry("complete_multipart_upload", || {
                    let parts = parts.clone();
                    async move {
                        self.client
                            .complete_multipart_upload()
                            .bucket(bucket)
                            .key(key)
                            .upload_id(upload_id)
                            .multipart_upload(
                                CompletedMultipartUpload::builder().set_parts(Some(parts)).build(),
                            )
                            .send()
                            .await
                            .map_err(|e| storage_error("complete_multipart_upload", e))
                    }
                })
                .await?;
                debug!(key, size = data.len(), "Completed multipart upload");
                Ok(data.len() as u64)
            }
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send()
                    .await
                {
                    warn!(key, upload_id, error = %DisplayErrorContext(&abort), "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        data: &Bytes,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        for (index, start) in (0..data.len()).step_by(self.part_size).enumerate() {
            let part_number = index as i32 + 1;
            let chunk = data.slice(start..data.len().min(start + self.part_size));

            let uploaded = self
                .with_retry("upload_part", || {
                    let chunk = chunk.clone();
                    async move {
                        self.client
                            .upload_part()
                            .bucket(bucket)
                            .key(key)
                            .upload_id(upload_id)
                            .part_number(part_number)
                            .body(ByteStream::from(chunk))
                            .send()
                            .await
                            .map_err(|e| storage_error("upload_part", e))
                    }
                })
                .await?;

            debug!(key, part_number, size = chunk.len(), "Uploaded part");
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .build(),
            );
        }
        Ok(parts)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.with_retry("get_object", || async {
            let output = match self.client.get_object().bucket(bucket).key(key).send().await {
                Ok(output) => output,
                Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                    return Err(Error::StoragePathNotFound {
                        path: format!("{bucket}/{key}"),
                    })
                }
                Err(e) => return Err(storage_error("get_object", e)),
            };

            let body = output.body.collect().await.map_err(|e| Error::Storage {
                message: format!("failed to read body of {bucket}/{key}: {e}"),
            })?;
            Ok(body.into_bytes())
        })
        .await
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<u64> {
        if data.len() > self.part_size {
            return self.multipart_upload(bucket, key, data).await;
        }

        self.with_retry("put_object", || {
            let data = data.clone();
            async move {
                let size = data.len() as u64;
                self.client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(ByteStream::from(data))
                    .send()
                    .await
                    .map_err(|e| storage_error("put_object", e))?;
                Ok(size)
            }
        })
        .await
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.with_retry("delete_object", || async {
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| storage_error("delete_object", e))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        self.with_retry("head_object", || async {
            match self.client.head_object().bucket(bucket).key(key).send().await {
                Ok(_) => Ok(true),
                Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
                Err(e) => Err(storage_error("head_object", e)),
            }
        })
        .await
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .with_retry("list_objects_v2", || {
                    let continuation = continuation.clone();
                    async move {
                        self.client
                            .list_objects_v2()
                            .bucket(bucket)
                            .prefix(prefix)
                            .set_continuation_token(continuation)
                            .send()
                            .await
                            .map_err(|e| storage_error("list_objects_v2", e))
                    }
                })
                .await?;

            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            match page.next_continuation_token() {
                Some(token) if page.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string())
                }
                _ => break,
            }
        }

        keys.sort();
        debug!(count = keys.len(), "Listed S3 objects");
        Ok(keys)
    }
}
