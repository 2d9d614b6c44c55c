//! S3-compatible storage backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ObjectEntry, ObjectMeta, ObjectStore, PutBody, PutCondition, PutOptions, StoreCapabilities,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;
use tracing::instrument;

/// Files at least this large are uploaded in parts (64 MiB).
const MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Smallest part size used for multipart uploads (16 MiB).
/// S3 requires all parts except the last to be at least 5 MiB.
const MIN_PART_SIZE: u64 = 16 * 1024 * 1024;

/// S3 caps a multipart upload at 10,000 parts.
const MAX_PARTS: u64 = 10_000;

/// Marker included in lazy-credentials initialization errors so we can map them
/// to actionable storage config errors instead of generic S3 transport failures.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "bucketgames-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "bucketgames-s3-lazy-credentials-resolve";

/// Lazily initializes the AWS default credentials chain on first signed request.
///
/// This avoids constructor-time side effects (notably TLS/native-root initialization)
/// in environments where no root certificates are available.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async {
                let region = aws_config::Region::new(self.region.clone());
                tokio::task::spawn(async move {
                    aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                        .region(region)
                        .build()
                        .await
                })
                .await
                .map_err(|join_err| {
                    CredentialsError::provider_error(format!(
                        "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
                    ))
                })
            })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

/// Classify an SDK error into the storage error taxonomy.
///
/// Transport failures, timeouts, throttling and 5xx responses are transient.
/// Authorization failures, missing buckets and failed preconditions are
/// reported as their own variants; everything else is an opaque S3 error.
fn classify_sdk_error<E>(err: SdkError<E>, key: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let err_text = DisplayErrorContext(&err).to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Configure credentials in credentials.toml or ensure ambient AWS credentials and trust roots are available."
                .to_string(),
        );
    }

    let classified = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            Some(StorageError::Transient(err_text))
        }
        SdkError::ServiceError(service_err) => {
            let status = service_err.raw().status().as_u16();
            let code = service_err.err().code().unwrap_or_default();
            classify_status(status, code, key, err_text)
        }
        _ => None,
    };
    classified.unwrap_or_else(|| StorageError::S3(Box::new(err)))
}

fn classify_status(status: u16, code: &str, key: &str, text: String) -> Option<StorageError> {
    let classified = match (status, code) {
        (_, "NoSuchBucket") => StorageError::BucketNotFound(text),
        (_, "SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable") => {
            StorageError::Transient(text)
        }
        (404, _) => StorageError::NotFound(key.to_string()),
        (401 | 403, _) => StorageError::Unauthorized(text),
        (412, _) | (409, "ConditionalRequestConflict") => {
            StorageError::PreconditionFailed(key.to_string())
        }
        (408 | 429, _) | (500..=599, _) => StorageError::Transient(text),
        _ => return None,
    };
    Some(classified)
}

/// S3-compatible object store using AWS SDK.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Normalized endpoint, kept for diagnostics.
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// # Arguments
    /// * `force_path_style` - Use path-style URLs (`endpoint/bucket/key`) instead of
    ///   virtual-hosted style (`bucket.endpoint/key`). Required for MinIO and some
    ///   S3-compatible services.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "auto".to_string());
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "bucketgames");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            s3_config_builder = s3_config_builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region.clone()));
        }

        let normalized_endpoint = endpoint.as_deref().map(normalize_endpoint);

        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);

            // Plain HTTP endpoints (local MinIO) get an HTTP-only client so
            // initialization does not depend on native trust roots.
            if endpoint_url.starts_with("http://") {
                s3_config_builder =
                    s3_config_builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        let stored_endpoint = match &normalized_endpoint {
            Some(url) => url.clone(),
            None => format!("s3.{resolved_region}.amazonaws.com"),
        };

        let normalized_prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalized_prefix,
            endpoint: stored_endpoint,
            region: resolved_region,
        })
    }

    /// Get the full object key for a key (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Strip the configured prefix from a full object key.
    fn strip_prefix(&self, full_key: &str) -> String {
        match &self.prefix {
            Some(prefix) => {
                let prefix_with_slash = format!("{prefix}/");
                full_key
                    .strip_prefix(&prefix_with_slash)
                    .unwrap_or(full_key)
                    .to_string()
            }
            None => full_key.to_string(),
        }
    }

    async fn put_single(
        &self,
        full_key: &str,
        key: &str,
        body: ByteStream,
        options: &PutOptions,
    ) -> StorageResult<Option<String>> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(full_key)
            .set_content_type(options.content_type.clone())
            .set_metadata(metadata_map(options))
            .body(body);

        request = match &options.condition {
            Some(PutCondition::IfAbsent) => request.if_none_match("*"),
            Some(PutCondition::IfMatch(etag)) => request.if_match(etag),
            None => request,
        };

        let output = request
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, key))?;
        Ok(output.e_tag().map(str::to_string))
    }

    /// Upload a large file in parts read from disk, aborting the upload on
    /// any failure.
    async fn put_multipart(
        &self,
        full_key: &str,
        key: &str,
        path: &Path,
        len: u64,
        options: &PutOptions,
    ) -> StorageResult<Option<String>> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(full_key)
            .set_content_type(options.content_type.clone())
            .set_metadata(metadata_map(options))
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, key))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        let result = self
            .upload_parts(full_key, key, &upload_id, path, len)
            .await;

        match result {
            Ok(parts) => {
                let completed = self
                    .client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(full_key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error(e, key))?;
                Ok(completed.e_tag().map(str::to_string))
            }
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(full_key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!(
                        key = %key,
                        upload_id = %upload_id,
                        error = %DisplayErrorContext(&abort_err),
                        "Failed to abort multipart upload, orphaned parts may remain"
                    );
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        full_key: &str,
        key: &str,
        upload_id: &str,
        path: &Path,
        len: u64,
    ) -> StorageResult<Vec<CompletedPart>> {
        let part_size = MIN_PART_SIZE.max(len.div_ceil(MAX_PARTS));
        let mut file = tokio::fs::File::open(path).await?;
        let mut parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1i32;

        while offset < len {
            let this_part = part_size.min(len - offset);
            let mut buf = Vec::with_capacity(this_part as usize);
            (&mut file).take(this_part).read_to_end(&mut buf).await?;
            if buf.len() as u64 != this_part {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{} changed size during upload", path.display()),
                )));
            }

            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(full_key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(Bytes::from(buf).into())
                .send()
                .await
                .map_err(|e| classify_sdk_error(e, key))?;

            parts.push(
                CompletedPart::builder()
                    .e_tag(output.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );
            offset += this_part;
            part_number += 1;
        }

        Ok(parts)
    }
}

/// Handle bare host:port endpoints (e.g. "minio:9000") by prepending http://.
fn normalize_endpoint(endpoint_url: &str) -> String {
    let endpoint_lower = endpoint_url.to_ascii_lowercase();
    if endpoint_lower.starts_with("http://") || endpoint_lower.starts_with("https://") {
        endpoint_url.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", endpoint_url.trim_end_matches('/'))
    }
}

fn metadata_map(options: &PutOptions) -> Option<HashMap<String, String>> {
    if options.metadata.is_empty() {
        None
    } else {
        Some(
            options
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        let full_prefix = match &self.prefix {
            Some(p) => format!("{p}/{prefix}"),
            None => prefix.to_string(),
        };
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error(e, prefix))?;

            for obj in output.contents() {
                if let Some(obj_key) = obj.key() {
                    results.push(ObjectEntry {
                        key: self.strip_prefix(obj_key),
                        size: obj.size().unwrap_or(0).max(0) as u64,
                        etag: obj.e_tag().map(|s| s.to_string()),
                    });
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(|s| s.to_string());
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        tracing::debug!(count = results.len(), "Listed objects");
        Ok(results)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, key))?;

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            etag: output.e_tag().map(|s| s.to_string()),
            content_type: output.content_type().map(|s| s.to_string()),
            metadata: output
                .metadata()
                .map(|m| {
                    m.iter()
                        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, key))?;

        // A body cut off mid-transfer is worth retrying.
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transient(format!("reading {key}: {e}")))?
            .into_bytes();

        Ok(bytes)
    }

    #[instrument(skip(self, body, options), fields(backend = "s3"))]
    async fn put(
        &self,
        key: &str,
        body: PutBody,
        options: &PutOptions,
    ) -> StorageResult<Option<String>> {
        let full_key = self.full_key(key);
        match body {
            PutBody::Bytes(data) => self.put_single(&full_key, key, data.into(), options).await,
            PutBody::File(path) => {
                let len = tokio::fs::metadata(&path).await?.len();
                if len >= MULTIPART_THRESHOLD && options.condition.is_none() {
                    tracing::debug!(key = %key, size = len, "Using multipart upload");
                    return self
                        .put_multipart(&full_key, key, &path, len, options)
                        .await;
                }
                let stream = ByteStream::from_path(&path)
                    .await
                    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
                self.put_single(&full_key, key, stream, options).await
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // DeleteObject succeeds for missing keys.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, key))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            custom_metadata: true,
            conditional_put: true,
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

        let check = async {
            self.client
                .head_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(|e| match classify_sdk_error(e, &self.bucket) {
                    // HeadBucket has no body, so a missing bucket is a bare 404.
                    StorageError::NotFound(bucket) => StorageError::BucketNotFound(bucket),
                    other => other,
                })?;
            Ok(())
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, check)
            .await
            .map_err(|_| {
                StorageError::Transient("S3 health check timed out after 10 seconds".to_string())
            })?
    }
}
