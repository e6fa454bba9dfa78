use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::types::{
    ChecksumAlgorithm as SdkChecksumAlgorithm, CompletedMultipartUpload, CompletedPart,
};
use bytes::Bytes;
use chunkup_multipart::{ObjectStorage, StorageError, StorageFuture};
use chunkup_protocol::{ChecksumAlgorithm, ObjectDescriptor, ObjectTarget, PartAck, UploadSession};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, instrument};

use crate::S3ConfigError;
use crate::errors::{is_missing_upload, map_sdk_error};

const DEFAULT_REGION: &str = "us-east-1";

/// Default cap on concurrent S3 requests.
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Explicit access keys. Without them the ambient AWS chain is used
/// (environment, profile, instance metadata).
#[derive(Clone)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How to reach the S3 service.
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Defaults to `us-east-1`.
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services. A bare `host:port` gets
    /// an `http://` scheme.
    pub endpoint: Option<String>,
    /// Address buckets as `endpoint/bucket/key`. Needed by most
    /// S3-compatible services.
    pub force_path_style: bool,
    pub credentials: Option<StaticCredentials>,
    /// Maximum concurrent requests issued by this storage.
    pub max_connections: usize,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            force_path_style: false,
            credentials: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// S3 multipart upload backend.
pub struct S3Storage {
    client: Client,
    region: String,
    endpoint: Option<String>,
    connections: Semaphore,
}

impl std::fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Storage")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("available_connections", &self.connections.available_permits())
            .finish_non_exhaustive()
    }
}

impl S3Storage {
    /// Builds a client from `settings`.
    ///
    /// With explicit credentials nothing is resolved from the environment.
    pub async fn connect(settings: S3Settings) -> Result<Self, S3ConfigError> {
        if settings.max_connections == 0 {
            return Err(S3ConfigError::Invalid(
                "max_connections must be at least 1".into(),
            ));
        }

        let region = settings
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint = settings.endpoint.as_deref().map(normalize_endpoint);

        let mut builder = match settings.credentials {
            Some(creds) => {
                if creds.access_key_id.is_empty() || creds.secret_access_key.is_empty() {
                    return Err(S3ConfigError::Invalid(
                        "access key id and secret access key must both be set".into(),
                    ));
                }
                let credentials = aws_sdk_s3::config::Credentials::new(
                    creds.access_key_id,
                    creds.secret_access_key,
                    creds.session_token,
                    None,
                    "chunkup-config",
                );
                aws_sdk_s3::config::Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(aws_config::Region::new(region.clone()))
                    .credentials_provider(credentials)
            }
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(aws_config::Region::new(region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        if let Some(url) = &endpoint {
            builder = builder.endpoint_url(url);
        }
        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        debug!(
            region = %region,
            endpoint = endpoint.as_deref().unwrap_or("aws"),
            path_style = settings.force_path_style,
            max_connections = settings.max_connections,
            "S3 client configured"
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
            region,
            endpoint,
            connections: Semaphore::new(settings.max_connections),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    async fn connection(&self) -> Result<SemaphorePermit<'_>, StorageError> {
        self.connections
            .acquire()
            .await
            .map_err(|_| StorageError::Transport("connection limiter closed".into()))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn create(
        &self,
        target: &ObjectTarget,
        algorithm: ChecksumAlgorithm,
    ) -> Result<UploadSession, StorageError> {
        let _conn = self.connection().await?;
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .checksum_algorithm(sdk_algorithm(algorithm))
            .send()
            .await
            .map_err(|e| map_sdk_error("CreateMultipartUpload", e))?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| StorageError::Service("S3 did not return an upload id".into()))?
            .to_string();

        Ok(UploadSession {
            upload_id,
            target: target.clone(),
            checksum_algorithm: algorithm,
        })
    }

    #[instrument(skip(self, session, payload, checksum), fields(backend = "s3", upload_id = %session.upload_id))]
    async fn put_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        payload: Bytes,
        checksum: Option<&str>,
    ) -> Result<PartAck, StorageError> {
        let number = sdk_part_number(part_number)?;
        let _conn = self.connection().await?;

        let mut request = self
            .client
            .upload_part()
            .bucket(&session.target.bucket)
            .key(&session.target.key)
            .upload_id(&session.upload_id)
            .part_number(number)
            .content_length(payload.len() as i64)
            .body(payload.into());
        if let Some(checksum) = checksum {
            request = match session.checksum_algorithm {
                ChecksumAlgorithm::Sha256 => request.checksum_sha256(checksum),
                ChecksumAlgorithm::Crc32 => request.checksum_crc32(checksum),
            };
        }

        let output = request
            .send()
            .await
            .map_err(|e| map_sdk_error("UploadPart", e))?;

        let e_tag = output
            .e_tag()
            .ok_or_else(|| StorageError::Service(format!("S3 returned no ETag for part {part_number}")))?
            .to_string();
        let echoed = match session.checksum_algorithm {
            ChecksumAlgorithm::Sha256 => output.checksum_sha256(),
            ChecksumAlgorithm::Crc32 => output.checksum_crc32(),
        };

        Ok(PartAck {
            part_number,
            e_tag,
            checksum: echoed.or(checksum).map(str::to_string),
        })
    }

    #[instrument(skip(self, session, parts), fields(backend = "s3", upload_id = %session.upload_id, parts = parts.len()))]
    async fn complete(
        &self,
        session: &UploadSession,
        parts: &[PartAck],
    ) -> Result<ObjectDescriptor, StorageError> {
        let completed = parts
            .iter()
            .map(|ack| completed_part(session.checksum_algorithm, ack))
            .collect::<Result<Vec<_>, _>>()?;
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();

        let _conn = self.connection().await?;
        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&session.target.bucket)
            .key(&session.target.key)
            .upload_id(&session.upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| map_sdk_error("CompleteMultipartUpload", e))?;

        let checksum = match session.checksum_algorithm {
            ChecksumAlgorithm::Sha256 => output.checksum_sha256(),
            ChecksumAlgorithm::Crc32 => output.checksum_crc32(),
        };
        Ok(ObjectDescriptor {
            target: session.target.clone(),
            location: output.location().map(str::to_string),
            e_tag: output.e_tag().map(str::to_string),
            checksum: checksum.map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    #[instrument(skip(self, session), fields(backend = "s3", upload_id = %session.upload_id))]
    async fn release(&self, session: &UploadSession) -> Result<(), StorageError> {
        let _conn = self.connection().await?;
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&session.target.bucket)
            .key(&session.target.key)
            .upload_id(&session.upload_id)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = map_sdk_error("AbortMultipartUpload", e);
                if is_missing_upload(&err) {
                    debug!(upload_id = %session.upload_id, "upload already gone, nothing to abort");
                    return Ok(());
                }
                Err(err)
            }
        }
    }
}

impl ObjectStorage for S3Storage {
    fn begin_session<'a>(
        &'a self,
        target: &'a ObjectTarget,
        algorithm: ChecksumAlgorithm,
    ) -> StorageFuture<'a, UploadSession> {
        Box::pin(self.create(target, algorithm))
    }

    fn upload_part<'a>(
        &'a self,
        session: &'a UploadSession,
        part_number: u32,
        payload: Bytes,
        checksum: Option<&'a str>,
    ) -> StorageFuture<'a, PartAck> {
        Box::pin(self.put_part(session, part_number, payload, checksum))
    }

    fn finalize_session<'a>(
        &'a self,
        session: &'a UploadSession,
        parts: &'a [PartAck],
    ) -> StorageFuture<'a, ObjectDescriptor> {
        Box::pin(self.complete(session, parts))
    }

    fn abort_session<'a>(&'a self, session: &'a UploadSession) -> StorageFuture<'a, ()> {
        Box::pin(self.release(session))
    }
}

fn sdk_algorithm(algorithm: ChecksumAlgorithm) -> SdkChecksumAlgorithm {
    match algorithm {
        ChecksumAlgorithm::Sha256 => SdkChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Crc32 => SdkChecksumAlgorithm::Crc32,
    }
}

/// S3 part numbers are `i32` on the wire.
fn sdk_part_number(part_number: u32) -> Result<i32, StorageError> {
    i32::try_from(part_number)
        .map_err(|_| StorageError::Rejected(format!("part number {part_number} out of range")))
}

fn completed_part(algorithm: ChecksumAlgorithm, ack: &PartAck) -> Result<CompletedPart, StorageError> {
    let builder = CompletedPart::builder()
        .e_tag(&ack.e_tag)
        .part_number(sdk_part_number(ack.part_number)?);
    let builder = match algorithm {
        ChecksumAlgorithm::Sha256 => builder.set_checksum_sha256(ack.checksum.clone()),
        ChecksumAlgorithm::Crc32 => builder.set_checksum_crc32(ack.checksum.clone()),
    };
    Ok(builder.build())
}

/// Prepends `http://` to bare `host:port` endpoints (e.g. `minio:9000`).
fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explicit() -> StaticCredentials {
        StaticCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI".into(),
            session_token: None,
        }
    }

    #[test]
    fn endpoint_normalization() {
        assert_eq!(normalize_endpoint("minio:9000"), "http://minio:9000");
        assert_eq!(normalize_endpoint("https://s3.example.com/"), "https://s3.example.com");
        assert_eq!(normalize_endpoint("HTTP://Local:9000"), "HTTP://Local:9000");
    }

    #[test]
    fn part_number_range() {
        assert_eq!(sdk_part_number(1).unwrap(), 1);
        assert_eq!(sdk_part_number(10_000).unwrap(), 10_000);
        assert!(matches!(
            sdk_part_number(u32::MAX),
            Err(StorageError::Rejected(_))
        ));
    }

    #[test]
    fn completed_part_carries_checksum_in_session_algorithm() {
        let ack = PartAck {
            part_number: 3,
            e_tag: "\"abc\"".into(),
            checksum: Some("c2hhMjU2".into()),
        };
        let part = completed_part(ChecksumAlgorithm::Sha256, &ack).unwrap();
        assert_eq!(part.part_number(), Some(3));
        assert_eq!(part.e_tag(), Some("\"abc\""));
        assert_eq!(part.checksum_sha256(), Some("c2hhMjU2"));
        assert_eq!(part.checksum_crc32(), None);

        let part = completed_part(ChecksumAlgorithm::Crc32, &ack).unwrap();
        assert_eq!(part.checksum_crc32(), Some("c2hhMjU2"));
        assert_eq!(part.checksum_sha256(), None);
    }

    #[test]
    fn sdk_algorithm_mapping() {
        assert_eq!(sdk_algorithm(ChecksumAlgorithm::Sha256), SdkChecksumAlgorithm::Sha256);
        assert_eq!(sdk_algorithm(ChecksumAlgorithm::Crc32), SdkChecksumAlgorithm::Crc32);
    }

    #[tokio::test]
    async fn zero_connections_rejected() {
        let settings = S3Settings {
            max_connections: 0,
            credentials: Some(explicit()),
            ..S3Settings::default()
        };
        assert!(matches!(
            S3Storage::connect(settings).await,
            Err(S3ConfigError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn empty_secret_rejected() {
        let mut creds = explicit();
        creds.secret_access_key.clear();
        let settings = S3Settings {
            credentials: Some(creds),
            ..S3Settings::default()
        };
        assert!(S3Storage::connect(settings).await.is_err());
    }

    #[tokio::test]
    async fn explicit_credentials_with_custom_endpoint() {
        let settings = S3Settings {
            region: Some("eu-west-1".into()),
            endpoint: Some("localhost:9000".into()),
            force_path_style: true,
            credentials: Some(explicit()),
            max_connections: 4,
        };
        let storage = S3Storage::connect(settings).await.unwrap();
        assert_eq!(storage.region(), "eu-west-1");
        assert_eq!(storage.endpoint(), Some("http://localhost:9000"));
        assert_eq!(storage.connections.available_permits(), 4);
    }

    #[tokio::test]
    async fn region_defaults_when_unset() {
        let settings = S3Settings {
            region: Some(String::new()),
            credentials: Some(explicit()),
            ..S3Settings::default()
        };
        let storage = S3Storage::connect(settings).await.unwrap();
        assert_eq!(storage.region(), "us-east-1");
        assert_eq!(storage.endpoint(), None);
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let rendered = format!("{:?}", explicit());
        assert!(rendered.contains("AKIDEXAMPLE"));
        assert!(!rendered.contains("wJalrXUtnFEMI"));
    }
}
