//! S3-compatible object store.
//!
//! Works against AWS S3 and S3-compatible services (MinIO, Backblaze B2,
//! Tigris, ...). Only `HeadObject` and ranged `GetObject` are used.
//!
//! # Credentials
//!
//! [`S3Store::new`] takes explicit credentials. Callers with their own
//! credential chain build a [`Client`] themselves and hand it to
//! [`S3Store::from_client`].

use crate::address::ObjectAddress;
use crate::error::{ErrorKind, Result};
use crate::store::{ObjectInfo, ObjectStore};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, ProvideErrorMetadata},
    primitives::DateTime,
};
use exn::ResultExt;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// In-flight request bound when none is configured.
pub const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

/// S3-compatible object store.
///
/// # Examples
///
/// ```no_run
/// use tarn_remote::store::S3Store;
///
/// let store = S3Store::new(
///     "images",
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com"),
///     "access_key_id",
///     "secret_access_key",
///     64,
/// );
/// ```
#[derive(Debug, Clone)]
pub struct S3Store {
    name: String,
    client: Client,
    /// One permit per in-flight request.
    rate_limiter: Arc<Semaphore>,
}

impl S3Store {
    /// Build a client for `region` with static credentials.
    ///
    /// `endpoint` points the client at a non-AWS service; addressing is
    /// always path-style. `name` only shows up in logs. At most
    /// `max_concurrent` requests are in flight at once.
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        max_concurrent: usize,
    ) -> Self {
        let credentials = Credentials::new(key_id, key_secret, None, None, "tarn-config");
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.into()))
            // Retries are the caller's business; a failed fetch surfaces as-is.
            .retry_config(RetryConfig::disabled())
            // Bucket names with dots and most self-hosted services need it.
            .force_path_style(true);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Self::from_client(name, Client::from_conf(builder.build())).with_max_concurrent(max_concurrent)
    }

    /// Wrap an already configured client.
    pub fn from_client(name: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            client,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        }
    }

    /// Bound the number of in-flight requests. Zero is treated as one.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.rate_limiter = Arc::new(Semaphore::new(max_concurrent.max(1)));
        self
    }

    /// Held for the whole request, body included.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter.clone().acquire_owned().await.or_raise(|| ErrorKind::Closed)
    }

    fn parse_datetime(dt: &DateTime) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos()).ok()
    }
}

/// Inclusive HTTP range header for `len` bytes starting at `start`.
fn range_header(start: u64, len: usize) -> Result<String> {
    let last = u64::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .and_then(|end| end.checked_sub(1))
        .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidOffset(start)))?;
    Ok(format!("bytes={start}-{last}"))
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self, address: &ObjectAddress) -> Result<ObjectInfo> {
        let _permit = self.acquire_permit().await?;
        let output = match self.client.head_object().bucket(&address.bucket).key(&address.key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                exn::bail!(ErrorKind::NotFound(address.to_string()));
            },
            Err(err) => exn::bail!(ErrorKind::Network(DisplayErrorContext(&err).to_string())),
        };
        let size = output
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| exn::Exn::from(ErrorKind::Network(format!("missing content length for {address}"))))?;
        tracing::debug!(store = %self.name, address = %address, size, "Probed object");
        Ok(ObjectInfo {
            address: address.clone(),
            size,
            last_modified: output.last_modified().and_then(Self::parse_datetime),
            e_tag: output.e_tag().map(str::to_string),
        })
    }

    async fn fetch_range(&self, address: &ObjectAddress, start: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let range = range_header(start, buf.len())?;
        let _permit = self.acquire_permit().await?;
        let request = self.client.get_object().bucket(&address.bucket).key(&address.key).range(&range);
        let mut body = match request.send().await {
            Ok(output) => output.body,
            Err(err) => match err.as_service_error() {
                Some(e) if e.is_no_such_key() => exn::bail!(ErrorKind::NotFound(address.to_string())),
                // Range starting at or past the end of the object.
                Some(e) if e.code() == Some("InvalidRange") => return Ok(0),
                _ => exn::bail!(ErrorKind::Network(DisplayErrorContext(&err).to_string())),
            },
        };

        let mut filled = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.or_raise(|| ErrorKind::Network(format!("reading body of {address} ({range})")))?;
            let take = chunk.len().min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&chunk[..take]);
            filled += take;
            if filled == buf.len() {
                break;
            }
        }
        tracing::trace!(address = %address, range, filled, "Fetched range");
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::get_object::{GetObjectError, GetObjectOutput};
    use aws_sdk_s3::operation::head_object::{HeadObjectError, HeadObjectOutput};
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::types::error::{NoSuchKey, NotFound};
    use aws_smithy_mocks::{mock, mock_client};
    use rstest::rstest;

    fn address() -> ObjectAddress {
        ObjectAddress::new("bucket", "image.tar")
    }

    #[rstest]
    #[case(0, 1, "bytes=0-0")]
    #[case(0, 512, "bytes=0-511")]
    #[case(8_388_608, 8_388_608, "bytes=8388608-16777215")]
    fn test_range_header(#[case] start: u64, #[case] len: usize, #[case] expected: &str) {
        assert_eq!(range_header(start, len).unwrap(), expected);
    }

    #[test]
    fn test_range_header_overflow() {
        let err = range_header(u64::MAX, 2).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidOffset(u64::MAX));
    }

    #[tokio::test]
    async fn test_probe() {
        let head = mock!(Client::head_object)
            .match_requests(|req| req.bucket() == Some("bucket") && req.key() == Some("image.tar"))
            .then_output(|| HeadObjectOutput::builder().content_length(2048).e_tag("\"abc\"").build());
        let store = S3Store::from_client("test", mock_client!(aws_sdk_s3, [&head]));
        let info = store.probe(&address()).await.unwrap();
        assert_eq!(info.size, 2048);
        assert_eq!(info.e_tag.as_deref(), Some("\"abc\""));
        assert_eq!(head.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_probe_not_found() {
        let head = mock!(Client::head_object)
            .then_error(|| HeadObjectError::NotFound(NotFound::builder().build()));
        let store = S3Store::from_client("test", mock_client!(aws_sdk_s3, [&head]));
        let err = store.probe(&address()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound("s3://bucket/image.tar".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_range() {
        let get = mock!(Client::get_object)
            .match_requests(|req| req.range() == Some("bytes=4-11"))
            .then_output(|| GetObjectOutput::builder().body(ByteStream::from_static(b"abcdefgh")).build());
        let store = S3Store::from_client("test", mock_client!(aws_sdk_s3, [&get]));
        let mut buf = [0; 8];
        assert_eq!(store.fetch_range(&address(), 4, &mut buf).await.unwrap(), 8);
        assert_eq!(&buf, b"abcdefgh");
    }

    #[tokio::test]
    async fn test_fetch_range_short_body() {
        let get = mock!(Client::get_object)
            .then_output(|| GetObjectOutput::builder().body(ByteStream::from_static(b"xyz")).build());
        let store = S3Store::from_client("test", mock_client!(aws_sdk_s3, [&get]));
        let mut buf = [0; 8];
        assert_eq!(store.fetch_range(&address(), 0, &mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..3], b"xyz");
    }

    #[tokio::test]
    async fn test_fetch_range_missing_key() {
        let get = mock!(Client::get_object)
            .then_error(|| GetObjectError::NoSuchKey(NoSuchKey::builder().build()));
        let store = S3Store::from_client("test", mock_client!(aws_sdk_s3, [&get]));
        let mut buf = [0; 8];
        let err = store.fetch_range(&address(), 0, &mut buf).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_empty_buffer_skips_request() {
        let get = mock!(Client::get_object)
            .then_output(|| GetObjectOutput::builder().body(ByteStream::from_static(b"x")).build());
        let store = S3Store::from_client("test", mock_client!(aws_sdk_s3, [&get]));
        assert_eq!(store.fetch_range(&address(), 0, &mut []).await.unwrap(), 0);
        assert_eq!(get.num_calls(), 0);
    }
}
