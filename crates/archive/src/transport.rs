//! The `s3` image transport: archive references, and opening the image they
//! name as a source for an image copy.

use crate::component::ComponentReader;
use crate::error::{ErrorKind, Result};
use crate::locate::ArchiveComponent;
use crate::manifest::ManifestItem;
use crate::options::ArchiveOptions;
use crate::reader::{ArchiveReader, blocking};
use crate::reference::ImageReference;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tarn_config::Config;
use tarn_remote::address::SCHEME;
use tarn_remote::store::S3Store;
use tarn_remote::{ObjectAddress, StoreHandle};

pub const TRANSPORT_NAME: &str = "s3";

/// An image inside an archive object: `s3://bucket/key[:tag|:@index]`.
///
/// Without a selector the archive must contain exactly one image.
///
/// # Examples
///
/// ```
/// use tarn_archive::ArchiveReference;
///
/// let reference = ArchiveReference::parse("s3://images/app.tar:app:v2").unwrap();
/// assert_eq!(reference.address.key, "app.tar");
/// assert_eq!(reference.to_string(), "s3://images/app.tar:docker.io/library/app:v2");
///
/// let reference = ArchiveReference::parse("//images/app.tar:@1").unwrap();
/// assert_eq!(reference.source_index, Some(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReference {
    pub address: ObjectAddress,
    /// Normalized tag to select; always carries a tag, never a digest.
    pub tag: Option<ImageReference>,
    /// Zero-based position of the image in the archive manifest.
    pub source_index: Option<usize>,
}

impl ArchiveReference {
    /// Parse `s3://bucket/key[:selector]`, or the same without the `s3:`
    /// prefix (`//bucket/key[:selector]`).
    ///
    /// The selector is `@N` for a position, or an image reference for a tag
    /// (`busybox` means `docker.io/library/busybox:latest`). Digest
    /// references are not supported.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            exn::bail!(ErrorKind::ParseError("archive reference cannot be empty".to_string()));
        }
        let within = input.strip_prefix("s3:").unwrap_or(input);
        let (location, selector) = match within.split_once(':') {
            Some((location, selector)) => (location, Some(selector)),
            None => (within, None),
        };
        let Some(location) = location.strip_prefix("//") else {
            exn::bail!(ErrorKind::ParseError(format!("archive reference must begin with {SCHEME}: {input}")));
        };
        let address = ObjectAddress::from_location(location).map_err(ErrorKind::remote)?;

        let (tag, source_index) = match selector {
            None => (None, None),
            Some(selector) => match selector.strip_prefix('@') {
                Some(index) => {
                    let index = index.parse::<usize>().map_err(|_| {
                        exn::Exn::from(ErrorKind::InvalidSelector(format!(
                            "invalid source index @{index}: must be a non-negative integer"
                        )))
                    })?;
                    (None, Some(index))
                },
                None => {
                    let tag = ImageReference::parse_normalized(selector)?.with_default_tag();
                    if tag.digest.is_some() {
                        exn::bail!(ErrorKind::Unsupported(format!("digest references: {tag}")));
                    }
                    (Some(tag), None)
                },
            },
        };
        Ok(Self { address, tag, source_index })
    }
}

impl fmt::Display for ArchiveReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        match (&self.tag, self.source_index) {
            (Some(tag), _) => write!(f, ":{tag}"),
            (None, Some(index)) => write!(f, ":@{index}"),
            (None, None) => Ok(()),
        }
    }
}

/// A source of images for an image copy.
///
/// The copy engine is handed a transport explicitly; nothing is registered
/// globally.
#[async_trait]
pub trait ImageTransport: Send + Sync {
    fn name(&self) -> &str;

    fn parse_reference(&self, reference: &str) -> Result<ArchiveReference>;

    /// Open the archive and select the referenced image.
    async fn open_image(&self, reference: &ArchiveReference) -> Result<ArchiveImage>;

    /// Check whether `reference` can be written to.
    fn ensure_writable(&self, _reference: &ArchiveReference) -> Result<()> {
        exn::bail!(ErrorKind::Unsupported(format!("{} locations can only be read from", self.name())))
    }
}

/// Image archives in S3-compatible object stores.
pub struct ArchiveTransport {
    store: StoreHandle,
    options: ArchiveOptions,
}

impl ArchiveTransport {
    pub fn new(store: StoreHandle, options: ArchiveOptions) -> Self {
        Self { store, options }
    }

    /// Build the transport and its S3 client from configuration. Fails with
    /// [`Unsupported`](ErrorKind::Unsupported) without an `[s3]` section.
    pub fn from_config(config: &Config) -> Result<Self> {
        let Some(s3) = &config.s3 else {
            exn::bail!(ErrorKind::Unsupported("no [s3] store configured".to_string()));
        };
        let store = S3Store::new(
            TRANSPORT_NAME,
            &s3.region,
            s3.endpoint.as_deref(),
            &s3.key_id,
            &s3.key_secret,
            config.fetch.max_concurrent_requests,
        );
        Ok(Self::new(Arc::new(store), ArchiveOptions::from(config)))
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }
}

#[async_trait]
impl ImageTransport for ArchiveTransport {
    fn name(&self) -> &str {
        TRANSPORT_NAME
    }

    fn parse_reference(&self, reference: &str) -> Result<ArchiveReference> {
        ArchiveReference::parse(reference)
    }

    async fn open_image(&self, reference: &ArchiveReference) -> Result<ArchiveImage> {
        let reader = ArchiveReader::open(self.store.clone(), &reference.address, self.options.clone()).await?;
        ArchiveImage::new(reference.clone(), Arc::new(reader))
    }
}

/// One image selected from an archive.
///
/// Layers and the config blob are located and read on demand; opening the
/// image only reads the manifest.
pub struct ArchiveImage {
    reference: ArchiveReference,
    reader: Arc<ArchiveReader>,
    item: ManifestItem,
    tag_index: Option<usize>,
}

impl ArchiveImage {
    /// Select the image `reference` names from an open archive.
    pub fn new(reference: ArchiveReference, reader: Arc<ArchiveReader>) -> Result<Self> {
        let (item, tag_index) = reader.choose(reference.tag.as_ref(), reference.source_index)?;
        let item = item.clone();
        tracing::debug!(reference = %reference, layers = item.layers.len(), "Selected image");
        Ok(Self { reference, reader, item, tag_index })
    }

    pub fn reference(&self) -> &ArchiveReference {
        &self.reference
    }

    pub fn reader(&self) -> &Arc<ArchiveReader> {
        &self.reader
    }

    pub fn manifest_item(&self) -> &ManifestItem {
        &self.item
    }

    /// The `RepoTags` entry that matched a tag selector, as written in the
    /// archive.
    pub fn matched_tag(&self) -> Option<&str> {
        self.tag_index.and_then(|index| self.item.repo_tags.get(index)).map(String::as_str)
    }

    /// Read the image config blob, bounded by the archive's config limit.
    pub async fn config_blob(&self) -> Result<Vec<u8>> {
        let reader = self.reader.clone();
        let path = self.item.config.clone();
        blocking(move || reader.read_component(&path, reader.config_limit())).await
    }

    /// Locate every layer, base layer first. Layer bodies are not read.
    pub async fn layers(&self) -> Result<Vec<ArchiveComponent>> {
        let reader = self.reader.clone();
        let layers = self.item.layers.clone();
        blocking(move || layers.iter().map(|layer| reader.locate(layer)).collect()).await
    }

    /// Open a reader over layer `index` (base layer is `0`).
    pub async fn open_layer(&self, index: usize) -> Result<ComponentReader> {
        let Some(layer) = self.item.layers.get(index).cloned() else {
            exn::bail!(ErrorKind::OutOfRange { index, count: self.item.layers.len() });
        };
        let reader = self.reader.clone();
        blocking(move || reader.open_component(&layer)).await
    }

    /// Close the underlying archive.
    pub fn close(&self) {
        self.reader.close();
    }
}
