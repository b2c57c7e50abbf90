//! Opening an image archive and choosing an image from its manifest.

use crate::component::ComponentReader;
use crate::error::{ErrorKind, Result};
use crate::locate::{ArchiveComponent, ComponentLocator};
use crate::manifest::{MANIFEST_FILE, ManifestItem, parse_manifest};
use crate::options::ArchiveOptions;
use crate::reference::ImageReference;
use exn::{OptionExt, ResultExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tarn_remote::{ObjectAddress, RemoteFile, StoreHandle};
use tracing::instrument;

/// Run blocking archive work off the async executor.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.or_raise(|| ErrorKind::Task)?
}

/// An image archive (`docker save` layout) in a remote object store.
///
/// The manifest is read and parsed once, when the archive is opened, and
/// never changes afterwards. Members are located on demand; every lookup and
/// every [`ComponentReader`] works on its own cursor over one shared block
/// cache, so an `ArchiveReader` can be shared between threads freely.
pub struct ArchiveReader {
    address: ObjectAddress,
    locator: RwLock<Option<Arc<ComponentLocator>>>,
    manifest: Vec<ManifestItem>,
    config_limit: u64,
}

impl ArchiveReader {
    /// Open the archive at `address` and load its manifest.
    ///
    /// Fails with [`NotFound`](ErrorKind::NotFound) when the object or its
    /// `manifest.json` is missing, and with
    /// [`SizeLimitExceeded`](ErrorKind::SizeLimitExceeded) when the manifest
    /// is larger than `options.manifest_limit`.
    #[instrument(skip_all, fields(store = store.name(), address = %address))]
    pub async fn open(store: StoreHandle, address: &ObjectAddress, options: ArchiveOptions) -> Result<Self> {
        let file = RemoteFile::open(store, address, options.remote_options()).await.map_err(ErrorKind::remote)?;
        let reader = blocking(move || Self::from_file(file, &options)).await?;
        tracing::info!(bucket = %address.bucket, key = %address.key, images = reader.manifest.len(), "Opened image archive");
        Ok(reader)
    }

    /// Load the manifest through an already opened file. Blocks on the
    /// network.
    pub fn from_file(file: RemoteFile, options: &ArchiveOptions) -> Result<Self> {
        let address = file.address().clone();
        let locator = ComponentLocator::new(file);
        let bytes = locator.read(MANIFEST_FILE, options.manifest_limit)?;
        let manifest = parse_manifest(&bytes)?;
        Ok(Self {
            address,
            locator: RwLock::new(Some(Arc::new(locator))),
            manifest,
            config_limit: options.config_limit,
        })
    }

    pub fn address(&self) -> &ObjectAddress {
        &self.address
    }

    /// Every image in the archive, in manifest order.
    pub fn manifest_items(&self) -> &[ManifestItem] {
        &self.manifest
    }

    pub fn config_limit(&self) -> u64 {
        self.config_limit
    }

    /// Select one manifest item, by tag or by position.
    ///
    /// With a tag (given `latest` when it has none; digests are refused),
    /// items are searched in order and each item's `RepoTags` in order,
    /// comparing normalized references; the first match wins and its
    /// position within `RepoTags` is returned alongside the item. With an
    /// index, the item at that position is returned. With neither, the
    /// archive must hold exactly one image.
    pub fn choose(&self, tag: Option<&ImageReference>, index: Option<usize>) -> Result<(&ManifestItem, Option<usize>)> {
        match (tag, index) {
            (Some(tag), Some(index)) => {
                exn::bail!(ErrorKind::InvalidSelector(format!("cannot use both tag {tag} and source index @{index}")))
            },
            (Some(tag), None) => {
                let tag = tag.clone().with_default_tag();
                if tag.digest.is_some() {
                    exn::bail!(ErrorKind::InvalidSelector(format!("cannot select by digest reference {tag}")));
                }
                let wanted = tag.to_string();
                for (item_index, item) in self.manifest.iter().enumerate() {
                    for (tag_index, repo_tag) in item.repo_tags.iter().enumerate() {
                        let parsed = ImageReference::parse_normalized(repo_tag).map_err(|err| {
                            err.raise(ErrorKind::ParseError(format!(
                                "invalid tag {repo_tag:?} in {MANIFEST_FILE} item @{item_index}"
                            )))
                        })?;
                        if parsed.to_string() == wanted {
                            return Ok((item, Some(tag_index)));
                        }
                    }
                }
                exn::bail!(ErrorKind::NotFound(format!("tag {wanted}")))
            },
            (None, Some(index)) => match self.manifest.get(index) {
                Some(item) => Ok((item, None)),
                None => exn::bail!(ErrorKind::OutOfRange { index, count: self.manifest.len() }),
            },
            (None, None) => match self.manifest.as_slice() {
                [item] => Ok((item, None)),
                items => exn::bail!(ErrorKind::AmbiguousSelection(items.len())),
            },
        }
    }

    fn locator(&self) -> Result<Arc<ComponentLocator>> {
        self.locator.read().clone().ok_or_raise(|| ErrorKind::Closed)
    }

    /// Find the content range of a member. Blocks on the network.
    pub fn locate(&self, path: &str) -> Result<ArchiveComponent> {
        self.locator()?.locate(path)
    }

    /// Open a reader over a member's content. Blocks on the network.
    pub fn open_component(&self, path: &str) -> Result<ComponentReader> {
        self.locator()?.open(path)
    }

    /// Read a whole member of at most `limit` bytes. Blocks on the network.
    pub fn read_component(&self, path: &str, limit: u64) -> Result<Vec<u8>> {
        self.locator()?.read(path, limit)
    }

    /// Release the archive. Readers already handed out keep working; new
    /// lookups fail with [`Closed`](ErrorKind::Closed). Closing twice is
    /// harmless.
    pub fn close(&self) {
        if self.locator.write().take().is_some() {
            tracing::debug!(address = %self.address, "Closed image archive");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.locator.read().is_none()
    }
}
