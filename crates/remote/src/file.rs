//! Random-access, block-cached reader over one remote object.

use crate::address::ObjectAddress;
use crate::cache::{BlockCache, CacheStats, DEFAULT_BLOCK_COUNT, DEFAULT_BLOCK_SIZE};
use crate::error::{self, ErrorKind, Result};
use crate::StoreHandle;
use crate::store::ObjectInfo;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const DEFAULT_BLOCK: NonZeroUsize = NonZeroUsize::new(DEFAULT_BLOCK_SIZE).unwrap();
const DEFAULT_COUNT: NonZeroUsize = NonZeroUsize::new(DEFAULT_BLOCK_COUNT).unwrap();

/// Tuning for a [`RemoteFile`].
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub block_size: NonZeroUsize,
    pub block_count: NonZeroUsize,
    /// Deadline for each block fetch. `None` waits indefinitely.
    pub fetch_timeout: Option<Duration>,
    /// Cancelling this token fails in-flight and future fetches with
    /// [`Cancelled`](ErrorKind::Cancelled).
    pub cancel: CancellationToken,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK,
            block_count: DEFAULT_COUNT,
            fetch_timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// State shared by every cursor forked from the same open.
struct Shared {
    store: StoreHandle,
    info: ObjectInfo,
    cache: BlockCache,
    runtime: Handle,
    fetch_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Shared {
    /// Fill `block` with block `bid` of the object.
    ///
    /// Only the part of the block inside the object is written; the tail
    /// block's remainder keeps whatever the recycled buffer held, which no
    /// reader can reach because reads are clamped to the object size.
    fn fetch_block(&self, bid: u64, block: &mut [u8]) -> Result<()> {
        let start = bid * block.len() as u64;
        let want = self.info.size.saturating_sub(start).min(block.len() as u64) as usize;
        if self.cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let fetch = self.store.fetch_range(&self.info.address, start, &mut block[..want]);
        let fetch = async {
            match self.fetch_timeout {
                Some(deadline) => tokio::time::timeout(deadline, fetch)
                    .await
                    .unwrap_or_else(|_| Err(exn::Exn::from(ErrorKind::DeadlineExceeded))),
                None => fetch.await,
            }
        };
        let filled = self.runtime.block_on(async {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(exn::Exn::from(ErrorKind::Cancelled)),
                filled = fetch => filled,
            }
        })?;
        if filled < want {
            tracing::warn!(address = %self.info.address, block = bid, filled, want, "Short read from store");
            exn::bail!(ErrorKind::Network(format!(
                "truncated response for {} block {bid}: got {filled} of {want} bytes",
                self.info.address
            )));
        }
        Ok(())
    }
}

/// Seekable reader over a remote object, backed by a shared [`BlockCache`].
///
/// Reads go through the cache; misses are fetched from the store one block
/// at a time by blocking on the runtime the file was opened from. All I/O on
/// a `RemoteFile` is therefore blocking and belongs on a blocking thread
/// (`tokio::task::spawn_blocking`), never directly on an async task.
///
/// Each value is one cursor. [`fork`](Self::fork) makes another cursor over
/// the same object sharing the store client and the cache, so readers of
/// different parts of an archive never fetch the same block twice while it
/// stays cached.
pub struct RemoteFile {
    shared: Arc<Shared>,
    position: u64,
}

impl RemoteFile {
    /// Probe `address` and open a cursor at offset 0.
    ///
    /// Must be called from within a tokio runtime; that runtime is used for
    /// every subsequent fetch. Fails with [`NotFound`](ErrorKind::NotFound)
    /// when the object does not exist.
    #[instrument(level = "debug", skip(store, options), fields(store = store.name()))]
    pub async fn open(store: StoreHandle, address: &ObjectAddress, options: RemoteOptions) -> Result<Self> {
        let info = store.probe(address).await?;
        tracing::debug!(bucket = %address.bucket, key = %address.key, size = info.size, "Opened remote object");
        Ok(Self::from_info(store, info, options, Handle::current()))
    }

    /// Open a cursor over an object whose metadata is already known.
    pub fn from_info(store: StoreHandle, info: ObjectInfo, options: RemoteOptions, runtime: Handle) -> Self {
        let shared = Shared {
            store,
            info,
            cache: BlockCache::with_block_size(options.block_count, options.block_size),
            runtime,
            fetch_timeout: options.fetch_timeout,
            cancel: options.cancel,
        };
        Self { shared: Arc::new(shared), position: 0 }
    }

    /// A new cursor over the same object, positioned at offset 0.
    pub fn fork(&self) -> Self {
        Self { shared: Arc::clone(&self.shared), position: 0 }
    }

    pub fn address(&self) -> &ObjectAddress {
        &self.shared.info.address
    }

    pub fn info(&self) -> &ObjectInfo {
        &self.shared.info
    }

    /// Object size in bytes, as probed at open.
    pub fn size(&self) -> u64 {
        self.shared.info.size
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes between the cursor and the end of the object.
    pub fn len_remaining(&self) -> u64 {
        self.size().saturating_sub(self.position)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.stats()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    /// Read up to `buf.len()` bytes starting at `offset`, without touching the
    /// cursor.
    ///
    /// Returns the number of bytes read: fewer than requested only when the
    /// object ends first, and `0` at or past the end of the object.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() || offset >= self.size() {
            return Ok(0);
        }
        let end = offset.saturating_add(buf.len() as u64).min(self.size());
        let len = (end - offset) as usize;
        let shared = &*self.shared;
        shared.cache.read_into(offset, end, &mut buf[..len], |bid, block| shared.fetch_block(bid, block))?;
        Ok(len)
    }
}

impl Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.read_at(buf, self.position).map_err(error::into_io)?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for RemoteFile {
    /// Seeking past the end is allowed; reads there return `0`.
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::End(delta) => i128::from(self.size()) + i128::from(delta),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
        };
        let position = u64::try_from(target)
            .map_err(|_| error::into_io(exn::Exn::from(ErrorKind::InvalidPosition(target))))?;
        self.position = position;
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockStore;
    use std::io::ErrorKind as IoErrorKind;

    const BLOCK: usize = 4;

    fn options() -> RemoteOptions {
        RemoteOptions {
            block_size: NonZeroUsize::new(BLOCK).unwrap(),
            block_count: NonZeroUsize::new(2).unwrap(),
            ..RemoteOptions::default()
        }
    }

    fn address() -> ObjectAddress {
        ObjectAddress::new("bucket", "blob")
    }

    async fn open(data: &'static [u8], options: RemoteOptions) -> (Arc<MockStore>, RemoteFile) {
        let store = Arc::new(MockStore::with_objects([("bucket/blob", data)]));
        let file = RemoteFile::open(store.clone(), &address(), options).await.unwrap();
        (store, file)
    }

    async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        tokio::task::spawn_blocking(f).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_missing_object() {
        let store = Arc::new(MockStore::default());
        let err = RemoteFile::open(store, &address(), options()).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_read_to_end_fetches_each_block_once() {
        let (store, mut file) = open(b"0123456789", options()).await;
        let (file, contents) = blocking(move || {
            let mut contents = Vec::new();
            file.read_to_end(&mut contents).unwrap();
            (file, contents)
        })
        .await;
        assert_eq!(contents, b"0123456789");
        assert_eq!(file.position(), 10);
        assert_eq!(file.len_remaining(), 0);
        // Blocks [0,4), [4,8), [8,10)
        assert_eq!(store.fetch_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_read_at_clamps_to_size() {
        let (_store, file) = open(b"0123456789", options()).await;
        blocking(move || {
            let mut buf = [0; 16];
            assert_eq!(file.read_at(&mut buf, 8).unwrap(), 2);
            assert_eq!(&buf[..2], b"89");
            assert_eq!(file.read_at(&mut buf, 10).unwrap(), 0);
            assert_eq!(file.read_at(&mut buf, 1_000).unwrap(), 0);
            assert_eq!(file.read_at(&mut [], 3).unwrap(), 0);
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_read_near_u64_max_is_end_of_data() {
        let (store, mut file) = open(b"0123456789", options()).await;
        blocking(move || {
            let mut buf = [0; 16];
            assert_eq!(file.read_at(&mut buf, u64::MAX).unwrap(), 0);
            assert_eq!(file.read_at(&mut buf, u64::MAX - 4).unwrap(), 0);
            assert_eq!(file.seek(SeekFrom::Start(u64::MAX - 1)).unwrap(), u64::MAX - 1);
            assert_eq!(file.read(&mut buf).unwrap(), 0);
            assert_eq!(file.position(), u64::MAX - 1);
        })
        .await;
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_forks_share_cache() {
        let (store, file) = open(b"0123456789", options()).await;
        let mut fork = file.fork();
        blocking(move || {
            let mut buf = [0; 4];
            assert_eq!(file.read_at(&mut buf, 2).unwrap(), 4);
            assert_eq!(&buf, b"2345");
            fork.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"0123");
            assert_eq!(fork.cache_stats().hits, 1);
        })
        .await;
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_seek() {
        let (_store, mut file) = open(b"0123456789", options()).await;
        blocking(move || {
            assert_eq!(file.seek(SeekFrom::End(-3)).unwrap(), 7);
            let mut buf = [0; 3];
            file.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"789");
            assert_eq!(file.seek(SeekFrom::Current(-5)).unwrap(), 5);
            assert_eq!(file.seek(SeekFrom::Start(50)).unwrap(), 50);
            assert_eq!(file.read(&mut buf).unwrap(), 0);

            let err = file.seek(SeekFrom::Current(-51)).unwrap_err();
            assert_eq!(err.kind(), IoErrorKind::InvalidInput);
            assert_eq!(error::from_io(&err), Some(&ErrorKind::InvalidPosition(-1)));
            // A failed seek leaves the cursor where it was.
            assert_eq!(file.position(), 50);
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_fetch_can_be_retried() {
        let (store, file) = open(b"0123456789", options()).await;
        store.fail_next(1, ErrorKind::Network("connection reset".to_string()));
        blocking(move || {
            let mut buf = [0; 4];
            let err = file.read_at(&mut buf, 0).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Network(_)));
            assert_eq!(file.read_at(&mut buf, 0).unwrap(), 4);
            assert_eq!(&buf, b"0123");
        })
        .await;
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_truncated_response() {
        let (store, file) = open(b"0123456789", options()).await;
        // The object shrinks after it was probed.
        store.insert(address(), b"012345".to_vec()).await;
        let err = blocking(move || file.read_at(&mut [0; 4], 4).unwrap_err()).await;
        assert!(matches!(&*err, ErrorKind::Network(msg) if msg.contains("truncated")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_deadline() {
        let options = RemoteOptions { fetch_timeout: Some(Duration::from_millis(20)), ..options() };
        let (store, file) = open(b"0123456789", options).await;
        store.stall_fetches(Duration::from_secs(5));
        let (file, err) = blocking(move || {
            let err = file.read_at(&mut [0; 4], 0).unwrap_err();
            (file, err)
        })
        .await;
        assert_eq!(*err, ErrorKind::DeadlineExceeded);
        assert_eq!(file.cache_stats().misses, 1);
        assert!(file.shared.cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_in_flight() {
        let (store, file) = open(b"0123456789", options()).await;
        store.stall_fetches(Duration::from_secs(5));
        let cancel = file.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let (file, err) = blocking(move || {
            let err = file.read_at(&mut [0; 4], 0).unwrap_err();
            (file, err)
        })
        .await;
        assert_eq!(*err, ErrorKind::Cancelled);
        assert!(file.shared.cache.is_empty());

        // Stays cancelled, without another request.
        let fetches = store.fetch_count();
        let err = blocking(move || file.read_at(&mut [0; 4], 0).unwrap_err()).await;
        assert_eq!(*err, ErrorKind::Cancelled);
        assert_eq!(store.fetch_count(), fetches);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_io_error_carries_kind() {
        let (store, mut file) = open(b"0123456789", options()).await;
        store.fail_next(1, ErrorKind::Network("reset".to_string()));
        let err = blocking(move || file.read(&mut [0; 4]).unwrap_err()).await;
        assert_eq!(err.kind(), IoErrorKind::Other);
        assert!(matches!(error::from_io(&err), Some(ErrorKind::Network(_))));
    }
}
