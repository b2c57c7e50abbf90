//! In-memory object store for testing.

use crate::ObjectStore;
use crate::address::ObjectAddress;
use crate::error::{ErrorKind, Result};
use crate::store::ObjectInfo;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// In-memory object store for testing.
///
/// Objects live in a `HashMap` behind a [`RwLock`]. Besides serving data, the
/// store counts range fetches and can be told to fail or stall upcoming
/// fetches, which is what tests of the read path care about.
///
/// # Examples
///
/// Needs the `mock` feature.
///
/// ```ignore
/// use tarn_remote::{ObjectAddress, ObjectStore, store::MockStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MockStore::with_objects([("bucket/image.tar", b"0123456789")]);
/// let address = ObjectAddress::new("bucket", "image.tar");
/// assert_eq!(store.probe(&address).await?.size, 10);
///
/// let mut buf = [0; 4];
/// assert_eq!(store.fetch_range(&address, 8, &mut buf).await?, 2);
/// assert_eq!(&buf[..2], b"89");
/// assert_eq!(store.fetch_count(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MockStore {
    name: String,
    objects: RwLock<HashMap<ObjectAddress, (OffsetDateTime, Vec<u8>)>>,
    fetches: AtomicUsize,
    failures: Mutex<Vec<ErrorKind>>,
    stall: Mutex<Option<Duration>>,
}

impl MockStore {
    /// Create a mock store pre-populated with objects, keyed by `bucket/key`.
    ///
    /// Panics if a location has no bucket. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_objects(objects: impl IntoIterator<Item = (impl AsRef<str>, impl Into<Vec<u8>>)>) -> Self {
        let now = OffsetDateTime::now_utc();
        let mut map = HashMap::new();
        for (location, data) in objects {
            let location = location.as_ref();
            let Ok(address) = ObjectAddress::from_location(location) else {
                panic!("MockStore::with_objects: invalid location {location}");
            };
            map.insert(address, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            objects: RwLock::new(map),
            fetches: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
            stall: Mutex::new(None),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add or replace an object.
    pub async fn insert(&self, address: ObjectAddress, data: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(address, (OffsetDateTime::now_utc(), data.into()));
    }

    /// Number of [`fetch_range`](ObjectStore::fetch_range) calls so far,
    /// failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Make the next `times` range fetches fail with `kind`.
    pub fn fail_next(&self, times: usize, kind: ErrorKind) {
        let mut failures = self.failures.lock();
        failures.extend(std::iter::repeat_n(kind, times));
    }

    /// Delay every range fetch by `delay` before it touches any data.
    pub fn stall_fetches(&self, delay: Duration) {
        *self.stall.lock() = Some(delay);
    }
}

impl Default for MockStore {
    fn default() -> Self {
        let objects: [(&str, &[u8]); 0] = [];
        Self::with_objects(objects)
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self, address: &ObjectAddress) -> Result<ObjectInfo> {
        let objects = self.objects.read().await;
        let (modified, data) =
            objects.get(address).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(address.to_string())))?;
        Ok(ObjectInfo {
            address: address.clone(),
            size: data.len() as u64,
            last_modified: Some(*modified),
            e_tag: None,
        })
    }

    async fn fetch_range(&self, address: &ObjectAddress, start: u64, buf: &mut [u8]) -> Result<usize> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let stall = *self.stall.lock();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        let failure = {
            let mut failures = self.failures.lock();
            (!failures.is_empty()).then(|| failures.remove(0))
        };
        if let Some(kind) = failure {
            exn::bail!(kind);
        }

        let objects = self.objects.read().await;
        let (_, data) =
            objects.get(address).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(address.to_string())))?;
        let Ok(start) = usize::try_from(start) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let filled = buf.len().min(data.len() - start);
        buf[..filled].copy_from_slice(&data[start..start + filled]);
        Ok(filled)
    }
}
