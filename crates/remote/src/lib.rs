pub mod address;
pub mod cache;
pub mod error;
mod file;
pub mod store;

pub use crate::address::ObjectAddress;
pub use crate::cache::{BlockCache, CacheStats};
pub use crate::file::{RemoteFile, RemoteOptions};
pub use crate::store::{ObjectInfo, ObjectStore};
use std::sync::Arc;

pub type StoreHandle = Arc<dyn ObjectStore>;
