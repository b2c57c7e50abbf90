//! Building small image archives in memory and serving them from a
//! [`MockStore`].

use crate::options::ArchiveOptions;
use crate::reader::ArchiveReader;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tar::{Builder, EntryType, Header};
use tarn_remote::store::MockStore;
use tarn_remote::{ObjectAddress, RemoteFile, StoreHandle};

pub(crate) const LOCATION: &str = "images/archive.tar";

pub(crate) enum Member {
    File(&'static str, Vec<u8>),
    Symlink(&'static str, &'static str),
    Dir(&'static str),
}

pub(crate) fn file(path: &'static str, data: impl Into<Vec<u8>>) -> Member {
    Member::File(path, data.into())
}

pub(crate) fn tar(members: impl IntoIterator<Item = Member>) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for member in members {
        let mut header = Header::new_gnu();
        match member {
            Member::File(path, data) => {
                header.set_entry_type(EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(data.len() as u64);
                builder.append_data(&mut header, path, data.as_slice()).unwrap();
            },
            Member::Symlink(path, target) => {
                header.set_entry_type(EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, path, target).unwrap();
            },
            Member::Dir(path) => {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder.append_data(&mut header, path, std::io::empty()).unwrap();
            },
        }
    }
    builder.into_inner().unwrap()
}

/// `manifest.json` with one item per `(config, tags, layers)`.
pub(crate) fn manifest(items: &[(&str, &[&str], &[&str])]) -> Member {
    let items: Vec<_> = items
        .iter()
        .map(|(config, tags, layers)| serde_json::json!({"Config": config, "RepoTags": tags, "Layers": layers}))
        .collect();
    file("manifest.json", serde_json::to_vec(&items).unwrap())
}

/// Small blocks, so that every archive spans several of them.
pub(crate) fn options() -> ArchiveOptions {
    ArchiveOptions {
        block_size: NonZeroUsize::new(512).unwrap(),
        block_count: NonZeroUsize::new(4).unwrap(),
        ..ArchiveOptions::default()
    }
}

pub(crate) fn store(archive: Vec<u8>) -> Arc<MockStore> {
    Arc::new(MockStore::with_objects([(LOCATION, archive)]))
}

pub(crate) fn address() -> ObjectAddress {
    ObjectAddress::from_location(LOCATION).unwrap()
}

pub(crate) async fn open(members: impl IntoIterator<Item = Member>) -> ArchiveReader {
    let store: StoreHandle = store(tar(members));
    ArchiveReader::open(store, &address(), options()).await.unwrap()
}

pub(crate) async fn remote_file(members: impl IntoIterator<Item = Member>) -> RemoteFile {
    let store: StoreHandle = store(tar(members));
    RemoteFile::open(store, &address(), options().remote_options()).await.unwrap()
}
