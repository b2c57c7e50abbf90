//! Finding named members inside a tar archive held in a remote object.
//!
//! Every lookup is a linear scan from the first header on a fresh cursor.
//! Member bodies are seeked over, never read, so a scan only touches the
//! blocks holding headers; with an image archive's handful of members that
//! is cheap, and repeated scans are served from the shared block cache.

use crate::component::ComponentReader;
use crate::error::{self, ErrorKind, Result};
use crate::manifest::read_at_most;
use crate::path;
use tar::{Archive, EntryType};
use tarn_remote::RemoteFile;

/// How many symlinks are followed when resolving a member name. One hop
/// means no loops are possible.
pub const SYMLINK_HOP_LIMIT: usize = 1;

/// Location of a regular member's content within the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveComponent {
    /// Cleaned name the content was found under, after following symlinks.
    pub path: String,
    /// Offset of the first content byte from the start of the archive.
    pub offset: u64,
    pub size: u64,
}

impl ArchiveComponent {
    /// One past the last content byte.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

struct Member {
    name: String,
    entry_type: EntryType,
    offset: u64,
    size: u64,
    link_name: Option<String>,
}

/// Resolves member names of a tar archive to byte ranges of its object.
///
/// Lookups only take `&self` and each works on its own fork of the file, so
/// one locator serves any number of threads.
pub struct ComponentLocator {
    file: RemoteFile,
}

impl ComponentLocator {
    pub fn new(file: RemoteFile) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &RemoteFile {
        &self.file
    }

    fn scan(&self, target: &str) -> Result<Option<Member>> {
        let mut archive = Archive::new(self.file.fork());
        let entries = archive.entries_with_seek().map_err(|err| error::from_io(err, "reading archive"))?;
        for (scanned, entry) in entries.enumerate() {
            let entry = entry.map_err(|err| error::from_io(err, format!("reading archive header {scanned}")))?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            if path::clean(&name) != target {
                continue;
            }
            tracing::debug!(path = %target, scanned, "Found archive member");
            let link_name = entry.link_name_bytes().map(|link| String::from_utf8_lossy(&link).into_owned());
            return Ok(Some(Member {
                name,
                entry_type: entry.header().entry_type(),
                offset: entry.raw_file_position(),
                size: entry.size(),
                link_name,
            }));
        }
        tracing::debug!(path = %target, "Archive member not found");
        Ok(None)
    }

    /// Find the content range of the regular member named `component_path`.
    ///
    /// Fails with [`NotFound`](ErrorKind::NotFound) when no member has that
    /// name (or a followed symlink points nowhere), and with
    /// [`NotARegularFile`](ErrorKind::NotARegularFile) for directories, links
    /// past the hop limit and every other non-regular member.
    pub fn locate(&self, component_path: &str) -> Result<ArchiveComponent> {
        let mut target = path::clean(component_path);
        let mut hops = 0;
        loop {
            let Some(member) = self.scan(&target)? else {
                exn::bail!(ErrorKind::NotFound(target));
            };
            if member.entry_type.is_symlink() && hops < SYMLINK_HOP_LIMIT {
                hops += 1;
                // Resolved lexically against header names only; a link out
                // of the archive simply matches nothing.
                let next = path::join(&path::dir(&target), member.link_name.as_deref().unwrap_or_default());
                tracing::debug!(from = %target, to = %next, "Following symlink");
                target = next;
                continue;
            }
            if !(member.entry_type.is_file() || member.entry_type.is_contiguous()) {
                exn::bail!(ErrorKind::NotARegularFile(member.name));
            }
            return Ok(ArchiveComponent {
                path: target,
                offset: member.offset,
                size: member.size,
            });
        }
    }

    /// Open a reader over the content of `component_path`.
    pub fn open(&self, component_path: &str) -> Result<ComponentReader> {
        let component = self.locate(component_path)?;
        Ok(ComponentReader::new(self.file.fork(), component))
    }

    /// Read the whole of `component_path`, refusing members over `limit`
    /// bytes with [`SizeLimitExceeded`](ErrorKind::SizeLimitExceeded).
    pub fn read(&self, component_path: &str, limit: u64) -> Result<Vec<u8>> {
        let component = self.locate(component_path)?;
        if component.size > limit {
            exn::bail!(ErrorKind::SizeLimitExceeded { path: component.path, limit });
        }
        let path = component.path.clone();
        read_at_most(ComponentReader::new(self.file.fork(), component), limit, &path)
    }
}
