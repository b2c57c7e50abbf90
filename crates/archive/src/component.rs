//! Bounded reader over one archive member's content.

use crate::error::{ErrorKind, Result};
use crate::locate::ArchiveComponent;
use std::io::{self, Read, Seek, SeekFrom};
use tarn_remote::RemoteFile;

/// Reads the content of one archive member as if it were a file of its own.
///
/// Offsets are relative to the start of the member. Reads never run past the
/// member's end, and like the underlying [`RemoteFile`] they block on the
/// network; call them from a blocking thread.
pub struct ComponentReader {
    file: RemoteFile,
    component: ArchiveComponent,
    position: u64,
}

impl ComponentReader {
    pub(crate) fn new(file: RemoteFile, component: ArchiveComponent) -> Self {
        Self { file, component, position: 0 }
    }

    pub fn component(&self) -> &ArchiveComponent {
        &self.component
    }

    pub fn path(&self) -> &str {
        &self.component.path
    }

    /// Size of the member content in bytes.
    pub fn len(&self) -> u64 {
        self.component.size
    }

    pub fn is_empty(&self) -> bool {
        self.component.size == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read bytes of the member starting at `offset` without moving the
    /// cursor. Returns `0` at or past the end of the member.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let (want, read) = self.read_span(buf, offset).map_err(ErrorKind::remote)?;
        if read < want {
            exn::bail!(ErrorKind::InvalidArchive(format!(
                "{} truncated: archive ends {} bytes into a {} byte member",
                self.component.path,
                offset + read as u64,
                self.component.size
            )));
        }
        Ok(read)
    }

    /// Returns how many bytes were asked of the file and how many it had.
    fn read_span(&self, buf: &mut [u8], offset: u64) -> tarn_remote::error::Result<(usize, usize)> {
        let remaining = self.component.size.saturating_sub(offset);
        let want = usize::try_from(remaining).map_or(buf.len(), |remaining| remaining.min(buf.len()));
        if want == 0 {
            return Ok((0, 0));
        }
        // Offsets inside a located member can't overflow: offset < size and
        // the member lies within the object.
        let read = self.file.read_at(&mut buf[..want], self.component.offset + offset)?;
        Ok((want, read))
    }
}

impl Read for ComponentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (want, read) = self.read_span(buf, self.position).map_err(tarn_remote::error::into_io)?;
        if read < want {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("archive ends inside {}", self.component.path),
            ));
        }
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for ComponentReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::End(delta) => i128::from(self.component.size) + i128::from(delta),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
        };
        let position = u64::try_from(target).map_err(|_| {
            tarn_remote::error::into_io(exn::Exn::from(tarn_remote::error::ErrorKind::InvalidPosition(target)))
        })?;
        self.position = position;
        Ok(position)
    }
}
