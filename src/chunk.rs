use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::from_path_io;
use crate::{Error, Result};

/// One file on disk holding a contiguous byte range of a larger logical
/// object. `offset` is where this chunk starts in the logical object; all
/// read/write positions passed in are chunk-relative.
///
/// The OS handle can be dropped and reopened on demand, so a backend with
/// many chunks does not hold one descriptor per chunk.
pub struct FileChunk {
    path: PathBuf,
    file: Option<File>,
    read_only: bool,
    offset: u64,
    size: u64,
}

impl FileChunk {
    /// Creates a new empty chunk file, truncating any existing file.
    pub fn create(path: impl Into<PathBuf>, offset: u64) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|err| from_path_io(err, &path))?;
        Ok(Self {
            path,
            file: Some(file),
            read_only: false,
            offset,
            size: 0,
        })
    }

    /// Opens an existing chunk file and records its current size.
    pub fn open(path: impl Into<PathBuf>, offset: u64, read_only: bool) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&path)
            .map_err(|err| from_path_io(err, &path))?;
        let size = file.metadata().map_err(|err| from_path_io(err, &path))?.len();
        Ok(Self {
            path,
            file: Some(file),
            read_only,
            offset,
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Whether `pos`, a logical-object position, falls inside this chunk.
    pub fn contains(&self, pos: u64) -> bool {
        pos >= self.offset && pos < self.offset + self.size
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Drops the OS handle; the next access reopens the file.
    pub fn close_handle(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            if !self.read_only {
                file.flush()?;
            }
        }
        Ok(())
    }

    fn handle(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(!self.read_only)
                .open(&self.path)
                .map_err(|err| from_path_io(err, &self.path))?;
            self.file = Some(file);
        }
        Ok(self.file.as_mut().expect("handle just opened"))
    }

    /// Reads exactly `buf.len()` bytes starting at chunk-relative `pos`.
    /// Hitting end of file first is a hard error reporting how much was read.
    pub fn read(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let requested = buf.len();
        let file = self.handle()?;
        file.seek(SeekFrom::Start(pos))?;
        let mut got = 0;
        while got < requested {
            match file.read(&mut buf[got..])? {
                0 => return Err(Error::NotEnoughData { requested, got }),
                n => got += n,
            }
        }
        Ok(())
    }

    /// Writes all of `data` at chunk-relative `pos`, growing the chunk when
    /// writing at or past its end.
    pub fn write(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let requested = data.len();
        let file = self.handle()?;
        file.seek(SeekFrom::Start(pos))?;
        let mut written = 0;
        while written < requested {
            match file.write(&data[written..])? {
                0 => return Err(Error::PartialWrite { requested, written }),
                n => written += n,
            }
        }
        self.size = self.size.max(pos + requested as u64);
        Ok(())
    }

    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.handle()?.set_len(new_size)?;
        self.size = new_size;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}
