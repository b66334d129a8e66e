use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::error::{Error, Result};

/// The single segment currently open for append.
///
/// Writes go through a userspace buffer; a cloned handle serves positional
/// reads of already-flushed bytes.
#[derive(Debug)]
pub struct ActiveSegment {
    id: u64,
    path: PathBuf,
    reader: File,
    writer: BufWriter<File>,
    offset: u64,
}

impl ActiveSegment {
    /// Opens the segment file at `path`, creating it if missing. Appends
    /// resume at the current physical end.
    pub fn open(path: impl Into<PathBuf>, id: u64) -> Result<Self> {
        let path = path.into();
        let file = File::options()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let offset = file.metadata()?.len();
        let reader = file.try_clone()?;

        Ok(Self {
            id,
            path,
            reader,
            writer: BufWriter::new(file),
            offset,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended so far, flushed or not.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Appends `bytes`, returning the offset they start at.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.offset;
        self.writer.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(offset)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes the buffer and fdatasyncs the file.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Cuts the file back to `len` bytes. Used by recovery to drop a
    /// corrupt or incomplete tail.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.writer.flush()?;
        self.reader.set_len(len)?;
        self.offset = len;
        Ok(())
    }

    /// Abandons everything appended past `len`: the write buffer is
    /// replaced outright (a failed flush would otherwise retry the dead
    /// bytes later) and the file is cut back underneath it. Dropping the
    /// old buffer may still push its contents to the file, which is why
    /// the truncation comes after.
    pub fn abort_to(&mut self, len: u64) -> Result<()> {
        let file = self.reader.try_clone()?;
        self.writer = BufWriter::new(file);
        self.reader.set_len(len)?;
        self.offset = len;
        Ok(())
    }

    /// Reads `buf.len()` flushed bytes starting at `offset`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        read_exact_at(&self.reader, buf, offset)?;
        Ok(())
    }

    /// Seals this segment: flushes and syncs, drops the append handle, and
    /// keeps a read handle (plus an mmap region when requested).
    pub fn seal(mut self, mmap: bool, populate: bool) -> Result<SealedSegment> {
        self.sync()?;
        let size = self.offset;
        let map = if mmap && size > 0 {
            Some(map_readonly(&self.reader, populate)?)
        } else {
            None
        };
        Ok(SealedSegment {
            id: self.id,
            path: self.path,
            file: self.reader,
            size,
            mmap: map,
        })
    }
}

/// A read-only segment. In mmap mode reads copy out of the mapped region;
/// otherwise they go through positional file reads.
#[derive(Debug)]
pub struct SealedSegment {
    id: u64,
    path: PathBuf,
    file: File,
    size: u64,
    mmap: Option<Mmap>,
}

impl SealedSegment {
    /// Opens an existing sealed segment file.
    pub fn open(path: impl Into<PathBuf>, id: u64, mmap: bool, populate: bool) -> Result<Self> {
        let path = path.into();
        let file = File::options().read(true).open(&path)?;
        let size = file.metadata()?.len();
        let map = if mmap && size > 0 {
            Some(map_readonly(&file, populate)?)
        } else {
            None
        };
        Ok(Self {
            id,
            path,
            file,
            size,
            mmap: map,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads `length` bytes at `offset`, failing with `OutOfRange` when the
    /// request extends past the physical end of the segment.
    pub fn read(&self, offset: u64, length: u32) -> Result<Vec<u8>> {
        let end = offset + length as u64;
        if end > self.size {
            return Err(Error::OutOfRange(format!(
                "segment {}: {}..{} past size {}",
                self.id, offset, end, self.size
            )));
        }
        let mut buf = vec![0u8; length as usize];
        match &self.mmap {
            Some(map) => buf.copy_from_slice(&map[offset as usize..end as usize]),
            None => read_exact_at(&self.file, &mut buf, offset)?,
        }
        Ok(buf)
    }
}

fn map_readonly(file: &File, populate: bool) -> Result<Mmap> {
    let map = unsafe { MmapOptions::new().map(file)? };
    #[cfg(unix)]
    {
        if populate {
            let _ = map.advise(memmap2::Advice::WillNeed);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = populate;
    }
    Ok(map)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut read = 0usize;
    while read < buf.len() {
        let n = file.seek_read(&mut buf[read..], offset + read as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short positional read",
            ));
        }
        read += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_tracks_offset() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut active = ActiveSegment::open(dir.path().join("000000000.dat"), 0)?;

        assert_eq!(active.append(b"alpha")?, 0);
        assert_eq!(active.append(b"beta")?, 5);
        assert_eq!(active.offset(), 9);
        Ok(())
    }

    #[test]
    fn test_read_back_after_flush() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut active = ActiveSegment::open(dir.path().join("000000000.dat"), 0)?;
        active.append(b"alphabeta")?;
        active.flush()?;

        let mut buf = [0u8; 4];
        active.read_at(&mut buf, 5)?;
        assert_eq!(&buf, b"beta");
        Ok(())
    }

    #[test]
    fn test_reopen_resumes_at_end() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("000000000.dat");
        {
            let mut active = ActiveSegment::open(&path, 0)?;
            active.append(b"persisted")?;
            active.sync()?;
        }
        let active = ActiveSegment::open(&path, 0)?;
        assert_eq!(active.offset(), 9);
        Ok(())
    }

    #[test]
    fn test_truncate_drops_tail() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("000000000.dat");
        let mut active = ActiveSegment::open(&path, 0)?;
        active.append(b"keepdrop")?;
        active.truncate(4)?;
        active.append(b"!")?;
        active.flush()?;

        let mut buf = [0u8; 5];
        active.read_at(&mut buf, 0)?;
        assert_eq!(&buf, b"keep!");
        Ok(())
    }

    #[test]
    fn test_abort_discards_tail_and_buffer() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("000000000.dat");
        let mut active = ActiveSegment::open(&path, 0)?;
        active.append(b"keep")?;
        active.sync()?;

        let mark = active.offset();
        active.append(b"doomed group bytes")?;
        active.abort_to(mark)?;
        assert_eq!(active.offset(), mark);

        // Nothing of the aborted bytes survives, buffered or on disk.
        active.append(b"next")?;
        active.flush()?;
        let mut buf = [0u8; 8];
        active.read_at(&mut buf, 0)?;
        assert_eq!(&buf, b"keepnext");
        assert_eq!(std::fs::metadata(&path).expect("metadata").len(), 8);
        Ok(())
    }

    #[test]
    fn test_sealed_read_modes_agree() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("000000001.dat");
        let mut active = ActiveSegment::open(&path, 1)?;
        active.append(b"mapped bytes here")?;

        let sealed = active.seal(true, false)?;
        assert_eq!(sealed.read(7, 5)?, b"bytes");

        let plain = SealedSegment::open(&path, 1, false, false)?;
        assert_eq!(plain.read(7, 5)?, b"bytes");
        Ok(())
    }

    #[test]
    fn test_sealed_read_past_end() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("000000001.dat");
        let mut active = ActiveSegment::open(&path, 1)?;
        active.append(b"short")?;
        let sealed = active.seal(true, false)?;

        match sealed.read(3, 10) {
            Err(Error::OutOfRange(_)) => {}
            other => panic!("expected OutOfRange, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_seal_empty_segment_skips_mmap() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let active = ActiveSegment::open(dir.path().join("000000000.dat"), 0)?;
        let sealed = active.seal(true, true)?;
        assert_eq!(sealed.size(), 0);
        Ok(())
    }
}
