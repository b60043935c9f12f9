//! Backing Store
//!
//! The byte-oriented stream every container is multiplexed over. Supplied by
//! the embedding application: a file, an in-memory buffer, or anything else
//! that can read, write, seek and change its length.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// A seekable, resizable byte stream
pub trait BackingStore: Read + Write + Seek {
    /// Truncate or zero-extend the store to exactly `len` bytes
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Current length in bytes
    fn len(&mut self) -> io::Result<u64> {
        let current = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(current))?;
        Ok(end)
    }

    /// Flush buffered writes to durable storage where that means something
    fn sync(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl BackingStore for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.sync_all()
    }
}

impl BackingStore for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds usize"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }
}

impl<S: BackingStore + ?Sized> BackingStore for Box<S> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }

    fn len(&mut self) -> io::Result<u64> {
        (**self).len()
    }

    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}
