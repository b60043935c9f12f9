//! Stream handle
//!
//! Byte-stream view of one directory entry. At most one handle exists per
//! container at a time; dropping it closes the stream.

use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom, Write};

use parking_lot::ReentrantMutexGuard;

use crate::error::{ChainError, Result};
use crate::format::StreamDescriptor;
use crate::store::BackingStore;

use super::state::ContainerState;

/// An open stream
///
/// Holds the container lock for its whole lifetime, so other threads block
/// until it is dropped. On the owning thread, structural container
/// operations fail with `InvalidOperation` while the handle is alive.
pub struct StreamHandle<'a, S: BackingStore> {
    guard: ReentrantMutexGuard<'a, RefCell<ContainerState<S>>>,
    index: u64,
}

impl<'a, S: BackingStore> StreamHandle<'a, S> {
    pub(super) fn new(
        guard: ReentrantMutexGuard<'a, RefCell<ContainerState<S>>>,
        index: u64,
    ) -> Self {
        Self { guard, index }
    }

    /// Directory index of this stream
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Current descriptor (size and boundary clusters)
    pub fn descriptor(&self) -> StreamDescriptor {
        self.guard
            .borrow()
            .open_descriptor()
            .unwrap_or(StreamDescriptor::EMPTY)
    }

    /// Stream length in bytes
    pub fn len(&self) -> u64 {
        self.descriptor().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current read/write position
    pub fn position(&self) -> u64 {
        self.guard.borrow().open_position().unwrap_or(0)
    }

    /// Truncate or extend the stream; new bytes read as zeros
    ///
    /// The position is left unchanged, even if it now lies past the end.
    pub fn set_len(&mut self, size: u64) -> Result<()> {
        self.guard.borrow_mut().set_open_len(size)
    }

    /// Read the whole stream regardless of the current position
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.len())
            .map_err(|_| ChainError::InvalidArgument("stream too large to buffer".to_string()))?;
        let mut state = self.guard.borrow_mut();
        let saved = state.open_position()?;
        state.set_open_position(0)?;

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let read = state.read_open(&mut buf[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        buf.truncate(filled);

        state.set_open_position(saved)?;
        Ok(buf)
    }

    /// Replace the whole content of the stream
    pub fn overwrite(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.guard.borrow_mut();
        state.set_open_len(data.len() as u64)?;
        state.set_open_position(0)?;
        state.write_open(data)?;
        Ok(())
    }
}

impl<S: BackingStore> Read for StreamHandle<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.guard.borrow_mut().read_open(buf)?)
    }
}

impl<S: BackingStore> Write for StreamHandle<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.guard.borrow_mut().write_open(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.guard.borrow_mut().map.flush()?)
    }
}

impl<S: BackingStore> Seek for StreamHandle<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut state = self.guard.borrow_mut();
        let current = state.open_position()?;
        let len = state.open_descriptor()?.size;

        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
            SeekFrom::Current(delta) => current.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;

        state.set_open_position(target)?;
        Ok(target)
    }
}

impl<S: BackingStore> Drop for StreamHandle<'_, S> {
    fn drop(&mut self) {
        // Every container method releases its borrow before returning
        match self.guard.try_borrow_mut() {
            Ok(mut state) => state.close_stream(),
            Err(_) => {
                tracing::error!(stream = self.index, "Container state busy while closing stream");
                debug_assert!(false, "container state borrowed while dropping a stream handle");
            }
        }
    }
}
