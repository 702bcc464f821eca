//! Access safety tracking shared between a buffer and its views.
//!
//! An [`AtomicSafetyHandle`] carries two counters:
//!
//! - `generation` advances once, when the buffer is disposed. A disposed
//!   handle stays disposed; every later access reports
//!   [`BufferError::UseAfterFree`].
//! - `secondary` advances around every mutation. It is even while the buffer
//!   is quiescent and odd while a write is in progress. A view records the
//!   (even) value it was derived at and is valid only while it still
//!   matches.
//!
//! View reads register as readers for the duration of the read. A writer
//! bumps `secondary` before touching memory and then checks the reader
//! count; both sides use `SeqCst`, so either the writer observes the reader
//! (and panics before any memory is touched) or the reader observes the
//! bump (and reports [`BufferError::StaleView`]).
//!
//! The tracker is advisory: it turns single-writer discipline violations
//! into errors and panics. It does not make concurrent mutation legal.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use ballast_core::BufferError;

/// Generation counters and reader count for one buffer.
#[derive(Debug, Default)]
pub struct AtomicSafetyHandle {
    generation: AtomicU32,
    secondary: AtomicU32,
    readers: AtomicUsize,
    disposed: AtomicBool,
}

impl AtomicSafetyHandle {
    /// A fresh, live handle at generation 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Disposal generation.
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Structural-mutation generation.
    pub fn secondary(&self) -> u32 {
        self.secondary.load(Ordering::SeqCst)
    }

    /// Whether the owning buffer has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Whether a write is in progress.
    pub fn is_writing(&self) -> bool {
        self.secondary() & 1 == 1
    }

    /// View reads currently in flight.
    pub fn active_readers(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }

    /// Fail with [`BufferError::UseAfterFree`] once disposed.
    #[inline]
    pub fn check_read(&self) -> Result<(), BufferError> {
        if self.is_disposed() {
            return Err(BufferError::UseAfterFree);
        }
        Ok(())
    }

    /// Open a write: bump `secondary` so every outstanding view goes stale.
    ///
    /// Must be paired with [`finish_write`](Self::finish_write) once the
    /// mutation is done.
    ///
    /// # Panics
    ///
    /// If a view read is in progress. The panic happens before the caller
    /// touches memory, and the write is closed again first.
    #[inline]
    pub fn check_write_and_bump(&self) -> Result<(), BufferError> {
        self.check_read()?;
        self.secondary.fetch_add(1, Ordering::SeqCst);
        if self.readers.load(Ordering::SeqCst) != 0 {
            self.secondary.fetch_add(1, Ordering::SeqCst);
            panic!("concurrent access: buffer mutated while a view read is in progress");
        }
        Ok(())
    }

    /// Close a write opened by [`check_write_and_bump`](Self::check_write_and_bump).
    #[inline]
    pub fn finish_write(&self) {
        self.secondary.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark the buffer disposed. Permanent.
    ///
    /// Returns `false` if a view read was in flight, in which case the
    /// caller must not release the storage.
    pub fn release(&self) -> bool {
        self.disposed.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.secondary.fetch_add(2, Ordering::SeqCst);
        self.readers.load(Ordering::SeqCst) == 0
    }

    /// Register a view read taken at `view_secondary`.
    ///
    /// A view that is already stale or disposed fails without registering,
    /// so polling it never holds writers off. The returned guard keeps
    /// writers out until dropped.
    pub fn begin_read(&self, view_secondary: u32) -> Result<ReadGuard<'_>, BufferError> {
        self.check_generation(view_secondary)?;
        self.readers.fetch_add(1, Ordering::SeqCst);
        let guard = ReadGuard { handle: self };
        // A writer may have bumped between the check and the increment.
        self.check_generation(view_secondary)?;
        Ok(guard)
    }

    fn check_generation(&self, view_secondary: u32) -> Result<(), BufferError> {
        let current = self.secondary.load(Ordering::SeqCst);
        if current == view_secondary {
            return Ok(());
        }
        if self.is_disposed() {
            return Err(BufferError::UseAfterFree);
        }
        Err(BufferError::StaleView {
            view_generation: view_secondary,
            current_generation: current,
        })
    }
}

/// An in-flight view read. Dropping it lets writers proceed.
#[derive(Debug)]
#[must_use]
pub struct ReadGuard<'h> {
    handle: &'h AtomicSafetyHandle,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.handle.readers.fetch_sub(1, Ordering::SeqCst);
    }
}
