//! A backing strategy that records every call for later assertions.

use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

use ballast_alloc::{BackingAllocator, LabeledHeap};
use ballast_core::{AllocError, AllocatorLabel};

/// One call observed by a [`RecordingAllocator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocEvent {
    Init {
        size: usize,
        align: usize,
        label: AllocatorLabel,
        ok: bool,
    },
    Dispose {
        size: usize,
        align: usize,
    },
}

/// Wraps a strategy and logs its calls. Clones share the log.
#[derive(Clone, Debug)]
pub struct RecordingAllocator<A = LabeledHeap> {
    inner: A,
    events: Arc<Mutex<Vec<AllocEvent>>>,
}

impl RecordingAllocator<LabeledHeap> {
    /// Record calls made to the labeled heap under `label`.
    pub fn heap(label: AllocatorLabel) -> Self {
        Self::new(LabeledHeap::new(label))
    }
}

impl<A: BackingAllocator> RecordingAllocator<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn log(&self) -> MutexGuard<'_, Vec<AllocEvent>> {
        match self.events.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<AllocEvent> {
        self.log().clone()
    }

    /// Successful inits minus disposes.
    pub fn outstanding(&self) -> isize {
        self.log().iter().fold(0isize, |acc, e| match e {
            AllocEvent::Init { ok: true, .. } => acc + 1,
            AllocEvent::Init { ok: false, .. } => acc,
            AllocEvent::Dispose { .. } => acc - 1,
        })
    }

    /// Sizes of successful inits, in call order.
    pub fn init_sizes(&self) -> Vec<usize> {
        self.log()
            .iter()
            .filter_map(|e| match e {
                AllocEvent::Init { size, ok: true, .. } => Some(*size),
                _ => None,
            })
            .collect()
    }
}

impl<A: BackingAllocator> BackingAllocator for RecordingAllocator<A> {
    fn label(&self) -> AllocatorLabel {
        self.inner.label()
    }

    fn init(
        &mut self,
        size: usize,
        align: usize,
        label: AllocatorLabel,
    ) -> Result<NonNull<u8>, AllocError> {
        let result = self.inner.init(size, align, label);
        self.log().push(AllocEvent::Init {
            size,
            align,
            label,
            ok: result.is_ok(),
        });
        result
    }

    unsafe fn dispose(&mut self, ptr: NonNull<u8>, size: usize, align: usize) {
        self.log().push(AllocEvent::Dispose { size, align });
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.dispose(ptr, size, align) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_init_and_dispose_across_clones() {
        let mut a = RecordingAllocator::heap(AllocatorLabel::Persistent);
        let mut b = a.clone();
        let p = a.init(32, 8, AllocatorLabel::Persistent).unwrap();
        assert!(b.init(8, 8, AllocatorLabel::Invalid).is_err());
        unsafe { b.dispose(p, 32, 8) };

        assert_eq!(a.outstanding(), 0);
        assert_eq!(a.init_sizes(), vec![32]);
        assert_eq!(a.events().len(), 3);
    }
}
