//! Bucketed partitions: claim-one-bucket-per-thread access over a view.
//!
//! A hash container stores entries in one flat buffer and assigns each to a
//! bucket. [`BucketPartition`] groups the indices of a [`FlatView`] by
//! bucket once, then lets consumers claim buckets exclusively. Different
//! buckets can be processed concurrently; within a bucket, entries are
//! visited in ascending source-index order.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use ballast_core::BufferError;

use crate::view::FlatView;

/// Partition of a view's elements into `bucket_count` buckets.
pub struct BucketPartition<T> {
    view: FlatView<T>,
    /// `offsets[b]..offsets[b + 1]` is bucket `b`'s range in `indices`.
    offsets: Vec<usize>,
    indices: Vec<usize>,
    claimed: Box<[AtomicBool]>,
}

impl<T: Copy> BucketPartition<T> {
    /// Group the elements of `view` by `bucket_of`.
    ///
    /// Fails with [`BufferError::InvalidArgument`] if `bucket_count` is 0 or
    /// `bucket_of` returns a bucket `>= bucket_count`, and with the view's
    /// error if it is stale or disposed.
    pub fn new(
        view: FlatView<T>,
        bucket_count: usize,
        bucket_of: impl Fn(&T) -> usize,
    ) -> Result<Self, BufferError> {
        if bucket_count == 0 {
            return Err(BufferError::InvalidArgument {
                reason: "bucket_count must be > 0".to_string(),
            });
        }
        let (offsets, indices) = view.read(|items| group(items, bucket_count, &bucket_of))??;
        let claimed = (0..bucket_count).map(|_| AtomicBool::new(false)).collect();
        Ok(Self {
            view,
            offsets,
            indices,
            claimed,
        })
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.claimed.len()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the partition holds no elements.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Source indices in bucket `bucket`, ascending. Empty when out of range.
    pub fn bucket_indices(&self, bucket: usize) -> &[usize] {
        match (self.offsets.get(bucket), self.offsets.get(bucket + 1)) {
            (Some(&start), Some(&end)) => &self.indices[start..end],
            _ => &[],
        }
    }

    /// Claim exclusive access to `bucket`.
    ///
    /// Fails with [`BufferError::BucketBusy`] while another claim on the same
    /// bucket is alive.
    pub fn claim(&self, bucket: usize) -> Result<BucketClaim<'_, T>, BufferError> {
        let flag = self.claimed.get(bucket).ok_or(BufferError::IndexOutOfRange {
            index: bucket,
            len: self.bucket_count(),
        })?;
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BufferError::BucketBusy { bucket })?;
        Ok(BucketClaim {
            partition: self,
            bucket,
        })
    }

    /// The view the partition was built from.
    pub fn view(&self) -> &FlatView<T> {
        &self.view
    }
}

fn group<T>(
    items: &[T],
    bucket_count: usize,
    bucket_of: &impl Fn(&T) -> usize,
) -> Result<(Vec<usize>, Vec<usize>), BufferError> {
    let mut buckets = Vec::with_capacity(items.len());
    let mut offsets = vec![0usize; bucket_count + 1];
    for item in items {
        let b = bucket_of(item);
        if b >= bucket_count {
            return Err(BufferError::InvalidArgument {
                reason: format!("bucket {b} out of range for {bucket_count} buckets"),
            });
        }
        offsets[b + 1] += 1;
        buckets.push(b);
    }
    for b in 0..bucket_count {
        offsets[b + 1] += offsets[b];
    }
    let mut cursor = offsets.clone();
    let mut indices = vec![0usize; items.len()];
    for (i, &b) in buckets.iter().enumerate() {
        indices[cursor[b]] = i;
        cursor[b] += 1;
    }
    Ok((offsets, indices))
}

impl<T> fmt::Debug for BucketPartition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketPartition")
            .field("buckets", &self.claimed.len())
            .field("len", &self.indices.len())
            .finish()
    }
}

/// Exclusive access to one bucket. Released on drop.
pub struct BucketClaim<'p, T> {
    partition: &'p BucketPartition<T>,
    bucket: usize,
}

impl<T: Copy> BucketClaim<'_, T> {
    /// The claimed bucket.
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    /// Source indices in this bucket, ascending.
    pub fn indices(&self) -> &[usize] {
        self.partition.bucket_indices(self.bucket)
    }

    /// Visit `(source_index, value)` for every entry, in index order.
    pub fn for_each(&self, mut f: impl FnMut(usize, T)) -> Result<(), BufferError> {
        let indices = self.indices();
        self.partition.view.read(|items| {
            for &i in indices {
                f(i, items[i]);
            }
        })
    }

    /// Copy this bucket's values out, in index order.
    pub fn values(&self) -> Result<Vec<T>, BufferError> {
        let indices = self.indices();
        self.partition
            .view
            .read(|items| indices.iter().map(|&i| items[i]).collect())
    }
}

impl<T> Drop for BucketClaim<'_, T> {
    fn drop(&mut self) {
        self.partition.claimed[self.bucket].store(false, Ordering::Release);
    }
}

impl<T> fmt::Debug for BucketClaim<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketClaim")
            .field("bucket", &self.bucket)
            .finish()
    }
}
