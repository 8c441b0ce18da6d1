//! In-memory image buffer
//!
//! Images accumulate until the configured count is reached and are then handed
//! out as one [`PendingChunk`]. The container index is assigned here, on the
//! caller's thread, so chunks are numbered in arrival order no matter where
//! they are written.

use crate::array::DataArray;

/// A full (or final) batch of images ready for a data container
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChunk {
    /// Container index, starting at 1
    pub index: u32,
    /// Ordinal of the first image within the series, starting at 1
    pub first_image: u64,
    pub images: Vec<DataArray>,
}

impl PendingChunk {
    /// Number of images, counting each slice of a 3-D input
    pub fn image_count(&self) -> u64 {
        self.images.iter().map(depth).sum()
    }

    /// Ordinal of the last image within the series
    pub fn last_image(&self) -> u64 {
        self.first_image + self.image_count().saturating_sub(1)
    }
}

fn depth(image: &DataArray) -> u64 {
    if image.ndim() == 3 {
        image.shape()[0] as u64
    } else {
        1
    }
}

/// Bounded stack of decoded images
#[derive(Debug)]
pub struct ImageBuffer {
    capacity: usize,
    images: Vec<DataArray>,
    next_index: u32,
    next_image: u64,
}

impl ImageBuffer {
    /// Create a buffer that fills after `capacity` images (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            images: Vec::with_capacity(capacity),
            next_index: 1,
            next_image: 1,
        }
    }

    /// Append an image; returns the chunk when the buffer becomes full
    pub fn push(&mut self, image: DataArray) -> Option<PendingChunk> {
        self.images.push(image);
        if self.images.len() >= self.capacity {
            self.flush()
        } else {
            None
        }
    }

    /// Take whatever is buffered; `None` when empty
    pub fn flush(&mut self) -> Option<PendingChunk> {
        if self.images.is_empty() {
            return None;
        }
        let images = std::mem::replace(&mut self.images, Vec::with_capacity(self.capacity));
        let chunk = PendingChunk {
            index: self.next_index,
            first_image: self.next_image,
            images,
        };
        self.next_index += 1;
        self.next_image += chunk.image_count();
        Some(chunk)
    }

    /// Drop buffered images without producing a chunk; returns how many
    pub fn discard(&mut self) -> usize {
        let count = self.images.len();
        self.images.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index the next chunk will get
    pub fn next_index(&self) -> u32 {
        self.next_index
    }
}
