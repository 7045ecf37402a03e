//! Bounded lookahead queue feeding a track's resampler

/// Fixed-capacity sample queue with start and length cursors
///
/// Samples are appended at the tail and consumed from the head. Before a
/// refill the pending run is moved back to the front so the free space is
/// always contiguous.
#[derive(Debug, Clone)]
pub(crate) struct SampleQueue {
    buf: Vec<f32>,
    start: usize,
    len: usize,
}

impl SampleQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity],
            start: 0,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
    }

    /// Move pending samples to the front and expose the free tail
    pub(crate) fn free_tail(&mut self) -> &mut [f32] {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.start + self.len, 0);
            self.start = 0;
        }
        &mut self.buf[self.len..]
    }

    /// Mark `n` samples written through [`SampleQueue::free_tail`] as queued
    pub(crate) fn commit(&mut self, n: usize) {
        debug_assert!(self.start + self.len + n <= self.buf.len());
        self.len += n;
    }

    /// First `n` pending samples
    pub(crate) fn head(&self, n: usize) -> &[f32] {
        let n = n.min(self.len);
        &self.buf[self.start..self.start + n]
    }

    pub(crate) fn consume(&mut self, n: usize) {
        let n = n.min(self.len);
        self.start += n;
        self.len -= n;
    }
}
