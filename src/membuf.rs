use std::collections::VecDeque;

/// Accumulates data written in arbitrarily sized pieces into fixed-capacity
/// segments, deferring the single contiguous copy to `take_data`. Segments
/// are zero-initialized on allocation so `allocate_space` can hand out a
/// writable slice without exposing uninitialized memory.
pub struct MemBuffer {
    alloc_size: usize,
    segments: VecDeque<Segment>,
}

struct Segment {
    data: Vec<u8>,
    used: usize,
}

impl Segment {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            used: 0,
        }
    }

    fn free(&self) -> usize {
        self.data.len() - self.used
    }
}

pub const DEFAULT_ALLOC_SIZE: usize = 256 * 1024;

impl MemBuffer {
    pub fn new(alloc_size: usize) -> Self {
        Self {
            alloc_size: alloc_size.max(1),
            segments: VecDeque::new(),
        }
    }

    /// Appends a copy of `data`, splitting across segments as needed.
    pub fn add_data(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let free = self.segments.back().map_or(0, Segment::free);
            if free == 0 {
                self.push_segment(data.len());
                continue;
            }
            let segment = self.segments.back_mut().expect("segment exists");
            let take = free.min(data.len());
            segment.data[segment.used..segment.used + take].copy_from_slice(&data[..take]);
            segment.used += take;
            data = &data[take..];
        }
    }

    /// Reserves a contiguous writable slice of at least `min_size` bytes.
    /// The bytes only count once `add_allocated_space` is called.
    pub fn allocate_space(&mut self, min_size: usize) -> &mut [u8] {
        if self.segments.back().map_or(0, Segment::free) < min_size {
            self.push_segment(min_size);
        }
        let segment = self.segments.back_mut().expect("segment exists");
        &mut segment.data[segment.used..]
    }

    /// Commits `size` bytes previously written through `allocate_space`.
    pub fn add_allocated_space(&mut self, size: usize) {
        let segment = self.segments.back_mut().expect("allocate_space first");
        debug_assert!(size <= segment.free());
        segment.used += size;
    }

    /// Total number of committed bytes.
    pub fn size(&self) -> usize {
        self.segments.iter().map(|segment| segment.used).sum()
    }

    /// Drains the buffer into one contiguous vector, in insertion order.
    /// A single fully-used segment is moved out without copying.
    pub fn take_data(&mut self) -> Vec<u8> {
        if self.segments.len() == 1 {
            let segment = self.segments.pop_front().expect("segment exists");
            let mut data = segment.data;
            data.truncate(segment.used);
            return data;
        }
        let mut out = Vec::with_capacity(self.size());
        for segment in self.segments.drain(..) {
            out.extend_from_slice(&segment.data[..segment.used]);
        }
        out
    }

    fn push_segment(&mut self, min_size: usize) {
        self.segments
            .push_back(Segment::with_capacity(self.alloc_size.max(min_size)));
    }
}

impl Default for MemBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOC_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::MemBuffer;

    #[test]
    fn allocate_then_commit() {
        let mut buffer = MemBuffer::new(8);
        let slice = buffer.allocate_space(4);
        assert!(slice.len() >= 4);
        slice[..4].copy_from_slice(b"abcd");
        buffer.add_allocated_space(4);
        assert_eq!(buffer.size(), 4);
        assert_eq!(buffer.take_data(), b"abcd");
    }

    #[test]
    fn spans_segments() {
        let mut buffer = MemBuffer::new(3);
        buffer.add_data(b"hello world");
        assert_eq!(buffer.size(), 11);
        assert_eq!(buffer.take_data(), b"hello world");
    }
}
