//! Precomputed block copies between linear buffer layouts
use std::ops::AddAssign;

/// A contiguous run of `length` elements copied from `source` to `destination`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Number of elements
    pub length: usize,
    /// Offset in the source buffer
    pub source: usize,
    /// Offset in the destination buffer
    pub destination: usize,
}

/// Ordered list of segments remapping one buffer layout into another.
///
/// Built once and reused for every call; no two segments overlap in the
/// destination buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentMap {
    segments: Vec<Segment>,
}

impl SegmentMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment, merging it into the previous one when both are adjacent
    /// in source and destination.
    pub fn push(&mut self, length: usize, source: usize, destination: usize) {
        if length == 0 {
            return;
        }
        if let Some(last) = self.segments.last_mut() {
            if last.source + last.length == source && last.destination + last.length == destination
            {
                last.length += length;
                return;
            }
        }
        self.segments.push(Segment {
            length,
            source,
            destination,
        });
    }

    /// Segments in order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of elements moved by the map
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.length).sum()
    }

    /// Whether the map moves nothing
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Copy every segment of `source` into `destination`.
    pub fn scatter<T: Copy>(&self, source: &[T], destination: &mut [T]) {
        for s in self.segments.iter() {
            destination[s.destination..s.destination + s.length]
                .copy_from_slice(&source[s.source..s.source + s.length]);
        }
    }

    /// Copy every segment of `source` into a new zero initialised buffer of length `size`.
    pub fn gather<T: Copy + num::Zero>(&self, source: &[T], size: usize) -> Vec<T> {
        let mut result = vec![T::zero(); size];
        self.scatter(source, &mut result);
        result
    }

    /// Add every segment of `source` onto `destination`.
    pub fn add<T: Copy + AddAssign>(&self, source: &[T], destination: &mut [T]) {
        for s in self.segments.iter() {
            destination[s.destination..s.destination + s.length]
                .iter_mut()
                .zip(&source[s.source..s.source + s.length])
                .for_each(|(d, &x)| *d += x);
        }
    }
}
