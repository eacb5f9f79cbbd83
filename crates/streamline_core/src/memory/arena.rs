//! # Staging Arena
//!
//! A bump allocator over a fixed byte range. It hands out offsets, not
//! memory: the bytes themselves live in a GPU-visible staging buffer owned
//! by whoever owns the arena.

/// A byte range carved out of a [`StagingArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaSlice {
    /// Offset of the first byte, already aligned.
    pub offset: u64,
    /// Length of the range in bytes.
    pub size: u64,
}

impl ArenaSlice {
    /// One past the last byte of the range.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A bump-cursor arena over `capacity` bytes.
///
/// Allocations are fast (just bump a cursor). All allocations are released
/// at once by [`StagingArena::reset`].
///
/// # Thread Safety
///
/// The arena is a plain value with `&mut self` allocation. It is owned by
/// the single thread that records GPU copies.
///
/// # Example
///
/// ```rust,ignore
/// let mut arena = StagingArena::new(256);
///
/// let a = arena.try_alloc(100, 4).unwrap();   // offset 0
/// let b = arena.try_alloc(100, 64).unwrap();  // offset 128
/// assert!(arena.try_alloc(100, 4).is_none()); // would end at 328
///
/// arena.reset();
/// ```
#[derive(Debug, Clone)]
pub struct StagingArena {
    /// Current allocation offset.
    cursor: u64,
    /// Total capacity.
    capacity: u64,
}

impl StagingArena {
    /// Creates a new arena with the specified capacity in bytes.
    #[must_use]
    pub const fn new(capacity: u64) -> Self {
        Self {
            cursor: 0,
            capacity,
        }
    }

    /// Returns the total capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the number of bytes consumed, padding included.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> u64 {
        self.cursor
    }

    /// Returns the number of bytes past the cursor.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.capacity - self.cursor
    }

    /// Returns true if nothing has been allocated since the last reset.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Allocates exactly `size` bytes at an offset that is a multiple of
    /// `alignment`.
    ///
    /// Returns `None` (and leaves the cursor untouched) when the aligned
    /// range does not fit.
    pub fn try_alloc(&mut self, size: u64, alignment: u64) -> Option<ArenaSlice> {
        let offset = self.aligned_cursor(alignment)?;
        let end = offset.checked_add(size)?;
        if end > self.capacity {
            return None;
        }

        self.cursor = end;
        Some(ArenaSlice { offset, size })
    }

    /// Allocates the largest aligned range of at most `max` bytes.
    ///
    /// Returns `None` when no byte is left after alignment, or when `max`
    /// is zero.
    pub fn alloc_up_to(&mut self, max: u64, alignment: u64) -> Option<ArenaSlice> {
        let offset = self.aligned_cursor(alignment)?;
        if offset >= self.capacity {
            return None;
        }

        let size = max.min(self.capacity - offset);
        if size == 0 {
            return None;
        }

        self.cursor = offset + size;
        Some(ArenaSlice { offset, size })
    }

    /// Resets the arena, invalidating all previous allocations.
    ///
    /// Callers must only do this once the GPU has finished reading every
    /// range handed out since the previous reset.
    #[inline]
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Rounds the cursor up to `alignment`. Zero means unaligned.
    fn aligned_cursor(&self, alignment: u64) -> Option<u64> {
        if alignment <= 1 {
            return Some(self.cursor);
        }
        let blocks = self.cursor.checked_add(alignment - 1)? / alignment;
        blocks.checked_mul(alignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_allocation() {
        let mut arena = StagingArena::new(1024);
        let slice = arena.try_alloc(10, 4).unwrap();
        assert_eq!(slice, ArenaSlice { offset: 0, size: 10 });
        assert_eq!(arena.used(), 10);
    }

    #[test]
    fn test_arena_alignment_padding() {
        let mut arena = StagingArena::new(1024);
        let _ = arena.try_alloc(3, 1).unwrap();

        let slice = arena.try_alloc(8, 256).unwrap();
        assert_eq!(slice.offset, 256);
        assert_eq!(arena.used(), 264);
    }

    #[test]
    fn test_arena_non_power_of_two_alignment() {
        let mut arena = StagingArena::new(64);
        let _ = arena.try_alloc(7, 0).unwrap();

        let slice = arena.try_alloc(4, 12).unwrap();
        assert_eq!(slice.offset, 12);
    }

    #[test]
    fn test_arena_exhaustion_leaves_cursor() {
        let mut arena = StagingArena::new(256);
        let _ = arena.try_alloc(200, 4).unwrap();

        assert!(arena.try_alloc(100, 4).is_none());
        assert_eq!(arena.used(), 200);
        assert_eq!(arena.remaining(), 56);
    }

    #[test]
    fn test_arena_alignment_past_capacity() {
        let mut arena = StagingArena::new(100);
        let _ = arena.try_alloc(90, 1).unwrap();

        assert!(arena.try_alloc(1, 128).is_none());
        assert!(arena.alloc_up_to(10, 128).is_none());
    }

    #[test]
    fn test_arena_overflowing_request() {
        let mut arena = StagingArena::new(64);
        let _ = arena.try_alloc(1, 1).unwrap();

        assert!(arena.try_alloc(u64::MAX, 1).is_none());
        assert!(arena.try_alloc(1, u64::MAX).is_none());
    }

    #[test]
    fn test_alloc_up_to_clamps_to_remaining() {
        let mut arena = StagingArena::new(256);
        let _ = arena.try_alloc(100, 1).unwrap();

        let chunk = arena.alloc_up_to(700, 4).unwrap();
        assert_eq!(chunk, ArenaSlice { offset: 100, size: 156 });
        assert!(arena.alloc_up_to(1, 1).is_none());
    }

    #[test]
    fn test_alloc_up_to_zero() {
        let mut arena = StagingArena::new(16);
        assert!(arena.alloc_up_to(0, 4).is_none());
        assert!(arena.is_empty());
    }

    #[test]
    fn test_arena_reset() {
        let mut arena = StagingArena::new(1024);
        let _ = arena.try_alloc(512, 4).unwrap();
        assert!(arena.used() > 0);

        arena.reset();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.try_alloc(1024, 4).unwrap().end(), 1024);
    }
}
