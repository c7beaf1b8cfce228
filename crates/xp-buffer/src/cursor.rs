//! # Cursor — Ring Position Tracker
//!
//! Tracks the `tail` (oldest occupied slot) and the number of occupied slots
//! of the event ring. The write position is derived from both, so every one
//! of the `capacity` slots is usable.
//!
//! Cursor invariants are proven with Kani below; ring-level ones live in
//! `xp-verify`.

/// Ring cursor tracking the oldest slot and the occupancy.
///
/// # Invariant
///
/// `len <= capacity` at all times. `advance_head` refuses to claim a slot
/// on a full ring; the caller must release the oldest slot first.
#[derive(Debug, Clone)]
pub struct Cursor {
    /// Oldest occupied slot.
    tail: usize,

    /// Number of occupied slots.
    len: usize,

    /// Total number of slots in the ring.
    capacity: usize,
}

impl Cursor {
    /// Create a cursor for a ring with `capacity` slots.
    ///
    /// # Panics
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "Ring must have at least 1 slot");
        Self {
            tail: 0,
            len: 0,
            capacity,
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Next slot to write into.
    #[inline]
    pub fn head(&self) -> usize {
        (self.tail + self.len) % self.capacity
    }

    #[inline]
    pub fn tail(&self) -> usize {
        self.tail
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slot holding the `offset`-th oldest entry.
    #[inline]
    pub fn position(&self, offset: usize) -> usize {
        (self.tail + offset) % self.capacity
    }

    /// Claim the next slot for writing.
    ///
    /// Returns `None` if the ring is full.
    #[inline]
    pub fn advance_head(&mut self) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let slot = self.head();
        self.len += 1;
        Some(slot)
    }

    /// Release the oldest slot.
    ///
    /// Returns `None` if the ring is empty.
    #[inline]
    pub fn advance_tail(&mut self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let slot = self.tail;
        self.tail = (self.tail + 1) % self.capacity;
        self.len -= 1;
        Some(slot)
    }

    pub fn reset(&mut self) {
        self.tail = 0;
        self.len = 0;
    }
}

// =============================================================================
// Kani Proofs: Cursor Invariants
// =============================================================================

#[cfg(kani)]
mod proofs {
    use super::*;

    /// **Proof: Occupancy never exceeds capacity**
    #[kani::proof]
    #[kani::unwind(8)]
    fn verify_len_bounded() {
        let mut cursor = Cursor::new(4);

        let steps: usize = kani::any();
        kani::assume(steps <= 6);

        for _ in 0..steps {
            if kani::any() {
                let _ = cursor.advance_head();
            } else {
                let _ = cursor.advance_tail();
            }
            assert!(cursor.len() <= cursor.capacity());
        }
    }

    /// **Proof: A claimed slot is never an occupied slot**
    #[kani::proof]
    #[kani::unwind(6)]
    fn verify_head_never_overwrites() {
        let mut cursor = Cursor::new(4);

        let fills: usize = kani::any();
        kani::assume(fills <= 4);
        for _ in 0..fills {
            let _ = cursor.advance_head();
        }

        if let Some(slot) = cursor.advance_head() {
            for offset in 0..cursor.len() - 1 {
                assert!(cursor.position(offset) != slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cursor_is_empty() {
        let c = Cursor::new(10);
        assert!(c.is_empty());
        assert!(!c.is_full());
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn test_every_slot_is_usable() {
        let mut c = Cursor::new(3);
        assert_eq!(c.advance_head(), Some(0));
        assert_eq!(c.advance_head(), Some(1));
        assert_eq!(c.advance_head(), Some(2));
        assert!(c.is_full());
        assert_eq!(c.advance_head(), None);
    }

    #[test]
    fn test_wrap_around() {
        let mut c = Cursor::new(3);
        c.advance_head();
        c.advance_head();
        c.advance_head();

        assert_eq!(c.advance_tail(), Some(0));
        assert_eq!(c.advance_head(), Some(0));
        assert_eq!(c.position(0), 1);
        assert_eq!(c.position(2), 0);
    }

    #[test]
    fn test_empty_tail_returns_none() {
        let mut c = Cursor::new(4);
        assert_eq!(c.advance_tail(), None);
    }

    #[test]
    fn test_reset() {
        let mut c = Cursor::new(2);
        c.advance_head();
        c.advance_tail();
        c.advance_head();
        c.reset();
        assert!(c.is_empty());
        assert_eq!(c.head(), 0);
    }
}
