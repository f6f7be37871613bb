// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Context bitmap with a rotating allocation cursor.

use alloc::{vec, vec::Vec};

use crate::types::ContextId;

const WORD_BITS: usize = core::mem::size_of::<u64>() * 8;

/// Bitmap of assigned contexts.
///
/// Bits below `first` (including the kernel context) are set at construction
/// and never cleared, so they read as permanently assigned.
pub(crate) struct ContextMap {
    bitmap: Vec<u64>,
    first: u16,
    last: u16,
    next: u16,
    free: usize,
}

impl ContextMap {
    pub(crate) fn new(first: ContextId, last: ContextId) -> Self {
        let words = (last.as_index() + 1).div_ceil(WORD_BITS);
        let mut map = Self {
            bitmap: vec![0; words],
            first: first.as_raw(),
            last: last.as_raw(),
            next: first.as_raw(),
            free: (last.as_raw() - first.as_raw()) as usize + 1,
        };
        for index in 0..first.as_index() {
            map.set(index);
        }
        map
    }

    fn set(&mut self, index: usize) {
        self.bitmap[index / WORD_BITS] |= 1 << (index % WORD_BITS);
    }

    fn clear(&mut self, index: usize) {
        self.bitmap[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
    }

    fn test(&self, index: usize) -> bool {
        self.bitmap[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    /// Returns true if `ctx` lies inside the assignable range.
    pub(crate) fn contains(&self, ctx: ContextId) -> bool {
        (self.first..=self.last).contains(&ctx.as_raw())
    }

    pub(crate) fn is_assigned(&self, ctx: ContextId) -> bool {
        ctx.as_index() < self.bitmap.len() * WORD_BITS && self.test(ctx.as_index())
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free
    }

    pub(crate) fn capacity(&self) -> usize {
        (self.last - self.first) as usize + 1
    }

    pub(crate) fn cursor(&self) -> ContextId {
        ContextId::from_raw(self.next)
    }

    /// Context following `ctx`, wrapping from `last` back to `first`.
    pub(crate) fn step(&self, ctx: ContextId) -> ContextId {
        if ctx.as_raw() >= self.last || ctx.as_raw() < self.first {
            ContextId::from_raw(self.first)
        } else {
            ContextId::from_raw(ctx.as_raw() + 1)
        }
    }

    /// Moves the cursor just past `ctx`.
    pub(crate) fn advance_past(&mut self, ctx: ContextId) {
        self.next = self.step(ctx).as_raw();
    }

    /// Takes the first free context at or after the cursor.
    pub(crate) fn allocate(&mut self) -> Option<ContextId> {
        if self.free == 0 {
            return None;
        }
        let mut ctx = self.cursor();
        for _ in 0..self.capacity() {
            if !self.test(ctx.as_index()) {
                self.set(ctx.as_index());
                self.free -= 1;
                self.advance_past(ctx);
                return Some(ctx);
            }
            ctx = self.step(ctx);
        }
        None
    }

    /// Returns `ctx` to the pool. Returns false if it was not assigned.
    pub(crate) fn free(&mut self, ctx: ContextId) -> bool {
        if !self.contains(ctx) || !self.test(ctx.as_index()) {
            return false;
        }
        self.clear(ctx.as_index());
        self.free += 1;
        true
    }

    /// Iterates the assignable range in ascending order.
    pub(crate) fn range(&self) -> impl Iterator<Item = ContextId> {
        (self.first..=self.last).map(ContextId::from_raw)
    }

    /// Free contexts counted from the bitmap rather than the cached counter.
    pub(crate) fn count_free(&self) -> usize {
        self.range().filter(|ctx| !self.test(ctx.as_index())).count()
    }

    /// True if every reserved bit below `first` is still set.
    pub(crate) fn reserved_intact(&self) -> bool {
        (0..self.first as usize).all(|index| self.test(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(first: u16, last: u16) -> ContextMap {
        ContextMap::new(ContextId::from_raw(first), ContextId::from_raw(last))
    }

    #[test]
    fn reserves_contexts_below_first() {
        let m = map(3, 10);
        assert!(m.is_assigned(ContextId::from_raw(0)));
        assert!(m.is_assigned(ContextId::from_raw(2)));
        assert!(!m.is_assigned(ContextId::from_raw(3)));
        assert_eq!(m.free_count(), 8);
        assert!(m.reserved_intact());
    }

    #[test]
    fn allocates_round_robin_and_wraps() {
        let mut m = map(1, 4);
        let got: Vec<u16> = (0..4).map(|_| m.allocate().unwrap().as_raw()).collect();
        assert_eq!(got, [1, 2, 3, 4]);
        assert_eq!(m.cursor(), ContextId::from_raw(1));
        assert_eq!(m.allocate(), None);
        assert!(m.free(ContextId::from_raw(2)));
        assert_eq!(m.allocate(), Some(ContextId::from_raw(2)));
        assert_eq!(m.cursor(), ContextId::from_raw(3));
    }

    #[test]
    fn cursor_skips_assigned_entries() {
        let mut m = map(1, 4);
        for _ in 0..4 {
            m.allocate();
        }
        m.free(ContextId::from_raw(1));
        m.advance_past(ContextId::from_raw(2));
        assert_eq!(m.allocate(), Some(ContextId::from_raw(1)));
        assert_eq!(m.cursor(), ContextId::from_raw(2));
    }

    #[test]
    fn free_rejects_unassigned_and_out_of_range() {
        let mut m = map(1, 8);
        assert!(!m.free(ContextId::from_raw(5)));
        assert!(!m.free(ContextId::from_raw(0)));
        assert!(!m.free(ContextId::from_raw(200)));
        assert_eq!(m.free_count(), 8);
    }

    #[test]
    fn spans_multiple_words() {
        let mut m = map(60, 130);
        let mut seen = 0;
        while let Some(ctx) = m.allocate() {
            assert!(m.contains(ctx));
            seen += 1;
        }
        assert_eq!(seen, 71);
        assert_eq!(m.count_free(), 0);
    }
}
