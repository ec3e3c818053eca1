use bitvec::prelude::*;

use crate::error::{IdError, Result};
use crate::generator::validate_period;

/// Number of distinct 16-bit identifiers, one bit each in the issued set.
pub const ID_SPACE: usize = u16::MAX as usize + 1;

const BITSET_WORDS: usize = ID_SPACE / usize::BITS as usize;

/// The last `period` identifiers handed out, plus a presence bitset over them.
///
/// Slots start out as 0. Since 0 is never marked in the bitset, evicting an
/// unfilled slot is a no-op, so the first `period` pushes only set bits.
#[derive(Debug)]
pub struct IdWindow {
    bits: BitVec<usize, Lsb0>,
    ring: Vec<u16>,
    next_ptr: usize,
}

impl IdWindow {
    /// Reserves a zeroed bitset and a zeroed ring of `period` slots.
    ///
    /// `period` must lie within [`MIN_PERIOD`](crate::MIN_PERIOD)..=
    /// [`MAX_PERIOD`](crate::MAX_PERIOD). Uses fallible reservation so that
    /// memory pressure surfaces as [`IdError::AllocationFailure`] instead of
    /// aborting.
    pub fn try_new(period: usize) -> Result<Self> {
        validate_period(period)?;

        let mut words: Vec<usize> = Vec::new();
        words
            .try_reserve_exact(BITSET_WORDS)
            .map_err(|_| IdError::AllocationFailure { period })?;
        words.resize(BITSET_WORDS, 0);

        let mut ring: Vec<u16> = Vec::new();
        ring.try_reserve_exact(period)
            .map_err(|_| IdError::AllocationFailure { period })?;
        ring.resize(period, 0);

        Ok(Self {
            bits: BitVec::from_vec(words),
            ring,
            next_ptr: 0,
        })
    }

    pub fn period(&self) -> usize {
        self.ring.len()
    }

    pub fn contains(&self, id: u16) -> bool {
        self.bits[id as usize]
    }

    /// Whether `candidate` may be issued: non-zero and not in the window.
    pub fn is_free(&self, candidate: u16) -> bool {
        candidate != 0 && !self.contains(candidate)
    }

    /// Records `id` at the insertion slot, evicting whatever the slot held.
    ///
    /// Callers must have checked [`is_free`](Self::is_free) first.
    pub(crate) fn push(&mut self, id: u16) {
        debug_assert!(self.is_free(id));

        let evicted = self.ring[self.next_ptr];
        self.bits.set(evicted as usize, false);
        self.bits.set(id as usize, true);
        self.ring[self.next_ptr] = id;
        self.next_ptr = (self.next_ptr + 1) % self.ring.len();
    }

    /// Number of identifiers currently held.
    pub fn size(&self) -> usize {
        self.bits.count_ones()
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> (Vec<u16>, usize) {
        (self.ring.clone(), self.next_ptr)
    }

    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let mut held: Vec<usize> = self
            .ring
            .iter()
            .filter(|&&id| id != 0)
            .map(|&id| id as usize)
            .collect();
        held.sort_unstable();
        let before = held.len();
        held.dedup();
        if held.len() != before {
            return false;
        }

        let marked: Vec<usize> = self.bits.iter_ones().collect();
        held == marked
    }
}

/// Source of [`IdWindow`] buffers.
///
/// The generator goes through this seam for every (re)allocation, which lets
/// callers bound memory or simulate exhaustion.
pub trait WindowAlloc {
    fn alloc(&mut self, period: usize) -> Result<IdWindow>;
}

/// Allocates from the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAlloc;

impl WindowAlloc for SystemAlloc {
    fn alloc(&mut self, period: usize) -> Result<IdWindow> {
        IdWindow::try_new(period)
    }
}
