//! Packet identifier allocation.
//!
//! [`PacketIdPool`] hands out the smallest free identifier in `1..=65535`
//! and takes them back when the owning flow ends. It is a plain `&mut self`
//! value: callers outside the session's serialized context must provide
//! their own synchronization (the session exposes a locked accessor).

use crate::error::{Error, Result};
use crate::types::PacketId;

const WORDS: usize = (u16::MAX as usize + 1) / 64;

/// Set of packet identifiers currently in flight on one connection.
pub struct PacketIdPool {
    // Bit n set means identifier n is in use. Bit 0 is never set.
    bits: Box<[u64; WORDS]>,
    in_use: usize,
}

impl PacketIdPool {
    /// Number of identifiers the pool can hand out.
    pub const CAPACITY: usize = u16::MAX as usize;

    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            bits: Box::new([0; WORDS]),
            in_use: 0,
        }
    }

    /// Take the smallest unused identifier, `None` when all are in flight.
    pub fn acquire(&mut self) -> Option<PacketId> {
        if self.in_use == Self::CAPACITY {
            return None;
        }

        for (word_idx, word) in self.bits.iter_mut().enumerate() {
            // Treat identifier 0 as permanently taken.
            let taken = if word_idx == 0 { *word | 1 } else { *word };
            if taken == u64::MAX {
                continue;
            }
            let bit = (!taken).trailing_zeros() as usize;
            *word |= 1 << bit;
            self.in_use += 1;
            return PacketId::new((word_idx * 64 + bit) as u16);
        }

        None
    }

    /// Mark a caller-chosen identifier as in use.
    pub fn register(&mut self, id: PacketId) -> Result<()> {
        let (word, mask) = Self::slot(id);
        if self.bits[word] & mask != 0 {
            return Err(Error::PacketIdInUse(id));
        }
        self.bits[word] |= mask;
        self.in_use += 1;
        Ok(())
    }

    /// Return an identifier to the pool.
    ///
    /// Releasing an identifier that is not held leaves the pool untouched and
    /// reports [`Error::PacketIdNotHeld`].
    pub fn release(&mut self, id: PacketId) -> Result<()> {
        let (word, mask) = Self::slot(id);
        if self.bits[word] & mask == 0 {
            return Err(Error::PacketIdNotHeld(id));
        }
        self.bits[word] &= !mask;
        self.in_use -= 1;
        Ok(())
    }

    /// Whether `id` is currently held.
    pub fn is_in_use(&self, id: PacketId) -> bool {
        let (word, mask) = Self::slot(id);
        self.bits[word] & mask != 0
    }

    /// Number of identifiers currently held.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Release every identifier.
    pub fn clear(&mut self) {
        self.bits.fill(0);
        self.in_use = 0;
    }

    fn slot(id: PacketId) -> (usize, u64) {
        let n = id.get() as usize;
        (n / 64, 1 << (n % 64))
    }
}

impl Default for PacketIdPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PacketIdPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketIdPool").field("in_use", &self.in_use).finish()
    }
}
