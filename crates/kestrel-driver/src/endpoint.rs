//! Transport endpoint allocation.
//!
//! Every transport session needs a unique 8-bit source endpoint on the
//! device's crossbar. The pool hands them out — preferred address first,
//! numerically smallest otherwise — and takes them back on release or at
//! session teardown. An id is a member of exactly one of {available,
//! allocated} at all times.

use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// Session transport identifier: allocated source endpoint in the high half,
/// caller-supplied destination address in the low half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sid(u32);

impl Sid {
    /// Pack a source endpoint and destination address.
    pub const fn new(src: u16, dst: u16) -> Self {
        Self(((src as u32) << 16) | dst as u32)
    }

    /// Reconstruct from a packed value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The packed 32-bit value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Source endpoint half.
    pub const fn src(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Destination address half.
    pub const fn dst(self) -> u16 {
        self.0 as u16
    }
}

impl std::fmt::Display for Sid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}>{:#06X}", self.src(), self.dst())
    }
}

/// Pool of unallocated source-endpoint identifiers.
///
/// The pool itself carries no lock; its single owner serializes access (the
/// board keeps it behind a `Mutex`). Concurrent allocation without that
/// serialization is a caller bug, not something the pool defends against.
#[derive(Debug)]
pub struct EndpointPool {
    available: BTreeSet<u8>,
    allocated: BTreeSet<u8>,
}

impl EndpointPool {
    /// Create a pool with the full 0–255 range available.
    pub fn new() -> Self {
        Self {
            available: (0..=u8::MAX).collect(),
            allocated: BTreeSet::new(),
        }
    }

    /// Allocate an endpoint id.
    ///
    /// Returns `preferred` if it is currently available, otherwise the
    /// numerically smallest available id.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` when no ids remain.
    pub fn allocate(&mut self, preferred: u8) -> Result<u8> {
        let id = if self.available.contains(&preferred) {
            preferred
        } else {
            *self
                .available
                .iter()
                .next()
                .ok_or_else(|| Error::resource_exhausted("endpoint pool for this device"))?
        };
        self.available.remove(&id);
        self.allocated.insert(id);
        Ok(id)
    }

    /// Return an endpoint id to the pool.
    ///
    /// Releasing an id that is not currently allocated is an error — a
    /// double release would let the same id be handed out twice.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `id` is not currently allocated.
    pub fn release(&mut self, id: u8) -> Result<()> {
        if !self.allocated.remove(&id) {
            return Err(Error::invalid_state(format!(
                "endpoint {id} is not currently allocated"
            )));
        }
        self.available.insert(id);
        Ok(())
    }

    /// Restore the full range. Called exactly once per session teardown.
    pub fn reset(&mut self) {
        self.available = (0..=u8::MAX).collect();
        self.allocated.clear();
    }

    /// Number of ids currently available.
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    /// Whether `id` is currently allocated.
    pub fn is_allocated(&self, id: u8) -> bool {
        self.allocated.contains(&id)
    }

    #[cfg(test)]
    fn invariant_holds(&self) -> bool {
        self.available.is_disjoint(&self.allocated)
            && self.available.len() + self.allocated.len() == 256
    }
}

impl Default for EndpointPool {
    fn default() -> Self {
        Self::new()
    }
}
