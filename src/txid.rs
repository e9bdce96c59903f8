// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transaction-ID allocation for MBAP transports (TCP/TLS/UDP).
//!
//! RTU and ASCII have no transaction ID; the serial dispatcher matches
//! responses by "the one pending request" instead (see [`crate::dispatch`]).

use std::sync::atomic::{AtomicU16, Ordering};

/// A Modbus transaction ID, 16 bit, never `0`.
pub type TransactionId = u16;

/// Monotonic allocator: `1, 2, …, 65535, 1, 2, …`; `0` is never returned.
#[derive(Debug)]
pub(crate) struct TransactionIdAllocator {
    // Tracks the last *internal* counter value, which wraps through 0;
    // `next()` skips the 0 state and never hands it out.
    counter: AtomicU16,
}

impl TransactionIdAllocator {
    pub(crate) fn new() -> Self {
        Self {
            counter: AtomicU16::new(0),
        }
    }

    /// Allocates the next transaction ID.
    pub(crate) fn next(&self) -> TransactionId {
        loop {
            let previous = self.counter.fetch_add(1, Ordering::Relaxed);
            let candidate = previous.wrapping_add(1);
            if candidate != 0 {
                return candidate;
            }
        }
    }
}

impl Default for TransactionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one_and_increments() {
        let alloc = TransactionIdAllocator::new();
        assert_eq!(alloc.next(), 1);
        assert_eq!(alloc.next(), 2);
        assert_eq!(alloc.next(), 3);
    }

    #[test]
    fn never_returns_zero_and_wraps_to_one() {
        let alloc = TransactionIdAllocator::new();
        let mut last = 0;
        for _ in 0..65535 {
            last = alloc.next();
            assert_ne!(last, 0);
        }
        assert_eq!(last, 65535);
        assert_eq!(alloc.next(), 1);
    }

    #[test]
    fn many_more_than_one_wraparound_never_yields_zero() {
        let alloc = TransactionIdAllocator::new();
        for _ in 0..70_000 {
            assert_ne!(alloc.next(), 0);
        }
    }
}
