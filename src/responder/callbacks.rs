//! Memory-change callbacks.
//!
//! A callback watches a half-open address range. A successful write
//! transaction that touches the range marks the callback pending; it then runs
//! from `Responder::process()` with mutable access to the whole memory region.

use std::ops::Range;

use crate::error::{EmbeddedCommError, Result};

/// Maximum number of callbacks per responder (one bit each in the pending mask)
pub const MAX_CALLBACKS: usize = 32;

/// Callback invoked with the responder's memory region
pub type MemoryCallback = Box<dyn FnMut(&mut [u8]) + Send>;

struct Registration {
    range: Range<u32>,
    callback: MemoryCallback,
}

/// Fixed-capacity callback table
#[derive(Default)]
pub(crate) struct CallbackTable {
    entries: Vec<Registration>,
}

impl CallbackTable {
    /// Register a callback, returning its index
    pub(crate) fn register(&mut self, range: Range<u32>, callback: MemoryCallback) -> Result<usize> {
        if self.entries.len() >= MAX_CALLBACKS {
            return Err(EmbeddedCommError::TooManyCallbacks(MAX_CALLBACKS));
        }

        self.entries.push(Registration { range, callback });
        Ok(self.entries.len() - 1)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Bitmask of callbacks whose range intersects `[address, address + length)`
    ///
    /// Bounded by `MAX_CALLBACKS`, so it is safe in a byte handler.
    pub(crate) fn matching(&self, address: u32, length: u32) -> u32 {
        if length == 0 {
            return 0;
        }

        let start = u64::from(address);
        let end = start + u64::from(length);

        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| start < u64::from(entry.range.end) && u64::from(entry.range.start) < end)
            .fold(0u32, |mask, (index, _)| mask | (1u32 << index))
    }

    /// Run every callback selected by `mask`, returning how many ran
    pub(crate) fn run(&mut self, mask: u32, memory: &mut [u8]) -> usize {
        let mut ran = 0;

        for (index, entry) in self.entries.iter_mut().enumerate() {
            if (mask & (1u32 << index)) != 0 {
                (entry.callback)(memory);
                ran += 1;
            }
        }

        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn noop() -> MemoryCallback {
        Box::new(|_: &mut [u8]| {})
    }

    #[test]
    fn test_matching_intersection() {
        let mut table = CallbackTable::default();
        table.register(10..12, noop()).unwrap();
        table.register(0..4, noop()).unwrap();
        table.register(20..30, noop()).unwrap();

        assert_eq!(table.matching(11, 1), 0b001);
        assert_eq!(table.matching(3, 8), 0b011);
        assert_eq!(table.matching(4, 6), 0b000);
        assert_eq!(table.matching(0, 64), 0b111);
        assert_eq!(table.matching(10, 0), 0);
    }

    #[test]
    fn test_table_capacity() {
        let mut table = CallbackTable::default();
        for i in 0..MAX_CALLBACKS as u32 {
            table.register(i..i + 1, noop()).unwrap();
        }

        let result = table.register(0..1, noop());
        assert!(matches!(result, Err(EmbeddedCommError::TooManyCallbacks(32))));
        assert_eq!(table.matching(31, 1), 1u32 << 31);
    }

    #[test]
    fn test_run_only_selected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut table = CallbackTable::default();

        let counter = calls.clone();
        table
            .register(0..1, Box::new(move |memory: &mut [u8]| {
                memory[0] += 1;
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        table.register(1..2, Box::new(|memory: &mut [u8]| memory[1] = 0xFF)).unwrap();

        let mut memory = [0u8; 4];
        assert_eq!(table.run(0b01, &mut memory), 1);

        assert_eq!(memory, [1, 0, 0, 0]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
