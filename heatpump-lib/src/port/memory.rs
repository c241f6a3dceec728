use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

use super::Bus;

#[derive(Default)]
struct Wire {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

/// In-memory bus. Clones share the same wire, so a test keeps one handle
/// to inject incoming bytes and inspect what the engine wrote.
#[derive(Clone, Default)]
pub struct MemoryBus {
    wire: Arc<Mutex<Wire>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn wire(&self) -> MutexGuard<'_, Wire> {
        match self.wire.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue bytes as if they arrived from the far end.
    pub fn inject(&self, bytes: &[u8]) {
        self.wire().rx.extend(bytes.iter());
    }

    /// Drain everything written to the bus so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.wire().tx)
    }

    pub fn unread(&self) -> usize {
        self.wire().rx.len()
    }
}

impl Bus for MemoryBus {
    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.wire().rx.len())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut wire = self.wire();
        let n = buf.len().min(wire.rx.len());
        for (slot, byte) in buf.iter_mut().zip(wire.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.wire().tx.extend_from_slice(data);
        Ok(())
    }
}
