use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single slot admission for externally triggered commands. Whoever holds
/// the token may call into the engine; everyone else is turned away.
#[derive(Debug, Clone, Default)]
pub struct DispatchGate {
    busy: Arc<AtomicBool>,
}

/// Proof of holding the gate. Released when dropped.
#[derive(Debug)]
pub struct GateToken {
    busy: Arc<AtomicBool>,
}

impl DispatchGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<GateToken> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateToken {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for GateToken {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
