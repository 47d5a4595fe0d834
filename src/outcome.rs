use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;

use parking_lot::{Condvar, Mutex};

/// Final or pending state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxState {
    InProgress = 0,
    Committed = 1,
    Reverted = 2,
}

impl TxState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TxState::Committed,
            2 => TxState::Reverted,
            _ => TxState::InProgress,
        }
    }
}

/// Single-use gate: closed until `release` is called once, open forever after.
#[derive(Default)]
pub struct Latch {
    released: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        let mut released = self.released.lock();
        if !*released {
            *released = true;
            self.cond.notify_all();
        }
    }

    pub fn wait(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.cond.wait(&mut released);
        }
    }

    pub fn is_released(&self) -> bool {
        *self.released.lock()
    }
}

/// How readers wait on a transaction that is still in progress.
pub enum WaitMode {
    Spin,
    Latch(Latch),
}

/// Shared outcome cell of one transaction.
///
/// The same `Arc<TxOutcome>` is held by the transaction handle, by its GC
/// entry and by every version it links into the index, so a single state
/// transition is observed by all of them. The state only ever moves away
/// from `InProgress`, exactly once.
pub struct TxOutcome {
    state: AtomicU8,
    wait_mode: OnceLock<WaitMode>,
}

impl Default for TxOutcome {
    fn default() -> Self {
        Self::new()
    }
}

impl TxOutcome {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TxState::InProgress as u8),
            wait_mode: OnceLock::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> TxState {
        TxState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_in_progress(&self) -> bool {
        self.state() == TxState::InProgress
    }

    /// Pick the wait mode. Must happen before any version referencing this
    /// outcome becomes reachable; later calls are ignored.
    pub fn select_wait_mode(&self, use_latch: bool) {
        let mode = if use_latch {
            WaitMode::Latch(Latch::new())
        } else {
            WaitMode::Spin
        };
        let _ = self.wait_mode.set(mode);
    }

    pub fn uses_latch(&self) -> bool {
        matches!(self.wait_mode.get(), Some(WaitMode::Latch(_)))
    }

    /// Move to a final state and wake any parked readers. Returns `false` if
    /// the outcome was already final, in which case nothing changes.
    pub fn finish(&self, state: TxState) -> bool {
        debug_assert_ne!(state, TxState::InProgress);
        let moved = self
            .state
            .compare_exchange(
                TxState::InProgress as u8,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if let Some(WaitMode::Latch(latch)) = self.wait_mode.get() {
            latch.release();
        }
        moved
    }

    /// Block until the owning transaction is no longer in progress.
    pub fn wait(&self) -> TxState {
        loop {
            let state = self.state();
            if state != TxState::InProgress {
                return state;
            }
            match self.wait_mode.get() {
                Some(WaitMode::Latch(latch)) => latch.wait(),
                _ => thread::yield_now(),
            }
        }
    }
}
