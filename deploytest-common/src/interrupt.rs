//! Process-wide Ctrl+C latch.
//!
//! The handler only records that an interrupt arrived. Bounded stop waits
//! consume it to skip straight to the forced kill; the scenario checks it
//! between phases. Without [`install_handler`] the latch can still be set
//! through [`trigger`], but Ctrl+C keeps its default behaviour.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

static PENDING: AtomicBool = AtomicBool::new(false);
static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Install the Ctrl+C handler. Safe to call repeatedly; only the first call
/// does anything. Returns whether the handler is active.
pub fn install_handler() -> bool {
    *INSTALLED.get_or_init(|| {
        match ctrlc::set_handler(|| PENDING.store(true, Ordering::SeqCst)) {
            Ok(()) => {
                debug!("Interrupt handler installed");
                true
            }
            Err(e) => {
                warn!("Could not install interrupt handler: {e}");
                false
            }
        }
    })
}

/// Latch an interrupt as if Ctrl+C had arrived.
pub fn trigger() {
    PENDING.store(true, Ordering::SeqCst);
}

/// Whether an interrupt is waiting to be consumed.
pub fn is_pending() -> bool {
    PENDING.load(Ordering::SeqCst)
}

/// Consume a pending interrupt.
pub fn take() -> bool {
    PENDING.swap(false, Ordering::SeqCst)
}
