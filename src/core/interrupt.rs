//! Operator interruption: a shared flag polled by every convergence wait.
//!
//! With the `signals` feature, SIGINT/SIGTERM set the flag through
//! `signal-hook`. Waits never block on signals; they check the flag each poll.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::errors::{Result, StressError};

/// Cloneable interruption flag shared between the signal hook and the scenario.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    flag: Arc<AtomicBool>,
}

impl InterruptFlag {
    /// A flag that is only ever set programmatically.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register SIGINT/SIGTERM to set this flag. Best-effort: registration
    /// failures are reported on stderr and otherwise ignored.
    #[cfg(feature = "signals")]
    #[must_use]
    pub fn with_os_signals() -> Self {
        use signal_hook::consts::{SIGINT, SIGTERM};

        let handler = Self::new();
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&handler.flag)) {
            eprintln!("[CST-SIGNAL] failed to register SIGINT: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&handler.flag)) {
            eprintln!("[CST-SIGNAL] failed to register SIGTERM: {e}");
        }
        handler
    }

    /// Whether an interruption has been requested.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Request interruption.
    pub fn set(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Fail with [`StressError::Interrupted`] if interruption was requested.
    pub fn check(&self, during: &str) -> Result<()> {
        if self.is_set() {
            return Err(StressError::Interrupted {
                during: during.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = InterruptFlag::new();
        let other = flag.clone();
        assert!(flag.check("waiting").is_ok());
        other.set();
        assert!(flag.is_set());
        let err = flag.check("waiting for leaders").unwrap_err();
        assert_eq!(err.code(), "CST-5901");
        assert!(err.to_string().contains("waiting for leaders"));
    }
}
