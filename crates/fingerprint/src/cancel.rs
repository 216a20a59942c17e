//! Cooperative cancellation for long-running extraction and build stages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{FingerprintError, Stage};

/// Shared flag checked between frames, anchor batches, chunks and entries.
///
/// Cancellation never interrupts the computation of a single frame or
/// anchor; the stage stops at its next check and returns
/// [`FingerprintError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled { stage })` once [`cancel`](Self::cancel) was called.
    pub fn check(&self, stage: Stage) -> Result<(), FingerprintError> {
        if self.is_cancelled() {
            Err(FingerprintError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check(Stage::PeakExtraction).is_ok());

        clone.cancel();

        assert!(token.is_cancelled());
        assert_eq!(
            token.check(Stage::IndexBuild),
            Err(FingerprintError::Cancelled {
                stage: Stage::IndexBuild
            })
        );
    }
}
