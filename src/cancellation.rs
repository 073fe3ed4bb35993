use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::{Result, ScrapeError};

/// Shared stop flag, set from the Ctrl-C handler and checked between pages.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fails with `Cancelled` if a stop was requested before `page` started.
    pub fn check(&self, page: u32) -> Result<()> {
        if self.is_cancelled() {
            return Err(ScrapeError::Cancelled { page });
        }
        Ok(())
    }
}

#[test]
fn test_clones_share_the_flag() {
    let token = CancellationToken::new();
    let handle = token.clone();
    assert!(token.check(2).is_ok());
    handle.cancel();
    assert!(matches!(token.check(2), Err(ScrapeError::Cancelled { page: 2 })));
}
