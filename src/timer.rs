//! Cancellable deadline timer for `tokio::select!` loops.
//!
//! A [`Timer`] is plain state: arming stores a deadline, cancelling clears
//! it. The owning task awaits [`Timer::fired`] in its select loop; an unarmed
//! timer never fires. Cancelling a stopped timer is a no-op.

use std::future;
use std::time::Duration;
use tokio::time::{self, Instant};

#[derive(Debug, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire once, `after` from now. Re-arming replaces the old deadline.
    pub fn arm(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    /// Arm only if not already armed, keeping a running window fixed.
    pub fn arm_if_idle(&mut self, after: Duration) {
        if self.deadline.is_none() {
            self.arm(after);
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve at the deadline and disarm. Pending forever while unarmed.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => future::pending::<()>().await,
        }
    }
}
