use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// A one-shot timer that can be stopped and re-armed. A stopped timer never fires.
pub(crate) struct ResubTimer {
    sleep: Pin<Box<Sleep>>,
    period: Duration,
    armed: bool,
}

impl ResubTimer {
    /// Returns an armed timer.
    pub fn new(period: Duration) -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep(period)),
            period,
            armed: true,
        }
    }

    pub fn reset(&mut self) {
        self.sleep.as_mut().reset(Instant::now() + self.period);
        self.armed = true;
    }

    pub fn stop(&mut self) {
        self.armed = false;
    }

    pub async fn fired(&mut self) {
        if !self.armed {
            return std::future::pending().await;
        }
        (&mut self.sleep).await;
        self.armed = false;
    }
}
