use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestorConfig {
    /// How long a header waits for the matching block from the message queue.
    #[serde(with = "humantime_serde")]
    pub mq_wait_timeout: Duration,
    /// Every block from the message queue is notified a second time after this delay, for
    /// headers that showed up late.
    #[serde(with = "humantime_serde")]
    pub mq_rebroadcast_delay: Duration,
    /// Attempts at reopening a lost header subscription before giving up on the rollup.
    pub reconnection_attempts: usize,
    #[serde(with = "humantime_serde")]
    pub reconnection_delay: Duration,
}

impl Default for AttestorConfig {
    fn default() -> Self {
        Self {
            mq_wait_timeout: Duration::from_secs(1),
            mq_rebroadcast_delay: Duration::from_secs(10),
            reconnection_attempts: 5,
            reconnection_delay: Duration::from_secs(1),
        }
    }
}
