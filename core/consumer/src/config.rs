use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Wait between failed or unrecoverable connection attempts.
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
    /// Wait between failed channel setups on a live connection.
    #[serde(with = "humantime_serde")]
    pub rechannel_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            rechannel_delay: Duration::from_secs(2),
        }
    }
}
