use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeClientConfig {
    /// How long to wait before retrying a failed resubscription. A fresh subscription also gets
    /// renewed once after this long, in case the endpoint silently stopped serving it.
    #[serde(with = "humantime_serde")]
    pub resub_interval: Duration,
    /// A head subscription that produced no header for this long is considered stalled.
    #[serde(with = "humantime_serde")]
    pub header_timeout: Duration,
    /// Each back-fill log query covers at most `block_chunk_size + 1` blocks.
    pub block_chunk_size: u64,
    /// Back-fill never reaches further than this many blocks behind the tip.
    pub block_max_range: u64,
}

impl Default for SafeClientConfig {
    fn default() -> Self {
        Self {
            resub_interval: Duration::from_secs(5 * 60),
            header_timeout: Duration::from_secs(60),
            block_chunk_size: 2000,
            block_max_range: 10000,
        }
    }
}
