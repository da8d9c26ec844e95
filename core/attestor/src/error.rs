use sffl_safeclient::ClientError;
use sffl_types::RollupId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid bls key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Error)]
pub enum AttestorError {
    #[error("failed to subscribe to headers of rollup {rollup_id}: {source}")]
    Subscribe {
        rollup_id: RollupId,
        #[source]
        source: ClientError,
    },

    #[error("attestor was already started")]
    AlreadyStarted,
}
