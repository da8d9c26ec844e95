use sffl_types::RollupId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("broker error: {0}")]
    Other(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueuesListenerError {
    #[error("queue for rollup {0} is already being listened to")]
    QueueExists(RollupId),
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Listener(#[from] QueuesListenerError),

    #[error("consumer is already closed")]
    AlreadyClosed,
}
