//! [`Broker`] over AMQP 0-9-1, backed by `lapin`.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    Acknowledge,
    Broker,
    BrokerChannel,
    BrokerConnection,
    BrokerError,
    CloseError,
    CloseNotifier,
    Delivery,
    DeliveryStream,
};

/// AMQP reply code for a normal shutdown.
const REPLY_SUCCESS: u16 = 200;

#[derive(Clone, Default)]
pub struct AmqpBroker {
    properties: ConnectionProperties,
}

impl AmqpBroker {
    pub fn new(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    type Connection = AmqpConnection;

    async fn connect(&self, address: &str) -> Result<AmqpConnection, BrokerError> {
        let connection = Connection::connect(address, self.properties.clone()).await?;
        let closed = CloseNotifier::default();
        let notifier = closed.clone();
        connection.on_error(move |err| {
            warn!("amqp connection error: {err}");
            notifier.close(close_error(&err));
        });
        Ok(AmqpConnection { connection, closed })
    }
}

pub struct AmqpConnection {
    connection: Connection,
    closed: CloseNotifier,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    type Channel = AmqpChannel;

    async fn create_channel(&self) -> Result<AmqpChannel, BrokerError> {
        let channel = self.connection.create_channel().await?;
        Ok(AmqpChannel {
            channel,
            closed: CloseNotifier::default(),
        })
    }

    fn notify_close(&self) -> oneshot::Receiver<CloseError> {
        self.closed.subscribe()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.connection.close(REPLY_SUCCESS, "closing").await?;
        Ok(())
    }
}

pub struct AmqpChannel {
    channel: Channel,
    /// Fired by the delivery streams: a consumer that errors out or ends means the channel is
    /// gone.
    closed: CloseNotifier,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let options = QueueDeclareOptions {
            durable: true,
            auto_delete: false,
            exclusive: false,
            ..Default::default()
        };
        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let options = BasicConsumeOptions {
            no_local: false,
            no_ack: false,
            exclusive: false,
            nowait: false,
        };
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, options, FieldTable::default())
            .await?;
        debug!("consuming {queue} as {consumer_tag}");

        let closed = self.closed.clone();
        let deliveries = futures::stream::unfold(
            (consumer, closed),
            |(mut consumer, closed)| async move {
                match consumer.next().await {
                    Some(Ok(delivery)) => {
                        let delivery = Delivery::new(delivery.data, AmqpAcker(delivery.acker));
                        Some((delivery, (consumer, closed)))
                    },
                    Some(Err(err)) => {
                        closed.close(close_error(&err));
                        None
                    },
                    None => {
                        closed.close(CloseError::new("consumer cancelled", true));
                        None
                    },
                }
            },
        );
        Ok(deliveries.boxed())
    }

    fn notify_close(&self) -> oneshot::Receiver<CloseError> {
        self.closed.subscribe()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.channel.close(REPLY_SUCCESS, "closing").await?;
        Ok(())
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledge for AmqpAcker {
    async fn ack(&self, multiple: bool) -> Result<(), BrokerError> {
        self.0.ack(BasicAckOptions { multiple }).await?;
        Ok(())
    }
}

/// Protocol exceptions mean the server rejected something we did, so retrying right away will
/// most likely fail the same way. Everything else is transport trouble.
fn close_error(err: &lapin::Error) -> CloseError {
    let recover = !matches!(err, lapin::Error::ProtocolError(_));
    CloseError::new(err.to_string(), recover)
}
