use crate::{BrokerError, Handle};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use lapin::{Channel, Connection, ConnectionProperties, Error as LapinError};
use secure_string::SecureString;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::select;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use yosun_sync::Latch;
use yosun_util::Backoff;

/// How many connections are discarded between two sweeps of the background
/// closing tasks.
const DISCARDS_BETWEEN_SWEEPS: usize = 10;

/// Maintains at most one live connection to the RabbitMQ cluster identified by
/// a [`Handle`], and hands out fresh [`Channel`]s opened on it.
///
/// Whenever a channel cannot be opened, the current connection is discarded
/// (closed in the background) and a new one is established, with an
/// exponential backoff between failed attempts. Channel acquisition is
/// serialized: concurrent callers queue up behind the connection lock instead
/// of opening connections of their own.
///
/// Once [closed](Connector::close), the connector refuses to hand out channels.
pub struct Connector {
    name: Arc<str>,
    identifier: Arc<str>,
    dsn: SecureString,
    connection: AsyncMutex<Option<Connection>>,
    discarded: AsyncMutex<FuturesUnordered<JoinHandle<()>>>,
    discarded_count: AtomicUsize,
    backoff: Backoff,
    closed: Latch,
}

impl Connector {
    /// Creates a connector for the given [`Handle`]. No connection is made
    /// until the first channel is requested.
    pub fn new(handle: impl AsRef<Handle>) -> Self {
        let handle = handle.as_ref();

        Self {
            name: Self::compose_name(handle),
            identifier: Arc::from(handle.identifier()),
            dsn: handle.dsn().clone(),
            connection: AsyncMutex::new(None),
            discarded: AsyncMutex::new(FuturesUnordered::new()),
            discarded_count: AtomicUsize::new(0),
            backoff: Backoff::new(handle.backoff()),
            closed: Latch::new(),
        }
    }

    fn compose_name(handle: &Handle) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "yosun:connector:{}:{}",
            handle.name(),
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }

    /// Reports the unique name of this connector.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reports the identifier of the underlying [`Handle`].
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl Connector {
    /// Opens a fresh [`Channel`], (re)connecting as many times as it takes.
    ///
    /// Depending on the availability of the broker this may wait indefinitely.
    /// Fails only once this connector is [closed](Connector::close).
    pub async fn channel(&self) -> Result<Channel, BrokerError> {
        let gate = self.closed.gate();

        if gate.is_open() {
            return Err(BrokerError::Closed);
        }

        select! {
            biased;
            _ = gate.opened() => Err(BrokerError::Closed),
            channel = self.anticipate_channel() => Ok(channel),
        }
    }

    /// Same as [`channel`](Connector::channel), but gives up with
    /// [`BrokerError::Unavailable`] once the `timeout` elapses.
    pub async fn channel_with_timeout(&self, timeout: Duration) -> Result<Channel, BrokerError> {
        match tokio::time::timeout(timeout, self.channel()).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Unavailable(format!(
                "no channel obtained within {:?}",
                timeout,
            ))),
        }
    }

    /// Stops handing out channels, closes the current connection, and waits
    /// for every discarded connection to finish closing.
    pub async fn close(&self) {
        self.closed.release();

        info!(
            name = self.name.as_ref(),
            identifier = self.identifier.as_ref(),
            "Closing the RabbitMQ connection",
        );

        let current = self.connection.lock().await.take();
        if let Some(connection) = current {
            self.discard_connection(connection).await;
        }

        self.sweep_discarded().await;
    }

    /// Reports whether [`close`](Connector::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_released()
    }
}

impl Connector {
    async fn anticipate_channel(&self) -> Channel {
        let mut guard = self.connection.lock().await;
        let mut current = guard.take();

        loop {
            let Some(connection) = current.take() else {
                current = self.establish_connection().await;
                continue;
            };

            match connection.create_channel().await {
                Ok(channel) => {
                    self.backoff.reset();
                    *guard = Some(connection);

                    return channel;
                }
                Err(error) => {
                    warn!(
                        name = self.name.as_ref(),
                        identifier = self.identifier.as_ref(),
                        ?error,
                        error_message = %error,
                        "Failed to create a RabbitMQ channel",
                    );

                    self.discard_connection(connection).await;
                    self.backoff.sleep_next().await;
                }
            }
        }
    }

    async fn establish_connection(&self) -> Option<Connection> {
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        match Connection::connect(self.dsn.unsecure(), properties).await {
            Ok(connection) => {
                info!(
                    name = self.name.as_ref(),
                    identifier = self.identifier.as_ref(),
                    "Connected to RabbitMQ",
                );

                Some(connection)
            }
            Err(error) => {
                warn!(
                    name = self.name.as_ref(),
                    identifier = self.identifier.as_ref(),
                    ?error,
                    error_message = %error,
                    "Failed to establish a RabbitMQ connection",
                );

                self.backoff.sleep_next().await;

                None
            }
        }
    }

    /// Sends the connection off to be closed in the background. Every so
    /// often, also waits out the accumulated closing tasks.
    async fn discard_connection(&self, connection: Connection) {
        let task = tokio::spawn(Self::close_connection(
            self.name.clone(),
            self.identifier.clone(),
            connection,
        ));

        self.discarded.lock().await.push(task);

        let count = self.discarded_count.fetch_add(1, Ordering::Relaxed);
        if count % DISCARDS_BETWEEN_SWEEPS == 0 {
            self.sweep_discarded().await;
        }
    }

    async fn sweep_discarded(&self) {
        let mut discarded = self.discarded.lock().await;

        while discarded.next().await.is_some() {}
    }

    async fn close_connection(name: Arc<str>, identifier: Arc<str>, connection: Connection) {
        match connection.close(0, "Discarded connection").await {
            Ok(()) => info!(
                name = name.as_ref(),
                identifier = identifier.as_ref(),
                "Closed a discarded RabbitMQ connection",
            ),
            Err(LapinError::InvalidConnectionState(_) | LapinError::InvalidChannelState(_)) => {
                info!(
                    name = name.as_ref(),
                    identifier = identifier.as_ref(),
                    "Discarded a previously lost RabbitMQ connection",
                )
            }
            Err(error) => warn!(
                name = name.as_ref(),
                identifier = identifier.as_ref(),
                ?error,
                error_message = %error,
                "Failed to cleanly close a discarded RabbitMQ connection",
            ),
        }
    }
}
