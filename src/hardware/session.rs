//! Transport session: send-and-wait-for-reply over one owned byte stream.
//!
//! The instrument has no terminator and no length prefix, so every exchange follows the
//! same settle-then-drain sequence:
//!
//! 1. discard whatever is sitting in the OS buffers, then drain anything still trickling in
//! 2. write the command bytes and flush
//! 3. sleep for the settle delay
//! 4. collect bytes until the line has been quiet for `idle_gap` (bounded by the timeout)
//! 5. decode lossily and trim
//!
//! Streams are obtained through a [`Connector`] so that a reconnect can reopen the same
//! endpoint and tests can substitute a simulated device.

use crate::config::DeviceConfig;
use crate::error::{AppResult, DaqError};
use crate::hardware::serial::{drain_serial_buffer, read_available, DynStream};
use crate::instrument::command::Command;
use crate::instrument::parser::RawReply;
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Opens streams to one endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh stream.
    ///
    /// # Errors
    ///
    /// [`DaqError::Connection`] carrying the underlying cause.
    async fn connect(&self) -> AppResult<DynStream>;

    /// Endpoint description used in logs and errors (the port path for serial devices).
    fn endpoint(&self) -> &str;
}

/// Connector for a physical serial port.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialConnector {
    /// Connector for `port` at `baud_rate`, 8N1.
    pub fn new(port: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            timeout,
        }
    }

    /// Connector built from the `[device]` section.
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.port.clone(), config.baud_rate, config.timeout)
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self) -> AppResult<DynStream> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = crate::hardware::serial::open_serial_async(
                &self.port,
                self.baud_rate,
                self.timeout,
            )
            .await
            .map_err(|source| DaqError::Connection {
                endpoint: self.port.clone(),
                source,
            })?;
            Ok(Box::new(port))
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = (self.baud_rate, self.timeout);
            Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    fn endpoint(&self) -> &str {
        &self.port
    }
}

/// Delays governing one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Upper bound for the write plus the read.
    pub timeout: Duration,
    /// Pause between writing and reading.
    pub settle_delay: Duration,
    /// Quiet period that ends a reply.
    pub idle_gap: Duration,
}

impl From<&DeviceConfig> for SessionTiming {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            timeout: config.timeout,
            settle_delay: config.settle_delay,
            idle_gap: config.idle_gap,
        }
    }
}

/// Exclusive owner of the instrument connection.
pub struct TransportSession {
    connector: Box<dyn Connector>,
    timing: SessionTiming,
    stream: Option<DynStream>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("endpoint", &self.connector.endpoint())
            .field("timing", &self.timing)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl TransportSession {
    /// Open a session. The caller decides whether to retry on failure.
    ///
    /// # Errors
    ///
    /// Whatever the connector reports, normally [`DaqError::Connection`].
    pub async fn open(connector: Box<dyn Connector>, timing: SessionTiming) -> AppResult<Self> {
        let stream = connector.connect().await?;
        info!(endpoint = connector.endpoint(), "Opened instrument connection");
        Ok(Self {
            connector,
            timing,
            stream: Some(stream),
        })
    }

    /// True until [`TransportSession::close`] is called.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Endpoint this session talks to.
    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    /// Exchange timing.
    pub fn timing(&self) -> SessionTiming {
        self.timing
    }

    /// Send raw command bytes and return whatever the device answered.
    ///
    /// An empty reply is not an error here; the parser decides what silence means.
    ///
    /// # Errors
    ///
    /// - [`DaqError::NotConnected`] if the session is closed
    /// - [`DaqError::Transport`] if the stream fails, the write times out, or the
    ///   device hung up
    #[instrument(skip(self, command), fields(endpoint = %self.connector.endpoint()), err)]
    pub async fn exchange(&mut self, command: &[u8]) -> AppResult<RawReply> {
        let timing = self.timing;
        let stream = self.stream.as_mut().ok_or(DaqError::NotConnected)?;

        stream.discard_buffers()?;
        let stale = drain_serial_buffer(stream, timing.idle_gap).await;
        if stale > 0 {
            debug!(bytes = stale, "Discarded stale bytes before command");
        }

        tokio::time::timeout(timing.timeout, async {
            stream.write_all(command).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "Timed out writing command"))??;

        tokio::time::sleep(timing.settle_delay).await;

        let limit = timing.timeout.saturating_sub(timing.settle_delay);
        let bytes = read_available(stream, timing.idle_gap, limit).await?;
        let reply = RawReply::from_bytes(&bytes);

        debug!(
            command = %String::from_utf8_lossy(command),
            reply = %reply,
            bytes = bytes.len(),
            "Exchange complete"
        );
        Ok(reply)
    }

    /// Exchange the wire bytes of a known command.
    pub async fn query(&mut self, command: Command) -> AppResult<RawReply> {
        self.exchange(command.wire()).await
    }

    /// Drop the current stream and open a new one through the same connector.
    ///
    /// # Errors
    ///
    /// The connector's error. The session stays closed in that case.
    pub async fn reconnect(&mut self) -> AppResult<()> {
        self.close().await;
        let stream = self.connector.connect().await?;
        self.stream = Some(stream);
        info!(endpoint = self.connector.endpoint(), "Reopened instrument connection");
        Ok(())
    }

    /// Release the stream. Calling this on a closed session does nothing.
    pub async fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        if let Err(e) = stream.shutdown().await {
            warn!(endpoint = self.connector.endpoint(), error = %e, "Error while closing stream");
        }
        info!(endpoint = self.connector.endpoint(), "Closed instrument connection");
    }
}
