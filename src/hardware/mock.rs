//! Simulated GQ EMF-390 for running without hardware.
//!
//! [`MockInstrument`] answers the wire commands over an in-memory duplex stream, the same
//! way the meter answers over USB serial. Each command has a scripted reply sequence; the
//! last entry repeats once the sequence is exhausted. [`MockConnector`] hands the poller a
//! fresh stream per connect and can be told to refuse connects. The instrument counts how
//! often the host hung up, so tests can check that connections are released.
//!
//! # Example
//!
//! ```rust,ignore
//! use emf_daq::hardware::mock::{MockConnector, MockInstrument, MockReply};
//! use emf_daq::instrument::Command;
//!
//! let instrument = MockInstrument::new()
//!     .with_reply(Command::Emf, "EMF = 1.23")
//!     .with_sequence(Command::Ef, vec![MockReply::Silent, MockReply::Text("EF = 4.0".into())]);
//! let connector = MockConnector::new(instrument.clone());
//! ```

use crate::error::{AppResult, DaqError};
use crate::hardware::serial::DynStream;
use crate::hardware::session::Connector;
use crate::instrument::command::Command;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, trace};

/// Buffer size of the simulated line.
const LINE_BUFFER: usize = 1024;

/// What the simulated device does when it receives a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Answer with this text followed by CR LF.
    Text(String),
    /// Say nothing; the host sees an empty reply.
    Silent,
    /// Stop answering for good; the host reads EOF. The device keeps listening until
    /// the host releases the line.
    Disconnect,
}

#[derive(Debug, Default)]
struct MockState {
    replies: HashMap<Command, VecDeque<MockReply>>,
    received: Vec<Command>,
    connections: u32,
    hangups: u32,
    refused_connects: u32,
    connection_limit: Option<u32>,
}

impl MockState {
    fn next_reply(&mut self, command: Command) -> MockReply {
        match self.replies.get_mut(&command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(MockReply::Silent),
            Some(queue) => queue.front().cloned().unwrap_or(MockReply::Silent),
            None => MockReply::Silent,
        }
    }
}

/// Scripted instrument. Clones share one script and one command log.
#[derive(Debug, Clone)]
pub struct MockInstrument {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockInstrument {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInstrument {
    /// Instrument with plausible readings for every command.
    pub fn new() -> Self {
        let instrument = Self {
            state: Arc::new(Mutex::new(MockState::default())),
        };
        instrument
            .with_reply(Command::Emf, "EMF = 0.4 mG")
            .with_reply(Command::Ef, "EF = 3.2 V/m")
            .with_reply(Command::RfBand, "-62.5,-58.1,-71.0,-66.4,-60.2 dBm")
            .with_reply(Command::Mode, "RF Peak")
            .with_reply(Command::Version, "GQ-EMF390v2Re 1.04")
    }

    /// Always answer `command` with `text`.
    pub fn with_reply(self, command: Command, text: impl Into<String>) -> Self {
        self.with_sequence(command, vec![MockReply::Text(text.into())])
    }

    /// Answer `command` with `replies` in order, repeating the last one.
    pub fn with_sequence(self, command: Command, replies: Vec<MockReply>) -> Self {
        self.lock().replies.insert(command, replies.into());
        self
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().refused_connects = count;
    }

    /// Refuse every connect once `total` connections have been made.
    pub fn limit_connections(&self, total: u32) {
        self.lock().connection_limit = Some(total);
    }

    /// Commands received so far, across all connections.
    pub fn received(&self) -> Vec<Command> {
        self.lock().received.clone()
    }

    /// Number of successful connections.
    pub fn connections(&self) -> u32 {
        self.lock().connections
    }

    /// Number of connections the host closed.
    pub fn hangups(&self) -> u32 {
        self.lock().hangups
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve one connection until the host hangs up.
    async fn serve(self, mut line: DuplexStream) {
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0u8; 256];
        let mut answering = true;

        loop {
            let n = match line.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if !answering {
                continue;
            }
            pending.extend_from_slice(&buf[..n]);

            while let Some(end) = pending.windows(2).position(|w| w == b">>") {
                let frame: Vec<u8> = pending.drain(..end + 2).collect();
                let Some(command) = Command::ALL
                    .into_iter()
                    .find(|command| frame.ends_with(command.wire()))
                else {
                    debug!(frame = %String::from_utf8_lossy(&frame), "Simulated device ignored unknown frame");
                    continue;
                };

                let reply = {
                    let mut state = self.lock();
                    state.received.push(command);
                    state.next_reply(command)
                };
                trace!(command = %command, ?reply, "Simulated device reply");

                match reply {
                    MockReply::Text(text) => {
                        let wire = format!("{text}\r\n");
                        if line.write_all(wire.as_bytes()).await.is_err() {
                            answering = false;
                        }
                    }
                    MockReply::Silent => {}
                    MockReply::Disconnect => {
                        let _ = line.shutdown().await;
                        answering = false;
                    }
                }
                if !answering {
                    pending.clear();
                    break;
                }
            }
        }

        self.lock().hangups += 1;
        trace!("Host released the simulated line");
    }
}

/// [`Connector`] that plugs into a [`MockInstrument`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    instrument: MockInstrument,
    endpoint: String,
}

impl MockConnector {
    /// Connector for `instrument` at the endpoint `mock://gq-emf390`.
    pub fn new(instrument: MockInstrument) -> Self {
        Self {
            instrument,
            endpoint: "mock://gq-emf390".to_string(),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> AppResult<DynStream> {
        {
            let mut state = self.instrument.lock();
            if state.refused_connects > 0 {
                state.refused_connects -= 1;
                return Err(DaqError::Connection {
                    endpoint: self.endpoint.clone(),
                    source: io::Error::new(io::ErrorKind::NotFound, "simulated device unavailable"),
                });
            }
            if state
                .connection_limit
                .is_some_and(|limit| state.connections >= limit)
            {
                return Err(DaqError::Connection {
                    endpoint: self.endpoint.clone(),
                    source: io::Error::new(io::ErrorKind::NotFound, "simulated device unplugged"),
                });
            }
            state.connections += 1;
        }

        let (host, device) = tokio::io::duplex(LINE_BUFFER);
        tokio::spawn(self.instrument.clone().serve(device));
        Ok(Box::new(host))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
