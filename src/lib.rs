//! # EMF DAQ Core Library
//!
//! This crate is the core library for the `emf_daq` poller. It talks to a GQ EMF-390
//! environmental meter over USB serial, turns its loosely structured replies into typed
//! readings, reduces RF band sweeps to summary statistics and forwards timestamped data
//! points to a time-series sink. The binary (`main.rs`) only wires configuration, logging
//! and signal handling around it.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered configuration (defaults, TOML file, environment, CLI overrides)
//!   loaded with `figment`. See `config::AppConfig`.
//! - **`error`**: The `DaqError` enum plus the recoverable `ParseFailure` and `PublishError`.
//! - **`hardware`**: The byte-stream layer (`serial`), the transport session with its
//!   settle-then-drain exchange (`session`) and a simulated instrument (`mock`).
//! - **`instrument`**: The closed command table and the reply parser.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`measurement`**: Data points, line protocol and band-sweep statistics.
//! - **`poller`**: The fixed-interval collection loop.
//! - **`sink`**: Sink publishers (InfluxDB HTTP write API, log-only).
//!
//! ## Data Flow
//!
//! ```text
//! TelemetryPoller ──▶ TransportSession ──▶ parse_reply ──▶ [aggregate] ──▶ SinkPublisher
//! ```

pub mod config;
pub mod error;
pub mod hardware;
pub mod instrument;
pub mod logging;
pub mod measurement;
pub mod poller;
pub mod sink;

pub use error::{AppResult, DaqError};
pub use poller::{PollerSettings, PollerState, TelemetryPoller, TickReport};
