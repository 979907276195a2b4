//! Telemetry poller.
//!
//! Drives the fixed-interval collection loop:
//!
//! ```text
//! Idle ──connect──▶ Connecting ──▶ Polling ◀──┐
//!                        │            │        │ reopened
//!                        ▼            ▼        │
//!                     Stopped ◀── Reconnecting ┘
//! ```
//!
//! Each tick captures one timestamp, issues the configured commands strictly in order,
//! parses every reply, reduces band sweeps to five aggregate points and hands every point
//! to the sink. A parse failure, a transport error or a rejected publish costs exactly
//! the affected value; the tick carries on with the rest. Only a failed initial connect
//! or an exhausted reconnect ends the loop with an error.

use crate::config::AppConfig;
use crate::error::{AppResult, DaqError};
use crate::hardware::session::{Connector, SessionTiming, TransportSession};
use crate::instrument::command::Command;
use crate::instrument::parser::{parse_reply, Reading};
use crate::measurement::{AggregateStats, DataPoint, FieldValue};
use crate::sink::SinkPublisher;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of a [`TelemetryPoller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Constructed, no connection attempted.
    Idle,
    /// Opening the device.
    Connecting,
    /// Connected and ticking.
    Polling,
    /// Reopening the device after a transport error.
    Reconnecting,
    /// Connection released; the poller will not tick again.
    Stopped,
}

impl fmt::Display for PollerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollerState::Idle => "idle",
            PollerState::Connecting => "connecting",
            PollerState::Polling => "polling",
            PollerState::Reconnecting => "reconnecting",
            PollerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What the poll loop does each tick.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Sleep between ticks.
    pub interval: Duration,
    /// Commands issued each tick, in order.
    pub commands: Vec<Command>,
    /// Tag band-sweep aggregates with the current mode.
    pub tag_mode: bool,
    /// Reopen attempts after a transport error.
    pub max_reconnect_attempts: u32,
    /// Measurement name for every point.
    pub measurement: String,
    /// Tags attached to every point.
    pub base_tags: BTreeMap<String, String>,
}

impl PollerSettings {
    /// Settings from the `[poller]` and `[sink]` sections.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: config.poller.interval,
            commands: config.poller.commands.clone(),
            tag_mode: config.poller.tag_mode,
            max_reconnect_attempts: config.poller.max_reconnect_attempts,
            measurement: config.sink.measurement.clone(),
            base_tags: config.sink.tags.clone(),
        }
    }

    /// Data points for one reading.
    ///
    /// Scalars and text become one point named after the command's field. A band sweep
    /// becomes `<field>_max`, `_min`, `_mean`, `_median` and `_stddev`, tagged with the
    /// mode when one is known.
    pub fn points_for(
        &self,
        command: Command,
        reading: &Reading,
        mode: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Vec<DataPoint> {
        let point = |field: String, value: FieldValue| {
            DataPoint::new(self.measurement.as_str(), field, value, timestamp).with_tags(&self.base_tags)
        };

        match reading {
            Reading::Scalar(value) => vec![point(command.field().to_string(), FieldValue::Float(*value))],
            Reading::Text(text) => vec![point(command.field().to_string(), FieldValue::Text(text.clone()))],
            Reading::Vector(samples) => {
                let Some(stats) = AggregateStats::from_samples(samples) else {
                    return Vec::new();
                };
                stats
                    .fields()
                    .into_iter()
                    .map(|(suffix, value)| {
                        let p = point(format!("{}_{suffix}", command.field()), FieldValue::Float(value));
                        match mode.filter(|m| !m.is_empty()) {
                            Some(mode) => p.with_tag("mode", mode),
                            None => p,
                        }
                    })
                    .collect()
            }
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Timestamp shared by every point of the tick.
    pub timestamp: DateTime<Utc>,
    /// Points built.
    pub emitted: usize,
    /// Points the sink accepted.
    pub published: usize,
    /// Replies that did not parse.
    pub parse_failures: usize,
    /// Points the sink rejected.
    pub publish_failures: usize,
    /// Exchanges that failed at the transport level.
    pub transport_failures: usize,
}

impl TickReport {
    fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            emitted: 0,
            published: 0,
            parse_failures: 0,
            publish_failures: 0,
            transport_failures: 0,
        }
    }
}

/// The collection loop. Owns the transport session exclusively.
pub struct TelemetryPoller {
    settings: PollerSettings,
    timing: SessionTiming,
    connector: Option<Box<dyn Connector>>,
    session: Option<TransportSession>,
    sink: Box<dyn SinkPublisher>,
    state: PollerState,
    stop_rx: Option<watch::Receiver<bool>>,
    firmware: Option<String>,
    ticks: u64,
}

impl fmt::Debug for TelemetryPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryPoller")
            .field("state", &self.state)
            .field("session", &self.session)
            .field("sink", &self.sink.name())
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl TelemetryPoller {
    /// Create an idle poller. Nothing is opened until [`TelemetryPoller::connect`].
    pub fn new(
        connector: Box<dyn Connector>,
        timing: SessionTiming,
        sink: Box<dyn SinkPublisher>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            settings,
            timing,
            connector: Some(connector),
            session: None,
            sink,
            state: PollerState::Idle,
            stop_rx: None,
            firmware: None,
            ticks: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Firmware version reported at startup, if the banner was read.
    pub fn firmware(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    /// Open the device and read the firmware banner.
    ///
    /// There is no retry here: the instrument is a required, directly wired peripheral.
    ///
    /// # Errors
    ///
    /// The connector's error, normally [`DaqError::Connection`]. The poller is then
    /// [`PollerState::Stopped`].
    pub async fn connect(&mut self) -> AppResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let Some(connector) = self.connector.take() else {
            return Err(DaqError::NotConnected);
        };

        self.state = PollerState::Connecting;
        let endpoint = connector.endpoint().to_string();
        info!(endpoint = %endpoint, "Connecting to instrument");

        match TransportSession::open(connector, self.timing).await {
            Ok(session) => {
                self.session = Some(session);
                self.state = PollerState::Polling;
            }
            Err(e) => {
                self.state = PollerState::Stopped;
                return Err(e);
            }
        }

        self.read_firmware().await;
        Ok(())
    }

    async fn read_firmware(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.query(Command::Version).await {
            Ok(raw) => {
                if let Ok(Reading::Text(version)) = parse_reply(Command::Version, &raw) {
                    if version.is_empty() {
                        warn!("Instrument did not report a firmware version");
                    } else {
                        info!(firmware = %version, "Connected to GQ EMF-390");
                        self.firmware = Some(version);
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not read firmware version"),
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop_rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run one tick: query, parse, aggregate, publish.
    ///
    /// # Errors
    ///
    /// Only fatal conditions: [`DaqError::NotConnected`] if called before
    /// [`TelemetryPoller::connect`], or [`DaqError::Connection`] once reconnecting has
    /// been exhausted. Everything else is counted in the report. Points collected before
    /// a fatal error are still handed to the sink.
    #[instrument(skip(self), fields(tick = self.ticks + 1))]
    pub async fn poll_once(&mut self) -> AppResult<TickReport> {
        if self.session.is_none() {
            return Err(DaqError::NotConnected);
        }
        self.ticks += 1;

        let timestamp = Utc::now();
        let mut report = TickReport::new(timestamp);
        let mut mode: Option<String> = None;
        let mut points = Vec::new();
        let mut fatal = None;

        let commands = self.settings.commands.clone();
        for command in commands {
            if self.stop_requested() {
                debug!(command = %command, "Shutdown requested, abandoning tick");
                break;
            }

            match self.collect(command, &mut mode, &mut report, timestamp).await {
                Ok(new_points) => points.extend(new_points),
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            }
        }

        report.emitted = points.len();
        for point in &points {
            match self.sink.publish(point).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    let e = DaqError::from(e);
                    warn!(sink = self.sink.name(), error = %e, "Publish failed, skipping point");
                    report.publish_failures += 1;
                }
            }
        }

        match fatal {
            Some(e) => {
                if report.published > 0 {
                    info!(published = report.published, "Published partial tick before stopping");
                }
                Err(e)
            }
            None => Ok(report),
        }
    }

    /// Points for one command, fetching the companion mode for a band sweep.
    async fn collect(
        &mut self,
        command: Command,
        mode: &mut Option<String>,
        report: &mut TickReport,
        timestamp: DateTime<Utc>,
    ) -> AppResult<Vec<DataPoint>> {
        let reading = if command == Command::Mode {
            self.mode(mode, report).await?.map(Reading::Text)
        } else {
            self.read(command, report).await?
        };
        let Some(reading) = reading else {
            return Ok(Vec::new());
        };

        let tag = if matches!(reading, Reading::Vector(_)) && self.settings.tag_mode {
            self.mode(mode, report).await?
        } else {
            None
        };

        Ok(self
            .settings
            .points_for(command, &reading, tag.as_deref(), timestamp))
    }

    /// Mode text for this tick. Only a successful read is kept, so a read lost to a
    /// transport error is retried by the next command that needs it.
    async fn mode(
        &mut self,
        cache: &mut Option<String>,
        report: &mut TickReport,
    ) -> AppResult<Option<String>> {
        if cache.is_none() {
            if let Some(Reading::Text(text)) = self.read(Command::Mode, report).await? {
                *cache = Some(text);
            }
        }
        Ok(cache.clone())
    }

    /// Exchange and parse one command. `Ok(None)` means the value was skipped.
    async fn read(&mut self, command: Command, report: &mut TickReport) -> AppResult<Option<Reading>> {
        let session = self.session.as_mut().ok_or(DaqError::NotConnected)?;

        match session.query(command).await {
            Ok(raw) => match parse_reply(command, &raw) {
                Ok(reading) => Ok(Some(reading)),
                Err(failure) => {
                    warn!("{failure}");
                    report.parse_failures += 1;
                    Ok(None)
                }
            },
            Err(DaqError::Transport(e)) => {
                warn!(command = %command, error = %e, "Transport error, skipping reading");
                report.transport_failures += 1;
                self.reconnect().await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn reconnect(&mut self) -> AppResult<()> {
        let session = self.session.as_mut().ok_or(DaqError::NotConnected)?;
        self.state = PollerState::Reconnecting;

        let attempts = self.settings.max_reconnect_attempts;
        let mut last_error = None;
        for attempt in 1..=attempts {
            info!(attempt, attempts, endpoint = session.endpoint(), "Reconnecting to instrument");
            match session.reconnect().await {
                Ok(()) => {
                    self.state = PollerState::Polling;
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        error!(attempts, endpoint = session.endpoint(), "Instrument unavailable, giving up");
        Err(last_error.unwrap_or_else(|| DaqError::Connection {
            endpoint: session.endpoint().to_string(),
            source: io::Error::new(io::ErrorKind::NotConnected, "connection lost and reconnecting is disabled"),
        }))
    }

    /// Release the connection and stop. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.close().await;
        }
        self.session = None;
        self.state = PollerState::Stopped;
    }

    /// Connect if needed, then tick until `shutdown` turns true or a fatal error occurs.
    ///
    /// The connection is closed before returning, whichever way the loop ended.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> AppResult<()> {
        self.stop_rx = Some(shutdown.clone());
        let result = self.run_loop(shutdown).await;
        self.shutdown().await;

        match &result {
            Ok(()) => info!(ticks = self.ticks, "Poller stopped"),
            Err(e) => error!(ticks = self.ticks, error = %e, "Poller stopped on fatal error"),
        }
        result
    }

    async fn run_loop(&mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        self.connect().await?;
        info!(
            interval = ?self.settings.interval,
            commands = ?self.settings.commands,
            sink = self.sink.name(),
            "Polling started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.poll_once().await?;
            info!(
                published = report.published,
                emitted = report.emitted,
                parse_failures = report.parse_failures,
                publish_failures = report.publish_failures,
                transport_failures = report.transport_failures,
                "Tick complete"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                changed = shutdown.changed() => {
                    // A dropped sender can never signal again
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

/// One command's result in a [`snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotEntry {
    /// Command issued.
    pub command: Command,
    /// Unit label of the reading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    /// Parsed reading, absent on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading: Option<Reading>,
    /// Aggregate of a band sweep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<AggregateStats>,
    /// Why the reading is missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Issue each command once and collect the results, for one-shot queries.
///
/// Failures are recorded per entry and never stop the remaining commands.
pub async fn snapshot(session: &mut TransportSession, commands: &[Command]) -> Vec<SnapshotEntry> {
    let mut entries = Vec::with_capacity(commands.len());
    for &command in commands {
        let result = match session.query(command).await {
            Ok(raw) => parse_reply(command, &raw).map_err(DaqError::from),
            Err(e) => Err(e),
        };
        let (reading, error) = match result {
            Ok(reading) => (Some(reading), None),
            Err(e) => {
                warn!(command = %command, error = %e, "Query failed");
                (None, Some(e.to_string()))
            }
        };
        entries.push(SnapshotEntry {
            command,
            unit: command.unit(),
            stats: reading
                .as_ref()
                .and_then(Reading::as_vector)
                .and_then(AggregateStats::from_samples),
            reading,
            error,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockConnector, MockInstrument};
    use crate::sink::LogSink;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn timing() -> SessionTiming {
        SessionTiming {
            timeout: Duration::from_millis(300),
            settle_delay: Duration::from_millis(5),
            idle_gap: Duration::from_millis(15),
        }
    }

    #[test]
    fn test_scalar_point_carries_base_tags() {
        let settings = PollerSettings::default();
        let points = settings.points_for(Command::Emf, &Reading::Scalar(1.23), None, ts());

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].field(), "emf_value");
        assert_eq!(points[0].value(), &FieldValue::Float(1.23));
        assert_eq!(points[0].measurement(), "emf390_data");
        assert_eq!(points[0].tags()["device"], "gq_emf390");
    }

    #[test]
    fn test_band_sweep_yields_five_tagged_points() {
        let settings = PollerSettings::default();
        let reading = Reading::Vector(vec![-40.0, -45.5, -38.2]);
        let points = settings.points_for(Command::RfBand, &reading, Some("RF Peak"), ts());

        let fields: Vec<_> = points.iter().map(DataPoint::field).collect();
        assert_eq!(
            fields,
            ["rf_band_max", "rf_band_min", "rf_band_mean", "rf_band_median", "rf_band_stddev"]
        );
        assert!(points.iter().all(|p| p.tags()["mode"] == "RF Peak"));
        assert!(points.iter().all(|p| p.timestamp() == ts()));
        assert_eq!(points[0].value(), &FieldValue::Float(-38.2));
    }

    #[test]
    fn test_empty_mode_is_not_a_tag() {
        let settings = PollerSettings::default();
        let points = settings.points_for(Command::RfBand, &Reading::Vector(vec![-50.0]), Some(""), ts());
        assert_eq!(points.len(), 5);
        assert!(points.iter().all(|p| !p.tags().contains_key("mode")));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let instrument = MockInstrument::new();
        let mut poller = TelemetryPoller::new(
            Box::new(MockConnector::new(instrument)),
            timing(),
            Box::new(LogSink),
            PollerSettings::default(),
        );
        assert_eq!(poller.state(), PollerState::Idle);
        assert!(matches!(poller.poll_once().await, Err(DaqError::NotConnected)));

        poller.connect().await.unwrap();
        assert_eq!(poller.state(), PollerState::Polling);
        assert_eq!(poller.firmware(), Some("1.04"));

        poller.shutdown().await;
        assert_eq!(poller.state(), PollerState::Stopped);
        poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_connect_stops_poller() {
        let instrument = MockInstrument::new();
        instrument.fail_next_connects(1);
        let mut poller = TelemetryPoller::new(
            Box::new(MockConnector::new(instrument)),
            timing(),
            Box::new(LogSink),
            PollerSettings::default(),
        );

        let err = poller.connect().await.unwrap_err();
        assert!(matches!(err, DaqError::Connection { .. }));
        assert_eq!(poller.state(), PollerState::Stopped);
    }

    #[tokio::test]
    async fn test_snapshot_reports_each_command() {
        let instrument = MockInstrument::new().with_reply(Command::Ef, "ERR");
        let mut session = TransportSession::open(Box::new(MockConnector::new(instrument)), timing())
            .await
            .unwrap();

        let entries = snapshot(&mut session, &Command::ALL).await;
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].reading, Some(Reading::Scalar(0.4)));
        assert_eq!(entries[0].unit, Some("mG"));
        assert!(entries[1].reading.is_none());
        assert!(entries[1].error.as_deref().unwrap().contains("raw='ERR'"));
        assert_eq!(entries[2].stats.unwrap().max, -58.1);
        assert_eq!(entries[4].reading, Some(Reading::Text("1.04".into())));

        let json = serde_json::to_value(&entries[0]).unwrap();
        assert_eq!(json["command"], "emf");
        assert_eq!(json["reading"]["value"], 0.4);
        session.close().await;
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PollerState::Reconnecting.to_string(), "reconnecting");
    }
}
