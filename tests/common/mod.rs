//! Shared fixtures for the poller integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use emf_daq::error::PublishError;
use emf_daq::hardware::{MockConnector, MockInstrument, SessionTiming};
use emf_daq::instrument::Command;
use emf_daq::measurement::DataPoint;
use emf_daq::sink::SinkPublisher;
use emf_daq::{PollerSettings, TelemetryPoller};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sink that keeps every accepted point and rejects chosen publish attempts.
#[derive(Clone, Default)]
pub struct RecordingSink {
    points: Arc<Mutex<Vec<DataPoint>>>,
    attempts: Arc<Mutex<usize>>,
    reject: Arc<Mutex<HashSet<usize>>>,
}

impl RecordingSink {
    /// Reject the `n`th publish attempt (1-based, counted across ticks).
    pub fn reject_attempt(&self, n: usize) {
        self.reject.lock().unwrap().insert(n);
    }

    pub fn points(&self) -> Vec<DataPoint> {
        self.points.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl SinkPublisher for RecordingSink {
    async fn publish(&self, point: &DataPoint) -> Result<(), PublishError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if self.reject.lock().unwrap().contains(&attempt) {
            return Err(PublishError {
                field: point.field().to_string(),
                message: "http 503 Service Unavailable: overloaded".to_string(),
                status: Some(503),
            });
        }
        self.points.lock().unwrap().push(point.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

pub fn fast_timing() -> SessionTiming {
    SessionTiming {
        timeout: Duration::from_millis(300),
        settle_delay: Duration::from_millis(5),
        idle_gap: Duration::from_millis(15),
    }
}

pub fn settings(commands: &[Command]) -> PollerSettings {
    PollerSettings {
        interval: Duration::from_millis(20),
        commands: commands.to_vec(),
        ..PollerSettings::default()
    }
}

pub fn poller(
    instrument: &MockInstrument,
    sink: &RecordingSink,
    settings: PollerSettings,
) -> TelemetryPoller {
    TelemetryPoller::new(
        Box::new(MockConnector::new(instrument.clone())),
        fast_timing(),
        Box::new(sink.clone()),
        settings,
    )
}

/// Wait until the simulated device has seen the host release `count` connections.
pub async fn wait_for_hangups(instrument: &MockInstrument, count: u32) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while instrument.hangups() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection was never released");
}
