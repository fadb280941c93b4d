// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Rig Simulator
// ─────────────────────────────────────────────────────────────────────
//! Measurement side of the point-query protocol.
//!
//! Answers every `move_point` command on the device's command topic by
//! evaluating a [`MeasurementOracle`] and publishing the feature set (or
//! an `error` record) on the result topic. Also acts as the operator
//! panel: retained settings and start/stop signals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use meshtune_core::MeasurementOracle;
use meshtune_types::{SettingsUpdate, TuneResult};

use crate::bus::{Envelope, MessageBus};
use crate::messages::{CommandMessage, ControlMessage, ResultMessage};
use crate::topics::Topics;

pub struct RigSimulator {
    bus: Arc<dyn MessageBus>,
    topics: Topics,
    sender: String,
    oracle: Arc<dyn MeasurementOracle>,
    served: AtomicUsize,
}

impl RigSimulator {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        device_id: &str,
        oracle: Arc<dyn MeasurementOracle>,
    ) -> Self {
        Self {
            bus,
            topics: Topics::new(device_id),
            sender: "rig".to_string(),
            oracle,
            served: AtomicUsize::new(0),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Commands answered so far, duplicates included.
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    /// Answer one command envelope. Returns `Ok(false)` for envelopes
    /// that are not commands of this device.
    pub fn handle(&self, envelope: &Envelope) -> TuneResult<bool> {
        if envelope.topic != self.topics.cmd_point {
            return Ok(false);
        }
        let command: CommandMessage = serde_json::from_str(&envelope.payload)?;
        let CommandMessage::MovePoint { req_id, point, .. } = command;
        let reply = match self.oracle.measure(point.into()) {
            Ok(features) => ResultMessage::feature_set(&req_id, &features, &self.sender),
            Err(e) => {
                log::warn!("rig: measurement at ({:.4}, {:.4}) failed: {e}", point.x, point.y);
                ResultMessage::error(&req_id, e.to_string(), &self.sender)
            }
        };
        self.bus
            .publish(&self.topics.result, serde_json::to_string(&reply)?, false)?;
        self.served.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    /// Serve commands until the subscription closes.
    pub fn spawn(self: Arc<Self>, commands: Receiver<Envelope>) -> JoinHandle<()> {
        thread::spawn(move || {
            for envelope in commands {
                if let Err(e) = self.handle(&envelope) {
                    log::warn!("rig: dropping command on {}: {e}", envelope.topic);
                }
            }
            log::debug!("rig: command stream closed");
        })
    }

    /// Publish a retained settings record.
    pub fn publish_settings(&self, update: &SettingsUpdate) -> TuneResult<()> {
        self.bus
            .publish(&self.topics.settings, serde_json::to_string(update)?, true)
    }

    pub fn send_start(&self) -> TuneResult<()> {
        let msg = ControlMessage::start(&self.sender);
        self.bus
            .publish(&self.topics.ctrl_start, serde_json::to_string(&msg)?, false)
    }

    pub fn send_stop(&self) -> TuneResult<()> {
        let msg = ControlMessage::stop(&self.sender);
        self.bus
            .publish(&self.topics.ctrl_stop, serde_json::to_string(&msg)?, false)
    }
}

#[cfg(test)]
mod tests {
    use meshtune_core::ExternalOracle;
    use meshtune_types::{AxisFeatures, FeatureVector, Position, TuneError};

    use super::*;
    use crate::bus::LocalBus;

    fn rig(bus: &Arc<LocalBus>) -> RigSimulator {
        let oracle = ExternalOracle::new(|p: Position| {
            if p.x < 0.0 {
                return Err(TuneError::Numerical("encoder fault".into()));
            }
            Ok(FeatureVector::from_x(AxisFeatures::uniform(p.x)))
        });
        RigSimulator::new(bus.clone(), "id1", Arc::new(oracle))
    }

    fn command(x: f64) -> Envelope {
        let cmd = CommandMessage::move_point("r-7", Position::new(x, 0.0), "A");
        Envelope {
            topic: "v1/id1/cmd/point".into(),
            payload: serde_json::to_string(&cmd).unwrap(),
            retained: false,
        }
    }

    #[test]
    fn test_command_answered_with_feature_set() {
        let bus = Arc::new(LocalBus::new());
        let rig = rig(&bus);
        assert!(rig.handle(&command(1.25)).unwrap());
        let sent = bus.published_on("v1/id1/telemetry/result");
        let reply: ResultMessage = serde_json::from_str(&sent[0].payload).unwrap();
        assert_eq!(reply.req_id(), "r-7");
        assert_eq!(reply.into_features().unwrap().x.time_rms, 1.25);
        assert_eq!(rig.served(), 1);
    }

    #[test]
    fn test_oracle_failure_answered_with_error() {
        let bus = Arc::new(LocalBus::new());
        let rig = rig(&bus);
        rig.handle(&command(-1.0)).unwrap();
        let sent = bus.published_on("v1/id1/telemetry/result");
        let reply: ResultMessage = serde_json::from_str(&sent[0].payload).unwrap();
        assert!(matches!(reply, ResultMessage::Error { .. }));
    }

    #[test]
    fn test_foreign_topic_ignored() {
        let bus = Arc::new(LocalBus::new());
        let rig = rig(&bus);
        let mut env = command(1.0);
        env.topic = "v1/id2/cmd/point".into();
        assert!(!rig.handle(&env).unwrap());
        assert!(bus.published().is_empty());
    }

    #[test]
    fn test_settings_are_retained() {
        let bus = Arc::new(LocalBus::new());
        let rig = rig(&bus);
        rig.publish_settings(&SettingsUpdate {
            start_x: Some(22.0),
            ..SettingsUpdate::default()
        })
        .unwrap();
        let retained = bus.retained("v1/id1/config/setting").unwrap();
        assert!(retained.contains("22.0"));
    }
}
