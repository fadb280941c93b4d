// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Point-Query Protocol Client
// ─────────────────────────────────────────────────────────────────────
//! Request/response over the bus: publish `move_point`, block until the
//! result carrying the same `req_id` comes back.
//!
//! Correlation goes through [`PendingRegistry`], the only state shared
//! between the optimizer thread and the bus-listener context. Each entry
//! is single-assignment: the first matching result removes it, so
//! duplicates and late replies find nothing and are dropped.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use meshtune_core::MeasurementOracle;
use meshtune_types::{FeatureVector, Position, ProtocolConfig, TuneError, TuneResult};

use crate::bus::MessageBus;
use crate::messages::{CommandMessage, ResultMessage};
use crate::topics::Topics;

/// Outstanding requests keyed by correlation id.
#[derive(Default)]
pub struct PendingRegistry {
    waiters: Mutex<HashMap<String, SyncSender<ResultMessage>>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `req_id`.
    pub fn insert(&self, req_id: &str) -> Receiver<ResultMessage> {
        let (tx, rx) = sync_channel(1);
        self.waiters.lock().insert(req_id.to_string(), tx);
        rx
    }

    /// Hand `result` to its waiter. Returns `false` if no waiter is
    /// registered for its id (unknown, already resolved or timed out).
    pub fn resolve(&self, result: ResultMessage) -> bool {
        let waiter = self.waiters.lock().remove(result.req_id());
        match waiter {
            Some(tx) => {
                log::debug!("result {} routed to waiter", result.req_id());
                tx.try_send(result).is_ok()
            }
            None => {
                log::warn!("dropping result for unknown req_id={}", result.req_id());
                false
            }
        }
    }

    pub fn remove(&self, req_id: &str) -> bool {
        self.waiters.lock().remove(req_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Measurement oracle that drives a remote rig over the bus.
pub struct PointProtocolClient {
    bus: Arc<dyn MessageBus>,
    topics: Topics,
    sender: String,
    timeout: Duration,
    retries: u32,
    pending: PendingRegistry,
}

impl PointProtocolClient {
    pub fn new(bus: Arc<dyn MessageBus>, protocol: &ProtocolConfig) -> Self {
        Self {
            bus,
            topics: Topics::new(&protocol.device_id),
            sender: protocol.sender.clone(),
            timeout: Duration::from_millis(protocol.timeout_ms),
            retries: protocol.retries,
            pending: PendingRegistry::new(),
        }
    }

    /// Route an inbound result to its waiter. Called from the listener
    /// context, never from the measuring thread.
    pub fn resolve(&self, result: ResultMessage) -> bool {
        self.pending.resolve(result)
    }

    pub fn pending(&self) -> &PendingRegistry {
        &self.pending
    }

    /// Publish one command and wait, re-publishing the identical command
    /// on every timeout until the attempts are used up.
    pub fn request(&self, at: Position) -> TuneResult<ResultMessage> {
        if !self.bus.is_connected() {
            return Err(TuneError::ConnectionUnavailable(format!(
                "cannot request ({:.4}, {:.4}): bus disconnected",
                at.x, at.y
            )));
        }
        let req_id = Uuid::new_v4().to_string();
        let rx = self.pending.insert(&req_id);
        let payload = match serde_json::to_string(&CommandMessage::move_point(&req_id, at, &self.sender)) {
            Ok(p) => p,
            Err(e) => {
                self.pending.remove(&req_id);
                return Err(e.into());
            }
        };

        let attempts = self.retries + 1;
        for attempt in 1..=attempts {
            if let Err(e) = self.bus.publish(&self.topics.cmd_point, payload.clone(), false) {
                self.pending.remove(&req_id);
                return Err(e);
            }
            log::debug!(
                "move_point req_id={req_id} ({:.4}, {:.4}) attempt {attempt}/{attempts}",
                at.x,
                at.y
            );
            match rx.recv_timeout(self.timeout) {
                Ok(result) => return Ok(result),
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "req_id={req_id} no result after {:?} (attempt {attempt}/{attempts})",
                        self.timeout
                    );
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.pending.remove(&req_id);
        // A result may have been routed between the last timeout and the removal.
        if let Ok(result) = rx.try_recv() {
            return Ok(result);
        }
        Err(TuneError::TransportTimeout { req_id, attempts })
    }
}

impl MeasurementOracle for PointProtocolClient {
    fn measure(&self, at: Position) -> TuneResult<FeatureVector> {
        self.request(at)?.into_features()
    }
}
