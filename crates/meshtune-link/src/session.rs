// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Control Session
// ─────────────────────────────────────────────────────────────────────
//! Run lifecycle driven by bus control messages.
//!
//! ```text
//! Idle ──start──▶ Running ──stop──▶ Stopping
//!                   │                  │
//!                   ▼                  ▼
//!        Completed | Error          Stopped | Error   ──▶ Idle
//! ```
//!
//! All session state lives on one dispatcher thread that consumes a
//! typed [`SessionEvent`] channel. The bridge thread turns raw bus
//! envelopes into events; the optimizer runs on a worker thread and
//! reports back through the same channel. Terminal states are published
//! as retained status, after which the session is Idle again.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};

use meshtune_core::{CancelFlag, MeasurementOracle, OptimizerLoop};
use meshtune_types::{
    Settings, SettingsUpdate, StopReason, TuneError, TuneResult, TunerConfig,
};

use crate::bus::{Envelope, LocalBus, MessageBus};
use crate::client::PointProtocolClient;
use crate::messages::{now_ts, ControlMessage, EndKind, ResultMessage, RunReport, StatusMessage};
use crate::topics::Topics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
    Stopped,
    Completed,
    Error,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Completed => "completed",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Finished(RunReport),
    Failed(String),
}

/// Everything the dispatcher reacts to.
#[derive(Debug)]
pub enum SessionEvent {
    Start,
    Stop,
    Settings(SettingsUpdate),
    Result(ResultMessage),
    RunFinished(RunOutcome),
    Shutdown,
}

/// Map one inbound envelope to a session event. Envelopes on topics the
/// session does not consume yield `Ok(None)`, as do control messages
/// whose type does not match their topic.
pub fn decode_envelope(topics: &Topics, envelope: &Envelope) -> TuneResult<Option<SessionEvent>> {
    let topic = envelope.topic.as_str();
    let payload = envelope.payload.as_str();
    if topic == topics.ctrl_start || topic == topics.ctrl_stop {
        let event = match serde_json::from_str::<ControlMessage>(payload)? {
            ControlMessage::Start { .. } if topic == topics.ctrl_start => SessionEvent::Start,
            ControlMessage::Stop { .. } if topic == topics.ctrl_stop => SessionEvent::Stop,
            other => {
                log::warn!("ignoring {other:?} on {topic}");
                return Ok(None);
            }
        };
        Ok(Some(event))
    } else if topic == topics.result {
        Ok(Some(SessionEvent::Result(serde_json::from_str(payload)?)))
    } else if topic == topics.settings {
        if payload.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(SessionEvent::Settings(serde_json::from_str(payload)?)))
    } else {
        Ok(None)
    }
}

/// Forward decoded envelopes into the session channel until either side
/// closes. Undecodable payloads are logged and dropped.
pub fn spawn_bridge(
    inbound: Receiver<Envelope>,
    topics: Topics,
    events: Sender<SessionEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for envelope in inbound {
            match decode_envelope(&topics, &envelope) {
                Ok(Some(event)) => {
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("bridge: dropping payload on {}: {e}", envelope.topic),
            }
        }
        log::debug!("bridge: inbound stream closed");
    })
}

/// Body of the worker thread: before snapshot, search, after snapshot.
fn execute_run(mut optimizer: OptimizerLoop, oracle: &dyn MeasurementOracle) -> TuneResult<RunReport> {
    let start = optimizer.position();
    let engine = *optimizer.reward_engine();
    let before = oracle.measure(start)?;
    let summary = optimizer.run()?;
    let after = match summary.stop_reason {
        StopReason::Cancelled => None,
        StopReason::MaxIterations | StopReason::Patience => Some(oracle.measure(summary.position)?),
    };
    Ok(RunReport {
        start,
        summary,
        cvi_before: engine.cvi(&before),
        cvi_after: after.as_ref().map(|f| engine.cvi(f)),
        before,
        after,
        history: optimizer.history().to_vec(),
    })
}

pub struct ControlSession {
    base: TunerConfig,
    staged: Settings,
    state: SessionState,
    online: bool,
    shutting_down: bool,
    bus: Arc<dyn MessageBus>,
    topics: Topics,
    client: Arc<PointProtocolClient>,
    events: Sender<SessionEvent>,
    cancel: Option<CancelFlag>,
    worker: Option<JoinHandle<()>>,
    last_outcome: Option<RunOutcome>,
}

impl ControlSession {
    /// `events` must feed the receiver later passed to [`ControlSession::run`];
    /// the worker reports its outcome through it.
    pub fn new(
        config: TunerConfig,
        bus: Arc<dyn MessageBus>,
        events: Sender<SessionEvent>,
    ) -> TuneResult<Self> {
        config.validate()?;
        let client = Arc::new(PointProtocolClient::new(Arc::clone(&bus), &config.protocol));
        let session = Self {
            staged: config.settings,
            topics: Topics::new(&config.protocol.device_id),
            base: config,
            state: SessionState::Idle,
            online: true,
            shutting_down: false,
            bus,
            client,
            events,
            cancel: None,
            worker: None,
            last_outcome: None,
        };
        session.publish_status(None, None);
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Settings the next run will start from.
    pub fn staged_settings(&self) -> Settings {
        self.staged
    }

    pub fn last_outcome(&self) -> Option<&RunOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Dispatch events until shutdown completes.
    pub fn run(mut self, events: Receiver<SessionEvent>) -> Self {
        for event in events.iter() {
            if !self.handle(event) {
                break;
            }
        }
        self
    }

    /// Apply one event. Returns `false` once the session has shut down.
    pub fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Start => self.on_start(),
            SessionEvent::Stop => self.on_stop(),
            SessionEvent::Settings(update) => self.on_settings(&update),
            SessionEvent::Result(result) => {
                self.client.resolve(result);
            }
            SessionEvent::RunFinished(outcome) => {
                self.on_finished(outcome);
                if self.shutting_down {
                    self.go_offline();
                    return false;
                }
            }
            SessionEvent::Shutdown => {
                self.shutting_down = true;
                if self.worker.is_none() {
                    self.go_offline();
                    return false;
                }
                log::info!("shutdown requested, stopping active run");
                self.on_stop();
            }
        }
        true
    }

    fn on_start(&mut self) {
        if self.state != SessionState::Idle || self.shutting_down {
            log::info!("start ignored while {}", self.state);
            self.publish_status(Some(format!("start ignored: session is {}", self.state)), None);
            return;
        }
        let config = match self.staged.apply_to(&self.base) {
            Ok(c) => c,
            Err(e) => return self.fail(e.to_string()),
        };
        let oracle: Arc<dyn MeasurementOracle> = self.client.clone();
        let optimizer = match OptimizerLoop::new(config, Arc::clone(&oracle)) {
            Ok(o) => o,
            Err(e) => return self.fail(e.to_string()),
        };
        self.cancel = Some(optimizer.cancel_flag());
        self.state = SessionState::Running;
        log::info!(
            "run started at ({:.4}, {:.4})",
            optimizer.position().x,
            optimizer.position().y
        );
        self.publish_status(None, None);

        let tx = self.events.clone();
        self.worker = Some(thread::spawn(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
                execute_run(optimizer, oracle.as_ref())
            })) {
                Ok(Ok(report)) => RunOutcome::Finished(report),
                Ok(Err(e)) => RunOutcome::Failed(e.to_string()),
                Err(_) => RunOutcome::Failed("optimizer worker panicked".to_string()),
            };
            let _ = tx.send(SessionEvent::RunFinished(outcome));
        }));
    }

    fn on_stop(&mut self) {
        match self.state {
            SessionState::Running => {
                if let Some(cancel) = &self.cancel {
                    cancel.cancel();
                }
                self.state = SessionState::Stopping;
                log::info!("stop requested, finishing current iteration");
                self.publish_status(None, None);
            }
            SessionState::Stopping => {
                self.publish_status(Some("stop already pending".to_string()), None);
            }
            _ => {
                self.publish_status(Some("stop ignored: no active run".to_string()), None);
            }
        }
    }

    fn on_settings(&mut self, update: &SettingsUpdate) {
        let changed = self.staged.merge(update);
        match self.state {
            SessionState::Running | SessionState::Stopping => {
                log::info!("staged {changed} setting(s) for the next run")
            }
            _ => log::info!("merged {changed} setting(s)"),
        }
        if let Err(e) = self.staged.apply_to(&self.base) {
            log::warn!("staged settings are invalid, next start will fail: {e}");
        }
    }

    fn on_finished(&mut self, outcome: RunOutcome) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("optimizer worker exited abnormally");
            }
        }
        self.cancel = None;
        match &outcome {
            RunOutcome::Finished(report) => {
                let end = report.to_end_message(&self.base.protocol.sender);
                self.state = match end.kind {
                    EndKind::End => SessionState::Completed,
                    EndKind::Stopped => SessionState::Stopped,
                };
                match serde_json::to_string(&end) {
                    Ok(payload) => self.publish(&self.topics.ctrl_end, payload, false),
                    Err(e) => log::error!("cannot encode end report: {e}"),
                }
                log::info!(
                    "run {}: {} iterations, best reward {:.4}, cvi {:.4} -> {:?}",
                    self.state,
                    report.summary.iterations,
                    report.summary.best_reward,
                    report.cvi_before,
                    report.cvi_after
                );
                self.publish_status(None, None);
            }
            RunOutcome::Failed(message) => {
                log::error!("run failed: {message}");
                self.state = SessionState::Error;
                self.publish_status(None, Some(message.clone()));
            }
        }
        self.last_outcome = Some(outcome);
        self.state = SessionState::Idle;
    }

    /// Report a failure that happened before a worker was started.
    fn fail(&mut self, message: String) {
        log::error!("cannot start run: {message}");
        self.state = SessionState::Error;
        self.publish_status(None, Some(message.clone()));
        self.last_outcome = Some(RunOutcome::Failed(message));
        self.state = SessionState::Idle;
    }

    fn go_offline(&mut self) {
        self.online = false;
        self.state = SessionState::Idle;
        self.publish_status(None, None);
        log::info!("session offline");
    }

    fn publish(&self, topic: &str, payload: String, retain: bool) {
        if let Err(e) = self.bus.publish(topic, payload, retain) {
            log::warn!("publish to {topic} failed: {e}");
        }
    }

    fn publish_status(&self, message: Option<String>, error_message: Option<String>) {
        let status = StatusMessage {
            online: self.online,
            state: self.state,
            ts: now_ts(),
            sender: self.base.protocol.sender.clone(),
            message,
            error_message,
        };
        match serde_json::to_string(&status) {
            Ok(payload) => self.publish(&self.topics.status, payload, true),
            Err(e) => log::error!("cannot encode status: {e}"),
        }
    }
}

/// A session wired to an in-process bus: dispatcher and bridge threads.
pub struct LocalSession {
    events: Sender<SessionEvent>,
    dispatcher: JoinHandle<ControlSession>,
    bridge: JoinHandle<()>,
    bus: Arc<LocalBus>,
}

impl LocalSession {
    pub fn spawn(config: TunerConfig, bus: Arc<LocalBus>) -> TuneResult<Self> {
        let (tx, rx) = mpsc::channel();
        let session = ControlSession::new(config, bus.clone(), tx.clone())?;
        let topics = session.topics().clone();
        let bridge = spawn_bridge(bus.subscribe(&topics.device_filter()), topics, tx.clone());
        let dispatcher = thread::spawn(move || session.run(rx));
        Ok(Self {
            events: tx,
            dispatcher,
            bridge,
            bus,
        })
    }

    pub fn send(&self, event: SessionEvent) -> TuneResult<()> {
        self.events
            .send(event)
            .map_err(|_| TuneError::Bus("session dispatcher has exited".to_string()))
    }

    /// Stop any active run, wait for the dispatcher, then close the bus.
    pub fn shutdown(self) -> TuneResult<ControlSession> {
        // A closed channel means the dispatcher already exited.
        let _ = self.events.send(SessionEvent::Shutdown);
        let session = self
            .dispatcher
            .join()
            .map_err(|_| TuneError::Bus("session dispatcher panicked".to_string()))?;
        self.bus.close();
        if self.bridge.join().is_err() {
            log::error!("bus bridge panicked");
        }
        Ok(session)
    }
}
