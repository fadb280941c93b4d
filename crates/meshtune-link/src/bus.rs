// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Message Bus
// ─────────────────────────────────────────────────────────────────────
//! Publish side of the pub/sub transport, plus an in-process broker.
//!
//! The tuner only ever publishes through [`MessageBus`]; inbound traffic
//! arrives as [`Envelope`]s on a channel and is decoded by the session
//! bridge. [`LocalBus`] is a complete in-process broker with MQTT-like
//! semantics (retained messages, `+`/`#` filters) and fault injection
//! for at-least-once delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{channel, Receiver, Sender};

use parking_lot::Mutex;

use meshtune_types::{TuneError, TuneResult};

use crate::topics::topic_matches;

/// Published messages kept by [`LocalBus::new`] for inspection.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `topic`. Fails with `ConnectionUnavailable`
    /// when the bus is disconnected.
    fn publish(&self, topic: &str, payload: String, retain: bool) -> TuneResult<()>;

    fn is_connected(&self) -> bool;
}

struct Subscriber {
    filter: String,
    tx: Sender<Envelope>,
}

struct BusState {
    connected: bool,
    duplicate_delivery: bool,
    subscribers: Vec<Subscriber>,
    retained: HashMap<String, String>,
    published: VecDeque<Envelope>,
    log_capacity: usize,
}

/// In-process broker.
pub struct LocalBus {
    state: Mutex<BusState>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// Keep at most `capacity` published messages, oldest dropped first.
    /// Zero disables the log.
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BusState {
                connected: true,
                duplicate_delivery: false,
                subscribers: Vec::new(),
                retained: HashMap::new(),
                published: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
                log_capacity: capacity,
            }),
        }
    }

    /// Subscribe to `filter`. Matching retained messages are replayed
    /// immediately.
    pub fn subscribe(&self, filter: &str) -> Receiver<Envelope> {
        let (tx, rx) = channel();
        let mut st = self.state.lock();
        let mut replay: Vec<(&String, &String)> = st
            .retained
            .iter()
            .filter(|(topic, _)| topic_matches(filter, topic))
            .collect();
        replay.sort();
        for (topic, payload) in replay {
            let _ = tx.send(Envelope {
                topic: topic.clone(),
                payload: payload.clone(),
                retained: true,
            });
        }
        st.subscribers.push(Subscriber {
            filter: filter.to_string(),
            tx,
        });
        log::debug!("bus: subscribed {filter}");
        rx
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
        log::info!("bus: connected={connected}");
    }

    /// Deliver every message twice to each subscriber.
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.state.lock().duplicate_delivery = enabled;
    }

    /// Drop every subscription; their receivers disconnect.
    pub fn close(&self) {
        let mut st = self.state.lock();
        st.subscribers.clear();
        st.connected = false;
    }

    /// The most recent published messages, oldest first.
    pub fn published(&self) -> Vec<Envelope> {
        self.state.lock().published.iter().cloned().collect()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Envelope> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    pub fn retained(&self, topic: &str) -> Option<String> {
        self.state.lock().retained.get(topic).cloned()
    }
}

impl MessageBus for LocalBus {
    fn publish(&self, topic: &str, payload: String, retain: bool) -> TuneResult<()> {
        let mut st = self.state.lock();
        if !st.connected {
            return Err(TuneError::ConnectionUnavailable(format!(
                "cannot publish to {topic}: bus disconnected"
            )));
        }
        log::debug!("bus: {topic} <- {payload}");
        if retain {
            // An empty retained payload clears the topic.
            if payload.is_empty() {
                st.retained.remove(topic);
            } else {
                st.retained.insert(topic.to_string(), payload.clone());
            }
        }
        let envelope = Envelope {
            topic: topic.to_string(),
            payload,
            retained: false,
        };
        let copies = if st.duplicate_delivery { 2 } else { 1 };
        st.subscribers.retain(|sub| {
            if !topic_matches(&sub.filter, topic) {
                return true;
            }
            (0..copies).all(|_| sub.tx.send(envelope.clone()).is_ok())
        });
        if st.log_capacity > 0 {
            if st.published.len() == st.log_capacity {
                st.published.pop_front();
            }
            st.published.push_back(envelope);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}
