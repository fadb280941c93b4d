// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Topic Layout
// ─────────────────────────────────────────────────────────────────────
//! Versioned per-device topic names: `v1/{device_id}/...`.

/// Every topic the tuner and the rig exchange messages on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Tuner → rig: `move_point` commands.
    pub cmd_point: String,
    /// Rig → tuner: feature sets and measurement errors.
    pub result: String,
    pub ctrl_start: String,
    pub ctrl_stop: String,
    /// Tuner → operator: end-of-run reports.
    pub ctrl_end: String,
    /// Retained session status.
    pub status: String,
    /// Retained settings, merged on arrival.
    pub settings: String,
    root: String,
}

impl Topics {
    pub fn new(device_id: &str) -> Self {
        let root = format!("v1/{device_id}");
        Self {
            cmd_point: format!("{root}/cmd/point"),
            result: format!("{root}/telemetry/result"),
            ctrl_start: format!("{root}/ctrl/start"),
            ctrl_stop: format!("{root}/ctrl/stop"),
            ctrl_end: format!("{root}/ctrl/end"),
            status: format!("{root}/status"),
            settings: format!("{root}/config/setting"),
            root,
        }
    }

    /// Filter matching every topic of this device.
    pub fn device_filter(&self) -> String {
        format!("{}/#", self.root)
    }
}

/// MQTT-style filter match: `+` matches one level, a trailing `#` matches
/// the remaining levels (including none).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        if part == "#" {
            return true;
        }
        match levels.next() {
            Some(level) if part == "+" || part == level => {}
            _ => return false,
        }
    }
    levels.next().is_none()
}
