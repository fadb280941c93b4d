// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Control Session Scenario Tests
// ─────────────────────────────────────────────────────────────────────

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use meshtune_core::{ExternalOracle, MeasurementOracle};
use meshtune_link::{
    CommandMessage, EndKind, EndMessage, LocalBus, LocalSession, MessageBus, RigSimulator,
    RunOutcome, SessionEvent, SessionState, StatusMessage,
};
use meshtune_types::{
    AxisFeatures, FeatureVector, Position, SettingsUpdate, StopReason, TunerConfig,
};

const STATUS: &str = "v1/id1/status";
const END: &str = "v1/id1/ctrl/end";
const CMD: &str = "v1/id1/cmd/point";
const RESULT: &str = "v1/id1/telemetry/result";

fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {what}");
}

fn statuses(bus: &LocalBus) -> Vec<StatusMessage> {
    bus.published_on(STATUS)
        .iter()
        .map(|e| serde_json::from_str(&e.payload).unwrap())
        .collect()
}

fn current_state(bus: &LocalBus) -> Option<SessionState> {
    bus.retained(STATUS)
        .map(|p| serde_json::from_str::<StatusMessage>(&p).unwrap().state)
}

fn end_messages(bus: &LocalBus) -> Vec<EndMessage> {
    bus.published_on(END)
        .iter()
        .map(|e| serde_json::from_str(&e.payload).unwrap())
        .collect()
}

/// Quadratic vibration bowl centred on (24, -31).
fn bowl(delay: Duration) -> Arc<dyn MeasurementOracle> {
    let optimum = Position::new(24.0, -31.0);
    Arc::new(ExternalOracle::new(move |p| {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let d2 = p.squared_distance(optimum);
        let axis = AxisFeatures {
            time_rms: 0.5 + 0.05 * d2,
            time_crest_factor: 3.0,
            spectrum_rms: 0.01 + 0.002 * d2,
            spectrum_skewness: 4.0,
            spectrum_kurtosis: 300.0,
            ..AxisFeatures::uniform(1.0)
        };
        Ok(FeatureVector {
            x: axis,
            y: Some(axis),
            z: None,
        })
    }))
}

fn config(timeout_ms: u64, retries: u32, max_iters: u32) -> TunerConfig {
    let mut cfg = TunerConfig::default();
    cfg.protocol.timeout_ms = timeout_ms;
    cfg.protocol.retries = retries;
    cfg.optimizer.max_iters = max_iters;
    cfg.optimizer.patience = max_iters;
    cfg
}

fn start_rig(bus: &Arc<LocalBus>, delay: Duration) -> Arc<RigSimulator> {
    let rig = Arc::new(RigSimulator::new(bus.clone(), "id1", bowl(delay)));
    Arc::clone(&rig).spawn(bus.subscribe(CMD));
    rig
}

#[test]
fn test_unanswered_commands_end_in_error() {
    let bus = Arc::new(LocalBus::new());
    let session = LocalSession::spawn(config(30, 2, 10), bus.clone()).unwrap();
    bus.publish("v1/id1/ctrl/start", r#"{"type":"start"}"#.into(), false)
        .unwrap();

    wait_for("error status", || current_state(&bus) == Some(SessionState::Error));
    assert_eq!(bus.published_on(CMD).len(), 3);

    let states: Vec<SessionState> = statuses(&bus).iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![SessionState::Idle, SessionState::Running, SessionState::Error]
    );
    let last = statuses(&bus).pop().unwrap();
    assert!(last.error_message.unwrap().contains("transport timeout"));
    assert!(end_messages(&bus).is_empty());

    let session = session.shutdown().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(matches!(session.last_outcome(), Some(RunOutcome::Failed(_))));
}

#[test]
fn test_completed_run_under_duplicate_delivery() {
    let bus = Arc::new(LocalBus::new());
    bus.set_duplicate_delivery(true);
    let rig = start_rig(&bus, Duration::ZERO);
    let session = LocalSession::spawn(config(2_000, 1, 8), bus.clone()).unwrap();
    rig.send_start().unwrap();

    wait_for("end report", || !end_messages(&bus).is_empty());
    wait_for("completed status", || {
        current_state(&bus) == Some(SessionState::Completed)
    });

    let ends = end_messages(&bus);
    assert_eq!(ends.len(), 1);
    let end = &ends[0];
    assert_eq!(end.kind, EndKind::End);
    assert_eq!(end.sender, "A");
    let r = &end.optimization_result;
    assert_eq!(r.stop_reason, StopReason::MaxIterations);
    assert_eq!(r.iterations, 8);
    assert_eq!(r.start.x, 18.5);
    let (before, after) = (r.cvi_before.unwrap(), r.cvi_after.unwrap());
    assert!(after < before, "cvi rose from {before} to {after}");
    assert!(r.before.as_ref().unwrap().contains_key("Time_rms_y"));
    assert!(r.after.is_some());
    assert!(r.final_position.x >= 18.5 && r.final_position.x <= 29.5);

    // every command is delivered twice and answered twice
    wait_for("duplicate answers", || {
        rig.served() == 2 * bus.published_on(CMD).len()
    });
    assert!(statuses(&bus).iter().all(|s| s.state != SessionState::Error));

    let session = session.shutdown().unwrap();
    assert!(matches!(session.last_outcome(), Some(RunOutcome::Finished(_))));
}

#[test]
fn test_stop_during_run() {
    let bus = Arc::new(LocalBus::new());
    let rig = start_rig(&bus, Duration::from_millis(5));
    let session = LocalSession::spawn(config(2_000, 1, 500), bus.clone()).unwrap();
    session.send(SessionEvent::Start).unwrap();

    wait_for("running status", || current_state(&bus) == Some(SessionState::Running));
    wait_for("a few measurements", || rig.served() >= 6);
    rig.send_stop().unwrap();
    wait_for("stopped status", || current_state(&bus) == Some(SessionState::Stopped));

    let states: Vec<SessionState> = statuses(&bus).iter().map(|s| s.state).collect();
    assert!(states.contains(&SessionState::Stopping));
    let ends = end_messages(&bus);
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].kind, EndKind::Stopped);
    let r = &ends[0].optimization_result;
    assert_eq!(r.stop_reason, StopReason::Cancelled);
    assert!(r.iterations < 500);
    assert!(r.cvi_after.is_none());
    assert!(r.after.is_none());

    let session = session.shutdown().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_start_ignored_while_running() {
    let bus = Arc::new(LocalBus::new());
    let _rig = start_rig(&bus, Duration::from_millis(5));
    let session = LocalSession::spawn(config(2_000, 1, 500), bus.clone()).unwrap();
    session.send(SessionEvent::Start).unwrap();
    wait_for("running status", || current_state(&bus) == Some(SessionState::Running));

    session.send(SessionEvent::Start).unwrap();
    wait_for("ignored start", || {
        statuses(&bus).iter().any(|s| {
            s.state == SessionState::Running
                && s.message.as_deref() == Some("start ignored: session is running")
        })
    });

    session.send(SessionEvent::Stop).unwrap();
    wait_for("stopped status", || current_state(&bus) == Some(SessionState::Stopped));
    assert_eq!(end_messages(&bus).len(), 1);
    session.shutdown().unwrap();
}

#[test]
fn test_settings_staged_for_next_run() {
    let bus = Arc::new(LocalBus::new());
    let rig = start_rig(&bus, Duration::from_millis(2));
    rig.publish_settings(&SettingsUpdate {
        start_x: Some(22.0),
        start_y: Some(-30.0),
        ..SettingsUpdate::default()
    })
    .unwrap();
    let session = LocalSession::spawn(config(2_000, 1, 3), bus.clone()).unwrap();
    rig.send_start().unwrap();
    wait_for("running status", || current_state(&bus) == Some(SessionState::Running));

    rig.publish_settings(&SettingsUpdate {
        start_x: Some(25.0),
        ..SettingsUpdate::default()
    })
    .unwrap();
    wait_for("end report", || !end_messages(&bus).is_empty());

    let r = &end_messages(&bus)[0].optimization_result;
    assert_eq!(r.start.x, 22.0);
    assert_eq!(r.start.y, -30.0);

    let session = session.shutdown().unwrap();
    let staged = session.staged_settings();
    assert_eq!(staged.start_x, 25.0);
    assert_eq!(staged.start_y, -30.0);
}

#[test]
fn test_disconnected_bus_fails_run() {
    let bus = Arc::new(LocalBus::new());
    let session = LocalSession::spawn(config(2_000, 1, 5), bus.clone()).unwrap();
    bus.set_connected(false);
    session.send(SessionEvent::Start).unwrap();
    let session = session.shutdown().unwrap();
    match session.last_outcome() {
        Some(RunOutcome::Failed(msg)) => assert!(msg.contains("connection unavailable")),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_end_report_carries_history() {
    let bus = Arc::new(LocalBus::new());
    let rig = start_rig(&bus, Duration::ZERO);
    let session = LocalSession::spawn(config(2_000, 1, 4), bus.clone()).unwrap();
    rig.send_start().unwrap();
    wait_for("end report", || !end_messages(&bus).is_empty());

    let r = &end_messages(&bus)[0].optimization_result;
    assert_eq!(r.iterations, 4);
    assert_eq!(r.history.len(), 4);
    for (i, entry) in r.history.iter().enumerate() {
        assert_eq!(entry.iteration, i as u32 + 1);
        assert_eq!(entry.candidates.len(), 3);
    }
    let last = r.history.last().unwrap();
    assert_eq!(last.position.x, r.final_position.x);
    assert_eq!(last.position.y, r.final_position.y);
    session.shutdown().unwrap();
}

#[test]
fn test_malformed_result_fails_run() {
    let bus = Arc::new(LocalBus::new());
    let commands = bus.subscribe(CMD);
    let responder = {
        let bus = bus.clone();
        thread::spawn(move || {
            for env in commands {
                let command: CommandMessage = serde_json::from_str(&env.payload).unwrap();
                let CommandMessage::MovePoint { req_id, .. } = command;
                let payload = format!(
                    r#"{{"type":"result_feature_set","req_id":"{req_id}","features":["Time_rms_x"],"values":[0.5,0.6]}}"#
                );
                if bus.publish(RESULT, payload, false).is_err() {
                    break;
                }
            }
        })
    };
    let session = LocalSession::spawn(config(2_000, 1, 5), bus.clone()).unwrap();
    session.send(SessionEvent::Start).unwrap();

    wait_for("error status", || current_state(&bus) == Some(SessionState::Error));
    let last = statuses(&bus).pop().unwrap();
    assert!(last.error_message.unwrap().contains("malformed"));
    assert!(end_messages(&bus).is_empty());
    assert_eq!(bus.published_on(CMD).len(), 1);

    let session = session.shutdown().unwrap();
    assert!(matches!(session.last_outcome(), Some(RunOutcome::Failed(_))));
    responder.join().unwrap();
}
