#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jobchat_core::{AppReconciler, AppState, AppUpdate, ChatApp, ChatMessage};

pub fn wait_until(what: &str, timeout: Duration, f: impl FnMut() -> bool) {
    wait_until_with_poll(what, timeout, Duration::from_millis(20), f);
}

pub fn wait_until_with_poll(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut f: impl FnMut() -> bool,
) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(poll);
    }
    panic!("{what}: condition not met within {timeout:?}");
}

/// Offline config with a fast poll interval.
pub fn write_config(data_dir: &str, poll_interval_ms: u64) {
    write_config_json(
        data_dir,
        serde_json::json!({
            "disable_network": true,
            "poll_interval_ms": poll_interval_ms,
            "request_timeout_ms": 5_000,
        }),
    );
}

pub fn write_config_json(data_dir: &str, v: serde_json::Value) {
    let path = std::path::Path::new(data_dir).join("jobchat_config.json");
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

pub fn bodies(messages: &[ChatMessage]) -> Vec<(String, bool)> {
    messages
        .iter()
        .map(|m| (m.body.clone(), m.pending))
        .collect()
}

/// Waits for the open conversation and returns its id.
pub fn wait_for_active(app: &ChatApp) -> String {
    wait_until("conversation opened", Duration::from_secs(5), || {
        app.state().current_chat.is_some()
    });
    app.state()
        .active_conversation_id
        .expect("active conversation id")
}

pub struct TestReconciler {
    updates: Arc<Mutex<Vec<AppUpdate>>>,
}

impl TestReconciler {
    pub fn new() -> (Self, Arc<Mutex<Vec<AppUpdate>>>) {
        let updates = Arc::new(Mutex::new(vec![]));
        (
            Self {
                updates: updates.clone(),
            },
            updates,
        )
    }
}

impl AppReconciler for TestReconciler {
    fn reconcile(&self, update: AppUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

pub fn snapshots(updates: &Arc<Mutex<Vec<AppUpdate>>>) -> Vec<AppState> {
    updates
        .lock()
        .unwrap()
        .iter()
        .map(|u| match u {
            AppUpdate::FullState(s) => s.clone(),
        })
        .collect()
}

pub fn revs(updates: &Arc<Mutex<Vec<AppUpdate>>>) -> Vec<u64> {
    updates.lock().unwrap().iter().map(AppUpdate::rev).collect()
}
