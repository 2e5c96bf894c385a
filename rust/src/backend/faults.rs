// Pluggable fault injection for the simulated backend.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use rand::Rng;

use super::BackendOp;

pub trait FaultInjector: Send + Sync + 'static {
    /// Decide whether the next call of `op` fails.
    fn should_fail(&self, op: BackendOp) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverFail;

impl FaultInjector for NeverFail {
    fn should_fail(&self, _op: BackendOp) -> bool {
        false
    }
}

/// Fails each call independently with probability `rate`.
#[derive(Debug, Clone, Copy)]
pub struct RandomFaults {
    rate: f64,
}

impl RandomFaults {
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_finite() {
            rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { rate }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl FaultInjector for RandomFaults {
    fn should_fail(&self, _op: BackendOp) -> bool {
        self.rate > 0.0 && rand::thread_rng().gen_bool(self.rate)
    }
}

/// Deterministic outcomes queued per operation. An empty queue means success.
#[derive(Debug, Default)]
pub struct ScriptedFaults {
    script: Mutex<HashMap<BackendOp, VecDeque<bool>>>,
}

impl ScriptedFaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `count` consecutive failures for `op`.
    pub fn fail_next(&self, op: BackendOp, count: usize) {
        let mut script = self.script.lock();
        let queue = script.entry(op).or_default();
        queue.extend(std::iter::repeat(true).take(count));
    }

    /// Queue an explicit sequence of outcomes (`true` = fail).
    pub fn push_outcomes(&self, op: BackendOp, outcomes: impl IntoIterator<Item = bool>) {
        self.script.lock().entry(op).or_default().extend(outcomes);
    }

    pub fn remaining(&self, op: BackendOp) -> usize {
        self.script.lock().get(&op).map_or(0, VecDeque::len)
    }
}

impl FaultInjector for ScriptedFaults {
    fn should_fail(&self, op: BackendOp) -> bool {
        self.script
            .lock()
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
            .unwrap_or(false)
    }
}
