//! The Gradient Gauge: a bounded momentum counter that scales the
//! difficulty hint handed to the next expedition.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

const LOG_CAP: usize = 32;

/// One recorded transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GaugeChange {
    /// +1, capped at max. Driven by expedition success.
    Charge,
    /// -1, floored at 0. Driven by a skip.
    Decay,
    /// Straight to 0. Driven by failure or a parse error.
    Discharge,
}

#[derive(Debug, Clone, Serialize)]
pub struct GaugeEvent {
    pub change: GaugeChange,
    pub level_after: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct GaugeState {
    level: u32,
    max: u32,
    log: VecDeque<GaugeEvent>,
}

/// Thread-safe gauge in `[0, max]`. With `max == 0` the gauge is pinned at
/// zero and already counts as full.
#[derive(Debug)]
pub struct GradientGauge {
    inner: Mutex<GaugeState>,
}

impl GradientGauge {
    pub fn new(max: u32) -> Self {
        Self {
            inner: Mutex::new(GaugeState {
                level: 0,
                max,
                log: VecDeque::new(),
            }),
        }
    }

    pub fn level(&self) -> u32 {
        self.lock().level
    }

    pub fn max(&self) -> u32 {
        self.lock().max
    }

    pub fn is_at_max(&self) -> bool {
        let state = self.lock();
        state.level == state.max
    }

    pub fn charge(&self) {
        self.apply(GaugeChange::Charge);
    }

    pub fn decay(&self) {
        self.apply(GaugeChange::Decay);
    }

    pub fn discharge(&self) {
        self.apply(GaugeChange::Discharge);
    }

    /// Recent transitions, oldest first.
    pub fn recent_events(&self) -> Vec<GaugeEvent> {
        self.lock().log.iter().cloned().collect()
    }

    /// Prompt-facing state line with the difficulty hint.
    pub fn format_for_prompt(&self) -> String {
        let state = self.lock();
        let hint = if state.level == state.max {
            "gradient attack: pick the hardest open task you can finish"
        } else if state.level == 0 {
            "start small: pick an easy, well-understood task"
        } else if state.level <= 2 {
            "momentum building: pick a moderate task"
        } else {
            "strong momentum: pick a challenging task"
        };
        format!("Gradient: {}/{} — {}", state.level, state.max, hint)
    }

    fn apply(&self, change: GaugeChange) {
        let mut state = self.lock();
        state.level = match change {
            GaugeChange::Charge => state.level.saturating_add(1).min(state.max),
            GaugeChange::Decay => state.level.saturating_sub(1),
            GaugeChange::Discharge => 0,
        };
        debug!(?change, level = state.level, "gauge transition");
        if state.log.len() == LOG_CAP {
            state.log.pop_front();
        }
        let event = GaugeEvent {
            change,
            level_after: state.level,
            at: Utc::now(),
        };
        state.log.push_back(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GaugeState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
