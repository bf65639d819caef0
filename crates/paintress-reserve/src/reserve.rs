//! Rate-limit detection and model fallback with cooldown.

use regex::Regex;
use serde::Serialize;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Substring indicators checked case-insensitively against each chunk.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "too many requests",
    "quota exceeded",
    "usage limit",
    "try again later",
    "at capacity",
];

/// `429` counts only as a whole token: `429th` and `1429` must not match.
fn whole_429() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^0-9A-Za-z])429(?:[^0-9A-Za-z]|$)").unwrap())
}

/// Information about a detected rate-limit event.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDetected {
    pub matched_pattern: String,
    /// Whether this detection actually moved active off the primary.
    pub swapped: bool,
}

#[derive(Debug)]
struct ReserveState {
    primary: String,
    reserves: Vec<String>,
    active: String,
    hits: u32,
    cooldown_until: Option<Instant>,
}

/// Primary/reserve model selector. Active is always the primary or one of
/// the listed reserves; while a reserve is active the cooldown deadline is
/// in the future until recovery.
#[derive(Debug)]
pub struct ReserveParty {
    inner: Mutex<ReserveState>,
}

impl ReserveParty {
    pub fn new(primary: impl Into<String>, reserves: Vec<String>) -> Self {
        let primary = primary.into();
        Self {
            inner: Mutex::new(ReserveState {
                active: primary.clone(),
                primary,
                reserves,
                hits: 0,
                cooldown_until: None,
            }),
        }
    }

    pub fn active_model(&self) -> String {
        self.lock().active.clone()
    }

    pub fn hits(&self) -> u32 {
        self.lock().hits
    }

    /// Scan one output chunk for rate-limit indicators. On a match while
    /// the primary is active and a reserve exists, swap to the first
    /// reserve and start the cooldown. The swap is idempotent: further
    /// matches while a reserve is active detect but change nothing.
    pub fn check_output(&self, chunk: &str) -> Option<RateLimitDetected> {
        let pattern = find_rate_limit_pattern(chunk)?;
        let mut state = self.lock();
        let swapped = Self::swap_to_reserve(&mut state, pattern);
        Some(RateLimitDetected {
            matched_pattern: pattern.to_string(),
            swapped,
        })
    }

    /// Swap without any matched output. Used when an expedition timeout
    /// looks rate-limit-caused.
    pub fn force_reserve(&self) -> bool {
        let mut state = self.lock();
        Self::swap_to_reserve(&mut state, "forced")
    }

    /// Restore the primary once the cooldown has fully elapsed.
    pub fn try_recover_primary(&self) -> bool {
        let mut state = self.lock();
        if state.active == state.primary {
            return false;
        }
        match state.cooldown_until {
            Some(deadline) if Instant::now() > deadline => {
                info!(model = %state.primary, "reserve cooldown over; primary restored");
                state.active = state.primary.clone();
                state.cooldown_until = None;
                true
            }
            _ => false,
        }
    }

    /// One-line operator status.
    pub fn status(&self) -> String {
        let state = self.lock();
        if state.active == state.primary {
            format!("model {} (primary, {} rate-limit hits)", state.active, state.hits)
        } else {
            let remaining = state
                .cooldown_until
                .map(|d| d.saturating_duration_since(Instant::now()).as_secs())
                .unwrap_or(0);
            format!(
                "model {} (reserve for {}, {}s cooldown left, {} hits)",
                state.active, state.primary, remaining, state.hits
            )
        }
    }

    /// Prompt-facing description of the active model.
    pub fn format_for_prompt(&self) -> String {
        let state = self.lock();
        if state.active == state.primary {
            format!("Active model: {} (primary).", state.active)
        } else {
            format!(
                "Active model: {} (reserve; primary {} is rate-limited and cooling down).",
                state.active, state.primary
            )
        }
    }

    fn swap_to_reserve(state: &mut ReserveState, cause: &str) -> bool {
        if state.active != state.primary {
            return false;
        }
        let Some(first_reserve) = state.reserves.first().cloned() else {
            warn!(cause, "rate limit detected but no reserve model configured");
            return false;
        };
        warn!(
            from = %state.primary,
            to = %first_reserve,
            cause,
            "rate limit: switching to reserve model"
        );
        state.active = first_reserve;
        state.cooldown_until = Some(Instant::now() + COOLDOWN);
        state.hits += 1;
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReserveState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn expire_cooldown(&self) {
        let mut state = self.lock();
        state.cooldown_until = Some(Instant::now() - Duration::from_secs(1));
    }
}

/// Pure detection with no state change. The review loop uses this to spot
/// a rate-limited review service without touching the agent model.
pub fn detect_rate_limit(chunk: &str) -> Option<&'static str> {
    find_rate_limit_pattern(chunk)
}

fn find_rate_limit_pattern(chunk: &str) -> Option<&'static str> {
    let lowered = chunk.to_lowercase();
    for pattern in RATE_LIMIT_PATTERNS {
        if lowered.contains(pattern) {
            return Some(pattern);
        }
    }
    if whole_429().is_match(chunk) {
        return Some("429");
    }
    None
}
