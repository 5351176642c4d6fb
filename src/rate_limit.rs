//! Per-client request throttling
//!
//! Counters are keyed by `(scope, client)`, where the scope is the entry point
//! name, so each entry point has its own budget per client address.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::SqlGateError;

/// "N requests per window"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    pub limit: u32,
    pub window: Duration,
}

impl RateQuota {
    pub fn new(limit: u32, window: Duration) -> Self {
        RateQuota { limit, window }
    }

    pub fn per_hour(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(3600))
    }
}

impl Default for RateQuota {
    fn default() -> Self {
        Self::per_hour(100)
    }
}

impl fmt::Display for RateQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {}s", self.limit, self.window.as_secs())
    }
}

impl FromStr for RateQuota {
    type Err = SqlGateError;

    /// Accepts `100/hour`, `100 per hour`, `10/5 minutes`, `10 per 5 minutes`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SqlGateError::Config(format!("invalid rate limit expression: {:?}", s));

        let normalized = s.trim().to_ascii_lowercase();
        let (count, period) = normalized
            .split_once('/')
            .or_else(|| normalized.split_once(" per "))
            .ok_or_else(invalid)?;

        let limit: u32 = count.trim().parse().map_err(|_| invalid())?;
        if limit == 0 {
            return Err(invalid());
        }

        let period = period.trim();
        let (multiplier, unit) = match period.split_once(char::is_whitespace) {
            Some((amount, unit)) => (amount.trim().parse::<u64>().map_err(|_| invalid())?, unit.trim()),
            None => (1, period),
        };
        if multiplier == 0 {
            return Err(invalid());
        }

        let unit_secs = match unit {
            "s" | "sec" | "second" | "seconds" => 1,
            "m" | "min" | "minute" | "minutes" => 60,
            "h" | "hour" | "hours" => 3600,
            "d" | "day" | "days" => 86_400,
            _ => return Err(invalid()),
        };

        Ok(RateQuota::new(limit, Duration::from_secs(multiplier * unit_secs)))
    }
}

/// Outcome of a throttle check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Injectable request throttle; increment-and-test must be atomic per key
pub trait RequestThrottle: Send + Sync {
    fn check(&self, scope: &str, client: &str) -> RateDecision;

    /// Drop state for windows that have ended
    fn sweep(&self) -> usize {
        0
    }

    /// Number of live counters
    fn tracked(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

struct WindowTable {
    windows: HashMap<(String, String), Window>,
    /// Table size that triggers the next inline sweep
    next_sweep: usize,
}

/// Fixed-window counter per `(scope, client)`, held in memory behind one lock
pub struct FixedWindowLimiter {
    quota: RateQuota,
    table: Mutex<WindowTable>,
    sweep_threshold: usize,
}

impl FixedWindowLimiter {
    const DEFAULT_SWEEP_THRESHOLD: usize = 10_000;

    pub fn new(quota: RateQuota) -> Self {
        Self::with_sweep_threshold(quota, Self::DEFAULT_SWEEP_THRESHOLD)
    }

    /// `sweep_threshold` is the number of live windows at which a check first
    /// sweeps ended windows inline.
    pub fn with_sweep_threshold(quota: RateQuota, sweep_threshold: usize) -> Self {
        let sweep_threshold = sweep_threshold.max(1);
        FixedWindowLimiter {
            quota,
            table: Mutex::new(WindowTable {
                windows: HashMap::new(),
                next_sweep: sweep_threshold,
            }),
            sweep_threshold,
        }
    }

    pub fn quota(&self) -> RateQuota {
        self.quota
    }

    pub fn check_at(&self, scope: &str, client: &str, now: Instant) -> RateDecision {
        let mut table = self.table.lock();

        if table.windows.len() >= table.next_sweep {
            Self::retain_live(&mut table.windows, self.quota.window, now);
            // Live windows stay: wait for the table to double before scanning again
            table.next_sweep = (table.windows.len() * 2).max(self.sweep_threshold);
        }

        let window = table
            .windows
            .entry((scope.to_string(), client.to_string()))
            .or_insert(Window { started: now, count: 0 });

        if now.saturating_duration_since(window.started) >= self.quota.window {
            *window = Window { started: now, count: 0 };
        }

        if window.count >= self.quota.limit {
            let elapsed = now.saturating_duration_since(window.started);
            return RateDecision::Limited {
                retry_after: self.quota.window.saturating_sub(elapsed),
            };
        }

        window.count += 1;
        RateDecision::Allowed {
            remaining: self.quota.limit - window.count,
        }
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut table = self.table.lock();
        let before = table.windows.len();
        Self::retain_live(&mut table.windows, self.quota.window, now);
        table.next_sweep = (table.windows.len() * 2).max(self.sweep_threshold);
        before - table.windows.len()
    }

    /// Size at which the next check sweeps inline
    pub fn next_sweep_at(&self) -> usize {
        self.table.lock().next_sweep
    }

    fn retain_live(windows: &mut HashMap<(String, String), Window>, length: Duration, now: Instant) {
        windows.retain(|_, w| now.saturating_duration_since(w.started) < length);
    }
}

impl RequestThrottle for FixedWindowLimiter {
    fn check(&self, scope: &str, client: &str) -> RateDecision {
        self.check_at(scope, client, Instant::now())
    }

    fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn tracked(&self) -> usize {
        self.table.lock().windows.len()
    }
}
