// locus_core/src/diagnostics.rs

//! Health reporting primitives shared by updaters, filters and the health
//! aggregator.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::ops::AddAssign;
use std::time::Duration;

use serde::Serialize;

// =========================================================================
// == Report Types ==
// =========================================================================

/// Severity of a diagnostic, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DiagnosticStatus {
    Ok,
    Warn,
    Error,
    /// No data has been seen yet.
    Stale,
}

impl fmt::Display for DiagnosticStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiagnosticStatus::Ok => "OK",
            DiagnosticStatus::Warn => "WARN",
            DiagnosticStatus::Error => "ERROR",
            DiagnosticStatus::Stale => "STALE",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub status: DiagnosticStatus,
    pub message: String,
}

impl Diagnostic {
    pub fn new(status: DiagnosticStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// A snapshot of health, regenerated on every request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DiagnosticReport {
    pub diagnostics: Vec<Diagnostic>,
    /// Free-form key/value details (rates, counters, thresholds).
    pub info: BTreeMap<String, String>,
}

impl DiagnosticReport {
    pub fn push(&mut self, status: DiagnosticStatus, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(status, message));
    }

    pub fn set_info(&mut self, key: impl Into<String>, value: impl ToString) {
        self.info.insert(key.into(), value.to_string());
    }

    /// The worst status across all diagnostics. An empty report is `Ok`.
    pub fn status(&self) -> DiagnosticStatus {
        self.diagnostics
            .iter()
            .map(|d| d.status)
            .max()
            .unwrap_or(DiagnosticStatus::Ok)
    }
}

impl AddAssign for DiagnosticReport {
    fn add_assign(&mut self, other: Self) {
        self.diagnostics.extend(other.diagnostics);
        self.info.extend(other.info);
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]", self.status())?;
        for diagnostic in &self.diagnostics {
            writeln!(f, "  {}: {}", diagnostic.status, diagnostic.message)?;
        }
        for (key, value) in &self.info {
            writeln!(f, "  {key} = {value}")?;
        }
        Ok(())
    }
}

// =========================================================================
// == Rate Monitor ==
// =========================================================================

/// Liveness bookkeeping for one source.
///
/// Records the stamp of every qualifying observation, estimates the observed
/// rate over a sliding window and decides whether the source is alive at a
/// given heartbeat time. A minimal rate of zero disables the liveness check.
#[derive(Debug, Clone)]
pub struct RateMonitor {
    minimal_rate: u32,
    window: Duration,
    stamps: VecDeque<Duration>,
    last_stamp: Option<Duration>,
}

impl RateMonitor {
    pub fn new(minimal_rate: u32) -> Self {
        Self::with_window(minimal_rate, Duration::from_secs(1))
    }

    pub fn with_window(minimal_rate: u32, window: Duration) -> Self {
        Self {
            minimal_rate,
            window,
            stamps: VecDeque::new(),
            last_stamp: None,
        }
    }

    pub fn minimal_rate(&self) -> u32 {
        self.minimal_rate
    }

    pub fn last_stamp(&self) -> Option<Duration> {
        self.last_stamp
    }

    pub fn record(&mut self, stamp: Duration) {
        // Sources may race at submission; keep the newest stamp as reference.
        let newest = self.last_stamp.map_or(stamp, |last| last.max(stamp));
        self.last_stamp = Some(newest);
        self.stamps.push_back(stamp);
        while let Some(&oldest) = self.stamps.front() {
            if newest.saturating_sub(oldest) > self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Observations per second over the window ending at the newest stamp.
    pub fn rate(&self) -> f64 {
        self.stamps.len() as f64 / self.window.as_secs_f64()
    }

    /// The longest gap tolerated between two qualifying observations.
    pub fn timeout(&self) -> Option<Duration> {
        (self.minimal_rate > 0).then(|| Duration::from_secs_f64(1.0 / self.minimal_rate as f64))
    }

    pub fn is_alive(&self, now: Duration) -> bool {
        match (self.timeout(), self.last_stamp) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(timeout), Some(last)) => now.saturating_sub(last) <= timeout,
        }
    }

    pub fn status(&self, now: Duration) -> DiagnosticStatus {
        if self.last_stamp.is_none() && self.minimal_rate > 0 {
            DiagnosticStatus::Stale
        } else if self.is_alive(now) {
            DiagnosticStatus::Ok
        } else {
            DiagnosticStatus::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_report_status_is_worst() {
        let mut report = DiagnosticReport::default();
        assert_eq!(report.status(), DiagnosticStatus::Ok);

        report.push(DiagnosticStatus::Ok, "fine");
        report.push(DiagnosticStatus::Error, "broken");
        report.push(DiagnosticStatus::Warn, "meh");
        assert_eq!(report.status(), DiagnosticStatus::Error);
    }

    #[test]
    fn test_report_merge() {
        let mut a = DiagnosticReport::default();
        a.push(DiagnosticStatus::Ok, "a");
        a.set_info("a.rate", 10);
        let mut b = DiagnosticReport::default();
        b.push(DiagnosticStatus::Warn, "b");
        b.set_info("b.rate", 2.5);

        a += b;
        assert_eq!(a.diagnostics.len(), 2);
        assert_eq!(a.info["b.rate"], "2.5");
        assert_eq!(a.status(), DiagnosticStatus::Warn);
    }

    #[test]
    fn test_rate_monitor_estimates_rate() {
        let mut monitor = RateMonitor::new(5);
        for i in 0..=20 {
            monitor.record(ms(i * 100));
        }
        // 10 Hz source: 11 stamps fall inside a closed one-second window.
        assert_abs_diff_eq!(monitor.rate(), 11.0);
    }

    #[test]
    fn test_rate_monitor_liveness() {
        let mut monitor = RateMonitor::new(5);
        assert!(!monitor.is_alive(ms(0)));
        assert_eq!(monitor.status(ms(0)), DiagnosticStatus::Stale);

        monitor.record(ms(1000));
        assert!(monitor.is_alive(ms(1100)));
        assert!(monitor.is_alive(ms(1200)));
        assert!(!monitor.is_alive(ms(1201)));
        assert_eq!(monitor.status(ms(1500)), DiagnosticStatus::Error);

        monitor.record(ms(1600));
        assert!(monitor.is_alive(ms(1650)));
    }

    #[test]
    fn test_rate_monitor_zero_rate_is_always_alive() {
        let monitor = RateMonitor::new(0);
        assert!(monitor.is_alive(ms(10_000)));
        assert_eq!(monitor.status(ms(10_000)), DiagnosticStatus::Ok);
    }
}
