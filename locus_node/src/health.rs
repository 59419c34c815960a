// locus_node/src/health.rs

//! Periodic liveness checks and report collection over every bridge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use locus_core::bridge::UpdaterInterface;
use locus_core::diagnostics::{DiagnosticReport, DiagnosticStatus};

use crate::clock::Clock;

type Reporter = Box<dyn Fn(Duration) -> DiagnosticReport + Send + Sync>;

/// Aggregates the health of all registered bridges.
pub struct HealthMonitor {
    clock: Arc<dyn Clock>,
    bridges: Vec<Arc<dyn UpdaterInterface>>,
    reporters: Vec<Reporter>,
    alive: Mutex<HashMap<String, bool>>,
    last_status: Mutex<Option<DiagnosticStatus>>,
}

impl HealthMonitor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            bridges: Vec::new(),
            reporters: Vec::new(),
            alive: Mutex::new(HashMap::new()),
            last_status: Mutex::new(None),
        }
    }

    pub fn register(&mut self, bridge: Arc<dyn UpdaterInterface>) {
        info!("Health monitor watching '{}'", bridge.channel());
        self.bridges.push(bridge);
    }

    /// Adds a report source that is not a bridge, such as the filter.
    pub fn add_reporter<R>(&mut self, reporter: R)
    where
        R: Fn(Duration) -> DiagnosticReport + Send + Sync + 'static,
    {
        self.reporters.push(Box::new(reporter));
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    /// Runs one heartbeat over every bridge and merges all reports.
    pub fn check(&self) -> DiagnosticReport {
        let now = self.clock.now();
        let mut report = DiagnosticReport::default();

        for bridge in &self.bridges {
            let alive = bridge.heartbeat_callback(now);
            let previous = self.alive.lock().insert(bridge.channel().to_string(), alive);
            match (previous, alive) {
                (Some(false), true) => info!("'{}' is alive again", bridge.channel()),
                (Some(true), false) => warn!("'{}' is no longer alive", bridge.channel()),
                _ => {}
            }
            report += bridge.get_report();
        }
        for reporter in &self.reporters {
            report += reporter(now);
        }

        let status = report.status();
        let previous = self.last_status.lock().replace(status);
        if previous != Some(status) {
            match status {
                DiagnosticStatus::Ok => info!("Health: {}", status),
                DiagnosticStatus::Error => error!("Health: {}\n{}", status, report),
                _ => warn!("Health: {}\n{}", status, report),
            }
        } else {
            debug!("Health: {}", status);
        }
        report
    }

    /// Runs `check` every `period` until `running` is cleared.
    pub fn spawn(
        self: Arc<Self>,
        period: Duration,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<HealthThread> {
        let handle = thread::Builder::new()
            .name("health".into())
            .spawn(move || {
                info!("Health thread started ({} bridges)", self.len());
                let mut next = Instant::now() + period;
                while running.load(Ordering::Relaxed) {
                    let now = Instant::now();
                    if now < next {
                        // Short sleeps keep shutdown responsive.
                        thread::sleep((next - now).min(Duration::from_millis(50)));
                        continue;
                    }
                    self.check();
                    next += period;
                }
                info!("Health thread stopped");
            })?;
        Ok(HealthThread { handle })
    }
}

/// Handle to the health thread.
pub struct HealthThread {
    handle: JoinHandle<()>,
}

impl HealthThread {
    pub fn join(self) {
        if let Err(e) = self.handle.join() {
            error!("Health thread panicked: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicU64;

    struct FakeBridge {
        channel: String,
        alive_until: Duration,
        heartbeats: AtomicU64,
    }

    impl UpdaterInterface for FakeBridge {
        fn channel(&self) -> &str {
            &self.channel
        }

        fn heartbeat_callback(&self, now: Duration) -> bool {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            now <= self.alive_until
        }

        fn get_report(&self) -> DiagnosticReport {
            let mut report = DiagnosticReport::default();
            let status = if self.heartbeats.load(Ordering::SeqCst) > 1 {
                DiagnosticStatus::Error
            } else {
                DiagnosticStatus::Ok
            };
            report.push(status, format!("{} updater", self.channel));
            report.set_info(format!("{}.topic", self.channel), &self.channel);
            report
        }
    }

    fn fake(channel: &str, alive_until: u64) -> Arc<FakeBridge> {
        Arc::new(FakeBridge {
            channel: channel.to_string(),
            alive_until: Duration::from_secs(alive_until),
            heartbeats: AtomicU64::new(0),
        })
    }

    #[test]
    fn test_check_aggregates_every_bridge() {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(1)));
        let mut monitor = HealthMonitor::new(clock.clone());
        let course = fake("course", 10);
        let range = fake("range", 10);
        monitor.register(course.clone());
        monitor.register(range.clone());
        monitor.add_reporter(|now| {
            let mut report = DiagnosticReport::default();
            report.set_info("now", now.as_secs());
            report
        });

        let report = monitor.check();
        assert_eq!(report.diagnostics.len(), 2);
        assert_eq!(report.status(), DiagnosticStatus::Ok);
        assert_eq!(report.info["course.topic"], "course");
        assert_eq!(report.info["range.topic"], "range");
        assert_eq!(report.info["now"], "1");
        assert_eq!(course.heartbeats.load(Ordering::SeqCst), 1);
        assert_eq!(range.heartbeats.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_heartbeat_uses_clock_time() {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(1)));
        let mut monitor = HealthMonitor::new(clock.clone());
        monitor.register(fake("pose", 5));

        monitor.check();
        assert!(monitor.alive.lock()["pose"]);

        clock.set(Duration::from_secs(6));
        let report = monitor.check();
        assert!(!monitor.alive.lock()["pose"]);
        assert_eq!(report.status(), DiagnosticStatus::Error);
    }

    #[test]
    fn test_spawned_monitor_stops_on_flag() {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(1)));
        let mut monitor = HealthMonitor::new(clock);
        let bridge = fake("course", 10);
        monitor.register(bridge.clone());

        let running = Arc::new(AtomicBool::new(true));
        let health = Arc::new(monitor)
            .spawn(Duration::from_millis(10), Arc::clone(&running))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while bridge.heartbeats.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        running.store(false, Ordering::Relaxed);
        health.join();

        assert!(bridge.heartbeats.load(Ordering::SeqCst) >= 3);
    }
}
