//! Per-coupler rate accounting: the "Counters" this crate's data model
//! input/output/raw totals and rates, reset every reporting interval.

use std::time::{Duration, Instant};

use tracing::info;

/// Counters for one coupler, mutated only by that coupler's own worker.
pub struct CouplerMetrics {
    pub coupler: String,
    pub input_total: u64,
    pub output_total: u64,
    pub raw_total: u64,
    input_at_window_start: u64,
    output_at_window_start: u64,
    raw_at_window_start: u64,
    window_start: Instant,
}

impl CouplerMetrics {
    pub fn new(coupler: impl Into<String>) -> Self {
        CouplerMetrics {
            coupler: coupler.into(),
            input_total: 0,
            output_total: 0,
            raw_total: 0,
            input_at_window_start: 0,
            output_at_window_start: 0,
            raw_at_window_start: 0,
            window_start: Instant::now(),
        }
    }

    pub fn record_input(&mut self) {
        self.input_total += 1;
    }

    pub fn record_output(&mut self) {
        self.output_total += 1;
    }

    pub fn record_raw(&mut self) {
        self.raw_total += 1;
    }

    /// Computes per-interval rates since the last report and resets the
    /// window. Does not reset the running totals, which are cumulative for
    /// the coupler's whole lifetime.
    pub fn report(&mut self) -> CouplerRateReport {
        let elapsed = self.window_start.elapsed().as_secs_f64().max(0.001);
        let report = CouplerRateReport {
            coupler: self.coupler.clone(),
            input_rate: (self.input_total - self.input_at_window_start) as f64 / elapsed,
            output_rate: (self.output_total - self.output_at_window_start) as f64 / elapsed,
            raw_rate: (self.raw_total - self.raw_at_window_start) as f64 / elapsed,
            input_total: self.input_total,
            output_total: self.output_total,
            had_input_this_window: self.input_total > self.input_at_window_start,
        };
        self.input_at_window_start = self.input_total;
        self.output_at_window_start = self.output_total;
        self.raw_at_window_start = self.raw_total;
        self.window_start = Instant::now();
        report
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CouplerRateReport {
    pub coupler: String,
    pub input_rate: f64,
    pub output_rate: f64,
    pub raw_rate: f64,
    pub input_total: u64,
    pub output_total: u64,
    pub had_input_this_window: bool,
}

impl CouplerRateReport {
    pub fn log(&self) {
        info!(
            coupler = %self.coupler,
            input_rate = format!("{:.2}", self.input_rate),
            output_rate = format!("{:.2}", self.output_rate),
            raw_rate = format!("{:.2}", self.raw_rate),
            input_total = self.input_total,
            output_total = self.output_total,
            "coupler report"
        );
    }
}

/// Drives the periodic report timer (default 30 s, overridable by `--timer`)
/// that the coupler runner loop consults.
pub struct ReportTimer {
    last_report: Instant,
    interval: Duration,
}

impl ReportTimer {
    pub fn new(interval: Duration) -> Self {
        ReportTimer {
            last_report: Instant::now(),
            interval,
        }
    }

    pub fn due(&self) -> bool {
        self.last_report.elapsed() >= self.interval
    }

    pub fn rearm(&mut self) {
        self.last_report = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_report_counts_the_window_only() {
        let mut metrics = CouplerMetrics::new("can0");
        for _ in 0..5 {
            metrics.record_input();
        }
        let report = metrics.report();
        assert_eq!(report.input_total, 5);
        assert!(report.had_input_this_window);

        let report2 = metrics.report();
        assert_eq!(report2.input_total, 5);
        assert!(!report2.had_input_this_window);
    }

    #[test]
    fn report_timer_fires_after_interval() {
        let mut timer = ReportTimer::new(Duration::from_millis(20));
        assert!(!timer.due());
        std::thread::sleep(Duration::from_millis(25));
        assert!(timer.due());
        timer.rearm();
        assert!(!timer.due());
    }
}
