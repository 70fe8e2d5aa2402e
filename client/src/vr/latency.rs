//! Motion-to-photon latency instrumentation for remote frames.
//!
//! The client records when it submits a head pose for a frame and when
//! that frame finishes rendering locally.  Each rendered remote frame
//! also carries the yaw difference between the pose it was rendered
//! with and the pose tracked at display time.  Samples are kept in a
//! rolling window for percentile statistics and IPC-style reporting.

use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace};

/// Append-only sink for per-frame angular error.
pub trait LatencySink {
    fn submit(&mut self, frame_index: u64, angular_delta_deg: f32);
}

/// One completed remote frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub frame_index: u64,
    /// When the pose for this frame was sent upstream, if seen.
    pub submit_timestamp: Option<Duration>,
    pub render_timestamp: Duration,
    /// Rendered yaw minus tracked yaw, degrees.
    pub angular_delta: f32,
}

impl LatencySample {
    /// Submit-to-render time in milliseconds.
    pub fn motion_to_photon_ms(&self) -> Option<f64> {
        self.submit_timestamp
            .map(|s| self.render_timestamp.saturating_sub(s).as_secs_f64() * 1000.0)
    }
}

/// Configuration for latency collection.
#[derive(Debug, Clone)]
pub struct LatencyConfig {
    /// Samples kept for statistics.
    pub window_size: usize,
    /// Motion-to-photon budget in milliseconds.
    pub budget_ms: f64,
    /// Submitted poses remembered while waiting for their frame.
    pub max_in_flight: usize,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            window_size: 1000,
            budget_ms: 50.0,
            max_in_flight: 256,
        }
    }
}

/// Rolling collector of [`LatencySample`]s.
#[derive(Debug)]
pub struct LatencyCollector {
    pub config: LatencyConfig,
    in_flight: VecDeque<(u64, Duration)>,
    rendered: Option<(u64, Duration)>,
    samples: VecDeque<LatencySample>,
    /// Total remote frames reported.
    pub total_frames: u64,
    /// Frames whose motion-to-photon time exceeded the budget.
    pub over_budget: u64,
    /// Frames rendered with no matching pose submission.
    pub unmatched: u64,
}

impl Default for LatencyCollector {
    fn default() -> Self {
        Self::new(LatencyConfig::default())
    }
}

impl LatencyCollector {
    pub fn new(config: LatencyConfig) -> Self {
        Self {
            in_flight: VecDeque::with_capacity(config.max_in_flight),
            rendered: None,
            samples: VecDeque::with_capacity(config.window_size),
            config,
            total_frames: 0,
            over_budget: 0,
            unmatched: 0,
        }
    }

    /// The pose for `frame_index` was sent upstream at `at`.
    pub fn record_submit(&mut self, frame_index: u64, at: Duration) {
        if frame_index == 0 {
            return;
        }
        self.in_flight.push_back((frame_index, at));
        while self.in_flight.len() > self.config.max_in_flight {
            self.in_flight.pop_front();
        }
    }

    /// Remote frame `frame_index` finished rendering at `at`.
    pub fn record_rendered(&mut self, frame_index: u64, at: Duration) {
        trace!(frame = frame_index, "frame rendered");
        self.rendered = Some((frame_index, at));
    }

    fn take_submit(&mut self, frame_index: u64) -> Option<Duration> {
        // Older entries will never be rendered (superseded frames).
        while let Some(&(idx, at)) = self.in_flight.front() {
            if idx > frame_index {
                return None;
            }
            self.in_flight.pop_front();
            if idx == frame_index {
                return Some(at);
            }
        }
        None
    }

    pub fn samples(&self) -> impl Iterator<Item = &LatencySample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Compute percentile from a sorted slice.
    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = ((sorted.len() as f64 - 1.0) * p / 100.0).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    pub fn stats(&self) -> LatencyStats {
        let mut m2p: Vec<f64> = self
            .samples
            .iter()
            .filter_map(LatencySample::motion_to_photon_ms)
            .collect();
        m2p.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let abs_deltas = self.samples.iter().map(|s| s.angular_delta.abs() as f64);
        let (sum, max) = abs_deltas.fold((0.0, 0.0f64), |(sum, max), d| (sum + d, max.max(d)));

        LatencyStats {
            m2p_p50: Self::percentile(&m2p, 50.0),
            m2p_p95: Self::percentile(&m2p, 95.0),
            m2p_p99: Self::percentile(&m2p, 99.0),
            angular_mean_abs: if self.samples.is_empty() {
                0.0
            } else {
                sum / self.samples.len() as f64
            },
            angular_max_abs: max,
            over_budget_pct: if self.total_frames > 0 {
                (self.over_budget as f64 / self.total_frames as f64) * 100.0
            } else {
                0.0
            },
            total_frames: self.total_frames,
            over_budget: self.over_budget,
            unmatched: self.unmatched,
        }
    }

    /// Format stats as an s-expression for status reporting.
    pub fn stats_sexp(&self) -> String {
        let s = self.stats();
        format!(
            "(:m2p-p50 {:.1} :m2p-p95 {:.1} :m2p-p99 {:.1} :angular-mean {:.2} :angular-max {:.2} :over-budget-pct {:.1} :total-frames {} :unmatched {})",
            s.m2p_p50, s.m2p_p95, s.m2p_p99, s.angular_mean_abs, s.angular_max_abs,
            s.over_budget_pct, s.total_frames, s.unmatched,
        )
    }
}

impl LatencySink for LatencyCollector {
    fn submit(&mut self, frame_index: u64, angular_delta_deg: f32) {
        let render_timestamp = match self.rendered.take() {
            Some((idx, at)) if idx == frame_index => at,
            _ => {
                debug!(frame = frame_index, "latency submit without render record");
                self.unmatched += 1;
                return;
            }
        };
        let submit_timestamp = self.take_submit(frame_index);
        if submit_timestamp.is_none() {
            self.unmatched += 1;
        }

        let sample = LatencySample {
            frame_index,
            submit_timestamp,
            render_timestamp,
            angular_delta: angular_delta_deg,
        };
        if sample
            .motion_to_photon_ms()
            .is_some_and(|ms| ms > self.config.budget_ms)
        {
            self.over_budget += 1;
        }
        self.total_frames += 1;

        self.samples.push_back(sample);
        while self.samples.len() > self.config.window_size {
            self.samples.pop_front();
        }
    }
}

/// Computed latency statistics.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub m2p_p50: f64,
    pub m2p_p95: f64,
    pub m2p_p99: f64,
    pub angular_mean_abs: f64,
    pub angular_max_abs: f64,
    pub over_budget_pct: f64,
    pub total_frames: u64,
    pub over_budget: u64,
    pub unmatched: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn frame(c: &mut LatencyCollector, idx: u64, submit: u64, render: u64, delta: f32) {
        c.record_submit(idx, ms(submit));
        c.record_rendered(idx, ms(render));
        c.submit(idx, delta);
    }

    #[test]
    fn test_empty_stats() {
        let c = LatencyCollector::default();
        let s = c.stats();
        assert_eq!(s.total_frames, 0);
        assert_eq!(s.m2p_p50, 0.0);
        assert_eq!(s.over_budget_pct, 0.0);
    }

    #[test]
    fn test_sample_pairs_submit_and_render() {
        let mut c = LatencyCollector::default();
        frame(&mut c, 1, 10, 42, -1.5);
        assert_eq!(c.len(), 1);
        let sample = c.samples().next().unwrap();
        assert_eq!(sample.frame_index, 1);
        assert_eq!(sample.submit_timestamp, Some(ms(10)));
        assert_eq!(sample.render_timestamp, ms(42));
        assert!((sample.motion_to_photon_ms().unwrap() - 32.0).abs() < 1e-9);
        assert!((c.stats().angular_mean_abs - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_over_budget_detection() {
        let mut c = LatencyCollector::new(LatencyConfig {
            budget_ms: 20.0,
            ..Default::default()
        });
        frame(&mut c, 1, 0, 30, 0.0);
        frame(&mut c, 2, 40, 50, 0.0);
        assert_eq!(c.over_budget, 1);
        assert_eq!(c.total_frames, 2);
        assert!((c.stats().over_budget_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_superseded_submissions_are_dropped() {
        let mut c = LatencyCollector::default();
        c.record_submit(1, ms(0));
        c.record_submit(2, ms(5));
        c.record_submit(3, ms(10));
        // Frames 1 and 2 were overwritten before display.
        c.record_rendered(3, ms(30));
        c.submit(3, 0.0);
        let s = c.samples().next().unwrap();
        assert_eq!(s.submit_timestamp, Some(ms(10)));
        assert_eq!(c.unmatched, 0);
    }

    #[test]
    fn test_submit_without_render_is_unmatched() {
        let mut c = LatencyCollector::default();
        c.submit(9, 1.0);
        assert!(c.is_empty());
        assert_eq!(c.unmatched, 1);
    }

    #[test]
    fn test_window_size_trim() {
        let mut c = LatencyCollector::new(LatencyConfig {
            window_size: 5,
            ..Default::default()
        });
        for i in 1..=10 {
            frame(&mut c, i, i * 10, i * 10 + 5, 0.0);
        }
        assert_eq!(c.len(), 5);
        assert_eq!(c.total_frames, 10);
        assert_eq!(c.samples().next().unwrap().frame_index, 6);
    }

    #[test]
    fn test_in_flight_bound() {
        let mut c = LatencyCollector::new(LatencyConfig {
            max_in_flight: 3,
            ..Default::default()
        });
        for i in 1..=10 {
            c.record_submit(i, ms(i));
        }
        c.record_rendered(2, ms(20));
        c.submit(2, 0.0);
        // Frame 2's submission fell out of the bounded queue.
        assert_eq!(c.samples().next().unwrap().submit_timestamp, None);
        assert_eq!(c.unmatched, 1);
    }

    #[test]
    fn test_stats_sexp_format() {
        let mut c = LatencyCollector::default();
        frame(&mut c, 1, 0, 12, 0.5);
        let sexp = c.stats_sexp();
        assert!(sexp.starts_with("(:m2p-p50 12.0"));
        assert!(sexp.contains(":total-frames 1"));
    }
}
