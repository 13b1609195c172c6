//! FPS 统计 (滑动窗口)

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 最近 N 个帧间隔的环形缓冲
#[derive(Debug, Clone)]
pub struct FpsMeter {
    window: usize,
    intervals: VecDeque<Duration>,
    last: Option<Instant>,
}

impl FpsMeter {
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            intervals: VecDeque::with_capacity(window),
            last: None,
        }
    }

    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    /// 记录一次帧时刻, 返回平均间隔的倒数; 不足两个间隔时返回 0
    pub fn tick_at(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last.replace(now) {
            if self.intervals.len() == self.window {
                self.intervals.pop_front();
            }
            self.intervals.push_back(now.saturating_duration_since(last));
        }
        self.fps()
    }

    pub fn fps(&self) -> f64 {
        if self.intervals.len() < 2 {
            return 0.0;
        }
        let total: Duration = self.intervals.iter().sum();
        let mean = total.as_secs_f64() / self.intervals.len() as f64;
        if mean > 0.0 {
            1.0 / mean
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        self.intervals.clear();
        self.last = None;
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new(30)
    }
}
