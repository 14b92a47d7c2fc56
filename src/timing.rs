//! 幀率量測與加速模式的限速

use std::time::{Duration, Instant};

const RING_SIZE: usize = 30;

/// 最近 30 個 vblank 間隔的環狀紀錄
///
/// 游標每繞回 0 一次就重新計算 `frame_rate = 30 / sum(間隔)`。
#[derive(Debug, Clone)]
pub struct FrameTimer {
    intervals: [f64; RING_SIZE],
    cursor: usize,
    last_vblank: Option<Instant>,
    frame_rate: f64,
}

impl Default for FrameTimer {
    fn default() -> Self {
        FrameTimer::new()
    }
}

impl FrameTimer {
    pub fn new() -> Self {
        FrameTimer {
            intervals: [0.0; RING_SIZE],
            cursor: 0,
            last_vblank: None,
            frame_rate: 0.0,
        }
    }

    /// 清空紀錄，下一個 vblank 只當作起點
    pub fn reset(&mut self) {
        *self = FrameTimer::new();
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn record(&mut self, now: Instant) {
        let Some(last) = self.last_vblank.replace(now) else {
            return;
        };

        self.intervals[self.cursor] = now.saturating_duration_since(last).as_secs_f64();
        self.cursor = (self.cursor + 1) % RING_SIZE;
        if self.cursor == 0 {
            let sum: f64 = self.intervals.iter().sum();
            if sum > 0.0 {
                self.frame_rate = RING_SIZE as f64 / sum;
            }
        }
    }
}

/// 加速模式下把每幀的間隔壓在 `1 / (native_fps * ratio)` 秒
#[derive(Debug, Clone)]
pub struct TurboLimiter {
    enabled: bool,
    ratio: f64,
    next_wake: Option<Instant>,
}

impl TurboLimiter {
    pub fn new(ratio: f64) -> Self {
        TurboLimiter {
            enabled: false,
            ratio: ratio.max(1.0),
            next_wake: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.next_wake = None;
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn set_ratio(&mut self, ratio: f64) {
        self.ratio = ratio.max(1.0);
    }

    pub fn frame_period(&self, native_fps: f64) -> Duration {
        let micros = 1_000_000.0 / native_fps.max(1.0) / self.ratio;
        Duration::from_micros(micros as u64)
    }

    /// 算出下一次應該醒來的時間並記住
    ///
    /// 落後超過一幀時直接從 `now` 重新排程，不去追趕。
    pub fn schedule(&mut self, now: Instant, native_fps: f64) -> Instant {
        let period = self.frame_period(native_fps);
        let wake = match self.next_wake {
            Some(previous) if previous + period >= now => previous + period,
            _ => now + period,
        };
        self.next_wake = Some(wake);
        wake
    }

    /// 忙等到 `deadline`；呼叫端必須先放開鎖
    pub fn wait_until(deadline: Instant) {
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}
