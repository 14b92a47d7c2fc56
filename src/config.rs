use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};
use crate::video::PresentationMode;

/// 驅動層的可調參數，從 JSON 讀入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub presentation_mode: PresentationMode,
    /// 0~100
    pub volume: u8,
    pub mono: bool,
    /// 引擎輸出的取樣率；[`crate::Driver::set_audio_enabled`] 可以再改
    pub sample_rate: u32,
    /// 音訊裝置的基本緩衝大小 (幀)，SDL 輸出用它決定送出的批次
    pub audio_buffer_frames: usize,
    /// 加速模式相對原生速度的倍率
    pub turbo_ratio: f64,
    /// 連射每隔幾幀切換一次
    pub rapid_fire_interval: u32,
    pub rewind_seconds: f64,
    /// 暫停時主迴圈每圈睡多久
    pub paused_sleep_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            presentation_mode: PresentationMode::Double,
            volume: 100,
            mono: false,
            sample_rate: 44100,
            audio_buffer_frames: 1024,
            turbo_ratio: 2.0,
            rapid_fire_interval: 2,
            rewind_seconds: 30.0,
            paused_sleep_ms: 10,
        }
    }
}

impl DriverConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: DriverConfig = serde_json::from_str(text)?;
        Ok(config.normalized())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| DriverError::io(path, e))?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.display(), ?config, "loaded driver config");
        Ok(config)
    }

    /// 把超出範圍的值拉回可用範圍
    pub fn normalized(mut self) -> Self {
        self.volume = self.volume.min(100);
        self.sample_rate = self.sample_rate.max(1);
        self.audio_buffer_frames = self.audio_buffer_frames.max(1);
        self.rapid_fire_interval = self.rapid_fire_interval.max(1);
        self.paused_sleep_ms = self.paused_sleep_ms.max(1);
        if self.turbo_ratio.is_nan() || self.turbo_ratio < 1.0 {
            self.turbo_ratio = 1.0;
        }
        if self.rewind_seconds.is_nan() || self.rewind_seconds < 0.0 {
            self.rewind_seconds = 0.0;
        }
        self
    }
}
