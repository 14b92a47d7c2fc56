//! 音訊串流：音量/單聲道轉換、內部緩衝與輸出裝置的背壓策略

/// 可排隊播放的音訊輸出裝置
///
/// 數量單位都是「幀」(一組左右聲道取樣)。
pub trait AudioDevice: Send {
    /// 目前排在裝置佇列中、尚未播放的幀數
    fn queued_frames(&self) -> usize;

    /// 把交錯排列的立體聲取樣送進佇列
    fn queue(&mut self, samples: &[i16]);

    /// 清空裝置佇列
    fn clear(&mut self);

    /// 確保裝置沒有暫停
    fn resume(&mut self);

    /// 裝置的基本緩衝大小 (幀)
    fn buffer_size(&self) -> usize;
}

/// 把 0~100 的介面音量換成線性增益
///
/// 近似對數曲線：`100^(v/100) / 100 - 0.01 * (100 - v) / 100`，
/// 所以 `gain(100) == 1.0`、`gain(0) == 0.0`。
pub fn volume_gain(volume: u8) -> f64 {
    let v = volume.min(100) as f64;
    100f64.powf(v / 100.0) / 100.0 - 0.01 * (100.0 - v) / 100.0
}

pub struct AudioStreamer {
    enabled: bool,
    volume: u8,
    gain: f64,
    mono: bool,
    turbo: bool,
    buffer: Vec<i16>,
    device: Option<Box<dyn AudioDevice>>,
}

impl std::fmt::Debug for AudioStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStreamer")
            .field("enabled", &self.enabled)
            .field("volume", &self.volume)
            .field("mono", &self.mono)
            .field("turbo", &self.turbo)
            .field("buffered", &self.buffer.len())
            .field("device", &self.device.is_some())
            .finish()
    }
}

impl AudioStreamer {
    pub fn new(volume: u8, mono: bool) -> Self {
        let volume = volume.min(100);
        AudioStreamer {
            enabled: false,
            volume,
            gain: volume_gain(volume),
            mono,
            turbo: false,
            buffer: Vec::new(),
            device: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 開關音訊；關閉時丟掉尚未取走的取樣
    pub fn set_enabled(&mut self, enabled: bool, sample_rate: u32) {
        self.buffer.clear();
        if enabled {
            // 預留一秒的立體聲取樣
            self.buffer.reserve(sample_rate as usize * 2);
        }
        self.enabled = enabled;
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
        self.gain = volume_gain(self.volume);
    }

    pub fn is_mono(&self) -> bool {
        self.mono
    }

    pub fn set_mono(&mut self, mono: bool) {
        self.mono = mono;
    }

    pub fn set_turbo(&mut self, turbo: bool) {
        self.turbo = turbo;
    }

    pub fn attach_device(&mut self, device: Box<dyn AudioDevice>) -> Option<Box<dyn AudioDevice>> {
        self.buffer.clear();
        self.device.replace(device)
    }

    pub fn detach_device(&mut self) -> Option<Box<dyn AudioDevice>> {
        self.buffer.clear();
        self.device.take()
    }

    /// 取走所有緩衝的取樣
    pub fn take_samples(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.buffer)
    }

    /// 把緩衝的取樣接到 `destination` 後面並清空
    pub fn transfer_samples(&mut self, destination: &mut Vec<i16>) {
        destination.extend_from_slice(&self.buffer);
        self.buffer.clear();
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffer.len() / 2
    }

    /// 處理引擎產生的一組取樣
    pub fn push(&mut self, left: i16, right: i16) {
        if !self.enabled {
            return;
        }

        let (mut left, mut right) = (left as i32, right as i32);
        if self.mono {
            left = (left + right) / 2;
            right = left;
        }
        if self.volume < 100 {
            left = (left as f64 * self.gain) as i32;
            right = (right as f64 * self.gain) as i32;
        }
        let (left, right) = (clamp_i16(left), clamp_i16(right));

        let Some(device) = self.device.as_mut() else {
            self.buffer.extend_from_slice(&[left, right]);
            return;
        };

        let buffer_size = device.buffer_size();
        let queued = device.queued_frames();
        let limit = buffer_size * if self.turbo { 4 } else { 8 };

        if queued > limit {
            if self.turbo {
                // 加速模式本來就不跟實際時間同步，直接丟掉
                return;
            }
            // 延遲過大：清掉整個佇列，會有一聲爆音但能壓回延遲
            tracing::debug!(queued, limit, "audio queue overrun, flushing");
            device.clear();
            self.buffer.clear();
        }

        self.buffer.extend_from_slice(&[left, right]);

        let target = if self.turbo {
            0
        } else if queued < buffer_size {
            // 佇列快空了，先多累積一些避免斷音
            buffer_size * 4
        } else {
            buffer_size
        };

        if self.buffer.len() / 2 >= target {
            device.queue(&self.buffer);
            self.buffer.clear();
            device.resume();
        }
    }
}

fn clamp_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
