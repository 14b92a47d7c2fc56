//! SDL3 音訊輸出 (`sdl` feature)
//!
//! SDL 的播放串流用拉取式回呼，驅動層則是推送式。兩邊用一條有界的
//! crossbeam channel 接起來：[`SdlAudioSink`] 放進驅動當作 [`AudioDevice`]，
//! 回呼從 channel 取資料，不夠時補靜音。
//!
//! [`SdlAudioOutput`] 持有 SDL 串流本身，要留在建立它的執行緒上。

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use sdl3::audio::{AudioCallback, AudioFormat, AudioSpec, AudioStream, AudioStreamWithCallback};
use sdl3::{AudioSubsystem, Sdl};

use crate::audio::AudioDevice;
use crate::config::DriverConfig;
use crate::error::{DriverError, Result};

const CHANNELS: usize = 2;
// 背壓上限是 8 個緩衝再加一批 4 個緩衝的預先累積
const CAPACITY_IN_BUFFERS: usize = 16;

/// 開著的 SDL 播放串流
pub struct SdlAudioOutput {
    _stream: AudioStreamWithCallback<SampleFeed>,
    _audio: AudioSubsystem,
}

impl std::fmt::Debug for SdlAudioOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdlAudioOutput").finish_non_exhaustive()
    }
}

impl SdlAudioOutput {
    /// 以設定檔的取樣率開啟預設播放裝置，回傳串流與要交給驅動的輸入端
    pub fn open(sdl: &Sdl, config: &DriverConfig) -> Result<(Self, SdlAudioSink)> {
        let audio = sdl.audio().map_err(sdl_error)?;
        let spec = AudioSpec {
            freq: Some(config.sample_rate as i32),
            channels: Some(CHANNELS as i32),
            format: Some(AudioFormat::f32_sys()),
        };

        let (feed, sink) = sample_channel(config.audio_buffer_frames);
        let stream = audio.open_playback_stream(&spec, feed).map_err(sdl_error)?;
        stream.resume().map_err(sdl_error)?;

        tracing::info!(
            sample_rate = config.sample_rate,
            buffer_size = sink.buffer_size,
            "opened SDL audio stream"
        );
        Ok((
            SdlAudioOutput {
                _stream: stream,
                _audio: audio,
            },
            sink,
        ))
    }
}

fn sdl_error(e: sdl3::Error) -> DriverError {
    DriverError::Audio(e.to_string())
}

fn sample_channel(buffer_size: usize) -> (SampleFeed, SdlAudioSink) {
    let buffer_size = buffer_size.max(1);
    let (sender, receiver) = channel::bounded(buffer_size * CAPACITY_IN_BUFFERS * CHANNELS);
    let feed = SampleFeed {
        receiver: receiver.clone(),
    };
    let sink = SdlAudioSink {
        sender,
        drain: receiver,
        buffer_size,
    };
    (feed, sink)
}

/// 回呼端：從 channel 取出交錯的立體聲取樣
#[derive(Debug)]
pub struct SampleFeed {
    receiver: Receiver<i16>,
}

impl SampleFeed {
    fn fill(&mut self, requested: usize) -> Vec<f32> {
        let mut out: Vec<f32> = self
            .receiver
            .try_iter()
            .take(requested)
            .map(|s| s as f32 / 32768.0)
            .collect();
        // 斷音時補靜音
        out.resize(requested, 0.0);
        out
    }
}

impl AudioCallback<f32> for SampleFeed {
    fn callback(&mut self, stream: &mut AudioStream, requested: i32) {
        let samples = self.fill(usize::try_from(requested).unwrap_or(0));
        if let Err(e) = stream.put_data_f32(&samples) {
            tracing::warn!(error = %e, "failed to feed SDL audio stream");
        }
    }
}

/// 驅動端：把取樣推進 channel
#[derive(Debug)]
pub struct SdlAudioSink {
    sender: Sender<i16>,
    drain: Receiver<i16>,
    buffer_size: usize,
}

impl AudioDevice for SdlAudioSink {
    fn queued_frames(&self) -> usize {
        self.sender.len() / CHANNELS
    }

    fn queue(&mut self, samples: &[i16]) {
        for (sent, &sample) in samples.iter().enumerate() {
            match self.sender.try_send(sample) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(dropped = samples.len() - sent, "audio channel full");
                    return;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    fn clear(&mut self) {
        let dropped = self.drain.try_iter().count();
        tracing::trace!(dropped, "cleared audio channel");
    }

    fn resume(&mut self) {
        // 串流在 open 時就已啟動，沒資料時回呼自己補靜音
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
