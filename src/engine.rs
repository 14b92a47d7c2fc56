//! 模擬引擎邊界
//!
//! 驅動層不負責執行任何 Game Boy 指令；真正的機器由外部引擎實作，
//! 驅動層透過 [`Engine`] 呼叫它，引擎在執行期間再透過 [`EngineHost`]
//! 回呼驅動層 (畫面輸出、vblank、音訊取樣、日誌)。
//!
//! 引擎需要除錯器指令時 (中斷點觸發或單步追蹤)，[`Engine::run`] 回傳
//! [`RunOutcome::InputRequested`] 並停在原地，等驅動層用
//! [`Engine::resume`] 交回一個 [`CommandBuffer`] 才繼續。這段等待期間
//! 驅動層不持有鎖，其他執行緒仍可查詢引擎狀態。

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::joypad::Button;
use crate::registers::Register;

/// 一組立體聲 PCM 取樣
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sample {
    pub left: i16,
    pub right: i16,
}

/// 一次 [`Engine::run`] 的結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// 跑完一個排程量 (通常到下一個畫面邊界)
    Advanced,
    /// 引擎暫停在除錯器輸入點，等待 [`Engine::resume`]
    InputRequested,
}

/// 機型；切換機型會重設引擎與畫面尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Model {
    Dmg,
    Sgb,
    Sgb2,
    #[default]
    Cgb,
    Agb,
}

/// 交給引擎的除錯器指令
///
/// 驅動層建立後以值移交，之後由引擎負責釋放；驅動層不再持有它。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuffer(String);

impl CommandBuffer {
    pub fn new(command: impl Into<String>) -> Self {
        CommandBuffer(command.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for CommandBuffer {
    fn from(command: &str) -> Self {
        CommandBuffer::new(command)
    }
}

/// 引擎在執行期間回呼驅動層的介面
///
/// 所有回呼都在主迴圈執行緒上、持有鎖的期間同步發生。
pub trait EngineHost {
    /// 目前正在寫入的畫面緩衝區 (`width * height` 個 32 位元像素)
    fn pixels(&mut self) -> &mut [u32];

    /// 一幀畫完；之後 [`EngineHost::pixels`] 會回傳下一個緩衝區
    fn vblank(&mut self);

    fn sample(&mut self, sample: Sample);

    fn log(&mut self, text: &str);
}

/// 執行 `f` 期間把引擎日誌攔截成字串，其他回呼照常轉給 `host`
pub fn capture_log(host: &mut dyn EngineHost, f: impl FnOnce(&mut dyn EngineHost)) -> String {
    let mut capture = LogCapture {
        inner: host,
        text: String::new(),
    };
    f(&mut capture);
    capture.text
}

struct LogCapture<'a> {
    inner: &'a mut dyn EngineHost,
    text: String,
}

impl EngineHost for LogCapture<'_> {
    fn pixels(&mut self) -> &mut [u32] {
        self.inner.pixels()
    }

    fn vblank(&mut self) {
        self.inner.vblank();
    }

    fn sample(&mut self, sample: Sample) {
        self.inner.sample(sample);
    }

    fn log(&mut self, text: &str) {
        self.text.push_str(text);
    }
}

/// 外部模擬引擎
pub trait Engine: Send {
    /// 推進一個排程量
    fn run(&mut self, host: &mut dyn EngineHost) -> RunOutcome;

    /// 交回除錯器指令 (`continue`、`step`、`next` ...)，解除輸入等待
    fn resume(&mut self, command: CommandBuffer);

    /// 畫面寬高 (像素)
    fn screen_size(&self) -> (u32, u32);

    /// 原生幀率 (Hz)
    fn native_frame_rate(&self) -> f64;

    fn reset(&mut self);

    fn switch_model(&mut self, model: Model);

    fn load_rom(&mut self, data: &[u8]) -> Result<(), EngineError>;

    fn load_isx(&mut self, data: &[u8]) -> Result<(), EngineError>;

    fn load_battery(&mut self, data: &[u8]) -> Result<(), EngineError>;

    fn save_battery(&self) -> Vec<u8>;

    fn load_symbols(&mut self, text: &str);

    fn clear_symbols(&mut self);

    fn set_sample_rate(&mut self, sample_rate: u32);

    fn set_clock_multiplier(&mut self, multiplier: f64);

    /// 加速模式：引擎本身不限速
    fn set_turbo(&mut self, enabled: bool);

    fn set_rewind_length(&mut self, seconds: f64);

    /// 彈出一筆倒帶歷史並套用；歷史用完時回傳 false
    fn rewind_pop(&mut self) -> bool;

    fn set_key(&mut self, button: Button, pressed: bool);

    fn register(&self, register: Register) -> u16;

    fn set_register(&mut self, register: Register, value: u16);

    fn breakpoints(&self) -> Vec<u16>;

    /// 目前呼叫堆疊的返回位址，最內層在前 (第 0 筆是目前的 PC)
    fn backtrace(&self) -> Vec<u16>;

    /// 執行除錯器指令，輸出寫到 [`EngineHost::log`]
    fn execute_command(&mut self, command: CommandBuffer, host: &mut dyn EngineHost);

    /// 反組譯 `count` 條指令，輸出寫到 [`EngineHost::log`]
    fn disassemble(&mut self, address: u16, count: u8, host: &mut dyn EngineHost);

    fn evaluate(&mut self, expression: &str) -> Option<u16>;

    /// 下一個輸入點立刻中斷
    fn break_immediately(&mut self);

    fn save_state(&self) -> Vec<u8>;

    fn load_state(&mut self, data: &[u8]) -> Result<(), EngineError>;
}
