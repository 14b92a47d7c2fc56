//! Game Boy 模擬驅動層
//!
//! 在單執行緒、以回呼驅動的外部模擬引擎和應用程式其他部分 (介面、音訊裝置、
//! 除錯工具) 之間負責同步與即時排程：背景主迴圈、單一互斥鎖、中斷點握手、
//! 四格畫面緩衝、帶背壓的音訊串流與倒帶控制。

pub mod audio;
pub mod config;
pub mod debugger;
pub mod driver;
pub mod engine;
pub mod error;
pub mod joypad;
pub mod registers;
pub mod rewind;
pub mod rom;
#[cfg(feature = "sdl")]
pub mod sdl_audio;
pub mod timing;
pub mod video;

pub use audio::AudioDevice;
pub use config::DriverConfig;
pub use debugger::{BreakAndTrace, PauseState, TraceSnapshot};
pub use driver::{Driver, LoopHandle};
pub use engine::{CommandBuffer, Engine, EngineHost, Model, RunOutcome, Sample};
pub use error::{DriverError, EngineError, Result};
pub use joypad::{Button, Input};
pub use registers::{Register, Registers};
pub use video::PresentationMode;
