use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriverError>;

/// 驅動層對外回報的錯誤。
///
/// 只有可預期、可由呼叫端處理的狀況會走這裡；
/// 違反呼叫契約 (例如重複啟動主迴圈) 直接 panic。
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine rejected the request: {0}")]
    Engine(#[from] EngineError),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("invalid ROM image: {0}")]
    InvalidRom(&'static str),

    #[error("no ROM is loaded")]
    NoRomLoaded,

    #[error("audio device error: {0}")]
    Audio(String),
}

impl DriverError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DriverError::Io {
            path: path.into(),
            source,
        }
    }
}

/// 模擬引擎回報的失敗 (載入 ROM、存檔狀態等)。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("ROM image could not be loaded: {0}")]
    Rom(String),

    #[error("ISX image could not be loaded: {0}")]
    Isx(String),

    #[error("save state is incompatible or corrupt: {0}")]
    SaveState(String),

    #[error("battery data could not be applied: {0}")]
    Battery(String),
}
