//! 中斷點握手：暫停狀態、單次追蹤 (break-and-trace) 與除錯器指令格式

use serde::Serialize;

use crate::engine::{CommandBuffer, Engine, EngineHost, capture_log};
use crate::registers::{Flags, Register, Registers};

pub const CONTINUE: &str = "continue";
pub const STEP: &str = "step";
pub const NEXT: &str = "next";
pub const BACKTRACE: &str = "backtrace";
pub const DELETE_ALL: &str = "delete";

pub fn breakpoint_command(address: u16) -> String {
    format!("breakpoint ${address:04X}")
}

pub fn delete_command(address: u16) -> String {
    format!("delete ${address:04X}")
}

/// 把擷取到的日誌依換行切成一行一筆
pub fn split_lines(text: &str) -> Vec<String> {
    text.split_terminator('\n').map(str::to_owned).collect()
}

/// `backtrace` 指令的輸出逐行配上引擎給的位址
///
/// 行數不夠時補空字串；多出來的行忽略。
pub fn zip_backtrace(text: &str, addresses: &[u16]) -> Vec<(String, u16)> {
    let mut lines = text.split_terminator('\n');
    addresses
        .iter()
        .map(|&address| (lines.next().unwrap_or_default().to_owned(), address))
        .collect()
}

/// 主迴圈為什麼停著
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PauseState {
    pub manual: bool,
    pub at_breakpoint: bool,
    /// `unbreak` 留下、還沒交給引擎的指令
    pub pending_continue: Option<String>,
    /// 倒帶歷史見底；實際狀態在 [`crate::rewind::RewindState`]，這裡只在快照時填入
    pub rewind_paused: bool,
    pub zero_speed: bool,
}

impl PauseState {
    /// 手動或速度為零時不推進引擎 (中斷點暫停是在引擎內部等待)
    pub fn halts_loop(&self) -> bool {
        self.manual || self.zero_speed
    }

    /// 只有停在中斷點時才接受；成功時記下指令並解除暫停
    pub fn unbreak(&mut self, command: &str) -> bool {
        if !self.at_breakpoint {
            return false;
        }
        self.pending_continue = Some(command.to_owned());
        self.at_breakpoint = false;
        true
    }
}

/// 一次性的追蹤要求：PC 到達 `address` 後自動走 `step_count` 步
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakAndTrace {
    pub address: u16,
    pub step_count: u32,
    pub step_over: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceSession {
    pub remaining: u32,
    pub step_over: bool,
}

/// 追蹤期間每一步記錄的機器狀態
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceSnapshot {
    #[serde(flatten)]
    pub registers: Registers,
    #[serde(flatten)]
    pub flags: Flags,
    pub step_over: bool,
    pub disassembly: String,
}

#[derive(Debug, Default)]
pub struct TraceState {
    entries: Vec<BreakAndTrace>,
    session: Option<TraceSession>,
    results: Vec<TraceSnapshot>,
}

impl TraceState {
    pub fn register(&mut self, entry: BreakAndTrace) {
        self.entries.retain(|e| e.address != entry.address);
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[BreakAndTrace] {
        &self.entries
    }

    pub fn session(&self) -> Option<TraceSession> {
        self.session
    }

    pub fn results(&self) -> &[TraceSnapshot] {
        &self.results
    }

    /// 取消所有還沒觸發的追蹤；進行中的追蹤照常走完
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 取消 `address` 上還沒觸發的追蹤，回傳是否真的有一筆
    pub fn remove(&mut self, address: u16) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.address != address);
        self.entries.len() != before
    }

    /// 引擎要求輸入時的自動部分
    ///
    /// 回傳要交給引擎的指令；回傳 `None` 表示要進入一般的中斷點暫停，
    /// 由呼叫端放開鎖等待 `unbreak`。
    pub fn on_input_request(
        &mut self,
        engine: &mut dyn Engine,
        host: &mut dyn EngineHost,
    ) -> Option<&'static str> {
        let pc = engine.register(Register::PC);

        if let Some(session) = self.session.as_mut() {
            session.remaining = session.remaining.saturating_sub(1);
            // 真正的中斷點優先，就算剛好是最後一步
            if engine.breakpoints().contains(&pc) {
                tracing::debug!(pc, "breakpoint hit during trace, aborting");
                self.session = None;
                return None;
            }
            if session.remaining == 0 {
                tracing::debug!(pc, snapshots = self.results.len(), "trace finished");
                self.session = None;
                return Some(CONTINUE);
            }
        } else if let Some(index) = self.entries.iter().position(|e| e.address == pc) {
            let entry = self.entries.remove(index);
            capture_log(host, |h| {
                engine.execute_command(CommandBuffer::new(delete_command(pc)), h)
            });
            if entry.step_count == 0 {
                return Some(CONTINUE);
            }
            tracing::debug!(pc, steps = entry.step_count, step_over = entry.step_over, "trace started");
            self.session = Some(TraceSession {
                remaining: entry.step_count,
                step_over: entry.step_over,
            });
            self.results.clear();
            self.results.reserve(entry.step_count as usize);
        }

        let session = self.session?;
        let registers = Registers::capture(engine);
        let disassembly = capture_log(host, |h| engine.disassemble(pc, 1, h));
        self.results.push(TraceSnapshot {
            registers,
            flags: registers.flags(),
            step_over: session.step_over,
            disassembly,
        });

        Some(if session.step_over { NEXT } else { STEP })
    }
}
