use crate::engine::Engine;

/// 倒帶控制：歷史本身存在引擎裡，這裡只記錄意圖與進度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewindState {
    requested: bool,
    pending: bool,
    paused: bool,
}

impl RewindState {
    pub fn is_requested(&self) -> bool {
        self.requested
    }

    /// 歷史用完而停住
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// 倒帶鍵按下或放開
    ///
    /// 放開時清掉暫停與待處理的倒帶；按下時立刻排一次倒帶，
    /// 即使模擬目前沒有在跑 (例如手動暫停) 也能看到效果。
    pub fn set_requested(&mut self, requested: bool) {
        self.requested = requested;
        if requested {
            self.pending = true;
        } else {
            self.paused = false;
            self.pending = false;
        }
    }

    /// 每個 vblank 呼叫；暫停中不再累積
    pub fn on_vblank(&mut self) {
        if self.requested && !self.paused {
            self.pending = true;
        }
    }

    /// 在主迴圈開頭套用待處理的倒帶，回傳是否有套用
    ///
    /// 連續彈出兩筆：單一幀的歷史回放後會重新產生自己那一筆，
    /// 只彈一筆的話畫面不會倒退。第二次失敗表示歷史見底。
    pub fn apply(&mut self, engine: &mut dyn Engine) -> bool {
        if !self.pending {
            return false;
        }
        self.pending = false;

        engine.rewind_pop();
        if !engine.rewind_pop() {
            tracing::debug!("rewind history exhausted");
            self.paused = true;
        }
        true
    }

    /// 引擎重設後歷史已經清空；倒帶鍵若還按著，下一個 vblank 會重新排程
    pub fn reset(&mut self) {
        self.pending = false;
        self.paused = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vblank_only_flags_while_requested() {
        let mut state = RewindState::default();
        state.on_vblank();
        assert!(!state.pending);

        state.set_requested(true);
        state.pending = false;
        state.on_vblank();
        assert!(state.pending);
    }

    #[test]
    fn releasing_clears_pause_and_pending() {
        let mut state = RewindState::default();
        state.set_requested(true);
        state.paused = true;
        state.set_requested(false);
        assert!(!state.is_paused());
        assert!(!state.pending);
    }

    #[test]
    fn reset_keeps_the_held_key() {
        let mut state = RewindState::default();
        state.set_requested(true);
        state.paused = true;
        state.reset();
        assert!(state.is_requested());
        assert!(!state.is_paused());
        assert!(!state.pending);

        state.on_vblank();
        assert!(state.pending);
    }

    #[test]
    fn paused_state_stops_flagging() {
        let mut state = RewindState::default();
        state.set_requested(true);
        state.pending = false;
        state.paused = true;
        state.on_vblank();
        assert!(!state.pending);
    }
}
