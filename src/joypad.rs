// Joypad (按鍵輸入) - 記錄前端送進來的按鍵狀態、連射按鍵與倒帶按鍵

use serde::{Deserialize, Serialize};

use crate::engine::Engine;

/// Game Boy 的八個實體按鍵
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Right,
    Left,
    Up,
    Down,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Right,
        Button::Left,
        Button::Up,
        Button::Down,
    ];

    // 位元: 0=A/右, 1=B/左, 2=Select/上, 3=Start/下
    fn bit(self) -> u8 {
        match self {
            Button::A | Button::Right => 0x01,
            Button::B | Button::Left => 0x02,
            Button::Select | Button::Up => 0x04,
            Button::Start | Button::Down => 0x08,
        }
    }

    fn is_direction(self) -> bool {
        matches!(
            self,
            Button::Right | Button::Left | Button::Up | Button::Down
        )
    }
}

/// 前端可以設定的輸入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Input {
    /// 一般按鍵
    Button(Button),
    /// 連射按鍵：按住時每 N 幀自動切換按下/放開
    Rapid(Button),
    /// 倒帶意圖：按住期間每幀倒退一格歷史
    Rewind,
}

/// 按鍵狀態 (0 代表按下，1 代表放開)，和硬體 P1 暫存器的排列一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoypadState {
    pub action_keys: u8,
    pub direction_keys: u8,
}

impl Default for JoypadState {
    fn default() -> Self {
        JoypadState {
            action_keys: 0x0F,    // 預設為全放開 (1)
            direction_keys: 0x0F, // 預設為全放開 (1)
        }
    }
}

impl JoypadState {
    pub fn set(&mut self, button: Button, pressed: bool) {
        let keys = if button.is_direction() {
            &mut self.direction_keys
        } else {
            &mut self.action_keys
        };
        if pressed {
            *keys &= !button.bit();
        } else {
            *keys |= button.bit();
        }
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        let keys = if button.is_direction() {
            self.direction_keys
        } else {
            self.action_keys
        };
        keys & button.bit() == 0
    }
}

/// 連射狀態：所有登記的按鍵共用同一個相位
#[derive(Debug, Clone)]
pub struct RapidFire {
    held: JoypadState,
    interval: u32,
    counter: u32,
    phase: bool,
}

impl RapidFire {
    pub fn new(interval_frames: u32) -> Self {
        RapidFire {
            held: JoypadState::default(),
            interval: interval_frames.max(1),
            counter: 0,
            phase: false,
        }
    }

    pub fn set_interval(&mut self, interval_frames: u32) {
        self.interval = interval_frames.max(1);
        self.counter = 0;
    }

    pub fn is_held(&self, button: Button) -> bool {
        self.held.is_pressed(button)
    }

    /// 連射目前是否讓 `button` 處於按下的相位
    pub fn is_active(&self, button: Button) -> bool {
        self.phase && self.held.is_pressed(button)
    }

    /// 登記或取消一個連射按鍵，回傳連射這邊現在是否按下
    pub fn set_held(&mut self, button: Button, held: bool) -> bool {
        self.held.set(button, held);
        self.is_active(button)
    }

    /// 每個 vblank 呼叫一次；相位翻轉時把新狀態套用到所有連射按鍵
    ///
    /// 同一顆鍵也被一般方式按著 (`pressed`) 時保持按下。
    pub fn on_frame(&mut self, engine: &mut dyn Engine, pressed: &JoypadState) {
        self.counter += 1;
        if self.counter < self.interval {
            return;
        }
        self.counter = 0;
        self.phase = !self.phase;

        for button in Button::ALL {
            if self.held.is_pressed(button) {
                engine.set_key(button, self.phase || pressed.is_pressed(button));
            }
        }
    }
}
