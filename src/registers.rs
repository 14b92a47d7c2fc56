use serde::{Deserialize, Serialize};

use crate::engine::Engine;

/// 引擎對外提供的 16 位元暫存器對
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    AF,
    BC,
    DE,
    HL,
    SP,
    PC,
}

// F 暫存器高 4 位元的旗標
pub const FLAG_ZERO: u8 = 0x80;
pub const FLAG_SUBTRACT: u8 = 0x40;
pub const FLAG_HALF_CARRY: u8 = 0x20;
pub const FLAG_CARRY: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flags {
    pub zero: bool,
    pub subtract: bool,
    pub half_carry: bool,
    pub carry: bool,
}

impl Flags {
    pub fn from_f(f: u8) -> Self {
        Flags {
            zero: f & FLAG_ZERO != 0,
            subtract: f & FLAG_SUBTRACT != 0,
            half_carry: f & FLAG_HALF_CARRY != 0,
            carry: f & FLAG_CARRY != 0,
        }
    }
}

/// 某一瞬間的完整暫存器內容
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Registers {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub hl: u16,
    pub sp: u16,
    pub pc: u16,
}

impl Registers {
    pub fn capture(engine: &dyn Engine) -> Self {
        let [a, f] = engine.register(Register::AF).to_be_bytes();
        let [b, c] = engine.register(Register::BC).to_be_bytes();
        let [d, e] = engine.register(Register::DE).to_be_bytes();
        Registers {
            a,
            f,
            b,
            c,
            d,
            e,
            hl: engine.register(Register::HL),
            sp: engine.register(Register::SP),
            pc: engine.register(Register::PC),
        }
    }

    pub fn flags(&self) -> Flags {
        Flags::from_f(self.f)
    }
}
