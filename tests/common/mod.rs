#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use gb_driver::{
    AudioDevice, Button, CommandBuffer, Engine, EngineError, EngineHost, Model, Register, RunOutcome, Sample,
};

pub const PROGRAM_START: u16 = 0x0100;
pub const PROGRAM_END: u16 = 0x0140;
pub const INSTRUCTIONS_PER_FRAME: u32 = 16;
pub const NATIVE_FPS: f64 = 59.73;
pub const CALLER_FRAME: u16 = 0x0150;

const STATE_MAGIC: &[u8; 3] = b"SST";

/// 測試端看得到的引擎副作用
#[derive(Debug, Default)]
pub struct Probe {
    pub keys: HashMap<Button, bool>,
    pub key_history: Vec<(Button, bool)>,
    pub resumed: Vec<String>,
    pub clock_multiplier: Option<f64>,
    pub turbo: bool,
    pub sample_rate: Option<u32>,
    pub frames: u64,
    pub battery: Option<Vec<u8>>,
    pub symbols: Option<String>,
    pub resets: u32,
    pub rewind_pops: u32,
}

#[derive(Clone, Debug, Default)]
pub struct ProbeHandle(Arc<Mutex<Probe>>);

impl ProbeHandle {
    pub fn get(&self) -> MutexGuard<'_, Probe> {
        self.0.lock().unwrap()
    }
}

/// 一台只會把 PC 在 `PROGRAM_START..PROGRAM_END` 之間繞圈的假機器
///
/// 每條指令寫一個像素、產生一組取樣；每 `INSTRUCTIONS_PER_FRAME` 條指令
/// 觸發一次 vblank 並結束這一輪。遇到中斷點、單步或 `break_immediately`
/// 時回傳 `InputRequested`，等 `resume` 交回指令。
pub struct ScriptedEngine {
    probe: ProbeHandle,
    model: Model,
    pc: u16,
    af: u16,
    bc: u16,
    de: u16,
    hl: u16,
    sp: u16,
    breakpoints: Vec<u16>,
    stepping: bool,
    break_now: bool,
    skip_check: bool,
    executed: u32,
    history: Vec<u16>,
    history_cap: usize,
    rom_loaded: bool,
}

impl ScriptedEngine {
    pub fn new() -> (Self, ProbeHandle) {
        let probe = ProbeHandle::default();
        let engine = ScriptedEngine {
            probe: probe.clone(),
            model: Model::Cgb,
            pc: PROGRAM_START,
            af: 0x11B0,
            bc: 0x0013,
            de: 0x00D8,
            hl: 0x014D,
            sp: 0xFFFE,
            breakpoints: Vec::new(),
            stepping: false,
            break_now: false,
            skip_check: false,
            executed: 0,
            history: Vec::new(),
            history_cap: 0,
            rom_loaded: false,
        };
        (engine, probe)
    }

    fn should_stop(&self) -> bool {
        !self.skip_check
            && (self.stepping || self.break_now || self.breakpoints.contains(&self.pc))
    }

    fn execute_one(&mut self, host: &mut dyn EngineHost) {
        let pixels = host.pixels();
        if !pixels.is_empty() {
            let index = self.executed as usize % pixels.len();
            pixels[index] = 0xFF00_0000 | self.pc as u32;
        }
        host.sample(Sample {
            left: self.pc as i16,
            right: -(self.pc as i16),
        });

        self.pc += 1;
        if self.pc >= PROGRAM_END {
            self.pc = PROGRAM_START;
        }
        self.executed += 1;
    }

    fn finish_frame(&mut self, host: &mut dyn EngineHost) {
        host.vblank();
        self.probe.get().frames += 1;
        if self.history_cap > 0 {
            self.history.push(self.pc);
            if self.history.len() > self.history_cap {
                self.history.remove(0);
            }
        }
    }
}

fn parse_address(text: &str) -> Option<u16> {
    let text = text.trim();
    let hex = text.strip_prefix('$')?;
    u16::from_str_radix(hex, 16).ok()
}

impl Engine for ScriptedEngine {
    fn run(&mut self, host: &mut dyn EngineHost) -> RunOutcome {
        loop {
            if self.should_stop() {
                self.break_now = false;
                return RunOutcome::InputRequested;
            }
            self.skip_check = false;

            self.execute_one(host);
            if self.executed % INSTRUCTIONS_PER_FRAME == 0 {
                self.finish_frame(host);
                return RunOutcome::Advanced;
            }
        }
    }

    fn resume(&mut self, command: CommandBuffer) {
        let command = command.into_string();
        self.stepping = matches!(command.as_str(), "step" | "next");
        self.skip_check = true;
        self.probe.get().resumed.push(command);
    }

    fn screen_size(&self) -> (u32, u32) {
        match self.model {
            Model::Sgb | Model::Sgb2 => (256, 224),
            _ => (160, 144),
        }
    }

    fn native_frame_rate(&self) -> f64 {
        NATIVE_FPS
    }

    fn reset(&mut self) {
        self.pc = PROGRAM_START;
        self.executed = 0;
        self.stepping = false;
        self.history.clear();
        self.probe.get().resets += 1;
    }

    fn switch_model(&mut self, model: Model) {
        self.model = model;
        self.reset();
    }

    fn load_rom(&mut self, data: &[u8]) -> Result<(), EngineError> {
        if data.len() < 0x150 {
            return Err(EngineError::Rom("image shorter than its header".into()));
        }
        self.rom_loaded = true;
        Ok(())
    }

    fn load_isx(&mut self, data: &[u8]) -> Result<(), EngineError> {
        if data.is_empty() {
            return Err(EngineError::Isx("empty image".into()));
        }
        self.rom_loaded = true;
        Ok(())
    }

    fn load_battery(&mut self, data: &[u8]) -> Result<(), EngineError> {
        self.probe.get().battery = Some(data.to_vec());
        Ok(())
    }

    fn save_battery(&self) -> Vec<u8> {
        self.probe
            .get()
            .battery
            .clone()
            .unwrap_or_else(|| vec![0xAA; 8])
    }

    fn load_symbols(&mut self, text: &str) {
        self.probe.get().symbols = Some(text.to_owned());
    }

    fn clear_symbols(&mut self) {
        self.probe.get().symbols = None;
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.probe.get().sample_rate = Some(sample_rate);
    }

    fn set_clock_multiplier(&mut self, multiplier: f64) {
        self.probe.get().clock_multiplier = Some(multiplier);
    }

    fn set_turbo(&mut self, enabled: bool) {
        self.probe.get().turbo = enabled;
    }

    fn set_rewind_length(&mut self, seconds: f64) {
        self.history_cap = (seconds * NATIVE_FPS) as usize;
        self.history.truncate(self.history_cap);
    }

    fn rewind_pop(&mut self) -> bool {
        self.probe.get().rewind_pops += 1;
        match self.history.pop() {
            Some(pc) => {
                self.pc = pc;
                true
            }
            None => false,
        }
    }

    fn set_key(&mut self, button: Button, pressed: bool) {
        let mut probe = self.probe.get();
        probe.keys.insert(button, pressed);
        probe.key_history.push((button, pressed));
    }

    fn register(&self, register: Register) -> u16 {
        match register {
            Register::AF => self.af,
            Register::BC => self.bc,
            Register::DE => self.de,
            Register::HL => self.hl,
            Register::SP => self.sp,
            Register::PC => self.pc,
        }
    }

    fn set_register(&mut self, register: Register, value: u16) {
        match register {
            Register::AF => self.af = value & 0xFFF0,
            Register::BC => self.bc = value,
            Register::DE => self.de = value,
            Register::HL => self.hl = value,
            Register::SP => self.sp = value,
            Register::PC => self.pc = value,
        }
    }

    fn breakpoints(&self) -> Vec<u16> {
        self.breakpoints.clone()
    }

    fn backtrace(&self) -> Vec<u16> {
        vec![self.pc, CALLER_FRAME]
    }

    fn execute_command(&mut self, command: CommandBuffer, host: &mut dyn EngineHost) {
        let command = command.into_string();
        let (verb, argument) = match command.split_once(' ') {
            Some((verb, argument)) => (verb, Some(argument)),
            None => (command.as_str(), None),
        };

        match (verb, argument.and_then(parse_address)) {
            ("breakpoint", Some(address)) => {
                if !self.breakpoints.contains(&address) {
                    self.breakpoints.push(address);
                }
                host.log(&format!("Breakpoint set at ${address:04X}\n"));
            }
            ("delete", Some(address)) => {
                self.breakpoints.retain(|&a| a != address);
                host.log(&format!("Breakpoint removed from ${address:04X}\n"));
            }
            ("delete", None) => {
                self.breakpoints.clear();
                host.log("All breakpoints removed\n");
            }
            ("backtrace", None) => {
                host.log(&format!("  >${:04X}\n", self.pc));
                host.log(&format!("  ${CALLER_FRAME:04X}\n"));
            }
            _ => host.log(&format!("Unknown command: {command}\n")),
        }
    }

    fn disassemble(&mut self, address: u16, count: u8, host: &mut dyn EngineHost) {
        for offset in 0..count as u16 {
            host.log(&format!("  ${:04X}: nop\n", address.wrapping_add(offset)));
        }
    }

    fn evaluate(&mut self, expression: &str) -> Option<u16> {
        match expression.trim() {
            "pc" => Some(self.pc),
            "sp" => Some(self.sp),
            other => parse_address(other),
        }
    }

    fn break_immediately(&mut self) {
        self.break_now = true;
    }

    fn save_state(&self) -> Vec<u8> {
        let mut data = STATE_MAGIC.to_vec();
        for value in [self.pc, self.af, self.bc, self.de, self.hl, self.sp] {
            data.extend_from_slice(&value.to_le_bytes());
        }
        data
    }

    fn load_state(&mut self, data: &[u8]) -> Result<(), EngineError> {
        let body = data
            .strip_prefix(STATE_MAGIC.as_slice())
            .filter(|body| body.len() == 12)
            .ok_or_else(|| EngineError::SaveState("bad header".into()))?;
        let mut words = body
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
        let mut next = || words.next().unwrap_or_default();
        self.pc = next();
        self.af = next();
        self.bc = next();
        self.de = next();
        self.hl = next();
        self.sp = next();
        Ok(())
    }
}

/// 裝置端收到的東西
#[derive(Debug, Default)]
pub struct DeviceLog {
    pub batches: Vec<Vec<i16>>,
    pub queued_frames: usize,
    pub clears: u32,
    pub resumes: u32,
}

/// 不會播放的假輸出裝置：送進來的幀一直留在佇列裡，直到被清掉
#[derive(Debug)]
pub struct FakeAudioDevice {
    log: Arc<Mutex<DeviceLog>>,
    buffer_size: usize,
}

impl FakeAudioDevice {
    pub fn new(buffer_size: usize) -> (Self, Arc<Mutex<DeviceLog>>) {
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        let device = FakeAudioDevice {
            log: log.clone(),
            buffer_size,
        };
        (device, log)
    }
}

impl AudioDevice for FakeAudioDevice {
    fn queued_frames(&self) -> usize {
        self.log.lock().unwrap().queued_frames
    }

    fn queue(&mut self, samples: &[i16]) {
        let mut log = self.log.lock().unwrap();
        log.queued_frames += samples.len() / 2;
        log.batches.push(samples.to_vec());
    }

    fn clear(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.queued_frames = 0;
        log.clears += 1;
    }

    fn resume(&mut self) {
        self.log.lock().unwrap().resumes += 1;
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// 輪詢直到條件成立或逾時
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// 至少要有 header 大小才會被假引擎接受
pub fn fake_rom(title: &str) -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    let title = title.as_bytes();
    rom[0x134..0x134 + title.len()].copy_from_slice(title);
    rom[0x147] = 0x03;
    rom
}
