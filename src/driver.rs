//! 同步模擬驅動：背景主迴圈 + 單一互斥鎖
//!
//! 引擎與所有驅動狀態都放在同一把 [`Mutex`] 後面。主迴圈用 `try_lock`
//! 自旋取得鎖 (搭配 [`Backoff`])，把兩次引擎推進之間的排程延遲壓到最低；
//! 其他執行緒的公開操作一律用一般的阻塞 `lock()`。
//!
//! 唯一會在持鎖期間放開鎖的地方是中斷點暫停：引擎停在輸入點時，
//! 主迴圈放開鎖輪詢 `unbreak` 或結束要求，讓前端在暫停期間仍能操作引擎。

use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;

use crate::audio::{AudioDevice, AudioStreamer};
use crate::config::DriverConfig;
use crate::debugger::{
    self, BreakAndTrace, CONTINUE, PauseState, TraceSnapshot, TraceState,
};
use crate::engine::{CommandBuffer, Engine, EngineHost, Model, RunOutcome, Sample, capture_log};
use crate::error::{DriverError, Result};
use crate::joypad::{Input, JoypadState, RapidFire};
use crate::registers::{Register, Registers};
use crate::rewind::RewindState;
use crate::rom::{self, CartridgeHeader};
use crate::timing::{FrameTimer, TurboLimiter};
use crate::video::{FrameBuffers, PresentationMode};

/// 速度倍率的下限；低於它視為「速度為零」而暫停
pub const MIN_SPEED_MULTIPLIER: f64 = 0.001;

// 中斷點暫停時，backoff 用完之後每次輪詢的間隔
const BREAKPOINT_POLL: Duration = Duration::from_millis(1);

/// 引擎在執行期間看到的驅動端
struct HostState {
    video: FrameBuffers,
    audio: AudioStreamer,
    vblanks: u32,
}

impl EngineHost for HostState {
    fn pixels(&mut self) -> &mut [u32] {
        self.video.work_mut()
    }

    fn vblank(&mut self) {
        self.video.rotate();
        self.vblanks += 1;
    }

    fn sample(&mut self, sample: Sample) {
        self.audio.push(sample.left, sample.right);
    }

    fn log(&mut self, text: &str) {
        tracing::info!(target: "gb_driver::engine", "{}", text.trim_end_matches('\n'));
    }
}

struct Shared {
    engine: Box<dyn Engine>,
    host: HostState,
    pause: PauseState,
    trace: TraceState,
    rewind: RewindState,
    timer: FrameTimer,
    turbo: TurboLimiter,
    rapid_fire: RapidFire,
    joypad: JoypadState,
    speed: f64,
    sample_rate: u32,
    finishing: bool,
    rom_loaded: bool,
    paused_sleep: Duration,
}

impl Shared {
    /// 執行除錯器指令並攔下輸出
    fn execute(&mut self, command: &str) -> String {
        let Shared { engine, host, .. } = self;
        capture_log(host, |h| engine.execute_command(CommandBuffer::new(command), h))
    }

    fn sync_screen_size(&mut self) {
        let (width, height) = self.engine.screen_size();
        if self.host.video.dimensions() != (width, height) {
            tracing::debug!(width, height, "screen size changed");
            self.host.video.resize(width, height);
        }
    }

    /// 一輪引擎推進之後處理這段期間發生的 vblank，回傳加速模式下的喚醒時間
    fn finish_frames(&mut self) -> Option<Instant> {
        let vblanks = mem::take(&mut self.host.vblanks);
        if vblanks == 0 {
            return None;
        }

        let now = Instant::now();
        self.timer.record(now);
        for _ in 0..vblanks {
            self.rapid_fire.on_frame(self.engine.as_mut(), &self.joypad);
            self.rewind.on_vblank();
        }

        self.turbo
            .is_enabled()
            .then(|| self.turbo.schedule(now, self.engine.native_frame_rate()))
    }
}

struct Inner {
    shared: Mutex<Shared>,
    running: AtomicBool,
}

/// 模擬驅動的共用把手；複製出來的 `Driver` 指向同一台機器
#[derive(Clone)]
pub struct Driver {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Driver {
    pub fn new(engine: impl Engine + 'static) -> Self {
        Self::with_config(engine, DriverConfig::default())
    }

    pub fn with_config(engine: impl Engine + 'static, config: DriverConfig) -> Self {
        let config = config.normalized();
        let mut engine: Box<dyn Engine> = Box::new(engine);
        let (width, height) = engine.screen_size();
        engine.set_rewind_length(config.rewind_seconds);
        engine.set_sample_rate(config.sample_rate);

        let shared = Shared {
            engine,
            host: HostState {
                video: FrameBuffers::new(width, height, config.presentation_mode),
                audio: AudioStreamer::new(config.volume, config.mono),
                vblanks: 0,
            },
            pause: PauseState::default(),
            trace: TraceState::default(),
            rewind: RewindState::default(),
            timer: FrameTimer::new(),
            turbo: TurboLimiter::new(config.turbo_ratio),
            rapid_fire: RapidFire::new(config.rapid_fire_interval),
            joypad: JoypadState::default(),
            speed: 1.0,
            sample_rate: config.sample_rate,
            finishing: false,
            rom_loaded: false,
            paused_sleep: Duration::from_millis(config.paused_sleep_ms),
        };

        Driver {
            inner: Arc::new(Inner {
                shared: Mutex::new(shared),
                running: AtomicBool::new(false),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 主迴圈專用：不讓排程器介入，一直試到拿到鎖
    fn spin_lock(&self) -> MutexGuard<'_, Shared> {
        let backoff = Backoff::new();
        loop {
            match self.inner.shared.try_lock() {
                Ok(guard) => return guard,
                Err(TryLockError::Poisoned(poisoned)) => return poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => backoff.snooze(),
            }
        }
    }

    // ---- 主迴圈 ----

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn mark_running(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            panic!("emulation loop started while it is already running");
        }
    }

    /// 在目前的執行緒上跑主迴圈，直到 [`Driver::end_loop`]
    ///
    /// # Panics
    ///
    /// 主迴圈已經在跑時呼叫會 panic。
    pub fn run_loop(&self) {
        self.mark_running();
        self.loop_body();
    }

    /// 在新的執行緒上跑主迴圈；回傳的把手被丟掉時會結束並等待主迴圈
    ///
    /// # Panics
    ///
    /// 主迴圈已經在跑時呼叫會 panic。
    pub fn spawn(&self) -> std::io::Result<LoopHandle> {
        self.mark_running();
        let driver = self.clone();
        let spawned = thread::Builder::new()
            .name("gb-driver".into())
            .spawn(move || driver.loop_body());

        match spawned {
            Ok(thread) => Ok(LoopHandle {
                driver: self.clone(),
                thread: Some(thread),
            }),
            Err(e) => {
                self.inner.running.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn loop_body(&self) {
        tracing::info!("emulation loop started");

        loop {
            let mut guard = self.spin_lock();
            if guard.finishing {
                break;
            }

            let shared = &mut *guard;
            shared.rewind.apply(shared.engine.as_mut());

            if shared.pause.halts_loop() || shared.rewind.is_paused() {
                let sleep = shared.paused_sleep;
                drop(guard);
                thread::sleep(sleep);
                continue;
            }

            guard = self.advance(guard);
            let wake = guard.finish_frames();
            drop(guard);

            match wake {
                Some(deadline) => TurboLimiter::wait_until(deadline),
                // 讓在 lock() 上排隊的呼叫端有機會拿到鎖
                None => thread::yield_now(),
            }
        }

        self.inner.running.store(false, Ordering::Release);
        tracing::info!("emulation loop finished");
    }

    /// 推進引擎一輪；引擎要求輸入時在這裡完成握手再交回指令
    fn advance<'a>(&'a self, mut guard: MutexGuard<'a, Shared>) -> MutexGuard<'a, Shared> {
        let shared = &mut *guard;
        if shared.engine.run(&mut shared.host) != RunOutcome::InputRequested {
            return guard;
        }

        let command = match shared
            .trace
            .on_input_request(shared.engine.as_mut(), &mut shared.host)
        {
            Some(command) => CommandBuffer::from(command),
            None => {
                let (reacquired, command) = self.wait_at_breakpoint(guard);
                guard = reacquired;
                command
            }
        };
        guard.engine.resume(command);
        guard
    }

    /// 停在中斷點：放開鎖，直到 `unbreak` 或主迴圈要結束
    fn wait_at_breakpoint<'a>(
        &'a self,
        mut guard: MutexGuard<'a, Shared>,
    ) -> (MutexGuard<'a, Shared>, CommandBuffer) {
        guard.pause.at_breakpoint = true;
        let pc = guard.engine.register(Register::PC);
        tracing::info!("paused at breakpoint ${pc:04X}");
        drop(guard);

        let backoff = Backoff::new();
        loop {
            let mut guard = self.lock();

            // 結束要求優先於任何暫停
            if guard.finishing {
                guard.pause.at_breakpoint = false;
                guard.pause.pending_continue = None;
                return (guard, CommandBuffer::from(CONTINUE));
            }

            if let Some(command) = guard.pause.pending_continue.take() {
                let command = if command.is_empty() {
                    CommandBuffer::from(CONTINUE)
                } else {
                    CommandBuffer::new(command)
                };
                tracing::debug!(command = command.as_str(), "resuming from breakpoint");
                return (guard, command);
            }

            drop(guard);
            if backoff.is_completed() {
                thread::sleep(BREAKPOINT_POLL);
            } else {
                backoff.snooze();
            }
        }
    }

    /// 要求主迴圈結束並等它真的停下來；主迴圈沒在跑時直接返回
    pub fn end_loop(&self) {
        {
            let mut shared = self.lock();
            if shared.finishing {
                return;
            }
            shared.finishing = true;
        }

        let backoff = Backoff::new();
        while self.is_running() {
            if backoff.is_completed() {
                thread::sleep(BREAKPOINT_POLL);
            } else {
                backoff.snooze();
            }
        }

        self.lock().finishing = false;
    }

    // ---- 卡帶 ----

    /// 載入 ROM，並視需要載入電池存檔與符號檔
    ///
    /// 電池存檔不存在不算錯誤 (新卡帶本來就沒有存檔)。
    pub fn load_rom(&self, rom_path: &Path, sram_path: Option<&Path>, symbol_path: Option<&Path>) -> Result<()> {
        let data = rom::read_file(rom_path)?;
        match CartridgeHeader::parse(&data) {
            Ok(header) => tracing::info!(
                title = %header.title,
                cartridge_type = header.cartridge_type,
                cgb = header.supports_cgb(),
                "loading ROM {}",
                rom_path.display()
            ),
            Err(e) => tracing::warn!("{}: {e}", rom_path.display()),
        }
        let extras = CartridgeExtras::read(sram_path, symbol_path)?;

        let mut shared = self.lock();
        shared.engine.reset();
        shared.timer.reset();
        shared.rewind.reset();
        shared.engine.load_rom(&data)?;
        shared.rom_loaded = true;
        shared.sync_screen_size();
        extras.apply(shared.engine.as_mut())
    }

    pub fn load_isx(&self, isx_path: &Path, sram_path: Option<&Path>, symbol_path: Option<&Path>) -> Result<()> {
        let data = rom::read_file(isx_path)?;
        tracing::info!("loading ISX {}", isx_path.display());
        let extras = CartridgeExtras::read(sram_path, symbol_path)?;

        let mut shared = self.lock();
        shared.engine.reset();
        shared.timer.reset();
        shared.rewind.reset();
        shared.engine.load_isx(&data)?;
        shared.rom_loaded = true;
        shared.sync_screen_size();
        extras.apply(shared.engine.as_mut())
    }

    pub fn is_rom_loaded(&self) -> bool {
        self.lock().rom_loaded
    }

    pub fn save_sram(&self, path: &Path) -> Result<()> {
        let data = {
            let shared = self.lock();
            if !shared.rom_loaded {
                return Err(DriverError::NoRomLoaded);
            }
            shared.engine.save_battery()
        };
        rom::write_file(path, &data)
    }

    // ---- 音訊 ----

    pub fn set_audio_enabled(&self, enabled: bool, sample_rate: u32) {
        let mut shared = self.lock();
        if enabled {
            shared.engine.set_sample_rate(sample_rate);
            shared.sample_rate = sample_rate;
        }
        shared.host.audio.set_enabled(enabled, sample_rate);
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.lock().host.audio.is_enabled()
    }

    /// 接上輸出裝置；之後取樣直接送進裝置佇列，不再累積給 `take_samples`
    pub fn attach_audio_device(&self, device: Box<dyn AudioDevice>) -> Option<Box<dyn AudioDevice>> {
        self.lock().host.audio.attach_device(device)
    }

    pub fn detach_audio_device(&self) -> Option<Box<dyn AudioDevice>> {
        self.lock().host.audio.detach_device()
    }

    pub fn set_volume(&self, volume: u8) {
        self.lock().host.audio.set_volume(volume);
    }

    pub fn volume(&self) -> u8 {
        self.lock().host.audio.volume()
    }

    pub fn set_mono(&self, mono: bool) {
        self.lock().host.audio.set_mono(mono);
    }

    pub fn is_mono(&self) -> bool {
        self.lock().host.audio.is_mono()
    }

    /// 取走累積的交錯立體聲取樣
    pub fn take_samples(&self) -> Vec<i16> {
        self.lock().host.audio.take_samples()
    }

    pub fn transfer_samples(&self, destination: &mut Vec<i16>) {
        self.lock().host.audio.transfer_samples(destination);
    }

    // ---- 畫面 ----

    /// 依照呈現模式複製一張畫面；長度不符時回傳 false
    pub fn read_frame(&self, destination: &mut [u32]) -> bool {
        self.lock().host.video.read_frame(destination)
    }

    pub fn presentation_mode(&self) -> PresentationMode {
        self.lock().host.video.mode()
    }

    pub fn set_presentation_mode(&self, mode: PresentationMode) {
        self.lock().host.video.set_mode(mode);
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.lock().host.video.dimensions()
    }

    pub fn pixel_count(&self) -> usize {
        self.lock().host.video.pixel_count()
    }

    pub fn frame_rate(&self) -> f64 {
        self.lock().timer.frame_rate()
    }

    // ---- 輸入 ----

    pub fn set_input(&self, input: Input, pressed: bool) {
        let mut shared = self.lock();
        match input {
            Input::Button(button) => {
                shared.joypad.set(button, pressed);
                let rapid = shared.rapid_fire.is_active(button);
                shared.engine.set_key(button, pressed || rapid);
            }
            Input::Rapid(button) => {
                let phase = shared.rapid_fire.set_held(button, pressed);
                let held = shared.joypad.is_pressed(button);
                shared.engine.set_key(button, phase || held);
            }
            Input::Rewind => shared.rewind.set_requested(pressed),
        }
    }

    pub fn input(&self, input: Input) -> bool {
        let shared = self.lock();
        match input {
            Input::Button(button) => shared.joypad.is_pressed(button),
            Input::Rapid(button) => shared.rapid_fire.is_held(button),
            Input::Rewind => shared.rewind.is_requested(),
        }
    }

    pub fn set_rapid_fire_interval(&self, frames: u32) {
        self.lock().rapid_fire.set_interval(frames);
    }

    // ---- 中斷點與追蹤 ----

    pub fn breakpoints(&self) -> Vec<u16> {
        self.lock().engine.breakpoints()
    }

    pub fn add_breakpoint(&self, address: u16) {
        let output = self.lock().execute(&debugger::breakpoint_command(address));
        tracing::debug!(address, output = output.trim_end(), "added breakpoint");
    }

    /// 移除中斷點；該位址上還沒觸發的追蹤也一併取消
    pub fn remove_breakpoint(&self, address: u16) {
        let mut shared = self.lock();
        let trace_cancelled = shared.trace.remove(address);
        let output = shared.execute(&debugger::delete_command(address));
        tracing::debug!(address, trace_cancelled, output = output.trim_end(), "removed breakpoint");
    }

    /// 用 `addresses` 取代全部中斷點；還沒觸發的追蹤全部取消
    pub fn set_breakpoints(&self, addresses: &[u16]) {
        let mut shared = self.lock();
        shared.trace.clear();
        shared.execute(debugger::DELETE_ALL);
        for &address in addresses {
            shared.execute(&debugger::breakpoint_command(address));
        }
    }

    /// 登記一次性的追蹤：PC 到達 `address` 後自動走 `step_count` 步並記錄狀態
    pub fn break_and_trace(&self, address: u16, step_count: u32, step_over: bool) {
        let mut shared = self.lock();
        shared.trace.register(BreakAndTrace {
            address,
            step_count,
            step_over,
        });
        shared.execute(&debugger::breakpoint_command(address));
    }

    pub fn trace_results(&self) -> Vec<TraceSnapshot> {
        self.lock().trace.results().to_vec()
    }

    pub fn is_tracing(&self) -> bool {
        self.lock().trace.session().is_some()
    }

    // ---- 暫停 ----

    pub fn pause_state(&self) -> PauseState {
        let shared = self.lock();
        PauseState {
            rewind_paused: shared.rewind.is_paused(),
            ..shared.pause.clone()
        }
    }

    pub fn set_paused_manually(&self, paused: bool) {
        self.lock().pause.manual = paused;
    }

    pub fn is_paused_manually(&self) -> bool {
        self.lock().pause.manual
    }

    pub fn is_paused_at_breakpoint(&self) -> bool {
        self.lock().pause.at_breakpoint
    }

    pub fn is_rewind_paused(&self) -> bool {
        self.lock().rewind.is_paused()
    }

    pub fn is_zero_speed_paused(&self) -> bool {
        self.lock().pause.zero_speed
    }

    /// 讓停在中斷點的引擎繼續；沒有停在中斷點時不做事並回傳 false
    pub fn unbreak(&self, command: &str) -> bool {
        self.lock().pause.unbreak(command)
    }

    pub fn break_immediately(&self) {
        self.lock().engine.break_immediately();
    }

    // ---- 除錯器 ----

    /// 執行任意除錯器指令，回傳輸出的每一行
    pub fn execute_command(&self, command: &str) -> Vec<String> {
        debugger::split_lines(&self.lock().execute(command))
    }

    pub fn disassemble(&self, address: u16, count: u8) -> Vec<String> {
        let text = {
            let mut shared = self.lock();
            let Shared { engine, host, .. } = &mut *shared;
            capture_log(host, |h| engine.disassemble(address, count, h))
        };
        debugger::split_lines(&text)
    }

    pub fn evaluate(&self, expression: &str) -> Option<u16> {
        self.lock().engine.evaluate(expression)
    }

    /// 呼叫堆疊：每一層的說明文字與位址，最內層在前
    pub fn backtrace(&self) -> Vec<(String, u16)> {
        let (text, addresses) = {
            let mut shared = self.lock();
            let text = shared.execute(debugger::BACKTRACE);
            (text, shared.engine.backtrace())
        };
        debugger::zip_backtrace(&text, &addresses)
    }

    pub fn register(&self, register: Register) -> u16 {
        self.lock().engine.register(register)
    }

    pub fn set_register(&self, register: Register, value: u16) {
        self.lock().engine.set_register(register, value);
    }

    pub fn registers(&self) -> Registers {
        Registers::capture(self.lock().engine.as_ref())
    }

    // ---- 存檔狀態 ----

    pub fn create_save_state(&self) -> Vec<u8> {
        self.lock().engine.save_state()
    }

    pub fn load_save_state(&self, data: &[u8]) -> Result<()> {
        self.lock().engine.load_state(data)?;
        Ok(())
    }

    pub fn save_state_to_file(&self, path: &Path) -> Result<()> {
        let data = self.create_save_state();
        rom::write_file(path, &data)
    }

    pub fn load_state_from_file(&self, path: &Path) -> Result<()> {
        let data = rom::read_file(path)?;
        self.load_save_state(&data)
    }

    // ---- 機器控制 ----

    pub fn reset(&self) {
        let mut shared = self.lock();
        shared.engine.reset();
        shared.timer.reset();
        shared.rewind.reset();
    }

    /// 切換機型並重設；畫面尺寸可能跟著改變
    pub fn set_model(&self, model: Model) {
        let mut shared = self.lock();
        tracing::info!(?model, "switching model");
        shared.engine.switch_model(model);
        shared.timer.reset();
        shared.rewind.reset();
        shared.sync_screen_size();
    }

    /// 設定時脈倍率；低於 [`MIN_SPEED_MULTIPLIER`] 的值會被拉到下限並暫停主迴圈
    pub fn set_speed_multiplier(&self, multiplier: f64) {
        let mut shared = self.lock();
        let zero_speed = multiplier.is_nan() || multiplier < MIN_SPEED_MULTIPLIER;
        let multiplier = if zero_speed { MIN_SPEED_MULTIPLIER } else { multiplier };
        shared.pause.zero_speed = zero_speed;
        shared.speed = multiplier;
        shared.engine.set_clock_multiplier(multiplier);
    }

    pub fn speed_multiplier(&self) -> f64 {
        self.lock().speed
    }

    pub fn set_turbo(&self, enabled: bool) {
        let mut shared = self.lock();
        shared.turbo.set_enabled(enabled);
        shared.host.audio.set_turbo(enabled);
        shared.engine.set_turbo(enabled);
    }

    pub fn is_turbo(&self) -> bool {
        self.lock().turbo.is_enabled()
    }

    pub fn set_turbo_ratio(&self, ratio: f64) {
        self.lock().turbo.set_ratio(ratio);
    }

    pub fn turbo_ratio(&self) -> f64 {
        self.lock().turbo.ratio()
    }

    pub fn set_rewind_length(&self, seconds: f64) {
        self.lock().engine.set_rewind_length(seconds.max(0.0));
    }
}

/// 載入卡帶時一起讀進來的電池存檔與符號檔
struct CartridgeExtras {
    battery: Option<Vec<u8>>,
    symbols: Option<String>,
}

impl CartridgeExtras {
    fn read(sram_path: Option<&Path>, symbol_path: Option<&Path>) -> Result<Self> {
        let battery = match sram_path {
            Some(path) => rom::read_optional(path)?,
            None => None,
        };
        let symbols = symbol_path.map(rom::read_text).transpose()?;
        Ok(CartridgeExtras { battery, symbols })
    }

    fn apply(self, engine: &mut dyn Engine) -> Result<()> {
        engine.clear_symbols();
        if let Some(battery) = self.battery {
            engine.load_battery(&battery)?;
        }
        if let Some(symbols) = self.symbols {
            engine.load_symbols(&symbols);
        }
        Ok(())
    }
}

/// [`Driver::spawn`] 回傳的主迴圈把手
///
/// 丟掉時會要求主迴圈結束並等待執行緒收尾。
#[derive(Debug)]
pub struct LoopHandle {
    driver: Driver,
    thread: Option<JoinHandle<()>>,
}

impl LoopHandle {
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// 結束主迴圈並等待執行緒結束
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.driver.end_loop();
        if thread.join().is_err() {
            tracing::error!("emulation loop thread panicked");
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
