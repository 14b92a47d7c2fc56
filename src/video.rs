//! 四格輪替的畫面緩衝區
//!
//! 引擎永遠寫入 `work` 這格；每次 vblank 依序輪替
//! `previous2 ← previous`、`previous ← work`、`work ← (work + 1) % 4`。
//! 第四格讓引擎在寫新畫面的同時，前兩張完整畫面仍可讀取。

use serde::{Deserialize, Serialize};

const SLOT_COUNT: usize = 4;

// 清畫面時填入的顏色 (不透明白)
const BLANK_PIXEL: u32 = 0xFFFF_FFFF;

/// 讀取畫面時挑選緩衝區的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PresentationMode {
    /// 讀正在畫的那格，延遲最低但可能撕裂
    Single,
    /// 讀最近畫完的那格，多一幀延遲
    #[default]
    Double,
    /// 最近兩張完整畫面逐位元組平均，模擬殘影
    DoubleBlend,
}

#[derive(Debug)]
pub struct FrameBuffers {
    slots: [Vec<u32>; SLOT_COUNT],
    width: u32,
    height: u32,
    work: usize,
    previous: usize,
    previous2: usize,
    mode: PresentationMode,
}

impl FrameBuffers {
    pub fn new(width: u32, height: u32, mode: PresentationMode) -> Self {
        let mut buffers = FrameBuffers {
            slots: Default::default(),
            width: 0,
            height: 0,
            work: 0,
            previous: 0,
            previous2: 0,
            mode,
        };
        buffers.resize(width, height);
        buffers
    }

    /// 重新配置四格緩衝區，畫面會被清成白色
    pub fn resize(&mut self, width: u32, height: u32) {
        let len = width as usize * height as usize;
        for slot in &mut self.slots {
            *slot = vec![BLANK_PIXEL; len];
        }
        self.width = width;
        self.height = height;
        self.work = 0;
        self.previous = 0;
        self.previous2 = 0;
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn mode(&self) -> PresentationMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PresentationMode) {
        self.mode = mode;
    }

    /// 引擎目前寫入的緩衝區
    pub fn work_mut(&mut self) -> &mut [u32] {
        &mut self.slots[self.work]
    }

    pub fn rotate(&mut self) {
        self.previous2 = self.previous;
        self.previous = self.work;
        self.work = (self.work + 1) % SLOT_COUNT;
    }

    /// 依照呈現模式把畫面複製到 `destination`
    ///
    /// 長度不等於像素數時回傳 false，`destination` 不會被改動。
    pub fn read_frame(&self, destination: &mut [u32]) -> bool {
        if destination.len() != self.pixel_count() {
            return false;
        }

        match self.mode {
            PresentationMode::Single => destination.copy_from_slice(&self.slots[self.work]),
            PresentationMode::Double => destination.copy_from_slice(&self.slots[self.previous]),
            PresentationMode::DoubleBlend => {
                let older = &self.slots[self.previous2];
                destination.copy_from_slice(&self.slots[self.previous]);
                for (pixel, &other) in destination.iter_mut().zip(older) {
                    *pixel = blend(*pixel, other);
                }
            }
        }
        true
    }
}

// 逐位元組 (a + b) / 2
fn blend(a: u32, b: u32) -> u32 {
    let a = a.to_le_bytes();
    let b = b.to_le_bytes();
    u32::from_le_bytes(std::array::from_fn(|i| {
        ((a[i] as u16 + b[i] as u16) / 2) as u8
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fill_and_rotate(buffers: &mut FrameBuffers, value: u32) {
        buffers.work_mut().fill(value);
        buffers.rotate();
    }

    #[test]
    fn rotation_walks_all_four_slots() {
        let mut buffers = FrameBuffers::new(2, 2, PresentationMode::Double);
        for expected_work in [1, 2, 3, 0, 1] {
            let old_work = buffers.work;
            let old_previous = buffers.previous;
            buffers.rotate();
            assert_eq!(buffers.work, expected_work);
            assert_eq!(buffers.previous, old_work);
            assert_eq!(buffers.previous2, old_previous);
        }
    }

    #[test]
    fn single_mode_reads_the_frame_in_progress() {
        let mut buffers = FrameBuffers::new(2, 1, PresentationMode::Single);
        fill_and_rotate(&mut buffers, 0x1111_1111);
        buffers.work_mut()[0] = 0x2222_2222;

        let mut out = [0u32; 2];
        assert!(buffers.read_frame(&mut out));
        assert_eq!(out, [0x2222_2222, BLANK_PIXEL]);
    }

    #[test]
    fn double_mode_reads_the_last_completed_frame() {
        let mut buffers = FrameBuffers::new(2, 1, PresentationMode::Double);
        fill_and_rotate(&mut buffers, 0x1111_1111);
        buffers.work_mut().fill(0x2222_2222);

        let mut out = [0u32; 2];
        assert!(buffers.read_frame(&mut out));
        assert_eq!(out, [0x1111_1111; 2]);
    }

    #[test]
    fn blend_averages_the_two_completed_frames() {
        let mut buffers = FrameBuffers::new(3, 1, PresentationMode::DoubleBlend);
        fill_and_rotate(&mut buffers, 0x0000_0000);
        fill_and_rotate(&mut buffers, 0xFFFF_FFFF);
        buffers.work_mut().fill(0x1234_5678);

        let mut out = [0u32; 3];
        assert!(buffers.read_frame(&mut out));
        assert_eq!(out, [0x7F7F_7F7F; 3]);
    }

    #[test]
    fn blend_rounds_each_byte_down() {
        assert_eq!(blend(0x0102_0304, 0x0203_0405), 0x0102_0304);
        assert_eq!(blend(0xFF00_10FE, 0x0100_2000), 0x8000_187F);
    }

    #[test]
    fn resize_clears_and_resets_indices() {
        let mut buffers = FrameBuffers::new(2, 2, PresentationMode::Double);
        fill_and_rotate(&mut buffers, 0);
        buffers.resize(4, 2);
        assert_eq!(buffers.pixel_count(), 8);
        assert_eq!((buffers.work, buffers.previous, buffers.previous2), (0, 0, 0));
        assert!(buffers.slots.iter().all(|s| s.iter().all(|&p| p == BLANK_PIXEL)));
    }

    proptest! {
        #[test]
        fn wrong_length_never_touches_the_destination(len in 0usize..64, mode in 0u8..3) {
            let mode = match mode {
                0 => PresentationMode::Single,
                1 => PresentationMode::Double,
                _ => PresentationMode::DoubleBlend,
            };
            let buffers = FrameBuffers::new(4, 4, mode);
            let mut out = vec![0xDEAD_BEEFu32; len];
            let ok = buffers.read_frame(&mut out);
            prop_assert_eq!(ok, len == 16);
            if !ok {
                prop_assert!(out.iter().all(|&p| p == 0xDEAD_BEEF));
            }
        }
    }
}
