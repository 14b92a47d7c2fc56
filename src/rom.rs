use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::{DriverError, Result};

const HEADER_END: usize = 0x150;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartridgeHeader {
    pub title: String,
    pub cartridge_type: u8,
    pub rom_size: u8,
    pub ram_size: u8,
    pub cgb_flag: u8,
}

impl CartridgeHeader {
    pub fn parse(rom_data: &[u8]) -> Result<Self> {
        if rom_data.len() < HEADER_END {
            return Err(DriverError::InvalidRom("ROM too small"));
        }

        // 標題以 0 補齊；CGB 卡帶把 0x143 拿去當旗標，所以只讀到 0x142
        let title: String = rom_data[0x0134..0x0143]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
            .collect();

        Ok(CartridgeHeader {
            title,
            cartridge_type: rom_data[0x0147],
            rom_size: rom_data[0x0148],
            ram_size: rom_data[0x0149],
            cgb_flag: rom_data[0x0143],
        })
    }

    /// 0x80: 相容 CGB，0xC0: 只支援 CGB
    pub fn supports_cgb(&self) -> bool {
        self.cgb_flag & 0x80 != 0
    }
}

pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| DriverError::io(path, e))
}

/// 讀電池存檔；檔案不存在代表還沒存過，不算錯誤
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DriverError::io(path, e)),
    }
}

pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| DriverError::io(path, e))
}

pub fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data).map_err(|e| DriverError::io(path, e))
}
