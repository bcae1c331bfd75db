//! A-Bus cartridge slot (CS0/CS1)
//!
//! The Saturn's cartridge port saw three families of retail hardware: battery-backed backup RAM
//! carts, DRAM expansion carts (8 Mbit and 32 Mbit), and ROM carts. The slot identifies the
//! inserted cartridge through an id byte read from the top of the CS1 region.

use bincode::{Decode, Encode};
use jsaturn_proc_macros::{FakeDecode, FakeEncode};
use std::ops::Deref;
use thiserror::Error;

pub const BACKUP_RAM_CART_LEN: usize = 512 * 1024;
pub const DRAM_8MBIT_LEN: usize = 1024 * 1024;
pub const DRAM_32MBIT_LEN: usize = 4 * 1024 * 1024;

const BACKUP_RAM_CART_ID: u8 = 0x21;
const DRAM_8MBIT_ID: u8 = 0x5A;
const DRAM_32MBIT_ID: u8 = 0x5C;
const ROM_CART_ID: u8 = 0xFF;

#[derive(Debug, Clone, Default, FakeEncode, FakeDecode)]
pub struct Rom(pub Box<[u8]>);

impl Deref for Rom {
    type Target = Box<[u8]>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Rom {
    fn get_u16(&self, address: u32) -> u16 {
        let address = address as usize;
        if address + 1 < self.0.len() {
            u16::from_be_bytes(self.0[address..address + 2].try_into().unwrap())
        } else {
            0xFFFF
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum CartridgeType {
    None,
    BackupRam,
    Dram8Mbit,
    Dram32Mbit,
    Rom,
}

#[derive(Debug, Encode, Decode)]
enum CartridgeContents {
    None,
    BackupRam { ram: Box<[u8]>, dirty: bool },
    Dram { ram: Box<[u8]> },
    Rom(Rom),
}

#[derive(Debug, Error)]
pub enum CartridgeStateError {
    #[error("cartridge type mismatch: state has {state:?}, slot has {live:?}")]
    TypeMismatch { state: CartridgeType, live: CartridgeType },
    #[error("cartridge RAM size mismatch: state has {state} bytes, expected {expected}")]
    SizeMismatch { state: usize, expected: usize },
}

#[derive(Debug, Encode, Decode)]
pub struct Cartridge {
    contents: CartridgeContents,
}

impl Cartridge {
    #[must_use]
    pub fn none() -> Self {
        Self { contents: CartridgeContents::None }
    }

    #[must_use]
    pub fn backup_ram(initial_ram: Option<Vec<u8>>) -> Self {
        let ram = match initial_ram {
            Some(ram) if ram.len() == BACKUP_RAM_CART_LEN => ram.into_boxed_slice(),
            _ => vec![0xFF; BACKUP_RAM_CART_LEN].into_boxed_slice(),
        };
        Self { contents: CartridgeContents::BackupRam { ram, dirty: false } }
    }

    #[must_use]
    pub fn dram_8mbit() -> Self {
        Self { contents: CartridgeContents::Dram { ram: vec![0; DRAM_8MBIT_LEN].into_boxed_slice() } }
    }

    #[must_use]
    pub fn dram_32mbit() -> Self {
        Self {
            contents: CartridgeContents::Dram { ram: vec![0; DRAM_32MBIT_LEN].into_boxed_slice() },
        }
    }

    #[must_use]
    pub fn rom(rom: Box<[u8]>) -> Self {
        Self { contents: CartridgeContents::Rom(Rom(rom)) }
    }

    #[must_use]
    pub fn cartridge_type(&self) -> CartridgeType {
        match &self.contents {
            CartridgeContents::None => CartridgeType::None,
            CartridgeContents::BackupRam { .. } => CartridgeType::BackupRam,
            CartridgeContents::Dram { ram } if ram.len() == DRAM_8MBIT_LEN => {
                CartridgeType::Dram8Mbit
            }
            CartridgeContents::Dram { .. } => CartridgeType::Dram32Mbit,
            CartridgeContents::Rom(..) => CartridgeType::Rom,
        }
    }

    /// Cartridge id byte, readable at the top of CS1 as `0xFF00 | id`
    #[must_use]
    pub fn id(&self) -> u8 {
        match self.cartridge_type() {
            CartridgeType::None => 0xFF,
            CartridgeType::BackupRam => BACKUP_RAM_CART_ID,
            CartridgeType::Dram8Mbit => DRAM_8MBIT_ID,
            CartridgeType::Dram32Mbit => DRAM_32MBIT_ID,
            CartridgeType::Rom => ROM_CART_ID,
        }
    }

    /// Read a byte at an offset into the combined CS0/CS1 space.
    pub fn read_byte(&self, address: u32) -> u8 {
        match &self.contents {
            CartridgeContents::None => 0xFF,
            CartridgeContents::BackupRam { ram, .. } => {
                // Backup RAM carts put their 8-bit chips on the odd byte lanes
                if address & 1 == 1 { ram[mask_address(address >> 1, ram.len())] } else { 0xFF }
            }
            CartridgeContents::Dram { ram } => ram[mask_address(address, ram.len())],
            CartridgeContents::Rom(rom) => rom.get(address as usize).copied().unwrap_or(0xFF),
        }
    }

    pub fn read_word(&self, address: u32) -> u16 {
        match &self.contents {
            CartridgeContents::None => 0xFFFF,
            CartridgeContents::BackupRam { ram, .. } => {
                0xFF00 | u16::from(ram[mask_address(address >> 1, ram.len())])
            }
            CartridgeContents::Dram { ram } => {
                let address = mask_address(address & !1, ram.len());
                u16::from_be_bytes(ram[address..address + 2].try_into().unwrap())
            }
            CartridgeContents::Rom(rom) => rom.get_u16(address),
        }
    }

    pub fn write_byte(&mut self, address: u32, value: u8) {
        match &mut self.contents {
            CartridgeContents::None | CartridgeContents::Rom(..) => {}
            CartridgeContents::BackupRam { ram, dirty } => {
                if address & 1 == 1 {
                    ram[mask_address(address >> 1, ram.len())] = value;
                    *dirty = true;
                }
            }
            CartridgeContents::Dram { ram } => {
                ram[mask_address(address, ram.len())] = value;
            }
        }
    }

    pub fn write_word(&mut self, address: u32, value: u16) {
        match &mut self.contents {
            CartridgeContents::None | CartridgeContents::Rom(..) => {}
            CartridgeContents::BackupRam { ram, dirty } => {
                ram[mask_address(address >> 1, ram.len())] = value as u8;
                *dirty = true;
            }
            CartridgeContents::Dram { ram } => {
                let address = mask_address(address & !1, ram.len());
                ram[address..address + 2].copy_from_slice(&value.to_be_bytes());
            }
        }
    }

    #[must_use]
    pub fn backup_ram_dirty(&self) -> bool {
        matches!(self.contents, CartridgeContents::BackupRam { dirty: true, .. })
    }

    pub fn clear_backup_ram_dirty(&mut self) {
        if let CartridgeContents::BackupRam { dirty, .. } = &mut self.contents {
            *dirty = false;
        }
    }

    #[must_use]
    pub fn ram_contents(&self) -> &[u8] {
        match &self.contents {
            CartridgeContents::None | CartridgeContents::Rom(..) => &[],
            CartridgeContents::BackupRam { ram, .. } | CartridgeContents::Dram { ram } => ram,
        }
    }

    /// Validate a save-state RAM payload against the inserted cartridge before any live state is
    /// overwritten.
    pub fn check_state_compatible(
        &self,
        state_type: CartridgeType,
        state_ram_len: usize,
    ) -> Result<(), CartridgeStateError> {
        let live = self.cartridge_type();
        if state_type != live {
            return Err(CartridgeStateError::TypeMismatch { state: state_type, live });
        }

        let expected = self.ram_contents().len();
        if state_ram_len != expected {
            return Err(CartridgeStateError::SizeMismatch { state: state_ram_len, expected });
        }

        Ok(())
    }

    pub fn load_ram(&mut self, contents: &[u8]) {
        match &mut self.contents {
            CartridgeContents::None | CartridgeContents::Rom(..) => {}
            CartridgeContents::BackupRam { ram, .. } | CartridgeContents::Dram { ram } => {
                ram.copy_from_slice(contents);
            }
        }
    }

    pub fn take_rom(&mut self) -> Box<[u8]> {
        match &mut self.contents {
            CartridgeContents::Rom(rom) => std::mem::take(&mut rom.0),
            _ => Box::default(),
        }
    }
}

fn mask_address(address: u32, len: usize) -> usize {
    (address as usize) & (len - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_ram_cart_reads_on_odd_lanes() {
        let mut cart = Cartridge::backup_ram(None);
        cart.write_byte(0x0001, 0x5A);

        assert_eq!(cart.read_byte(0x0001), 0x5A);
        assert_eq!(cart.read_byte(0x0000), 0xFF);
        assert!(cart.backup_ram_dirty());
    }

    #[test]
    fn dram_cart_word_round_trip() {
        let mut cart = Cartridge::dram_8mbit();
        cart.write_word(0x1000, 0xBEEF);

        assert_eq!(cart.read_word(0x1000), 0xBEEF);
        assert_eq!(cart.read_byte(0x1000), 0xBE);
        assert_eq!(cart.read_byte(0x1001), 0xEF);
    }

    #[test]
    fn state_validation_rejects_wrong_type_and_size() {
        let cart = Cartridge::backup_ram(None);

        assert!(cart.check_state_compatible(CartridgeType::BackupRam, BACKUP_RAM_CART_LEN).is_ok());
        assert!(matches!(
            cart.check_state_compatible(CartridgeType::Dram8Mbit, DRAM_8MBIT_LEN),
            Err(CartridgeStateError::TypeMismatch { .. })
        ));
        assert!(matches!(
            cart.check_state_compatible(CartridgeType::BackupRam, 16),
            Err(CartridgeStateError::SizeMismatch { .. })
        ));
    }
}
