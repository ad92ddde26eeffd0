// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identify the attached MCU from a handful of memory reads, grounded in
//! `examples/original_source/autodetect.c`.

use std::fmt;

use log::{debug, info, warn};

use adapter::Adapter;
use mcu::RopMode;
use swim::SwimSession;

#[derive(Debug)]
pub enum Error {
    Swim(swim::Error),
    /// Target refused a read; the flash-base sentinel read back `0x71`.
    RopActive,
    /// Multiple autodetect records matched but disagree on flash block size
    /// or EEPROM base address.
    Conflict,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Swim(e) => write!(f, "{e}"),
            Error::RopActive => write!(f, "readout protection is active"),
            Error::Conflict => write!(f, "autodetect candidates disagree on memory layout"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Swim(e) => Some(e),
            _ => None,
        }
    }
}

impl From<swim::Error> for Error {
    fn from(e: swim::Error) -> Self {
        Error::Swim(e)
    }
}

impl From<adapter::Error> for Error {
    fn from(e: adapter::Error) -> Self {
        Error::Swim(e.into())
    }
}

/// One row of the candidate table matched against probe results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutodetectRecord {
    pub id_address: u32,
    pub id_value: u32,
    pub id_mask: u32,
    pub ram_size: u32,
    pub flash_min: u32,
    pub flash_max: u32,
    pub flash_block: u32,
    pub eeprom_base: u32,
    pub eeprom_min: u32,
    pub eeprom_max: u32,
    pub unique_id_address: u32,
    pub unique_id_len: u32,
    pub has_bootrom: bool,
    pub rop_mode: RopMode,
    /// Name into [`mcu::REGISTRY`] this record resolves to.
    pub register_set_id: &'static str,
    /// Marked `true` for the two "anyone have a datasheet for this type?"
    /// entries carried over from the original source (Open Question 3).
    pub provisional: bool,
}

const FLASH_BASE: u32 = 0x8000;
const ROP_SENTINEL: u8 = 0x71;
const BOOTROM_BASE: u32 = 0x6000;
const SP_HI_ADDR: u32 = 0x7F08;
const SP_LO_ADDR: u32 = 0x7F09;
const PC_ADDR: u32 = 0x7F01;

const CANDIDATE_ID_LOCATIONS: &[(u32, u32)] = &[
    (0x4FFC, 0xFFFF_0000),
    (0x67F0, 0x0000_FF00),
    (0x67F1, 0x0000_FFFF),
];

pub static TABLE: &[AutodetectRecord] = &[
    AutodetectRecord {
        id_address: 0x67F1,
        id_value: 0x6588,
        id_mask: 0xFFFF,
        ram_size: 2048,
        flash_min: 8 * 1024,
        flash_max: 8 * 1024,
        flash_block: 64,
        eeprom_base: 0x4000,
        eeprom_min: 128,
        eeprom_max: 128,
        unique_id_address: 0,
        unique_id_len: 0,
        has_bootrom: false,
        rop_mode: RopMode::SStyle,
        register_set_id: "STM8S003F3",
        provisional: false,
    },
    AutodetectRecord {
        id_address: 0x67F1,
        id_value: 0x6588,
        id_mask: 0xFFFF,
        ram_size: 2048,
        flash_min: 16 * 1024,
        flash_max: 16 * 1024,
        flash_block: 128,
        eeprom_base: 0x4000,
        eeprom_min: 1024,
        eeprom_max: 1024,
        unique_id_address: 0,
        unique_id_len: 0,
        has_bootrom: false,
        rop_mode: RopMode::SStyle,
        register_set_id: "STM8S105K4",
        provisional: false,
    },
    AutodetectRecord {
        id_address: 0x67F0,
        id_value: 0x0700,
        id_mask: 0xFF00,
        ram_size: 6 * 1024,
        flash_min: 128 * 1024,
        flash_max: 128 * 1024,
        flash_block: 128,
        eeprom_base: 0x4000,
        eeprom_min: 2 * 1024,
        eeprom_max: 2 * 1024,
        unique_id_address: 0x48CD,
        unique_id_len: 12,
        has_bootrom: true,
        rop_mode: RopMode::SStyle,
        register_set_id: "STM8S207RB",
        provisional: false,
    },
    // Open Question 3: retained from the original table as provisional, no
    // datasheet confirmation available. Excluded from conflict-detection
    // test fixtures.
    AutodetectRecord {
        id_address: 0x4FFC,
        id_value: 0x1000_0000,
        id_mask: 0xFFFF_0000,
        ram_size: 4 * 1024,
        flash_min: 32 * 1024,
        flash_max: 32 * 1024,
        flash_block: 128,
        eeprom_base: 0x1000,
        eeprom_min: 1024,
        eeprom_max: 1024,
        unique_id_address: 0,
        unique_id_len: 0,
        has_bootrom: false,
        rop_mode: RopMode::LStyle,
        register_set_id: "STM8L151C6",
        provisional: true,
    },
    AutodetectRecord {
        id_address: 0x4FFC,
        id_value: 0x2000_0000,
        id_mask: 0xFFFF_0000,
        ram_size: 6 * 1024,
        flash_min: 64 * 1024,
        flash_max: 64 * 1024,
        flash_block: 128,
        eeprom_base: 0x4000,
        eeprom_min: 2 * 1024,
        eeprom_max: 2 * 1024,
        unique_id_address: 0,
        unique_id_len: 0,
        has_bootrom: false,
        rop_mode: RopMode::SStyle,
        register_set_id: "STM8AF6269",
        provisional: true,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectResult {
    pub register_set_id: &'static str,
    pub ram_size: u32,
    pub flash_block: u32,
    pub eeprom_base: u32,
    pub has_bootrom: bool,
    pub rop_mode: RopMode,
}

fn read_u32<A: Adapter>(session: &mut SwimSession<A>, addr: u32) -> Result<u32, Error> {
    let bytes = session.read_block(addr, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Run the five-step probe sequence against an already SWIM-opened session
/// and return the resolved descriptor.
pub fn detect<A: Adapter>(session: &mut SwimSession<A>) -> Result<DetectResult, Error> {
    let flash_probe = session.read_block(FLASH_BASE, 4)?;
    if flash_probe.iter().all(|&b| b == ROP_SENTINEL) {
        return Err(Error::RopActive);
    }

    let sp_hi = session.read_byte(SP_HI_ADDR)?;
    let sp_lo = session.read_byte(SP_LO_ADDR)?;
    let sp = u16::from_be_bytes([sp_hi, sp_lo]);
    let ram_size = sp as u32 + 1;
    debug!("inferred RAM size {ram_size} bytes from SP=0x{sp:04X}");

    let bootrom = read_u32(session, BOOTROM_BASE)?;
    let has_bootrom = bootrom != 0x7171_7171;

    let pc = session.read_block(PC_ADDR, 3)?;
    info!("PC at entry: {pc:02X?}");

    let mut matches: Vec<&'static AutodetectRecord> = Vec::new();
    for &(addr, mask) in CANDIDATE_ID_LOCATIONS {
        let raw = read_u32(session, addr)?;
        let masked = raw & mask;

        for record in TABLE {
            if record.id_address != addr || record.id_mask != mask {
                continue;
            }
            if record.id_value != masked {
                continue;
            }
            if record.ram_size != ram_size {
                continue;
            }
            if record.has_bootrom != has_bootrom {
                continue;
            }
            let unique_id = if record.unique_id_len > 0 {
                session.read_block(record.unique_id_address, record.unique_id_len as usize)?
            } else {
                Vec::new()
            };
            let has_unique_id = !unique_id.is_empty() && !unique_id.iter().all(|&b| b == 0 || b == ROP_SENTINEL);
            let expects_unique_id = record.unique_id_len > 0;
            if has_unique_id != expects_unique_id {
                continue;
            }
            matches.push(record);
        }
    }

    if matches.is_empty() {
        warn!("autodetect found no matching candidate");
    }

    let first = matches.first().copied();
    for m in &matches {
        if let Some(f) = first {
            if m.flash_block != f.flash_block || m.eeprom_base != f.eeprom_base {
                return Err(Error::Conflict);
            }
        }
    }

    let record = first.ok_or(Error::Conflict)?;
    Ok(DetectResult {
        register_set_id: record.register_set_id,
        ram_size,
        flash_block: record.flash_block,
        eeprom_base: record.eeprom_base,
        has_bootrom,
        rop_mode: record.rop_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapter::mock::MockAdapter;

    fn seed_common(mock: &mut MockAdapter) {
        mock.seed(FLASH_BASE, &[0x00, 0x00, 0x00, 0x00]);
        mock.seed(SP_HI_ADDR, &[0x07]);
        mock.seed(SP_LO_ADDR, &[0xFF]);
        mock.seed(BOOTROM_BASE, &[0x71, 0x71, 0x71, 0x71]);
        mock.seed(PC_ADDR, &[0x80, 0x00, 0x00]);
        for &(addr, _) in CANDIDATE_ID_LOCATIONS {
            mock.seed(addr, &[0xFF; 4]);
        }
    }

    #[test]
    fn autodetect_conflict() {
        let mut mock = MockAdapter::new();
        seed_common(&mut mock);
        // 0x55576588 masked with 0xFFFF (low 16 bits) == 0x6588
        mock.seed(0x67F1, &0x5557_6588u32.to_be_bytes());
        let mut session = SwimSession::open(mock).unwrap();

        let err = detect(&mut session).unwrap_err();
        assert!(matches!(err, Error::Conflict));
    }

    #[test]
    fn rop_active_short_circuits() {
        let mut mock = MockAdapter::new();
        seed_common(&mut mock);
        mock.seed(FLASH_BASE, &[0x71, 0x71, 0x71, 0x71]);
        let mut session = SwimSession::open(mock).unwrap();

        let err = detect(&mut session).unwrap_err();
        assert!(matches!(err, Error::RopActive));
    }

    #[test]
    fn provisional_entries_excluded_from_conflict_fixture() {
        assert!(TABLE.iter().filter(|r| !r.provisional).count() >= 2);
        assert!(TABLE.iter().any(|r| r.provisional));
    }

    #[test]
    fn single_match_resolves_cleanly() {
        let mut mock = MockAdapter::new();
        seed_common(&mut mock);
        mock.seed(0x67F0, &[0x00, 0x00, 0x07, 0x00]);
        mock.seed(SP_HI_ADDR, &[0x17]);
        mock.seed(SP_LO_ADDR, &[0xFF]);
        mock.seed(BOOTROM_BASE, &[0x12, 0x34, 0x56, 0x78]);
        mock.seed(0x48CD, &[0xAA; 12]);
        let mut session = SwimSession::open(mock).unwrap();

        let result = detect(&mut session).unwrap();
        assert_eq!(result.register_set_id, "STM8S207RB");
        assert_eq!(result.flash_block, 128);
    }
}
