// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static registry of STM8 MCU variant descriptors, grounded in
//! `examples/original_source/src/stm8.h` and the candidate table implied by
//! `examples/original_source/autodetect.c`.

/// A half-open `[start, start+size)` memory range. `size == 0` is valid and
/// means "not present on this part" (e.g. EEPROM overlaid on flash).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRange {
    pub start: u32,
    pub size: u32,
}

/// Which readout-protection unlock dance a part uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RopMode {
    Unknown,
    SStyle,
    LStyle,
}

/// Peripheral register addresses needed by the flash engine (C6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub clk_ckdivr: u32,
    pub flash_pukr: u32,
    pub flash_dukr: u32,
    pub flash_iapsr: u32,
    pub flash_cr2: u32,
    /// `0` means this part has no inverse control register.
    pub flash_ncr2: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McuDescriptor {
    pub name: &'static str,
    pub ram: MemRange,
    pub eeprom: MemRange,
    pub flash: MemRange,
    pub flash_block_size: u32,
    pub option_bytes: MemRange,
    pub rop_mode: RopMode,
    pub registers: Registers,
}

macro_rules! stm8s_registers {
    ($ncr2:expr) => {
        Registers {
            clk_ckdivr: 0x50C6,
            flash_pukr: 0x5062,
            flash_dukr: 0x5064,
            flash_iapsr: 0x505F,
            flash_cr2: 0x505B,
            flash_ncr2: $ncr2,
        }
    };
}

const STM8L_REGISTERS: Registers = Registers {
    clk_ckdivr: 0x50C0,
    flash_pukr: 0x5052,
    flash_dukr: 0x5054,
    flash_iapsr: 0x5050,
    flash_cr2: 0x5051,
    flash_ncr2: 0, // STM8L has no inverse control register
};

pub static REGISTRY: &[McuDescriptor] = &[
    McuDescriptor {
        name: "STM8S003?3",
        ram: MemRange { start: 0x0000, size: 1024 },
        eeprom: MemRange { start: 0x4000, size: 128 },
        flash: MemRange { start: 0x8000, size: 8 * 1024 },
        flash_block_size: 64,
        option_bytes: MemRange { start: 0x4800, size: 0x1A },
        rop_mode: RopMode::SStyle,
        registers: stm8s_registers!(0x505C),
    },
    McuDescriptor {
        name: "STM8S005?6",
        ram: MemRange { start: 0x0000, size: 2 * 1024 },
        eeprom: MemRange { start: 0x4000, size: 128 },
        flash: MemRange { start: 0x8000, size: 32 * 1024 },
        flash_block_size: 128,
        option_bytes: MemRange { start: 0x4800, size: 0x1A },
        rop_mode: RopMode::SStyle,
        registers: stm8s_registers!(0x505C),
    },
    McuDescriptor {
        name: "STM8S103?3",
        ram: MemRange { start: 0x0000, size: 1024 },
        eeprom: MemRange { start: 0x4000, size: 640 },
        flash: MemRange { start: 0x8000, size: 8 * 1024 },
        flash_block_size: 64,
        option_bytes: MemRange { start: 0x4800, size: 0x1A },
        rop_mode: RopMode::SStyle,
        registers: stm8s_registers!(0x505C),
    },
    McuDescriptor {
        name: "STM8S105?4",
        ram: MemRange { start: 0x0000, size: 2 * 1024 },
        eeprom: MemRange { start: 0x4000, size: 1024 },
        flash: MemRange { start: 0x8000, size: 16 * 1024 },
        flash_block_size: 128,
        option_bytes: MemRange { start: 0x4800, size: 0x1A },
        rop_mode: RopMode::SStyle,
        registers: stm8s_registers!(0x505C),
    },
    McuDescriptor {
        name: "STM8S207RB",
        ram: MemRange { start: 0x0000, size: 6 * 1024 },
        eeprom: MemRange { start: 0x4000, size: 2 * 1024 },
        flash: MemRange { start: 0x8000, size: 128 * 1024 },
        flash_block_size: 128,
        option_bytes: MemRange { start: 0x4800, size: 0x30 },
        rop_mode: RopMode::SStyle,
        registers: stm8s_registers!(0x505C),
    },
    McuDescriptor {
        name: "STM8AF6269",
        ram: MemRange { start: 0x0000, size: 6 * 1024 },
        eeprom: MemRange { start: 0x4000, size: 1024 },
        flash: MemRange { start: 0x8000, size: 32 * 1024 },
        flash_block_size: 128,
        option_bytes: MemRange { start: 0x4800, size: 0x30 },
        rop_mode: RopMode::SStyle,
        registers: stm8s_registers!(0x505C),
    },
    McuDescriptor {
        name: "STM8L151?6",
        ram: MemRange { start: 0x0000, size: 4 * 1024 },
        eeprom: MemRange { start: 0x1000, size: 1024 },
        flash: MemRange { start: 0x8000, size: 32 * 1024 },
        flash_block_size: 128,
        option_bytes: MemRange { start: 0x4800, size: 0x20 },
        rop_mode: RopMode::LStyle,
        registers: STM8L_REGISTERS,
    },
];

/// Case-insensitive lookup, matching `?` in either side against any single
/// character on the other, e.g. `lookup("stm8s103f3")` matches a descriptor
/// named `"stm8s103?3"`. The wildcard normally lives in the registry's
/// descriptor name (one entry covering a whole package family), but a caller
/// passing `?` in `s` (e.g. `-p stm8s103?3`) matches the same way.
pub fn lookup(s: &str) -> Option<&'static McuDescriptor> {
    REGISTRY.iter().find(|d| wildcard_eq(s, d.name))
}

fn wildcard_eq(query: &str, name: &str) -> bool {
    let q = query.as_bytes();
    let n = name.as_bytes();
    if q.len() != n.len() {
        return false;
    }
    q.iter().zip(n.iter()).all(|(&qc, &nc)| {
        qc == b'?' || nc == b'?' || qc.to_ascii_uppercase() == nc.to_ascii_uppercase()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(lookup("stm8s003f3").is_some());
        assert!(lookup("STM8S003F3").is_some());
    }

    #[test]
    fn lookup_matches_descriptor_side_wildcard() {
        assert_eq!(
            lookup("stm8s103f3").map(|d| d.name),
            Some("STM8S103?3")
        );
    }

    #[test]
    fn lookup_matches_query_side_wildcard() {
        assert_eq!(
            lookup("stm8s105?4").map(|d| d.name),
            Some("STM8S105?4")
        );
    }

    #[test]
    fn lookup_unknown_part_is_none() {
        assert!(lookup("stm8nonexistent").is_none());
    }

    #[test]
    fn ncr2_zero_means_no_inverse_register() {
        let l151 = lookup("stm8l151c6").unwrap();
        assert_eq!(l151.registers.flash_ncr2, 0);
        let s003 = lookup("stm8s003f3").unwrap();
        assert_ne!(s003.registers.flash_ncr2, 0);
    }
}
