// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flash/EEPROM/option-byte programming state machine, grounded in
//! `examples/original_source/src/stm8.c` (`stm8_write_block`,
//! `stm8_enable_rop`, `stm8_disable_rop`).

use std::fmt;
use std::time::Duration;

use log::{debug, warn};

use adapter::Adapter;
use mcu::{McuDescriptor, RopMode};
use swim::SwimSession;

#[derive(Debug)]
pub enum Error {
    Swim(swim::Error),
    /// Block write hit the target's write-protect (`WR_PG_DIS`) bit.
    WriteProtected,
    /// Status polling exceeded its bound.
    CommTimeout,
    /// Caller asked for ROP unlock/lock on a descriptor with `RopMode::Unknown`.
    Unsupported,
    /// Read-back after a write did not match the source; carries the first
    /// differing address.
    VerifyFailed { address: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Swim(e) => write!(f, "{e}"),
            Error::WriteProtected => write!(f, "write protected (WR_PG_DIS set)"),
            Error::CommTimeout => write!(f, "communication timeout"),
            Error::Unsupported => write!(f, "ROP mode unknown for this MCU; cannot unlock/lock"),
            Error::VerifyFailed { address } => {
                write!(f, "verify failed at 0x{address:08X}")
            }
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

/// Which memory space a block write targets. Each carries its own unlock
/// register, programming-mode byte, and polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    Ram,
    Flash,
    Eeprom,
    Opt,
}

const IAPSR_WR_PG_DIS: u8 = 0x01;
const IAPSR_EOP: u8 = 0x04;
const IAPSR_RELOCK_MASK: u8 = !0x0A;

const MODE_OPT: u8 = 0x80;
const MODE_OPT_INV: u8 = 0x7F;
const MODE_FAST_BLOCK: u8 = 0x10;
const MODE_STANDARD_BLOCK: u8 = 0x01;

const ROP_ENABLE_MODE: u8 = 0x80;
const ROP_ENABLE_INV: u8 = 0x75;
const ROP_DISABLE_MODE: u8 = 0x81;

const OPTION_BYTE_ROP_ADDR: u32 = 0x4800;
const ROP_S_STYLE_ENABLE_VALUE: u8 = 0x00;
const ROP_L_STYLE_ENABLE_VALUE: u8 = 0xAA;
const ROP_S_STYLE_DISABLE_VALUE: u8 = 0xAA;
const ROP_L_STYLE_DISABLE_VALUE: u8 = 0x00;

const EOP_POLL_ATTEMPTS: u32 = 5;
const EOP_POLL_INTERVAL: Duration = Duration::from_millis(10);
const OPT_BYTE_SLEEP: Duration = Duration::from_millis(6);
const FAST_BLOCK_INITIAL_SLEEP: Duration = Duration::from_millis(3);
const STANDARD_BLOCK_INITIAL_SLEEP: Duration = Duration::from_millis(6);

/// Explicit states of the per-write-operation state machine. Kept for
/// documentation/logging; `write_block` drives the
/// transitions directly rather than matching on this enum in a loop, since
/// each state's work is a single straight-line step with exactly one
/// failure exit (`WAIT_EOP` → `FAIL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    Unlocked,
    ModeSet,
    Writing,
    WaitEop,
    Relocked,
    Fail,
}

fn unlock<A: Adapter>(
    session: &mut SwimSession<A>,
    d: &McuDescriptor,
    mem: MemoryType,
) -> Result<(), Error> {
    match mem {
        MemoryType::Flash => {
            session.write_byte(d.registers.flash_pukr, 0x56)?;
            session.write_byte(d.registers.flash_pukr, 0xAE)?;
        }
        MemoryType::Eeprom | MemoryType::Opt => {
            session.write_byte(d.registers.flash_dukr, 0xAE)?;
            session.write_byte(d.registers.flash_dukr, 0x56)?;
        }
        MemoryType::Ram => {}
    }
    Ok(())
}

fn select_mode<A: Adapter>(
    session: &mut SwimSession<A>,
    d: &McuDescriptor,
    mem: MemoryType,
    fast_hint: bool,
    existing_block_all_zero: bool,
) -> Result<(), Error> {
    let (mode, inverse) = match mem {
        MemoryType::Opt => (MODE_OPT, MODE_OPT_INV),
        MemoryType::Flash | MemoryType::Eeprom if fast_hint && existing_block_all_zero => {
            (MODE_FAST_BLOCK, !MODE_FAST_BLOCK)
        }
        MemoryType::Flash | MemoryType::Eeprom => (MODE_STANDARD_BLOCK, !MODE_STANDARD_BLOCK),
        MemoryType::Ram => return Ok(()),
    };
    session.write_byte(d.registers.flash_cr2, mode)?;
    if d.registers.flash_ncr2 != 0 {
        session.write_byte(d.registers.flash_ncr2, inverse)?;
    }
    Ok(())
}

/// Poll `FLASH_IAPSR` for `EOP`/`WR_PG_DIS`, sleeping `interval` between
/// reads, up to `attempts` times.
fn poll_eop<A: Adapter>(
    session: &mut SwimSession<A>,
    iapsr_addr: u32,
    attempts: u32,
    interval: Duration,
) -> Result<(), Error> {
    for _ in 0..attempts {
        let iapsr = session.read_byte(iapsr_addr)?;
        if iapsr & IAPSR_EOP != 0 {
            return Ok(());
        }
        if iapsr & IAPSR_WR_PG_DIS != 0 {
            return Err(Error::WriteProtected);
        }
        std::thread::sleep(interval);
    }
    Err(Error::CommTimeout)
}

fn relock<A: Adapter>(session: &mut SwimSession<A>, d: &McuDescriptor) -> Result<(), Error> {
    let iapsr = session.read_byte(d.registers.flash_iapsr)?;
    session.write_byte(d.registers.flash_iapsr, iapsr & IAPSR_RELOCK_MASK)?;
    Ok(())
}

/// Program one block. `block` must already be exactly `d.flash_block_size`
/// bytes for `Flash`/`Eeprom`, or any length for `Opt`/`Ram`. `fast_hint`
/// requests fast-block mode; it is only honored when the existing block
/// content is all-zero (§4.6). Always leaves the target relocked, even on
/// a failure path.
pub fn write_block<A: Adapter>(
    session: &mut SwimSession<A>,
    d: &McuDescriptor,
    mem: MemoryType,
    addr: u32,
    block: &[u8],
    fast_hint: bool,
    existing_block_all_zero: bool,
) -> Result<(), Error> {
    if mem == MemoryType::Ram {
        session.write_block(addr, block)?;
        return Ok(());
    }

    session.write_byte(d.registers.clk_ckdivr, 0)?;
    session.stall(true)?;

    let result = (|| -> Result<(), Error> {
        unlock(session, d, mem)?;
        select_mode(session, d, mem, fast_hint, existing_block_all_zero)?;

        match mem {
            MemoryType::Opt => {
                for (i, &byte) in block.iter().enumerate() {
                    session.write_byte(addr + i as u32, byte)?;
                    std::thread::sleep(OPT_BYTE_SLEEP);
                    poll_eop(session, d.registers.flash_iapsr, EOP_POLL_ATTEMPTS, EOP_POLL_INTERVAL)?;
                }
            }
            MemoryType::Flash | MemoryType::Eeprom => {
                session.write_block(addr, block)?;
                let initial_sleep = if fast_hint && existing_block_all_zero {
                    FAST_BLOCK_INITIAL_SLEEP
                } else {
                    STANDARD_BLOCK_INITIAL_SLEEP
                };
                std::thread::sleep(initial_sleep);
                poll_eop(session, d.registers.flash_iapsr, EOP_POLL_ATTEMPTS, EOP_POLL_INTERVAL)?;
            }
            MemoryType::Ram => unreachable!("handled above"),
        }
        Ok(())
    })();

    let relock_result = relock(session, d);
    result?;
    relock_result
}

/// Read-modify-write entry point for sub-block writes. The caller supplies
/// `new_data` (possibly shorter than `d.flash_block_size`)
/// to be spliced into the block at `addr` (which need not itself be block
/// aligned; `block_addr` is the block-aligned base). Returns without
/// issuing a block write if the merged block equals the current content.
#[allow(clippy::too_many_arguments)]
pub fn read_modify_write<A: Adapter>(
    session: &mut SwimSession<A>,
    d: &McuDescriptor,
    mem: MemoryType,
    block_addr: u32,
    offset_in_block: usize,
    new_data: &[u8],
) -> Result<(), Error> {
    let block_size = d.flash_block_size as usize;
    let current = session.read_block(block_addr, block_size)?;

    let mut merged = current.clone();
    merged[offset_in_block..offset_in_block + new_data.len()].copy_from_slice(new_data);

    if merged == current {
        debug!("block at 0x{block_addr:08X} unchanged; skipping write");
        return Ok(());
    }

    let untouched_all_zero = current
        .iter()
        .enumerate()
        .all(|(i, &b)| (offset_in_block..offset_in_block + new_data.len()).contains(&i) || b == 0);

    write_block(session, d, mem, block_addr, &merged, true, untouched_all_zero)
}

/// Enable readout protection. Requires the target clock fast and an OPT
/// unlock already performed by the caller via [`write_block`] with
/// `MemoryType::Opt`.
pub fn enable_rop<A: Adapter>(session: &mut SwimSession<A>, d: &McuDescriptor) -> Result<(), Error> {
    if d.rop_mode == RopMode::Unknown {
        return Err(Error::Unsupported);
    }
    let value = match d.rop_mode {
        RopMode::SStyle => ROP_S_STYLE_ENABLE_VALUE,
        RopMode::LStyle => ROP_L_STYLE_ENABLE_VALUE,
        RopMode::Unknown => unreachable!("checked above"),
    };

    session.write_byte(d.registers.clk_ckdivr, 0)?;
    session.stall(true)?;
    unlock(session, d, MemoryType::Opt)?;
    session.write_byte(d.registers.flash_cr2, ROP_ENABLE_MODE)?;
    if d.registers.flash_ncr2 != 0 {
        session.write_byte(d.registers.flash_ncr2, ROP_ENABLE_INV)?;
    }
    session.write_byte(OPTION_BYTE_ROP_ADDR, value)?;
    poll_eop(session, d.registers.flash_iapsr, EOP_POLL_ATTEMPTS, EOP_POLL_INTERVAL)?;
    relock(session, d)?;
    warn!("ROP enabled; a target reset is required for this to take effect");
    Ok(())
}

/// Disable readout protection. The two styles differ only in the byte
/// value written to the option byte and are each written twice.
pub fn disable_rop<A: Adapter>(session: &mut SwimSession<A>, d: &McuDescriptor) -> Result<(), Error> {
    if d.rop_mode == RopMode::Unknown {
        return Err(Error::Unsupported);
    }
    let value = match d.rop_mode {
        RopMode::SStyle => ROP_S_STYLE_DISABLE_VALUE,
        RopMode::LStyle => ROP_L_STYLE_DISABLE_VALUE,
        RopMode::Unknown => unreachable!("checked above"),
    };

    session.write_byte(d.registers.clk_ckdivr, 0)?;
    session.stall(true)?;
    session.write_byte(d.registers.flash_cr2, ROP_DISABLE_MODE)?;
    if d.registers.flash_ncr2 != 0 {
        session.write_byte(d.registers.flash_ncr2, ROP_ENABLE_INV)?;
    }
    unlock(session, d, MemoryType::Opt)?;

    for _ in 0..2 {
        session.write_byte(OPTION_BYTE_ROP_ADDR, value)?;
        poll_eop(session, d.registers.flash_iapsr, EOP_POLL_ATTEMPTS, EOP_POLL_INTERVAL)?;
    }
    relock(session, d)
}

/// Legacy whole-option-bytes unlock path for parts whose descriptor gives
/// an `option_bytes_size` (`d.option_bytes.size`): byte 0 is `0x00`, every
/// even index `>= 2` is `0xFF`, everything else left as read.
pub fn legacy_option_bytes_unlock<A: Adapter>(
    session: &mut SwimSession<A>,
    d: &McuDescriptor,
) -> Result<(), Error> {
    let size = d.option_bytes.size as usize;
    if size == 0 {
        return Ok(());
    }
    let mut buf = session.read_block(d.option_bytes.start, size)?;
    buf[0] = 0x00;
    for i in (2..size).step_by(2) {
        buf[i] = 0xFF;
    }
    write_block(session, d, MemoryType::Opt, d.option_bytes.start, &buf, false, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapter::mock::{MockAdapter, Transaction};
    use mcu::lookup;

    fn opened_session() -> SwimSession<MockAdapter> {
        SwimSession::open(MockAdapter::new()).unwrap()
    }

    fn set_eop(session: &mut SwimSession<MockAdapter>, d: &McuDescriptor) {
        session
            .adapter_mut()
            .seed(d.registers.flash_iapsr, &[IAPSR_EOP]);
    }

    #[test]
    fn block_write_rmw_skip() {
        let d = lookup("stm8s105k4").unwrap();
        let mut session = opened_session();
        session
            .adapter_mut()
            .seed(0x8000, &vec![0xAB; d.flash_block_size as usize]);
        set_eop(&mut session, d);

        read_modify_write(&mut session, d, MemoryType::Flash, 0x8000, 0, &vec![0xAB; d.flash_block_size as usize]).unwrap();

        let writes = session
            .adapter_mut()
            .transcript
            .iter()
            .filter(|t| matches!(t, Transaction::Write { addr, .. } if *addr == 0x8000))
            .count();
        assert_eq!(writes, 0);
    }

    #[test]
    fn fast_vs_standard_selection() {
        let d = lookup("stm8s105k4").unwrap();
        let block_size = d.flash_block_size as usize;

        let mut session = opened_session();
        session.adapter_mut().seed(0x8000, &vec![0x00; block_size]);
        set_eop(&mut session, d);
        write_block(&mut session, d, MemoryType::Flash, 0x8000, &vec![0xAB; block_size], true, true).unwrap();
        let mode_writes: Vec<_> = session
            .adapter_mut()
            .transcript
            .iter()
            .filter_map(|t| match t {
                Transaction::Write { addr, data } if *addr == d.registers.flash_cr2 => {
                    Some(data[0])
                }
                _ => None,
            })
            .collect();
        assert_eq!(mode_writes.last(), Some(&MODE_FAST_BLOCK));

        let mut session2 = opened_session();
        session2.adapter_mut().seed(0x8000, &vec![0x11; block_size]);
        set_eop(&mut session2, d);
        write_block(&mut session2, d, MemoryType::Flash, 0x8000, &vec![0xAB; block_size], true, false).unwrap();
        let mode_writes2: Vec<_> = session2
            .adapter_mut()
            .transcript
            .iter()
            .filter_map(|t| match t {
                Transaction::Write { addr, data } if *addr == d.registers.flash_cr2 => {
                    Some(data[0])
                }
                _ => None,
            })
            .collect();
        assert_eq!(mode_writes2.last(), Some(&MODE_STANDARD_BLOCK));
    }

    #[test]
    fn unlock_ordering_for_flash_write() {
        let d = lookup("stm8s003f3").unwrap();
        let mut session = opened_session();
        set_eop(&mut session, d);
        write_block(&mut session, d, MemoryType::Flash, 0x8000, &vec![0u8; d.flash_block_size as usize], false, false).unwrap();

        let pukr_writes: Vec<u8> = session
            .adapter_mut()
            .transcript
            .iter()
            .filter_map(|t| match t {
                Transaction::Write { addr, data } if *addr == d.registers.flash_pukr => Some(data[0]),
                _ => None,
            })
            .collect();
        assert_eq!(pukr_writes, vec![0x56, 0xAE]);
    }

    #[test]
    fn relock_masks_iapsr_after_write() {
        let d = lookup("stm8s003f3").unwrap();
        let mut session = opened_session();
        session.adapter_mut().seed(d.registers.flash_iapsr, &[0xFF]);
        write_block(&mut session, d, MemoryType::Flash, 0x8000, &vec![0u8; d.flash_block_size as usize], false, false).unwrap();

        let final_iapsr = session.adapter_mut().peek(d.registers.flash_iapsr, 1)[0];
        assert_eq!(final_iapsr, 0xFF & IAPSR_RELOCK_MASK);
    }

    #[test]
    fn rop_disable_stm8s_style() {
        let d = lookup("stm8s003f3").unwrap();
        let mut session = opened_session();
        set_eop(&mut session, d);
        disable_rop(&mut session, d).unwrap();

        let writes_to_0x4800: Vec<u8> = session
            .adapter_mut()
            .transcript
            .iter()
            .filter_map(|t| match t {
                Transaction::Write { addr, data } if *addr == OPTION_BYTE_ROP_ADDR => Some(data[0]),
                _ => None,
            })
            .collect();
        assert_eq!(writes_to_0x4800, vec![0xAA, 0xAA]);
    }

    #[test]
    fn rop_disable_rejects_unknown_mode() {
        let mut unknown = *lookup("stm8s003f3").unwrap();
        unknown.rop_mode = RopMode::Unknown;
        let mut session = opened_session();
        let err = disable_rop(&mut session, &unknown).unwrap_err();
        assert!(matches!(err, Error::Unsupported));
    }
}
