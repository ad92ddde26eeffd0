// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Execution against the adapter, SWIM, flash, and autodetect layers,
//! dispatching on a built [`Plan`]. Order is fixed: `UNLOCK` first, then the
//! primary read/write/verify action, then `LOCK`, then a final target reset
//! unless `skip_reset`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};

use adapter::stlink_v1::StLinkV1;
use adapter::stlink_v2::{Generation, StLinkV2};
use adapter::Adapter;
use mcu::McuDescriptor;
use region::RegionList;
use swim::SwimSession;

use crate::error::Error;
use crate::plan::{classify, Mode, Plan, SliceSpec};

/// Construct the backend named by `Plan::programmer`.
fn open_backend(plan: &Plan) -> Result<Box<dyn Adapter>, Error> {
    let mut backend: Box<dyn Adapter> = match plan.programmer.as_str() {
        "stlink" => Box::new(StLinkV1::new()),
        "stlinkv2" => Box::new(StLinkV2::new(Generation::V2)),
        "stlinkv21" => Box::new(StLinkV2::new(Generation::V21)),
        "stlinkv3" => Box::new(StLinkV2::new(Generation::V3)),
        "espstlink" => {
            let path = plan.device.as_ref().ok_or_else(|| {
                Error::Usage("espstlink backend requires -d <device path>".into())
            })?;
            Box::new(adapter::serial_bridge::SerialBridge::new(
                path.to_string_lossy().to_string(),
            ))
        }
        other => return Err(Error::Usage(format!("unknown programmer {other:?}"))),
    };
    backend.set_status_timeout(Duration::from_millis(plan.timeout_ms));
    Ok(backend)
}

fn open_session(plan: &Plan) -> Result<SwimSession<Box<dyn Adapter>>, Error> {
    if let Some(serial) = &plan.serial {
        debug!("restricting to probe with serial {serial}");
    }
    let backend = open_backend(plan)?;
    Ok(SwimSession::open(backend)?)
}

/// Resolve the plan's MCU descriptor, running autodetection against an
/// already-open session if `-p` was not given.
fn resolve_part(
    plan: &Plan,
    session: &mut SwimSession<Box<dyn Adapter>>,
) -> Result<&'static McuDescriptor, Error> {
    if let Some(d) = plan.part {
        return Ok(d);
    }
    if !plan.autodetect {
        return Err(Error::Usage("no part given and --autodetect not set".into()));
    }
    let detected = autodetect::detect(session)?;
    info!(
        "autodetect matched {} (flash_block={})",
        detected.register_set_id, detected.flash_block
    );
    mcu::lookup(detected.register_set_id).ok_or_else(|| {
        Error::Usage(format!(
            "autodetect named unknown part {:?}",
            detected.register_set_id
        ))
    })
}

/// Check a requested `[start, start+len)` range against the part's declared
/// memory map. Fatal unless `force`, in which case it is a logged warning.
fn check_range(
    d: &McuDescriptor,
    mem: flash::MemoryType,
    start: u32,
    len: u32,
    force: bool,
) -> Result<(), Error> {
    let (base, size) = match mem {
        flash::MemoryType::Flash => (d.flash.start, d.flash.size),
        flash::MemoryType::Eeprom => (d.eeprom.start, d.eeprom.size),
        flash::MemoryType::Ram => (d.ram.start, d.ram.size),
        flash::MemoryType::Opt => (d.option_bytes.start, d.option_bytes.size),
    };
    let end = base.saturating_add(size);
    if start >= base && start.saturating_add(len) <= end {
        return Ok(());
    }
    if force {
        warn!(
            "slice 0x{start:08X}+0x{len:X} falls outside {}'s declared range [0x{base:08X}, 0x{end:08X}); proceeding under --force",
            d.name
        );
        Ok(())
    } else {
        Err(Error::Range { address: start, len })
    }
}

fn read_blocks(
    session: &mut SwimSession<Box<dyn Adapter>>,
    start: u32,
    len: u32,
) -> Result<RegionList, Error> {
    const CHUNK: u32 = 256;
    let mut list = RegionList::new();
    let mut addr = start;
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(CHUNK);
        let data = session.read_block(addr, chunk as usize)?;
        list.add_data(addr, &data)?;
        addr += chunk;
        remaining -= chunk;
    }
    Ok(list)
}

/// Program `source`'s bytes over `[start, start+len)`, block-aligned,
/// dispatching each touched block through [`flash::read_modify_write`]. RAM
/// and option bytes have no block structure, so they go straight to
/// [`flash::write_block`].
fn write_image(
    session: &mut SwimSession<Box<dyn Adapter>>,
    d: &McuDescriptor,
    mem: flash::MemoryType,
    start: u32,
    len: u32,
    source: &RegionList,
) -> Result<(), Error> {
    match mem {
        flash::MemoryType::Ram | flash::MemoryType::Opt => {
            if let Some(data) = source.get_data(start, len) {
                info!("programming {} bytes at 0x{start:08X}", data.len());
                flash::write_block(session, d, mem, start, &data, false, false)?;
            }
            Ok(())
        }
        flash::MemoryType::Flash | flash::MemoryType::Eeprom => {
            let block_size = d.flash_block_size;
            let mut block_addr = start - (start % block_size);
            let end = start + len;
            while block_addr < end {
                let block_end = block_addr + block_size;
                let lo = start.max(block_addr);
                let hi = end.min(block_end);
                if let Some(new_data) = source.get_data(lo, hi - lo) {
                    info!("programming {} bytes at 0x{lo:08X}", new_data.len());
                    flash::read_modify_write(
                        session,
                        d,
                        mem,
                        block_addr,
                        (lo - block_addr) as usize,
                        &new_data,
                    )?;
                }
                block_addr = block_end;
            }
            Ok(())
        }
    }
}

fn verify_regions(
    source: &RegionList,
    target_start: u32,
    target_len: u32,
    target: &RegionList,
) -> Result<(), Error> {
    let slice_end = target_start + target_len;
    for region in source.regions() {
        let overlap_start = region.start.max(target_start);
        let overlap_end = region.end().min(slice_end);
        if overlap_end <= overlap_start {
            continue;
        }
        let want = region
            .data
            .get((overlap_start - region.start) as usize..(overlap_end - region.start) as usize)
            .unwrap_or(&[]);
        let Some(got) = target.get_data(overlap_start, overlap_end - overlap_start) else {
            return Err(flash::Error::VerifyFailed { address: overlap_start }.into());
        };
        for (i, (a, b)) in want.iter().zip(got.iter()).enumerate() {
            if a != b {
                return Err(flash::Error::VerifyFailed {
                    address: overlap_start + i as u32,
                }
                .into());
            }
        }
    }
    Ok(())
}

fn read_image_file(path: &Path, format: image::Format) -> Result<RegionList, Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let list = match format {
        image::Format::Ihex => image::ihex::read(&mut reader)?,
        image::Format::Srec => image::srec::read(&mut reader)?,
        image::Format::Binary => image::binary::read(&mut reader)?,
    };
    Ok(list)
}

fn write_image_file(path: &Path, format: image::Format, list: &RegionList) -> Result<(), Error> {
    let mut file = File::create(path)?;
    match format {
        image::Format::Ihex => image::ihex::write(list, &mut file)?,
        image::Format::Srec => image::srec::write(list, &mut file)?,
        image::Format::Binary => image::binary::write(list, &mut file)?,
    }
    Ok(())
}

pub fn execute(plan: Plan) -> Result<(), Error> {
    if plan.list_parts {
        for d in mcu::REGISTRY {
            println!("{}", d.name);
        }
        return Ok(());
    }
    if plan.list_adapters {
        for name in adapter::BACKEND_NAMES {
            println!("{name}");
        }
        return Ok(());
    }

    let mut session = open_session(&plan)?;

    if plan.mode == Mode::Reset {
        session.srst()?;
        info!("target reset");
        return Ok(());
    }

    let d = resolve_part(&plan, &mut session)?;

    if plan.unlock {
        info!("disabling readout protection on {}", d.name);
        flash::disable_rop(&mut session, d)?;
    }

    let (start, len) = plan.slice_range(d);
    let mem = match plan.slice {
        SliceSpec::Named(m) => m,
        SliceSpec::Address(addr) => classify(d, addr),
    };
    let needs_io = plan.read_file.is_some() || plan.write_file.is_some() || plan.verify_file.is_some();
    if needs_io && len == 0 {
        return Err(Error::Usage(
            "a bare -s <address> slice needs an explicit -b <count>".into(),
        ));
    }

    if let Some((path, format)) = &plan.write_file {
        check_range(d, mem, start, len, plan.force)?;
        let mut source = read_image_file(path, *format)?;
        if *format == image::Format::Binary {
            source.shift(start as i64);
        }
        let mut slice = RegionList::new();
        slice.add_empty(start, len)?;
        let to_write = region::intersection(&slice, &source);
        write_image(&mut session, d, mem, start, len, &to_write)?;
    }

    if let Some((path, format)) = &plan.read_file {
        check_range(d, mem, start, len, plan.force)?;
        let data = read_blocks(&mut session, start, len)?;
        write_image_file(path, *format, &data)?;
    }

    if let Some((path, format)) = &plan.verify_file {
        check_range(d, mem, start, len, plan.force)?;
        let source = read_image_file(path, *format)?;
        let target = read_blocks(&mut session, start, len)?;
        verify_regions(&source, start, len, &target)?;
        info!("verify OK: {len} bytes at 0x{start:08X}");
    }

    if plan.lock {
        info!("enabling readout protection on {}", d.name);
        flash::enable_rop(&mut session, d)?;
    }

    if !plan.skip_reset {
        session.srst()?;
        info!("target reset");
    }

    Ok(())
}
