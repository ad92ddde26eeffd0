// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Construction and validation of the orchestrator's in-memory `Plan`,
//! built from parsed CLI flags.

use std::path::PathBuf;

use mcu::McuDescriptor;

use crate::cli::{Cli, FormatArg};
use crate::error::Error;

const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Primary data-path action. `Unlock`/`Lock` are independent flags on
/// [`Plan`] rather than variants
/// here, since either may run alongside a read/write/verify in the same
/// invocation; this enum only names the *primary* action for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Verify,
    Write,
    Unlock,
    Lock,
    Reset,
    None,
}

/// What `-s` named, before it is resolved against a concrete [`McuDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceSpec {
    Named(flash::MemoryType),
    Address(u32),
}

#[derive(Debug)]
pub struct Plan {
    pub programmer: String,
    pub serial: Option<String>,
    pub device: Option<PathBuf>,
    pub part: Option<&'static McuDescriptor>,
    pub autodetect: bool,
    pub slice: SliceSpec,
    pub byte_count: Option<u32>,
    pub read_file: Option<(PathBuf, image::Format)>,
    pub write_file: Option<(PathBuf, image::Format)>,
    pub verify_file: Option<(PathBuf, image::Format)>,
    pub unlock: bool,
    pub lock: bool,
    pub force: bool,
    pub skip_reset: bool,
    pub timeout_ms: u64,
    pub list_parts: bool,
    pub list_adapters: bool,
    pub mode: Mode,
}

impl Plan {
    /// Build and validate a plan from parsed CLI flags. `-l`/`-L` short
    /// circuit everything else and need no adapter or part.
    pub fn build(cli: Cli) -> Result<Plan, Error> {
        if cli.list_parts || cli.list_adapters {
            return Ok(Plan {
                programmer: cli.programmer.unwrap_or_default(),
                serial: cli.serial,
                device: cli.device,
                part: None,
                autodetect: false,
                slice: SliceSpec::Named(flash::MemoryType::Flash),
                byte_count: None,
                read_file: None,
                write_file: None,
                verify_file: None,
                unlock: false,
                lock: false,
                force: cli.force,
                skip_reset: true,
                timeout_ms: cli.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
                list_parts: cli.list_parts,
                list_adapters: cli.list_adapters,
                mode: Mode::None,
            });
        }

        if cli.reset
            && (cli.read_file.is_some()
                || cli.write_file.is_some()
                || cli.verify_file.is_some()
                || cli.unlock
                || cli.lock)
        {
            return Err(Error::Usage(
                "-R (reset and exit) cannot be combined with -r/-w/-v/-u/-k".into(),
            ));
        }

        if cli.read_file.is_some() && cli.write_file.is_some() {
            return Err(Error::Usage("-r and -w cannot be combined".into()));
        }

        let programmer = cli
            .programmer
            .ok_or_else(|| Error::Usage("missing -c programmer name".into()))?;
        if !adapter::BACKEND_NAMES.contains(&programmer.as_str()) {
            return Err(Error::Usage(format!(
                "unknown programmer {programmer:?}; known: {:?}",
                adapter::BACKEND_NAMES
            )));
        }

        let part = if cli.reset || cli.autodetect {
            None
        } else {
            let name = cli
                .part
                .ok_or_else(|| Error::Usage("missing -p part name (or pass --autodetect)".into()))?;
            Some(
                mcu::lookup(&name)
                    .ok_or_else(|| Error::Usage(format!("unknown part {name:?}")))?,
            )
        };

        let slice = match cli.slice.as_deref() {
            None => SliceSpec::Named(flash::MemoryType::Flash),
            Some(s) => parse_slice(s)?,
        };

        let read_file = cli.read_file.map(|p| resolve_format(p, cli.format));
        let write_file = cli.write_file.map(|p| resolve_format(p, cli.format));
        let verify_file = cli.verify_file.map(|p| resolve_format(p, cli.format));

        let mode = if cli.reset {
            Mode::Reset
        } else if write_file.is_some() {
            Mode::Write
        } else if read_file.is_some() {
            Mode::Read
        } else if verify_file.is_some() {
            Mode::Verify
        } else if cli.unlock {
            Mode::Unlock
        } else if cli.lock {
            Mode::Lock
        } else {
            Mode::None
        };

        Ok(Plan {
            programmer,
            serial: cli.serial,
            device: cli.device,
            part,
            autodetect: cli.autodetect,
            slice,
            byte_count: cli.byte_count,
            read_file,
            write_file,
            verify_file,
            unlock: cli.unlock,
            lock: cli.lock,
            force: cli.force,
            skip_reset: cli.skip_reset || cli.reset,
            timeout_ms: cli.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            list_parts: false,
            list_adapters: false,
            mode,
        })
    }

    /// Resolve `-s`/`-b` against a concrete descriptor: `(start, len)`.
    /// A bare `-s <hex address>` with no `-b` has length 0; callers must
    /// supply `-b` in that case.
    pub fn slice_range(&self, d: &McuDescriptor) -> (u32, u32) {
        let (start, natural_len) = match self.slice {
            SliceSpec::Named(flash::MemoryType::Flash) => (d.flash.start, d.flash.size),
            SliceSpec::Named(flash::MemoryType::Eeprom) => (d.eeprom.start, d.eeprom.size),
            SliceSpec::Named(flash::MemoryType::Ram) => (d.ram.start, d.ram.size),
            SliceSpec::Named(flash::MemoryType::Opt) => (d.option_bytes.start, d.option_bytes.size),
            SliceSpec::Address(addr) => (addr, 0),
        };
        let len = self.byte_count.unwrap_or(natural_len);
        (start, len)
    }
}

/// Classify an address against a descriptor's declared ranges, for slices
/// given as a raw `-s` hex address rather than a named memory kind.
pub fn classify(d: &McuDescriptor, addr: u32) -> flash::MemoryType {
    if d.eeprom.size > 0 && addr >= d.eeprom.start && addr < d.eeprom.start + d.eeprom.size {
        flash::MemoryType::Eeprom
    } else if addr >= d.ram.start && addr < d.ram.start + d.ram.size {
        flash::MemoryType::Ram
    } else if addr >= d.option_bytes.start && addr < d.option_bytes.start + d.option_bytes.size {
        flash::MemoryType::Opt
    } else {
        flash::MemoryType::Flash
    }
}

fn resolve_format(path: PathBuf, format: Option<FormatArg>) -> (PathBuf, image::Format) {
    let fmt = format
        .map(Into::into)
        .unwrap_or_else(|| image::detect_format(&path));
    (path, fmt)
}

fn parse_slice(s: &str) -> Result<SliceSpec, Error> {
    match s.to_ascii_lowercase().as_str() {
        "flash" => Ok(SliceSpec::Named(flash::MemoryType::Flash)),
        "eeprom" => Ok(SliceSpec::Named(flash::MemoryType::Eeprom)),
        "ram" => Ok(SliceSpec::Named(flash::MemoryType::Ram)),
        "opt" => Ok(SliceSpec::Named(flash::MemoryType::Opt)),
        other => {
            let hex = other.strip_prefix("0x").unwrap_or(other);
            let addr = u32::from_str_radix(hex, 16)
                .map_err(|_| Error::Usage(format!("invalid -s value {s:?}")))?;
            Ok(SliceSpec::Address(addr))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            programmer: Some("stlink".into()),
            serial: None,
            device: None,
            part: Some("stm8s003f3".into()),
            slice: None,
            byte_count: None,
            read_file: None,
            write_file: None,
            verify_file: None,
            unlock: false,
            lock: false,
            reset: false,
            list_parts: false,
            list_adapters: false,
            autodetect: false,
            force: false,
            skip_reset: false,
            format: None,
            timeout_ms: None,
        }
    }

    #[test]
    fn defaults_to_flash_slice_and_no_mode() {
        let plan = Plan::build(base_cli()).unwrap();
        assert_eq!(plan.slice, SliceSpec::Named(flash::MemoryType::Flash));
        assert_eq!(plan.mode, Mode::None);
    }

    #[test]
    fn rejects_combined_reset_and_write() {
        let mut cli = base_cli();
        cli.reset = true;
        cli.write_file = Some("out.hex".into());
        let err = Plan::build(cli).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn rejects_unknown_part() {
        let mut cli = base_cli();
        cli.part = Some("not-a-real-part".into());
        let err = Plan::build(cli).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn autodetect_allows_missing_part() {
        let mut cli = base_cli();
        cli.part = None;
        cli.autodetect = true;
        let plan = Plan::build(cli).unwrap();
        assert!(plan.part.is_none());
        assert!(plan.autodetect);
    }

    #[test]
    fn hex_slice_address_parses_without_prefix() {
        let mut cli = base_cli();
        cli.slice = Some("8100".into());
        cli.byte_count = Some(64);
        let plan = Plan::build(cli).unwrap();
        assert_eq!(plan.slice, SliceSpec::Address(0x8100));
    }

    #[test]
    fn list_parts_bypasses_programmer_requirement() {
        let mut cli = base_cli();
        cli.programmer = None;
        cli.part = None;
        cli.list_parts = true;
        let plan = Plan::build(cli).unwrap();
        assert!(plan.list_parts);
    }
}
