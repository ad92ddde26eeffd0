// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command-line flag surface, built with `clap` v4 derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Image format, for the `--format` override (auto-detection by file
/// extension is the default; this flag exists for files whose extension
/// lies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Ihex,
    Srec,
    Binary,
}

impl From<FormatArg> for image::Format {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Ihex => image::Format::Ihex,
            FormatArg::Srec => image::Format::Srec,
            FormatArg::Binary => image::Format::Binary,
        }
    }
}

/// STM8 SWIM flashing tool.
#[derive(Debug, Parser)]
#[command(name = "stm8flash", version, about)]
pub struct Cli {
    /// Programmer backend: stlink, stlinkv2, stlinkv21, stlinkv3, espstlink.
    #[arg(short = 'c', value_name = "PROGRAMMER")]
    pub programmer: Option<String>,

    /// Restrict to the probe with this USB serial number.
    #[arg(short = 'S', value_name = "SERIAL")]
    pub serial: Option<String>,

    /// Serial device path, for the espstlink/serial-bridge backend.
    #[arg(short = 'd', value_name = "DEVICE")]
    pub device: Option<PathBuf>,

    /// MCU part name, wildcards via `?` (e.g. stm8s003?3).
    #[arg(short = 'p', value_name = "PART")]
    pub part: Option<String>,

    /// Memory region: flash, eeprom, ram, opt, or a hex address.
    #[arg(short = 's', value_name = "REGION")]
    pub slice: Option<String>,

    /// Byte count for the -s slice.
    #[arg(short = 'b', value_name = "COUNT", value_parser = parse_u32_any_base)]
    pub byte_count: Option<u32>,

    /// Read the slice to this file.
    #[arg(short = 'r', value_name = "FILE")]
    pub read_file: Option<PathBuf>,

    /// Write this file into the slice.
    #[arg(short = 'w', value_name = "FILE")]
    pub write_file: Option<PathBuf>,

    /// Verify the slice against this file.
    #[arg(short = 'v', value_name = "FILE")]
    pub verify_file: Option<PathBuf>,

    /// Disable readout protection.
    #[arg(short = 'u')]
    pub unlock: bool,

    /// Enable readout protection.
    #[arg(short = 'k')]
    pub lock: bool,

    /// Reset the target and exit.
    #[arg(short = 'R')]
    pub reset: bool,

    /// List known MCU parts and exit.
    #[arg(short = 'l')]
    pub list_parts: bool,

    /// List adapter backend names and exit.
    #[arg(short = 'L')]
    pub list_adapters: bool,

    /// Try autodetecting the attached part instead of requiring -p.
    #[arg(long)]
    pub autodetect: bool,

    /// Proceed even if the slice falls outside the part's declared map.
    #[arg(long)]
    pub force: bool,

    /// Skip the final target reset.
    #[arg(long = "skip-reset")]
    pub skip_reset: bool,

    /// (ADDED) override image-format auto-detection by file extension.
    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,

    /// (ADDED) status-poll timeout override, in milliseconds.
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,
}

fn parse_u32_any_base(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse::<u32>().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_count_accepts_hex_and_decimal() {
        assert_eq!(parse_u32_any_base("0x100").unwrap(), 256);
        assert_eq!(parse_u32_any_base("256").unwrap(), 256);
    }

    #[test]
    fn cli_parses_minimal_read_invocation() {
        let cli = Cli::parse_from([
            "stm8flash", "-c", "stlink", "-p", "stm8s003f3", "-s", "flash", "-r", "out.hex",
        ]);
        assert_eq!(cli.programmer.as_deref(), Some("stlink"));
        assert_eq!(cli.part.as_deref(), Some("stm8s003f3"));
        assert_eq!(cli.slice.as_deref(), Some("flash"));
        assert!(cli.read_file.is_some());
    }
}
