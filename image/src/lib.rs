// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image file codecs: Intel-HEX, Motorola S-Record, and raw binary, all
//! operating on [`region::RegionList`].

pub mod binary;
pub mod ihex;
pub mod srec;

use std::fmt;
use std::path::Path;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// Image-file parse failure; carries the 1-based line number.
    Format { line: usize, msg: String },
    /// The region list has an address gap the codec cannot represent.
    Gap,
    Region(region::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Format { line, msg } => write!(f, "line {line}: {msg}"),
            Error::Gap => write!(f, "region list is not contiguous"),
            Error::Region(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Region(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<region::Error> for Error {
    fn from(e: region::Error) -> Self {
        Error::Region(e)
    }
}

/// Image file formats this crate can read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ihex,
    Srec,
    Binary,
}

/// Infer a format from a file extension. Falls back to [`Format::Binary`]
/// for anything unrecognized, matching the original tool's behavior of
/// treating an unknown extension as a flat binary image.
pub fn detect_format(path: &Path) -> Format {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("hex") | Some("ihx") | Some("ihex") => Format::Ihex,
        Some("s19") | Some("srec") | Some("mot") | Some("s37") => Format::Srec,
        _ => Format::Binary,
    }
}

pub(crate) fn hex_byte(s: &str, line: usize) -> Result<u8, Error> {
    u8::from_str_radix(s, 16).map_err(|_| Error::Format {
        line,
        msg: format!("invalid hex byte {s:?}"),
    })
}

pub(crate) fn hex_u16(s: &str, line: usize) -> Result<u16, Error> {
    u16::from_str_radix(s, 16).map_err(|_| Error::Format {
        line,
        msg: format!("invalid hex field {s:?}"),
    })
}
