// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crate-wide typed error. Library crates keep their own narrow error
//! enums; this one wraps each with a `From` impl so `run.rs` can use `?`
//! throughout and `main.rs` can log one coherent chain.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Region(region::Error),
    Image(image::Error),
    Adapter(adapter::Error),
    Swim(swim::Error),
    Flash(flash::Error),
    Autodetect(autodetect::Error),
    /// Address range requested by `-s`/`-b` falls outside the part's
    /// declared memory map. Downgraded to a logged warning under `--force`.
    Range { address: u32, len: u32 },
    /// Unknown part name, unknown programmer name, or a nonsensical flag
    /// combination (e.g. no part given and `--autodetect` not set).
    Usage(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Region(e) => write!(f, "{e}"),
            Error::Image(e) => write!(f, "{e}"),
            Error::Adapter(e) => write!(f, "{e}"),
            Error::Swim(e) => write!(f, "{e}"),
            Error::Flash(e) => write!(f, "{e}"),
            Error::Autodetect(e) => write!(f, "{e}"),
            Error::Range { address, len } => write!(
                f,
                "range 0x{address:08X}+{len:#x} falls outside the part's declared memory map"
            ),
            Error::Usage(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Region(e) => Some(e),
            Error::Image(e) => Some(e),
            Error::Adapter(e) => Some(e),
            Error::Swim(e) => Some(e),
            Error::Flash(e) => Some(e),
            Error::Autodetect(e) => Some(e),
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

impl From<image::Error> for Error {
    fn from(e: image::Error) -> Self {
        Error::Image(e)
    }
}

impl From<adapter::Error> for Error {
    fn from(e: adapter::Error) -> Self {
        Error::Adapter(e)
    }
}

impl From<swim::Error> for Error {
    fn from(e: swim::Error) -> Self {
        Error::Swim(e)
    }
}

impl From<flash::Error> for Error {
    fn from(e: flash::Error) -> Self {
        Error::Flash(e)
    }
}

impl From<autodetect::Error> for Error {
    fn from(e: autodetect::Error) -> Self {
        Error::Autodetect(e)
    }
}
