// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Uniform `{connect, read, write, srst, assert_reset, deassert_reset, close}`
//! capability over three ST-LINK USB dialects and one serial-bridge dialect,
//! grounded in `examples/original_source/src/adapter.h`.

pub mod mock;
pub mod serial_bridge;
pub mod stlink_v1;
pub mod stlink_v2;

use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Usb(rusb::Error),
    Serial(serialport::Error),
    /// Adapter returned an unexpected byte or command code.
    Protocol(String),
    /// Status polling exceeded its bound.
    CommTimeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Usb(e) => write!(f, "USB error: {e}"),
            Error::Serial(e) => write!(f, "serial error: {e}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::CommTimeout => write!(f, "communication timeout"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Usb(e) => Some(e),
            Error::Serial(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<rusb::Error> for Error {
    fn from(e: rusb::Error) -> Self {
        Error::Usb(e)
    }
}

impl From<serialport::Error> for Error {
    fn from(e: serialport::Error) -> Self {
        Error::Serial(e)
    }
}

/// The one abstract capability set every backend implements. `read`/`write`
/// address the target's 24-bit memory space; callers (C5) are responsible
/// for splitting transfers wider than `read_buf_size`.
pub trait Adapter {
    fn connect(&mut self) -> Result<(), Error>;
    fn read(&mut self, addr: u32, len: usize) -> Result<Vec<u8>, Error>;
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Error>;
    fn assert_reset(&mut self) -> Result<(), Error>;
    fn deassert_reset(&mut self) -> Result<(), Error>;
    fn generate_reset(&mut self) -> Result<(), Error>;
    /// Soft-reset the target over the backend's native command. The caller
    /// is responsible for flipping the SWIM CSR bits before calling this.
    fn srst(&mut self) -> Result<(), Error>;
    fn close(&mut self) -> Result<(), Error>;
    /// Maximum payload, in bytes, one `read`/`write` call may carry in a
    /// single SWIM transaction.
    fn read_buf_size(&self) -> usize;

    /// Run the backend's wake-up pulse pattern on the SWIM line. Backends
    /// that have no distinct entry-sequence command (the serial bridge does
    /// this inline during `connect`) keep the default no-op.
    fn enter_sequence(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Negotiate SWIM high-speed mode with the probe, once `swim::SwimSession`
    /// has determined the target advertises `HSIT`. Backends with no
    /// distinct speed command keep the default no-op.
    fn set_speed(&mut self, _high_speed: bool) -> Result<(), Error> {
        Ok(())
    }

    /// Override the backend's status-poll budget (the orchestrator's
    /// `--timeout-ms`). Backends with no status-poll loop of their own keep
    /// the default no-op.
    fn set_status_timeout(&mut self, _timeout: Duration) {}
}

/// Names recognized by the `-c` CLI flag: the three ST-LINK generations plus
/// the serial bridge.
pub const BACKEND_NAMES: &[&str] = &["stlink", "stlinkv2", "stlinkv21", "stlinkv3", "espstlink"];

/// Lets the orchestrator pick a backend at runtime and hand `swim::SwimSession`
/// a single concrete type, instead of monomorphizing the whole call chain
/// over four backend structs.
impl Adapter for Box<dyn Adapter> {
    fn connect(&mut self) -> Result<(), Error> {
        (**self).connect()
    }

    fn read(&mut self, addr: u32, len: usize) -> Result<Vec<u8>, Error> {
        (**self).read(addr, len)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        (**self).write(addr, data)
    }

    fn assert_reset(&mut self) -> Result<(), Error> {
        (**self).assert_reset()
    }

    fn deassert_reset(&mut self) -> Result<(), Error> {
        (**self).deassert_reset()
    }

    fn generate_reset(&mut self) -> Result<(), Error> {
        (**self).generate_reset()
    }

    fn srst(&mut self) -> Result<(), Error> {
        (**self).srst()
    }

    fn close(&mut self) -> Result<(), Error> {
        (**self).close()
    }

    fn read_buf_size(&self) -> usize {
        (**self).read_buf_size()
    }

    fn enter_sequence(&mut self) -> Result<(), Error> {
        (**self).enter_sequence()
    }

    fn set_speed(&mut self, high_speed: bool) -> Result<(), Error> {
        (**self).set_speed(high_speed)
    }

    fn set_status_timeout(&mut self, timeout: Duration) {
        (**self).set_status_timeout(timeout)
    }
}
