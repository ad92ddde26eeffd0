// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ST-LINK v2 / v2.1 / v3 backend: a 16-byte command frame over one bulk OUT
//! endpoint, with a `SWIM` sub-command multiplexing entry, speed, reset and
//! memory operations.

use std::time::{Duration, Instant};

use log::{debug, warn};
use rusb::{Context, DeviceHandle, UsbContext};

use crate::{Adapter, Error};

/// The three USB command-framing dialects this struct covers; they share
/// every command byte and differ only in endpoint numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    V2,
    V21,
    V3,
}

impl Generation {
    fn vid_pid(self) -> (u16, u16) {
        match self {
            Generation::V2 => (0x0483, 0x3748),
            Generation::V21 => (0x0483, 0x374B),
            Generation::V3 => (0x0483, 0x374E),
        }
    }

    fn endpoints(self) -> (u8, u8) {
        match self {
            Generation::V2 => (0x02, 0x81),
            Generation::V21 | Generation::V3 => (0x01, 0x81),
        }
    }
}

const USB_TIMEOUT: Duration = Duration::from_millis(1000);
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Matches `stm8flash`'s own `--timeout-ms` default, so a backend used
/// directly (outside the orchestrator) polls for the same budget.
const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_millis(1000);

const CMD_GET_VERSION: u8 = 0xF1;
const CMD_GET_CURRENT_MODE: u8 = 0xF5;
const CMD_GET_VDD: u8 = 0xF7;
const CMD_SWIM: u8 = 0xF4;

const MODE_DFU: u8 = 0x00;
const MODE_DEBUG: u8 = 0x02;

const SWIM_ENTER: u8 = 0x00;
const SWIM_EXIT: u8 = 0x01;
const SWIM_READ_CAP: u8 = 0x02;
const SWIM_SPEED: u8 = 0x03;
const SWIM_ENTER_SEQ: u8 = 0x04;
const SWIM_GEN_RST: u8 = 0x05;
const SWIM_RESET: u8 = 0x06;
const SWIM_ASSERT_RESET: u8 = 0x07;
const SWIM_DEASSERT_RESET: u8 = 0x08;
const SWIM_READSTATUS: u8 = 0x09;
const SWIM_WRITEMEM: u8 = 0x0A;
const SWIM_READMEM: u8 = 0x0B;
const SWIM_READ_BUFFERSIZE: u8 = 0x0C;

const STATUS_OK: u8 = 0;
const STATUS_BUSY: u8 = 1;
const STATUS_NO_RESPONSE: u8 = 4;
const STATUS_BAD_STATE: u8 = 5;

pub struct StLinkV2 {
    generation: Generation,
    handle: Option<DeviceHandle<Context>>,
    read_buf_size: usize,
    status_timeout: Duration,
}

fn frame(cmd: u8, sub: u8, args: &[u8]) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[0] = cmd;
    buf[1] = sub;
    buf[2..2 + args.len()].copy_from_slice(args);
    buf
}

impl StLinkV2 {
    pub fn new(generation: Generation) -> Self {
        StLinkV2 {
            generation,
            handle: None,
            read_buf_size: 512,
            status_timeout: DEFAULT_STATUS_TIMEOUT,
        }
    }

    fn handle(&mut self) -> Result<&mut DeviceHandle<Context>, Error> {
        self.handle
            .as_mut()
            .ok_or_else(|| Error::Protocol("adapter not connected".into()))
    }

    fn command(&mut self, cmd_frame: &[u8; 16], reply_len: usize) -> Result<Vec<u8>, Error> {
        let (ep_out, ep_in) = self.generation.endpoints();
        let handle = self.handle()?;
        handle.write_bulk(ep_out, cmd_frame, USB_TIMEOUT)?;
        if reply_len == 0 {
            return Ok(Vec::new());
        }
        let mut reply = vec![0u8; reply_len];
        handle.read_bulk(ep_in, &mut reply, USB_TIMEOUT)?;
        Ok(reply)
    }

    fn swim(&mut self, sub: u8, args: &[u8], reply_len: usize) -> Result<Vec<u8>, Error> {
        self.command(&frame(CMD_SWIM, sub, args), reply_len)
    }

    /// Poll `READSTATUS` until `OK`, or until `self.status_timeout` has
    /// elapsed since the first poll.
    fn poll_status(&mut self) -> Result<(), Error> {
        let deadline = Instant::now() + self.status_timeout;
        loop {
            let reply = self.swim(SWIM_READSTATUS, &[], 4)?;
            let status = reply[0];
            match status {
                STATUS_OK => return Ok(()),
                STATUS_BUSY => {
                    if Instant::now() >= deadline {
                        return Err(Error::CommTimeout);
                    }
                    std::thread::sleep(STATUS_POLL_INTERVAL);
                }
                STATUS_NO_RESPONSE | STATUS_BAD_STATE => {
                    return Err(Error::Protocol(format!(
                        "READSTATUS returned 0x{status:02X}"
                    )))
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected READSTATUS byte 0x{other:02X}"
                    )))
                }
            }
        }
    }
}

impl Adapter for StLinkV2 {
    fn connect(&mut self) -> Result<(), Error> {
        let (vid, pid) = self.generation.vid_pid();
        let context = Context::new()?;
        let handle = context
            .open_device_with_vid_pid(vid, pid)
            .ok_or_else(|| Error::Protocol("no matching ST-LINK device found".into()))?;
        handle.claim_interface(0)?;
        self.handle = Some(handle);

        let mode = self.command(&frame(CMD_GET_CURRENT_MODE, 0, &[]), 2)?;
        if mode[0] == MODE_DFU || mode[0] == MODE_DEBUG {
            self.swim(SWIM_EXIT, &[], 0)?;
        }

        self.swim(SWIM_ENTER, &[], 0)?;
        let bufsize = self.swim(SWIM_READ_BUFFERSIZE, &[], 2)?;
        self.read_buf_size = u16::from_be_bytes([bufsize[0], bufsize[1]]) as usize;
        let _ = self.swim(SWIM_READ_CAP, &[], 4)?;

        let version = self.command(&frame(CMD_GET_VERSION, 0, &[]), 6)?;
        debug!("ST-LINK version reply: {version:02X?}");
        let _ = self.command(&frame(CMD_GET_VDD, 0, &[]), 6);

        Ok(())
    }

    fn read(&mut self, addr: u32, len: usize) -> Result<Vec<u8>, Error> {
        if len > self.read_buf_size.max(1) {
            warn!(
                "read of {len} exceeds read_buf_size {}; caller should split",
                self.read_buf_size
            );
        }
        let mut args = [0u8; 14];
        args[0..4].copy_from_slice(&addr.to_be_bytes());
        args[4..6].copy_from_slice(&(len as u16).to_be_bytes());
        self.swim(SWIM_READMEM, &args, 0)?;
        self.poll_status()?;
        let (_, ep_in) = self.generation.endpoints();
        let mut out = vec![0u8; len];
        self.handle()?.read_bulk(ep_in, &mut out, USB_TIMEOUT)?;
        Ok(out)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        let mut args = [0u8; 14];
        args[0..4].copy_from_slice(&addr.to_be_bytes());
        args[4..6].copy_from_slice(&(data.len() as u16).to_be_bytes());
        self.swim(SWIM_WRITEMEM, &args, 0)?;
        let (ep_out, _) = self.generation.endpoints();
        self.handle()?.write_bulk(ep_out, data, USB_TIMEOUT)?;
        self.poll_status()
    }

    fn assert_reset(&mut self) -> Result<(), Error> {
        self.swim(SWIM_ASSERT_RESET, &[], 0).map(|_| ())
    }

    fn deassert_reset(&mut self) -> Result<(), Error> {
        self.swim(SWIM_DEASSERT_RESET, &[], 0).map(|_| ())
    }

    fn generate_reset(&mut self) -> Result<(), Error> {
        self.swim(SWIM_GEN_RST, &[], 0).map(|_| ())
    }

    fn srst(&mut self) -> Result<(), Error> {
        self.swim(SWIM_RESET, &[], 0)?;
        std::thread::sleep(Duration::from_millis(1));
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        let _ = self.swim(SWIM_EXIT, &[], 0);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.release_interface(0) {
                warn!("failed to release ST-LINK interface cleanly: {e}");
            }
        }
        Ok(())
    }

    fn read_buf_size(&self) -> usize {
        self.read_buf_size
    }

    fn enter_sequence(&mut self) -> Result<(), Error> {
        self.swim(SWIM_ENTER_SEQ, &[], 2).map(|_| ())
    }

    fn set_speed(&mut self, high_speed: bool) -> Result<(), Error> {
        self.swim(SWIM_SPEED, &[high_speed as u8], 0).map(|_| ())
    }

    fn set_status_timeout(&mut self, timeout: Duration) {
        self.status_timeout = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_places_cmd_and_sub_first() {
        let f = frame(CMD_SWIM, SWIM_WRITEMEM, &[1, 2, 3]);
        assert_eq!(f[0], CMD_SWIM);
        assert_eq!(f[1], SWIM_WRITEMEM);
        assert_eq!(&f[2..5], &[1, 2, 3]);
        assert_eq!(f.len(), 16);
    }

    #[test]
    fn generation_endpoints_differ_for_v2() {
        assert_eq!(Generation::V2.endpoints(), (0x02, 0x81));
        assert_eq!(Generation::V21.endpoints(), (0x01, 0x81));
        assert_eq!(Generation::V3.endpoints(), (0x01, 0x81));
    }

    #[test]
    fn set_status_timeout_overrides_default() {
        let mut backend = StLinkV2::new(Generation::V2);
        assert_eq!(backend.status_timeout, DEFAULT_STATUS_TIMEOUT);
        backend.set_status_timeout(Duration::from_millis(5000));
        assert_eq!(backend.status_timeout, Duration::from_millis(5000));
    }
}
