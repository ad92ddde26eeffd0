// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ST-LINK v1 backend: legacy CBW/CSW ("SCSI-like") USB framing.

use std::time::Duration;

use log::{debug, warn};
use rusb::{Context, DeviceHandle, UsbContext};

use crate::{Adapter, Error};

const VENDOR_ID: u16 = 0x0483;
const PRODUCT_ID: u16 = 0x3744;

const EP_OUT: u8 = 0x02;
const EP_IN: u8 = 0x81;
const USB_TIMEOUT: Duration = Duration::from_millis(1000);

const CBW_SIGNATURE: u32 = 0x5342_5355; // "USBS" backwards, matches the probe's expected magic
const CSW_SIGNATURE: u32 = 0x5342_5355;

const CBW_DIR_IN: u8 = 0x80;
const CBW_DIR_OUT: u8 = 0x00;

const READ_BUF_SIZE: usize = 6 * 1024;

fn build_cbw(tag: u32, transfer_len: u32, dir: u8, cdb: &[u8]) -> [u8; 31] {
    let mut cbw = [0u8; 31];
    cbw[0..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
    cbw[4..8].copy_from_slice(&tag.to_le_bytes());
    cbw[8..12].copy_from_slice(&transfer_len.to_le_bytes());
    cbw[12] = dir;
    cbw[13] = 0; // LUN
    cbw[14] = cdb.len() as u8;
    cbw[15..15 + cdb.len()].copy_from_slice(cdb);
    cbw
}

/// ST-LINK v1's CBW/CSW USB-mass-storage-like transport. Each command is a
/// 31-byte CBW carrying a 16-byte opcode block; the probe answers with a
/// CSW status byte, plus a payload phase for reads.
pub struct StLinkV1 {
    handle: Option<DeviceHandle<Context>>,
    tag: u32,
    read_buf_size: usize,
}

impl StLinkV1 {
    pub fn new() -> Self {
        StLinkV1 {
            handle: None,
            tag: 1,
            read_buf_size: READ_BUF_SIZE,
        }
    }

    fn handle(&mut self) -> Result<&mut DeviceHandle<Context>, Error> {
        self.handle
            .as_mut()
            .ok_or_else(|| Error::Protocol("adapter not connected".into()))
    }

    fn next_tag(&mut self) -> u32 {
        self.tag = self.tag.wrapping_add(1);
        self.tag
    }

    /// Submit a CBW, poll/collect the CSW, and return the status byte
    /// (non-zero means `COMM_ERROR`, surfaced as [`Error::Protocol`]).
    fn transact(&mut self, cdb: &[u8], dir: u8, transfer_len: u32) -> Result<(), Error> {
        let tag = self.next_tag();
        let cbw = build_cbw(tag, transfer_len, dir, cdb);
        let handle = self.handle()?;
        handle.write_bulk(EP_OUT, &cbw, USB_TIMEOUT)?;

        let mut csw = [0u8; 13];
        handle.read_bulk(EP_IN, &mut csw, USB_TIMEOUT)?;
        let sig = u32::from_le_bytes(csw[0..4].try_into().unwrap());
        if sig != CSW_SIGNATURE {
            return Err(Error::Protocol("bad CSW signature".into()));
        }
        let status = csw[12];
        if status != 0 {
            return Err(Error::Protocol(format!(
                "CSW reported non-zero status 0x{status:02X}"
            )));
        }
        Ok(())
    }
}

impl Default for StLinkV1 {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for StLinkV1 {
    fn connect(&mut self) -> Result<(), Error> {
        let context = Context::new()?;
        let handle = context
            .open_device_with_vid_pid(VENDOR_ID, PRODUCT_ID)
            .ok_or_else(|| Error::Protocol("no ST-LINK/V1 device found".into()))?;
        handle.claim_interface(0)?;
        self.handle = Some(handle);
        debug!("ST-LINK/V1 connected, read_buf_size={}", self.read_buf_size);
        Ok(())
    }

    fn read(&mut self, addr: u32, len: usize) -> Result<Vec<u8>, Error> {
        if len > self.read_buf_size {
            return Err(Error::Protocol(format!(
                "read of {len} bytes exceeds read_buf_size {}",
                self.read_buf_size
            )));
        }
        let mut cdb = [0u8; 16];
        cdb[0] = 0xF4; // SWIM read-memory opcode, probe-specific
        cdb[1..5].copy_from_slice(&addr.to_be_bytes());
        cdb[5..7].copy_from_slice(&(len as u16).to_be_bytes());
        self.transact(&cdb, CBW_DIR_IN, len as u32)?;

        let mut out = vec![0u8; len];
        let handle = self.handle()?;
        handle.read_bulk(EP_IN, &mut out, USB_TIMEOUT)?;
        Ok(out)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        if data.len() > self.read_buf_size {
            return Err(Error::Protocol(format!(
                "write of {} bytes exceeds read_buf_size {}",
                data.len(),
                self.read_buf_size
            )));
        }
        let mut cdb = [0u8; 16];
        cdb[0] = 0xF5; // SWIM write-memory opcode, probe-specific
        cdb[1..5].copy_from_slice(&addr.to_be_bytes());
        cdb[5..7].copy_from_slice(&(data.len() as u16).to_be_bytes());
        self.transact(&cdb, CBW_DIR_OUT, data.len() as u32)?;

        let handle = self.handle()?;
        handle.write_bulk(EP_OUT, data, USB_TIMEOUT)?;
        Ok(())
    }

    fn assert_reset(&mut self) -> Result<(), Error> {
        let cdb = [0xF8u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        self.transact(&cdb, CBW_DIR_IN, 0)
    }

    fn deassert_reset(&mut self) -> Result<(), Error> {
        let cdb = [0xF9u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        self.transact(&cdb, CBW_DIR_IN, 0)
    }

    fn generate_reset(&mut self) -> Result<(), Error> {
        let cdb = [0xFAu8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        self.transact(&cdb, CBW_DIR_IN, 0)
    }

    fn srst(&mut self) -> Result<(), Error> {
        let cdb = [0xFBu8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        self.transact(&cdb, CBW_DIR_IN, 0)?;
        std::thread::sleep(Duration::from_millis(1));
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.release_interface(0) {
                warn!("failed to release ST-LINK/V1 interface cleanly: {e}");
            }
        }
        Ok(())
    }

    fn read_buf_size(&self) -> usize {
        self.read_buf_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbw_carries_signature_tag_and_cdb() {
        let cdb = [0xF4u8; 16];
        let cbw = build_cbw(7, 64, CBW_DIR_IN, &cdb);
        assert_eq!(&cbw[0..4], &CBW_SIGNATURE.to_le_bytes());
        assert_eq!(&cbw[4..8], &7u32.to_le_bytes());
        assert_eq!(&cbw[8..12], &64u32.to_le_bytes());
        assert_eq!(cbw[12], CBW_DIR_IN);
        assert_eq!(cbw[14], 16);
        assert_eq!(&cbw[15..31], &cdb[..]);
    }
}
