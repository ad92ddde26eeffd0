// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SWIM session protocol: entry sequence, speed negotiation, CPU stall,
//! single-byte and block memory ops, and reset variants, built on
//! [`adapter::Adapter`].

use std::fmt;

use bitflags::bitflags;
use log::debug;

use adapter::Adapter;

bitflags! {
    /// Target-side SWIM control register at fixed address [`CSR_ADDR`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Csr: u8 {
        const PRI = 0x01;
        const HS = 0x02;
        const HSIT = 0x04;
        const RST = 0x08;
        const SWIM_DM = 0x10;
        const SAFE_MASK = 0x20;
    }
}

bitflags! {
    /// Target-side debug-module control/status register at [`DM_CSR2_ADDR`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmCsr2: u8 {
        const STALL = 0x08;
    }
}

pub const CSR_ADDR: u32 = 0x7F80;
pub const DM_CSR2_ADDR: u32 = 0x7F99;

#[derive(Debug)]
pub enum Error {
    Adapter(adapter::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Adapter(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Adapter(e) => Some(e),
        }
    }
}

impl From<adapter::Error> for Error {
    fn from(e: adapter::Error) -> Self {
        Error::Adapter(e)
    }
}

/// A live SWIM conversation with one target, built on top of one connected
/// [`Adapter`]. After [`SwimSession::open`] returns, the CPU is stalled and
/// every address in the target's 24-bit space is readable.
pub struct SwimSession<A: Adapter> {
    adapter: A,
}

impl<A: Adapter> SwimSession<A> {
    /// Run the full entry sequence: assert reset, wake-up pulse, program
    /// CSR/DM_CSR2, generate reset, release reset, then attempt high-speed
    /// negotiation.
    pub fn open(mut adapter: A) -> Result<Self, Error> {
        adapter.connect()?;
        adapter.assert_reset()?;
        adapter.enter_sequence()?;

        let csr = Csr::SAFE_MASK | Csr::SWIM_DM | Csr::PRI;
        adapter.write(CSR_ADDR, &[csr.bits()])?;
        adapter.write(DM_CSR2_ADDR, &[DmCsr2::STALL.bits()])?;

        adapter.generate_reset()?;
        adapter.deassert_reset()?;

        let observed = Csr::from_bits_truncate(adapter.read(CSR_ADDR, 1)?[0]);
        if observed.contains(Csr::HSIT) {
            let updated = observed | Csr::HS;
            adapter.write(CSR_ADDR, &[updated.bits()])?;
            adapter.set_speed(true)?;
            debug!("SWIM high-speed negotiated");
        } else {
            debug!("target did not advertise HSIT; staying at low speed");
        }

        Ok(SwimSession { adapter })
    }

    pub fn read_byte(&mut self, addr: u32) -> Result<u8, Error> {
        Ok(self.adapter.read(addr, 1)?[0])
    }

    pub fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), Error> {
        self.adapter.write(addr, &[value])?;
        Ok(())
    }

    /// Read `len` bytes starting at `addr`, splitting transfers wider than
    /// the adapter's `read_buf_size` into multiple SWIM transactions.
    pub fn read_block(&mut self, addr: u32, len: usize) -> Result<Vec<u8>, Error> {
        let chunk_size = self.adapter.read_buf_size().max(1);
        let mut out = Vec::with_capacity(len);
        let mut cur = addr;
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(chunk_size);
            out.extend(self.adapter.read(cur, chunk)?);
            cur += chunk as u32;
            remaining -= chunk;
        }
        Ok(out)
    }

    pub fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        let chunk_size = self.adapter.read_buf_size().max(1);
        let mut cur = addr;
        for chunk in data.chunks(chunk_size) {
            self.adapter.write(cur, chunk)?;
            cur += chunk.len() as u32;
        }
        Ok(())
    }

    /// Read the debug-module CSR, flip the `STALL` bit, write it back.
    pub fn stall(&mut self, on: bool) -> Result<(), Error> {
        let current = DmCsr2::from_bits_truncate(self.adapter.read(DM_CSR2_ADDR, 1)?[0]);
        let updated = if on {
            current | DmCsr2::STALL
        } else {
            current & !DmCsr2::STALL
        };
        self.adapter.write(DM_CSR2_ADDR, &[updated.bits()])?;
        Ok(())
    }

    pub fn gen_reset(&mut self) -> Result<(), Error> {
        self.adapter.generate_reset()?;
        Ok(())
    }

    /// Arm auto-exit on the coming reset (`RST` in `SWIM_CSR`), release the
    /// stall so the CPU will run, then issue the backend's soft reset.
    pub fn srst(&mut self) -> Result<(), Error> {
        let current = Csr::from_bits_truncate(self.adapter.read(CSR_ADDR, 1)?[0]);
        self.adapter.write(CSR_ADDR, &[(current | Csr::RST).bits()])?;
        self.stall(false)?;
        self.adapter.srst()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<(), Error> {
        self.adapter.close()?;
        Ok(())
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapter::mock::{MockAdapter, Transaction};

    #[test]
    fn open_runs_entry_sequence_before_memory_ops() {
        let mock = MockAdapter::new();
        let mut session = SwimSession::open(mock).unwrap();
        let transcript = &session.adapter_mut().transcript;
        assert_eq!(transcript[0], Transaction::AssertReset);
        assert!(transcript
            .iter()
            .any(|t| matches!(t, Transaction::Write { addr, .. } if *addr == CSR_ADDR)));
        assert!(transcript
            .iter()
            .any(|t| matches!(t, Transaction::Write { addr, .. } if *addr == DM_CSR2_ADDR)));
        assert!(transcript.contains(&Transaction::GenerateReset));
        assert!(transcript.contains(&Transaction::DeassertReset));
    }

    #[test]
    fn read_block_splits_across_buf_size() {
        let mut mock = MockAdapter::new();
        mock.read_buf_size = 4;
        mock.seed(0x8000, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut session = SwimSession::open(mock).unwrap();
        let data = session.read_block(0x8000, 8).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn stall_flips_only_the_stall_bit() {
        let mock = MockAdapter::new();
        let mut session = SwimSession::open(mock).unwrap();
        session.stall(true).unwrap();
        let value = session.read_byte(DM_CSR2_ADDR).unwrap();
        assert!(DmCsr2::from_bits_truncate(value).contains(DmCsr2::STALL));
        session.stall(false).unwrap();
        let value = session.read_byte(DM_CSR2_ADDR).unwrap();
        assert!(!DmCsr2::from_bits_truncate(value).contains(DmCsr2::STALL));
    }

    #[test]
    fn srst_sets_rst_bit_and_clears_stall() {
        let mock = MockAdapter::new();
        let mut session = SwimSession::open(mock).unwrap();
        session.srst().unwrap();
        let csr = Csr::from_bits_truncate(session.read_byte(CSR_ADDR).unwrap());
        assert!(csr.contains(Csr::RST));
        let dm = DmCsr2::from_bits_truncate(session.read_byte(DM_CSR2_ADDR).unwrap());
        assert!(!dm.contains(DmCsr2::STALL));
    }
}
