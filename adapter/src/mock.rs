// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory [`Adapter`] used by `swim`/`flash` tests to assert on the exact
//! sequence of target transactions a higher layer issues, instead of
//! exercising real USB/serial hardware.

use std::collections::BTreeMap;

use crate::{Adapter, Error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Read { addr: u32, len: usize },
    Write { addr: u32, data: Vec<u8> },
    AssertReset,
    DeassertReset,
    GenerateReset,
    Srst,
}

/// A byte-addressable target memory simulation plus a transcript of every
/// call made against it.
pub struct MockAdapter {
    memory: BTreeMap<u32, u8>,
    pub transcript: Vec<Transaction>,
    pub read_buf_size: usize,
    pub rop_active: bool,
}

impl MockAdapter {
    pub fn new() -> Self {
        MockAdapter {
            memory: BTreeMap::new(),
            transcript: Vec::new(),
            read_buf_size: 512,
            rop_active: false,
        }
    }

    /// Preload target memory, e.g. to simulate an existing flash block
    /// before a read-modify-write test.
    pub fn seed(&mut self, addr: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.memory.insert(addr + i as u32, b);
        }
    }

    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| *self.memory.get(&(addr + i as u32)).unwrap_or(&0xFF))
            .collect()
    }

    /// Number of [`Transaction::Write`] entries targeting a given address,
    /// used by tests asserting "zero block-program commands issued".
    pub fn write_count_at(&self, addr: u32) -> usize {
        self.transcript
            .iter()
            .filter(|t| matches!(t, Transaction::Write { addr: a, .. } if *a == addr))
            .count()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for MockAdapter {
    fn connect(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn read(&mut self, addr: u32, len: usize) -> Result<Vec<u8>, Error> {
        self.transcript.push(Transaction::Read { addr, len });
        if self.rop_active {
            return Ok(vec![0x71; len]);
        }
        Ok(self.peek(addr, len))
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        self.transcript.push(Transaction::Write {
            addr,
            data: data.to_vec(),
        });
        self.seed(addr, data);
        Ok(())
    }

    fn assert_reset(&mut self) -> Result<(), Error> {
        self.transcript.push(Transaction::AssertReset);
        Ok(())
    }

    fn deassert_reset(&mut self) -> Result<(), Error> {
        self.transcript.push(Transaction::DeassertReset);
        Ok(())
    }

    fn generate_reset(&mut self) -> Result<(), Error> {
        self.transcript.push(Transaction::GenerateReset);
        Ok(())
    }

    fn srst(&mut self) -> Result<(), Error> {
        self.transcript.push(Transaction::Srst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
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
    fn write_then_read_round_trips() {
        let mut a = MockAdapter::new();
        a.write(0x8000, &[1, 2, 3]).unwrap();
        assert_eq!(a.read(0x8000, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(a.transcript.len(), 2);
    }

    #[test]
    fn rop_active_returns_sentinel() {
        let mut a = MockAdapter::new();
        a.seed(0x8000, &[1, 2, 3, 4]);
        a.rop_active = true;
        assert_eq!(a.read(0x8000, 4).unwrap(), vec![0x71; 4]);
    }
}
