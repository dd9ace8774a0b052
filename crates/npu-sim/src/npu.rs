// SPDX-License-Identifier: AGPL-3.0-only

//! Top-level device model.
//!
//! Owns the SRAM store (microcode region + working data), an external
//! memory region reachable by the DMA instructions, and the sequencer
//! with its engines. The host side talks through the register write
//! port and the `done` line; everything else advances on `tick`.
//!
//! The microcode store and any weight/parameter regions are written by
//! the host only before `start`: mutating them while a program is
//! pending completion is a caller contract violation with undefined
//! results, exactly as on the bus-attached hardware.

use crate::clock::Clocked;
use crate::error::{NpuError, Result};
use crate::sequencer::{RegWrite, Sequencer};
use npu_isa::MicrocodeProgram;
use npu_isa::regs;

/// Default SRAM size in bytes.
pub const SRAM_BYTES: usize = 64 * 1024;

/// Default external memory window in bytes.
pub const EXT_MEM_BYTES: usize = 64 * 1024;

/// The assembled device.
#[derive(Debug)]
pub struct Npu {
    sram: Vec<u8>,
    ext_mem: Vec<u8>,
    seq: Sequencer,
    pending_write: Option<RegWrite>,
    write_ack: bool,
}

impl Default for Npu {
    fn default() -> Self {
        Self::new()
    }
}

impl Npu {
    /// Device with default memory sizes.
    pub fn new() -> Self {
        Self::with_memory(SRAM_BYTES, EXT_MEM_BYTES)
    }

    /// Device with explicit SRAM / external memory sizes.
    pub fn with_memory(sram_bytes: usize, ext_bytes: usize) -> Self {
        Self {
            sram: vec![0; sram_bytes],
            ext_mem: vec![0; ext_bytes],
            seq: Sequencer::new(),
            pending_write: None,
            write_ack: false,
        }
    }

    /// Sequencer completion line.
    pub const fn done(&self) -> bool {
        self.seq.done()
    }

    /// True while a program is being fetched or executed.
    pub const fn busy(&self) -> bool {
        self.seq.busy()
    }

    /// Acknowledgment for the register write presented before the last
    /// `tick`.
    pub const fn write_ack(&self) -> bool {
        self.write_ack
    }

    /// Present a register write request; it is applied and
    /// acknowledged at the next `tick`. One request per cycle.
    pub fn write_reg(&mut self, addr: u32, data: u32) {
        self.pending_write = Some(RegWrite { addr, data });
    }

    /// Advance the whole device one clock edge.
    pub fn tick(&mut self) {
        let write = self.pending_write.take();
        self.write_ack = self.seq.tick(write, &mut self.sram, &mut self.ext_mem);
    }

    /// Place a microcode image into SRAM at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`NpuError::OutOfBounds`] if the image does not fit.
    pub fn load_microcode(&mut self, program: &MicrocodeProgram, base: usize) -> Result<()> {
        let image = program.to_bytes();
        self.write_sram(base, &image)
    }

    /// Program `UCODE_BASE`/`UCODE_LEN` and pulse `CTRL.start`, one
    /// register write per cycle as a bus master would.
    pub fn start_program(&mut self, base: u32, len: u32) {
        self.write_reg(regs::UCODE_BASE, base);
        self.tick();
        self.write_reg(regs::UCODE_LEN, len);
        self.tick();
        self.write_reg(regs::CTRL, regs::ctrl::START);
        self.tick();
    }

    /// Copy bytes into SRAM.
    ///
    /// # Errors
    ///
    /// Returns [`NpuError::OutOfBounds`] if the range does not fit.
    pub fn write_sram(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        copy_into("sram region", &mut self.sram, offset, data)
    }

    /// Read bytes back from SRAM.
    pub fn read_sram(&self, offset: usize, len: usize) -> &[u8] {
        let end = offset.saturating_add(len).min(self.sram.len());
        &self.sram[offset.min(end)..end]
    }

    /// Copy bytes into the external memory window.
    ///
    /// # Errors
    ///
    /// Returns [`NpuError::OutOfBounds`] if the range does not fit.
    pub fn write_ext_mem(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        copy_into("external memory", &mut self.ext_mem, offset, data)
    }

    /// Read bytes back from the external memory window.
    pub fn read_ext_mem(&self, offset: usize, len: usize) -> &[u8] {
        let end = offset.saturating_add(len).min(self.ext_mem.len());
        &self.ext_mem[offset.min(end)..end]
    }
}

impl Clocked for Npu {
    fn reset(&mut self) {
        self.sram.fill(0);
        self.ext_mem.fill(0);
        self.seq.reset();
        self.pending_write = None;
        self.write_ack = false;
    }
}

fn copy_into(what: &'static str, mem: &mut [u8], offset: usize, data: &[u8]) -> Result<()> {
    let end = offset
        .checked_add(data.len())
        .filter(|&e| e <= mem.len())
        .ok_or(NpuError::out_of_bounds(what, offset, data.len(), mem.len()))?;
    mem[offset..end].copy_from_slice(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sram_bounds_are_checked() {
        let mut npu = Npu::with_memory(64, 64);
        assert!(npu.write_sram(0, &[1, 2, 3]).is_ok());
        assert!(matches!(
            npu.write_sram(62, &[1, 2, 3]),
            Err(NpuError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn write_ack_follows_request_by_one_tick() {
        let mut npu = Npu::new();
        assert!(!npu.write_ack());
        npu.write_reg(regs::UCODE_BASE, 0x100);
        npu.tick();
        assert!(npu.write_ack());
        npu.tick();
        assert!(!npu.write_ack());
    }
}
