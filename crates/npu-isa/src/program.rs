// SPDX-License-Identifier: AGPL-3.0-only

//! Microcode program images.
//!
//! A program on the wire is a raw concatenation of 16-byte instruction
//! records, no header. For SRAM initialization tooling the same image
//! can be emitted as a textual hex dump: one 2-digit hex byte per line,
//! with zero bytes padding the lines before the instruction region.

use crate::instr::{Instruction, Opcode, INSTR_BYTES};
use bytes::Bytes;
use std::io::{self, Write};

/// An ordered instruction sequence, immutable once execution starts.
///
/// The program itself carries no base address: placement is decided by
/// whoever loads it into the sequencer's store and programs
/// `UCODE_BASE`/`UCODE_LEN`.
#[derive(Debug, Clone, Default)]
pub struct MicrocodeProgram {
    instrs: Vec<Instruction>,
}

impl MicrocodeProgram {
    /// Empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one instruction.
    pub fn push(&mut self, instr: Instruction) -> &mut Self {
        self.instrs.push(instr);
        self
    }

    /// Append the terminating `End` instruction.
    pub fn end(&mut self) -> &mut Self {
        self.push(Instruction::of(Opcode::End))
    }

    /// Instruction count (`UCODE_LEN` value).
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    /// True if the program holds no instructions.
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// The instruction sequence.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instrs
    }

    /// True if the last instruction is `End`.
    ///
    /// Execution of a program without a terminator never reaches
    /// `done`; callers are expected to check before loading.
    pub fn is_terminated(&self) -> bool {
        matches!(self.instrs.last().map(Instruction::op), Some(Opcode::End))
    }

    /// Pack into the raw binary image (`Bytes` enables zero-copy
    /// sharing with loaders).
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(self.instrs.len() * INSTR_BYTES);
        let mut rec = [0u8; INSTR_BYTES];
        for instr in &self.instrs {
            instr.encode(&mut rec);
            out.extend_from_slice(&rec);
        }
        Bytes::from(out)
    }

    /// Decode a raw binary image. Trailing bytes short of a full
    /// record are dropped; unknown opcodes decode verbatim.
    pub fn from_bytes(data: &[u8]) -> Self {
        let instrs = data
            .chunks_exact(INSTR_BYTES)
            .map(|chunk| {
                let mut rec = [0u8; INSTR_BYTES];
                rec.copy_from_slice(chunk);
                Instruction::decode(&rec)
            })
            .collect();
        Self { instrs }
    }

    /// Emit a memory-initialization hex image.
    ///
    /// Writes `base_offset` lines of `00`, then the program bytes, one
    /// 2-digit lowercase hex byte per line.
    ///
    /// # Errors
    ///
    /// Propagates any write failure from the underlying writer.
    pub fn write_hex<W: Write>(&self, mut w: W, base_offset: usize) -> io::Result<()> {
        for _ in 0..base_offset {
            writeln!(w, "00")?;
        }
        for byte in self.to_bytes().iter() {
            writeln!(w, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromIterator<Instruction> for MicrocodeProgram {
    fn from_iter<I: IntoIterator<Item = Instruction>>(iter: I) -> Self {
        Self {
            instrs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop_end() -> MicrocodeProgram {
        let mut p = MicrocodeProgram::new();
        p.push(Instruction::of(Opcode::Nop)).end();
        p
    }

    #[test]
    fn binary_round_trip() {
        let p = nop_end();
        let bytes = p.to_bytes();
        assert_eq!(bytes.len(), 2 * INSTR_BYTES);

        let back = MicrocodeProgram::from_bytes(&bytes);
        assert_eq!(back.instructions(), p.instructions());
        assert!(back.is_terminated());
    }

    #[test]
    fn hex_image_pads_to_base() {
        let p = nop_end();
        let mut out = Vec::new();
        p.write_hex(&mut out, 4).unwrap();

        let lines: Vec<&str> = std::str::from_utf8(&out).unwrap().lines().collect();
        assert_eq!(lines.len(), 4 + 2 * INSTR_BYTES);
        assert!(lines[..4].iter().all(|l| *l == "00"));
        // First instruction byte is the NOP opcode, last record starts
        // with the END opcode.
        assert_eq!(lines[4], "00");
        assert_eq!(lines[4 + INSTR_BYTES], "ff");
    }

    #[test]
    fn unterminated_program_detected() {
        let mut p = MicrocodeProgram::new();
        p.push(Instruction::of(Opcode::Gemm));
        assert!(!p.is_terminated());
        p.end();
        assert!(p.is_terminated());
    }
}
