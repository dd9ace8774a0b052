// SPDX-License-Identifier: AGPL-3.0-only

//! Instruction set and control contract for the Tiny NPU.
//!
//! This crate is the hardware contract: everything here is fixed by the
//! RTL and shared between the simulator, the microcode tooling, and any
//! host driver. No behavior lives here — only encodings, offsets, and
//! the microcode image format.
//!
//! # Layout
//!
//! | Module | Content |
//! |--------|---------|
//! | [`instr`] | 128-bit instruction record and opcode set |
//! | [`program`] | microcode program images (binary + hex dump) |
//! | [`regs`] | memory-mapped control-register offsets |

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod instr;
pub mod program;
pub mod regs;

pub use instr::{Instruction, Opcode, INSTR_BYTES};
pub use program::MicrocodeProgram;
