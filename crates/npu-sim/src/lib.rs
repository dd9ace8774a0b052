// SPDX-License-Identifier: AGPL-3.0-only

//! Cycle-accurate functional model of the Tiny NPU core.
//!
//! A microcoded sequencer drives a fixed-function compute core: a
//! 16×16 weight-stationary systolic array for matrix products, a
//! standalone MAC pipeline, and a family of elementwise/normalization
//! engines (GELU, LayerNorm, Softmax, vector ALU). Everything is
//! integer/fixed-point — int8 activations and weights, int32
//! accumulators, Q7 normalization parameters.
//!
//! The model is exact at the level an implementer must reproduce:
//! instruction semantics, pipeline latencies, valid-pulse timing, and
//! the control-register protocol. Every component is a discrete-time
//! automaton advanced by one `tick` per global clock edge; there are
//! no threads and nothing blocks.
//!
//! # Quick start
//!
//! ```
//! use npu_isa::{Instruction, MicrocodeProgram, Opcode};
//! use npu_sim::{run_until_done, Npu, DEFAULT_CYCLE_BUDGET};
//!
//! # fn main() -> Result<(), npu_sim::NpuError> {
//! let mut program = MicrocodeProgram::new();
//! program.push(Instruction::of(Opcode::Nop)).end();
//!
//! let mut npu = Npu::new();
//! npu.load_microcode(&program, 0x400)?;
//! npu.start_program(0x400, program.len() as u32);
//! let cycles = run_until_done(&mut npu, DEFAULT_CYCLE_BUDGET)?;
//! assert!(cycles < 10);
//! # Ok(())
//! # }
//! ```
//!
//! # Liveness
//!
//! The core has no internal watchdog. A program that never retires
//! `End` stalls forever; callers bound their poll loop with
//! [`run_until_done`] and treat [`NpuError::Timeout`] as the failure.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
// Fixed-point datapaths convert between i8/i16/i32/u8 lanes constantly;
// the widths are part of the modeled contract.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)] // table initializers seed from f32/f64

pub mod clock;
pub mod engines;
pub mod error;
pub mod golden;
pub mod mac;
pub mod npu;
pub mod sequencer;
pub mod systolic;

pub use clock::{run_until_done, Clocked, DEFAULT_CYCLE_BUDGET};
pub use engines::{DrainPolicy, GeluEngine, LayerNormEngine, SoftmaxEngine, VecEngine, VecOp};
pub use error::{NpuError, Result};
pub use mac::{MacInputs, MacUnit};
pub use npu::{Npu, EXT_MEM_BYTES, SRAM_BYTES};
pub use sequencer::{RegWrite, Sequencer};
pub use systolic::{SystolicArray, SystolicInputs, DIM, DRAIN_LATENCY};
