// SPDX-License-Identifier: AGPL-3.0-only

//! Microcode sequencer and control-register block.
//!
//! The bus side is a synchronous request/response write port: a
//! register write presented at one edge is applied and acknowledged on
//! the next. On a latched `CTRL.start` the sequencer fetches up to
//! `UCODE_LEN` instructions from `UCODE_BASE`, one fetch cycle per
//! instruction, and executes each to retirement before fetching the
//! next — engine dispatch is serialized by construction, one session
//! at a time.
//!
//! Engine-class instructions are executed by driving the target engine
//! through its full port-level session cycle-by-cycle (weight rows,
//! start pulses, valid-gated element feeds, drain capture), so the
//! sequencer's cycle counts are the sum of real engine latencies.
//!
//! `done` latches on retiring `End` and holds until the next `start`.
//! A program that runs off its region without `End` stalls forever;
//! liveness is the caller's cycle budget, never the core's.

use crate::clock::Clocked;
use crate::engines::gelu::{GeluEngine, GeluInputs};
use crate::engines::layernorm::{LayerNormEngine, LayerNormInputs};
use crate::engines::softmax::{SoftmaxEngine, SoftmaxInputs};
use crate::engines::vec::{VecEngine, VecInputs};
use crate::systolic::{SystolicArray, SystolicInputs, DIM};
use npu_isa::instr::flags;
use npu_isa::regs;
use npu_isa::{Instruction, Opcode, INSTR_BYTES};

/// One register-write request presented to the bus port.
#[derive(Debug, Clone, Copy)]
pub struct RegWrite {
    /// Byte offset into the register map.
    pub addr: u32,
    /// Word to write.
    pub data: u32,
}

/// Bytes a DMA instruction moves per cycle.
const DMA_BYTES_PER_CYCLE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Fetch,
    Exec,
    Stall,
}

#[derive(Debug, Clone, Copy)]
enum GemmPhase {
    LoadWeights(usize),
    Clear,
    Start,
    Stream(usize),
}

#[derive(Debug, Clone, Copy)]
enum SessionPhase {
    Params(usize),
    Load(usize),
    Start,
    Feed(usize),
    Drain,
}

#[derive(Debug, Clone, Copy)]
enum Exec {
    Nop,
    Dma {
        load: bool,
        src: usize,
        dst: usize,
        len: usize,
        pos: usize,
    },
    Gemm {
        instr: Instruction,
        phase: GemmPhase,
        captured: usize,
    },
    Gelu {
        instr: Instruction,
        phase: SessionPhase,
        out_pos: usize,
    },
    LayerNorm {
        instr: Instruction,
        phase: SessionPhase,
    },
    Softmax {
        instr: Instruction,
        phase: SessionPhase,
        out_pos: usize,
    },
    Vec {
        instr: Instruction,
        op_bits: u8,
        num: usize,
        phase: SessionPhase,
        out_pos: usize,
    },
}

/// The sequencer state: control registers, fetch FSM, and the engine
/// instances it dispatches to.
#[derive(Debug)]
pub struct Sequencer {
    ucode_base: u32,
    ucode_len: u32,
    start_req: bool,
    done: bool,
    state: State,
    fetch_idx: usize,
    exec: Exec,
    systolic: SystolicArray,
    gelu: GeluEngine,
    layernorm: LayerNormEngine,
    softmax: SoftmaxEngine,
    vec: VecEngine,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequencer {
    /// Power-on state.
    pub fn new() -> Self {
        Self {
            ucode_base: 0,
            ucode_len: 0,
            start_req: false,
            done: false,
            state: State::Idle,
            fetch_idx: 0,
            exec: Exec::Nop,
            systolic: SystolicArray::new(),
            gelu: GeluEngine::new(),
            layernorm: LayerNormEngine::new(),
            softmax: SoftmaxEngine::new(),
            vec: VecEngine::new(),
        }
    }

    /// Sequencer-owned completion flag. Valid only after a start has
    /// been observed; holds until the next start.
    pub const fn done(&self) -> bool {
        self.done
    }

    /// True while a program is being fetched or executed.
    pub const fn busy(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Advance one clock edge. Returns the write acknowledgment for a
    /// request presented at the previous edge.
    pub fn tick(
        &mut self,
        write: Option<RegWrite>,
        sram: &mut [u8],
        ext_mem: &mut [u8],
    ) -> bool {
        let ack = if let Some(w) = write {
            self.apply_write(&w);
            true
        } else {
            false
        };

        match self.state {
            State::Idle => {
                if self.start_req {
                    self.start_req = false;
                    self.done = false;
                    self.fetch_idx = 0;
                    self.state = State::Fetch;
                    tracing::info!(
                        base = self.ucode_base,
                        len = self.ucode_len,
                        "microcode execution start"
                    );
                }
            }
            State::Fetch => self.fetch(sram),
            State::Exec => self.exec_tick(sram, ext_mem),
            State::Stall => {}
        }
        ack
    }

    fn apply_write(&mut self, w: &RegWrite) {
        match w.addr {
            regs::CTRL => {
                if w.data & regs::ctrl::START != 0 {
                    self.start_req = true;
                }
            }
            regs::UCODE_BASE => self.ucode_base = w.data,
            regs::UCODE_LEN => self.ucode_len = w.data,
            other => {
                // Unmapped writes land nowhere; the bus still acks.
                tracing::debug!(addr = other, "write to unmapped register ignored");
            }
        }
    }

    fn fetch(&mut self, sram: &[u8]) {
        if self.fetch_idx >= self.ucode_len as usize {
            tracing::warn!(
                fetched = self.fetch_idx,
                "microcode region exhausted without END; stalling"
            );
            self.state = State::Stall;
            return;
        }

        let addr = self.ucode_base as usize + self.fetch_idx * INSTR_BYTES;
        let mut rec = [0u8; INSTR_BYTES];
        for (i, slot) in rec.iter_mut().enumerate() {
            *slot = sram.get(addr + i).copied().unwrap_or(0);
        }
        let instr = Instruction::decode(&rec);
        tracing::debug!(idx = self.fetch_idx, op = ?instr.op(), "fetched instruction");
        self.begin(instr);
    }

    fn begin(&mut self, instr: Instruction) {
        let op = instr.op();
        self.exec = match op {
            Opcode::End => {
                self.done = true;
                self.state = State::Idle;
                tracing::info!(retired = self.fetch_idx + 1, "program complete");
                return;
            }
            Opcode::Nop | Opcode::Barrier => Exec::Nop,
            Opcode::Unknown(byte) => {
                tracing::warn!(byte, "unknown opcode treated as NOP");
                Exec::Nop
            }
            Opcode::DmaLoad => Exec::Dma {
                load: true,
                src: instr.src0 as usize,
                dst: instr.dst as usize,
                len: instr.imm as usize,
                pos: 0,
            },
            Opcode::DmaStore => Exec::Dma {
                load: false,
                src: instr.src0 as usize,
                dst: instr.dst as usize,
                len: instr.imm as usize,
                pos: 0,
            },
            Opcode::Gemm => Exec::Gemm {
                instr,
                phase: GemmPhase::LoadWeights(0),
                captured: 0,
            },
            Opcode::Gelu => Exec::Gelu {
                instr,
                phase: SessionPhase::Start,
                out_pos: 0,
            },
            Opcode::LayerNorm => Exec::LayerNorm {
                instr,
                phase: SessionPhase::Params(0),
            },
            Opcode::Softmax => Exec::Softmax {
                instr,
                phase: SessionPhase::Load(0),
                out_pos: 0,
            },
            Opcode::Vec => Exec::Vec {
                instr,
                op_bits: (instr.imm & 0b111) as u8,
                num: instr.n as usize,
                phase: SessionPhase::Start,
                out_pos: 0,
            },
            Opcode::VecAdd | Opcode::VecMul | Opcode::VecCopy => Exec::Vec {
                instr,
                op_bits: match op {
                    Opcode::VecMul => 0b010,
                    Opcode::VecCopy => 0b011,
                    _ => 0b001,
                },
                num: instr.imm as usize,
                phase: SessionPhase::Start,
                out_pos: 0,
            },
        };
        self.state = State::Exec;
    }

    fn retire(&mut self) {
        self.fetch_idx += 1;
        self.state = State::Fetch;
    }

    fn exec_tick(&mut self, sram: &mut [u8], ext_mem: &mut [u8]) {
        match self.exec {
            Exec::Nop => self.retire(),
            Exec::Dma {
                load,
                src,
                dst,
                len,
                pos,
            } => {
                let chunk = DMA_BYTES_PER_CYCLE.min(len - pos);
                for i in 0..chunk {
                    let byte = if load {
                        ext_mem.get(src + pos + i).copied().unwrap_or(0)
                    } else {
                        sram.get(src + pos + i).copied().unwrap_or(0)
                    };
                    let target = if load { &mut *sram } else { &mut *ext_mem };
                    if let Some(slot) = target.get_mut(dst + pos + i) {
                        *slot = byte;
                    }
                }
                let pos = pos + chunk;
                if pos >= len {
                    self.retire();
                } else if let Exec::Dma { pos: p, .. } = &mut self.exec {
                    *p = pos;
                }
            }
            Exec::Gemm {
                instr,
                phase,
                captured,
            } => self.gemm_tick(instr, phase, captured, sram),
            Exec::Gelu {
                instr,
                phase,
                out_pos,
            } => self.gelu_tick(instr, phase, out_pos, sram),
            Exec::LayerNorm { instr, phase } => self.layernorm_tick(instr, phase, sram),
            Exec::Softmax {
                instr,
                phase,
                out_pos,
            } => self.softmax_tick(instr, phase, out_pos, sram),
            Exec::Vec {
                instr,
                op_bits,
                num,
                phase,
                out_pos,
            } => self.vec_tick(instr, op_bits, num, phase, out_pos, sram),
        }
    }

    fn gemm_tick(
        &mut self,
        instr: Instruction,
        phase: GemmPhase,
        captured: usize,
        sram: &mut [u8],
    ) {
        let (m, n, k) = (
            (instr.m as usize).min(DIM),
            (instr.n as usize).min(DIM),
            (instr.k as usize).min(DIM),
        );
        match phase {
            GemmPhase::LoadWeights(row) => {
                let mut weight_in = [0i8; DIM];
                if row < k {
                    for (c, slot) in weight_in.iter_mut().enumerate().take(n) {
                        *slot = read_i8(sram, instr.src1 as usize + row * n + c);
                    }
                }
                self.systolic.tick(&SystolicInputs {
                    load_weights: true,
                    weight_row: row,
                    weight_in,
                    ..Default::default()
                });
                let next = if row + 1 == DIM {
                    GemmPhase::Clear
                } else {
                    GemmPhase::LoadWeights(row + 1)
                };
                self.set_gemm_phase(next);
            }
            GemmPhase::Clear => {
                self.systolic.tick(&SystolicInputs {
                    clear_acc: true,
                    ..Default::default()
                });
                self.set_gemm_phase(GemmPhase::Start);
            }
            GemmPhase::Start => {
                self.systolic.tick(&SystolicInputs {
                    start_compute: true,
                    ..Default::default()
                });
                self.set_gemm_phase(GemmPhase::Stream(0));
            }
            GemmPhase::Stream(t) => {
                let mut activation_in = [0i8; DIM];
                for (r, slot) in activation_in.iter_mut().enumerate().take(m) {
                    if t >= r && t - r < k {
                        *slot = read_i8(sram, instr.src0 as usize + r * k + (t - r));
                    }
                }
                self.systolic.tick(&SystolicInputs {
                    activation_valid: true,
                    activation_in,
                    ..Default::default()
                });

                let mut captured = captured;
                if self.systolic.result_valid() {
                    if captured < m {
                        let row = *self.systolic.result_out();
                        for (c, &v) in row.iter().enumerate().take(n) {
                            write_i32(sram, instr.dst as usize + (captured * n + c) * 4, v);
                        }
                    }
                    captured += 1;
                }

                if self.systolic.busy() {
                    if let Exec::Gemm {
                        phase, captured: c, ..
                    } = &mut self.exec
                    {
                        *phase = GemmPhase::Stream(t + 1);
                        *c = captured;
                    }
                } else {
                    self.retire();
                }
            }
        }
    }

    fn set_gemm_phase(&mut self, next: GemmPhase) {
        if let Exec::Gemm { phase, .. } = &mut self.exec {
            *phase = next;
        }
    }

    fn gelu_tick(
        &mut self,
        instr: Instruction,
        phase: SessionPhase,
        out_pos: usize,
        sram: &mut [u8],
    ) {
        let num = instr.imm as usize;
        let mut out_pos = out_pos;
        let next = match phase {
            SessionPhase::Start => {
                self.gelu.tick(&GeluInputs {
                    start: true,
                    num_elements: instr.imm,
                    ..Default::default()
                });
                if num == 0 {
                    SessionPhase::Drain
                } else {
                    SessionPhase::Feed(0)
                }
            }
            SessionPhase::Feed(i) => {
                self.gelu.tick(&GeluInputs {
                    data_valid: true,
                    data_in: read_i8(sram, instr.src0 as usize + i),
                    ..Default::default()
                });
                if i + 1 == num {
                    SessionPhase::Drain
                } else {
                    SessionPhase::Feed(i + 1)
                }
            }
            SessionPhase::Drain => {
                self.gelu.tick(&GeluInputs::default());
                SessionPhase::Drain
            }
            // Params/Load do not occur for GELU.
            other => other,
        };
        if self.gelu.out_valid() {
            write_i8(sram, instr.dst as usize + out_pos, self.gelu.data_out());
            out_pos += 1;
        }
        if self.gelu.done() {
            self.retire();
        } else if let Exec::Gelu {
            phase, out_pos: p, ..
        } = &mut self.exec
        {
            *phase = next;
            *p = out_pos;
        }
    }

    fn layernorm_tick(&mut self, instr: Instruction, phase: SessionPhase, sram: &mut [u8]) {
        let dim = instr.m as usize;
        let next = match phase {
            SessionPhase::Params(i) => {
                if i < dim {
                    self.layernorm.tick(&LayerNormInputs {
                        param_valid: true,
                        gamma_in: read_i8(sram, instr.src1 as usize + 2 * i),
                        beta_in: read_i8(sram, instr.src1 as usize + 2 * i + 1),
                        ..Default::default()
                    });
                }
                if i + 1 >= dim {
                    SessionPhase::Start
                } else {
                    SessionPhase::Params(i + 1)
                }
            }
            SessionPhase::Start => {
                self.layernorm.tick(&LayerNormInputs {
                    start: true,
                    hidden_dim: instr.m,
                    ..Default::default()
                });
                if dim == 0 {
                    SessionPhase::Drain
                } else {
                    SessionPhase::Feed(0)
                }
            }
            SessionPhase::Feed(i) => {
                self.layernorm.tick(&LayerNormInputs {
                    data_valid: true,
                    data_in: read_i8(sram, instr.src0 as usize + i),
                    ..Default::default()
                });
                if i + 1 == dim {
                    SessionPhase::Drain
                } else {
                    SessionPhase::Feed(i + 1)
                }
            }
            SessionPhase::Drain | SessionPhase::Load(_) => {
                self.layernorm.tick(&LayerNormInputs::default());
                SessionPhase::Drain
            }
        };
        if self.layernorm.out_valid() {
            // Exactly-one drain: the single surviving sample.
            write_i8(sram, instr.dst as usize, self.layernorm.data_out());
        }
        if self.layernorm.done() {
            self.retire();
        } else if let Exec::LayerNorm { phase, .. } = &mut self.exec {
            *phase = next;
        }
    }

    fn softmax_tick(
        &mut self,
        instr: Instruction,
        phase: SessionPhase,
        out_pos: usize,
        sram: &mut [u8],
    ) {
        let seq = (instr.m as usize).min(crate::engines::softmax::MAX_SEQ);
        let total = seq * seq;
        let mut out_pos = out_pos;
        let next = match phase {
            SessionPhase::Load(i) => {
                if i < total {
                    self.softmax.tick(&SoftmaxInputs {
                        data_valid: true,
                        row_in: (i / seq) as u16,
                        col_in: (i % seq) as u16,
                        data_in: read_i8(sram, instr.src0 as usize + i),
                        ..Default::default()
                    });
                }
                if i + 1 >= total {
                    SessionPhase::Start
                } else {
                    SessionPhase::Load(i + 1)
                }
            }
            SessionPhase::Start => {
                self.softmax.tick(&SoftmaxInputs {
                    start: true,
                    seq_len: instr.m,
                    causal_mask: instr.flags & flags::CAUSAL_MASK != 0,
                    ..Default::default()
                });
                SessionPhase::Drain
            }
            SessionPhase::Drain | SessionPhase::Params(_) | SessionPhase::Feed(_) => {
                self.softmax.tick(&SoftmaxInputs::default());
                SessionPhase::Drain
            }
        };
        if self.softmax.out_valid() {
            write_i8(sram, instr.dst as usize + out_pos, self.softmax.data_out());
            out_pos += 1;
        }
        if !self.softmax.busy() && matches!(next, SessionPhase::Drain) {
            self.retire();
        } else if let Exec::Softmax {
            phase, out_pos: p, ..
        } = &mut self.exec
        {
            *phase = next;
            *p = out_pos;
        }
    }

    fn vec_tick(
        &mut self,
        instr: Instruction,
        op_bits: u8,
        num: usize,
        phase: SessionPhase,
        out_pos: usize,
        sram: &mut [u8],
    ) {
        let mut out_pos = out_pos;
        let next = match phase {
            SessionPhase::Start => {
                self.vec.tick(&VecInputs {
                    start: true,
                    operation: op_bits,
                    num_elements: num as u16,
                    ..Default::default()
                });
                if num == 0 {
                    SessionPhase::Drain
                } else {
                    SessionPhase::Feed(0)
                }
            }
            SessionPhase::Feed(i) => {
                self.vec.tick(&VecInputs {
                    data_a_valid: true,
                    data_b_valid: true,
                    data_a_in: read_i8(sram, instr.src0 as usize + i),
                    data_b_in: read_i8(sram, instr.src1 as usize + i),
                    ..Default::default()
                });
                if i + 1 == num {
                    SessionPhase::Drain
                } else {
                    SessionPhase::Feed(i + 1)
                }
            }
            SessionPhase::Drain | SessionPhase::Params(_) | SessionPhase::Load(_) => {
                self.vec.tick(&VecInputs::default());
                SessionPhase::Drain
            }
        };
        if self.vec.out_valid() {
            write_i8(sram, instr.dst as usize + out_pos, self.vec.data_out());
            out_pos += 1;
        }
        if self.vec.done() {
            self.retire();
        } else if let Exec::Vec {
            phase, out_pos: p, ..
        } = &mut self.exec
        {
            *phase = next;
            *p = out_pos;
        }
    }
}

impl Clocked for Sequencer {
    fn reset(&mut self) {
        *self = Self::new();
    }
}

fn read_i8(mem: &[u8], addr: usize) -> i8 {
    mem.get(addr).map_or(0, |&b| b as i8)
}

fn write_i8(mem: &mut [u8], addr: usize, v: i8) {
    if let Some(slot) = mem.get_mut(addr) {
        *slot = v as u8;
    }
}

fn write_i32(mem: &mut [u8], addr: usize, v: i32) {
    for (i, byte) in v.to_le_bytes().into_iter().enumerate() {
        if let Some(slot) = mem.get_mut(addr + i) {
            *slot = byte;
        }
    }
}
