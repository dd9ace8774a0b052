// SPDX-License-Identifier: AGPL-3.0-only

//! Row-wise softmax engine.
//!
//! The score matrix is loaded by `(row, col, data)` addressed writes
//! before `start`. Processing computes a numerically-stable
//! fixed-point softmax per row — row-max subtraction, Q15 exponent
//! lookup, probabilities quantized to `[0, 127]` — one row per cycle.
//! With the causal mask set, positions with column index greater than
//! the row index are excluded from that row's normalization and emit
//! zero.
//!
//! Results are exposed only during the terminal phase: `out_valid` and
//! `done` are asserted together while the matrix streams out row-major,
//! one element per cycle, rather than incrementally during compute.

use super::DrainPolicy;
use crate::clock::Clocked;
use crate::golden;

/// Largest supported sequence length (matches the GEMM grid).
pub const MAX_SEQ: usize = 16;

/// Input lines sampled at one clock edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftmaxInputs {
    /// Begin a session (sampled while idle).
    pub start: bool,
    /// Row/column count, latched at `start`.
    pub seq_len: u16,
    /// Exclude `col > row` positions from normalization.
    pub causal_mask: bool,
    /// `row_in`/`col_in`/`data_in` carry a matrix write this cycle.
    pub data_valid: bool,
    /// Target row of the write.
    pub row_in: u16,
    /// Target column of the write.
    pub col_in: u16,
    /// Score value.
    pub data_in: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Compute,
    Drain,
}

/// The softmax engine state.
#[derive(Debug, Clone)]
pub struct SoftmaxEngine {
    exp_q15: [u16; 256],
    state: State,
    seq_len: usize,
    causal: bool,
    scores: [[i8; MAX_SEQ]; MAX_SEQ],
    probs: [[i8; MAX_SEQ]; MAX_SEQ],
    row: usize,
    drain_pos: usize,
    out_valid: bool,
    data_out: i8,
    done: bool,
}

impl Default for SoftmaxEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftmaxEngine {
    /// Drain contract of this engine: the whole matrix streams out,
    /// one element per done-phase cycle.
    pub const DRAIN_POLICY: DrainPolicy = DrainPolicy::PerElement;

    /// Power-on state; builds the Q15 exponent table.
    pub fn new() -> Self {
        Self {
            exp_q15: golden::exp_q15_table(),
            state: State::Idle,
            seq_len: 0,
            causal: false,
            scores: [[0; MAX_SEQ]; MAX_SEQ],
            probs: [[0; MAX_SEQ]; MAX_SEQ],
            row: 0,
            drain_pos: 0,
            out_valid: false,
            data_out: 0,
            done: false,
        }
    }

    /// One probability value is present this cycle.
    pub const fn out_valid(&self) -> bool {
        self.out_valid
    }

    /// The value announced by `out_valid`.
    pub const fn data_out(&self) -> i8 {
        self.data_out
    }

    /// High throughout the terminal drain phase.
    pub const fn done(&self) -> bool {
        self.done
    }

    /// True while a session is active.
    pub const fn busy(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Advance one clock edge.
    pub fn tick(&mut self, inp: &SoftmaxInputs) {
        match self.state {
            State::Idle => {
                self.out_valid = false;
                self.done = false;
                if inp.data_valid {
                    let (r, c) = (inp.row_in as usize, inp.col_in as usize);
                    if r < MAX_SEQ && c < MAX_SEQ {
                        self.scores[r][c] = inp.data_in;
                    }
                }
                if inp.start {
                    self.seq_len = (inp.seq_len as usize).min(MAX_SEQ);
                    self.causal = inp.causal_mask;
                    self.row = 0;
                    self.state = State::Compute;
                    tracing::debug!(
                        seq_len = self.seq_len,
                        causal = self.causal,
                        "softmax session start"
                    );
                }
            }
            State::Compute => {
                if self.row < self.seq_len {
                    let limit = self.causal.then_some(self.row);
                    let probs = golden::softmax_row_with_table(
                        &self.scores[self.row][..self.seq_len],
                        limit,
                        &self.exp_q15,
                    );
                    self.probs[self.row][..self.seq_len].copy_from_slice(&probs);
                    self.row += 1;
                }
                if self.row == self.seq_len {
                    self.drain_pos = 0;
                    self.state = State::Drain;
                }
            }
            State::Drain => {
                let total = self.seq_len * self.seq_len;
                if self.drain_pos < total {
                    let (r, c) = (self.drain_pos / self.seq_len, self.drain_pos % self.seq_len);
                    self.out_valid = true;
                    self.done = true;
                    self.data_out = self.probs[r][c];
                    self.drain_pos += 1;
                } else if total == 0 && !self.done {
                    // An empty session still signals completion.
                    self.done = true;
                } else {
                    self.out_valid = false;
                    self.done = false;
                    self.state = State::Idle;
                }
            }
        }
    }
}

impl Clocked for SoftmaxEngine {
    fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(matrix: &[&[i8]], causal: bool) -> Vec<i8> {
        let seq = matrix.len();
        let mut eng = SoftmaxEngine::new();
        for (r, row) in matrix.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                eng.tick(&SoftmaxInputs {
                    data_valid: true,
                    row_in: r as u16,
                    col_in: c as u16,
                    data_in: v,
                    ..Default::default()
                });
            }
        }
        eng.tick(&SoftmaxInputs {
            start: true,
            seq_len: seq as u16,
            causal_mask: causal,
            ..Default::default()
        });

        let mut outs = Vec::new();
        let mut saw_done = false;
        for _ in 0..64 {
            eng.tick(&SoftmaxInputs::default());
            if eng.out_valid() {
                assert!(eng.done(), "out_valid only coincides with done");
                outs.push(eng.data_out());
            }
            if eng.done() {
                saw_done = true;
            }
        }
        assert!(saw_done, "softmax never reached done");
        outs
    }

    #[test]
    fn two_by_two_completes_within_window() {
        let outs = run(&[&[1, 2], &[3, 4]], false);
        assert_eq!(outs.len(), 4);
        let row0 = golden::softmax_row(&[1, 2], None);
        let row1 = golden::softmax_row(&[3, 4], None);
        assert_eq!(outs, [row0, row1].concat());
    }

    #[test]
    fn causal_mask_zeroes_upper_triangle() {
        let outs = run(&[&[5, 9], &[3, 4]], true);
        // Row 0 sees only column 0: certainty there, zero above the
        // diagonal.
        assert_eq!(outs[0], 127);
        assert_eq!(outs[1], 0);
        let row1 = golden::softmax_row(&[3, 4], Some(1));
        assert_eq!(&outs[2..], &row1[..]);
    }

    #[test]
    fn results_only_in_done_phase() {
        let mut eng = SoftmaxEngine::new();
        eng.tick(&SoftmaxInputs {
            data_valid: true,
            row_in: 0,
            col_in: 0,
            data_in: 1,
            ..Default::default()
        });
        eng.tick(&SoftmaxInputs {
            start: true,
            seq_len: 1,
            ..Default::default()
        });
        // Compute phase never raises out_valid.
        eng.tick(&SoftmaxInputs::default());
        assert!(!eng.out_valid());
        eng.tick(&SoftmaxInputs::default());
        assert!(eng.out_valid() && eng.done());
    }
}
