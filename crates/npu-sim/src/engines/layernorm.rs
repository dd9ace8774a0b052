// SPDX-License-Identifier: AGPL-3.0-only

//! Layer normalization engine.
//!
//! A session normalizes one `hidden_dim`-wide window: mean and
//! variance over the full window, Q8 intermediates with an integer
//! square root, then the per-position Q7 affine `gamma·x̂ + beta`.
//! Parameters are loaded while idle, one `(gamma, beta)` pair per
//! `param_valid` cycle in position order.
//!
//! The output stage retires after its first element: exactly one
//! output sample (position 0) is emitted per session
//! ([`DrainPolicy::ExactlyOne`]), the authoritative current contract.

use super::DrainPolicy;
use crate::clock::Clocked;
use crate::golden;

/// Largest supported window.
pub const MAX_DIM: usize = 256;

/// Cycles the normalize stage spends after the window is loaded
/// (mean, variance, inverse-deviation, affine).
const COMPUTE_LATENCY: u8 = 4;

/// Input lines sampled at one clock edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayerNormInputs {
    /// Begin a session (sampled while idle).
    pub start: bool,
    /// Window width, latched at `start`.
    pub hidden_dim: u16,
    /// `gamma_in`/`beta_in` carry a parameter pair this cycle
    /// (consumed in position order, only while idle).
    pub param_valid: bool,
    /// Per-position scale, Q7 (127 ≈ 1.0).
    pub gamma_in: i8,
    /// Per-position offset, Q7.
    pub beta_in: i8,
    /// `data_in` carries a sample this cycle.
    pub data_valid: bool,
    /// Input sample.
    pub data_in: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Loading,
    Normalize,
    Emit,
    Done,
}

/// The layer normalization engine state.
#[derive(Debug, Clone)]
pub struct LayerNormEngine {
    state: State,
    hidden_dim: u16,
    gamma: [i8; MAX_DIM],
    beta: [i8; MAX_DIM],
    param_pos: usize,
    window: [i8; MAX_DIM],
    data_pos: usize,
    compute_left: u8,
    result0: i8,
    out_valid: bool,
    data_out: i8,
    done: bool,
}

impl Default for LayerNormEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerNormEngine {
    /// Drain contract of this engine.
    pub const DRAIN_POLICY: DrainPolicy = DrainPolicy::ExactlyOne;

    /// Power-on state.
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            hidden_dim: 0,
            gamma: [0; MAX_DIM],
            beta: [0; MAX_DIM],
            param_pos: 0,
            window: [0; MAX_DIM],
            data_pos: 0,
            compute_left: 0,
            result0: 0,
            out_valid: false,
            data_out: 0,
            done: false,
        }
    }

    /// One output sample is present this cycle.
    pub const fn out_valid(&self) -> bool {
        self.out_valid
    }

    /// The sample announced by `out_valid`.
    pub const fn data_out(&self) -> i8 {
        self.data_out
    }

    /// Session completed this cycle.
    pub const fn done(&self) -> bool {
        self.done
    }

    /// True while a session is active.
    pub const fn busy(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Advance one clock edge.
    pub fn tick(&mut self, inp: &LayerNormInputs) {
        match self.state {
            State::Idle => {
                self.out_valid = false;
                self.done = false;
                if inp.param_valid && self.param_pos < MAX_DIM {
                    self.gamma[self.param_pos] = inp.gamma_in;
                    self.beta[self.param_pos] = inp.beta_in;
                    self.param_pos += 1;
                }
                if inp.start {
                    self.hidden_dim = (inp.hidden_dim as usize).min(MAX_DIM) as u16;
                    self.data_pos = 0;
                    self.state = State::Loading;
                    tracing::debug!(dim = self.hidden_dim, "layernorm session start");
                }
            }
            State::Loading => {
                if inp.data_valid && self.data_pos < self.hidden_dim as usize {
                    self.window[self.data_pos] = inp.data_in;
                    self.data_pos += 1;
                }
                if self.data_pos == self.hidden_dim as usize {
                    self.compute_left = COMPUTE_LATENCY;
                    self.state = State::Normalize;
                }
            }
            State::Normalize => {
                self.compute_left -= 1;
                if self.compute_left == 0 {
                    let dim = self.hidden_dim as usize;
                    let y = golden::layernorm(
                        &self.window[..dim],
                        &self.gamma[..dim],
                        &self.beta[..dim],
                    );
                    self.result0 = y.first().copied().unwrap_or(0);
                    self.state = State::Emit;
                }
            }
            State::Emit => {
                self.out_valid = true;
                self.data_out = self.result0;
                self.state = State::Done;
            }
            State::Done => {
                self.out_valid = false;
                self.done = true;
                // Parameter cursor rewinds: the next session reloads
                // from position 0.
                self.param_pos = 0;
                self.state = State::Idle;
            }
        }
    }
}

impl Clocked for LayerNormEngine {
    fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_session(inputs: &[i8], gamma: i8, beta: i8) -> (Vec<i8>, bool) {
        let mut eng = LayerNormEngine::new();
        for _ in 0..inputs.len() {
            eng.tick(&LayerNormInputs {
                param_valid: true,
                gamma_in: gamma,
                beta_in: beta,
                ..Default::default()
            });
        }
        eng.tick(&LayerNormInputs {
            start: true,
            hidden_dim: inputs.len() as u16,
            ..Default::default()
        });
        for &x in inputs {
            eng.tick(&LayerNormInputs {
                data_valid: true,
                data_in: x,
                ..Default::default()
            });
        }

        let mut outs = Vec::new();
        let mut saw_done = false;
        for _ in 0..64 {
            eng.tick(&LayerNormInputs::default());
            if eng.out_valid() {
                outs.push(eng.data_out());
            }
            if eng.done() {
                saw_done = true;
            }
        }
        (outs, saw_done)
    }

    #[test]
    fn emits_exactly_one_sample() {
        let (outs, saw_done) = run_session(&[-2, -1, 1, 2], 127, 0);
        assert!(saw_done, "layernorm never reached done");
        assert_eq!(outs.len(), 1, "exactly one output sample per session");
        // Position 0 of the normalized window, unit gamma.
        let expected = golden::layernorm(&[-2, -1, 1, 2], &[127; 4], &[0; 4])[0];
        assert_eq!(outs[0], expected);
    }

    #[test]
    fn beta_offsets_the_single_output() {
        let (outs, _) = run_session(&[4, 4, 4, 4], 127, 5);
        // Constant window normalizes to zero; beta passes through.
        assert_eq!(outs, vec![5]);
    }

    #[test]
    fn sessions_are_repeatable() {
        let mut eng = LayerNormEngine::new();
        for round in 0..2 {
            for _ in 0..4 {
                eng.tick(&LayerNormInputs {
                    param_valid: true,
                    gamma_in: 127,
                    beta_in: 0,
                    ..Default::default()
                });
            }
            eng.tick(&LayerNormInputs {
                start: true,
                hidden_dim: 4,
                ..Default::default()
            });
            for x in [-2i8, -1, 1, 2] {
                eng.tick(&LayerNormInputs {
                    data_valid: true,
                    data_in: x,
                    ..Default::default()
                });
            }
            let mut outs = 0;
            for _ in 0..32 {
                eng.tick(&LayerNormInputs::default());
                if eng.out_valid() {
                    outs += 1;
                }
            }
            assert_eq!(outs, 1, "round {round}");
            assert!(!eng.busy());
        }
    }
}
