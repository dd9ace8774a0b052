// SPDX-License-Identifier: AGPL-3.0-only

//! GELU activation engine.
//!
//! Streams `num_elements` int8 samples through a lookup-table GELU
//! with a two-stage output pipeline that runs concurrently with input
//! acceptance. The session completes as soon as the *input* count is
//! satisfied — the sample still in the first pipeline stage at that
//! point is dropped ([`DrainPolicy::Partial`]).

use super::DrainPolicy;
use crate::clock::Clocked;
use crate::golden;

/// Input lines sampled at one clock edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeluInputs {
    /// Begin a session (sampled while idle).
    pub start: bool,
    /// Session element count, latched at `start`.
    pub num_elements: u16,
    /// `data_in` carries a sample this cycle.
    pub data_valid: bool,
    /// Input sample.
    pub data_in: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Busy,
    Done,
}

/// The GELU engine state.
#[derive(Debug, Clone)]
pub struct GeluEngine {
    lut: [i8; 256],
    state: State,
    num_elements: u16,
    accepted: u16,
    stage1: i8,
    stage1_valid: bool,
    out_valid: bool,
    data_out: i8,
    done: bool,
}

impl Default for GeluEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GeluEngine {
    /// Drain contract of this engine.
    pub const DRAIN_POLICY: DrainPolicy = DrainPolicy::Partial;

    /// Power-on state; builds the activation lookup table.
    pub fn new() -> Self {
        let mut lut = [0i8; 256];
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = golden::gelu_i8(i as u8 as i8);
        }
        Self {
            lut,
            state: State::Idle,
            num_elements: 0,
            accepted: 0,
            stage1: 0,
            stage1_valid: false,
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
    pub fn tick(&mut self, inp: &GeluInputs) {
        match self.state {
            State::Idle => {
                self.out_valid = false;
                self.done = false;
                if inp.start {
                    self.num_elements = inp.num_elements;
                    self.accepted = 0;
                    self.stage1_valid = false;
                    self.state = State::Busy;
                    tracing::debug!(n = inp.num_elements, "gelu session start");
                }
            }
            State::Busy => {
                // Output register takes the first pipeline stage.
                self.out_valid = self.stage1_valid;
                self.data_out = self.stage1;

                let accept = inp.data_valid && self.accepted < self.num_elements;
                if accept {
                    self.stage1 = self.lut[inp.data_in as u8 as usize];
                    self.stage1_valid = true;
                    self.accepted += 1;
                } else {
                    self.stage1_valid = false;
                }

                if self.accepted == self.num_elements {
                    // Input count satisfied: retire the session, the
                    // sample in stage1 never reaches the output.
                    self.state = State::Done;
                }
            }
            State::Done => {
                self.out_valid = false;
                self.done = true;
                self.state = State::Idle;
            }
        }
    }
}

impl Clocked for GeluEngine {
    fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_drain_on_back_to_back_feed() {
        let mut eng = GeluEngine::new();
        eng.tick(&GeluInputs {
            start: true,
            num_elements: 4,
            ..Default::default()
        });

        let inputs = [-2i8, -1, 0, 2];
        let mut outs = Vec::new();
        for &x in &inputs {
            eng.tick(&GeluInputs {
                data_valid: true,
                data_in: x,
                ..Default::default()
            });
            if eng.out_valid() {
                outs.push(eng.data_out());
            }
        }
        let mut saw_done = false;
        for _ in 0..32 {
            eng.tick(&GeluInputs::default());
            if eng.done() {
                saw_done = true;
            }
            if eng.out_valid() {
                outs.push(eng.data_out());
            }
        }

        assert!(saw_done);
        // Partial drain: the final in-flight sample is dropped.
        assert_eq!(outs.len(), inputs.len() - 1);
        for (i, &y) in outs.iter().enumerate() {
            assert_eq!(y, golden::gelu_i8(inputs[i]));
        }
        assert!(!eng.busy());
    }

    #[test]
    fn output_interleaves_with_acceptance() {
        let mut eng = GeluEngine::new();
        eng.tick(&GeluInputs {
            start: true,
            num_elements: 8,
            ..Default::default()
        });
        let mut first_out_at = None;
        for i in 0..6 {
            eng.tick(&GeluInputs {
                data_valid: true,
                data_in: 3,
                ..Default::default()
            });
            if eng.out_valid() && first_out_at.is_none() {
                first_out_at = Some(i);
            }
        }
        // Output pulses begin while input is still being accepted.
        assert_eq!(first_out_at, Some(1));
        assert!(eng.busy());
    }

    #[test]
    fn data_valid_while_idle_is_ignored() {
        let mut eng = GeluEngine::new();
        eng.tick(&GeluInputs {
            data_valid: true,
            data_in: 7,
            ..Default::default()
        });
        assert!(!eng.busy());
        assert!(!eng.out_valid());
    }
}
