// SPDX-License-Identifier: AGPL-3.0-only

//! 16×16 weight-stationary systolic GEMM engine.
//!
//! Computes `C = A·B` for int8 `A[M,K]`, `B[K,N]` with int32
//! accumulation, `M,N,K ≤ 16`. The grid is an arena of per-cell state
//! records advanced in lockstep by one global step per cycle:
//! activations flow left→right with one register per cell, partial
//! sums flow top→bottom.
//!
//! The caller feeds activations skewed: row `r` of `A` begins entering
//! at cycle `r`, one column value per cycle, zero outside the window.
//! A diagonal corner-turn between the feed ports and the grid edge
//! routes each port's value onto the grid row that needs it, and a
//! deskew triangle below the grid re-aligns the staggered column exits
//! into whole output rows. Accumulation order down a column is fixed
//! by this feed and must not be reordered.
//!
//! Row `i` of the result appears `32 + i` cycles after the
//! `start_compute` pulse (16 to fill, 16 to compute), one full row per
//! `result_valid` cycle, ascending.

use crate::clock::Clocked;

/// Grid dimension: the array is `DIM × DIM`.
pub const DIM: usize = 16;

/// Cycles from the `start_compute` pulse to the first `result_valid`.
pub const DRAIN_LATENCY: u64 = 32;

/// Input lines sampled at one clock edge.
#[derive(Debug, Clone, Copy)]
pub struct SystolicInputs {
    /// Accept one weight row per cycle while held.
    pub load_weights: bool,
    /// Row index for the weight row being loaded.
    pub weight_row: usize,
    /// Broadcast weight values, one per column.
    pub weight_in: [i8; DIM],
    /// Zero every cell accumulator. Idempotent.
    pub clear_acc: bool,
    /// Begin the compute phase at this edge.
    pub start_compute: bool,
    /// Activation feed is meaningful this cycle.
    pub activation_valid: bool,
    /// Skewed activation feed, one port per row of `A`.
    pub activation_in: [i8; DIM],
    /// External partial sums injected at the top of each column.
    pub partial_sum_in: [i32; DIM],
}

impl Default for SystolicInputs {
    fn default() -> Self {
        Self {
            load_weights: false,
            weight_row: 0,
            weight_in: [0; DIM],
            clear_acc: false,
            start_compute: false,
            activation_valid: false,
            activation_in: [0; DIM],
            partial_sum_in: [0; DIM],
        }
    }
}

/// One MAC-like cell: stationary weight, horizontally flowing
/// activation register, vertically flowing partial-sum register.
#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    weight: i8,
    act: i8,
    psum: i32,
}

/// The systolic array state.
#[derive(Debug, Clone)]
pub struct SystolicArray {
    cells: [[Cell; DIM]; DIM],
    computing: bool,
    /// Ticks since the start_compute pulse.
    tick_count: u64,
    /// Output rows assembled from the staggered column exits.
    rows: [[i32; DIM]; DIM],
    /// Next row index to present on `result_out`.
    next_row: usize,
    result_valid: bool,
    result_out: [i32; DIM],
}

impl Default for SystolicArray {
    fn default() -> Self {
        Self::new()
    }
}

impl SystolicArray {
    /// Power-on state.
    pub fn new() -> Self {
        Self {
            cells: [[Cell::default(); DIM]; DIM],
            computing: false,
            tick_count: 0,
            rows: [[0; DIM]; DIM],
            next_row: 0,
            result_valid: false,
            result_out: [0; DIM],
        }
    }

    /// One full row of accumulated values is present this cycle.
    pub const fn result_valid(&self) -> bool {
        self.result_valid
    }

    /// Accumulated values for the row announced by `result_valid`.
    pub const fn result_out(&self) -> &[i32; DIM] {
        &self.result_out
    }

    /// True while the compute/drain phases are still running.
    pub const fn busy(&self) -> bool {
        self.computing
    }

    /// Advance one clock edge.
    pub fn tick(&mut self, inp: &SystolicInputs) {
        if inp.load_weights && inp.weight_row < DIM {
            for col in 0..DIM {
                self.cells[inp.weight_row][col].weight = inp.weight_in[col];
            }
        }

        if inp.clear_acc {
            for row in &mut self.cells {
                for cell in row {
                    cell.psum = 0;
                }
            }
        }

        if inp.start_compute {
            // The start pulse cycle itself is not a feed cycle: the
            // first skewed activation arrives on the following edge.
            self.computing = true;
            self.tick_count = 0;
            self.next_row = 0;
            self.rows = [[0; DIM]; DIM];
            self.result_valid = false;
            tracing::debug!("systolic compute started");
            return;
        }

        if !self.computing {
            self.result_valid = false;
            return;
        }

        let t = self.tick_count as usize;
        let prev = self.cells;

        // Corner-turn: grid row k takes the value presented on feed
        // port (t - k) this cycle; ports outside their active window
        // carry zero by the feed contract.
        let mut edge = [0i8; DIM];
        if inp.activation_valid {
            for (k, e) in edge.iter_mut().enumerate() {
                if t >= k && t - k < DIM {
                    *e = inp.activation_in[t - k];
                }
            }
        }

        for k in 0..DIM {
            for c in 0..DIM {
                let act_in = if c == 0 { edge[k] } else { prev[k][c - 1].act };
                let psum_in = if k == 0 {
                    inp.partial_sum_in[c]
                } else {
                    prev[k - 1][c].psum
                };
                let product = i32::from(i16::from(act_in) * i16::from(prev[k][c].weight));
                self.cells[k][c].act = act_in;
                self.cells[k][c].psum = product.wrapping_add(psum_in);
            }
        }

        // Column c exits the grid with row i's value at tick
        // i + c + (DIM - 1); the deskew triangle holds it until the
        // whole row is aligned.
        for c in 0..DIM {
            if t >= c + DIM - 1 {
                let i = t - c - (DIM - 1);
                if i < DIM {
                    self.rows[i][c] = self.cells[DIM - 1][c].psum;
                }
            }
        }

        self.tick_count += 1;

        // Aligned rows leave through the output register, one per
        // cycle in ascending order, first row DRAIN_LATENCY cycles
        // after the start pulse.
        if self.next_row < DIM && self.tick_count >= DRAIN_LATENCY + self.next_row as u64 {
            self.result_out = self.rows[self.next_row];
            self.result_valid = true;
            self.next_row += 1;
            if self.next_row == DIM {
                self.computing = false;
                tracing::debug!("systolic drain complete");
            }
        } else {
            self.result_valid = false;
        }
    }
}

impl Clocked for SystolicArray {
    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Value for feed port `r` at compute cycle `t` under the skewed
/// pattern: row `r` of `A` enters one element per cycle starting at
/// cycle `r`.
pub fn skewed_feed(a: &[[i8; DIM]; DIM], r: usize, t: usize) -> i8 {
    if t >= r && t - r < DIM {
        a[r][t - r]
    } else {
        0
    }
}
