// SPDX-License-Identifier: AGPL-3.0-only

//! Global-clock plumbing.
//!
//! Every component is a discrete-time automaton: an explicit state
//! record advanced by one transition per clock edge. "Concurrency" in
//! this core is spatial (pipeline stages, the systolic grid), never
//! scheduler-level, so a single-threaded lockstep model is exact.

use crate::error::{NpuError, Result};
use crate::npu::Npu;

/// Observed harness convention for the external cycle budget.
pub const DEFAULT_CYCLE_BUDGET: u64 = 1000;

/// A clocked component that can be returned to its power-on state.
///
/// Reset is the only way back to idle from an arbitrary mid-run state;
/// no engine exposes a mid-session abort.
pub trait Clocked {
    /// Reinitialize all registers and state machines.
    fn reset(&mut self);
}

/// Drive the device until `done` or until the budget is exhausted.
///
/// The core has no internal watchdog: a program that stalls (missing
/// `End`, engine wedged) simply never asserts `done`, and bounding the
/// poll loop is the caller's responsibility. Returns the number of
/// cycles consumed.
///
/// # Errors
///
/// Returns [`NpuError::Timeout`] when the budget elapses first.
pub fn run_until_done(npu: &mut Npu, budget: u64) -> Result<u64> {
    for cycle in 0..budget {
        if npu.done() {
            tracing::debug!(cycle, "device done");
            return Ok(cycle);
        }
        npu.tick();
    }
    if npu.done() {
        return Ok(budget);
    }
    Err(NpuError::timeout(budget))
}
