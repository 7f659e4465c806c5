// The barrier shared by the member threads of a single work-group.
//
// A plain std::sync::Barrier would deadlock when a kernel's barrier calls
// diverge (some members reach a barrier that others never reach). We
// track enough state to notice that case instead:
// - every member reports each barrier it reaches along with its own running
//   count of barriers. Members released together must agree on that count.
// - members that return from the kernel are counted as finished. If the
//   remaining members are all waiting at a barrier, nobody can release them.
//
// When either case is detected (or a member faults for any other reason),
// the barrier is aborted: every waiting member is woken up and told to
// unwind.

use crate::device::KernelFault;
use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Default)]
struct BarrierState {
    arrived: usize,
    finished: usize,
    generation: u64,
    // barrier count reported by the first member that arrived during the
    // current generation
    expected_count: usize,
    aborted: bool,
}

pub(crate) struct GroupBarrier {
    n_members: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl GroupBarrier {
    pub(crate) fn new(n_members: usize) -> Self {
        GroupBarrier {
            n_members,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn abort_locked(&self, state: &mut BarrierState) {
        state.aborted = true;
        self.released.notify_all();
    }

    /// Called by a member that reached its `count`-th barrier (counting
    /// from 1). Blocks until the rest of the group arrives.
    pub(crate) fn wait(&self, count: usize) -> Result<(), KernelFault> {
        let mut state = self.lock();
        if state.aborted {
            return Err(KernelFault::GroupAborted);
        }

        if state.arrived == 0 {
            state.expected_count = count;
        } else if state.expected_count != count {
            let detail = format!(
                "a member reached its barrier #{count} while others wait at barrier #{}",
                state.expected_count
            );
            self.abort_locked(&mut state);
            return Err(KernelFault::DivergentBarrier(detail));
        }
        state.arrived += 1;

        if state.arrived + state.finished == self.n_members {
            if state.finished > 0 {
                let detail = format!(
                    "{} member(s) returned without reaching barrier #{count}",
                    state.finished
                );
                self.abort_locked(&mut state);
                return Err(KernelFault::DivergentBarrier(detail));
            }
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.released.notify_all();
            return Ok(());
        }

        let generation = state.generation;
        while state.generation == generation && !state.aborted {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if state.generation == generation {
            Err(KernelFault::GroupAborted)
        } else {
            Ok(())
        }
    }

    /// Called by a member that returned from the kernel
    pub(crate) fn finish(&self) -> Result<(), KernelFault> {
        let mut state = self.lock();
        state.finished += 1;
        if !state.aborted && state.arrived > 0 && state.arrived + state.finished == self.n_members {
            let detail = format!(
                "{} member(s) wait at barrier #{} that the rest of the group never reached",
                state.arrived, state.expected_count
            );
            self.abort_locked(&mut state);
            return Err(KernelFault::DivergentBarrier(detail));
        }
        Ok(())
    }

    /// Release every waiting member. Used when a member faults.
    pub(crate) fn abort(&self) {
        let mut state = self.lock();
        self.abort_locked(&mut state);
    }
}
