//! LTS analysis toolkit.
//!
//! Pure functions over projected machines, used by tests and by the safety
//! layer. All traversals are deterministic: transitions are visited in
//! their stored order.

use crate::cfsm::model::{Cfsm, LocalAction, StateId};
use std::collections::{HashMap, HashSet, VecDeque};

/// Observable action kinds, for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Send transitions.
    Send,
    /// Receive transitions.
    Receive,
    /// Internal transitions.
    Tau,
}

/// Count transitions of one kind.
pub fn count_actions(machine: &Cfsm, kind: ActionKind) -> usize {
    machine
        .transitions
        .iter()
        .filter(|t| match (&t.action, kind) {
            (LocalAction::Send { .. }, ActionKind::Send) => true,
            (LocalAction::Receive { .. }, ActionKind::Receive) => true,
            (LocalAction::Tau { .. }, ActionKind::Tau) => true,
            _ => false,
        })
        .count()
}

/// States with more than one observable outgoing transition.
pub fn find_branching_states(machine: &Cfsm) -> Vec<StateId> {
    machine
        .states
        .iter()
        .copied()
        .filter(|state| {
            machine
                .outgoing(*state)
                .iter()
                .filter(|t| t.action.is_observable())
                .count()
                > 1
        })
        .collect()
}

/// Whether a terminal state is reachable from the initial state.
pub fn can_reach_terminal(machine: &Cfsm) -> bool {
    can_reach_terminal_from(machine, machine.initial_state)
}

/// Whether a terminal state is reachable from `start`.
pub fn can_reach_terminal_from(machine: &Cfsm, start: StateId) -> bool {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start);
    seen.insert(start);
    while let Some(state) = queue.pop_front() {
        if machine.is_terminal_state(state) {
            return true;
        }
        for transition in machine.outgoing(state) {
            if seen.insert(transition.to) {
                queue.push_back(transition.to);
            }
        }
    }
    false
}

/// Find cycles: one representative cycle per non-trivial strongly connected
/// component, as a state path that starts and ends at the same state.
pub fn detect_cycles(machine: &Cfsm) -> Vec<Vec<StateId>> {
    let sccs = tarjan_sccs(machine);
    let mut cycles = Vec::new();

    for scc in sccs {
        let members: HashSet<StateId> = scc.iter().copied().collect();
        let non_trivial = scc.len() > 1
            || machine
                .outgoing(scc[0])
                .iter()
                .any(|t| t.to == scc[0]);
        if !non_trivial {
            continue;
        }
        if let Some(cycle) = cycle_within(machine, scc[0], &members) {
            cycles.push(cycle);
        }
    }
    cycles
}

/// Walk transitions inside one component until the start state recurs.
fn cycle_within(machine: &Cfsm, start: StateId, members: &HashSet<StateId>) -> Option<Vec<StateId>> {
    let mut path = vec![start];
    let mut visited = HashSet::new();
    visited.insert(start);
    let mut current = start;
    loop {
        let next = machine
            .outgoing(current)
            .into_iter()
            .map(|t| t.to)
            .find(|to| members.contains(to))?;
        path.push(next);
        if next == start {
            return Some(path);
        }
        if !visited.insert(next) {
            // Walked into an inner loop that avoids `start`; cut the lasso
            // down to the loop itself.
            let pos = path.iter().position(|s| *s == next).expect("seen before");
            return Some(path[pos..].to_vec());
        }
        current = next;
    }
}

/// Iterative Tarjan over the machine's states, in state order.
fn tarjan_sccs(machine: &Cfsm) -> Vec<Vec<StateId>> {
    #[derive(Default)]
    struct Data {
        index: HashMap<StateId, usize>,
        lowlink: HashMap<StateId, usize>,
        on_stack: HashSet<StateId>,
        stack: Vec<StateId>,
        next_index: usize,
        sccs: Vec<Vec<StateId>>,
    }

    fn strongconnect(machine: &Cfsm, v: StateId, data: &mut Data) {
        data.index.insert(v, data.next_index);
        data.lowlink.insert(v, data.next_index);
        data.next_index += 1;
        data.stack.push(v);
        data.on_stack.insert(v);

        for transition in machine.outgoing(v) {
            let w = transition.to;
            if !data.index.contains_key(&w) {
                strongconnect(machine, w, data);
                let low_w = data.lowlink[&w];
                let low_v = data.lowlink[&v];
                data.lowlink.insert(v, low_v.min(low_w));
            } else if data.on_stack.contains(&w) {
                let idx_w = data.index[&w];
                let low_v = data.lowlink[&v];
                data.lowlink.insert(v, low_v.min(idx_w));
            }
        }

        if data.lowlink[&v] == data.index[&v] {
            let mut scc = Vec::new();
            while let Some(w) = data.stack.pop() {
                data.on_stack.remove(&w);
                scc.push(w);
                if w == v {
                    break;
                }
            }
            scc.reverse();
            data.sccs.push(scc);
        }
    }

    let mut data = Data::default();
    for state in &machine.states {
        if !data.index.contains_key(state) {
            strongconnect(machine, *state, &mut data);
        }
    }
    data.sccs
}

/// Why a trace was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceMismatch {
    /// Index of the offending action in the input trace.
    pub step: usize,
    /// The action that could not be consumed.
    pub action: LocalAction,
    /// The state the machine was in.
    pub state: StateId,
    /// Human-readable reason.
    pub reason: String,
}

/// Check that the machine can perform `actions` in order from its initial
/// state, silently crossing internal transitions in between.
pub fn verify_trace(machine: &Cfsm, actions: &[LocalAction]) -> Result<(), TraceMismatch> {
    let mut state = machine.initial_state;

    for (step, action) in actions.iter().enumerate() {
        let mut visited = HashSet::new();
        loop {
            if let Some(transition) = machine
                .outgoing(state)
                .into_iter()
                .find(|t| &t.action == action)
            {
                state = transition.to;
                break;
            }
            // No direct match: follow the first internal transition, if any.
            let tau = machine
                .outgoing(state)
                .into_iter()
                .find(|t| t.action.is_tau() && !visited.contains(&t.to));
            match tau {
                Some(t) => {
                    visited.insert(state);
                    state = t.to;
                }
                None => {
                    return Err(TraceMismatch {
                        step,
                        action: action.clone(),
                        state,
                        reason: format!(
                            "no transition matching {:?} from state {:?}",
                            action, state
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}
