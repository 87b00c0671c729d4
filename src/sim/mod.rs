//! Step-wise simulator over the global CFG.
//!
//! The simulator executes the graph directly: one node per step, message
//! events emitted at message actions, choices gated on the caller, parallel
//! scopes scheduled per branch cursor. Every run is reproducible: the
//! deterministic mode follows declaration order, the round-robin mode is a
//! pure function of its seed.

use crate::cfg::{Cfg, CfgAction, CfgEdgeKind, CfgIndex, CfgNodeKind, EdgeId, NodeId};
use crate::error::ProtocolError;
use crate::types::{Label, RoleName};
use serde::{Deserialize, Serialize};

/// How fork branches are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkScheduling {
    /// Run branches to completion in declaration order.
    Deterministic,
    /// Rotate between branch cursors; the seed picks the rotation offset.
    RoundRobin {
        /// Reproducibility seed.
        seed: u64,
    },
}

/// How `run` resolves choice points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceStrategy {
    /// Surface `choice-required`; the caller drives `choose`.
    Interactive,
    /// Always take the first branch.
    First,
    /// Pick branches pseudo-randomly from a seed; reproducible.
    Seeded(u64),
}

/// Simulator options.
#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    /// Step bound.
    pub max_steps: usize,
    /// Capture emitted events.
    pub record_trace: bool,
    /// Fork branch scheduling.
    pub fork_scheduling: ForkScheduling,
    /// Choice resolution for `run`.
    pub choice_strategy: ChoiceStrategy,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            max_steps: 1_000,
            record_trace: true,
            fork_scheduling: ForkScheduling::Deterministic,
            choice_strategy: ChoiceStrategy::Interactive,
        }
    }
}

/// An observable simulation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum SimEvent {
    /// A message transfer.
    Message {
        /// Sender.
        from: RoleName,
        /// Receivers.
        to: Vec<RoleName>,
        /// Message label.
        label: Label,
        /// Payload type, when one is declared.
        payload: Option<String>,
    },
    /// A sub-protocol invocation.
    SubProtocol {
        /// Callee name.
        protocol: String,
    },
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// An observable event was emitted.
    Event(SimEvent),
    /// An internal node was crossed.
    Silent,
    /// The step landed on a choice point; call `choose` next.
    AtChoice,
    /// The simulation reached a terminal.
    Completed,
    /// The step bound was hit.
    MaxSteps,
}

/// One pending choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOption {
    /// Index to pass to `choose`.
    pub index: usize,
    /// Branch label.
    pub label: Option<Label>,
}

/// Snapshot of the simulator state.
#[derive(Debug, Clone)]
pub struct SimulatorState {
    /// The node the cursor sits on.
    pub current_node: NodeId,
    /// Whether a choice is pending.
    pub at_choice: bool,
    /// Pending choices, when at a choice point.
    pub available_choices: Vec<ChoiceOption>,
    /// Entered recursion labels, outermost first.
    pub recursion_stack: Vec<String>,
    /// Steps taken so far.
    pub step_count: usize,
    /// Whether the step bound was hit.
    pub reached_max_steps: bool,
}

/// One parallel scope being executed.
#[derive(Debug, Clone)]
struct ForkFrame {
    join: NodeId,
    /// Branch cursors; `None` once a branch reached the join.
    cursors: Vec<Option<NodeId>>,
    /// Which cursor is active.
    active: usize,
}

/// Step-wise executor of one protocol graph.
pub struct CfgSimulator<'a> {
    cfg: &'a Cfg,
    index: CfgIndex,
    options: SimulatorOptions,

    current: NodeId,
    frames: Vec<ForkFrame>,
    recursion_stack: Vec<String>,
    step_count: usize,
    visited: Vec<NodeId>,
    reached_max_steps: bool,
    complete: bool,
    trace: Vec<SimEvent>,
    rng_state: u64,
}

impl<'a> CfgSimulator<'a> {
    /// A simulator positioned at the graph's initial node.
    pub fn new(cfg: &'a Cfg, options: SimulatorOptions) -> Self {
        let index = CfgIndex::build(cfg);
        let rng_state = match (options.fork_scheduling, options.choice_strategy) {
            (_, ChoiceStrategy::Seeded(seed)) => seed,
            (ForkScheduling::RoundRobin { seed }, _) => seed,
            _ => 0,
        };
        Self {
            current: cfg.initial,
            index,
            options,
            cfg,
            frames: Vec::new(),
            recursion_stack: Vec::new(),
            step_count: 0,
            visited: vec![cfg.initial],
            reached_max_steps: false,
            complete: false,
            trace: Vec::new(),
            rng_state,
        }
    }

    /// Restore the initial state; the trace is cleared.
    pub fn reset(&mut self) {
        self.current = self.cfg.initial;
        self.frames.clear();
        self.recursion_stack.clear();
        self.step_count = 0;
        self.visited = vec![self.cfg.initial];
        self.reached_max_steps = false;
        self.complete = false;
        self.trace.clear();
    }

    /// Whether the simulation reached a terminal with no pending branches.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether the step bound was hit.
    pub fn reached_max_steps(&self) -> bool {
        self.reached_max_steps
    }

    /// The captured event trace.
    pub fn trace(&self) -> &[SimEvent] {
        &self.trace
    }

    /// Nodes visited so far, in order.
    pub fn visited(&self) -> &[NodeId] {
        &self.visited
    }

    /// Current state snapshot.
    pub fn state(&self) -> SimulatorState {
        let at_choice = self.at_choice();
        SimulatorState {
            current_node: self.current,
            at_choice,
            available_choices: if at_choice {
                self.available_choices()
            } else {
                Vec::new()
            },
            recursion_stack: self.recursion_stack.clone(),
            step_count: self.step_count,
            reached_max_steps: self.reached_max_steps,
        }
    }

    fn at_choice(&self) -> bool {
        matches!(
            self.cfg.node(self.current).map(|n| &n.kind),
            Some(CfgNodeKind::Branch { .. })
        )
    }

    fn available_choices(&self) -> Vec<ChoiceOption> {
        self.cfg
            .edges_from(self.current)
            .into_iter()
            .enumerate()
            .map(|(index, edge)| ChoiceOption {
                index,
                label: edge.label.clone(),
            })
            .collect()
    }

    /// Execute one step.
    pub fn step(&mut self) -> Result<StepOutcome, ProtocolError> {
        if self.complete {
            return Err(ProtocolError::AlreadyComplete);
        }
        if self.step_count >= self.options.max_steps {
            self.reached_max_steps = true;
            return Ok(StepOutcome::MaxSteps);
        }
        if self.at_choice() {
            return Err(ProtocolError::ChoiceRequired);
        }

        let node = self
            .cfg
            .node(self.current)
            .expect("cursor sits on an existing node");

        let (event, next) = match &node.kind {
            CfgNodeKind::Initial | CfgNodeKind::Merge | CfgNodeKind::Join { .. } => {
                (None, self.first_successor(node.id))
            }
            CfgNodeKind::Terminal => {
                self.complete = true;
                self.step_count += 1;
                return Ok(StepOutcome::Completed);
            }
            CfgNodeKind::Action { action } => {
                let event = match action {
                    CfgAction::Message { from, to, message } => Some(SimEvent::Message {
                        from: from.clone(),
                        to: to.clone(),
                        label: message.label.clone(),
                        payload: message.payload.clone(),
                    }),
                    CfgAction::SubProtocol { protocol, .. } => Some(SimEvent::SubProtocol {
                        protocol: protocol.clone(),
                    }),
                    CfgAction::Dynamic { .. } => None,
                };
                (event, self.first_successor(node.id))
            }
            CfgNodeKind::Fork { .. } => {
                let join = self.matching_join(node.id);
                let cursors: Vec<Option<NodeId>> = self
                    .cfg
                    .edges_from(node.id)
                    .into_iter()
                    .map(|e| Some(e.to))
                    .collect();
                let active = match self.options.fork_scheduling {
                    ForkScheduling::Deterministic => 0,
                    ForkScheduling::RoundRobin { .. } => {
                        (self.next_random() as usize) % cursors.len().max(1)
                    }
                };
                let first = cursors[active].expect("fresh cursor");
                self.frames.push(ForkFrame {
                    join,
                    cursors,
                    active,
                });
                (None, Some(first))
            }
            CfgNodeKind::Recursive { label } => {
                if self.recursion_stack.last() != Some(label) {
                    self.recursion_stack.push(label.clone());
                }
                (None, self.recursion_body(node.id))
            }
            CfgNodeKind::Branch { .. } => unreachable!("guarded above"),
        };

        let Some(next) = next else {
            // A node with no successor outside a frame is a wedged graph;
            // built graphs always have one.
            self.complete = true;
            self.step_count += 1;
            return Ok(StepOutcome::Completed);
        };

        self.advance_to(next);
        self.step_count += 1;

        if let Some(event) = &event {
            if self.options.record_trace {
                self.trace.push(event.clone());
            }
        }

        if self.at_choice() {
            return Ok(StepOutcome::AtChoice);
        }
        Ok(match event {
            Some(e) => StepOutcome::Event(e),
            None => StepOutcome::Silent,
        })
    }

    /// Resolve a pending choice by branch index.
    pub fn choose(&mut self, index: usize) -> Result<(), ProtocolError> {
        if self.complete {
            return Err(ProtocolError::AlreadyComplete);
        }
        if !self.at_choice() {
            return Err(ProtocolError::InvalidChoice {
                index,
                available: 0,
            });
        }
        let edges: Vec<EdgeId> = self
            .cfg
            .edges_from(self.current)
            .into_iter()
            .map(|e| e.id)
            .collect();
        let edge_id = edges.get(index).ok_or(ProtocolError::InvalidChoice {
            index,
            available: edges.len(),
        })?;
        let target = self.cfg.edge(*edge_id).expect("chosen edge exists").to;
        self.advance_to(target);
        Ok(())
    }

    /// Run until completion, a pending interactive choice, or the bound.
    pub fn run(&mut self) -> Result<(), ProtocolError> {
        while !self.complete && !self.reached_max_steps {
            if self.at_choice() {
                let n = self.available_choices().len();
                match self.options.choice_strategy {
                    ChoiceStrategy::Interactive => return Err(ProtocolError::ChoiceRequired),
                    ChoiceStrategy::First => self.choose(0)?,
                    ChoiceStrategy::Seeded(_) => {
                        let pick = (self.next_random() as usize) % n.max(1);
                        self.choose(pick)?;
                    }
                }
                continue;
            }
            match self.step()? {
                StepOutcome::Completed | StepOutcome::MaxSteps => break,
                _ => {}
            }
        }
        Ok(())
    }

    /// Move the cursor, retiring fork branches as they reach their join.
    fn advance_to(&mut self, next: NodeId) {
        let mut position = next;
        while let Some(frame) = self.frames.last_mut() {
            if position != frame.join {
                break;
            }
            // The active branch finished; schedule the next one.
            frame.cursors[frame.active] = None;
            let remaining: Vec<usize> = frame
                .cursors
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.map(|_| i))
                .collect();
            if let Some(first) = remaining.first() {
                let pick = match self.options.fork_scheduling {
                    ForkScheduling::Deterministic => *first,
                    ForkScheduling::RoundRobin { .. } => {
                        remaining[(self.next_random() as usize) % remaining.len()]
                    }
                };
                let frame = self.frames.last_mut().expect("frame still present");
                frame.active = pick;
                position = frame.cursors[pick].expect("cursor alive");
                break;
            } else {
                // All branches done: leave the scope and continue at the
                // join itself (its step crosses to the successor).
                self.frames.pop();
                break;
            }
        }
        self.current = position;
        self.visited.push(position);
        if self.frames.is_empty() {
            if let Some(node) = self.cfg.node(position) {
                if node.is_terminal() {
                    self.complete = true;
                }
            }
        }
    }

    fn first_successor(&self, node: NodeId) -> Option<NodeId> {
        self.index
            .edges_from(node)
            .first()
            .and_then(|id| self.cfg.edge(*id))
            .map(|e| e.to)
    }

    /// Body entry of a recursion anchor (first sequence edge); a degenerate
    /// anchor falls back on its exit continuation.
    fn recursion_body(&self, node: NodeId) -> Option<NodeId> {
        self.cfg
            .edges_from(node)
            .into_iter()
            .filter(|e| e.kind == CfgEdgeKind::Sequence)
            .map(|e| e.to)
            .next()
    }

    fn matching_join(&self, fork: NodeId) -> NodeId {
        let CfgNodeKind::Fork { parallel_id } = self
            .cfg
            .node(fork)
            .map(|n| n.kind.clone())
            .expect("fork exists")
        else {
            unreachable!("not a fork")
        };
        self.cfg
            .nodes
            .iter()
            .find(|n| matches!(n.kind, CfgNodeKind::Join { parallel_id: p } if p == parallel_id))
            .map(|n| n.id)
            .expect("fork has a matching join")
    }

    /// splitmix64 step; reproducible and dependency-free.
    fn next_random(&mut self) -> u64 {
        self.rng_state = self.rng_state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.rng_state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }
}
