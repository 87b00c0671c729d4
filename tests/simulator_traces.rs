//! Simulator/semantics agreement.
//!
//! The event trace of a deterministic simulator run must be executable by
//! the reducer over the projected ensemble, step for step.

use mpstk::cfsm::analysis;
use mpstk::semantics::create_initial_context;
use mpstk::sim::{CfgSimulator, SimEvent, SimulatorOptions};
use mpstk::*;
use std::sync::Arc;

fn roles(names: &[&str]) -> Vec<RoleName> {
    names.iter().map(|n| RoleName::new(*n)).collect()
}

/// Drive the reducer along the simulator's message events; every event must
/// be an enabled communication at its point in the run.
fn replay_trace(cfg: &Cfg, trace: &[SimEvent]) {
    let set = project_all(cfg);
    assert!(set.errors.is_empty());
    let mut ctx = create_initial_context(
        set.cfsms
            .into_iter()
            .map(|(role, machine)| (role, Arc::new(machine)))
            .collect(),
        "replay",
    );
    let reducer = ContextReducer::new();

    for event in trace {
        let SimEvent::Message { from, to, label, .. } = event else {
            continue;
        };
        // A multicast event replays as its unicast chain, receiver by
        // receiver, mirroring the projector's lowering.
        for receiver in to {
            let enabled = reducer.find_enabled_communications(&ctx);
            let step = enabled
                .iter()
                .find(|c| {
                    &c.sender == from
                        && &c.receiver == receiver
                        && c.message.label == *label
                })
                .unwrap_or_else(|| {
                    panic!(
                        "event {} -> {}: {} is not enabled at context {}",
                        from,
                        receiver,
                        label,
                        ctx.key()
                    )
                });
            ctx = reducer.reduce_by(&ctx, step);
        }
    }
    assert!(ctx.is_terminal(), "replay ends terminal: {}", ctx.key());
}

#[test]
fn request_response_trace_replays_on_the_ensemble() {
    let cfg = build_cfg(&GlobalProtocolDecl::new(
        "P",
        roles(&["C", "S"]),
        vec![
            GlobalInteraction::message("C", "S", "Request"),
            GlobalInteraction::message("S", "C", "Response"),
        ],
    ))
    .unwrap();
    let mut sim = CfgSimulator::new(&cfg, SimulatorOptions::default());
    sim.run().unwrap();
    assert!(sim.is_complete());
    replay_trace(&cfg, sim.trace());
}

#[test]
fn multicast_trace_replays_as_unicast_chain() {
    let cfg = build_cfg(&GlobalProtocolDecl::new(
        "Broadcast",
        roles(&["S", "B1", "B2"]),
        vec![
            GlobalInteraction::multicast("S", roles(&["B1", "B2"]), "title"),
            GlobalInteraction::multicast("S", roles(&["B1", "B2"]), "price"),
        ],
    ))
    .unwrap();
    let mut sim = CfgSimulator::new(&cfg, SimulatorOptions::default());
    sim.run().unwrap();
    assert!(sim.is_complete());
    assert_eq!(sim.trace().len(), 2, "one event per multicast");
    replay_trace(&cfg, sim.trace());
}

#[test]
fn parallel_trace_replays_in_scheduled_order() {
    let cfg = build_cfg(&GlobalProtocolDecl::new(
        "Par",
        roles(&["A", "B", "C", "D"]),
        vec![GlobalInteraction::parallel(vec![
            vec![GlobalInteraction::message("A", "B", "left")],
            vec![GlobalInteraction::message("C", "D", "right")],
        ])],
    ))
    .unwrap();
    let mut sim = CfgSimulator::new(&cfg, SimulatorOptions::default());
    sim.run().unwrap();
    assert!(sim.is_complete());
    replay_trace(&cfg, sim.trace());
}

/// The projected sender can consume its own emitted actions: simulator
/// events, restricted to one role, form a valid trace of that role's
/// machine.
#[test]
fn role_restricted_trace_is_accepted_by_the_machine() {
    let cfg = build_cfg(&GlobalProtocolDecl::new(
        "P",
        roles(&["C", "S"]),
        vec![
            GlobalInteraction::message("C", "S", "Request"),
            GlobalInteraction::message("S", "C", "Response"),
        ],
    ))
    .unwrap();
    let mut sim = CfgSimulator::new(&cfg, SimulatorOptions::default());
    sim.run().unwrap();

    let client = project(&cfg, &RoleName::new("C")).unwrap();
    let local: Vec<LocalAction> = sim
        .trace()
        .iter()
        .filter_map(|event| match event {
            SimEvent::Message { from, to, label, .. } => {
                if from.as_str() == "C" {
                    Some(LocalAction::Send {
                        to: to[0].clone(),
                        message: MessageSig::new(label.as_str()),
                    })
                } else if to.iter().any(|r| r.as_str() == "C") {
                    Some(LocalAction::Receive {
                        from: from.clone(),
                        message: MessageSig::new(label.as_str()),
                    })
                } else {
                    None
                }
            }
            _ => None,
        })
        .collect();
    assert_eq!(local.len(), 2);
    analysis::verify_trace(&client, &local).unwrap();
}

/// Reset law: a reset simulator is indistinguishable from a fresh one.
#[test]
fn reset_restores_a_fresh_run() {
    let cfg = build_cfg(&GlobalProtocolDecl::new(
        "P",
        roles(&["C", "S"]),
        vec![
            GlobalInteraction::message("C", "S", "Request"),
            GlobalInteraction::message("S", "C", "Response"),
        ],
    ))
    .unwrap();
    let mut sim = CfgSimulator::new(&cfg, SimulatorOptions::default());
    sim.run().unwrap();
    let first_trace = sim.trace().to_vec();

    sim.reset();
    assert_eq!(sim.state().step_count, 0);
    assert!(sim.trace().is_empty());
    assert!(!sim.is_complete());

    sim.run().unwrap();
    assert_eq!(sim.trace(), first_trace.as_slice(), "replays identically");
}
