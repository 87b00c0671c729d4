//! End-to-end scenario validation.
//!
//! Each scenario drives the full pipeline: AST → CFG → verification →
//! projection → safety → simulation, and checks the behavior a protocol
//! author would observe.

use mpstk::cfsm::analysis::{self, ActionKind};
use mpstk::semantics::create_initial_context;
use mpstk::sim::{CfgSimulator, SimEvent, SimulatorOptions, StepOutcome};
use mpstk::verify::ViolationCode;
use mpstk::*;
use std::sync::Arc;

fn roles(names: &[&str]) -> Vec<RoleName> {
    names.iter().map(|n| RoleName::new(*n)).collect()
}

fn initial_context(cfg: &Cfg) -> TypingContext {
    let set = project_all(cfg);
    assert!(set.errors.is_empty(), "projection errors: {:?}", set.errors);
    create_initial_context(
        set.cfsms
            .into_iter()
            .map(|(role, machine)| (role, Arc::new(machine)))
            .collect(),
        "scenario",
    )
}

/// Request–response: structurally valid, dual projections, safe, and the
/// simulator emits exactly the two messages.
#[test]
fn request_response_round_trip() {
    let decl = GlobalProtocolDecl::new(
        "P",
        roles(&["C", "S"]),
        vec![
            GlobalInteraction::message("C", "S", "Request"),
            GlobalInteraction::message("S", "C", "Response"),
        ],
    );
    let cfg = build_cfg(&decl).unwrap();

    let report = verify_protocol(&cfg);
    assert!(report.structural.valid);
    assert!(report.determinism.valid);
    assert!(report.progress.valid);
    assert!(report.is_valid());

    let client = project(&cfg, &RoleName::new("C")).unwrap();
    assert_eq!(analysis::count_actions(&client, ActionKind::Send), 1);
    assert_eq!(analysis::count_actions(&client, ActionKind::Receive), 1);

    let server = project(&cfg, &RoleName::new("S")).unwrap();
    assert_eq!(analysis::count_actions(&server, ActionKind::Receive), 1);
    assert_eq!(analysis::count_actions(&server, ActionKind::Send), 1);

    let result = BasicSafety::new().check(&initial_context(&cfg));
    assert!(result.safe, "violations: {:?}", result.violations);

    let mut sim = CfgSimulator::new(&cfg, SimulatorOptions::default());
    sim.run().unwrap();
    assert!(sim.is_complete());
    let events: Vec<_> = sim.trace().to_vec();
    assert_eq!(events.len(), 2);
    match &events[0] {
        SimEvent::Message { from, to, label, .. } => {
            assert_eq!(from.as_str(), "C");
            assert_eq!(to[0].as_str(), "S");
            assert_eq!(label.as_str(), "Request");
        }
        other => panic!("expected message, got {:?}", other),
    }
    match &events[1] {
        SimEvent::Message { from, label, .. } => {
            assert_eq!(from.as_str(), "S");
            assert_eq!(label.as_str(), "Response");
        }
        other => panic!("expected message, got {:?}", other),
    }
}

/// OAuth: the authorizer offers an external branch; the ensemble is safe
/// even though the machines are not plain duals.
#[test]
fn oauth_external_branch_is_safe() {
    let decl = GlobalProtocolDecl::new(
        "OAuth",
        roles(&["s", "c", "a"]),
        vec![GlobalInteraction::choice(
            "s",
            vec![
                (
                    "ok",
                    vec![
                        GlobalInteraction::message("s", "c", "login"),
                        GlobalInteraction::message_with_payload("c", "a", "passwd", "Str"),
                        GlobalInteraction::message_with_payload("a", "s", "auth", "Bool"),
                    ],
                ),
                (
                    "no",
                    vec![
                        GlobalInteraction::message("s", "c", "cancel"),
                        GlobalInteraction::message("c", "a", "quit"),
                    ],
                ),
            ],
        )],
    );
    let cfg = build_cfg(&decl).unwrap();
    assert!(verify_protocol(&cfg).is_valid());

    let authorizer = project(&cfg, &RoleName::new("a")).unwrap();
    let first = authorizer.outgoing(authorizer.initial_state);
    let receives: Vec<_> = first
        .iter()
        .filter(|t| matches!(t.action, LocalAction::Receive { .. }))
        .collect();
    assert_eq!(receives.len(), 2, "two enabled receives from c at the start");

    let result = BasicSafety::new().check(&initial_context(&cfg));
    assert!(result.safe, "violations: {:?}", result.violations);
    assert!(
        result.diagnostics.states_explored >= 4,
        "explored only {} contexts",
        result.diagnostics.states_explored
    );
}

/// Recursive ping–pong: back-edges in every projection, safety terminates,
/// the simulator hits its step bound mid-loop.
#[test]
fn recursive_ping_pong() {
    let decl = GlobalProtocolDecl::new(
        "Ping",
        roles(&["A", "B"]),
        vec![GlobalInteraction::rec(
            "Loop",
            vec![
                GlobalInteraction::message("A", "B", "ping"),
                GlobalInteraction::message("B", "A", "pong"),
                GlobalInteraction::continue_to("Loop"),
            ],
        )],
    );
    let cfg = build_cfg(&decl).unwrap();
    assert!(verify_protocol(&cfg).is_valid());

    for role in ["A", "B"] {
        let machine = project(&cfg, &RoleName::new(role)).unwrap();
        assert!(
            !analysis::detect_cycles(&machine).is_empty(),
            "{} has a loop",
            role
        );
    }

    let result = BasicSafety::new().check(&initial_context(&cfg));
    assert!(result.safe);

    let mut sim = CfgSimulator::new(
        &cfg,
        SimulatorOptions {
            max_steps: 10,
            ..SimulatorOptions::default()
        },
    );
    sim.run().unwrap();
    assert!(sim.reached_max_steps());
    assert!(!sim.is_complete());
    assert!(sim.trace().len() >= 4, "several iterations ran");
}

/// Conditional loop: data iterations then end; one reachable terminal state
/// per role.
#[test]
fn conditional_loop_terminates_on_end() {
    let decl = GlobalProtocolDecl::new(
        "ConditionalLoop",
        roles(&["P", "C"]),
        vec![GlobalInteraction::rec(
            "Stream",
            vec![GlobalInteraction::choice(
                "P",
                vec![
                    (
                        "Data",
                        vec![
                            GlobalInteraction::message("P", "C", "Data"),
                            GlobalInteraction::continue_to("Stream"),
                        ],
                    ),
                    ("End", vec![GlobalInteraction::message("P", "C", "End")]),
                ],
            )],
        )],
    );
    let cfg = build_cfg(&decl).unwrap();

    let set = project_all(&cfg);
    assert!(set.errors.is_empty());
    for (role, machine) in &set.cfsms {
        assert_eq!(
            machine.terminal_states.len(),
            1,
            "{} has one terminal state",
            role
        );
        assert!(analysis::can_reach_terminal(machine));
    }

    let mut sim = CfgSimulator::new(&cfg, SimulatorOptions::default());
    for _ in 0..2 {
        loop {
            if sim.state().at_choice {
                break;
            }
            sim.step().unwrap();
        }
        sim.choose(0).unwrap();
    }
    loop {
        if sim.state().at_choice {
            break;
        }
        sim.step().unwrap();
    }
    sim.choose(1).unwrap();
    while !sim.is_complete() {
        match sim.step().unwrap() {
            StepOutcome::Completed => break,
            StepOutcome::MaxSteps => panic!("bound hit unexpectedly"),
            _ => {}
        }
    }
    assert!(sim.is_complete());
    let labels: Vec<_> = sim
        .trace()
        .iter()
        .filter_map(|e| match e {
            SimEvent::Message { label, .. } => Some(label.as_str().to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(labels, vec!["Data", "Data", "End"]);
}

/// Unused role: connectedness flags it; its projection is the canonical
/// initial → terminal machine.
#[test]
fn unused_role_is_flagged_and_projects_to_tau() {
    let decl = GlobalProtocolDecl::new(
        "P",
        roles(&["A", "B", "C"]),
        vec![
            GlobalInteraction::message("A", "B", "Request"),
            GlobalInteraction::message("B", "A", "Response"),
        ],
    );
    let cfg = build_cfg(&decl).unwrap();

    let report = verify_protocol(&cfg);
    assert!(!report.connectedness.valid);
    let unused: Vec<_> = report
        .connectedness
        .violations
        .iter()
        .filter(|v| v.code == ViolationCode::UnusedRole)
        .collect();
    assert_eq!(unused.len(), 1);
    assert_eq!(unused[0].details["role"], "C");

    let machine = project(&cfg, &RoleName::new("C")).unwrap();
    assert_eq!(machine.states.len(), 2);
    assert_eq!(machine.transitions.len(), 1);
    assert!(machine.transitions[0].action.is_tau());
    assert!(machine.is_terminal_state(machine.transitions[0].to));
}
