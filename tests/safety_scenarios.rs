//! Safety-checker scenarios over the product state space.

use mpstk::semantics::safety::SafetyViolationCode;
use mpstk::semantics::{create_initial_context, SafetyProperty};
use mpstk::*;
use std::sync::Arc;

fn roles(names: &[&str]) -> Vec<RoleName> {
    names.iter().map(|n| RoleName::new(*n)).collect()
}

fn initial_context(decl: &GlobalProtocolDecl) -> TypingContext {
    let cfg = build_cfg(decl).unwrap();
    let set = project_all(&cfg);
    assert!(set.errors.is_empty(), "projection errors: {:?}", set.errors);
    create_initial_context(
        set.cfsms
            .into_iter()
            .map(|(role, machine)| (role, Arc::new(machine)))
            .collect(),
        "safety",
    )
}

/// The classical three-buyer shape: the seller multicasts `title` then
/// `price` before any other action. Sequentializing the multicasts lets the
/// first buyer run ahead and message the second buyer while it still waits
/// for the seller.
#[test]
fn three_buyer_multicast_sequentialization_is_unsafe() {
    let decl = GlobalProtocolDecl::new(
        "ThreeBuyer",
        roles(&["S", "B1", "B2"]),
        vec![
            GlobalInteraction::multicast("S", roles(&["B1", "B2"]), "title"),
            GlobalInteraction::multicast("S", roles(&["B1", "B2"]), "price"),
            GlobalInteraction::message("B1", "B2", "share"),
            GlobalInteraction::message("B2", "S", "ok"),
        ],
    );
    let result = BasicSafety::new().check(&initial_context(&decl));

    assert!(!result.safe);
    let mismatch = result
        .violations
        .iter()
        .find(|v| v.code == SafetyViolationCode::SendReceiveMismatch)
        .expect("a send/receive mismatch is reported");
    assert_eq!(mismatch.receiver, Some(RoleName::new("B2")));
    // The second buyer is still in its seller phase when the first buyer
    // runs ahead.
    let expected = &mismatch.details["expected"];
    assert!(
        expected.contains("price") || expected.contains("title"),
        "second buyer still expects the seller: {:?}",
        mismatch
    );
    assert!(result.diagnostics.violating_context.is_some());
}

/// The same ensemble without the overtaking message is safe: unicast chains
/// alone keep every send matched.
#[test]
fn plain_multicast_chain_is_safe() {
    let decl = GlobalProtocolDecl::new(
        "Broadcast",
        roles(&["S", "B1", "B2"]),
        vec![
            GlobalInteraction::multicast("S", roles(&["B1", "B2"]), "title"),
            GlobalInteraction::multicast("S", roles(&["B1", "B2"]), "price"),
        ],
    );
    let result = BasicSafety::new().check(&initial_context(&decl));
    assert!(result.safe, "violations: {:?}", result.violations);
}

/// Recursion keeps the product space finite: the checker revisits the loop
/// head by context key and stops.
#[test]
fn recursive_product_space_is_finite_and_fast() {
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
    let result = BasicSafety::new().check(&initial_context(&decl));
    assert!(result.safe);
    assert!(result.diagnostics.states_explored <= 8);
    assert!(result.diagnostics.elapsed_ms < 2_000);
}

/// Subject reduction: from a safe initial context, every reachable context
/// is compatible - walking successors never finds a violation.
#[test]
fn safe_verdict_is_closed_under_reduction() {
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
    let ctx = initial_context(&decl);
    let checker = BasicSafety::new();
    assert!(checker.check(&ctx).safe);

    // Exhaustively re-check every reachable context on its own.
    let reducer = ContextReducer::new();
    let mut stack = vec![ctx];
    let mut seen = std::collections::HashSet::new();
    while let Some(current) = stack.pop() {
        if !seen.insert(current.key()) {
            continue;
        }
        assert!(
            checker.check(&current).safe,
            "context {} must be safe",
            current.key()
        );
        stack.extend(reducer.find_all_successors(&current));
    }
    assert!(seen.len() >= 4);
}

/// Mismatched payload types surface as type-mismatch, not as a missing
/// receive.
#[test]
fn payload_disagreement_is_a_type_mismatch() {
    use mpstk::cfsm::{InterleavingMode, Transition, TransitionId};
    use mpstk::StateId;

    let sender = Cfsm {
        role: RoleName::new("A"),
        protocol_name: "P".into(),
        parameters: vec![],
        states: vec![StateId(0), StateId(1)],
        transitions: vec![Transition {
            id: TransitionId(0),
            from: StateId(0),
            to: StateId(1),
            action: LocalAction::Send {
                to: RoleName::new("B"),
                message: MessageSig::with_payload("data", "Str"),
            },
        }],
        initial_state: StateId(0),
        terminal_states: vec![StateId(1)],
        interleaving: InterleavingMode::Eager,
    };
    let receiver = Cfsm {
        role: RoleName::new("B"),
        protocol_name: "P".into(),
        parameters: vec![],
        states: vec![StateId(0), StateId(1)],
        transitions: vec![Transition {
            id: TransitionId(0),
            from: StateId(0),
            to: StateId(1),
            action: LocalAction::Receive {
                from: RoleName::new("A"),
                message: MessageSig::with_payload("data", "Bool"),
            },
        }],
        initial_state: StateId(0),
        terminal_states: vec![StateId(1)],
        interleaving: InterleavingMode::Eager,
    };
    let ctx = create_initial_context(
        vec![
            (RoleName::new("A"), Arc::new(sender)),
            (RoleName::new("B"), Arc::new(receiver)),
        ],
        "payload",
    );
    let result = BasicSafety::new().check(&ctx);
    assert!(!result.safe);
    assert_eq!(result.violations[0].code, SafetyViolationCode::TypeMismatch);
    assert_eq!(result.violations[0].message_label, Some("data".into()));
}

/// A receiver nobody will ever message is an orphan receive at the stuck
/// context.
#[test]
fn lone_receiver_is_an_orphan() {
    use mpstk::cfsm::{InterleavingMode, Transition, TransitionId};
    use mpstk::StateId;

    let waiting = Cfsm {
        role: RoleName::new("B"),
        protocol_name: "P".into(),
        parameters: vec![],
        states: vec![StateId(0), StateId(1)],
        transitions: vec![Transition {
            id: TransitionId(0),
            from: StateId(0),
            to: StateId(1),
            action: LocalAction::Receive {
                from: RoleName::new("A"),
                message: MessageSig::new("never"),
            },
        }],
        initial_state: StateId(0),
        terminal_states: vec![StateId(1)],
        interleaving: InterleavingMode::Eager,
    };
    let ctx = create_initial_context(vec![(RoleName::new("B"), Arc::new(waiting))], "orphan");
    let result = BasicSafety::new().check(&ctx);
    assert!(!result.safe);
    assert_eq!(result.violations[0].code, SafetyViolationCode::OrphanReceive);
    assert_eq!(result.violations[0].receiver, Some(RoleName::new("B")));
}
