// Tests for the pattern binder: strengths, guards, deferred values and the
// candidate output the dispatcher hands to its consumers.

use std::cell::RefCell;
use std::rc::Rc;

use crate::kernel::bind::{substitute, BindingStrength, Guard};
use crate::kernel::dispatch::{rewrite_candidates, RewriteCalls};
use crate::kernel::scope::Scope;
use crate::kernel::tree::{structural_eq, TreeRef};
use crate::session::Session;
use crate::tests::common::*;

/// The binder's output for a call site, as a consumer would see it.
fn calls_for(session: &mut Session, text: &str) -> (TreeRef, Rc<RefCell<RewriteCalls>>) {
    let form = parsed(session, text);
    let calls = rewrite_candidates(&session.globals, &form, &session.prims);
    (form, calls)
}

#[test]
fn test_first_perfect_candidate_is_unique() {
    let mut session = Session::test();
    add(&mut session, "if true then X else Y is X");
    add(&mut session, "if false then X else Y is Y");

    let (_, calls) = calls_for(&mut session, "if true then A else B");
    let calls = calls.borrow();
    // The first candidate is Perfect, so the search stopped there.
    assert_eq!(calls.candidates.len(), 1);
    assert_eq!(calls.candidates[0].strength, BindingStrength::Perfect);
    assert_eq!(calls.candidates[0].guards.len(), 0);
}

#[test]
fn test_literal_mismatch_excludes_the_candidate() {
    let mut session = Session::test();
    add(&mut session, "0! is 1");
    add(&mut session, "N! when N > 0 is N * (N-1)!");

    let (_, calls) = calls_for(&mut session, "3!");
    let calls = calls.borrow();
    // The literal 0 cannot match the concrete 3; only the guarded
    // candidate remains, and the guard keeps it Possible.
    assert_eq!(calls.candidates.len(), 1);
    assert_eq!(calls.candidates[0].strength, BindingStrength::Possible);
    assert!(matches!(calls.candidates[0].guards[0], Guard::Condition(_)));
}

#[test]
fn test_binding_law_substitution_recovers_the_value() {
    // A Perfect binding substituted back into the pattern gives the value.
    let mut session = Session::test();
    add(&mut session, "foo X:integer, Y is X + Y");

    let (form, calls) = calls_for(&mut session, "foo 3, 4");
    let calls = calls.borrow();
    let candidate = &calls.candidates[0];
    assert_eq!(candidate.strength, BindingStrength::Perfect);
    let rebuilt = substitute(&candidate.rewrite.pattern, &candidate.bindings);
    assert!(
        structural_eq(&rebuilt, &form),
        "substitution gave {}",
        rebuilt
    );
}

#[test]
fn test_deferred_arguments_become_closures() {
    // A braced block argument is not evaluated; it closes over the
    // caller's scope.
    let mut session = Session::test();
    add(&mut session, "X is 17");
    add(&mut session, "AtoB Body is Body");

    let (_, calls) = calls_for(&mut session, "AtoB { write X+1 }");
    let calls = calls.borrow();
    let candidate = &calls.candidates[0];
    assert_eq!(candidate.bindings.len(), 1);
    let binding = &candidate.bindings[0];
    assert!(binding.deferred);
    assert!(binding.value.is_brace_block());

    // Materialize the closure the way the call site would.
    let closure = session
        .interpreter
        .make_closure(&session.globals, &binding.value);
    let captured = session
        .interpreter
        .is_closure(&closure)
        .expect("marked as a closure");
    let x = Scope::bound(&captured, &nm("X"), true).expect("captured scope binds X");
    assert_eq!(x.as_integer(), Some(17));
    // The right side is the un-evaluated block itself.
    let (_, expression) = closure.as_prefix().unwrap();
    assert!(structural_eq(expression, &binding.value));
}

#[test]
fn test_duplicate_parameters_require_equal_values() {
    let mut session = Session::test();
    add(&mut session, "same X, X is true");

    let (_, calls) = calls_for(&mut session, "same 3, 3");
    let calls = calls.borrow();
    let candidate = &calls.candidates[0];
    assert_eq!(candidate.strength, BindingStrength::Possible);
    // One binding for X, one equality guard for the second occurrence.
    assert_eq!(candidate.bindings.len(), 1);
    assert!(candidate
        .guards
        .iter()
        .any(|guard| matches!(guard, Guard::Equal { .. })));
}

#[test]
fn test_infix_pattern_deconstructs_unshaped_values() {
    // When the value is not syntactically an infix, the match moves to
    // runtime: a name check plus left/right deconstruction.
    let mut session = Session::test();
    add(&mut session, "glue A + B is A * B");

    let (_, calls) = calls_for(&mut session, "glue w");
    let calls = calls.borrow();
    let candidate = &calls.candidates[0];
    assert_eq!(candidate.strength, BindingStrength::Possible);
    // A and B bind to runtime deconstructions of w.
    assert_eq!(candidate.bindings.len(), 2);
    assert!(candidate.bindings[0].value.prefix_of("left").is_some());
    assert!(candidate.bindings[1].value.prefix_of("right").is_some());
    // And the operator name is checked at runtime.
    let name_guard = candidate.guards.iter().any(|guard| match guard {
        Guard::Equal { value, expect } => {
            value.prefix_of("name").is_some() && expect.as_text() == Some("+")
        }
        _ => false,
    });
    assert!(name_guard);
}

#[test]
fn test_typed_pattern_mismatch_fails_binding() {
    let mut session = Session::test();
    add(&mut session, "double X:integer is X + X");

    let (_, calls) = calls_for(&mut session, "double \"hi\"");
    let calls = calls.borrow();
    assert!(calls.candidates.is_empty());
    // The failure was buffered for collation, not reported eagerly.
    assert!(calls.failures.had_errors());
}

#[test]
fn test_specialization_keys_are_concrete_argument_types() {
    let mut session = Session::test();
    add(&mut session, "foo X:integer, Y is X + Y");

    let (_, calls) = calls_for(&mut session, "foo 3, 4");
    let mut calls = calls.borrow_mut();
    let key = calls.candidates[0].specialization_key();
    assert_eq!(key.argument_types, vec!["integer", "integer"]);
    // The same candidate maps to the same key, so recursive calls that
    // bottom out here share one specialization.
    let again = calls.candidates[0].specialization_key();
    assert_eq!(key, again);
}

#[test]
fn test_source_order_is_preserved_among_possible_candidates() {
    let mut session = Session::test();
    add(&mut session, "g X when X > 0 is 1");
    add(&mut session, "g X when X < 5 is 2");

    let (_, calls) = calls_for(&mut session, "g 3");
    let calls = calls.borrow();
    assert_eq!(calls.candidates.len(), 2);
    // Both guards hold at runtime; the consumer tries source order, so
    // the first definition wins.
    drop(calls);
    assert_eq!(eval_integer(&mut session, "g 3"), 1);
}
