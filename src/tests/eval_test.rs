// End-to-end evaluation tests: the dispatcher choosing candidates, guards
// deciding at runtime, closures deferring evaluation, and the builtins.

use indoc::indoc;

use crate::session::Session;
use crate::tests::common::*;

#[test]
fn test_arithmetic() {
    let mut session = Session::test();
    assert_eq!(eval_integer(&mut session, "2 + 3 * 4"), 14);
    assert_eq!(eval_integer(&mut session, "(2 + 3) * 4"), 20);
    assert_eq!(eval_integer(&mut session, "10 - 3 - 2"), 5);
    assert_eq!(eval_integer(&mut session, "2 ^ 3 ^ 2"), 512);
    assert_eq!(eval_integer(&mut session, "17 rem 5"), 2);
    assert_eq!(eval_integer(&mut session, "(-3) + 5"), 2);
    // A prefix at the start of a statement applies to the whole
    // statement, so a bare leading minus negates the sum.
    assert_eq!(eval_integer(&mut session, "-3 + 5"), -8);
}

#[test]
fn test_parameter_binding() {
    // foo X:integer, Y is X + Y; foo 3, 4 binds X=3, Y=4.
    let mut session = Session::test();
    let source = indoc! {"
        foo X:integer, Y is X + Y
        foo 3, 4
    "};
    assert_eq!(eval_integer(&mut session, source), 7);
}

#[test]
fn test_factorial_with_guards() {
    // Both candidates match 3!; the literal fails, the guard holds.
    let mut session = Session::test();
    let source = indoc! {"
        0! is 1
        N! when N > 0 is N * (N-1)!
        3!
    "};
    assert_eq!(eval_integer(&mut session, source), 6);
}

#[test]
fn test_if_then_else_as_ordinary_rewrites() {
    let mut session = Session::test();
    add(&mut session, "if true then X else Y is X");
    add(&mut session, "if false then X else Y is Y");
    assert_eq!(eval_name(&mut session, "if true then A else B"), "A");
    assert_eq!(eval_name(&mut session, "if false then A else B"), "B");
}

#[test]
fn test_conditions_evaluate_before_choosing() {
    let mut session = Session::test();
    add(&mut session, "if true then X else Y is X");
    add(&mut session, "if false then X else Y is Y");
    // The condition is an expression; the literal patterns require its
    // value at runtime.
    assert_eq!(eval_name(&mut session, "if 1 < 2 then A else B"), "A");
    assert_eq!(eval_name(&mut session, "if 2 < 1 then A else B"), "B");
}

#[test]
fn test_guards_select_among_candidates() {
    let mut session = Session::test();
    add(&mut session, "f 0 is 100");
    add(&mut session, "f X when X > 0 is X");
    assert_eq!(eval_integer(&mut session, "f 0"), 100);
    assert_eq!(eval_integer(&mut session, "f 5"), 5);
    // No candidate survives a negative argument.
    bad(&mut session, "f (0 - 1)");
}

#[test]
fn test_booleans_and_comparisons() {
    let mut session = Session::test();
    assert_eq!(eval_name(&mut session, "1 < 2"), "true");
    assert_eq!(eval_name(&mut session, "2 < 1"), "false");
    assert_eq!(eval_name(&mut session, "true and false"), "false");
    assert_eq!(eval_name(&mut session, "true or false"), "true");
    assert_eq!(eval_name(&mut session, "not false"), "true");
    assert_eq!(eval_name(&mut session, "1 = 1 and 2 <> 3"), "true");
}

#[test]
fn test_real_arithmetic() {
    let mut session = Session::test();
    let result = session.eval("1.5 + 2.25").unwrap().unwrap();
    assert_eq!(result.as_real(), Some(3.75));
    assert_eq!(eval_name(&mut session, "1.5 < 2.5"), "true");
}

#[test]
fn test_text_builtins() {
    let mut session = Session::test();
    assert_eq!(eval_text(&mut session, "\"ab\" & \"cd\""), "abcd");
    assert_eq!(eval_name(&mut session, "\"ab\" = \"ab\""), "true");
}

#[test]
fn test_sequences_and_blocks() {
    let mut session = Session::test();
    let source = indoc! {"
        x is 17
        {y is x + 1; y * 2}
    "};
    assert_eq!(eval_integer(&mut session, source), 36);
}

#[test]
fn test_deferred_arguments_evaluate_lazily() {
    // The braced argument is never evaluated, so the division by zero
    // never happens.
    let mut session = Session::test();
    add(&mut session, "skip B is 0");
    assert_eq!(eval_integer(&mut session, "skip {1 / 0}"), 0);
    // But an eager argument is evaluated.
    add(&mut session, "keep B is B");
    bad(&mut session, "keep (1 / 0)");
}

#[test]
fn test_closures_capture_lexically() {
    let mut session = Session::test();
    let source = indoc! {"
        x is 1
        capture B is B
        outer is {x is 2; capture {x}}
        outer
    "};
    // The closure reads the x of the block that created it.
    assert_eq!(eval_integer(&mut session, source), 2);
}

#[test]
fn test_closure_bodies_run_in_their_scope() {
    let mut session = Session::test();
    let source = indoc! {"
        x is 17
        force B is B
        force {x + 1}
    "};
    assert_eq!(eval_integer(&mut session, source), 18);
}

#[test]
fn test_tree_deconstruction_builtins() {
    let mut session = Session::test();
    add(&mut session, "sum_of T:infix is left T + right T");
    assert_eq!(eval_integer(&mut session, "sum_of (3, 4)"), 7);
    assert_eq!(eval_text(&mut session, "kind 3"), "integer");
    assert_eq!(eval_text(&mut session, "name (1, 2)"), ",");
}

#[test]
fn test_unknown_forms_are_left_as_is() {
    // A form no rewrite knows evaluates to itself so a surrounding form
    // can still handle it. Parenthese blocks are transparent, so the
    // tuple's value is its comma chain.
    let mut session = Session::test();
    assert_eq!(eval_rendered(&mut session, "(1, 2, 3)"), "1, 2, 3");
    assert_eq!(eval_name(&mut session, "unbound_name"), "unbound_name");
}

#[test]
fn test_division_by_zero_is_reported() {
    let mut session = Session::test();
    bad(&mut session, "1 / 0");
}

#[test]
fn test_all_candidates_failing_is_one_diagnostic() {
    let mut session = Session::test();
    add(&mut session, "double X:integer is X + X");
    let error = session.eval("double \"hi\"").unwrap_err();
    assert!(error.message().contains("no form matches"));
}

#[test]
fn test_runaway_rewrites_exhaust_fuel() {
    let session = Session::test();
    session.interpreter.set_fuel(Some(2_000));
    let mut session = session;
    add(&mut session, "loop is loop");
    let error = session.eval("loop").unwrap_err();
    assert!(error.message().contains("fuel"));
}

#[test]
fn test_polymorphic_dispatch_on_argument_types() {
    // The same operator name picks a candidate per argument type.
    let mut session = Session::test();
    assert_eq!(eval_integer(&mut session, "1 + 2"), 3);
    let result = session.eval("1.5 + 0.25").unwrap().unwrap();
    assert_eq!(result.as_real(), Some(1.75));
}

#[test]
fn test_recursion_with_accumulators() {
    let mut session = Session::test();
    let source = indoc! {"
        sum 0 is 0
        sum N when N > 0 is N + sum (N - 1)
        sum 10
    "};
    assert_eq!(eval_integer(&mut session, source), 55);
}
