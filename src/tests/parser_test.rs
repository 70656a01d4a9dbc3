// Tests for the precedence-driven parser: grouping, associativity, the
// space-sensitivity rules, blocks, and the parse-print round trip.

use indoc::indoc;

use crate::kernel::tree::structural_eq;
use crate::session::Session;
use crate::syntax::parser::ParserOptions;
use crate::tests::common::*;

#[test]
fn test_arithmetic_precedence() {
    // 2 + 3 * 4 groups multiplication first.
    let mut session = Session::test();
    let tree = parsed(&mut session, "2 + 3 * 4");
    let expected = infix("+", int(2), infix("*", int(3), int(4)));
    assert!(structural_eq(&tree, &expected), "got {}", tree);

    let tree = parsed(&mut session, "2 * 3 + 4");
    let expected = infix("+", infix("*", int(2), int(3)), int(4));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_even_priorities_are_left_associative() {
    let mut session = Session::test();
    let tree = parsed(&mut session, "10 - 3 - 2");
    let expected = infix("-", infix("-", int(10), int(3)), int(2));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_odd_priorities_are_right_associative() {
    let mut session = Session::test();
    let tree = parsed(&mut session, "2 ^ 3 ^ 2");
    let expected = infix("^", int(2), infix("^", int(3), int(2)));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_comma_tuples_in_parentheses() {
    // (1, 2, 3) keeps the block and the right-leaning comma chain.
    let mut session = Session::test();
    let tree = parsed(&mut session, "(1, 2, 3)");
    let expected = paren(infix(",", int(1), infix(",", int(2), int(3))));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_unary_binary_minus_disambiguation() {
    let mut session = Session::test();

    // Leading minus is a prefix.
    let tree = parsed(&mut session, "-3");
    assert!(structural_eq(&tree, &prefix(nm("-"), int(3))), "got {}", tree);

    // Spaces on both sides make an infix.
    let tree = parsed(&mut session, "a - b");
    assert!(
        structural_eq(&tree, &infix("-", nm("a"), nm("b"))),
        "got {}",
        tree
    );

    // Space before but not after makes a prefix applied to a.
    let tree = parsed(&mut session, "a -b");
    let expected = prefix(nm("a"), prefix(nm("-"), nm("b")));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_signed_constant_folding_is_an_option() {
    let mut session = Session::with_options(ParserOptions {
        signed_constants: true,
    })
    .unwrap();
    let tree = parsed(&mut session, "-3");
    assert_eq!(tree.as_integer(), Some(-3));
    let tree = parsed(&mut session, "-2.5");
    assert_eq!(tree.as_real(), Some(-2.5));
    // Only literals fold; names still get a prefix.
    let tree = parsed(&mut session, "-x");
    assert!(structural_eq(&tree, &prefix(nm("-"), nm("x"))));
}

#[test]
fn test_newline_before_sub_statement_infix_is_suppressed() {
    // `else` has an infix priority below statement priority, so the
    // newline before it is swallowed.
    let mut session = Session::test();
    let tree = parsed(&mut session, "a\nelse b");
    let expected = infix("else", nm("a"), nm("b"));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_newline_separates_statements() {
    let mut session = Session::test();
    let tree = parsed(&mut session, "a\nb");
    let expected = infix("\n", nm("a"), nm("b"));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_indented_block_attaches_to_previous_line() {
    let mut session = Session::test();
    let source = indoc! {"
        f
            x
        y
    "};
    let tree = parsed(&mut session, source);
    let expected = infix("\n", prefix(nm("f"), indent(nm("x"))), nm("y"));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_brace_blocks() {
    let mut session = Session::test();
    let tree = parsed(&mut session, "f {x}");
    let expected = prefix(nm("f"), crate::kernel::tree::Tree::block(nm("x"), "{", "}", ANYWHERE));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_empty_block_holds_an_empty_name() {
    let mut session = Session::test();
    let tree = parsed(&mut session, "()");
    let expected = paren(nm(""));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_prefix_binds_before_low_priority_comma() {
    // write a, b parses as (write a), b
    let mut session = Session::test();
    let tree = parsed(&mut session, "write a, b");
    let expected = infix(",", prefix(nm("write"), nm("a")), nm("b"));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_postfix_operators() {
    let mut session = Session::test();
    let tree = parsed(&mut session, "3!");
    assert!(structural_eq(&tree, &postfix(int(3), nm("!"))), "got {}", tree);

    // Postfix folds tighter groupings first but not looser ones.
    let tree = parsed(&mut session, "N * (N-1)!");
    let expected = infix(
        "*",
        nm("N"),
        postfix(paren(infix("-", nm("N"), int(1))), nm("!")),
    );
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_pattern_with_types_and_guard() {
    let mut session = Session::test();
    let tree = parsed(&mut session, "foo X:integer, Y is X + Y");
    let pattern = infix(
        ",",
        prefix(nm("foo"), infix(":", nm("X"), nm("integer"))),
        nm("Y"),
    );
    let expected = infix("is", pattern, infix("+", nm("X"), nm("Y")));
    assert!(structural_eq(&tree, &expected), "got {}", tree);

    let tree = parsed(&mut session, "N! when N > 0 is 1");
    let guarded = infix(
        "when",
        postfix(nm("N"), nm("!")),
        infix(">", nm("N"), int(0)),
    );
    let expected = infix("is", guarded, int(1));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_return_type_annotates_the_whole_pattern() {
    let mut session = Session::test();
    let tree = parsed(&mut session, "X:integer + Y:integer as integer is 0");
    let (op, pattern, _) = tree.as_infix().unwrap();
    assert_eq!(op, "is");
    let (op, _, declared) = pattern.as_infix().unwrap();
    assert_eq!(op, "as");
    assert_eq!(declared.as_name(), Some("integer"));
}

#[test]
fn test_long_text_keeps_its_delimiters() {
    let mut session = Session::test();
    let tree = parsed(&mut session, "<<some long text>>");
    assert_eq!(tree.as_text(), Some("some long text"));
    let rendered = session.render(&tree);
    assert_eq!(rendered, "<<some long text>>");
}

#[test]
fn test_comments_attach_to_the_following_node() {
    let mut session = Session::test();
    let tree = parsed(&mut session, "// leading\nx");
    let comments = session.info.comments_of(&tree).expect("comments attached");
    assert_eq!(comments.before, vec!["// leading".to_string()]);
}

#[test]
fn test_inline_syntax_extends_the_grammar() {
    let mut session = Session::test();
    let source = indoc! {"
        syntax
            INFIX
                311 becomes
        x becomes y
    "};
    let tree = parsed(&mut session, source);
    let expected = infix("becomes", nm("x"), nm("y"));
    assert!(structural_eq(&tree, &expected), "got {}", tree);
}

#[test]
fn test_child_syntax_wraps_embedded_content() {
    use crate::syntax::table::MapResolver;
    use std::collections::HashMap;
    use std::rc::Rc;

    let mut session = Session::test();
    let mut sources = HashMap::new();
    sources.insert("shout".to_string(), "INFIX\n 45 loudly\n".to_string());
    session.set_resolver(Rc::new(MapResolver(sources)));

    let source = indoc! {"
        syntax
            SYNTAX shout
                begin end
        begin y loudly z end
    "};
    let tree = parsed(&mut session, source);
    let (head, block) = tree.as_prefix().expect("prefix wrapper");
    assert_eq!(head.as_name(), Some("begin"));
    let (child, opening, closing) = block.as_block().expect("block wrapper");
    assert_eq!(opening, "begin");
    assert_eq!(closing, "end");
    assert!(structural_eq(
        child,
        &infix("loudly", nm("y"), nm("z"))
    ));
}

#[test]
fn test_mismatched_delimiters_are_reported() {
    let mut session = Session::test();
    assert!(session.parse_source("<test>", "(a]").is_err());
    assert!(session.parse_source("<test>", "(a").is_err());
}

#[test]
fn test_parse_print_round_trip() {
    // Re-printing and re-parsing yields a structurally equal tree.
    let sources = [
        "2 + 3 * 4",
        "10 - 3 - 2",
        "2 ^ 3 ^ 2",
        "(1, 2, 3)",
        "-3",
        "a - b",
        "a -b",
        "3!",
        "3.25",
        "\"some text\"",
        "\"with \"\"quotes\"\" inside\"",
        "()",
        "f {x}",
        "if true then A else B",
        "foo X:integer, Y is X + Y",
        "N! when N > 0 is N * (N-1)!",
        "x is 17\ny is 18\nx + y",
        "write a, b",
        "not a and b",
    ];
    for source in sources {
        let mut session = Session::test();
        let first = parsed(&mut session, source);
        let printed = session.render(&first);
        let second = parsed(&mut session, &printed);
        assert!(
            structural_eq(&first, &second),
            "round trip failed for '{}':\n printed: {}\n first:  {}\n second: {}",
            source,
            printed,
            first,
            second
        );
    }
}

#[test]
fn test_indent_round_trip() {
    let mut session = Session::test();
    let source = indoc! {"
        f
            x
        y
    "};
    let first = parsed(&mut session, source);
    let printed = session.render(&first);
    let second = parsed(&mut session, &printed);
    assert!(
        structural_eq(&first, &second),
        "printed:\n{}\n first: {}\n second: {}",
        printed,
        first,
        second
    );
}
