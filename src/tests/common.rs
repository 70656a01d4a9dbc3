use crate::kernel::tree::{Position, Tree, TreeRef, NOWHERE};
use crate::session::Session;

/// Parse one source, failing the test on parse errors or empty input.
pub fn parsed(session: &mut Session, text: &str) -> TreeRef {
    match session.parse_source("<test>", text) {
        Ok(Some(tree)) => tree,
        Ok(None) => panic!("'{}' parsed to nothing", text),
        Err(error) => panic!("'{}' failed to parse: {}", text, error),
    }
}

/// Evaluate source that must succeed.
pub fn add(session: &mut Session, text: &str) {
    if let Err(error) = session.eval(text) {
        panic!("unexpected error for '{}': {}", text, session.explain(&error));
    }
}

/// Evaluate source that must be rejected.
pub fn bad(session: &mut Session, text: &str) {
    if session.eval(text).is_ok() {
        panic!("expected an error for '{}'", text);
    }
}

/// Evaluate and expect an integer result.
pub fn eval_integer(session: &mut Session, text: &str) -> i64 {
    match session.eval(text) {
        Ok(Some(value)) => value
            .as_integer()
            .unwrap_or_else(|| panic!("'{}' gave non-integer '{}'", text, value)),
        Ok(None) => panic!("'{}' gave no value", text),
        Err(error) => panic!("'{}' failed: {}", text, session.explain(&error)),
    }
}

/// Evaluate and expect a name result.
pub fn eval_name(session: &mut Session, text: &str) -> String {
    match session.eval(text) {
        Ok(Some(value)) => value
            .as_name()
            .map(str::to_string)
            .unwrap_or_else(|| panic!("'{}' gave non-name '{}'", text, value)),
        Ok(None) => panic!("'{}' gave no value", text),
        Err(error) => panic!("'{}' failed: {}", text, session.explain(&error)),
    }
}

/// Evaluate and expect a text result.
pub fn eval_text(session: &mut Session, text: &str) -> String {
    match session.eval(text) {
        Ok(Some(value)) => value
            .as_text()
            .map(str::to_string)
            .unwrap_or_else(|| panic!("'{}' gave non-text '{}'", text, value)),
        Ok(None) => panic!("'{}' gave no value", text),
        Err(error) => panic!("'{}' failed: {}", text, session.explain(&error)),
    }
}

/// Evaluate and render the resulting tree.
pub fn eval_rendered(session: &mut Session, text: &str) -> String {
    match session.eval(text) {
        Ok(Some(value)) => session.render(&value),
        Ok(None) => panic!("'{}' gave no value", text),
        Err(error) => panic!("'{}' failed: {}", text, session.explain(&error)),
    }
}

// Shorthand tree constructors for expected shapes.

pub fn int(value: i64) -> TreeRef {
    Tree::integer(value, NOWHERE)
}

pub fn nm(value: &str) -> TreeRef {
    Tree::name(value, NOWHERE)
}

pub fn infix(name: &str, left: TreeRef, right: TreeRef) -> TreeRef {
    Tree::infix(name, left, right, NOWHERE)
}

pub fn prefix(left: TreeRef, right: TreeRef) -> TreeRef {
    Tree::prefix(left, right, NOWHERE)
}

pub fn postfix(left: TreeRef, right: TreeRef) -> TreeRef {
    Tree::postfix(left, right, NOWHERE)
}

pub fn paren(child: TreeRef) -> TreeRef {
    Tree::block(child, "(", ")", NOWHERE)
}

pub fn indent(child: TreeRef) -> TreeRef {
    Tree::block(
        child,
        crate::kernel::tree::INDENT_OPEN,
        crate::kernel::tree::INDENT_CLOSE,
        NOWHERE,
    )
}

pub const ANYWHERE: Position = NOWHERE;
