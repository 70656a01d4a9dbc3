use std::cell::RefCell;
use std::rc::Rc;

use crate::kernel::bind::{BindingStrength, RewriteCandidate};
use crate::kernel::errors::{Error, ErrorSink, Result};
use crate::kernel::scope::{Scope, ScopeRef};
use crate::kernel::tree::{Primitives, TreeRef};
use crate::kernel::types::Types;

/// The candidate rewrites found for one call site, in the order a consumer
/// should try them. Failure diagnostics stay buffered here and surface only
/// when every candidate fails.
pub struct RewriteCalls {
    pub candidates: Vec<RewriteCandidate>,
    pub failures: ErrorSink,
}

impl RewriteCalls {
    pub fn new() -> RewriteCalls {
        RewriteCalls {
            candidates: Vec::new(),
            failures: ErrorSink::new(),
        }
    }

    /// Collate every per-candidate failure into a single diagnostic for the
    /// call site.
    pub fn collated_failure(&self, what: &TreeRef) -> Error {
        let mut message = format!("no form matches '{}'", what);
        for error in self.failures.drain() {
            message.push_str("\n  ");
            message.push_str(error.message());
        }
        Error::binding(message, what.position)
    }
}

impl Default for RewriteCalls {
    fn default() -> RewriteCalls {
        RewriteCalls::new()
    }
}

/// Walk the scope chain for rules whose pattern hash matches the form and
/// run the binder on each. A Perfect candidate is a unique answer and stops
/// the walk; otherwise all Possible candidates are kept in source order for
/// the consumer to try with their guards.
pub fn enumerate(
    types: &mut Types,
    what: &TreeRef,
    calls: &Rc<RefCell<RewriteCalls>>,
) -> Result<()> {
    let scope = types.scope().clone();
    Scope::lookup(&scope, what, true, &mut |found_scope, rewrite| {
        let (candidate, failures) = RewriteCandidate::check(rewrite, found_scope, what, types);
        match candidate {
            Some(candidate) => {
                // A Perfect candidate ends the search: nothing after it can
                // ever be reached.
                let perfect = candidate.strength == BindingStrength::Perfect;
                calls.borrow_mut().candidates.push(candidate);
                if perfect {
                    Some(())
                } else {
                    None
                }
            }
            None => {
                let borrowed = calls.borrow();
                for failure in failures {
                    borrowed.failures.log(failure);
                }
                None
            }
        }
    });

    // `override_priority` is advisory: a stable sort key over candidates
    // that are otherwise in source order.
    let mut borrowed = calls.borrow_mut();
    if borrowed.candidates.len() > 1 {
        borrowed
            .candidates
            .sort_by_key(|candidate| -override_priority(&candidate.scope));
    }
    Ok(())
}

/// The binder's output for one call site: every candidate with its
/// bindings, guards, and inferred type, ready for a consumer to dispatch
/// over. This is the entry point an interpreter or a compiling back end
/// calls; inference failures stay buffered with the candidates.
pub fn rewrite_candidates(
    scope: &ScopeRef,
    form: &TreeRef,
    prims: &Rc<Primitives>,
) -> Rc<RefCell<RewriteCalls>> {
    let mut types = Types::new(scope.clone(), prims.clone());
    let _ = types.evaluate(form);
    types
        .rewrite_calls_for(form)
        .unwrap_or_else(|| Rc::new(RefCell::new(RewriteCalls::new())))
}

fn override_priority(scope: &ScopeRef) -> i64 {
    match Scope::named(scope, "override_priority") {
        Some(value) => value
            .as_integer()
            .or_else(|| value.as_real().map(|r| r as i64))
            .unwrap_or(0),
        None => 0,
    }
}
