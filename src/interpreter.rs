use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::builtins::Builtins;
use crate::kernel::bind::{builtin_name, is_external, Guard, RewriteCandidate};
use crate::kernel::errors::{Error, Result};
use crate::kernel::info::InfoRef;
use crate::kernel::scope::{self, Scope, ScopeRef};
use crate::kernel::tree::{structural_eq, Primitives, Tree, TreeKey, TreeRef};
use crate::kernel::types::Types;

/// A direct evaluator over the core contract: for each call site it asks
/// the dispatcher for candidates, then tries them in order, checking the
/// residual guards at runtime. It is one possible consumer of the core; a
/// compiling back end is another.
pub struct Interpreter {
    builtins: Builtins,
    info: InfoRef,
    prims: Rc<Primitives>,
    fuel: Cell<Option<u64>>,
}

impl Interpreter {
    pub fn new(info: InfoRef, prims: Rc<Primitives>) -> Interpreter {
        Interpreter {
            builtins: Builtins::standard(),
            info,
            prims,
            fuel: Cell::new(None),
        }
    }

    /// Bound evaluation: each dispatch decrements the counter, and running
    /// out aborts the evaluation. `None` removes the bound.
    pub fn set_fuel(&self, fuel: Option<u64>) {
        self.fuel.set(fuel);
    }

    pub fn primitives(&self) -> &Rc<Primitives> {
        &self.prims
    }

    /// The captured scope if the value is a closure, none otherwise.
    pub fn is_closure(&self, value: &TreeRef) -> Option<ScopeRef> {
        if value.as_prefix().is_some() {
            return self.info.closure_scope(value);
        }
        None
    }

    /// Materialize a closure: the current scope, projected, is prepended to
    /// the un-evaluated expression and the pair is tagged through the info
    /// table. Dynamic capture becomes lexical without syntactic lambda.
    pub fn make_closure(&self, scope: &ScopeRef, value: &TreeRef) -> TreeRef {
        if value.is_constant() {
            return value.clone();
        }
        if self.is_closure(value).is_some() {
            return value.clone();
        }
        let closure = Tree::prefix(Scope::as_tree(scope), value.clone(), value.position);
        self.info.mark_closure(&closure, scope.clone());
        closure
    }

    /// Evaluate a tree in a scope. Constants evaluate to themselves; a form
    /// with no rewrite at all is left as-is so an enclosing form can still
    /// handle it.
    pub fn evaluate(&self, scope: &ScopeRef, tree: &TreeRef) -> Result<TreeRef> {
        if tree.is_constant() {
            return Ok(tree.clone());
        }
        if let Some(captured) = self.is_closure(tree) {
            let (_, expression) = tree.as_prefix().unwrap();
            return self.evaluate(&captured, expression);
        }
        if let Some((child, _, _)) = tree.as_block() {
            if tree.is_brace_block() || tree.is_indent_block() {
                return self.evaluate_body(scope, child);
            }
            return self.evaluate(scope, child);
        }
        if let Some((name, _, _)) = tree.as_infix() {
            if name == "\n" || name == ";" {
                return self.evaluate_body(scope, tree);
            }
            if name == "is" {
                // A bare declaration is not an instruction.
                return Ok(tree.clone());
            }
        }
        self.dispatch(scope, tree)
    }

    /// Evaluate a possibly sequenced body: declarations are installed in a
    /// fresh scope, then the instructions run in order; the value is the
    /// last instruction's.
    fn evaluate_body(&self, scope: &ScopeRef, body: &TreeRef) -> Result<TreeRef> {
        let locals = Scope::child(scope);
        scope::process_declarations(&locals, body, &self.prims.self_name)?;
        self.run_sequence(&locals, body)
    }

    /// Run a processed sequence, skipping declaration nodes.
    pub fn run_sequence(&self, scope: &ScopeRef, tree: &TreeRef) -> Result<TreeRef> {
        let mut last = None;
        let mut current = tree.clone();
        loop {
            let next = match current.as_infix() {
                Some((name, left, right)) if name == "\n" || name == ";" => {
                    if !scope::is_declaration(left) {
                        last = Some(self.evaluate(scope, left)?);
                    }
                    Some(right.clone())
                }
                _ => {
                    if !scope::is_declaration(&current) {
                        last = Some(self.evaluate(scope, &current)?);
                    }
                    None
                }
            };
            match next {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(last.unwrap_or_else(|| Tree::name("", tree.position)))
    }

    /// One dispatch: enumerate candidates through the binder and type
    /// engine, then try them in order under their runtime guards.
    fn dispatch(&self, scope: &ScopeRef, what: &TreeRef) -> Result<TreeRef> {
        if let Some(fuel) = self.fuel.get() {
            if fuel == 0 {
                return Err(Error::internal("evaluation fuel exhausted", what.position));
            }
            self.fuel.set(Some(fuel - 1));
        }

        let mut types = Types::new(scope.clone(), self.prims.clone());
        let inference = types.evaluate(what);
        let calls = match types.rewrite_calls_for(what) {
            Some(calls) => calls,
            None => return inference.map(|_| what.clone()),
        };

        let count = calls.borrow().candidates.len();
        if count == 0 {
            if calls.borrow().failures.had_errors() {
                // All candidates failed to bind: one collated diagnostic.
                return Err(calls.borrow().collated_failure(what));
            }
            // No rewrite knows this form: leave the tree as-is so the
            // surrounding form can handle it.
            return Ok(what.clone());
        }
        if let Err(error) = inference {
            if error.is_type_error() {
                return Err(error);
            }
        }

        for index in 0..count {
            let borrowed = calls.borrow();
            let candidate = &borrowed.candidates[index];
            if let Some(result) = self.try_candidate(scope, candidate, what)? {
                return Ok(result);
            }
        }
        let error = calls.borrow().collated_failure(what);
        Err(error)
    }

    /// Try one candidate: install the bindings, check the guards, and if
    /// everything holds evaluate the body. `None` means the guards failed
    /// and the next candidate should run.
    fn try_candidate(
        &self,
        caller: &ScopeRef,
        candidate: &RewriteCandidate,
        what: &TreeRef,
    ) -> Result<Option<TreeRef>> {
        let locals = Scope::child(&candidate.scope);
        let mut evaluated: HashMap<TreeKey, TreeRef> = HashMap::new();

        for binding in &candidate.bindings {
            let value = if binding.deferred {
                self.make_closure(caller, &binding.value)
            } else {
                self.evaluate_once(caller, &binding.value, &mut evaluated)?
            };
            locals.redefine(binding.name.clone(), value)?;
        }

        for guard in &candidate.guards {
            match guard {
                Guard::Equal { value, expect } => {
                    let actual = self.evaluate_once(caller, value, &mut evaluated)?;
                    let expected = self.evaluate(&locals, expect)?;
                    if !structural_eq(&actual, &expected) {
                        return Ok(None);
                    }
                }
                Guard::KindIs { value, kind } => {
                    let actual = self.evaluate_once(caller, value, &mut evaluated)?;
                    if actual.kind() != *kind {
                        return Ok(None);
                    }
                }
                Guard::Condition(condition) => {
                    let value = self.evaluate(&locals, condition)?;
                    match value.as_name() {
                        Some("true") => {}
                        Some("false") => return Ok(None),
                        _ => {
                            return Err(Error::typing(
                                format!("guard '{}' is not a boolean", condition),
                                condition.position,
                            ))
                        }
                    }
                }
            }
        }

        // The guards hold: this candidate is the answer. Any diagnostics
        // buffered while speculating become real now.
        let body = &candidate.rewrite.body;
        if body.is_name("self") {
            return Ok(Some(what.clone()));
        }
        if let Some(primitive) = builtin_name(body) {
            let operation = self.builtins.get(&primitive).ok_or_else(|| {
                Error::binding(format!("unknown builtin '{}'", primitive), body.position)
            })?;
            let mut arguments = Vec::new();
            for binding in &candidate.bindings {
                let value = Scope::bound(&locals, &binding.name, false).ok_or_else(|| {
                    Error::internal("binding vanished before builtin call", body.position)
                })?;
                arguments.push(value);
            }
            return operation(&self.prims, &arguments, what.position).map(Some);
        }
        if is_external(body) {
            return Err(Error::binding(
                "external declarations are not available to the interpreter",
                body.position,
            ));
        }

        self.evaluate_body(&locals, body).map(Some)
    }

    /// Caller-side expressions evaluate at most once per candidate, keyed
    /// by node identity; guards and bindings share the results.
    fn evaluate_once(
        &self,
        scope: &ScopeRef,
        tree: &TreeRef,
        evaluated: &mut HashMap<TreeKey, TreeRef>,
    ) -> Result<TreeRef> {
        if let Some(value) = evaluated.get(&TreeKey::of(tree)) {
            return Ok(value.clone());
        }
        let value = self.evaluate(scope, tree)?;
        evaluated.insert(TreeKey::of(tree), value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::info::InfoTable;
    use crate::kernel::tree::NOWHERE;

    #[test]
    fn test_closure_marker_distinguishes_prefixes() {
        let info = InfoTable::new();
        let prims = Primitives::new();
        let interpreter = Interpreter::new(info, prims);
        let scope = Scope::root();

        let expression = Tree::name("x", NOWHERE);
        let closure = interpreter.make_closure(&scope, &expression);
        assert!(interpreter.is_closure(&closure).is_some());

        // An ordinary prefix of the same shape is not a closure.
        let (left, right) = closure.as_prefix().unwrap();
        let lookalike = Tree::prefix(left.clone(), right.clone(), NOWHERE);
        assert!(interpreter.is_closure(&lookalike).is_none());
    }

    #[test]
    fn test_constants_never_close_over_scope() {
        let info = InfoTable::new();
        let prims = Primitives::new();
        let interpreter = Interpreter::new(info, prims);
        let scope = Scope::root();
        let constant = Tree::integer(42, NOWHERE);
        let value = interpreter.make_closure(&scope, &constant);
        assert!(structural_eq(&value, &constant));
        assert!(interpreter.is_closure(&value).is_none());
    }
}
