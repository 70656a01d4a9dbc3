use std::collections::HashMap;
use std::rc::Rc;

use crate::kernel::errors::{Error, ErrorSink, Result};
use crate::kernel::scope::{rewrite_defined, rewrite_type, RewriteRef, Scope, ScopeRef};
use crate::kernel::tree::{structural_eq, Kind, Tree, TreeData, TreeRef};
use crate::kernel::types::{Types, UnifyMode};

/// The three outcomes of matching a value against a pattern.
/// When sub-patterns combine, the result is the weaker of the two.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum BindingStrength {
    Failed,
    Possible,
    Perfect,
}

/// One parameter binding produced by a successful match. When `deferred` is
/// set, the call site passes a closure capturing the caller's scope instead
/// of an evaluated value.
#[derive(Clone)]
pub struct Binding {
    pub name: TreeRef,
    pub value: TreeRef,
    pub deferred: bool,
}

/// A residual runtime check attached to a Possible candidate.
#[derive(Clone)]
pub enum Guard {
    /// `value`, evaluated in the caller's scope, must equal `expect`,
    /// evaluated with the bindings visible.
    Equal { value: TreeRef, expect: TreeRef },
    /// A boolean guard evaluated with the bindings visible.
    Condition(TreeRef),
    /// `value`, evaluated in the caller's scope, must have the given kind.
    KindIs { value: TreeRef, kind: Kind },
}

/// A rewrite whose pattern matched a value, possibly conditionally: the
/// substitution, the residual guards, the speculative type context, and the
/// inferred result type. This plain structure is the whole of the contract
/// between the core and any back end.
pub struct RewriteCandidate {
    pub rewrite: RewriteRef,
    /// The scope in which the rewrite was found; bodies evaluate under it.
    pub scope: ScopeRef,
    /// Scratch scope holding the parameter bindings during analysis.
    pub locals: ScopeRef,
    pub bindings: Vec<Binding>,
    pub guards: Vec<Guard>,
    pub btypes: Types,
    pub candidate_type: Option<TreeRef>,
    pub strength: BindingStrength,
    /// Diagnostics buffered while speculating; committed only if chosen.
    pub errors: ErrorSink,
}

/// Evaluation of a value is deferred when it is a braced or indented block,
/// a statement sequence, or a function body. Such arguments are passed as
/// closures, which is the language's lazy-evaluation discipline.
pub fn is_deferred(value: &TreeRef) -> bool {
    if value.is_indent_block() || value.is_brace_block() {
        return true;
    }
    let inner = match value.as_block() {
        Some((child, _, _)) => child,
        None => value,
    };
    matches!(
        inner.as_infix(),
        Some((name, _, _)) if name == ";" || name == "\n" || name == "is"
    )
}

/// Strip precedence blocks and a top-level `as Type` annotation, keeping
/// `when` guards for the binder to process.
fn pattern_without_type(pattern: &TreeRef) -> TreeRef {
    let mut current = pattern.clone();
    loop {
        let next = match &current.data {
            TreeData::Block { child, .. } => child.clone(),
            TreeData::Infix { name, left, .. } if name == "as" => left.clone(),
            _ => return current,
        };
        current = next;
    }
}

/// The name of the builtin a body designates, if it is `builtin Name`.
pub fn builtin_name(body: &TreeRef) -> Option<String> {
    body.prefix_of("builtin")
        .and_then(|name| name.as_name())
        .map(str::to_string)
}

/// Whether a body is an external C declaration, recognized and skipped by
/// the interpreter.
pub fn is_external(body: &TreeRef) -> bool {
    if body.is_name("C") {
        return true;
    }
    body.prefix_of("C").is_some()
}

impl RewriteCandidate {
    /// Attempt to bind `what` to the given rewrite's pattern. Returns the
    /// candidate on any non-Failed outcome, plus the buffered failure
    /// diagnostics when the attempt failed.
    pub fn check(
        rewrite: &RewriteRef,
        scope: &ScopeRef,
        what: &TreeRef,
        vtypes: &mut Types,
    ) -> (Option<RewriteCandidate>, Vec<Error>) {
        let locals = Scope::child(scope);
        let btypes = vtypes.child(locals.clone());
        let mut candidate = RewriteCandidate {
            rewrite: rewrite.clone(),
            scope: scope.clone(),
            locals,
            bindings: Vec::new(),
            guards: Vec::new(),
            btypes,
            candidate_type: None,
            strength: BindingStrength::Failed,
            errors: ErrorSink::new(),
        };

        let pattern = pattern_without_type(&rewrite.pattern);
        let mut strength = candidate.bind(&pattern, what, vtypes);
        if strength == BindingStrength::Failed {
            return (None, candidate.errors.drain());
        }

        match candidate.check_body(rewrite, what, &mut strength) {
            Ok(()) => {}
            Err(error) => {
                candidate.errors.log(error);
                strength = BindingStrength::Failed;
            }
        }
        if strength == BindingStrength::Failed {
            return (None, candidate.errors.drain());
        }

        candidate.strength = strength;
        (Some(candidate), Vec::new())
    }

    /// Typecheck the body against the declared return type, if any, and
    /// record the type of the whole call site.
    fn check_body(
        &mut self,
        rewrite: &RewriteRef,
        what: &TreeRef,
        strength: &mut BindingStrength,
    ) -> Result<()> {
        let body = &rewrite.body;
        let declared = rewrite_type(&rewrite.pattern);
        let mut result_type = match &declared {
            Some(declared) => {
                let t = self.btypes.assign_type(body, Some(declared.clone()))?;
                self.btypes.assign_type(what, Some(t.clone()))?;
                Some(t)
            }
            None => None,
        };

        let primitive = builtin_name(body).is_some() || is_external(body);
        if !primitive {
            // The body's own declarations live one level deeper.
            let body_scope = Scope::child(&self.locals);
            let self_name = self.btypes.primitives().self_name.clone();
            crate::kernel::scope::process_declarations(&body_scope, body, &self_name)?;
            self.btypes = self.btypes.child(body_scope);
            result_type = Some(self.btypes.type_of(body)?);
        } else if result_type.is_none() {
            result_type = Some(self.btypes.new_type_name(body.position));
        }

        if let Some(t) = &result_type {
            let defined = &rewrite.defined;
            self.btypes.assign_type(defined, Some(t.clone()))?;
            let t = self.btypes.assign_type(what, Some(t.clone()))?;
            result_type = Some(t);
        }
        if *strength != BindingStrength::Failed {
            self.candidate_type = result_type;
        }
        Ok(())
    }

    /// Lock-step descent over pattern and value.
    fn bind(&mut self, form: &TreeRef, value: &TreeRef, vtypes: &mut Types) -> BindingStrength {
        match self.bind_inner(form, value, vtypes) {
            Ok(strength) => strength,
            Err(error) => {
                self.errors.log(error);
                BindingStrength::Failed
            }
        }
    }

    fn bind_inner(
        &mut self,
        form: &TreeRef,
        value: &TreeRef,
        vtypes: &mut Types,
    ) -> Result<BindingStrength> {
        use BindingStrength::*;
        match &form.data {
            TreeData::Integer(expected) => {
                if let Some(actual) = value.as_integer() {
                    return Ok(if actual == *expected { Perfect } else { Failed });
                }
                let prim = self.btypes.primitives().integer_type.clone();
                self.bind_constant_guard(form, value, prim, vtypes)
            }
            TreeData::Real(expected) => {
                if let Some(actual) = value.as_real() {
                    return Ok(if actual == *expected { Perfect } else { Failed });
                }
                let prim = self.btypes.primitives().real_type.clone();
                self.bind_constant_guard(form, value, prim, vtypes)
            }
            TreeData::Text { value: expected, .. } => {
                if let Some(actual) = value.as_text() {
                    return Ok(if actual == expected.as_str() { Perfect } else { Failed });
                }
                let prim = self.btypes.primitives().text_type.clone();
                self.bind_constant_guard(form, value, prim, vtypes)
            }
            TreeData::Name(_) => self.bind_name(form, value, vtypes),
            TreeData::Infix { name, left, right } => {
                let (left, right) = (left.clone(), right.clone());
                match name.as_str() {
                    ":" | "as" => self.bind_typed(&left, &right, value, vtypes),
                    "when" => self.bind_guarded(&left, &right, value, vtypes),
                    _ => self.bind_infix(form, name.clone(), &left, &right, value, vtypes),
                }
            }
            TreeData::Prefix { left, right } => {
                if let Some((vleft, vright)) = value.as_prefix() {
                    let (vleft, vright) = (vleft.clone(), vright.clone());
                    return self.bind_binary(left, &vleft, right, &vright, vtypes);
                }
                Ok(Failed)
            }
            TreeData::Postfix { left, right } => {
                if let Some((vleft, vright)) = value.as_postfix() {
                    let (vleft, vright) = (vleft.clone(), vright.clone());
                    return self.bind_binary(right, &vright, left, &vleft, vtypes);
                }
                Ok(Failed)
            }
            TreeData::Block { child, .. } => {
                // Blocks in patterns are significant only for precedence.
                let child = child.clone();
                Ok(self.bind(&child, value, vtypes))
            }
        }
    }

    /// A literal pattern against a non-literal value: the value's type must
    /// unify with the literal's base type, and equality moves to runtime.
    fn bind_constant_guard(
        &mut self,
        form: &TreeRef,
        value: &TreeRef,
        prim: TreeRef,
        vtypes: &mut Types,
    ) -> Result<BindingStrength> {
        let vtype = self.value_type(value, vtypes)?;
        self.unify_candidate(&vtype, &prim, value, UnifyMode::Standard)?;
        self.guards.push(Guard::Equal {
            value: value.clone(),
            expect: form.clone(),
        });
        Ok(BindingStrength::Possible)
    }

    fn bind_name(
        &mut self,
        form: &TreeRef,
        value: &TreeRef,
        vtypes: &mut Types,
    ) -> Result<BindingStrength> {
        use BindingStrength::*;

        // The defined form's own head: an identity, not a parameter.
        if Rc::ptr_eq(form, &self.rewrite.defined) {
            return Ok(if structural_eq(value, form) { Perfect } else { Failed });
        }

        let vtype = self.value_type(value, vtypes)?;

        // A second occurrence of a parameter requires equal values.
        if let Some(first) = Scope::bound(&self.locals, form, false) {
            let first_type = self.value_type(&first, vtypes)?;
            self.unify_candidate(&vtype, &first_type, value, UnifyMode::Standard)?;
            self.guards.push(Guard::Equal {
                value: value.clone(),
                expect: form.clone(),
            });
            return Ok(Possible);
        }

        // A name bound to itself in an enclosing scope (a data form such as
        // `true`) matches that value, not a fresh parameter.
        if let Some(outer) = Scope::bound(&self.locals, form, true) {
            if outer.is_name("self") || structural_eq(&outer, form) {
                if structural_eq(value, form) {
                    return Ok(Perfect);
                }
                let form_type = self.btypes.type_of(form)?;
                self.unify_candidate(&vtype, &form_type, value, UnifyMode::Standard)?;
                self.guards.push(Guard::Equal {
                    value: value.clone(),
                    expect: form.clone(),
                });
                return Ok(Possible);
            }
        }

        // A fresh parameter: bind it, unify its type with the value's.
        let form_type = self.btypes.type_of(form)?;
        self.unify_candidate(&vtype, &form_type, value, UnifyMode::Standard)?;
        self.locals.define(form.clone(), value.clone())?;
        self.bindings.push(Binding {
            name: form.clone(),
            value: value.clone(),
            deferred: is_deferred(value),
        });
        Ok(Perfect)
    }

    /// `Parameter : Type` or `Parameter as Type`: bind, then unify the
    /// value's type with the declared one in declaration mode.
    fn bind_typed(
        &mut self,
        parameter: &TreeRef,
        declared: &TreeRef,
        value: &TreeRef,
        vtypes: &mut Types,
    ) -> Result<BindingStrength> {
        let declared_type = self
            .btypes
            .assign_type(parameter, Some(declared.clone()))?;
        if self.bind(parameter, value, vtypes) == BindingStrength::Failed {
            return Ok(BindingStrength::Failed);
        }
        let value_type = self.btypes.type_of(value)?;
        self.unify_candidate(&value_type, &declared_type, value, UnifyMode::Declaration)?;
        Ok(if self.guards.is_empty() {
            BindingStrength::Perfect
        } else {
            BindingStrength::Possible
        })
    }

    /// `Pattern when Guard`: bind the pattern, typecheck the guard as
    /// boolean, and leave the guard as a runtime condition.
    fn bind_guarded(
        &mut self,
        pattern: &TreeRef,
        guard: &TreeRef,
        value: &TreeRef,
        vtypes: &mut Types,
    ) -> Result<BindingStrength> {
        if self.bind(pattern, value, vtypes) == BindingStrength::Failed {
            return Ok(BindingStrength::Failed);
        }
        let guard_type = self.btypes.type_of(guard)?;
        let boolean = self.btypes.primitives().boolean_type.clone();
        self.btypes
            .unify(&guard_type, &boolean, UnifyMode::Standard)?;
        self.guards.push(Guard::Condition(guard.clone()));
        Ok(BindingStrength::Possible)
    }

    fn bind_infix(
        &mut self,
        form: &TreeRef,
        name: String,
        left: &TreeRef,
        right: &TreeRef,
        value: &TreeRef,
        vtypes: &mut Types,
    ) -> Result<BindingStrength> {
        use BindingStrength::*;

        // Structural split when the value is an infix of the same name.
        if let Some((vname, vleft, vright)) = value.as_infix() {
            if vname == name {
                let (vleft, vright) = (vleft.clone(), vright.clone());
                let bound_left = self.bind(left, &vleft, vtypes);
                if bound_left == Failed {
                    return Ok(Failed);
                }
                let bound_right = self.bind(right, &vright, vtypes);
                return Ok(bound_left.min(bound_right));
            }
        }

        // The value may still evaluate to an infix of that name: require it
        // at runtime and deconstruct the value there.
        let vtype = self.btypes.type_of(value)?;
        let infix_type = self.btypes.primitives().infix_type.clone();
        self.unify_candidate(&vtype, &infix_type, value, UnifyMode::Standard)?;

        let position = form.position;
        let left_value = Tree::prefix(Tree::name("left", position), value.clone(), position);
        let bound_left = self.bind(left, &left_value, vtypes);
        if bound_left == Failed {
            return Ok(Failed);
        }
        let right_value = Tree::prefix(Tree::name("right", position), value.clone(), position);
        let bound_right = self.bind(right, &right_value, vtypes);
        if bound_right == Failed {
            return Ok(Failed);
        }

        let name_value = Tree::prefix(Tree::name("name", position), value.clone(), position);
        self.btypes.type_of(&name_value)?;
        let required = Tree::text(&name, "\"", "\"", position);
        self.btypes.type_of(&required)?;
        self.guards.push(Guard::Equal {
            value: name_value,
            expect: required,
        });

        Ok(bound_left.min(bound_right).min(Possible))
    }

    /// Prefix and postfix patterns: the operand side must be the same name,
    /// then the other side binds.
    fn bind_binary(
        &mut self,
        form_op: &TreeRef,
        value_op: &TreeRef,
        form_arg: &TreeRef,
        value_arg: &TreeRef,
        vtypes: &mut Types,
    ) -> Result<BindingStrength> {
        let form_name = match form_op.as_name() {
            Some(name) => name,
            None => return Ok(BindingStrength::Failed),
        };
        match value_op.as_name() {
            Some(value_name) if value_name == form_name => {}
            _ => return Ok(BindingStrength::Failed),
        }
        Ok(self.bind(form_arg, value_arg, vtypes))
    }

    /// The value's type in the caller's context, adopted into the
    /// candidate's own context.
    fn value_type(&mut self, value: &TreeRef, vtypes: &mut Types) -> Result<TreeRef> {
        let t = vtypes.type_of(value)?;
        self.btypes.adopt(value, vtypes);
        Ok(t)
    }

    /// Unify, except around the `tree` type: a value declared as `tree`
    /// gets a runtime kind check instead of a compile-time equation, and a
    /// parameter declared as `tree` accepts any value outright.
    fn unify_candidate(
        &mut self,
        value_type: &TreeRef,
        form_type: &TreeRef,
        value: &TreeRef,
        mode: UnifyMode,
    ) -> Result<()> {
        let ref_type = self.btypes.declared_type_name(value_type)?;
        let form_ref = self.btypes.declared_type_name(form_type)?;
        if form_ref.is_name("tree") && !ref_type.is_name("tree") {
            return Ok(());
        }
        if ref_type.is_name("tree") {
            let kind = if form_ref.is_name("integer") {
                Some(Kind::Integer)
            } else if form_ref.is_name("real") {
                Some(Kind::Real)
            } else if form_ref.is_name("text") {
                Some(Kind::Text)
            } else if form_ref.is_name("name") || form_ref.is_name("boolean") {
                Some(Kind::Name)
            } else if form_ref.is_name("block") {
                Some(Kind::Block)
            } else if form_ref.is_name("infix") {
                Some(Kind::Infix)
            } else if form_ref.is_name("prefix") {
                Some(Kind::Prefix)
            } else if form_ref.is_name("postfix") {
                Some(Kind::Postfix)
            } else {
                None
            };
            if let Some(kind) = kind {
                self.guards.push(Guard::KindIs {
                    value: value.clone(),
                    kind,
                });
                return Ok(());
            }
        }
        self.btypes.unify(value_type, form_type, mode)
    }

    /// The memoization key a compiling back end uses for specializations:
    /// the rule plus the concrete argument types. Recursive calls that
    /// bottom out in the same key share one specialization.
    pub fn specialization_key(&mut self) -> SpecializationKey {
        let mut argument_types = Vec::new();
        for binding in &self.bindings.clone() {
            let name = match self.btypes.type_of(&binding.value) {
                Ok(t) => {
                    let base = self.btypes.base(&t);
                    format!("{}", base)
                }
                Err(_) => "tree".to_string(),
            };
            argument_types.push(name);
        }
        SpecializationKey {
            rule: Rc::as_ptr(&self.rewrite) as usize,
            argument_types,
        }
    }
}

/// The key under which a compiling back end memoizes specializations.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SpecializationKey {
    pub rule: usize,
    pub argument_types: Vec<String>,
}

/// Substitute a candidate's bindings into a pattern. For a Perfect match,
/// substituting the bindings into the pattern yields the bound value back.
pub fn substitute(pattern: &TreeRef, bindings: &[Binding]) -> TreeRef {
    let mut map = HashMap::new();
    for binding in bindings {
        if let Some(name) = binding.name.as_name() {
            map.insert(name.to_string(), binding.value.clone());
        }
    }
    substitute_map(&rewrite_defined(pattern), &map)
}

fn substitute_map(pattern: &TreeRef, map: &HashMap<String, TreeRef>) -> TreeRef {
    match &pattern.data {
        TreeData::Name(name) => match map.get(name) {
            Some(value) => value.clone(),
            None => pattern.clone(),
        },
        // Type annotations and guards qualify the pattern; the substituted
        // value takes their place wholesale.
        TreeData::Infix { name, left, .. } if name == ":" || name == "as" || name == "when" => {
            substitute_map(left, map)
        }
        TreeData::Infix { name, left, right } => Tree::infix(
            name,
            substitute_map(left, map),
            substitute_map(right, map),
            pattern.position,
        ),
        TreeData::Prefix { left, right } => Tree::prefix(
            substitute_map(left, map),
            substitute_map(right, map),
            pattern.position,
        ),
        TreeData::Postfix { left, right } => Tree::postfix(
            substitute_map(left, map),
            substitute_map(right, map),
            pattern.position,
        ),
        TreeData::Block {
            child,
            opening,
            closing,
        } => Tree::block(substitute_map(child, map), opening, closing, pattern.position),
        _ => pattern.clone(),
    }
}
