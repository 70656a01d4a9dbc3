use std::cell::{Cell, RefCell};
use std::rc::Rc;

use im::HashMap as SnapshotMap;

use crate::kernel::dispatch::{self, RewriteCalls};
use crate::kernel::errors::{Error, Result};
use crate::kernel::scope::{Scope, ScopeRef};
use crate::kernel::tree::{
    structural_eq, Kind, Position, Primitives, Tree, TreeData, TreeKey, TreeRef,
};

/// Unification mode. In declaration mode a declared type may only narrow
/// generic variables; a non-generic cannot be rewritten to a different,
/// narrower non-generic.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnifyMode {
    Standard,
    Declaration,
}

/// Damas-Milner-style inference over tree-shaped types.
///
/// Each expression node gets a type tree; unification records equations in
/// the `unifications` map and `base` follows them to a fixed point. The maps
/// are persistent so a speculative child (one per rewrite candidate) is a
/// cheap snapshot that the dispatcher can adopt or drop wholesale.
pub struct Types {
    scope: ScopeRef,
    prims: Rc<Primitives>,
    types: SnapshotMap<TreeKey, TreeRef>,
    unifications: SnapshotMap<TreeKey, TreeRef>,
    rcalls: SnapshotMap<TreeKey, Rc<RefCell<RewriteCalls>>>,
    counter: Rc<Cell<u64>>,
    /// Prototyping a pattern: expressions are typed but never evaluated.
    pub prototyping: bool,
    /// Matching a pattern against a value shape.
    pub matching: bool,
}

impl Clone for Types {
    fn clone(&self) -> Types {
        Types {
            scope: self.scope.clone(),
            prims: self.prims.clone(),
            types: self.types.clone(),
            unifications: self.unifications.clone(),
            rcalls: self.rcalls.clone(),
            counter: self.counter.clone(),
            prototyping: false,
            matching: false,
        }
    }
}

/// Generic type variables are minted with a `#` prefix; the scanner cannot
/// produce such names, so user code never collides with them.
pub fn is_generic(tree: &TreeRef) -> bool {
    matches!(tree.as_name(), Some(name) if name.starts_with('#'))
}

/// A named, non-generic type.
pub fn is_type_name(tree: &TreeRef) -> bool {
    matches!(tree.as_name(), Some(name) if !name.starts_with('#') && !name.is_empty())
}

impl Types {
    pub fn new(scope: ScopeRef, prims: Rc<Primitives>) -> Types {
        Types {
            scope,
            prims,
            types: SnapshotMap::new(),
            unifications: SnapshotMap::new(),
            rcalls: SnapshotMap::new(),
            counter: Rc::new(Cell::new(0)),
            prototyping: false,
            matching: false,
        }
    }

    /// A child inference context: same knowledge, possibly narrower scope.
    /// Used for each rewrite candidate so speculation stays isolated.
    pub fn child(&self, scope: ScopeRef) -> Types {
        let mut child = self.clone();
        child.scope = scope;
        child
    }

    pub fn scope(&self) -> &ScopeRef {
        &self.scope
    }

    pub fn primitives(&self) -> &Rc<Primitives> {
        &self.prims
    }

    /// Mint a fresh generic type name: #A, #B, ... #AA ...
    pub fn new_type_name(&mut self, position: Position) -> TreeRef {
        let mut v = self.counter.get();
        self.counter.set(v + 1);
        let mut name = String::new();
        loop {
            name.insert(0, (b'A' + (v % 26) as u8) as char);
            v /= 26;
            if v == 0 {
                break;
            }
            v -= 1;
        }
        Tree::name(&format!("#{}", name), position)
    }

    /// The base type of an expression, computing it on first request.
    pub fn type_of(&mut self, expr: &TreeRef) -> Result<TreeRef> {
        let key = TreeKey::of(expr);
        if self.types.get(&key).is_none() {
            if expr.kind() == Kind::Name {
                self.assign_type(expr, None)?;
            } else {
                self.do_tree(expr)?;
                if self.types.get(&key).is_none() {
                    self.assign_type(expr, None)?;
                }
            }
        }
        let t = self.types.get(&key).unwrap().clone();
        Ok(self.base(&t))
    }

    /// Attach a type to an expression, minting a fresh generic when no type
    /// is given. A second assignment unifies with the first.
    pub fn assign_type(&mut self, expr: &TreeRef, tree_type: Option<TreeRef>) -> Result<TreeRef> {
        let key = TreeKey::of(expr);
        if let Some(existing) = self.types.get(&key).cloned() {
            if let Some(given) = tree_type {
                if !Rc::ptr_eq(&existing, &given) {
                    self.unify(&existing, &given, UnifyMode::Standard)?;
                }
            }
            return Ok(existing);
        }
        let assigned = match tree_type {
            Some(given) => given,
            None => {
                if expr.is_name("true") || expr.is_name("false") {
                    self.prims.boolean_type.clone()
                } else {
                    self.new_type_name(expr.position)
                }
            }
        };
        self.types.insert(key, assigned.clone());
        Ok(assigned)
    }

    /// The canonical type of a constant.
    pub fn canonical_type(&self, expr: &TreeRef) -> TreeRef {
        self.prims.type_for_kind(expr.kind()).clone()
    }

    /// Walk an expression, assigning types and inferring from candidate
    /// rewrites at every call site.
    pub fn do_tree(&mut self, expr: &TreeRef) -> Result<()> {
        match &expr.data {
            TreeData::Integer(_) | TreeData::Real(_) | TreeData::Text { .. } => {
                let canonical = self.canonical_type(expr);
                self.assign_type(expr, Some(canonical))?;
                self.evaluate(expr)
            }
            TreeData::Name(_) => {
                self.assign_type(expr, None)?;
                self.evaluate(expr)
            }
            TreeData::Prefix { left, right } => {
                self.assign_type(expr, None)?;
                if let Some(head) = left.as_name() {
                    if head == "data" {
                        let canonical = self.canonical_type(right);
                        self.assign_type(right, Some(canonical))?;
                        let declaration = self.prims.declaration_type.clone();
                        self.assign_type(expr, Some(declaration))?;
                        return Ok(());
                    }
                }
                self.evaluate(expr)
            }
            TreeData::Postfix { .. } => {
                self.assign_type(expr, None)?;
                self.evaluate(expr)
            }
            TreeData::Infix { name, left, right } => match name.as_str() {
                "\n" | ";" => {
                    self.assign_type(expr, None)?;
                    let (left, right) = (left.clone(), right.clone());
                    self.statements(expr, &left, &right)
                }
                ":" | "as" => {
                    let (left, right) = (left.clone(), right.clone());
                    self.assign_type(&left, Some(right))?;
                    self.do_tree(&left)?;
                    self.assign_type(expr, None)?;
                    self.unify_expression_types(expr, &left)
                }
                "is" => {
                    let (left, right) = (left.clone(), right.clone());
                    self.do_rewrite(expr, &left, &right)
                }
                _ => {
                    self.assign_type(expr, None)?;
                    self.evaluate(expr)
                }
            },
            TreeData::Block { child, .. } => {
                self.assign_type(expr, None)?;
                let child = child.clone();
                if self.do_tree(&child).is_ok() {
                    self.unify_expression_types(expr, &child)
                } else {
                    self.evaluate(expr)
                }
            }
        }
    }

    /// Type a rewrite declaration: pattern and body must unify, and the
    /// whole form is a declaration. Bodies are typed in prototyping mode;
    /// their call sites are analyzed when the rewrite is actually bound.
    fn do_rewrite(&mut self, expr: &TreeRef, pattern: &TreeRef, body: &TreeRef) -> Result<()> {
        let saved_scope = self.scope.clone();
        let saved_proto = self.prototyping;
        self.scope = Scope::child(&saved_scope);
        self.prototyping = true;

        let result = self.do_rewrite_inner(expr, pattern, body);

        self.scope = saved_scope;
        self.prototyping = saved_proto;
        result
    }

    fn do_rewrite_inner(&mut self, expr: &TreeRef, pattern: &TreeRef, body: &TreeRef) -> Result<()> {
        self.do_tree(pattern).map_err(|_| {
            Error::typing(
                format!("malformed rewrite pattern '{}'", pattern),
                pattern.position,
            )
        })?;
        let form_type = self.type_of(pattern)?;
        let value_type = self.type_of(body)?;
        let declaration = self.prims.declaration_type.clone();
        self.assign_type(expr, Some(declaration))?;
        self.unify(&value_type, &form_type, UnifyMode::Standard)?;
        if let Some((name, _, declared)) = pattern.as_infix() {
            if name == ":" || name == "as" {
                let declared = declared.clone();
                self.unify(&value_type, &declared, UnifyMode::Standard)?;
            }
        }
        Ok(())
    }

    /// The type of a sequence is the type of its last non-declaration part.
    fn statements(&mut self, expr: &TreeRef, left: &TreeRef, right: &TreeRef) -> Result<()> {
        self.do_tree(left)?;
        self.do_tree(right)?;
        let right_type = self.type_of(right)?;
        let result = if structural_eq(&right_type, &self.prims.declaration_type) {
            self.type_of(left)?
        } else {
            right_type
        };
        let expr_type = self.type_of(expr)?;
        self.unify(&expr_type, &result, UnifyMode::Standard)
    }

    /// Both expressions must have identical types.
    pub fn unify_expression_types(&mut self, expr1: &TreeRef, expr2: &TreeRef) -> Result<()> {
        let t1 = self.type_of(expr1)?;
        let t2 = self.type_of(expr2)?;
        if Rc::ptr_eq(&t1, &t2) {
            return Ok(());
        }
        self.unify(&t1, &t2, UnifyMode::Standard)
    }

    /// Find candidate rewrites for an expression and infer its type from
    /// them. The per-node memo both caches and breaks recursive cycles.
    pub fn evaluate(&mut self, expr: &TreeRef) -> Result<()> {
        if self.prototyping {
            return Ok(());
        }
        let matching = std::mem::replace(&mut self.matching, false);

        let mut what = expr.clone();
        loop {
            let child = match what.as_block() {
                Some((child, _, _)) => child.clone(),
                None => break,
            };
            what = child;
        }

        let key = TreeKey::of(&what);
        if self.rcalls.get(&key).is_some() {
            return Ok(());
        }
        let calls = Rc::new(RefCell::new(RewriteCalls::new()));
        self.rcalls.insert(key, calls.clone());

        dispatch::enumerate(self, &what, &calls)?;

        let count = calls.borrow().candidates.len();
        if count == 0 {
            // A constant with no rewrite is its own witness.
            if what.is_constant() {
                let wtype = self.type_of(&what)?;
                return self.unify(&wtype, &what, UnifyMode::Standard);
            }
            if matching && !what.is_leaf() {
                let wtype = self.type_of(&what)?;
                return self.unify(&wtype, &what, UnifyMode::Standard);
            }
            return Err(Error::binding(
                format!("no form matches '{}'", what),
                what.position,
            ));
        }

        // The resulting type is the union of all the candidates'.
        let mut result = {
            let first = calls.borrow().candidates[0].candidate_type.clone();
            match first {
                Some(t) => self.base(&t),
                None => self.new_type_name(what.position),
            }
        };
        let wtype = self.type_of(&what)?;
        for index in 1..count {
            let ctype = calls.borrow().candidates[index].candidate_type.clone();
            let ctype = match ctype {
                Some(t) => self.base(&t),
                None => continue,
            };
            if is_generic(&ctype) && is_generic(&wtype) {
                self.join(&ctype, &result, false)?;
                self.join(&wtype, &result, false)?;
                continue;
            }
            result = self.union_type(&result, &ctype);
        }
        self.unify(&result, &wtype, UnifyMode::Declaration)
    }

    /// The union of two types; equal types collapse, others join with `|`.
    fn union_type(&mut self, t1: &TreeRef, t2: &TreeRef) -> TreeRef {
        let b1 = self.base(t1);
        let b2 = self.base(t2);
        if Rc::ptr_eq(&b1, &b2) || structural_eq(&b1, &b2) {
            return b1;
        }
        Tree::infix("|", b1, b2.clone(), b2.position)
    }

    /// Adopt another context's knowledge about one expression: its type
    /// and its candidate record, reaching through precedence blocks.
    pub fn adopt(&mut self, expr: &TreeRef, other: &Types) {
        let mut node = Some(expr.clone());
        while let Some(current) = node {
            let key = TreeKey::of(&current);
            if let Some(t) = other.types.get(&key) {
                self.types.insert(key.clone(), t.clone());
            }
            if let Some(calls) = other.rcalls.get(&key) {
                self.rcalls.insert(key.clone(), calls.clone());
            }
            node = current.as_block().map(|(child, _, _)| child.clone());
        }
    }

    /// The recorded candidate rewrites for a call site, if any.
    pub fn rewrite_calls_for(&self, expr: &TreeRef) -> Option<Rc<RefCell<RewriteCalls>>> {
        let mut what = expr.clone();
        loop {
            let child = match what.as_block() {
                Some((child, _, _)) => child.clone(),
                None => break,
            };
            what = child;
        }
        self.rcalls.get(&TreeKey::of(&what)).cloned()
    }

    /// Unify two type trees, possibly binding generic variables.
    pub fn unify(&mut self, t1: &TreeRef, t2: &TreeRef, mode: UnifyMode) -> Result<()> {
        let t1 = self.base(t1);
        let t2 = self.base(t2);
        if Rc::ptr_eq(&t1, &t2) {
            return Ok(());
        }

        // Precedence blocks in type positions are transparent.
        if let Some((child, _, _)) = t1.as_block() {
            let child = child.clone();
            self.unify(&child, &t2, mode)?;
            return self.join(&t1, &t2, false);
        }
        if let Some((child, _, _)) = t2.as_block() {
            let child = child.clone();
            self.unify(&t1, &child, mode)?;
            return self.join(&t1, &t2, false);
        }

        // Type names may stand for richer definitions.
        let t1 = self.lookup_type_name(&t1)?;
        let t2 = self.lookup_type_name(&t2)?;
        if Rc::ptr_eq(&t1, &t2) || structural_eq(&t1, &t2) {
            return self.join(&t1, &t2, false);
        }

        if is_generic(&t1) || is_generic(&t2) {
            return self.join(&t1, &t2, false);
        }

        // In declaration mode, success if the declared type covers the value.
        if mode == UnifyMode::Declaration && self.type_covers(&t2, &t1) {
            return Ok(());
        }

        if is_type_name(&t1) {
            if self.join_constant(&t1, &t2)? {
                return Ok(());
            }
            return self.type_error(&t1, &t2);
        }
        if is_type_name(&t2) {
            if self.join_constant(&t2, &t1)? {
                return Ok(());
            }
            return self.type_error(&t1, &t2);
        }

        // Shape-based constructor types: type (X:integer, Y:integer)
        if let Some(pattern1) = type_pattern(&t1) {
            if let Some(pattern2) = type_pattern(&t2) {
                if unify_patterns(&pattern1, &pattern2) {
                    return self.join(&t1, &t2, false);
                }
                return self.type_error(&t1, &t2);
            }
            if self.unify_pattern_and_value(&pattern1, &t2)? {
                return self.join(&t1, &t2, false);
            }
            return self.type_error(&t1, &t2);
        }
        if let Some(pattern2) = type_pattern(&t2) {
            if self.unify_pattern_and_value(&pattern2, &t1)? {
                return self.join(&t1, &t2, false);
            }
            return self.type_error(&t1, &t2);
        }

        self.type_error(&t1, &t2)
    }

    /// Whether `covering` accepts any value of type `covered`.
    fn type_covers(&mut self, covering: &TreeRef, covered: &TreeRef) -> bool {
        if structural_eq(covering, covered) {
            return true;
        }
        if covering.is_name("tree") {
            return true;
        }
        // A union covers each of its branches.
        if let Some((name, left, right)) = covering.as_infix() {
            if name == "|" {
                let (left, right) = (left.clone(), right.clone());
                return self.type_covers(&left, covered) || self.type_covers(&right, covered);
            }
        }
        false
    }

    /// Follow the unification chain to its fixed point, compressing the
    /// path so later lookups are direct.
    pub fn base(&mut self, tree_type: &TreeRef) -> TreeRef {
        let mut resolved = tree_type.clone();
        let mut steps = 0usize;
        while let Some(next) = self.unifications.get(&TreeKey::of(&resolved)).cloned() {
            resolved = next;
            steps += 1;
            debug_assert!(steps < 1_000_000, "circularity in unification chain");
        }
        // Point every element of the chain at the fixed point.
        let mut chain = tree_type.clone();
        while !Rc::ptr_eq(&chain, &resolved) {
            let next = self
                .unifications
                .get(&TreeKey::of(&chain))
                .cloned()
                .unwrap();
            self.unifications
                .insert(TreeKey::of(&chain), resolved.clone());
            chain = next;
        }
        resolved
    }

    /// Use `base` as the reference type for `other`.
    fn join(&mut self, base: &TreeRef, other: &TreeRef, known_good: bool) -> Result<()> {
        let mut base = base.clone();
        let mut other = other.clone();
        if !known_good {
            // Prefer a type name as the reference, and never leave a generic
            // as the reference when something concrete is available.
            if is_type_name(&other) && !is_type_name(&base) {
                std::mem::swap(&mut base, &mut other);
            } else if is_generic(&base) {
                std::mem::swap(&mut base, &mut other);
            }
        }
        let base = self.base(&base);
        let other = self.base(&other);
        if !Rc::ptr_eq(&base, &other) {
            self.unifications.insert(TreeKey::of(&other), base);
        }
        Ok(())
    }

    /// Join a literal constant with a type name.
    /// Returns whether the join was possible.
    fn join_constant(&mut self, type_name: &TreeRef, constant: &TreeRef) -> Result<bool> {
        match constant.kind() {
            Kind::Integer => {
                if type_name.is_name("integer") {
                    self.join(type_name, constant, true)?;
                    return Ok(true);
                }
                let integer = self.prims.integer_type.clone();
                if self.unify(&integer, type_name, UnifyMode::Standard).is_err() {
                    return Ok(false);
                }
                self.join(&integer, constant, false)?;
                Ok(true)
            }
            Kind::Real => {
                if type_name.is_name("real") {
                    self.join(type_name, constant, true)?;
                    return Ok(true);
                }
                let real = self.prims.real_type.clone();
                if self.unify(&real, type_name, UnifyMode::Standard).is_err() {
                    return Ok(false);
                }
                self.join(&real, constant, false)?;
                Ok(true)
            }
            Kind::Text => {
                if type_name.is_name("text") {
                    self.join(type_name, constant, true)?;
                    return Ok(true);
                }
                let text = self.prims.text_type.clone();
                if self.unify(&text, type_name, UnifyMode::Standard).is_err() {
                    return Ok(false);
                }
                self.join(&text, constant, false)?;
                Ok(true)
            }
            _ => Ok(structural_eq(type_name, &self.canonical_type(constant))),
        }
    }

    /// Match a shape pattern against a type value. A name in the pattern is
    /// a variable whose type unifies with the value's.
    fn unify_pattern_and_value(&mut self, pattern: &TreeRef, value: &TreeRef) -> Result<bool> {
        match &pattern.data {
            TreeData::Integer(x) => Ok(value.as_integer() == Some(*x)),
            TreeData::Real(x) => Ok(value.as_real() == Some(*x)),
            TreeData::Text { value: x, .. } => Ok(value.as_text() == Some(x.as_str())),
            TreeData::Name(_) => {
                self.unify_expression_types(pattern, value)?;
                Ok(true)
            }
            TreeData::Infix { name, left, right } => {
                if name == ":" {
                    let right = right.clone();
                    let _ = left;
                    self.unify(&right, value, UnifyMode::Standard)?;
                    return Ok(true);
                }
                if let Some((vname, vleft, vright)) = value.as_infix() {
                    let (left, right) = (left.clone(), right.clone());
                    let (vleft, vright) = (vleft.clone(), vright.clone());
                    return Ok(name == vname
                        && self.unify_pattern_and_value(&left, &vleft)?
                        && self.unify_pattern_and_value(&right, &vright)?);
                }
                Ok(false)
            }
            TreeData::Prefix { left, right } => {
                if let Some((vleft, vright)) = value.as_prefix() {
                    let (right, vright) = (right.clone(), vright.clone());
                    return Ok(unify_patterns(left, vleft)
                        && self.unify_pattern_and_value(&right, &vright)?);
                }
                Ok(false)
            }
            TreeData::Postfix { left, right } => {
                if let Some((vleft, vright)) = value.as_postfix() {
                    let (left, vleft) = (left.clone(), vleft.clone());
                    return Ok(self.unify_pattern_and_value(&left, &vleft)?
                        && unify_patterns(right, vright));
                }
                Ok(false)
            }
            TreeData::Block {
                child,
                opening,
                closing,
            } => {
                if let Some((vchild, vopening, vclosing)) = value.as_block() {
                    let (child, vchild) = (child.clone(), vchild.clone());
                    return Ok(opening == vopening
                        && closing == vclosing
                        && self.unify_pattern_and_value(&child, &vchild)?);
                }
                Ok(false)
            }
        }
    }

    /// Replace a type name by its definition, recording the equation.
    fn lookup_type_name(&mut self, tree_type: &TreeRef) -> Result<TreeRef> {
        if is_type_name(tree_type) {
            if let Some(definition) = Scope::bound(&self.scope, tree_type, true) {
                if !Rc::ptr_eq(&definition, tree_type)
                    && !structural_eq(&definition, tree_type)
                    && !definition.is_name("self")
                {
                    self.join(&definition, tree_type, false)?;
                    return Ok(self.base(&definition));
                }
            }
        }
        Ok(tree_type.clone())
    }

    /// The base name of a type after resolving its definition, when it has
    /// one. Used to detect `tree` and kindred primitive declarations.
    pub fn declared_type_name(&mut self, tree_type: &TreeRef) -> Result<TreeRef> {
        let base = self.base(tree_type);
        self.lookup_type_name(&base)
    }

    fn type_error(&self, t1: &TreeRef, t2: &TreeRef) -> Result<()> {
        Err(Error::typing(
            format!("cannot unify type '{}' with '{}'", t1, t2),
            if t1.position != crate::kernel::tree::NOWHERE {
                t1.position
            } else {
                t2.position
            },
        ))
    }
}

/// Check if a type is a shape pattern, i.e. `type (...)`.
pub fn type_pattern(tree_type: &TreeRef) -> Option<TreeRef> {
    tree_type.prefix_of("type").cloned()
}

/// Two patterns describe the same tree shape. Names must match exactly;
/// renamings are not attempted.
pub fn unify_patterns(t1: &TreeRef, t2: &TreeRef) -> bool {
    if Rc::ptr_eq(t1, t2) {
        return true;
    }
    match (&t1.data, &t2.data) {
        (TreeData::Integer(x), TreeData::Integer(y)) => x == y,
        (TreeData::Real(x), TreeData::Real(y)) => x == y,
        (TreeData::Text { value: x, .. }, TreeData::Text { value: y, .. }) => x == y,
        (TreeData::Name(x), TreeData::Name(y)) => x == y,
        (
            TreeData::Infix {
                name: n1,
                left: l1,
                right: r1,
            },
            TreeData::Infix {
                name: n2,
                left: l2,
                right: r2,
            },
        ) => n1 == n2 && unify_patterns(l1, l2) && unify_patterns(r1, r2),
        (
            TreeData::Prefix { left: l1, right: r1 },
            TreeData::Prefix { left: l2, right: r2 },
        ) => unify_patterns(l1, l2) && unify_patterns(r1, r2),
        (
            TreeData::Postfix { left: l1, right: r1 },
            TreeData::Postfix { left: l2, right: r2 },
        ) => unify_patterns(l1, l2) && unify_patterns(r1, r2),
        (
            TreeData::Block {
                child: c1,
                opening: o1,
                closing: z1,
            },
            TreeData::Block {
                child: c2,
                opening: o2,
                closing: z2,
            },
        ) => o1 == o2 && z1 == z2 && unify_patterns(c1, c2),
        _ => false,
    }
}
