use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::kernel::errors::{Error, Result};
use crate::kernel::tree::{structural_eq, Kind, Position, Tree, TreeData, TreeRef};

/// Infix name used when a scope is projected to a tree.
pub const SCOPE_NAME: &str = "scope";

/// A rewrite rule `Pattern is Body`. The pattern may still carry `when`
/// guards and `as` return types; `defined` is the stripped shape that the
/// hash and the dispatcher key on.
pub struct Rewrite {
    pub pattern: TreeRef,
    pub body: TreeRef,
    pub defined: TreeRef,
    pub hash: u64,
    pub position: Position,
}

pub type RewriteRef = Rc<Rewrite>;

/// One node of the binary rule tree. Each bit of a pattern's shape hash
/// selects the left or right child at the corresponding depth.
struct RuleNode {
    rewrite: RewriteRef,
    left: Option<Box<RuleNode>>,
    right: Option<Box<RuleNode>>,
}

/// A scope is a plain record: rewrites of its own plus a reference to the
/// enclosing scope. Children reference parents, never the other way around,
/// so the chain cannot cycle. The record projects itself to a tree when the
/// language introspects its own environment.
pub struct Scope {
    parent: Option<ScopeRef>,
    rules: RefCell<Option<Box<RuleNode>>>,
    kinds: Cell<u32>,
    position: Position,
}

pub type ScopeRef = Rc<Scope>;

/// Shape-sensitive hash: the kind and the principal name of a form.
/// Forms that could rewrite to each other hash identically.
pub fn shape_hash(tree: &TreeRef) -> u64 {
    let kind = tree.kind();
    let mut h = 0xC0DEDu64.wrapping_add(0x2991_2837u64.wrapping_mul(kind as u64));
    match &tree.data {
        TreeData::Integer(v) => h = h.wrapping_add(*v as u64),
        TreeData::Real(v) => h = h.wrapping_add(v.to_bits()),
        TreeData::Text { value, .. } => h = h.wrapping_add(hash_text(value)),
        TreeData::Name(value) => h = h.wrapping_add(hash_text(value)),
        TreeData::Block { opening, .. } => h = h.wrapping_add(hash_text(opening)),
        TreeData::Infix { name, .. } => h = h.wrapping_add(hash_text(name)),
        TreeData::Prefix { left, .. } => {
            if let Some(name) = left.as_name() {
                h = h.wrapping_add(hash_text(name));
            }
        }
        TreeData::Postfix { right, .. } => {
            if let Some(name) = right.as_name() {
                h = h.wrapping_add(hash_text(name));
            }
        }
    }
    h
}

fn hash_text(text: &str) -> u64 {
    let mut h = 0u64;
    for byte in text.bytes().take(8) {
        h = h.wrapping_mul(0x301) ^ byte as u64;
    }
    h
}

/// Consume one bit of the hash per level of the rule tree.
pub fn rehash(h: u64) -> u64 {
    h.rotate_right(1)
}

/// What a pattern actually defines: strip precedence blocks, `when` guards
/// and `as`/`:` type annotations down to the bare shape.
pub fn rewrite_defined(pattern: &TreeRef) -> TreeRef {
    let mut current = pattern.clone();
    loop {
        let next = match &current.data {
            TreeData::Block { child, .. } => child.clone(),
            TreeData::Infix { name, left, .. }
                if name == "when" || name == "as" || name == ":" =>
            {
                left.clone()
            }
            _ => return current,
        };
        current = next;
    }
}

/// The declared return type of a pattern, if it carries `as Type` at the top
/// (possibly under blocks).
pub fn rewrite_type(pattern: &TreeRef) -> Option<TreeRef> {
    let mut current = pattern.clone();
    loop {
        match &current.data {
            TreeData::Block { child, .. } => current = child.clone(),
            TreeData::Infix { name, right, .. } if name == "as" => {
                return Some(right.clone())
            }
            _ => return None,
        }
    }
}

/// Pattern variables must be names. Operator positions in prefix and postfix
/// forms are exempt since they hold the operator symbol itself.
fn validate_names(form: &TreeRef) -> Result<()> {
    match &form.data {
        TreeData::Integer(_) | TreeData::Real(_) | TreeData::Text { .. } => Ok(()),
        TreeData::Name(value) => {
            if !value.is_empty() && !value.chars().next().unwrap().is_alphabetic() {
                return Err(Error::binding(
                    format!("the pattern variable '{}' is not a name", value),
                    form.position,
                ));
            }
            Ok(())
        }
        TreeData::Infix { left, right, .. } => {
            validate_names(left)?;
            validate_names(right)
        }
        TreeData::Prefix { left, right } => {
            if left.kind() != Kind::Name {
                validate_names(left)?;
            }
            validate_names(right)
        }
        TreeData::Postfix { left, right } => {
            if right.kind() != Kind::Name {
                validate_names(right)?;
            }
            validate_names(left)
        }
        TreeData::Block { child, .. } => validate_names(child),
    }
}

impl Scope {
    /// A top-level scope with no enclosing environment.
    pub fn root() -> ScopeRef {
        Rc::new(Scope {
            parent: None,
            rules: RefCell::new(None),
            kinds: Cell::new(0),
            position: crate::kernel::tree::NOWHERE,
        })
    }

    /// Push a new inner scope enclosed by `parent`.
    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(Scope {
            parent: Some(parent.clone()),
            rules: RefCell::new(None),
            kinds: Cell::new(0),
            position: crate::kernel::tree::NOWHERE,
        })
    }

    pub fn parent(&self) -> Option<&ScopeRef> {
        self.parent.as_ref()
    }

    /// Whether this scope or any enclosing one holds a rewrite for forms of
    /// the given kind; a cheap prefilter before walking the rule trees.
    pub fn has_rewrites_for(&self, kind: Kind) -> bool {
        let bit = 1u32 << kind as u32;
        let mut scope = Some(self);
        while let Some(s) = scope {
            if s.kinds.get() & bit != 0 {
                return true;
            }
            scope = s.parent.as_deref();
        }
        false
    }

    /// Insert a new rewrite `pattern is body`. The pattern's shape hash
    /// drives the descent through the rule tree; duplicates of the same
    /// shape chain below one another in source order.
    pub fn define(&self, pattern: TreeRef, body: TreeRef) -> Result<RewriteRef> {
        self.enter(pattern, body, false)
    }

    /// Like `define`, but an existing definition of the same name is
    /// replaced instead of diagnosed. Attributes use this.
    pub fn redefine(&self, pattern: TreeRef, body: TreeRef) -> Result<RewriteRef> {
        self.enter(pattern, body, true)
    }

    fn enter(&self, pattern: TreeRef, body: TreeRef, overwrite: bool) -> Result<RewriteRef> {
        let defined = rewrite_defined(&pattern);
        validate_names(&pattern)?;
        let hash = shape_hash(&defined);
        let position = pattern.position;
        let name = defined.as_name().map(str::to_string);
        let rewrite = Rc::new(Rewrite {
            pattern,
            body,
            defined,
            hash,
            position,
        });

        self.kinds
            .set(self.kinds.get() | 1u32 << rewrite.defined.kind() as u32);

        let mut rules = self.rules.borrow_mut();
        let mut slot = &mut *rules;
        let mut h = hash;
        loop {
            let current = slot;
            match current {
                None => {
                    *current = Some(Box::new(RuleNode {
                        rewrite: rewrite.clone(),
                        left: None,
                        right: None,
                    }));
                    return Ok(rewrite);
                }
                Some(node) => {
                    if let Some(name) = &name {
                        if node.rewrite.defined.as_name() == Some(name.as_str()) {
                            if overwrite {
                                node.rewrite = rewrite.clone();
                                return Ok(rewrite);
                            }
                            return Err(Error::binding(
                                format!("name '{}' is redefined", name),
                                rewrite.position,
                            ));
                        }
                    }
                    slot = if h & 1 != 0 {
                        &mut node.right
                    } else {
                        &mut node.left
                    };
                    h = rehash(h);
                }
            }
        }
    }

    /// Visitor-style walk over candidate rules for a form. Within one scope,
    /// the walk follows the form's hash bits and visits every rule on that
    /// path whose full hash matches; the visitor may return `Some` to
    /// short-circuit. With `recurse`, enclosing scopes follow.
    pub fn lookup<T>(
        self_ref: &ScopeRef,
        what: &TreeRef,
        recurse: bool,
        visit: &mut dyn FnMut(&ScopeRef, &RewriteRef) -> Option<T>,
    ) -> Option<T> {
        if !self_ref.has_rewrites_for(what.kind()) {
            return None;
        }
        let h0 = shape_hash(what);
        let mut scope = Some(self_ref.clone());
        while let Some(current) = scope {
            // Collect first so the visitor can freely re-enter the scope.
            let mut matches: Vec<RewriteRef> = Vec::new();
            {
                let rules = current.rules.borrow();
                let mut node = rules.as_deref();
                let mut h = h0;
                while let Some(n) = node {
                    if n.rewrite.hash == h0 {
                        matches.push(n.rewrite.clone());
                    }
                    node = if h & 1 != 0 {
                        n.right.as_deref()
                    } else {
                        n.left.as_deref()
                    };
                    h = rehash(h);
                }
            }
            for rewrite in &matches {
                if let Some(result) = visit(&current, rewrite) {
                    return Some(result);
                }
            }
            if !recurse {
                break;
            }
            scope = current.parent.clone();
        }
        None
    }

    /// The value bound to a form whose pattern is exactly that form.
    /// For leaves the pattern must be structurally equal; searches the
    /// current scope then parents.
    pub fn bound(self_ref: &ScopeRef, form: &TreeRef, recurse: bool) -> Option<TreeRef> {
        Scope::lookup(self_ref, form, recurse, &mut |_, rewrite| {
            if form.is_leaf() && !structural_eq(form, &rewrite.defined) {
                return None;
            }
            Some(rewrite.body.clone())
        })
    }

    /// Like `bound`, also reporting the rewrite and the scope holding it.
    pub fn bound_with(
        self_ref: &ScopeRef,
        form: &TreeRef,
        recurse: bool,
    ) -> Option<(TreeRef, RewriteRef, ScopeRef)> {
        Scope::lookup(self_ref, form, recurse, &mut |scope, rewrite| {
            if form.is_leaf() && !structural_eq(form, &rewrite.defined) {
                return None;
            }
            Some((rewrite.body.clone(), rewrite.clone(), scope.clone()))
        })
    }

    /// The value bound to a plain name.
    pub fn named(self_ref: &ScopeRef, name: &str) -> Option<TreeRef> {
        let form = Tree::name(name, crate::kernel::tree::NOWHERE);
        Scope::bound(self_ref, &form, true)
    }

    /// Setting an attribute is just defining a name in the current scope.
    pub fn set_attribute(&self, attribute: &str, value: TreeRef) -> Result<RewriteRef> {
        let name = Tree::name(attribute, value.position);
        self.redefine(name, value)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.borrow().is_none()
    }

    /// Project this scope to a tree: `scope(Parent, Rewrites)` with each
    /// rewrite entry as `Decl \n (Left ; Right)`. Rebuilt on demand so a
    /// projection always reflects the scope chain as it stands.
    pub fn as_tree(self_ref: &ScopeRef) -> TreeRef {
        let parent = match &self_ref.parent {
            Some(parent) => Scope::as_tree(parent),
            None => Tree::name("", self_ref.position),
        };
        let rules = project_rules(self_ref.rules.borrow().as_deref(), self_ref.position);
        Tree::infix(SCOPE_NAME, parent, rules, self_ref.position)
    }
}

fn project_rules(node: Option<&RuleNode>, position: Position) -> TreeRef {
    match node {
        None => Tree::name("", position),
        Some(node) => {
            let decl = Tree::infix(
                "is",
                node.rewrite.pattern.clone(),
                node.rewrite.body.clone(),
                node.rewrite.position,
            );
            let children = Tree::infix(
                ";",
                project_rules(node.left.as_deref(), position),
                project_rules(node.right.as_deref(), position),
                position,
            );
            Tree::infix("\n", decl, children, node.rewrite.position)
        }
    }
}

/// Install every declaration found at the top level of a (possibly
/// sequenced) tree: `Pattern is Body` rewrites and `data Form` forms.
/// Returns true if the tree also contains instructions left to evaluate.
pub fn process_declarations(
    scope: &ScopeRef,
    tree: &TreeRef,
    self_name: &TreeRef,
) -> Result<bool> {
    let mut what = Some(tree.clone());
    let mut has_instructions = false;

    while let Some(current) = what {
        let mut next = None;
        let mut is_instruction = true;

        if let Some((name, left, right)) = current.as_infix() {
            if name == "is" {
                scope.define(left.clone(), right.clone())?;
                is_instruction = false;
            } else if name == "\n" || name == ";" {
                is_instruction = false;
                has_instructions |= process_declarations(scope, left, self_name)?;
                next = Some(right.clone());
            }
        } else if let Some(form) = current.prefix_of("data") {
            scope.define(form.clone(), self_name.clone())?;
            is_instruction = false;
        }

        has_instructions |= is_instruction;
        what = next;
    }
    Ok(has_instructions)
}

/// Skip declaration nodes when executing a processed sequence.
pub fn is_declaration(tree: &TreeRef) -> bool {
    if let Some((name, _, _)) = tree.as_infix() {
        if name == "is" {
            return true;
        }
    }
    tree.prefix_of("data").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tree::NOWHERE;

    fn name(value: &str) -> TreeRef {
        Tree::name(value, NOWHERE)
    }

    #[test]
    fn test_define_and_bound() {
        let root = Scope::root();
        root.define(name("x"), Tree::integer(17, NOWHERE)).unwrap();
        let bound = Scope::bound(&root, &name("x"), true).unwrap();
        assert_eq!(bound.as_integer(), Some(17));
        assert!(Scope::bound(&root, &name("y"), true).is_none());
    }

    #[test]
    fn test_child_scope_shadows_and_falls_through() {
        let root = Scope::root();
        root.define(name("x"), Tree::integer(1, NOWHERE)).unwrap();
        root.define(name("y"), Tree::integer(2, NOWHERE)).unwrap();
        let inner = Scope::child(&root);
        inner.define(name("x"), Tree::integer(10, NOWHERE)).unwrap();

        let x = Scope::bound(&inner, &name("x"), true).unwrap();
        assert_eq!(x.as_integer(), Some(10));
        let y = Scope::bound(&inner, &name("y"), true).unwrap();
        assert_eq!(y.as_integer(), Some(2));
        assert!(Scope::bound(&inner, &name("y"), false).is_none());
    }

    #[test]
    fn test_redefinition_is_diagnosed() {
        let root = Scope::root();
        root.define(name("x"), Tree::integer(1, NOWHERE)).unwrap();
        assert!(root.define(name("x"), Tree::integer(2, NOWHERE)).is_err());
        root.redefine(name("x"), Tree::integer(2, NOWHERE)).unwrap();
        let x = Scope::bound(&root, &name("x"), true).unwrap();
        assert_eq!(x.as_integer(), Some(2));
    }

    #[test]
    fn test_lookup_visits_same_shape_in_source_order() {
        let root = Scope::root();
        let pattern1 = Tree::postfix(Tree::integer(0, NOWHERE), name("!"), NOWHERE);
        let pattern2 = Tree::postfix(name("N"), name("!"), NOWHERE);
        root.define(pattern1, Tree::integer(1, NOWHERE)).unwrap();
        root.define(pattern2, Tree::integer(2, NOWHERE)).unwrap();

        let form = Tree::postfix(Tree::integer(3, NOWHERE), name("!"), NOWHERE);
        let mut seen = Vec::new();
        Scope::lookup(&root, &form, true, &mut |_, rewrite| {
            seen.push(rewrite.body.as_integer().unwrap());
            None::<()>
        });
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_defined_shape_strips_qualifiers() {
        // N! when N > 0 as integer
        let bang = Tree::postfix(name("N"), name("!"), NOWHERE);
        let guard = Tree::infix("when", bang.clone(), name("g"), NOWHERE);
        let typed = Tree::infix("as", guard, name("integer"), NOWHERE);
        let defined = rewrite_defined(&typed);
        assert!(structural_eq(&defined, &bang));
        assert!(rewrite_type(&typed).is_none());

        let typed_top = Tree::infix("as", bang.clone(), name("integer"), NOWHERE);
        assert!(rewrite_type(&typed_top).is_some());
    }

    #[test]
    fn test_pattern_variables_must_be_names() {
        let root = Scope::root();
        let bad = Tree::prefix(name("f"), name("+"), NOWHERE);
        assert!(root.define(bad, Tree::integer(1, NOWHERE)).is_err());
        // The operator position of a prefix is exempt.
        let ok = Tree::prefix(name("-"), name("X"), NOWHERE);
        assert!(root.define(ok, Tree::integer(1, NOWHERE)).is_ok());
    }

    #[test]
    fn test_process_declarations_reports_instructions() {
        let root = Scope::root();
        let self_name = name("self");
        let decl = Tree::infix("is", name("x"), Tree::integer(1, NOWHERE), NOWHERE);
        let call = name("x");
        let seq = Tree::infix("\n", decl, call, NOWHERE);
        let has = process_declarations(&root, &seq, &self_name).unwrap();
        assert!(has);
        assert!(Scope::bound(&root, &name("x"), true).is_some());

        let root2 = Scope::root();
        let decl2 = Tree::infix("is", name("y"), Tree::integer(2, NOWHERE), NOWHERE);
        let has2 = process_declarations(&root2, &decl2, &self_name).unwrap();
        assert!(!has2);
    }

    #[test]
    fn test_scope_projection_shape() {
        let root = Scope::root();
        root.define(name("x"), Tree::integer(1, NOWHERE)).unwrap();
        let projected = Scope::as_tree(&root);
        let (op, parent, rules) = projected.as_infix().unwrap();
        assert_eq!(op, SCOPE_NAME);
        assert_eq!(parent.as_name(), Some(""));
        let (entry_op, decl, _children) = rules.as_infix().unwrap();
        assert_eq!(entry_op, "\n");
        let (decl_op, pattern, _body) = decl.as_infix().unwrap();
        assert_eq!(decl_op, "is");
        assert_eq!(pattern.as_name(), Some("x"));
    }
}
