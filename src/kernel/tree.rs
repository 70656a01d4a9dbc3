use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A byte offset into the flat positions map shared across source files.
/// See `syntax::source::SourceMap` for resolution to file/line/column.
pub type Position = usize;

/// Position for synthesized trees that have no source location.
pub const NOWHERE: Position = usize::MAX;

/// Opening marker for indentation-delimited blocks.
pub const INDENT_OPEN: &str = "I+";
/// Closing marker for indentation-delimited blocks.
pub const INDENT_CLOSE: &str = "I-";

/// Trees are shared by reference; reference counts reclaim the nodes.
pub type TreeRef = Rc<Tree>;

/// The seven-way tag of a tree node.
/// The discriminant order matters for the shape hash, not for semantics.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum Kind {
    Integer,
    Real,
    Text,
    Name,
    Block,
    Prefix,
    Postfix,
    Infix,
}

impl Kind {
    pub fn is_leaf(self) -> bool {
        matches!(self, Kind::Integer | Kind::Real | Kind::Text | Kind::Name)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Kind::Integer => "integer",
            Kind::Real => "real",
            Kind::Text => "text",
            Kind::Name => "name",
            Kind::Block => "block",
            Kind::Prefix => "prefix",
            Kind::Postfix => "postfix",
            Kind::Infix => "infix",
        };
        write!(f, "{}", name)
    }
}

/// Every value in the system is a tree: programs, values, scopes projected
/// for introspection, and types all share this representation.
#[derive(Debug, Serialize)]
pub struct Tree {
    pub data: TreeData,
    pub position: Position,
}

/// The payload of the seven node kinds.
/// Text and Block retain their delimiters for faithful re-printing.
#[derive(Debug, Serialize)]
pub enum TreeData {
    Integer(i64),
    Real(f64),
    Text {
        value: String,
        opening: String,
        closing: String,
    },
    Name(String),
    Prefix {
        left: TreeRef,
        right: TreeRef,
    },
    Postfix {
        left: TreeRef,
        right: TreeRef,
    },
    Infix {
        name: String,
        left: TreeRef,
        right: TreeRef,
    },
    Block {
        child: TreeRef,
        opening: String,
        closing: String,
    },
}

impl Tree {
    pub fn integer(value: i64, position: Position) -> TreeRef {
        Rc::new(Tree {
            data: TreeData::Integer(value),
            position,
        })
    }

    pub fn real(value: f64, position: Position) -> TreeRef {
        Rc::new(Tree {
            data: TreeData::Real(value),
            position,
        })
    }

    pub fn text(value: &str, opening: &str, closing: &str, position: Position) -> TreeRef {
        Rc::new(Tree {
            data: TreeData::Text {
                value: value.to_string(),
                opening: opening.to_string(),
                closing: closing.to_string(),
            },
            position,
        })
    }

    pub fn name(value: &str, position: Position) -> TreeRef {
        Rc::new(Tree {
            data: TreeData::Name(value.to_string()),
            position,
        })
    }

    pub fn prefix(left: TreeRef, right: TreeRef, position: Position) -> TreeRef {
        Rc::new(Tree {
            data: TreeData::Prefix { left, right },
            position,
        })
    }

    pub fn postfix(left: TreeRef, right: TreeRef, position: Position) -> TreeRef {
        Rc::new(Tree {
            data: TreeData::Postfix { left, right },
            position,
        })
    }

    pub fn infix(name: &str, left: TreeRef, right: TreeRef, position: Position) -> TreeRef {
        debug_assert!(!name.is_empty(), "infix operator name must not be empty");
        Rc::new(Tree {
            data: TreeData::Infix {
                name: name.to_string(),
                left,
                right,
            },
            position,
        })
    }

    pub fn block(child: TreeRef, opening: &str, closing: &str, position: Position) -> TreeRef {
        Rc::new(Tree {
            data: TreeData::Block {
                child,
                opening: opening.to_string(),
                closing: closing.to_string(),
            },
            position,
        })
    }

    pub fn kind(&self) -> Kind {
        match &self.data {
            TreeData::Integer(_) => Kind::Integer,
            TreeData::Real(_) => Kind::Real,
            TreeData::Text { .. } => Kind::Text,
            TreeData::Name(_) => Kind::Name,
            TreeData::Prefix { .. } => Kind::Prefix,
            TreeData::Postfix { .. } => Kind::Postfix,
            TreeData::Infix { .. } => Kind::Infix,
            TreeData::Block { .. } => Kind::Block,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind().is_leaf()
    }

    /// Integer, Real and Text evaluate to themselves.
    pub fn is_constant(&self) -> bool {
        matches!(
            self.kind(),
            Kind::Integer | Kind::Real | Kind::Text
        )
    }

    pub fn as_integer(&self) -> Option<i64> {
        match &self.data {
            TreeData::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match &self.data {
            TreeData::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.data {
            TreeData::Text { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match &self.data {
            TreeData::Name(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_prefix(&self) -> Option<(&TreeRef, &TreeRef)> {
        match &self.data {
            TreeData::Prefix { left, right } => Some((left, right)),
            _ => None,
        }
    }

    pub fn as_postfix(&self) -> Option<(&TreeRef, &TreeRef)> {
        match &self.data {
            TreeData::Postfix { left, right } => Some((left, right)),
            _ => None,
        }
    }

    pub fn as_infix(&self) -> Option<(&str, &TreeRef, &TreeRef)> {
        match &self.data {
            TreeData::Infix { name, left, right } => Some((name, left, right)),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<(&TreeRef, &str, &str)> {
        match &self.data {
            TreeData::Block {
                child,
                opening,
                closing,
            } => Some((child, opening, closing)),
            _ => None,
        }
    }

    pub fn is_name(&self, value: &str) -> bool {
        self.as_name() == Some(value)
    }

    pub fn is_indent_block(&self) -> bool {
        matches!(&self.data, TreeData::Block { opening, .. } if opening == INDENT_OPEN)
    }

    pub fn is_brace_block(&self) -> bool {
        matches!(&self.data, TreeData::Block { opening, .. } if opening == "{")
    }

    /// A prefix `head arg` where head is the given name.
    pub fn prefix_of(&self, head: &str) -> Option<&TreeRef> {
        match &self.data {
            TreeData::Prefix { left, right } if left.is_name(head) => Some(right),
            _ => None,
        }
    }
}

/// Structural equality, positions ignored. Two trees with the same shape may
/// or may not be the same node; this compares the shape.
pub fn structural_eq(a: &TreeRef, b: &TreeRef) -> bool {
    if Rc::ptr_eq(a, b) {
        return true;
    }
    match (&a.data, &b.data) {
        (TreeData::Integer(x), TreeData::Integer(y)) => x == y,
        (TreeData::Real(x), TreeData::Real(y)) => x == y,
        (
            TreeData::Text { value: x, .. },
            TreeData::Text { value: y, .. },
        ) => x == y,
        (TreeData::Name(x), TreeData::Name(y)) => x == y,
        (
            TreeData::Prefix { left: al, right: ar },
            TreeData::Prefix { left: bl, right: br },
        ) => structural_eq(al, bl) && structural_eq(ar, br),
        (
            TreeData::Postfix { left: al, right: ar },
            TreeData::Postfix { left: bl, right: br },
        ) => structural_eq(al, bl) && structural_eq(ar, br),
        (
            TreeData::Infix {
                name: an,
                left: al,
                right: ar,
            },
            TreeData::Infix {
                name: bn,
                left: bl,
                right: br,
            },
        ) => an == bn && structural_eq(al, bl) && structural_eq(ar, br),
        (
            TreeData::Block {
                child: ac,
                opening: ao,
                closing: az,
            },
            TreeData::Block {
                child: bc,
                opening: bo,
                closing: bz,
            },
        ) => ao == bo && az == bz && structural_eq(ac, bc),
        _ => false,
    }
}

/// A tree reference compared and hashed by node identity, for side-tables
/// keyed by "which node is this" rather than by shape. Holding the strong
/// reference keeps the node alive, so an address is never reused while it is
/// a live key.
#[derive(Clone)]
pub struct TreeKey(pub TreeRef);

impl TreeKey {
    pub fn of(tree: &TreeRef) -> TreeKey {
        TreeKey(tree.clone())
    }
}

impl PartialEq for TreeKey {
    fn eq(&self, other: &TreeKey) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TreeKey {}

impl Hash for TreeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for TreeKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TreeKey({})", self.0)
    }
}

/// Compact single-line rendering used in diagnostics. The real printer in
/// `syntax::printer` knows the syntax table; this one does not need it.
impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_inline(f)
    }
}

impl Tree {
    fn fmt_inline(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.data {
            TreeData::Integer(v) => write!(f, "{}", v),
            TreeData::Real(v) => write!(f, "{:?}", v),
            TreeData::Text {
                value,
                opening,
                closing,
            } => write!(f, "{}{}{}", opening, value, closing),
            TreeData::Name(v) => write!(f, "{}", v),
            TreeData::Prefix { left, right } => {
                left.fmt_inline(f)?;
                write!(f, " ")?;
                right.fmt_inline(f)
            }
            TreeData::Postfix { left, right } => {
                left.fmt_inline(f)?;
                write!(f, " ")?;
                right.fmt_inline(f)
            }
            TreeData::Infix { name, left, right } => {
                left.fmt_inline(f)?;
                if name == "\n" || name == ";" {
                    write!(f, "; ")?;
                } else {
                    write!(f, " {} ", name)?;
                }
                right.fmt_inline(f)
            }
            TreeData::Block {
                child,
                opening,
                closing,
            } => {
                if opening == INDENT_OPEN {
                    write!(f, "{{ ")?;
                    child.fmt_inline(f)?;
                    write!(f, " }}")
                } else {
                    write!(f, "{}", opening)?;
                    child.fmt_inline(f)?;
                    write!(f, "{}", closing)
                }
            }
        }
    }
}

/// The singleton trees the engine needs by identity: primitive type names,
/// booleans and the `self` body marker. The bootstrap library binds the same
/// spellings in the root scope.
pub struct Primitives {
    pub integer_type: TreeRef,
    pub real_type: TreeRef,
    pub text_type: TreeRef,
    pub boolean_type: TreeRef,
    pub name_type: TreeRef,
    pub infix_type: TreeRef,
    pub prefix_type: TreeRef,
    pub postfix_type: TreeRef,
    pub block_type: TreeRef,
    pub tree_type: TreeRef,
    pub declaration_type: TreeRef,
    pub true_name: TreeRef,
    pub false_name: TreeRef,
    pub self_name: TreeRef,
}

impl Primitives {
    pub fn new() -> Rc<Primitives> {
        Rc::new(Primitives {
            integer_type: Tree::name("integer", NOWHERE),
            real_type: Tree::name("real", NOWHERE),
            text_type: Tree::name("text", NOWHERE),
            boolean_type: Tree::name("boolean", NOWHERE),
            name_type: Tree::name("name", NOWHERE),
            infix_type: Tree::name("infix", NOWHERE),
            prefix_type: Tree::name("prefix", NOWHERE),
            postfix_type: Tree::name("postfix", NOWHERE),
            block_type: Tree::name("block", NOWHERE),
            tree_type: Tree::name("tree", NOWHERE),
            declaration_type: Tree::name("declaration", NOWHERE),
            true_name: Tree::name("true", NOWHERE),
            false_name: Tree::name("false", NOWHERE),
            self_name: Tree::name("self", NOWHERE),
        })
    }

    /// The primitive type name for a given runtime kind.
    pub fn type_for_kind(&self, kind: Kind) -> &TreeRef {
        match kind {
            Kind::Integer => &self.integer_type,
            Kind::Real => &self.real_type,
            Kind::Text => &self.text_type,
            Kind::Name => &self.name_type,
            Kind::Block => &self.block_type,
            Kind::Prefix => &self.prefix_type,
            Kind::Postfix => &self.postfix_type,
            Kind::Infix => &self.infix_type,
        }
    }

    pub fn boolean(&self, value: bool) -> TreeRef {
        if value {
            self.true_name.clone()
        } else {
            self.false_name.clone()
        }
    }
}
