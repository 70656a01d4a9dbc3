use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::kernel::scope::ScopeRef;
use crate::kernel::tree::{TreeKey, TreeRef};

/// Comments attached around a node by the parser, re-emitted by the printer.
/// Each entry is the comment text including its opening delimiter.
#[derive(Clone, Debug, Default)]
pub struct Comments {
    pub before: Vec<String>,
    pub after: Vec<String>,
}

/// Out-of-band annotations, keyed by node identity. Nodes stay immutable
/// after construction; everything that would mutate a node lives here.
#[derive(Default)]
pub struct InfoTable {
    comments: RefCell<HashMap<TreeKey, Comments>>,
    closures: RefCell<HashMap<TreeKey, ScopeRef>>,
}

pub type InfoRef = Rc<InfoTable>;

impl InfoTable {
    pub fn new() -> InfoRef {
        Rc::new(InfoTable::default())
    }

    /// Attach comments before or after the given node, extending any that
    /// are already attached on that side.
    pub fn add_comments(&self, tree: &TreeRef, comments: Vec<String>, before: bool) {
        if comments.is_empty() {
            return;
        }
        let mut map = self.comments.borrow_mut();
        let entry = map.entry(TreeKey::of(tree)).or_default();
        if before {
            entry.before.extend(comments);
        } else {
            entry.after.extend(comments);
        }
    }

    pub fn comments_of(&self, tree: &TreeRef) -> Option<Comments> {
        self.comments.borrow().get(&TreeKey::of(tree)).cloned()
    }

    /// Tag a prefix as a closure capturing the given scope. The marker is
    /// the only way to tell a closure apart from an ordinary prefix of the
    /// same shape.
    pub fn mark_closure(&self, tree: &TreeRef, scope: ScopeRef) {
        self.closures.borrow_mut().insert(TreeKey::of(tree), scope);
    }

    /// The captured scope if the value is a closure, none otherwise.
    pub fn closure_scope(&self, tree: &TreeRef) -> Option<ScopeRef> {
        self.closures.borrow().get(&TreeKey::of(tree)).cloned()
    }

    pub fn is_closure(&self, tree: &TreeRef) -> bool {
        self.closures.borrow().contains_key(&TreeKey::of(tree))
    }
}
