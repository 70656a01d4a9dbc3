use pretty::{Arena, DocAllocator, DocBuilder};

use crate::kernel::info::InfoRef;
use crate::kernel::tree::{TreeData, TreeRef};
use crate::syntax::table::SyntaxRef;

const PRINT_WIDTH: usize = 80;
const INDENT_WIDTH: isize = 4;

/// Prints trees back to source. The renderer consults the syntax table so
/// that operator prefixes stay adjacent (`-b`, not `- b`) and re-reading
/// the output yields a structurally equal tree; text and blocks re-print
/// with the delimiters they were read with.
pub struct Renderer {
    syntax: SyntaxRef,
    info: InfoRef,
}

impl Renderer {
    pub fn new(syntax: SyntaxRef, info: InfoRef) -> Renderer {
        Renderer { syntax, info }
    }

    pub fn render(&self, tree: &TreeRef) -> String {
        let allocator = Arena::<()>::new();
        let doc = self.doc(&allocator, tree);
        let mut output = String::new();
        doc.render_fmt(PRINT_WIDTH, &mut output)
            .expect("rendering to a string cannot fail");
        output
    }

    fn doc<'a>(
        &self,
        allocator: &'a Arena<'a, ()>,
        tree: &TreeRef,
    ) -> DocBuilder<'a, Arena<'a, ()>, ()> {
        let mut doc = self.node_doc(allocator, tree);

        if let Some(comments) = self.info.comments_of(tree) {
            for comment in comments.before.iter().rev() {
                doc = allocator
                    .text(comment.clone())
                    .append(allocator.hardline())
                    .append(doc);
            }
            for comment in &comments.after {
                doc = doc
                    .append(allocator.text(" "))
                    .append(allocator.text(comment.clone()))
                    .append(allocator.hardline());
            }
        }
        doc
    }

    fn node_doc<'a>(
        &self,
        allocator: &'a Arena<'a, ()>,
        tree: &TreeRef,
    ) -> DocBuilder<'a, Arena<'a, ()>, ()> {
        match &tree.data {
            TreeData::Integer(value) => allocator.text(value.to_string()),
            TreeData::Real(value) => allocator.text(format!("{:?}", value)),
            TreeData::Text {
                value,
                opening,
                closing,
            } => {
                // The quote escapes itself by doubling.
                let escaped = if opening.len() == 1 && opening == closing {
                    value.replace(opening.as_str(), &format!("{0}{0}", opening))
                } else {
                    value.clone()
                };
                allocator.text(format!("{}{}{}", opening, escaped, closing))
            }
            TreeData::Name(value) => allocator.text(value.clone()),
            TreeData::Prefix { left, right } => {
                let separator = if right.is_indent_block() {
                    allocator.nil()
                } else if self.adjacent_operator(left) {
                    allocator.nil()
                } else {
                    allocator.text(" ")
                };
                self.doc(allocator, left)
                    .append(separator)
                    .append(self.doc(allocator, right))
            }
            TreeData::Postfix { left, right } => {
                let separator = if self.adjacent_operator(right) {
                    allocator.nil()
                } else {
                    allocator.text(" ")
                };
                self.doc(allocator, left)
                    .append(separator)
                    .append(self.doc(allocator, right))
            }
            TreeData::Infix { name, left, right } => {
                let left_doc = self.doc(allocator, left);
                let right_doc = self.doc(allocator, right);
                match name.as_str() {
                    "\n" => left_doc.append(allocator.hardline()).append(right_doc),
                    ";" | "," => left_doc
                        .append(allocator.text(format!("{} ", name)))
                        .append(right_doc),
                    _ => left_doc
                        .append(allocator.text(format!(" {} ", name)))
                        .append(right_doc),
                }
            }
            TreeData::Block {
                child,
                opening,
                closing,
            } => {
                if tree.is_indent_block() {
                    allocator
                        .hardline()
                        .append(self.doc(allocator, child))
                        .nest(INDENT_WIDTH)
                } else {
                    allocator
                        .text(opening.clone())
                        .append(self.doc(allocator, child))
                        .append(allocator.text(closing.clone()))
                }
            }
        }
    }

    /// Symbol operators print adjacent to their operand so space-sensitive
    /// re-parsing reconstructs the same shape.
    fn adjacent_operator(&self, operator: &TreeRef) -> bool {
        match operator.as_name() {
            Some(name) => {
                !name.is_empty()
                    && !name.chars().next().unwrap().is_alphabetic()
                    && {
                        let syntax = self.syntax.borrow();
                        syntax.prefix_priority(name) != syntax.default_priority
                            || syntax.postfix_priority(name) != syntax.default_priority
                    }
            }
            None => false,
        }
    }
}
