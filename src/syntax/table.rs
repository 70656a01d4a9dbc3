use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::kernel::errors::{Error, Result};
use crate::kernel::tree::{INDENT_CLOSE, INDENT_OPEN};
use crate::syntax::token::{Scanner, TokenKind};

/// The grammar, as data: operator priorities, delimiter pairs, the token
/// set the scanner splits symbols against, and nested child syntaxes. The
/// table is mutable while parsing because `syntax` directives in the source
/// may extend it mid-stream; the parser is its only mutator.
pub struct SyntaxTable {
    infix_priority: HashMap<String, i32>,
    prefix_priority: HashMap<String, i32>,
    postfix_priority: HashMap<String, i32>,
    pub statement_priority: i32,
    pub function_priority: i32,
    pub default_priority: i32,
    block_delimiters: HashMap<String, String>,
    text_delimiters: HashMap<String, String>,
    comment_delimiters: HashMap<String, String>,
    known_tokens: HashSet<String>,
    known_prefixes: HashSet<String>,
    /// Child syntaxes by the opening delimiter that activates them.
    children: HashMap<String, (SyntaxRef, String)>,
    /// Child tables by name, so one child serves several delimiter pairs.
    subsyntax: HashMap<String, SyntaxRef>,
}

pub type SyntaxRef = Rc<RefCell<SyntaxTable>>;

/// Resolves a child-syntax name to the text of its syntax description.
/// The CLI maps names to `.syntax` files; tests map them in memory.
pub trait SyntaxResolver {
    fn resolve(&self, name: &str) -> Option<String>;
}

/// A resolver that knows no child syntaxes.
pub struct NoResolver;

impl SyntaxResolver for NoResolver {
    fn resolve(&self, _name: &str) -> Option<String> {
        None
    }
}

/// An in-memory resolver, mostly for tests.
pub struct MapResolver(pub HashMap<String, String>);

impl SyntaxResolver for MapResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }
}

impl SyntaxTable {
    pub fn empty() -> SyntaxRef {
        Rc::new(RefCell::new(SyntaxTable {
            infix_priority: HashMap::new(),
            prefix_priority: HashMap::new(),
            postfix_priority: HashMap::new(),
            statement_priority: 100,
            function_priority: 200,
            default_priority: 0,
            block_delimiters: HashMap::new(),
            text_delimiters: HashMap::new(),
            comment_delimiters: HashMap::new(),
            known_tokens: HashSet::new(),
            known_prefixes: HashSet::new(),
            children: HashMap::new(),
            subsyntax: HashMap::new(),
        }))
    }

    /// The default grammar, loaded from the embedded syntax description so
    /// that even the boot grammar stays data.
    pub fn arbor() -> Result<SyntaxRef> {
        let table = SyntaxTable::empty();
        read_syntax_source(include_str!("arbor.syntax"), &table, &NoResolver)?;
        Ok(table)
    }

    pub fn infix_priority(&self, name: &str) -> i32 {
        match self.infix_priority.get(name) {
            Some(&p) if p != 0 => p,
            _ => self.default_priority,
        }
    }

    pub fn prefix_priority(&self, name: &str) -> i32 {
        match self.prefix_priority.get(name) {
            Some(&p) if p != 0 => p,
            _ => self.default_priority,
        }
    }

    pub fn postfix_priority(&self, name: &str) -> i32 {
        match self.postfix_priority.get(name) {
            Some(&p) if p != 0 => p,
            _ => self.default_priority,
        }
    }

    pub fn set_infix_priority(&mut self, name: &str, priority: i32) {
        if priority != 0 {
            self.infix_priority.insert(name.to_string(), priority);
        }
    }

    pub fn set_prefix_priority(&mut self, name: &str, priority: i32) {
        if priority != 0 {
            self.prefix_priority.insert(name.to_string(), priority);
        }
    }

    pub fn set_postfix_priority(&mut self, name: &str, priority: i32) {
        if priority != 0 {
            self.postfix_priority.insert(name.to_string(), priority);
        }
    }

    pub fn block_delimiter(&mut self, opening: &str, closing: &str) {
        self.block_delimiters
            .insert(opening.to_string(), closing.to_string());
    }

    pub fn text_delimiter(&mut self, opening: &str, closing: &str) {
        self.text_delimiters
            .insert(opening.to_string(), closing.to_string());
    }

    pub fn comment_delimiter(&mut self, opening: &str, closing: &str) {
        self.comment_delimiters
            .insert(opening.to_string(), closing.to_string());
    }

    /// The closing delimiter if `opening` opens a block.
    pub fn is_block(&self, opening: &str) -> Option<String> {
        self.block_delimiters.get(opening).cloned()
    }

    pub fn is_comment(&self, opening: &str) -> Option<String> {
        self.comment_delimiters.get(opening).cloned()
    }

    pub fn is_text_delimiter(&self, opening: &str) -> Option<String> {
        self.text_delimiters.get(opening).cloned()
    }

    /// Whether the name is declared as an infix at all, as opposed to
    /// merely falling back to the default priority.
    pub fn has_infix(&self, name: &str) -> bool {
        matches!(self.infix_priority.get(name), Some(&p) if p != 0)
    }

    pub fn known_token(&self, token: &str) -> bool {
        self.known_tokens.contains(token)
    }

    pub fn known_prefix(&self, token: &str) -> bool {
        self.known_prefixes.contains(token)
    }

    /// Register a token and all its proper prefixes so the scanner can
    /// split symbol runs on it.
    pub fn register_token(&mut self, token: &str) {
        let chars: Vec<char> = token.chars().collect();
        for i in 1..chars.len() {
            let prefix: String = chars[..i].iter().collect();
            self.known_prefixes.insert(prefix);
        }
        self.known_tokens.insert(token.to_string());
    }

    /// The child syntax and its closing delimiter, if `opening` activates
    /// a nested sub-grammar.
    pub fn child_syntax(&self, opening: &str) -> Option<(SyntaxRef, String)> {
        self.children.get(opening).cloned()
    }
}

#[derive(Clone, Copy)]
enum ReaderState {
    Unknown,
    Prefix,
    Infix,
    Postfix,
    Comment,
    CommentDef,
    Text,
    TextDef,
    Block,
    BlockDef,
    SyntaxName,
    SyntaxEntry,
    SyntaxDef,
}

impl ReaderState {
    /// Delimiter-accepting states register every token they see, not just
    /// symbols, so alphabetic delimiters split correctly too.
    fn registers_all(&self) -> bool {
        !matches!(
            self,
            ReaderState::Unknown | ReaderState::Prefix | ReaderState::Infix | ReaderState::Postfix
        )
    }
}

/// Parse a keyword-driven syntax description from the scanner into the
/// table. `indents` tracks nesting: an inline `syntax` block starts at zero
/// and ends when its block closes; a whole file starts at one and ends at
/// end of input.
pub fn read_syntax(
    scanner: &mut Scanner,
    table: &SyntaxRef,
    resolver: &dyn SyntaxResolver,
    mut indents: u32,
) -> Result<()> {
    let mut state = ReaderState::Unknown;
    let mut priority: i32 = 0;
    let mut entry = String::new();
    let mut current_child: Option<SyntaxRef> = None;

    loop {
        let token = scanner.next_token();

        if token == TokenKind::Symbol || state.registers_all() {
            let text = scanner.token_text().to_string();
            if matches!(
                token,
                TokenKind::Name | TokenKind::Symbol | TokenKind::Text
            ) {
                table.borrow_mut().register_token(&text);
            }
        }

        match token {
            TokenKind::Eof => break,
            TokenKind::Integer => priority = scanner.integer_value() as i32,
            TokenKind::Indent | TokenKind::ParOpen => indents += 1,
            TokenKind::Unindent | TokenKind::ParClose => {
                if indents > 0 {
                    indents -= 1;
                }
                if indents == 0 {
                    break;
                }
            }
            TokenKind::Name | TokenKind::Symbol | TokenKind::Text => {
                let mut text = if token == TokenKind::Text {
                    scanner.text_value().to_string()
                } else {
                    scanner.token_text().to_string()
                };
                if text == "NEWLINE" {
                    text = "\n".to_string();
                } else if text == "INDENT" {
                    text = INDENT_OPEN.to_string();
                } else if text == "UNINDENT" {
                    text = INDENT_CLOSE.to_string();
                }

                match text.as_str() {
                    "INFIX" => state = ReaderState::Infix,
                    "PREFIX" => state = ReaderState::Prefix,
                    "POSTFIX" => state = ReaderState::Postfix,
                    "BLOCK" => state = ReaderState::Block,
                    "COMMENT" => state = ReaderState::Comment,
                    "TEXT" => state = ReaderState::Text,
                    "SYNTAX" => state = ReaderState::SyntaxName,
                    "STATEMENT" => table.borrow_mut().statement_priority = priority,
                    "FUNCTION" => table.borrow_mut().function_priority = priority,
                    "DEFAULT" => table.borrow_mut().default_priority = priority,
                    _ => match state {
                        ReaderState::Unknown => {}
                        ReaderState::Prefix => {
                            table.borrow_mut().set_prefix_priority(&text, priority)
                        }
                        ReaderState::Infix => {
                            table.borrow_mut().set_infix_priority(&text, priority)
                        }
                        ReaderState::Postfix => {
                            table.borrow_mut().set_postfix_priority(&text, priority)
                        }
                        ReaderState::Comment => {
                            entry = text;
                            state = ReaderState::CommentDef;
                        }
                        ReaderState::CommentDef => {
                            table.borrow_mut().comment_delimiter(&entry, &text);
                            state = ReaderState::Comment;
                        }
                        ReaderState::Text => {
                            entry = text;
                            state = ReaderState::TextDef;
                        }
                        ReaderState::TextDef => {
                            table.borrow_mut().text_delimiter(&entry, &text);
                            state = ReaderState::Text;
                        }
                        ReaderState::Block => {
                            entry = text;
                            let mut borrowed = table.borrow_mut();
                            borrowed.set_infix_priority(&entry, priority);
                            state = ReaderState::BlockDef;
                        }
                        ReaderState::BlockDef => {
                            let mut borrowed = table.borrow_mut();
                            borrowed.block_delimiter(&entry, &text);
                            borrowed.block_delimiter(&text, "");
                            borrowed.set_infix_priority(&text, priority);
                            state = ReaderState::Block;
                        }
                        ReaderState::SyntaxName => {
                            let child = {
                                let existing =
                                    table.borrow().subsyntax.get(&text).cloned();
                                match existing {
                                    Some(child) => child,
                                    None => {
                                        let source =
                                            resolver.resolve(&text).ok_or_else(|| {
                                                Error::lexical(
                                                    format!(
                                                        "cannot find syntax description '{}'",
                                                        text
                                                    ),
                                                    scanner.position(),
                                                )
                                            })?;
                                        let child = SyntaxTable::empty();
                                        read_syntax_source(&source, &child, resolver)?;
                                        table
                                            .borrow_mut()
                                            .subsyntax
                                            .insert(text.clone(), child.clone());
                                        child
                                    }
                                }
                            };
                            current_child = Some(child);
                            state = ReaderState::SyntaxEntry;
                        }
                        ReaderState::SyntaxEntry => {
                            entry = text;
                            state = ReaderState::SyntaxDef;
                        }
                        ReaderState::SyntaxDef => {
                            if let Some(child) = &current_child {
                                table
                                    .borrow_mut()
                                    .children
                                    .insert(entry.clone(), (child.clone(), text));
                            }
                            state = ReaderState::SyntaxEntry;
                        }
                    },
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Read a syntax description from text, e.g. a `.syntax` file or the
/// embedded default. The description is scanned with an empty table.
pub fn read_syntax_source(
    source: &str,
    table: &SyntaxRef,
    resolver: &dyn SyntaxResolver,
) -> Result<()> {
    let scanning = SyntaxTable::empty();
    let mut scanner = Scanner::new(source, 0, scanning);
    read_syntax(&mut scanner, table, resolver, 1)
}
