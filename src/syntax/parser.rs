use crate::kernel::errors::Error;
use crate::kernel::info::InfoRef;
use crate::kernel::tree::{Position, Tree, TreeData, TreeRef, INDENT_CLOSE, INDENT_OPEN};
use crate::syntax::table::{read_syntax, SyntaxRef, SyntaxResolver};
use crate::syntax::token::{Scanner, TokenKind};

/// Options pinned per parser. Signed-constant folding observably changes
/// the tree (`-3` becomes a negative literal instead of a prefix), so it is
/// fixed at construction and applies to the whole input.
#[derive(Clone, Copy, Debug)]
pub struct ParserOptions {
    pub signed_constants: bool,
}

impl Default for ParserOptions {
    fn default() -> ParserOptions {
        ParserOptions {
            signed_constants: false,
        }
    }
}

/// An operator waiting for its right operand, with the argument parsed so
/// far and the priority that decides when it folds.
struct Pending {
    opcode: String,
    argument: TreeRef,
    priority: i32,
    position: Position,
}

/// The explicit state of one expression parse. Block and sub-syntax
/// recursion get a fresh record; the enclosing one is untouched.
struct ParseState {
    result: Option<TreeRef>,
    result_priority: i32,
    stack: Vec<Pending>,
    new_statement: bool,
    is_expression: bool,
}

/// Token stream to tree. There is no grammar here: every decision comes
/// from the syntax table, looked up token by token.
pub struct Parser<'r> {
    scanner: Scanner,
    syntax: SyntaxRef,
    info: InfoRef,
    resolver: &'r dyn SyntaxResolver,
    options: ParserOptions,
    pending: Option<TokenKind>,
    opening_quote: String,
    closing_quote: String,
    comments: Vec<String>,
    commented: Option<TreeRef>,
    beginning_line: bool,
    had_space_before: bool,
    had_space_after: bool,
    errors: Vec<Error>,
}

/// The prefix marker on the pending stack: an entry with an empty opcode is
/// a prefix application, anything else an infix.
const PREFIX_MARKER: &str = "";

impl<'r> Parser<'r> {
    pub fn new(
        input: &str,
        base: Position,
        syntax: SyntaxRef,
        info: InfoRef,
        resolver: &'r dyn SyntaxResolver,
        options: ParserOptions,
    ) -> Parser<'r> {
        Parser {
            scanner: Scanner::new(input, base, syntax.clone()),
            syntax,
            info,
            resolver,
            options,
            pending: None,
            opening_quote: String::new(),
            closing_quote: String::new(),
            comments: Vec::new(),
            commented: None,
            beginning_line: true,
            had_space_before: false,
            had_space_after: false,
            errors: Vec::new(),
        }
    }

    /// Parse the whole input. Errors are logged and parsing continues as
    /// best it can; `take_errors` reports what was seen.
    pub fn parse(&mut self) -> Option<TreeRef> {
        let result = self.parse_until("");
        self.errors.extend(self.scanner.take_errors());
        result
    }

    pub fn take_errors(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.errors)
    }

    fn error(&mut self, message: String, position: Position) {
        self.errors.push(Error::parse(message, position));
    }

    fn infix_priority(&self, name: &str) -> i32 {
        self.syntax.borrow().infix_priority(name)
    }

    fn prefix_priority(&self, name: &str) -> i32 {
        self.syntax.borrow().prefix_priority(name)
    }

    fn postfix_priority(&self, name: &str) -> i32 {
        self.syntax.borrow().postfix_priority(name)
    }

    fn add_comment(&mut self, comment: String) {
        self.comments.push(comment);
    }

    fn attach_comments(&mut self, tree: &TreeRef, before: bool) {
        let comments = std::mem::take(&mut self.comments);
        self.info.add_comments(tree, comments, before);
    }

    /// Unary minus folds a literal constant into a signed literal when the
    /// option asks for it.
    fn create_prefix(&self, left: TreeRef, right: TreeRef, position: Position) -> TreeRef {
        if self.options.signed_constants && left.is_name("-") {
            match &right.data {
                TreeData::Integer(value) => return Tree::integer(-value, right.position),
                TreeData::Real(value) => return Tree::real(-value, right.position),
                _ => {}
            }
        }
        Tree::prefix(left, right, position)
    }

    fn fold(&self, previous: Pending, argument: TreeRef) -> TreeRef {
        if previous.opcode == PREFIX_MARKER {
            self.create_prefix(previous.argument, argument, previous.position)
        } else {
            Tree::infix(
                &previous.opcode,
                previous.argument,
                argument,
                previous.position,
            )
        }
    }

    /// Return the next token, skipping comments, reading long text, loading
    /// inline `syntax` definitions, and managing the pending newline.
    fn next_token(&mut self) -> TokenKind {
        loop {
            let mut pend = self.pending;
            if let Some(kind) = pend {
                if kind != TokenKind::Newline {
                    self.pending = None;
                    self.beginning_line = false;
                    return kind;
                }
            }

            // Nothing pending, or only a newline.
            let result = self.scanner.next_token();
            self.had_space_before = self.scanner.had_space_before();
            self.had_space_after = self.scanner.had_space_after();

            match result {
                TokenKind::Name | TokenKind::Symbol => {
                    let opening = self.scanner.name_value().to_string();

                    if opening == "syntax" {
                        // Grammar changes mid-stream: read the block that
                        // follows straight into the active table.
                        let syntax = self.syntax.clone();
                        if let Err(error) =
                            read_syntax(&mut self.scanner, &syntax, self.resolver, 0)
                        {
                            self.errors.push(error);
                        }
                        continue;
                    }

                    let comment_closing = self.syntax.borrow().is_comment(&opening);
                    if let Some(closing) = comment_closing {
                        let body = self.scanner.read_until(&closing, true);
                        let mut comment = format!("{}{}", opening, body);
                        if closing == "\n" {
                            while comment.ends_with('\n') {
                                comment.pop();
                            }
                        }
                        self.add_comment(comment);
                        if closing == "\n" && pend.is_none() {
                            // Comments after a token attach to that token.
                            if !self.beginning_line && !self.comments.is_empty() {
                                if let Some(commented) = self.commented.clone() {
                                    self.attach_comments(&commented, false);
                                    self.commented = None;
                                }
                            }
                            self.pending = Some(TokenKind::Newline);
                            self.beginning_line = true;
                        }
                        continue;
                    }

                    let text_closing = self.syntax.borrow().is_text_delimiter(&opening);
                    if let Some(closing) = text_closing {
                        let mut long_text = self.scanner.read_until(&closing, false);
                        long_text.truncate(long_text.len().saturating_sub(closing.len()));
                        self.scanner.set_text_value(&long_text);
                        self.opening_quote = opening;
                        self.closing_quote = closing.clone();
                        if pend == Some(TokenKind::Newline) {
                            self.pending = Some(TokenKind::LongText);
                            return TokenKind::Newline;
                        }
                        if closing == "\n" && pend.is_none() {
                            self.pending = Some(TokenKind::Newline);
                            self.beginning_line = true;
                        } else {
                            self.beginning_line = false;
                        }
                        return TokenKind::LongText;
                    }

                    // A sub-statement infix eats a pending newline; this is
                    // what lets `else` continue the previous line.
                    if pend == Some(TokenKind::Newline) {
                        let syntax = self.syntax.borrow();
                        if syntax.prefix_priority(&opening) == syntax.default_priority
                            && syntax.has_infix(&opening)
                            && syntax.infix_priority(&opening) < syntax.statement_priority
                        {
                            drop(syntax);
                            self.pending = None;
                            pend = None;
                        }
                    }
                    self.beginning_line = false;
                }
                TokenKind::Newline => {
                    self.pending = Some(TokenKind::Newline);
                    self.beginning_line = true;
                    continue;
                }
                TokenKind::Unindent => {
                    // The newline that closes the block comes after it.
                    self.pending = Some(TokenKind::Newline);
                    self.beginning_line = true;
                    return TokenKind::Unindent;
                }
                TokenKind::Indent => {
                    // A newline followed by indent is just the indent.
                    self.pending = None;
                    self.beginning_line = true;
                    return TokenKind::Indent;
                }
                _ => {
                    self.beginning_line = false;
                }
            }

            // Deliver the pending newline first, pushing this token back.
            if pend.is_some() {
                self.pending = Some(result);
                self.beginning_line = true;
                return TokenKind::Newline;
            }
            return result;
        }
    }

    /// Parse until the given closing delimiter (empty at top level).
    fn parse_until(&mut self, closing: &str) -> Option<TreeRef> {
        let statement_priority = self.syntax.borrow().statement_priority;
        let function_priority = self.syntax.borrow().function_priority;
        let default_priority = self.syntax.borrow().default_priority;

        let mut state = ParseState {
            result: None,
            result_priority: default_priority,
            stack: Vec::new(),
            new_statement: true,
            is_expression: false,
        };

        // Inside parentheses we are in expression mode right away.
        let paren_priority = self.infix_priority(closing);
        if !closing.is_empty() && paren_priority > statement_priority {
            state.new_statement = false;
            state.is_expression = true;
        }

        let mut left: Option<TreeRef> = None;
        let mut infix = String::new();
        let mut done = false;

        while !done {
            let was_beginning_line = self.beginning_line;

            let mut right: Option<TreeRef> = None;
            let mut prefix_priority = default_priority;
            let mut infix_priority = default_priority;
            let token = self.next_token();

            // Comments seen since the last token trail that token.
            if !was_beginning_line && !self.comments.is_empty() {
                if let Some(commented) = self.commented.clone() {
                    self.attach_comments(&commented, false);
                }
            }

            let pos = self.scanner.position();
            match token {
                TokenKind::Eof | TokenKind::Error => {
                    done = true;
                    if !closing.is_empty() && closing != INDENT_CLOSE {
                        self.error(
                            format!("unexpected end of text, expected '{}'", closing),
                            pos,
                        );
                    }
                }
                TokenKind::Integer => {
                    right = Some(Tree::integer(self.scanner.integer_value(), pos));
                    prefix_priority = function_priority;
                }
                TokenKind::Real => {
                    right = Some(Tree::real(self.scanner.real_value(), pos));
                    prefix_priority = function_priority;
                }
                TokenKind::LongText => {
                    let opening = self.opening_quote.clone();
                    let closing_quote = self.closing_quote.clone();
                    right = Some(Tree::text(
                        self.scanner.text_value(),
                        &opening,
                        &closing_quote,
                        pos,
                    ));
                    if state.result.is_none() && state.new_statement {
                        state.is_expression = false;
                    }
                    prefix_priority = function_priority;
                }
                TokenKind::Text => {
                    let quote = self
                        .scanner
                        .token_text()
                        .chars()
                        .next()
                        .unwrap_or('"')
                        .to_string();
                    right = Some(Tree::text(self.scanner.text_value(), &quote, &quote, pos));
                    if state.result.is_none() && state.new_statement {
                        state.is_expression = false;
                    }
                    prefix_priority = function_priority;
                }
                TokenKind::Name | TokenKind::Symbol => {
                    let name = self.scanner.name_value().to_string();
                    let child_syntax = self.syntax.borrow().child_syntax(&name);
                    if name == closing {
                        done = true;
                    } else if let Some((child, child_closing)) = child_syntax {
                        // Parse with the child syntax to its closing token.
                        right = Some(self.parse_child(&name, child, &child_closing, pos));
                        prefix_priority = function_priority;
                    } else if state.result.is_none() {
                        prefix_priority = self.prefix_priority(&name);
                        right = Some(Tree::name(&name, pos));
                        if prefix_priority == default_priority {
                            prefix_priority = function_priority;
                        }
                        if state.new_statement && token == TokenKind::Name {
                            state.is_expression = false;
                        }
                    } else if left.is_some() {
                        // This is the right of an infix operator: in
                        // `A and not B`, finish parsing `not B` first.
                        prefix_priority = self.prefix_priority(&name);
                        right = Some(Tree::name(&name, pos));
                        if prefix_priority == default_priority {
                            prefix_priority = function_priority;
                        }
                    } else {
                        // Discriminate infix, postfix and prefix uses.
                        infix_priority = self.infix_priority(&name);
                        let prefix_vs_infix = self.prefix_priority(&name);
                        if infix_priority != default_priority
                            && (prefix_vs_infix == default_priority
                                || !self.had_space_before
                                || self.had_space_after)
                        {
                            // We got an infix.
                            left = state.result.take();
                            infix = name;
                        } else {
                            let postfix_priority = self.postfix_priority(&name);
                            if postfix_priority != default_priority {
                                // A postfix: fold higher-priority items,
                                // as in X:integer!
                                let operator = Tree::name(&name, pos);
                                while let Some(previous) = state.stack.last() {
                                    if !done
                                        && previous.priority != default_priority
                                        && postfix_priority > (previous.priority & !1)
                                    {
                                        break;
                                    }
                                    let previous = state.stack.pop().unwrap();
                                    let argument = state
                                        .result
                                        .take()
                                        .unwrap_or_else(|| Tree::name("", pos));
                                    state.result = Some(self.fold(previous, argument));
                                }
                                let argument = state
                                    .result
                                    .take()
                                    .unwrap_or_else(|| Tree::name("", pos));
                                right = Some(Tree::postfix(argument, operator, pos));
                                prefix_priority = postfix_priority;
                            } else {
                                // No priority: a prefix by default.
                                right = Some(Tree::name(&name, pos));
                                prefix_priority = prefix_vs_infix;
                                if prefix_priority == default_priority {
                                    prefix_priority = function_priority;
                                    if state.new_statement && token == TokenKind::Name {
                                        state.is_expression = false;
                                    }
                                }
                            }
                        }
                    }
                }
                TokenKind::Newline => {
                    // A newline is an infix operator.
                    infix = "\n".to_string();
                    infix_priority = self.infix_priority("\n");
                    left = state.result.take();
                }
                TokenKind::ParClose => {
                    if self.scanner.token_text() != closing {
                        self.error(
                            format!(
                                "mismatched parentheses: got '{}', expected '{}'",
                                self.scanner.token_text(),
                                closing
                            ),
                            pos,
                        );
                    }
                    done = true;
                }
                TokenKind::Unindent => {
                    if closing != INDENT_CLOSE {
                        self.error(
                            format!("mismatched indentation, expected '{}'", closing),
                            pos,
                        );
                    }
                    done = true;
                }
                TokenKind::Indent | TokenKind::ParOpen => {
                    let block_opening = if token == TokenKind::Indent {
                        INDENT_OPEN.to_string()
                    } else {
                        self.scanner.token_text().to_string()
                    };
                    let known_block = self.syntax.borrow().is_block(&block_opening);
                    let block_closing = match known_block {
                        Some(closing) => closing,
                        None => {
                            self.error(
                                format!("unknown parenthese type '{}'", block_opening),
                                pos,
                            );
                            block_opening.clone()
                        }
                    };
                    if token == TokenKind::ParOpen {
                        self.scanner.open_paren();
                    }
                    prefix_priority = self.infix_priority(&block_opening);
                    infix_priority = default_priority;
                    let saved_comments = std::mem::take(&mut self.comments);

                    let child = self.parse_until(&block_closing);
                    if token == TokenKind::ParOpen {
                        self.scanner.close_paren();
                    }
                    let child = child.unwrap_or_else(|| Tree::name("", pos));
                    right = Some(Tree::block(child, &block_opening, &block_closing, pos));

                    let mut comments = saved_comments;
                    comments.append(&mut self.comments);
                    self.comments = comments;
                }
            }

            // Attach pending comments to the tree we just built.
            if let Some(tree) = &right {
                self.commented = Some(tree.clone());
                if !self.comments.is_empty() {
                    let tree = tree.clone();
                    self.attach_comments(&tree, true);
                }
            } else if left.is_some()
                && (self.pending.is_none() || self.pending == Some(TokenKind::Newline))
            {
                // We just got an infix like `then`; comments cannot attach
                // to it, so they defer to the next operand.
                self.commented = None;
            }

            // Integrate the token into the result.
            if state.result.is_none() && left.is_none() {
                // First thing we parse.
                state.result = right.clone();
                state.result_priority = prefix_priority;
                if state.result.is_some() && state.result_priority >= statement_priority {
                    state.new_statement = false;
                }
            } else if let Some(leftward) = left.take() {
                // Check if we had a statement separator.
                if infix_priority < statement_priority {
                    state.new_statement = true;
                    state.is_expression = false;
                }

                if prefix_priority != default_priority {
                    // In `A and not B`, push `A and` and restart at `not`.
                    let position = if state.new_statement {
                        leftward.position
                    } else {
                        pos
                    };
                    state.stack.push(Pending {
                        opcode: infix.clone(),
                        argument: leftward,
                        priority: infix_priority,
                        position,
                    });
                    state.result = right.clone();
                    state.result_priority = prefix_priority;
                } else {
                    // Odd priorities are right-associative: the low bit is
                    // cleared in the comparison.
                    let mut folded = leftward;
                    while let Some(previous) = state.stack.last() {
                        if !done
                            && previous.priority != default_priority
                            && infix_priority > (previous.priority & !1)
                        {
                            break;
                        }
                        let previous = state.stack.pop().unwrap();
                        folded = self.fold(previous, folded);
                    }
                    if done {
                        state.result = Some(folded);
                    } else {
                        let position = if state.new_statement {
                            folded.position
                        } else {
                            pos
                        };
                        state.stack.push(Pending {
                            opcode: infix.clone(),
                            argument: folded,
                            priority: infix_priority,
                            position,
                        });
                        state.result = None;
                    }
                }
            } else if let Some(rightward) = right.clone() {
                // A prefix application, e.g. pragmas at low priority.
                if prefix_priority < statement_priority {
                    state.new_statement = true;
                    state.is_expression = false;
                }

                if prefix_priority <= state.result_priority {
                    while let Some(previous) = state.stack.last() {
                        if !done
                            && previous.priority != default_priority
                            && state.result_priority > (previous.priority & !1)
                        {
                            break;
                        }
                        let previous = state.stack.pop().unwrap();
                        let argument = state.result.take().unwrap();
                        state.result = Some(self.fold(previous, argument));
                    }
                }

                // A prefix at the start of a line makes a statement.
                if !state.is_expression
                    && state.result_priority > statement_priority
                    && state
                        .stack
                        .last()
                        .map(|previous| previous.priority < statement_priority)
                        .unwrap_or(true)
                {
                    state.result_priority = statement_priority;
                }

                state.stack.push(Pending {
                    opcode: PREFIX_MARKER.to_string(),
                    argument: state.result.take().unwrap(),
                    priority: state.result_priority,
                    position: pos,
                });
                state.result = Some(rightward);
                state.result_priority = prefix_priority;
            }
        }

        // Unwind anything left on the stack.
        if !state.stack.is_empty() {
            if state.result.is_none() {
                let last = state.stack.pop().unwrap();
                if last.opcode == "\n" {
                    state.result = Some(last.argument);
                } else if last.opcode == PREFIX_MARKER {
                    state.result = Some(last.argument);
                } else {
                    // A trailing infix becomes a postfix of its operator.
                    let operator = Tree::name(&last.opcode, last.position);
                    state.result = Some(Tree::postfix(last.argument, operator, last.position));
                }
            }
            while let Some(previous) = state.stack.pop() {
                let argument = state.result.take().unwrap();
                state.result = Some(self.fold(previous, argument));
            }
        }

        state.result
    }

    /// Parse embedded content with a child syntax until its closing token,
    /// wrapping the result so the activating name stays visible.
    fn parse_child(
        &mut self,
        name: &str,
        child: SyntaxRef,
        child_closing: &str,
        pos: Position,
    ) -> TreeRef {
        let saved = self.syntax.clone();
        self.syntax = child.clone();
        self.scanner.set_syntax(child);
        let content = self.parse_until(child_closing);
        self.syntax = saved.clone();
        self.scanner.set_syntax(saved);

        let content = content.unwrap_or_else(|| Tree::name("", pos));
        let block = Tree::block(content, name, child_closing, pos);
        Tree::prefix(Tree::name(name, pos), block, pos)
    }
}
