use std::rc::Rc;

use crate::interpreter::Interpreter;
use crate::kernel::errors::{Error, Result};
use crate::kernel::info::{InfoRef, InfoTable};
use crate::kernel::scope::{self, Scope, ScopeRef};
use crate::kernel::tree::{Primitives, TreeRef};
use crate::syntax::parser::{Parser, ParserOptions};
use crate::syntax::printer::Renderer;
use crate::syntax::source::SourceMap;
use crate::syntax::table::{NoResolver, SyntaxRef, SyntaxResolver, SyntaxTable};

/// Wires the pieces together: sources, syntax table, info side-tables, the
/// root scope populated from the bootstrap library, and the interpreter.
/// The CLI and the tests both drive everything through here.
pub struct Session {
    pub sources: SourceMap,
    pub syntax: SyntaxRef,
    pub info: InfoRef,
    pub prims: Rc<Primitives>,
    /// Holds the bootstrap library; never mutated afterwards.
    pub root: ScopeRef,
    /// The scope user declarations land in.
    pub globals: ScopeRef,
    pub interpreter: Interpreter,
    pub options: ParserOptions,
    resolver: Rc<dyn SyntaxResolver>,
}

impl Session {
    pub fn new() -> Result<Session> {
        Session::with_options(ParserOptions::default())
    }

    pub fn with_options(options: ParserOptions) -> Result<Session> {
        let syntax = SyntaxTable::arbor()?;
        let info = InfoTable::new();
        let prims = Primitives::new();
        let root = Scope::root();
        let interpreter = Interpreter::new(info.clone(), prims.clone());
        let globals = Scope::child(&root);
        let mut session = Session {
            sources: SourceMap::new(),
            syntax,
            info,
            prims,
            root,
            globals,
            interpreter,
            options,
            resolver: Rc::new(NoResolver),
        };
        session.load_bootstrap()?;
        Ok(session)
    }

    /// A session for tests: bootstrapped, with bounded evaluation so that a
    /// runaway rewrite loop fails instead of hanging.
    pub fn test() -> Session {
        let session = Session::new().expect("bootstrap must load");
        session.interpreter.set_fuel(Some(1_000_000));
        session
    }

    pub fn set_resolver(&mut self, resolver: Rc<dyn SyntaxResolver>) {
        self.resolver = resolver;
    }

    fn load_bootstrap(&mut self) -> Result<()> {
        let tree = self
            .parse_source("bootstrap.ab", include_str!("bootstrap.ab"))?
            .ok_or_else(|| {
                Error::internal("bootstrap library is empty", crate::kernel::tree::NOWHERE)
            })?;
        scope::process_declarations(&self.root, &tree, &self.prims.self_name)?;
        Ok(())
    }

    /// Parse one source text into a tree, registering it with the source
    /// map so error positions resolve.
    pub fn parse_source(&mut self, name: &str, text: &str) -> Result<Option<TreeRef>> {
        let base = self.sources.open(name, text);
        let resolver = self.resolver.clone();
        let mut parser = Parser::new(
            text,
            base,
            self.syntax.clone(),
            self.info.clone(),
            &*resolver,
            self.options,
        );
        let tree = parser.parse();
        let mut errors = parser.take_errors();
        if let Some(error) = errors.drain(..).next() {
            return Err(error);
        }
        Ok(tree)
    }

    /// Parse, install declarations into the globals, and evaluate whatever
    /// instructions remain. Declaration-only input yields `None`.
    pub fn eval_source(&mut self, name: &str, text: &str) -> Result<Option<TreeRef>> {
        let tree = match self.parse_source(name, text)? {
            Some(tree) => tree,
            None => return Ok(None),
        };
        let has_instructions =
            scope::process_declarations(&self.globals, &tree, &self.prims.self_name)?;
        if !has_instructions {
            return Ok(None);
        }
        let result = self.interpreter.run_sequence(&self.globals, &tree)?;
        Ok(Some(result))
    }

    pub fn eval(&mut self, text: &str) -> Result<Option<TreeRef>> {
        self.eval_source("<input>", text)
    }

    /// Print a tree the way the parser would re-read it.
    pub fn render(&self, tree: &TreeRef) -> String {
        Renderer::new(self.syntax.clone(), self.info.clone()).render(tree)
    }

    /// Describe an error with its resolved source position.
    pub fn explain(&self, error: &Error) -> String {
        match self.sources.resolve(error.position()) {
            Some(resolved) => format!(
                "{}:{}:{}: {}",
                resolved.file, resolved.line, resolved.column, error
            ),
            None => error.to_string(),
        }
    }
}
