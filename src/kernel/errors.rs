use std::cell::RefCell;
use std::fmt;

use crate::kernel::tree::Position;

/// All diagnostics carry a source position resolvable through the source map.
#[derive(Clone, Debug)]
pub enum Error {
    /// Bad token, mismatched delimiter.
    Lexical { message: String, position: Position },
    /// Structural problem while parsing.
    Parse { message: String, position: Position },
    /// No candidate rewrite matched a call site.
    Binding { message: String, position: Position },
    /// Unification failed in a required position.
    Type { message: String, position: Position },
    /// An invariant was violated; always a bug.
    Internal { message: String, position: Position },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn lexical(message: impl Into<String>, position: Position) -> Error {
        Error::Lexical {
            message: message.into(),
            position,
        }
    }

    pub fn parse(message: impl Into<String>, position: Position) -> Error {
        Error::Parse {
            message: message.into(),
            position,
        }
    }

    pub fn binding(message: impl Into<String>, position: Position) -> Error {
        Error::Binding {
            message: message.into(),
            position,
        }
    }

    pub fn typing(message: impl Into<String>, position: Position) -> Error {
        Error::Type {
            message: message.into(),
            position,
        }
    }

    pub fn internal(message: impl Into<String>, position: Position) -> Error {
        Error::Internal {
            message: message.into(),
            position,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Error::Lexical { position, .. }
            | Error::Parse { position, .. }
            | Error::Binding { position, .. }
            | Error::Type { position, .. }
            | Error::Internal { position, .. } => *position,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::Lexical { message, .. }
            | Error::Parse { message, .. }
            | Error::Binding { message, .. }
            | Error::Type { message, .. }
            | Error::Internal { message, .. } => message,
        }
    }

    pub fn is_type_error(&self) -> bool {
        matches!(self, Error::Type { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            Error::Lexical { .. } => "lexical error",
            Error::Parse { .. } => "parse error",
            Error::Binding { .. } => "binding error",
            Error::Type { .. } => "type error",
            Error::Internal { .. } => "internal error",
        };
        write!(f, "{}: {}", label, self.message())
    }
}

impl std::error::Error for Error {}

/// Buffers diagnostics raised while speculatively binding a candidate.
/// The dispatcher commits the buffer only if that candidate is chosen, so
/// probing a rewrite that ends up rejected never pollutes what the user sees.
#[derive(Default)]
pub struct ErrorSink {
    buffered: RefCell<Vec<Error>>,
}

impl ErrorSink {
    pub fn new() -> ErrorSink {
        ErrorSink::default()
    }

    pub fn log(&self, error: Error) {
        self.buffered.borrow_mut().push(error);
    }

    pub fn had_errors(&self) -> bool {
        !self.buffered.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.buffered.borrow_mut().clear();
    }

    /// Take every buffered diagnostic, emptying the sink.
    pub fn drain(&self) -> Vec<Error> {
        std::mem::take(&mut *self.buffered.borrow_mut())
    }

    /// Move this sink's diagnostics into another sink.
    pub fn commit_into(&self, other: &ErrorSink) {
        other.buffered.borrow_mut().append(&mut self.buffered.borrow_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_commit_discipline() {
        let outer = ErrorSink::new();
        let speculative = ErrorSink::new();
        speculative.log(Error::typing("cannot unify", 3));
        assert!(speculative.had_errors());
        assert!(!outer.had_errors());

        // A rejected candidate just drops its sink.
        speculative.clear();
        assert!(!speculative.had_errors());

        // A chosen candidate commits.
        speculative.log(Error::typing("cannot unify", 7));
        speculative.commit_into(&outer);
        assert!(!speculative.had_errors());
        let drained = outer.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].position(), 7);
    }
}
