//! Source positions and the compiler's error taxonomy.
//!
//! All errors produced by the substrate are instances of [`CompileError`]: a
//! kind drawn from the closed [`ErrorKind`] set, an optional source position,
//! and a message. The kind decides whether the error is a user-facing code
//! error (reported with its position through the diagnostics channel) or an
//! internal invariant violation (propagated to the top of the thread).

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can produce a compile error.
pub type CResult<T> = Result<T, CompileError>;

/// A position inside a source file.
///
/// `file` is absent for synthetic entities (built-in types, template
/// instantiations, compiler-generated functions). Offsets are byte offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SrcPos {
    /// File the position refers to, if any.
    pub file: Option<Arc<PathBuf>>,
    /// Byte offset of the start of the range.
    pub pos: u32,
    /// Length of the range in bytes.
    pub len: u32,
}

impl SrcPos {
    /// Creates a position inside `file`.
    pub fn new(file: Arc<PathBuf>, pos: u32, len: u32) -> Self {
        Self {
            file: Some(file),
            pos,
            len,
        }
    }

    /// Creates an unknown position, used for synthetic entities.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// True if this position does not refer to any file.
    pub fn is_unknown(&self) -> bool {
        self.file.is_none()
    }

    /// The file this position refers to, if known.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_deref().map(PathBuf::as_path)
    }

    /// Extends this position to also cover `other`.
    ///
    /// Positions in different files do not merge; the first file wins.
    #[must_use]
    pub fn extend(&self, other: &Self) -> Self {
        match (&self.file, &other.file) {
            (Some(a), Some(b)) if a == b => {
                let start = self.pos.min(other.pos);
                let end = (self.pos + self.len).max(other.pos + other.len);
                Self {
                    file: Some(a.clone()),
                    pos: start,
                    len: end - start,
                }
            }
            (Some(_), _) => self.clone(),
            (None, _) => other.clone(),
        }
    }
}

impl fmt::Display for SrcPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}({}-{})", file.display(), self.pos, self.pos + self.len),
            None => write!(f, "<unknown location>"),
        }
    }
}

/// The closed set of error kinds known to the compiler.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and
/// `Into<&'static str>` implementations. The string form matches the variant
/// name exactly (e.g. `SyntaxError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed source text, unresolvable names used in source positions.
    SyntaxError,
    /// A type mismatch in user code.
    TypeError,
    /// An invalid type definition (bad inheritance, duplicate members).
    TypedefError,
    /// An error raised while running user code hosted by the compiler.
    RuntimeError,
    /// An invariant violation inside the compiler itself.
    InternalError,
    /// An invariant violation in the type system machinery.
    InternalTypeError,
    /// A language definition (grammar file) is inconsistent.
    LangDefError,
    /// A built-in definition could not be set up.
    BuiltInError,
    /// Hot reload could not match old and new entities.
    ReplaceError,
    /// Documentation could not be extracted.
    DocError,
    /// Serialization of diagnostics failed.
    SerializationError,
    /// A cross-thread message could not be delivered.
    MsgError,
    /// Out-of-bounds array access inside the compiler.
    ArrayError,
    /// String manipulation failure inside the compiler.
    StrError,
    /// An image resource failed to load.
    ImageLoadError,
    /// A name that can never resolve (empty, or malformed parts).
    InvalidName,
    /// Debug-only assertion failure.
    DebugError,
    /// An abstract function was invoked.
    AbstractFnCalled,
}

impl ErrorKind {
    /// True for errors caused by user source code.
    ///
    /// User errors carry a position and are aggregated per package; the
    /// reader replaces the erroring entity with a placeholder and continues.
    /// Everything else indicates an invariant violation in the
    /// implementation and propagates to the top of the thread.
    #[must_use]
    pub fn is_user_error(self) -> bool {
        matches!(
            self,
            Self::SyntaxError
                | Self::TypeError
                | Self::TypedefError
                | Self::LangDefError
                | Self::ReplaceError
                | Self::InvalidName
                | Self::DocError
        )
    }
}

/// An error produced somewhere in the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileError {
    /// What kind of error this is.
    pub kind: ErrorKind,
    /// Where the error originated, if known.
    pub pos: SrcPos,
    /// Human-readable description.
    pub msg: String,
}

impl CompileError {
    /// Creates an error without a position.
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            pos: SrcPos::unknown(),
            msg: msg.into(),
        }
    }

    /// Creates an error at a position.
    pub fn at(kind: ErrorKind, pos: SrcPos, msg: impl Into<String>) -> Self {
        Self {
            kind,
            pos,
            msg: msg.into(),
        }
    }

    /// Shorthand for a syntax error at a position.
    pub fn syntax(pos: SrcPos, msg: impl Into<String>) -> Self {
        Self::at(ErrorKind::SyntaxError, pos, msg)
    }

    /// Shorthand for a type error at a position.
    pub fn type_error(pos: SrcPos, msg: impl Into<String>) -> Self {
        Self::at(ErrorKind::TypeError, pos, msg)
    }

    /// Shorthand for an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, msg)
    }

    /// True for errors caused by user source code.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        self.kind.is_user_error()
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pos.is_unknown() {
            write!(f, "{}: {}", self.kind, self.msg)
        } else {
            write!(f, "{}: {}: {}", self.pos, self.kind, self.msg)
        }
    }
}

impl std::error::Error for CompileError {}

/// Collected diagnostics for a compilation session.
///
/// User errors are recorded here by reader entry points rather than aborting
/// the package: the erroring entity becomes a placeholder and the rest of the
/// package continues to load. Internal errors are never recorded; they
/// propagate.
#[derive(Debug, Default, Serialize)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a user error. Internal errors are rejected with a panic in
    /// debug builds since they must propagate instead.
    pub fn report(&mut self, error: CompileError) {
        debug_assert!(error.is_user_error(), "internal error reported as diagnostic: {error}");
        self.errors.push(error);
    }

    /// All recorded errors, in report order.
    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Removes and returns all recorded errors.
    pub fn take(&mut self) -> Vec<CompileError> {
        std::mem::take(&mut self.errors)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(ErrorKind::SyntaxError.to_string(), "SyntaxError");
        assert_eq!(ErrorKind::from_str("ReplaceError").unwrap(), ErrorKind::ReplaceError);
    }

    #[test]
    fn user_and_internal_errors_are_distinguished() {
        assert!(ErrorKind::SyntaxError.is_user_error());
        assert!(ErrorKind::TypedefError.is_user_error());
        assert!(!ErrorKind::InternalError.is_user_error());
        assert!(!ErrorKind::AbstractFnCalled.is_user_error());
        assert!(!ErrorKind::ArrayError.is_user_error());
    }

    #[test]
    fn extend_merges_ranges_in_the_same_file() {
        let file = Arc::new(PathBuf::from("a.bs"));
        let a = SrcPos::new(file.clone(), 10, 5);
        let b = SrcPos::new(file, 20, 4);
        let merged = a.extend(&b);
        assert_eq!(merged.pos, 10);
        assert_eq!(merged.len, 14);
    }

    #[test]
    fn extend_keeps_the_first_file_on_mismatch() {
        let a = SrcPos::new(Arc::new(PathBuf::from("a.bs")), 1, 2);
        let b = SrcPos::new(Arc::new(PathBuf::from("b.bs")), 7, 2);
        assert_eq!(a.extend(&b), a);
    }
}
