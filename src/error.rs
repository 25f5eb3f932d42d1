//! Error types for the interface compiler

use thiserror::Error;

/// A position in a source file, attached to tokens and declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: usize,
}

impl Location {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.file, self.line)
    }
}

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{file}({line}): lexer error: {message}")]
    Lex { file: String, line: usize, message: String },

    #[error("{file}({line}): parse error: {message}")]
    Parser { file: String, line: usize, message: String },

    #[error("{file}({line}): {message} (in '{prototype}')")]
    CppParse {
        file: String,
        line: usize,
        message: String,
        prototype: String,
    },

    #[error("JSON schema error: {message}")]
    JsonParse { message: String },

    #[error("{path}: {message}")]
    Loader { path: String, message: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },
}

pub type Result<T> = std::result::Result<T, GeneratorError>;

impl GeneratorError {
    pub fn lex(location: &Location, message: impl Into<String>) -> Self {
        Self::Lex {
            file: location.file.clone(),
            line: location.line,
            message: message.into(),
        }
    }

    pub fn parser(location: &Location, message: impl Into<String>) -> Self {
        Self::Parser {
            file: location.file.clone(),
            line: location.line,
            message: message.into(),
        }
    }

    pub fn cpp(
        location: &Location,
        prototype: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::CppParse {
            file: location.file.clone(),
            line: location.line,
            message: message.into(),
            prototype: prototype.into(),
        }
    }

    pub fn json(message: impl Into<String>) -> Self {
        Self::JsonParse {
            message: message.into(),
        }
    }

    pub fn loader(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Loader {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Short, stable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Lex { .. } => "lexer",
            Self::Parser { .. } => "parser",
            Self::CppParse { .. } => "cpp",
            Self::JsonParse { .. } => "json",
            Self::Loader { .. } => "loader",
            Self::InvalidFormat { .. } => "format",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_error_carries_location() {
        let err = GeneratorError::parser(&Location::new("IFoo.h", 12), "unmatched '{'");
        assert_eq!(err.to_string(), "IFoo.h(12): parse error: unmatched '{'");
        assert_eq!(err.kind(), "parser");
    }

    #[test]
    fn test_cpp_error_carries_prototype() {
        let err = GeneratorError::cpp(
            &Location::new("IFoo.h", 3),
            "uint32_t Level() const",
            "property type mismatch",
        );
        assert!(err.to_string().contains("uint32_t Level() const"));
        assert_eq!(err.kind(), "cpp");
    }
}
