//! Script failure types

use std::fmt;

use thiserror::Error;

/// Category of a rejected language construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForbiddenConstruct {
    Import,
    Loop,
    FunctionDefinition,
    ClassDefinition,
    With,
    Lambda,
    ExceptionHandling,
    AttributeAccess,
    DictLiteral,
    Comprehension,
    Generator,
    ScopeDeclaration,
    /// del, assert, pass, goto
    Statement,
    /// Call to anything outside the built-in set
    NonBuiltinCall,
}

impl ForbiddenConstruct {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Loop => "loop",
            Self::FunctionDefinition => "function definition",
            Self::ClassDefinition => "class definition",
            Self::With => "with statement",
            Self::Lambda => "lambda",
            Self::ExceptionHandling => "exception handling",
            Self::AttributeAccess => "attribute access",
            Self::DictLiteral => "dict literal",
            Self::Comprehension => "comprehension",
            Self::Generator => "generator or await",
            Self::ScopeDeclaration => "scope declaration",
            Self::Statement => "disallowed statement",
            Self::NonBuiltinCall => "call to a non-builtin",
        }
    }
}

impl fmt::Display for ForbiddenConstruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a script did not run to completion
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("forbidden construct on line {line}: {construct}")]
    Forbidden {
        construct: ForbiddenConstruct,
        line: usize,
    },

    #[error("runtime error on line {line}: {message}")]
    Runtime { line: usize, message: String },
}

impl ScriptError {
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    pub fn forbidden(construct: ForbiddenConstruct, line: usize) -> Self {
        Self::Forbidden { construct, line }
    }

    pub fn runtime(line: usize, message: impl Into<String>) -> Self {
        Self::Runtime {
            line,
            message: message.into(),
        }
    }

    /// Syntax errors and forbidden constructs are rejected before execution.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::Syntax { .. } | Self::Forbidden { .. })
    }

    pub fn forbidden_construct(&self) -> Option<ForbiddenConstruct> {
        match self {
            Self::Forbidden { construct, .. } => Some(*construct),
            _ => None,
        }
    }
}
