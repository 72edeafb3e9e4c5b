//! Error taxonomy for the compilation-and-execution pipeline.
//!
//! One variant per pipeline stage, each carrying enough context to render a
//! human-readable diagnostic, following the same hand-rolled-`Display`
//! style as passerine's `Syntax`/`Trace` types rather than a derive macro.

use std::fmt;

#[derive(Debug, Clone)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, col {}", self.line, self.col)
    }
}

#[derive(Debug, Clone)]
pub enum Error {
    /// Lexing or parsing failure.
    Syntax { reason: String, at: Option<Pos> },
    /// Code-generation failure (arity mismatches, redefinitions, etc).
    Codegen { reason: String },
    /// Module resolution / linking failure.
    Module { reason: String },
    /// Failure while preparing a bytecode image for execution (duplicate
    /// labels, malformed jump targets discovered before the VM starts).
    Load { reason: String },
    /// Failure raised by the running VM.
    Runtime {
        kind: String,
        message: String,
        ip: usize,
        instruction: String,
        stack: Vec<String>,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Syntax { reason, at: Some(pos) } => {
                write!(f, "Syntax Error ({}): {}", pos, reason)
            }
            Error::Syntax { reason, at: None } => write!(f, "Syntax Error: {}", reason),
            Error::Codegen { reason } => write!(f, "Code Generation Error: {}", reason),
            Error::Module { reason } => write!(f, "Module Error: {}", reason),
            Error::Load { reason } => write!(f, "Load Error: {}", reason),
            Error::Runtime { kind, message, ip, instruction, stack } => {
                writeln!(f, "--- Runtime Error ---")?;
                writeln!(f, "{}: {}", kind, message)?;
                writeln!(f, "  at ip={} ({})", ip, instruction)?;
                write!(f, "  operand stack (top first): [{}]", stack.join(", "))
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn syntax(reason: impl Into<String>, at: Option<Pos>) -> Error {
        Error::Syntax { reason: reason.into(), at }
    }

    pub fn codegen(reason: impl Into<String>) -> Error {
        Error::Codegen { reason: reason.into() }
    }

    pub fn module(reason: impl Into<String>) -> Error {
        Error::Module { reason: reason.into() }
    }

    pub fn load(reason: impl Into<String>) -> Error {
        Error::Load { reason: reason.into() }
    }

    pub fn runtime(
        kind: impl Into<String>,
        message: impl Into<String>,
        ip: usize,
        instruction: impl Into<String>,
        stack: Vec<String>,
    ) -> Error {
        Error::Runtime {
            kind: kind.into(),
            message: message.into(),
            ip,
            instruction: instruction.into(),
            stack,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
