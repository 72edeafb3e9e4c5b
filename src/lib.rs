//! # NotScheme
//! An S-expression scripting language compiled to a flat bytecode stream
//! and executed on a stack-based virtual machine.
//!
//! ## Embedding
//! ```ignore
//! use notscheme::run_file;
//!
//! fn main() {
//!     run_file("hello.ns").unwrap();
//! }
//! ```
//!
//! The crate is organized as a small pipeline: lexing (`lexer`) ->
//! parsing (`parser`) -> code generation (`codegen`) -> module linking
//! (`linker`) -> execution (`vm`). `error` holds the shared error type
//! threaded through every stage.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod lexer;
pub mod linker;
pub mod opcode;
pub mod parser;
pub mod value;
pub mod vm;

use std::path::Path;

use error::Result;
use value::Value;

/// Compiles and links `path` (and everything it transitively `use`s) into
/// one bytecode image, then runs it to completion on a fresh VM.
pub fn run_file(path: impl AsRef<Path>) -> Result<Option<Value>> {
    let image = linker::link_program(path.as_ref())?;
    let mut vm = vm::Vm::load(image)?;
    Ok(vm.run())
}
