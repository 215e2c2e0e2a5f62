//! Score compiler: text → Loops and Chains → rendered event Program.

pub mod arpeggio;
pub mod ast;
pub mod chain;
pub mod chord;
pub mod error;
pub mod function;
pub mod lexer;
pub mod note;
pub mod parser;
pub mod repeat;
pub mod rhythm;
pub mod token;

pub use ast::*;
pub use error::{CompileError, ErrorKind};
pub use function::{Argument, Function};
pub use note::Note;

use crate::event::render::render;
use parser::Parser;

/// The score compiler.
///
/// Parses source text line by line into Loops and Chains, then renders each
/// Chain into absolute-timed events.
pub struct Compiler;

impl Compiler {
    /// Parse a score without rendering its Chains.
    pub fn parse(source: &str) -> Result<Program, CompileError> {
        Self::parse_with(source, Params::default())
    }

    /// Parse with document defaults seeded from configuration.
    pub fn parse_with(source: &str, defaults: Params) -> Result<Program, CompileError> {
        Parser::new(defaults).parse(source)
    }

    /// Parse and render a score.
    pub fn compile(source: &str) -> Result<Program, CompileError> {
        Self::compile_with(source, Params::default())
    }

    pub fn compile_with(source: &str, defaults: Params) -> Result<Program, CompileError> {
        let mut program = Self::parse_with(source, defaults)?;
        render(&mut program);
        Ok(program)
    }
}
