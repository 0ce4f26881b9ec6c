//! yq compiler library.
//!
//! Provides the source-to-bytecode pipeline: lexer, recursive-descent
//! parser, capture analysis, and the code generator that lowers the AST
//! onto the stack machine. The output is a ready-to-run
//! [`yq_core::Memory`].

pub mod ast;
pub mod captures;
pub mod codegen;
pub mod lexer;
pub mod parser;

pub use ast::{Expr, Literal, Pattern, Program, Stmt};
pub use codegen::{EVENT_GLOBALS, generate};
pub use lexer::{Token, TokenKind, tokenize};
pub use parser::parse;

use yq_core::error::Result;
use yq_core::memory::Memory;

/// Compile a program source to an executable memory.
pub fn compile(source: &str) -> Result<Memory> {
    let program = parse(source)?;
    generate(&program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_pipeline_produces_text() {
        let mem = compile("say 1 + 2").unwrap();
        assert!(!mem.text.is_empty());
    }

    #[test]
    fn test_compile_propagates_stage_errors() {
        assert!(compile("say \"unterminated").is_err()); // lexer
        assert!(compile("say )").is_err()); // parser
        assert!(compile("say nothing_declared_here").is_err()); // codegen
    }
}
