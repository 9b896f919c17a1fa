//! Integration tests for Layer 2: Language
//!
//! Tests for the program AST, the expression compiler, and evaluation.

mod ast;
mod eval;
