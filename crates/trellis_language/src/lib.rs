//! Program AST, expression compiler, and evaluator for Trellis.
//!
//! This crate provides:
//! - [`Program`] and the declaration types an external parser produces
//! - [`Expr`] - Source-level expressions, including sub-patterns and aggregates
//! - [`Compiler`] - Resolves an expression against a [`Scope`] of token slots
//! - [`CompiledExpr`] - The evaluable form, driven through an [`Env`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ast;
pub mod compile;
pub mod eval;
pub mod functions;
pub mod span;

pub use ast::{
    ActionCall, ActionDecl, AggregateFn, BinaryOp, Expr, FactDecl, FieldDecl, OptionValue,
    ParamDecl, ParamType, PatternDecl, Program, Quantifier, RemoveRuleDecl, RuleDecl, SpaceDecl,
    SpaceOption, SubPattern, TypeDecl, UnaryOp,
};
pub use compile::{BindingKind, CompiledExpr, Compiler, FieldAccess, Scope};
pub use eval::{EmptyEnv, Env, SliceEnv};
pub use functions::Builtin;
pub use span::Span;
