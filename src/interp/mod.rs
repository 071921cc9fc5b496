//! The script interpreter: values, lexer, parser and evaluator.

pub mod eval;
pub mod lexer;
pub mod parser;
pub mod value;
