//! Tokenizer and cursor shared by the DDL compiler and the statement planner.

pub mod lexer;

pub use lexer::{Token, TokenCursor, split_statements, tokenize};
