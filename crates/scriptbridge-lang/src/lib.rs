//! A small Lox-flavoured scripting language.
//!
//! `TreeWalker` implements the bridge's `Interpreter` trait, so any script
//! it runs talks to the outside world only through `HostFunctions`.

pub mod ast;
pub mod interpreter;
pub mod parser;
pub mod scanner;
pub mod value;

pub use interpreter::TreeWalker;
pub use parser::parse;
pub use value::Value;
