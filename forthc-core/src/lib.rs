pub mod code_gen;
pub mod compiler;
pub mod config;
pub mod error;
pub mod parser;
pub mod scope;
pub mod tokens;
#[cfg(test)]
mod tests;

pub mod backends;
pub mod toolchain;

pub use config::{Abi, Config, Syntax};
pub use error::CompileError;
