use crate::code_gen;
use crate::config::{Config, Syntax};

use super::{backends, compiler, parser, tokens};
use anyhow::Result;

pub fn run(
    source: &[u8],
    source_name: &str,
    config: &Config,
    backend: &mut impl backends::Backend,
) -> Result<()> {
    tokens::tokenize(source)
        .and_then(parser::parse)
        .and_then(|program| compiler::compile(program, source_name, config))
        .and_then(|instructions| code_gen::transform(instructions, config.into()))
        .and_then(|instructions| backend.process(instructions))
}

/// Compile a whole source file into assembly text in the configured syntax.
pub fn compile(source: &str, source_name: &str, config: &Config) -> Result<String> {
    let lines = match config.syntax {
        Syntax::Intel => {
            let mut backend = backends::IntelTextBackend::new();
            run(source.as_bytes(), source_name, config, &mut backend)?;
            backend.lines
        }
        Syntax::Att => {
            let mut backend = backends::AttTextBackend::new();
            run(source.as_bytes(), source_name, config, &mut backend)?;
            backend.lines
        }
    };
    Ok(lines.join("\n") + "\n")
}
