use crate::compiler::{self, Directive, Section};
use anyhow::Result;

mod att_text;
mod intel_text;

pub trait Backend {
    fn process(&mut self, insts: Vec<compiler::Instruction>) -> Result<()>;
}

pub use att_text::AttTextBackend;
pub use intel_text::IntelTextBackend;

const INDENT: &str = "    ";

/// Directives are spelled the same in both syntaxes.
fn render_directive(directive: &Directive) -> String {
    match directive {
        Directive::File(name) => format!("{INDENT}.file 1 \"{}\"", escape(name)),
        Directive::Loc { line, col } => format!("{INDENT}.loc 1 {line} {col}"),
        Directive::Section(section) => match section {
            Section::Bss => format!("{INDENT}.section .bss"),
            Section::Rodata => format!("{INDENT}.section .rodata"),
            Section::Rdata => format!("{INDENT}.section .rdata,\"dr\""),
            Section::Text => format!("{INDENT}.text"),
            Section::NoteGnuStack => format!("{INDENT}.section .note.GNU-stack,\"\",@progbits"),
        },
        Directive::Lcomm(name, size) => format!("{INDENT}.lcomm {name}, {size}"),
        Directive::Asciz(label, value) => format!("{label}: .asciz \"{}\"", escape(value)),
        Directive::Globl(name) => format!("{INDENT}.globl {name}"),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod suite {
    use super::*;

    #[test]
    fn test_directives() {
        assert_eq!(
            render_directive(&Directive::File("a \"b\".fs".to_string())),
            "    .file 1 \"a \\\"b\\\".fs\""
        );
        assert_eq!(
            render_directive(&Directive::Asciz(".STR0".to_string(), "%lld ".to_string())),
            ".STR0: .asciz \"%lld \""
        );
        assert_eq!(
            render_directive(&Directive::Lcomm("data_stack".to_string(), 4096)),
            "    .lcomm data_stack, 4096"
        );
    }
}
