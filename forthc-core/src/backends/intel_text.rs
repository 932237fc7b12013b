use super::{render_directive, Backend, INDENT};
use crate::compiler::{Instruction, Mnemonic, OpInst, Operand};
use anyhow::Result;

fn mnemonic(m: Mnemonic) -> &'static str {
    match m {
        Mnemonic::Push => "push",
        Mnemonic::Pop => "pop",
        Mnemonic::Mov => "mov",
        Mnemonic::Movabs => "movabs",
        Mnemonic::Lea => "lea",
        Mnemonic::Add => "add",
        Mnemonic::Sub => "sub",
        Mnemonic::Imul => "imul",
        Mnemonic::Cqo => "cqo",
        Mnemonic::Idiv => "idiv",
        Mnemonic::Xor => "xor",
        Mnemonic::Test => "test",
        Mnemonic::Cmp => "cmp",
        Mnemonic::Jmp => "jmp",
        Mnemonic::Jz => "jz",
        Mnemonic::Jnz => "jne",
        Mnemonic::Jle => "jle",
        Mnemonic::Call => "call",
        Mnemonic::Ret => "ret",
    }
}

fn displacement(disp: i64) -> String {
    match disp {
        0 => String::new(),
        d if d < 0 => format!(" - {}", -d),
        d => format!(" + {d}"),
    }
}

fn operand(arg: &Operand, sized: bool) -> String {
    match arg {
        Operand::Reg(r) => r.name().to_string(),
        Operand::Imm(v) => v.to_string(),
        Operand::Mem(r, disp) => {
            let prefix = if sized { "QWORD PTR " } else { "" };
            format!("{prefix}[{}{}]", r.name(), displacement(*disp))
        }
        Operand::RipRel(symbol, disp) => format!("[rip + {symbol}{}]", displacement(*disp)),
        Operand::Symbol(name) => name.clone(),
        Operand::Local(target) => target.to_string(),
    }
}

pub fn render_op(op: &OpInst) -> String {
    // lea takes an address, not a sized memory access
    let sized = op.mnemonic != Mnemonic::Lea;
    let args = op
        .args
        .iter()
        .map(|arg| operand(arg, sized))
        .collect::<Vec<_>>();
    if args.is_empty() {
        format!("{INDENT}{}", mnemonic(op.mnemonic))
    } else {
        format!("{INDENT}{} {}", mnemonic(op.mnemonic), args.join(", "))
    }
}

/// GNU as Intel-syntax text.
pub struct IntelTextBackend {
    pub lines: Vec<String>,
}

impl IntelTextBackend {
    pub fn new() -> Self {
        Self { lines: vec![] }
    }
}

impl Default for IntelTextBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for IntelTextBackend {
    fn process(&mut self, insts: Vec<Instruction>) -> Result<()> {
        self.lines.push(format!("{INDENT}.intel_syntax noprefix"));
        for inst in insts {
            self.lines.push(match inst {
                Instruction::Op(op) => render_op(&op),
                Instruction::Directive(d) => render_directive(&d),
                Instruction::Label(name) => format!("{name}:"),
                Instruction::LocalLabel(label) => format!("{label}:"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod suite {
    use super::*;
    use crate::compiler::Reg;

    fn op(mnemonic: Mnemonic, args: Vec<Operand>) -> OpInst {
        OpInst { mnemonic, args }
    }

    #[test]
    fn test_operands() {
        assert_eq!(
            render_op(&op(
                Mnemonic::Mov,
                vec![Operand::Mem(Reg::R10, 0), Operand::Imm(-3)]
            )),
            "    mov QWORD PTR [r10], -3"
        );
        assert_eq!(
            render_op(&op(
                Mnemonic::Lea,
                vec![Operand::Reg(Reg::Rax), Operand::Mem(Reg::Rbp, -16)]
            )),
            "    lea rax, [rbp - 16]"
        );
        assert_eq!(
            render_op(&op(
                Mnemonic::Lea,
                vec![
                    Operand::Reg(Reg::R10),
                    Operand::RipRel("data_stack".to_string(), 4096)
                ]
            )),
            "    lea r10, [rip + data_stack + 4096]"
        );
        assert_eq!(render_op(&op(Mnemonic::Cqo, vec![])), "    cqo");
    }
}
