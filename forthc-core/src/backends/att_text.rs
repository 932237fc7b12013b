use super::{render_directive, Backend, INDENT};
use crate::compiler::{Instruction, Mnemonic, OpInst, Operand};
use anyhow::Result;

fn mnemonic(m: Mnemonic) -> &'static str {
    match m {
        Mnemonic::Push => "pushq",
        Mnemonic::Pop => "popq",
        Mnemonic::Mov => "movq",
        Mnemonic::Movabs => "movabsq",
        Mnemonic::Lea => "leaq",
        Mnemonic::Add => "addq",
        Mnemonic::Sub => "subq",
        Mnemonic::Imul => "imulq",
        Mnemonic::Cqo => "cqto",
        Mnemonic::Idiv => "idivq",
        Mnemonic::Xor => "xorq",
        Mnemonic::Test => "testq",
        Mnemonic::Cmp => "cmpq",
        Mnemonic::Jmp => "jmp",
        Mnemonic::Jz => "jz",
        Mnemonic::Jnz => "jne",
        Mnemonic::Jle => "jle",
        Mnemonic::Call => "call",
        Mnemonic::Ret => "ret",
    }
}

fn operand(arg: &Operand) -> String {
    match arg {
        Operand::Reg(r) => format!("%{}", r.name()),
        Operand::Imm(v) => format!("${v}"),
        Operand::Mem(r, 0) => format!("(%{})", r.name()),
        Operand::Mem(r, disp) => format!("{disp}(%{})", r.name()),
        Operand::RipRel(symbol, 0) => format!("{symbol}(%rip)"),
        Operand::RipRel(symbol, disp) => format!("{symbol}+{disp}(%rip)"),
        Operand::Symbol(name) => name.clone(),
        Operand::Local(target) => target.to_string(),
    }
}

/// Source operands come first in AT&T syntax.
pub fn render_op(op: &OpInst) -> String {
    let args = op.args.iter().rev().map(operand).collect::<Vec<_>>();
    if args.is_empty() {
        format!("{INDENT}{}", mnemonic(op.mnemonic))
    } else {
        format!("{INDENT}{} {}", mnemonic(op.mnemonic), args.join(", "))
    }
}

/// GNU as AT&T-syntax text.
#[derive(Default)]
pub struct AttTextBackend {
    pub lines: Vec<String>,
}

impl AttTextBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for AttTextBackend {
    fn process(&mut self, insts: Vec<Instruction>) -> Result<()> {
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

    #[test]
    fn test_operand_order() {
        let store = OpInst {
            mnemonic: Mnemonic::Mov,
            args: vec![Operand::Mem(Reg::R10, -8), Operand::Reg(Reg::Rax)],
        };
        assert_eq!(render_op(&store), "    movq %rax, -8(%r10)");

        let lea = OpInst {
            mnemonic: Mnemonic::Lea,
            args: vec![
                Operand::Reg(Reg::Rdi),
                Operand::RipRel(".STR0".to_string(), 0),
            ],
        };
        assert_eq!(render_op(&lea), "    leaq .STR0(%rip), %rdi");

        let push = OpInst {
            mnemonic: Mnemonic::Sub,
            args: vec![Operand::Reg(Reg::R10), Operand::Imm(8)],
        };
        assert_eq!(render_op(&push), "    subq $8, %r10");
    }
}
