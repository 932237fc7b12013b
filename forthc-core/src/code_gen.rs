use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::compiler::{Directive, Instruction, Operand};
use crate::config::Config;
use crate::scope::{Direction, LabelRef};

pub struct CodeGenContext {
    debug_info: bool,
}

impl Default for CodeGenContext {
    fn default() -> Self {
        Self { debug_info: true }
    }
}

impl From<&Config> for CodeGenContext {
    fn from(config: &Config) -> Self {
        Self {
            debug_info: config.debug_info,
        }
    }
}

/// Index of the instruction a local-label reference at `from` lands on:
/// the nearest definition after it (`f`) or before it (`b`).
pub fn resolve_local_label(
    instructions: &[Instruction],
    from: usize,
    target: &LabelRef,
) -> Option<usize> {
    let is_target = |inst: &Instruction| matches!(inst, Instruction::LocalLabel(l) if *l == target.label);
    match target.direction {
        Direction::Forward => instructions
            .iter()
            .enumerate()
            .skip(from + 1)
            .find(|(_, inst)| is_target(*inst))
            .map(|(i, _)| i),
        Direction::Backward => instructions[..from.min(instructions.len())]
            .iter()
            .rposition(is_target),
    }
}

/// Global labels and the index they are defined at.
pub fn resolve_labels(instructions: &[Instruction]) -> HashMap<String, usize> {
    let mut map = HashMap::default();

    for (index, inst) in instructions.iter().enumerate() {
        if let Instruction::Label(name) = inst {
            map.insert(name.clone(), index);
        }
    }
    map
}

pub fn transform(
    instructions: Vec<Instruction>,
    context: CodeGenContext,
) -> Result<Vec<Instruction>> {
    [verify_local_labels, strip_debug_info]
        .iter()
        .try_fold(instructions, |acc, transformer| transformer(acc, &context))
}

fn verify_local_labels(
    instructions: Vec<Instruction>,
    _context: &CodeGenContext,
) -> Result<Vec<Instruction>> {
    let words = resolve_labels(&instructions);

    for (index, inst) in instructions.iter().enumerate() {
        let Instruction::Op(op) = inst else {
            continue;
        };
        for arg in &op.args {
            match arg {
                Operand::Local(target) => {
                    // a jump must never leave the word it was emitted in
                    let Some(dest) = resolve_local_label(&instructions, index, target) else {
                        bail!("Can't find label {target}");
                    };
                    let (lo, hi) = (index.min(dest), index.max(dest));
                    if instructions[lo..hi]
                        .iter()
                        .any(|i| matches!(i, Instruction::Label(_)))
                    {
                        bail!("Can't find label {target}");
                    }
                }
                Operand::Symbol(name) if !words.contains_key(name) && !is_external(name) => {
                    bail!("Can't find label {name}");
                }
                _ => {}
            }
        }
    }

    Ok(instructions)
}

fn is_external(name: &str) -> bool {
    name == crate::compiler::PRINT_FUNCTION
}

fn strip_debug_info(
    instructions: Vec<Instruction>,
    context: &CodeGenContext,
) -> Result<Vec<Instruction>> {
    if context.debug_info {
        return Ok(instructions);
    }

    Ok(instructions
        .into_iter()
        .filter(|inst| {
            !matches!(
                inst,
                Instruction::Directive(Directive::File(_) | Directive::Loc { .. })
            )
        })
        .collect())
}

#[cfg(test)]
mod suite {
    use super::*;
    use crate::compiler::{Mnemonic, OpInst};
    use crate::scope::{LabelClass, LocalLabel};

    fn jump(target: LabelRef) -> Instruction {
        Instruction::Op(OpInst {
            mnemonic: Mnemonic::Jmp,
            args: vec![Operand::Local(target)],
        })
    }

    #[test]
    fn test_resolve_nearest_label() {
        let label = LocalLabel {
            class: LabelClass::IfElse,
            depth: 1,
        };
        let insts = vec![
            Instruction::LocalLabel(label),
            jump(label.forward()),
            Instruction::LocalLabel(label),
            jump(label.backward()),
            Instruction::LocalLabel(label),
        ];
        assert_eq!(resolve_local_label(&insts, 1, &label.forward()), Some(2));
        assert_eq!(resolve_local_label(&insts, 3, &label.backward()), Some(2));
        assert_eq!(resolve_local_label(&insts, 0, &label.backward()), None);
    }

    #[test]
    fn test_missing_label() {
        let label = LocalLabel {
            class: LabelClass::LoopExit,
            depth: 2,
        };
        let insts = vec![Instruction::Label("main".to_string()), jump(label.forward())];
        let err = transform(insts, CodeGenContext::default()).unwrap_err();
        assert_eq!(err.to_string(), "Can't find label 62f");
    }
}
