use std::collections::HashMap;

use crate::{
    config::{Abi, Config},
    error::CompileError,
    parser::{AstNode, AstNodeSpan, Builtin, Operator, Program, WordDefinition},
    scope::{align_up, Frame, LabelRef, LocalLabel, Scopes, STACK_ALIGNMENT, WORD_SIZE},
};
use anyhow::{bail, ensure, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Op(OpInst),
    Directive(Directive),
    Label(String),
    LocalLabel(LocalLabel),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpInst {
    pub mnemonic: Mnemonic,
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Push,
    Pop,
    Mov,
    Movabs,
    Lea,
    Add,
    Sub,
    Imul,
    Cqo,
    Idiv,
    Xor,
    Test,
    Cmp,
    Jmp,
    Jz,
    Jnz,
    Jle,
    Call,
    Ret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Rax,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
}

impl Reg {
    pub const ALL: [Reg; 11] = [
        Reg::Rax,
        Reg::Rcx,
        Reg::Rdx,
        Reg::Rsi,
        Reg::Rdi,
        Reg::Rbp,
        Reg::Rsp,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Reg::Rax => "rax",
            Reg::Rcx => "rcx",
            Reg::Rdx => "rdx",
            Reg::Rsi => "rsi",
            Reg::Rdi => "rdi",
            Reg::Rbp => "rbp",
            Reg::Rsp => "rsp",
            Reg::R8 => "r8",
            Reg::R9 => "r9",
            Reg::R10 => "r10",
            Reg::R11 => "r11",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(Reg),
    Imm(i64),
    /// machine word at `[reg + disp]`
    Mem(Reg, i64),
    /// `[rip + symbol + disp]`
    RipRel(String, i64),
    /// call target
    Symbol(String),
    /// jump target
    Local(LabelRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Bss,
    Rodata,
    Rdata,
    Text,
    NoteGnuStack,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    File(String),
    Loc { line: usize, col: usize },
    Section(Section),
    Lcomm(String, usize),
    Asciz(String, String),
    Globl(String),
}

macro_rules! op {
    ($mnemonic: ident $(, $arg: expr)*) => {
        Instruction::Op(OpInst {
            mnemonic: Mnemonic::$mnemonic,
            args: vec![$($arg),*],
        })
    };
}

macro_rules! reg {
    ($reg: expr) => {
        Operand::Reg($reg)
    };
}

macro_rules! mem {
    ($reg: expr) => {
        Operand::Mem($reg, 0)
    };
    ($reg: expr, $disp: expr) => {
        Operand::Mem($reg, $disp)
    };
}

macro_rules! loc {
    ($line: expr, $col: expr) => {
        Instruction::Directive(Directive::Loc {
            line: $line,
            col: $col,
        })
    };
}

pub const DATA_STACK: &str = "data_stack";
pub const PRINT_FORMAT_LABEL: &str = ".STR0";
pub const PRINT_FORMAT: &str = "%lld ";
pub const PRINT_FUNCTION: &str = "printf";

/// operand stack pointer
const DSP: Reg = Reg::R10;
const ACC: Reg = Reg::Rax;
const TMP: Reg = Reg::R11;
const LOOP_COUNT: Reg = Reg::R8;
const LOOP_START: Reg = Reg::R9;

const RESERVED_SYMBOLS: [&str; 2] = [DATA_STACK, PRINT_FUNCTION];

/// Identifiers GAS reads as operand keywords or operators in Intel syntax.
const ASSEMBLER_KEYWORDS: [&str; 30] = [
    "byte", "word", "dword", "fword", "qword", "tbyte", "oword", "xmmword", "ymmword", "zmmword",
    "ptr", "offset", "flat", "short", "near", "far", "and", "or", "xor", "not", "mod", "shl",
    "shr", "eq", "ne", "lt", "le", "gt", "ge", "st",
];

const LEGACY_REGISTERS: [&str; 45] = [
    "al", "ah", "ax", "eax", "rax", "bl", "bh", "bx", "ebx", "rbx", "cl", "ch", "cx", "ecx", "rcx",
    "dl", "dh", "dx", "edx", "rdx", "sil", "si", "esi", "rsi", "dil", "di", "edi", "rdi", "bpl",
    "bp", "ebp", "rbp", "spl", "sp", "esp", "rsp", "ip", "eip", "rip", "cs", "ds", "es", "fs",
    "gs", "ss",
];

impl Abi {
    /// registers carrying the format string and the value for `printf`
    pub fn print_registers(&self) -> (Reg, Reg) {
        match self {
            Abi::SysV => (Reg::Rdi, Reg::Rsi),
            Abi::Win64 => (Reg::Rcx, Reg::Rdx),
        }
    }
}

pub fn compile(program: Program, source_name: &str, config: &Config) -> Result<Vec<Instruction>> {
    ensure!(
        config.operand_stack_size >= WORD_SIZE && config.operand_stack_size % WORD_SIZE == 0,
        "Operand stack size must be a positive multiple of {WORD_SIZE}, got {}",
        config.operand_stack_size
    );
    resolve_symbols(&program)?;

    let mut scopes = Scopes::new();
    let mut instructions = vec![];
    let mut emit = |inst: Instruction| instructions.push(inst);

    emit_prelude(&mut emit, source_name, config);
    for word in &program.words {
        visit_word(word, &mut emit, &mut scopes, config)?;
    }
    if config.abi == Abi::SysV {
        emit(Instruction::Directive(Directive::Section(
            Section::NoteGnuStack,
        )));
    }

    Ok(instructions)
}

/// `prefix` followed by a number in `range` and one of `suffixes`, e.g. `r9d`.
fn is_numbered_register(
    name: &str,
    prefix: &str,
    range: std::ops::Range<u32>,
    suffixes: &[&str],
) -> bool {
    let Some(rest) = name.strip_prefix(prefix) else {
        return false;
    };
    let digits = rest.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let suffix = &rest[digits.len()..];
    (digits.len() == 1 || !digits.starts_with('0'))
        && digits.parse::<u32>().is_ok_and(|n| range.contains(&n))
        && suffixes.contains(&suffix)
}

fn is_reserved(name: &str) -> bool {
    if RESERVED_SYMBOLS.contains(&name) {
        return true;
    }
    // the assembler ignores case for registers and keywords
    let name = name.to_ascii_lowercase();
    let name = name.as_str();
    ASSEMBLER_KEYWORDS.contains(&name)
        || LEGACY_REGISTERS.contains(&name)
        || is_numbered_register(name, "r", 8..16, &["", "d", "w", "b", "l"])
        || is_numbered_register(name, "xmm", 0..32, &[""])
        || is_numbered_register(name, "ymm", 0..32, &[""])
        || is_numbered_register(name, "zmm", 0..32, &[""])
        || is_numbered_register(name, "mm", 0..8, &[""])
        || is_numbered_register(name, "st", 0..8, &[""])
        || is_numbered_register(name, "cr", 0..16, &[""])
        || is_numbered_register(name, "dr", 0..16, &[""])
        || is_numbered_register(name, "k", 0..8, &[""])
}

/// Check word names and every call target before any code is emitted.
fn resolve_symbols(program: &Program) -> Result<()> {
    let mut defined: HashMap<&str, &WordDefinition> = HashMap::new();

    for word in &program.words {
        if is_reserved(&word.name) {
            bail!(CompileError::Parse {
                message: format!("Can't define '{}'. The name is reserved", word.name),
                line: word.line,
                col: word.col,
            });
        }
        if Builtin::lookup(&word.name).is_some() {
            bail!(CompileError::Parse {
                message: format!(
                    "Can't define '{}'. A built-in word with the same name already exists",
                    word.name
                ),
                line: word.line,
                col: word.col,
            });
        }
        if defined.insert(word.name.as_str(), word).is_some() {
            bail!(CompileError::Parse {
                message: format!(
                    "Can't define '{}'. A word with the same name already exists",
                    word.name
                ),
                line: word.line,
                col: word.col,
            });
        }
    }

    fn check_calls(body: &[AstNodeSpan], defined: &HashMap<&str, &WordDefinition>) -> Result<()> {
        for node in body {
            match &node.node {
                AstNode::NodeCall(name) if !defined.contains_key(name.as_str()) => {
                    bail!(CompileError::UnresolvedSymbol {
                        name: name.clone(),
                        line: node.line,
                        col: node.col,
                    })
                }
                AstNode::NodeIf(inner_node) => {
                    check_calls(&inner_node.then_block, defined)?;
                    if let Some(else_block) = &inner_node.else_block {
                        check_calls(else_block, defined)?;
                    }
                }
                AstNode::NodeDoLoop(inner_node) => check_calls(&inner_node.body, defined)?,
                _ => {}
            }
        }
        Ok(())
    }

    for word in &program.words {
        check_calls(&word.body, &defined)?;
    }

    if !defined.contains_key("main") {
        bail!(CompileError::UnresolvedSymbol {
            name: "main".to_string(),
            line: 1,
            col: 1,
        });
    }

    Ok(())
}

fn emit_prelude<Emitter>(emit: &mut Emitter, source_name: &str, config: &Config)
where
    Emitter: FnMut(Instruction),
{
    let directive = |d| Instruction::Directive(d);

    emit(directive(Directive::File(source_name.to_string())));
    emit(directive(Directive::Section(Section::Bss)));
    emit(directive(Directive::Lcomm(
        DATA_STACK.to_string(),
        config.operand_stack_size,
    )));
    emit(directive(Directive::Section(match config.abi {
        Abi::SysV => Section::Rodata,
        Abi::Win64 => Section::Rdata,
    })));
    emit(directive(Directive::Asciz(
        PRINT_FORMAT_LABEL.to_string(),
        PRINT_FORMAT.to_string(),
    )));
    emit(directive(Directive::Section(Section::Text)));
}

// operand stack: descending, r10 points at the top element

fn ds_push<Emitter>(emit: &mut Emitter, from: Operand)
where
    Emitter: FnMut(Instruction),
{
    emit(op!(Sub, reg!(DSP), Operand::Imm(WORD_SIZE as i64)));
    emit(op!(Mov, mem!(DSP), from));
}

fn ds_pop<Emitter>(emit: &mut Emitter, to: Reg)
where
    Emitter: FnMut(Instruction),
{
    emit(op!(Mov, reg!(to), mem!(DSP)));
    emit(op!(Add, reg!(DSP), Operand::Imm(WORD_SIZE as i64)));
}

fn ds_push_literal<Emitter>(emit: &mut Emitter, value: i64)
where
    Emitter: FnMut(Instruction),
{
    if i32::try_from(value).is_ok() {
        ds_push(emit, Operand::Imm(value));
    } else {
        emit(op!(Movabs, reg!(ACC), Operand::Imm(value)));
        ds_push(emit, reg!(ACC));
    }
}

// native stack

fn cs_push<Emitter>(emit: &mut Emitter, scopes: &mut Scopes, from: Reg)
where
    Emitter: FnMut(Instruction),
{
    scopes.native_pushed(WORD_SIZE);
    emit(op!(Push, reg!(from)));
}

fn cs_pop<Emitter>(emit: &mut Emitter, scopes: &mut Scopes, to: Reg)
where
    Emitter: FnMut(Instruction),
{
    scopes.native_popped(WORD_SIZE);
    emit(op!(Pop, reg!(to)));
}

fn push_loop_pair<Emitter>(emit: &mut Emitter, scopes: &mut Scopes)
where
    Emitter: FnMut(Instruction),
{
    cs_push(emit, scopes, LOOP_START);
    cs_push(emit, scopes, LOOP_COUNT);
}

fn pop_loop_pair<Emitter>(emit: &mut Emitter, scopes: &mut Scopes)
where
    Emitter: FnMut(Instruction),
{
    cs_pop(emit, scopes, LOOP_COUNT);
    cs_pop(emit, scopes, LOOP_START);
}

/// `printf(PRINT_FORMAT, value)` with r8-r10 preserved and rsp 16-byte
/// aligned at the call.
fn print<Emitter>(emit: &mut Emitter, scopes: &mut Scopes, abi: Abi, value: Reg)
where
    Emitter: FnMut(Instruction),
{
    for r in [Reg::R8, Reg::R9, Reg::R10] {
        cs_push(emit, scopes, r);
    }

    let misalignment = align_up(scopes.pushed_bytes(), STACK_ALIGNMENT) - scopes.pushed_bytes();
    let padding = misalignment + abi.shadow_space();
    if padding > 0 {
        scopes.native_pushed(padding);
        emit(op!(Sub, reg!(Reg::Rsp), Operand::Imm(padding as i64)));
    }

    let (format_reg, value_reg) = abi.print_registers();
    emit(op!(
        Lea,
        reg!(format_reg),
        Operand::RipRel(PRINT_FORMAT_LABEL.to_string(), 0)
    ));
    emit(op!(Mov, reg!(value_reg), reg!(value)));
    if abi == Abi::SysV {
        // no vector registers used by the variadic call
        emit(op!(Xor, reg!(Reg::Rax), reg!(Reg::Rax)));
    }
    emit(op!(Call, Operand::Symbol(PRINT_FUNCTION.to_string())));

    if padding > 0 {
        scopes.native_popped(padding);
        emit(op!(Add, reg!(Reg::Rsp), Operand::Imm(padding as i64)));
    }

    for r in [Reg::R10, Reg::R9, Reg::R8] {
        cs_pop(emit, scopes, r);
    }
}

fn visit_word<Emitter>(
    word: &WordDefinition,
    emit: &mut Emitter,
    scopes: &mut Scopes,
    config: &Config,
) -> Result<()>
where
    Emitter: FnMut(Instruction),
{
    emit(Instruction::Directive(Directive::Globl(word.name.clone())));
    emit(Instruction::Label(word.name.clone()));
    emit(loc!(word.line, word.col));

    let frame = Frame::new(&word.locals);

    emit(op!(Push, reg!(Reg::Rbp)));
    emit(op!(Mov, reg!(Reg::Rbp), reg!(Reg::Rsp)));
    if frame.size() > 0 {
        emit(op!(Sub, reg!(Reg::Rsp), Operand::Imm(frame.size() as i64)));
    }
    for slot in 0..frame.len() {
        emit(op!(Mov, mem!(Reg::Rbp, frame.offset(slot)), Operand::Imm(0)));
    }
    if word.is_main() {
        emit(op!(
            Lea,
            reg!(DSP),
            Operand::RipRel(DATA_STACK.to_string(), config.operand_stack_size as i64)
        ));
    }

    scopes.enter_word(&word.name, frame);
    for node in &word.body {
        visit_node(node, emit, scopes, config)?;
    }

    if word.is_main() {
        // the last value on the operand stack is the exit code
        ds_pop(emit, Reg::Rax);
    }
    emit(op!(Mov, reg!(Reg::Rsp), reg!(Reg::Rbp)));
    emit(op!(Pop, reg!(Reg::Rbp)));
    emit(op!(Ret));

    scopes.exit_word()
}

fn visit_node<Emitter>(
    this_node: &AstNodeSpan,
    emit: &mut Emitter,
    scopes: &mut Scopes,
    config: &Config,
) -> Result<()>
where
    Emitter: FnMut(Instruction),
{
    emit(loc!(this_node.line, this_node.col));

    match &this_node.node {
        AstNode::NodeIntLiteral(value) => ds_push_literal(emit, *value),
        AstNode::NodeOperator(op) => visit_operator(*op, emit, scopes, config.abi),
        AstNode::NodeBuiltin(builtin) => visit_builtin(*builtin, emit, scopes)?,
        AstNode::NodeLocal(slot) => {
            ensure!(
                *slot < scopes.frame().len(),
                "Local slot {slot} is out of range at line {}",
                this_node.line
            );
            let offset = scopes.frame().offset(*slot);
            emit(op!(Lea, reg!(ACC), mem!(Reg::Rbp, offset)));
            ds_push(emit, reg!(ACC));
        }
        AstNode::NodeCall(name) => {
            emit(op!(Call, Operand::Symbol(name.clone())));
        }
        AstNode::NodeIf(inner_node) => {
            let labels = scopes.labels().enter_if();

            ds_pop(emit, ACC);
            emit(op!(Test, reg!(ACC), reg!(ACC)));
            emit(op!(Jz, Operand::Local(labels.else_label.forward())));

            for stmt in &inner_node.then_block {
                visit_node(stmt, emit, scopes, config)?;
            }

            match &inner_node.else_block {
                Some(else_block) => {
                    if let Some((line, col)) = inner_node.else_at {
                        emit(loc!(line, col));
                    }
                    emit(op!(Jmp, Operand::Local(labels.end_label.forward())));
                    emit(Instruction::LocalLabel(labels.else_label));

                    for stmt in else_block {
                        visit_node(stmt, emit, scopes, config)?;
                    }

                    let (line, col) = inner_node.then_at;
                    emit(loc!(line, col));
                    emit(Instruction::LocalLabel(labels.end_label));
                }
                None => {
                    let (line, col) = inner_node.then_at;
                    emit(loc!(line, col));
                    emit(Instruction::LocalLabel(labels.else_label));
                }
            }

            scopes.labels().exit_if();
        }
        AstNode::NodeDoLoop(inner_node) => {
            let labels = scopes.labels().enter_loop();

            // ( limit start -- ): skip the loop when start >= limit
            emit(op!(Mov, reg!(LOOP_START), mem!(DSP)));
            emit(op!(Mov, reg!(LOOP_COUNT), mem!(DSP, WORD_SIZE as i64)));
            emit(op!(Cmp, reg!(LOOP_COUNT), reg!(LOOP_START)));
            emit(op!(Jle, Operand::Local(labels.exit_label.forward())));

            emit(Instruction::LocalLabel(labels.top_label));
            ds_pop(emit, LOOP_START);
            ds_pop(emit, LOOP_COUNT);
            scopes.push_loop(labels);
            push_loop_pair(emit, scopes);

            for stmt in &inner_node.body {
                visit_node(stmt, emit, scopes, config)?;
            }

            let (line, col) = inner_node.loop_at;
            emit(loc!(line, col));
            pop_loop_pair(emit, scopes);
            emit(op!(Sub, reg!(LOOP_COUNT), Operand::Imm(1)));
            ds_push(emit, reg!(LOOP_COUNT));
            ds_push(emit, reg!(LOOP_START));
            emit(op!(Cmp, reg!(LOOP_COUNT), reg!(LOOP_START)));
            emit(op!(Jnz, Operand::Local(labels.top_label.backward())));

            // every exit path arrives here with (count, start) on the operand stack
            emit(Instruction::LocalLabel(labels.exit_label));
            ds_pop(emit, ACC);
            ds_pop(emit, ACC);

            scopes.pop_loop();
            scopes.labels().exit_loop();
        }
    }

    Ok(())
}

fn visit_operator<Emitter>(op: Operator, emit: &mut Emitter, scopes: &mut Scopes, abi: Abi)
where
    Emitter: FnMut(Instruction),
{
    match op {
        Operator::Add | Operator::Sub | Operator::Mul => {
            ds_pop(emit, TMP);
            ds_pop(emit, ACC);
            emit(match op {
                Operator::Add => op!(Add, reg!(ACC), reg!(TMP)),
                Operator::Sub => op!(Sub, reg!(ACC), reg!(TMP)),
                _ => op!(Imul, reg!(ACC), reg!(TMP)),
            });
            ds_push(emit, reg!(ACC));
        }
        Operator::Div | Operator::Mod => {
            ds_pop(emit, TMP);
            ds_pop(emit, Reg::Rax);
            emit(op!(Cqo));
            emit(op!(Idiv, reg!(TMP)));
            let result = if op == Operator::Div {
                Reg::Rax
            } else {
                Reg::Rdx
            };
            ds_push(emit, reg!(result));
        }
        Operator::Print => {
            ds_pop(emit, ACC);
            print(emit, scopes, abi, ACC);
        }
        Operator::Fetch => {
            ds_pop(emit, ACC);
            emit(op!(Mov, reg!(ACC), mem!(ACC)));
            ds_push(emit, reg!(ACC));
        }
        Operator::Store => {
            // ( value address -- )
            ds_pop(emit, ACC);
            ds_pop(emit, TMP);
            emit(op!(Mov, mem!(ACC), reg!(TMP)));
        }
    }
}

fn visit_builtin<Emitter>(builtin: Builtin, emit: &mut Emitter, scopes: &mut Scopes) -> Result<()>
where
    Emitter: FnMut(Instruction),
{
    match builtin {
        Builtin::Dup => {
            ds_pop(emit, ACC);
            ds_push(emit, reg!(ACC));
            ds_push(emit, reg!(ACC));
        }
        Builtin::Drop => ds_pop(emit, ACC),
        Builtin::Swap => {
            ds_pop(emit, ACC);
            ds_pop(emit, TMP);
            ds_push(emit, reg!(ACC));
            ds_push(emit, reg!(TMP));
        }
        Builtin::Over => {
            ds_pop(emit, ACC);
            ds_pop(emit, TMP);
            ds_push(emit, reg!(TMP));
            ds_push(emit, reg!(ACC));
            ds_push(emit, reg!(TMP));
        }
        Builtin::Leave => {
            let Some(context) = scopes.peek_loop().copied() else {
                bail!("{} outside of a DO loop", Builtin::Leave);
            };
            debug_assert_eq!(
                scopes.pushed_bytes(),
                context.base_bytes + 2 * WORD_SIZE,
                "LEAVE with scratch data above the loop pair"
            );
            // hand the pair back to the operand stack without touching the
            // tracked depth: the code after LEAVE still runs inside the loop
            emit(op!(Pop, reg!(LOOP_COUNT)));
            emit(op!(Pop, reg!(LOOP_START)));
            ds_push(emit, reg!(LOOP_COUNT));
            ds_push(emit, reg!(LOOP_START));
            emit(op!(Jmp, Operand::Local(context.labels.exit_label.forward())));
        }
    }
    Ok(())
}
