//! Interpreter for the instruction lists produced by `forthc-core`.
//!
//! It models just enough of x86-64 to run compiled programs without an
//! assembler: the registers the compiler uses, a word-addressed memory with
//! the operand stack, the native stack and read-only strings, and `printf`.

use anyhow::{anyhow, bail, Result};
use forthc_core::{
    backends::Backend,
    code_gen,
    compiler::{Directive, Instruction, Mnemonic, Operand, Reg, DATA_STACK, PRINT_FUNCTION},
    Abi,
};
use std::collections::HashMap;

#[macro_use]
mod r#macro;
mod commands;

pub enum OpcodeResult {
    Continue,
    Stop,
}

type OpcodeHandler = fn(machine: &mut Machine, vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult>;

pub const DEFAULT_STEP_LIMIT: usize = 10_000_000;

const DATA_BASE: i64 = 0x1000_0000;
const STRING_BASE: i64 = 0x2000_0000;
const STACK_TOP: i64 = 0x7fff_0000;
const STACK_LIMIT: i64 = 1 << 20;
const RETURN_SENTINEL: i64 = -1;
/// value left in caller-saved registers after a call to `printf`
const CLOBBERED: i64 = 0x0BAD_0BAD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    start: i64,
    end: i64,
}

impl Region {
    fn contains(&self, address: i64) -> bool {
        address >= self.start && address < self.end
    }
}

pub struct VM<'a> {
    opcode_map: HashMap<Mnemonic, OpcodeHandler>,
    abi: Abi,
    step_limit: usize,
    print: &'a mut dyn FnMut(String),
}

/// Architectural state of one run.
pub struct Machine<'a> {
    insts: &'a [Instruction],
    ip: usize,
    current: usize,
    regs: [i64; Reg::ALL.len()],
    memory: HashMap<i64, i64>,
    strings: HashMap<i64, String>,
    symbols: HashMap<String, i64>,
    labels: HashMap<String, usize>,
    jumps: HashMap<usize, usize>,
    operand_stack: Option<Region>,
    /// (zero, less or equal) from the last `cmp`/`test`
    flags: (bool, bool),
}

impl<'a> Machine<'a> {
    fn new(insts: &'a [Instruction]) -> Result<Self> {
        let mut symbols = HashMap::new();
        let mut strings = HashMap::new();
        let mut operand_stack = None;
        let mut data_cursor = DATA_BASE;
        let mut string_cursor = STRING_BASE;

        for inst in insts {
            match inst {
                Instruction::Directive(Directive::Lcomm(name, size)) => {
                    let size = *size as i64;
                    symbols.insert(name.clone(), data_cursor);
                    if name == DATA_STACK {
                        operand_stack = Some(Region {
                            start: data_cursor,
                            end: data_cursor + size,
                        });
                    }
                    // keep regions apart so stray accesses never alias
                    data_cursor += size + 0x1000;
                }
                Instruction::Directive(Directive::Asciz(label, value)) => {
                    symbols.insert(label.clone(), string_cursor);
                    strings.insert(string_cursor, value.clone());
                    string_cursor += 0x1000;
                }
                _ => {}
            }
        }

        let mut jumps = HashMap::new();
        for (index, inst) in insts.iter().enumerate() {
            let Instruction::Op(op) = inst else {
                continue;
            };
            for arg in &op.args {
                if let Operand::Local(target) = arg {
                    let Some(dest) = code_gen::resolve_local_label(insts, index, target) else {
                        bail!("Can't find label {target}");
                    };
                    jumps.insert(index, dest);
                }
            }
        }

        Ok(Self {
            insts,
            ip: 0,
            current: 0,
            regs: [0; Reg::ALL.len()],
            memory: HashMap::new(),
            strings,
            symbols,
            labels: code_gen::resolve_labels(insts),
            jumps,
            operand_stack,
            flags: (false, false),
        })
    }

    pub fn reg(&self, r: Reg) -> i64 {
        self.regs[r as usize]
    }

    pub fn set_reg(&mut self, r: Reg, value: i64) {
        self.regs[r as usize] = value;
    }

    fn check_address(&self, address: i64) -> Result<()> {
        if address % 8 != 0 {
            bail!("Unaligned memory access at {address:#x}");
        }
        if let Some(stack) = self.operand_stack {
            if stack.contains(address) {
                return Ok(());
            }
            if address < stack.start && address >= stack.start - 0x1000 {
                bail!("Operand stack overflow");
            }
            if address >= stack.end && address < stack.end + 0x1000 {
                bail!("Operand stack underflow");
            }
        }
        let native = Region {
            start: STACK_TOP - STACK_LIMIT,
            end: STACK_TOP,
        };
        if native.contains(address) || self.symbols.values().any(|s| *s == address) {
            return Ok(());
        }
        if address < native.start && address >= native.start - 0x1000 {
            bail!("Native stack overflow");
        }
        bail!("Invalid memory access at {address:#x}")
    }

    pub fn load(&self, address: i64) -> Result<i64> {
        self.check_address(address)?;
        Ok(self.memory.get(&address).copied().unwrap_or(0))
    }

    pub fn store(&mut self, address: i64, value: i64) -> Result<()> {
        self.check_address(address)?;
        self.memory.insert(address, value);
        Ok(())
    }

    fn symbol(&self, name: &str) -> Result<i64> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("Unknown symbol {name}"))
    }

    /// Effective address of a memory operand.
    pub fn address(&self, arg: &Operand) -> Result<i64> {
        match arg {
            Operand::Mem(r, disp) => Ok(self.reg(*r).wrapping_add(*disp)),
            Operand::RipRel(symbol, disp) => Ok(self.symbol(symbol)?.wrapping_add(*disp)),
            other => bail!("Expected memory operand, got {other:?}"),
        }
    }

    pub fn read(&self, arg: &Operand) -> Result<i64> {
        match arg {
            Operand::Reg(r) => Ok(self.reg(*r)),
            Operand::Imm(v) => Ok(*v),
            Operand::Mem(..) | Operand::RipRel(..) => self.load(self.address(arg)?),
            other => bail!("Can't read {other:?}"),
        }
    }

    pub fn write(&mut self, arg: &Operand, value: i64) -> Result<()> {
        match arg {
            Operand::Reg(r) => {
                self.set_reg(*r, value);
                Ok(())
            }
            Operand::Mem(..) | Operand::RipRel(..) => {
                let address = self.address(arg)?;
                self.store(address, value)
            }
            other => bail!("Can't write {other:?}"),
        }
    }

    pub fn push(&mut self, value: i64) -> Result<()> {
        let rsp = self.reg(Reg::Rsp) - 8;
        self.store(rsp, value)?;
        self.set_reg(Reg::Rsp, rsp);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<i64> {
        let rsp = self.reg(Reg::Rsp);
        if rsp >= STACK_TOP {
            bail!("Native stack underflow");
        }
        let value = self.load(rsp)?;
        self.set_reg(Reg::Rsp, rsp + 8);
        Ok(value)
    }

    pub fn set_flags(&mut self, zero: bool, less_or_equal: bool) {
        self.flags = (zero, less_or_equal);
    }

    pub fn jump(&mut self) -> Result<()> {
        let Some(dest) = self.jumps.get(&self.current) else {
            bail!("No jump target at {}", self.current);
        };
        self.ip = *dest;
        Ok(())
    }

    pub fn string_at(&self, address: i64) -> Result<&str> {
        self.strings
            .get(&address)
            .map(|s| s.as_str())
            .ok_or_else(|| anyhow!("No string at {address:#x}"))
    }

    pub fn call(&mut self, target: &str) -> Result<()> {
        let Some(dest) = self.labels.get(target).copied() else {
            bail!("Unknown call target {target}");
        };
        self.push(self.ip as i64)?;
        self.ip = dest;
        Ok(())
    }

    fn clobber_caller_saved(&mut self) {
        for r in [
            Reg::Rcx,
            Reg::Rdx,
            Reg::Rsi,
            Reg::Rdi,
            Reg::R8,
            Reg::R9,
            Reg::R10,
            Reg::R11,
        ] {
            self.set_reg(r, CLOBBERED);
        }
    }
}

impl<'a> VM<'a> {
    pub fn new(abi: Abi, printer: &'a mut dyn FnMut(String)) -> Self {
        use commands::*;
        let map: HashMap<Mnemonic, OpcodeHandler> = HashMap::from_iter(
            vec![
                (Mnemonic::Push, push as _),
                (Mnemonic::Pop, pop as _),
                (Mnemonic::Mov, mov as _),
                (Mnemonic::Movabs, mov as _), // same as mov
                (Mnemonic::Lea, lea as _),
                (Mnemonic::Add, add as _),
                (Mnemonic::Sub, sub as _),
                (Mnemonic::Imul, imul as _),
                (Mnemonic::Cqo, cqo as _),
                (Mnemonic::Idiv, idiv as _),
                (Mnemonic::Xor, xor as _),
                (Mnemonic::Test, test as _),
                (Mnemonic::Cmp, cmp as _),
                (Mnemonic::Jmp, jmp as _),
                (Mnemonic::Jz, jz as _),
                (Mnemonic::Jnz, jnz as _),
                (Mnemonic::Jle, jle as _),
                (Mnemonic::Call, call as _),
                (Mnemonic::Ret, ret as _),
            ]
            .into_iter(),
        );
        Self {
            opcode_map: map,
            abi,
            step_limit: DEFAULT_STEP_LIMIT,
            print: printer,
        }
    }

    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// `printf` with the single `%lld` conversion the compiler emits.
    fn printf(&mut self, machine: &mut Machine) -> Result<()> {
        if machine.reg(Reg::Rsp) % 16 != 0 {
            bail!("Misaligned stack at call to {PRINT_FUNCTION}");
        }
        let (format_reg, value_reg) = self.abi.print_registers();
        let format = machine.string_at(machine.reg(format_reg))?;
        let text = format.replacen("%lld", &machine.reg(value_reg).to_string(), 1);
        let len = text.len() as i64;
        (self.print)(text);
        machine.clobber_caller_saved();
        machine.set_reg(Reg::Rax, len);
        Ok(())
    }

    fn process(&mut self, machine: &mut Machine) -> Result<OpcodeResult> {
        let insts = machine.insts;
        let Some(inst) = insts.get(machine.ip) else {
            bail!("Execution ran past the end of the program");
        };
        machine.current = machine.ip;
        machine.ip += 1;
        match inst {
            Instruction::Op(op) => {
                let Some(handler) = self.opcode_map.get(&op.mnemonic).copied() else {
                    bail!("Unknown instruction {:?}", op.mnemonic)
                };
                handler(machine, self, &op.args)
            }
            _ => Ok(OpcodeResult::Continue),
        }
    }

    /// Runs `main` and returns the value it leaves in `rax`.
    pub fn eval(&mut self, insts: &[Instruction]) -> Result<i64> {
        let mut machine = Machine::new(insts)?;
        let Some(entry) = machine.labels.get("main").copied() else {
            bail!("Unknown call target main");
        };

        // as if called from the C runtime: rsp % 16 == 8 on entry
        machine.set_reg(Reg::Rsp, STACK_TOP);
        machine.push(RETURN_SENTINEL)?;
        machine.ip = entry;

        for _ in 0..self.step_limit {
            match self.process(&mut machine)? {
                OpcodeResult::Continue => {}
                OpcodeResult::Stop => return Ok(machine.reg(Reg::Rax)),
            }
        }
        bail!("Step limit exceeded")
    }
}

/// Backend that keeps the instruction list for the interpreter.
#[derive(Default)]
pub struct Capture {
    pub instructions: Vec<Instruction>,
}

impl Backend for Capture {
    fn process(&mut self, insts: Vec<Instruction>) -> Result<()> {
        self.instructions = insts;
        Ok(())
    }
}

/// Compile `source` and run it, sending everything printed to `printer`.
pub fn run_source(
    source: &str,
    config: &forthc_core::Config,
    printer: &mut dyn FnMut(String),
) -> Result<i64> {
    let mut capture = Capture::default();
    forthc_core::toolchain::run(source.as_bytes(), "<input>", config, &mut capture)?;
    VM::new(config.abi, printer).eval(&capture.instructions)
}
