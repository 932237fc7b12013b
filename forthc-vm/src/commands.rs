use super::{Machine, OpcodeResult, RETURN_SENTINEL, VM};
use anyhow::{bail, Result};
use forthc_core::compiler::{Operand, Reg, PRINT_FUNCTION};

pub fn push(machine: &mut Machine, _vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult> {
    let value = machine.read(arg!(args, 0))?;
    machine.push(value)?;
    Ok(OpcodeResult::Continue)
}

pub fn pop(machine: &mut Machine, _vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult> {
    let value = machine.pop()?;
    machine.write(arg!(args, 0), value)?;
    Ok(OpcodeResult::Continue)
}

// MOV, MOVABS
pub fn mov(machine: &mut Machine, _vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult> {
    let value = machine.read(arg!(args, 1))?;
    machine.write(arg!(args, 0), value)?;
    Ok(OpcodeResult::Continue)
}

pub fn lea(machine: &mut Machine, _vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult> {
    let address = machine.address(arg!(args, 1))?;
    machine.write(arg!(args, 0), address)?;
    Ok(OpcodeResult::Continue)
}

pub fn add(machine: &mut Machine, _vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult> {
    binary!(machine, args, |a, b| a.wrapping_add(b))
}

pub fn sub(machine: &mut Machine, _vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult> {
    binary!(machine, args, |a, b| a.wrapping_sub(b))
}

pub fn imul(machine: &mut Machine, _vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult> {
    binary!(machine, args, |a, b| a.wrapping_mul(b))
}

pub fn xor(machine: &mut Machine, _vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult> {
    binary!(machine, args, |a, b| a ^ b)
}

pub fn cqo(machine: &mut Machine, _vm: &mut VM, _args: &[Operand]) -> Result<OpcodeResult> {
    let sign = if machine.reg(Reg::Rax) < 0 { -1 } else { 0 };
    machine.set_reg(Reg::Rdx, sign);
    Ok(OpcodeResult::Continue)
}

// signed rdx:rax / operand, quotient in rax and remainder in rdx
pub fn idiv(machine: &mut Machine, _vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult> {
    let divisor = machine.read(arg!(args, 0))? as i128;
    if divisor == 0 {
        bail!("Division by zero");
    }
    let dividend =
        ((machine.reg(Reg::Rdx) as i128) << 64) | (machine.reg(Reg::Rax) as u64 as i128);
    let Ok(quotient) = i64::try_from(dividend / divisor) else {
        bail!("Division overflow");
    };
    machine.set_reg(Reg::Rax, quotient);
    machine.set_reg(Reg::Rdx, (dividend % divisor) as i64);
    Ok(OpcodeResult::Continue)
}

pub fn test(machine: &mut Machine, _vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult> {
    let result = machine.read(arg!(args, 0))? & machine.read(arg!(args, 1))?;
    machine.set_flags(result == 0, result <= 0);
    Ok(OpcodeResult::Continue)
}

pub fn cmp(machine: &mut Machine, _vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult> {
    let a = machine.read(arg!(args, 0))?;
    let b = machine.read(arg!(args, 1))?;
    machine.set_flags(a == b, a <= b);
    Ok(OpcodeResult::Continue)
}

pub fn jmp(machine: &mut Machine, _vm: &mut VM, _args: &[Operand]) -> Result<OpcodeResult> {
    machine.jump()?;
    Ok(OpcodeResult::Continue)
}

pub fn jz(machine: &mut Machine, _vm: &mut VM, _args: &[Operand]) -> Result<OpcodeResult> {
    if machine.flags.0 {
        machine.jump()?;
    }
    Ok(OpcodeResult::Continue)
}

pub fn jnz(machine: &mut Machine, _vm: &mut VM, _args: &[Operand]) -> Result<OpcodeResult> {
    if !machine.flags.0 {
        machine.jump()?;
    }
    Ok(OpcodeResult::Continue)
}

pub fn jle(machine: &mut Machine, _vm: &mut VM, _args: &[Operand]) -> Result<OpcodeResult> {
    if machine.flags.1 {
        machine.jump()?;
    }
    Ok(OpcodeResult::Continue)
}

pub fn call(machine: &mut Machine, vm: &mut VM, args: &[Operand]) -> Result<OpcodeResult> {
    match arg!(args, 0) {
        Operand::Symbol(name) if name == PRINT_FUNCTION => vm.printf(machine)?,
        Operand::Symbol(name) => machine.call(name)?,
        other => bail!("Can't call {other:?}"),
    }
    Ok(OpcodeResult::Continue)
}

pub fn ret(machine: &mut Machine, _vm: &mut VM, _args: &[Operand]) -> Result<OpcodeResult> {
    match machine.pop()? {
        RETURN_SENTINEL => Ok(OpcodeResult::Stop),
        address => {
            let Ok(address) = usize::try_from(address) else {
                bail!("Return to invalid address {address}");
            };
            machine.ip = address;
            Ok(OpcodeResult::Continue)
        }
    }
}
