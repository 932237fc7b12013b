/// Calling convention of the target the assembly is linked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    SysV,
    Win64,
}

impl Abi {
    pub fn host() -> Self {
        if cfg!(windows) {
            Abi::Win64
        } else {
            Abi::SysV
        }
    }

    /// bytes the caller reserves above the return address for the callee
    pub fn shadow_space(&self) -> usize {
        match self {
            Abi::SysV => 0,
            Abi::Win64 => 32,
        }
    }
}

impl Default for Abi {
    fn default() -> Self {
        Abi::host()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Syntax {
    #[default]
    Intel,
    Att,
}

pub const DEFAULT_OPERAND_STACK_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub abi: Abi,
    pub syntax: Syntax,
    /// emit `.file`/`.loc` annotations
    pub debug_info: bool,
    /// capacity of the operand stack buffer in bytes
    pub operand_stack_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            abi: Abi::default(),
            syntax: Syntax::default(),
            debug_info: true,
            operand_stack_size: DEFAULT_OPERAND_STACK_SIZE,
        }
    }
}
