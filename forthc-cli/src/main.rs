use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use forthc_core::{config::DEFAULT_OPERAND_STACK_SIZE, toolchain, Abi, Config, Syntax};
use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Command, ExitCode, Stdio},
    time::Instant,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AbiArg {
    Sysv,
    Win64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SyntaxArg {
    Intel,
    Att,
}

/// Compile a Forth-like source file to x86-64 assembly.
#[derive(Debug, Parser)]
#[command(name = "forthc", version)]
struct Cli {
    /// Source file
    input: PathBuf,

    /// Executable to produce, or `-` to print the assembly
    #[arg(required_unless_present = "run")]
    output: Option<String>,

    /// Calling convention of the target (defaults to the host's)
    #[arg(long, value_enum)]
    abi: Option<AbiArg>,

    #[arg(long, value_enum, default_value = "intel")]
    syntax: SyntaxArg,

    /// Omit `.file`/`.loc` annotations
    #[arg(long)]
    no_debug: bool,

    /// Operand stack capacity in bytes
    #[arg(long, default_value_t = DEFAULT_OPERAND_STACK_SIZE)]
    stack_size: usize,

    /// Assembler driver used to build the executable
    #[arg(long, default_value = "gcc")]
    cc: String,

    /// Execute the program in the built-in interpreter
    #[arg(long)]
    run: bool,

    /// Print compile timing
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            abi: match self.abi {
                Some(AbiArg::Sysv) => Abi::SysV,
                Some(AbiArg::Win64) => Abi::Win64,
                None => Abi::host(),
            },
            syntax: match self.syntax {
                SyntaxArg::Intel => Syntax::Intel,
                SyntaxArg::Att => Syntax::Att,
            },
            debug_info: !self.no_debug,
            operand_stack_size: self.stack_size,
        }
    }
}

fn assemble(cc: &str, asm: &str, output: &str) -> Result<()> {
    let mut child = Command::new(cc)
        .args(["-g", "-o", output, "-x", "assembler", "-"])
        .stdin(Stdio::piped())
        .spawn()
        .with_context(|| format!("Can't start {cc}"))?;

    let Some(mut stdin) = child.stdin.take() else {
        bail!("Can't write to {cc}");
    };
    stdin.write_all(asm.as_bytes())?;
    drop(stdin);

    let status = child.wait()?;
    if !status.success() {
        bail!("{cc} failed with {status}");
    }
    Ok(())
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn run(cli: &Cli) -> Result<Option<i64>> {
    let config = cli.config();
    let source = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("Can't read {}", cli.input.display()))?;
    let name = source_name(&cli.input);

    let time = Instant::now();
    let asm = toolchain::compile(&source, &name, &config)?;
    if cli.verbose {
        eprintln!("Compiled Successfully in {}ms", time.elapsed().as_millis());
    }

    match cli.output.as_deref() {
        Some("-") => print!("{asm}"),
        Some(output) => {
            let time = Instant::now();
            assemble(&cli.cc, &asm, output)?;
            if cli.verbose {
                eprintln!("Assembled {output} in {}ms", time.elapsed().as_millis());
            }
        }
        None => {}
    }

    if cli.run {
        let mut printer = |s: String| print!("{s}");
        let result = forthc_vm::run_source(&source, &config, &mut printer)?;
        println!();
        return Ok(Some(result));
    }
    Ok(None)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(Some(result)) => ExitCode::from(result as u8),
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
