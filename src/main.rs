use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use rue::builtins;
use rue::config::Config;
use rue::value::Value;
use rue::vm::Vm;
use rue::RueError;

const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;
const EXIT_IO_ERROR: u8 = 74;

#[derive(Parser)]
#[command(name = "rue")]
#[command(about = "The Rue scripting language")]
#[command(version)]
struct Cli {
    /// Script to run; starts a REPL when omitted
    script: Option<PathBuf>,

    /// Run every script in a directory and report which ones failed
    #[arg(long, value_name = "DIR", conflicts_with = "script")]
    test_dir: Option<PathBuf>,

    /// Log the disassembly of each compiled function
    #[arg(long)]
    print_code: bool,

    /// Log every instruction as it executes
    #[arg(long)]
    trace: bool,

    /// Log the value stack alongside traced instructions
    #[arg(long)]
    trace_stack: bool,

    /// Log per-opcode execution counts and time after each run
    #[arg(long)]
    profile: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            print_code: self.print_code,
            trace_execution: self.trace || self.trace_stack,
            trace_stack: self.trace_stack,
            profile_ops: self.profile,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = cli.config();
    init_logger(&config);

    let outcome = match (&cli.test_dir, &cli.script) {
        (Some(dir), _) => run_test_dir(dir, config),
        (None, Some(path)) => run_file(path, config),
        (None, None) => repl(config),
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_IO_ERROR)
        }
    }
}

/// `RUST_LOG` wins; otherwise the diagnostic flags pick the default level.
fn init_logger(config: &Config) {
    let default = config.log_level().unwrap_or(log::LevelFilter::Warn);
    env_logger::Builder::new()
        .filter_level(default)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn new_vm(config: Config) -> Vm {
    let mut vm = Vm::with_config(config);
    builtins::register_all(&mut vm);
    vm
}

fn exit_code(err: &RueError) -> ExitCode {
    match err {
        RueError::Compile(_) => ExitCode::from(EXIT_COMPILE_ERROR),
        RueError::Runtime(_) => ExitCode::from(EXIT_RUNTIME_ERROR),
        RueError::Io(_) => ExitCode::from(EXIT_IO_ERROR),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Script file
// ─────────────────────────────────────────────────────────────────────────────

fn run_file(path: &Path, config: Config) -> Result<ExitCode> {
    let source =
        fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))?;
    let mut vm = new_vm(config);
    match vm.interpret(&source) {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            eprintln!("{err}");
            Ok(exit_code(&err))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test directory
// ─────────────────────────────────────────────────────────────────────────────

fn run_test_dir(dir: &Path, config: Config) -> Result<ExitCode> {
    let mut scripts = fs::read_dir(dir)
        .with_context(|| format!("could not read directory {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    scripts.retain(|path| path.is_file());
    scripts.sort();

    let mut failed = 0usize;
    for path in &scripts {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let result = fs::read_to_string(path)
            .map_err(RueError::from)
            .and_then(|source| new_vm(config).interpret(&source));
        match result {
            Ok(_) => println!("[OK] {name}"),
            Err(err) => {
                failed += 1;
                println!("[FAILED] {name}");
                eprintln!("{err}");
            }
        }
    }

    println!("{} passed, {failed} failed", scripts.len() - failed);
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// REPL
// ─────────────────────────────────────────────────────────────────────────────

fn repl(config: Config) -> Result<ExitCode> {
    let mut rl = DefaultEditor::new().context("could not start line editor")?;
    let mut vm = new_vm(config);

    println!("Rue REPL. Ctrl-D to exit, :reset to forget globals.");
    loop {
        let line = match rl.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err).context("could not read input"),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        if input == ":reset" {
            vm.reset();
            builtins::register_all(&mut vm);
            continue;
        }

        match vm.interpret(input) {
            Ok(Value::Nil) => {}
            Ok(value) => println!("{value}"),
            Err(err) => eprintln!("{err}"),
        }
    }
    Ok(ExitCode::SUCCESS)
}
