// SPDX-License-Identifier: GPL-3.0-or-later

//! CLI entry point: argument parsing, logging setup, and dispatch to the
//! self-test suite, a single script, or the REPL. See `SPEC_FULL.md` §6.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use rlox::vm::{Diagnostics, Vm};
use rlox::{InterpretResult, selftest};

mod repl;

/// A bytecode compiler and virtual machine for a small dynamically typed
/// scripting language.
#[derive(Parser, Debug)]
#[command(name = "rlox", version, about)]
struct Cli {
    /// Script to execute. Omit to start the REPL.
    script: Option<PathBuf>,

    /// Run the built-in self-test suite and exit.
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Log every garbage collection's before/after heap size.
    #[arg(long)]
    log_gc: bool,

    /// Trace every instruction the VM executes, with a stack dump.
    #[arg(long)]
    trace_execution: bool,

    /// Dump disassembled bytecode as each top-level declaration compiles.
    #[arg(long)]
    print_code: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if cli.test {
        return if selftest::run() { ExitCode::from(0) } else { ExitCode::from(1) };
    }

    let mut vm = Vm::new();
    vm.set_diagnostics(diagnostics_from(&cli));

    match cli.script {
        None => repl::run(&mut vm),
        Some(path) => run_file(&mut vm, &path),
    }
}

fn diagnostics_from(cli: &Cli) -> Diagnostics {
    warn_if_feature_missing("log-gc", cli.log_gc, cfg!(feature = "log-gc"));
    warn_if_feature_missing("trace-execution", cli.trace_execution, cfg!(feature = "trace-execution"));
    warn_if_feature_missing("print-code", cli.print_code, cfg!(feature = "print-code"));
    Diagnostics { log_gc: cli.log_gc, trace_execution: cli.trace_execution, print_code: cli.print_code }
}

fn warn_if_feature_missing(name: &str, requested: bool, compiled_in: bool) {
    if requested && !compiled_in {
        tracing::warn!("--{name} has no effect: this build was compiled without the `{name}` feature");
    }
}

fn run_file(vm: &mut Vm, path: &std::path::Path) -> ExitCode {
    let source = match std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display())) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::from(74);
        }
    };

    match vm.interpret(&source) {
        InterpretResult::Ok => ExitCode::from(0),
        InterpretResult::CompileError(errors) => {
            for error in &errors {
                eprintln!("{error}");
            }
            ExitCode::from(65)
        }
        InterpretResult::RuntimeError(error) => {
            eprintln!("{error}");
            for line in &error.trace {
                eprintln!("{line}");
            }
            ExitCode::from(70)
        }
    }
}
