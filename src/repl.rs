// SPDX-License-Identifier: GPL-3.0-or-later

//! Interactive REPL: `rustyline`-backed line editing, keyword
//! completion, and history persisted to `build/history.txt`. See
//! `SPEC_FULL.md` §10.

use std::process::ExitCode;

use rustyline::Helper;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Config, Editor};

use rlox::InterpretResult;
use rlox::vm::Vm;

const HISTORY_PATH: &str = "build/history.txt";

const KEYWORDS: &[&str] = &[
    "and", "or", "else", "fun", "for", "if", "var", "while", "class", "nil", "true", "false", "this", "super",
    "return", "break",
];

struct KeywordCompleter;

impl Completer for KeywordCompleter {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let prefix_start = line[..pos].rfind(|c: char| !c.is_ascii_alphanumeric() && c != '_').map_or(0, |i| i + 1);
        let prefix = &line[prefix_start..pos];
        if prefix.is_empty() {
            return Ok((prefix_start, Vec::new()));
        }
        let matches = KEYWORDS
            .iter()
            .filter(|kw| kw.starts_with(prefix))
            .map(|kw| Pair { display: (*kw).to_string(), replacement: (*kw).to_string() })
            .collect();
        Ok((prefix_start, matches))
    }
}

impl Hinter for KeywordCompleter {
    type Hint = String;
}
impl Highlighter for KeywordCompleter {}
impl Validator for KeywordCompleter {}
impl Helper for KeywordCompleter {}

/// Runs the REPL loop to completion (`Ctrl-D`) and returns the process
/// exit code. Unlike script execution, a compile or runtime error inside
/// a REPL line never ends the session — only EOF does.
pub fn run(vm: &mut Vm) -> ExitCode {
    let config = Config::builder().auto_add_history(false).build();
    let mut editor: Editor<KeywordCompleter, DefaultHistory> = match Editor::with_config(config) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to start line editor: {e}");
            return ExitCode::from(74);
        }
    };
    editor.set_helper(Some(KeywordCompleter));

    if let Some(dir) = std::path::Path::new(HISTORY_PATH).parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let _ = editor.load_history(HISTORY_PATH);

    loop {
        match editor.readline("lox> ") {
            Ok(line) => {
                if line.is_empty() {
                    continue;
                }
                if let Some(command) = line.strip_prefix('/') {
                    println!("Unrecognized command: /{command}");
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                let _ = editor.save_history(HISTORY_PATH);
                report(vm.interpret(&line));
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(rustyline::error::ReadlineError::Interrupted) => continue,
            Err(e) => {
                eprintln!("{e}");
                break;
            }
        }
    }
    ExitCode::from(0)
}

fn report(result: InterpretResult) {
    match result {
        InterpretResult::Ok => {}
        InterpretResult::CompileError(errors) => {
            for error in &errors {
                eprintln!("{error}");
            }
        }
        InterpretResult::RuntimeError(error) => {
            eprintln!("{error}");
            for line in &error.trace {
                eprintln!("{line}");
            }
        }
    }
}
