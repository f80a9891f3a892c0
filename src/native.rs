// SPDX-License-Identifier: GPL-3.0-or-later

//! Built-in globals installed into every freshly constructed `Vm`. See
//! `SPEC_FULL.md` §4.8.

use std::io::Write as _;
use std::sync::OnceLock;
use std::time::Instant;

use crate::object::{Heap, NativeError};
use crate::value::Value;

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

/// `clock()` — elapsed wall-clock time in seconds since the process
/// started. The reference measures CPU time via `clock()`/`CLOCKS_PER_SEC`;
/// there's no portable equivalent without an extra platform dependency,
/// so this uses `Instant` instead (noted in `DESIGN.md`).
fn clock(_heap: &Heap, _args: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::number(process_start().elapsed().as_secs_f64()))
}

/// `print(args...)` — writes each argument's display form with no
/// separator, flushes, returns `nil`.
fn print(heap: &Heap, args: &[Value]) -> Result<Value, NativeError> {
    let mut stdout = std::io::stdout().lock();
    for arg in args {
        write!(stdout, "{}", heap.value_to_string(*arg))
            .map_err(|e| NativeError(format!("write to stdout failed: {e}")))?;
    }
    stdout.flush().map_err(|e| NativeError(format!("flush stdout failed: {e}")))?;
    Ok(Value::nil())
}

/// `println(args...)` — like `print`, but appends a single trailing
/// newline instead of flushing explicitly (the newline flushes line
/// buffering itself in practice).
fn println_(heap: &Heap, args: &[Value]) -> Result<Value, NativeError> {
    let mut stdout = std::io::stdout().lock();
    for arg in args {
        write!(stdout, "{}", heap.value_to_string(*arg))
            .map_err(|e| NativeError(format!("write to stdout failed: {e}")))?;
    }
    writeln!(stdout).map_err(|e| NativeError(format!("write to stdout failed: {e}")))?;
    Ok(Value::nil())
}

/// Name/implementation pairs installed as globals at `Vm` construction.
pub const NATIVES: &[(&str, crate::object::NativeFn)] =
    &[("clock", clock), ("print", print), ("println", println_)];
