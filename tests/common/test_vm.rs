// SPDX-License-Identifier: GPL-3.0-or-later

//! Test VM for integration testing.

#![expect(dead_code, reason = "test infrastructure used selectively by test files")]

use rlox::value::Value;
use rlox::{CompileError, InterpretResult, RuntimeError, Vm};

/// A stateful VM wrapper, one per test, so state from one test never
/// leaks into another.
pub struct TestVm {
    vm: Vm,
}

impl Default for TestVm {
    fn default() -> Self {
        Self::new()
    }
}

impl TestVm {
    #[must_use]
    pub fn new() -> Self {
        Self { vm: Vm::new() }
    }

    /// Compiles and runs `source`, returning `Ok(())` if it completed
    /// without a compile or runtime error.
    pub fn run(&mut self, source: &str) -> Result<(), TestVmError> {
        match self.vm.interpret(source) {
            InterpretResult::Ok => Ok(()),
            InterpretResult::CompileError(errors) => Err(TestVmError::Compile(errors)),
            InterpretResult::RuntimeError(error) => Err(TestVmError::Runtime(error)),
        }
    }

    /// Looks up a global defined by a previous `run` call.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        self.vm.get_global(name)
    }

    /// Renders a value the way `print`/`println` would.
    #[must_use]
    pub fn display(&self, value: Value) -> String {
        self.vm.display_value(value)
    }
}

/// Error type for test VM operations.
#[derive(Debug)]
pub enum TestVmError {
    Compile(Vec<CompileError>),
    Runtime(RuntimeError),
}

impl core::fmt::Display for TestVmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Compile(errors) => {
                for error in errors {
                    writeln!(f, "{error}")?;
                }
                Ok(())
            }
            Self::Runtime(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for TestVmError {}
