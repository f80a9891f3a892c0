// SPDX-License-Identifier: GPL-3.0-or-later

//! Shared test infrastructure for integration tests.
//!
//! This module provides:
//! - [`TestVm`] - a stateful VM for running source snippets
//! - [`ValueMatcher`] - trait and implementations for structural assertions
//!
//! This module is **not** a test file, so it must comply with full clippy
//! rules; test-specific allowances (like `unwrap_used`) are only permitted
//! in `*_test.rs` files.

#![expect(unused_imports, reason = "re-exports used by test files")]

pub mod matchers;
pub mod test_vm;

pub use matchers::{IsBool, IsNil, IsNumber, IsString, ValueMatcher, assert_global_matches, assert_value_matches};
pub use test_vm::{TestVm, TestVmError};
