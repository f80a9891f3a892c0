// SPDX-License-Identifier: GPL-3.0-or-later

//! Value matchers for structural assertions in tests.

#![expect(dead_code, reason = "test infrastructure used selectively by test files")]

use super::TestVm;
use rlox::value::Value;

/// A matcher for structural assertions on values.
pub trait ValueMatcher {
    /// Checks `value` against this matcher's criteria.
    ///
    /// # Errors
    ///
    /// Returns an error message describing the mismatch if the value
    /// doesn't match.
    fn matches(&self, value: Value, vm: &TestVm) -> Result<(), String>;
}

/// Asserts that `value` matches `matcher`.
///
/// # Panics
///
/// Panics with a descriptive message if the value doesn't match.
pub fn assert_value_matches(vm: &TestVm, value: Value, matcher: &dyn ValueMatcher) {
    if let Err(msg) = matcher.matches(value, vm) {
        panic!("assertion failed: {msg}\n  actual: {}", vm.display(value));
    }
}

/// Looks up `name` as a global and asserts it matches `matcher`.
///
/// # Panics
///
/// Panics if the global is undefined or doesn't match.
pub fn assert_global_matches(vm: &TestVm, name: &str, matcher: &dyn ValueMatcher) {
    let value = vm.global(name).unwrap_or_else(|| panic!("global {name:?} is undefined"));
    assert_value_matches(vm, value, matcher);
}

pub struct IsNil;

impl ValueMatcher for IsNil {
    fn matches(&self, value: Value, _vm: &TestVm) -> Result<(), String> {
        if value.is_nil() { Ok(()) } else { Err("expected nil".into()) }
    }
}

pub struct IsBool(pub bool);

impl ValueMatcher for IsBool {
    fn matches(&self, value: Value, _vm: &TestVm) -> Result<(), String> {
        match value.as_bool() {
            Some(b) if b == self.0 => Ok(()),
            Some(b) => Err(format!("expected {}, got {b}", self.0)),
            None => Err(format!("expected bool {}, got a non-bool", self.0)),
        }
    }
}

pub struct IsNumber(pub f64);

impl ValueMatcher for IsNumber {
    fn matches(&self, value: Value, _vm: &TestVm) -> Result<(), String> {
        match value.as_number() {
            Some(n) if (n - self.0).abs() < f64::EPSILON => Ok(()),
            Some(n) => Err(format!("expected {}, got {n}", self.0)),
            None => Err(format!("expected number {}, got a non-number", self.0)),
        }
    }
}

pub struct IsString(pub String);

impl IsString {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl ValueMatcher for IsString {
    fn matches(&self, value: Value, vm: &TestVm) -> Result<(), String> {
        if value.as_obj().is_none() {
            return Err(format!("expected string {:?}, got a non-object", self.0));
        }
        let printed = vm.display(value);
        if printed == self.0 { Ok(()) } else { Err(format!("expected string {:?}, got {printed:?}", self.0)) }
    }
}
