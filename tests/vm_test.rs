// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end language tests: arithmetic, closures, inheritance, `super`,
//! initializer binding, and runtime error traces.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use common::{IsNumber, IsString, TestVm, assert_global_matches};

#[test]
fn arithmetic_precedence() {
    let mut vm = TestVm::new();
    vm.run("var result = 1 + 2 * 3;").unwrap();
    assert_global_matches(&vm, "result", &IsNumber(7.0));
}

#[test]
fn string_concatenation() {
    let mut vm = TestVm::new();
    vm.run(r#"var a = "foo"; var b = "bar"; var result = a + b;"#).unwrap();
    assert_global_matches(&vm, "result", &IsString::new("foobar"));
}

#[test]
fn closures_capture_and_mutate_upvalues() {
    let mut vm = TestVm::new();
    vm.run(
        r"
        fun mk() {
            var x = 0;
            fun f() { x = x + 1; return x; }
            return f;
        }
        var g = mk();
        var a = g();
        var b = g();
        var c = g();
        ",
    )
    .unwrap();
    assert_global_matches(&vm, "a", &IsNumber(1.0));
    assert_global_matches(&vm, "b", &IsNumber(2.0));
    assert_global_matches(&vm, "c", &IsNumber(3.0));
}

#[test]
fn two_closures_over_the_same_loop_variable_stay_independent() {
    let mut vm = TestVm::new();
    vm.run(
        r"
        var fns = nil;
        fun make(n) {
            fun f() { return n; }
            return f;
        }
        var first = make(1);
        var second = make(2);
        var a = first();
        var b = second();
        ",
    )
    .unwrap();
    assert_global_matches(&vm, "a", &IsNumber(1.0));
    assert_global_matches(&vm, "b", &IsNumber(2.0));
}

#[test]
fn inheritance_and_super_call_chain() {
    let mut vm = TestVm::new();
    vm.run(
        r#"
        class A {
            greet() { this.log = this.log + "A"; }
        }
        class B < A {
            greet() {
                super.greet();
                this.log = this.log + "B";
            }
        }
        var b = B();
        b.log = "";
        b.greet();
        var result = b.log;
        "#,
    )
    .unwrap();
    assert_global_matches(&vm, "result", &IsString::new("AB"));
}

#[test]
fn initializer_binds_constructor_arguments() {
    let mut vm = TestVm::new();
    vm.run(
        r"
        class Point {
            init(x) { this.x = x; }
        }
        var p = Point(42);
        var result = p.x;
        ",
    )
    .unwrap();
    assert_global_matches(&vm, "result", &IsNumber(42.0));
}

#[test]
fn break_exits_the_nearest_loop_only() {
    let mut vm = TestVm::new();
    vm.run(
        r"
        var outer = 0;
        var inner_total = 0;
        while (outer < 3) {
            outer = outer + 1;
            var i = 0;
            while (true) {
                if (i >= 2) break;
                inner_total = inner_total + 1;
                i = i + 1;
            }
        }
        ",
    )
    .unwrap();
    assert_global_matches(&vm, "outer", &IsNumber(3.0));
    assert_global_matches(&vm, "inner_total", &IsNumber(6.0));
}

#[test]
fn break_outside_a_loop_is_a_compile_error() {
    let mut vm = TestVm::new();
    let err = vm.run("break;").unwrap_err();
    let common::TestVmError::Compile(errors) = err else { panic!("expected a compile error") };
    assert!(errors.iter().any(|e| e.message.contains("break")));
}

#[test]
fn runtime_error_carries_a_frame_trace() {
    let mut vm = TestVm::new();
    let err = vm.run(r#"fun f() { return 1 + "x"; } f();"#).unwrap_err();
    let common::TestVmError::Runtime(error) = err else { panic!("expected a runtime error") };
    assert!(error.trace.iter().any(|frame| frame.contains("in f()")));
    assert!(error.trace.iter().any(|frame| frame.contains("in script")));
}

#[test]
fn undefined_global_read_is_a_runtime_error() {
    let mut vm = TestVm::new();
    let err = vm.run("print(undefined_name);").unwrap_err();
    assert!(matches!(err, common::TestVmError::Runtime(_)));
}

#[test]
fn repl_style_sequential_runs_share_state() {
    let mut vm = TestVm::new();
    vm.run("var counter = 0;").unwrap();
    vm.run("counter = counter + 1;").unwrap();
    vm.run("counter = counter + 1;").unwrap();
    assert_global_matches(&vm, "counter", &IsNumber(2.0));
}
