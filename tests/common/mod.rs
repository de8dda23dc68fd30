//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use circuit_retry::resilience::{Failure, HandlerTable, RetryPolicy};

/// Failures raised by test operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestFailure {
    TypeA(String),
    TypeB(u32),
    TypeX,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    A,
    B,
    X,
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestFailure::TypeA(msg) => write!(f, "type A: {}", msg),
            TestFailure::TypeB(code) => write!(f, "type B: code {}", code),
            TestFailure::TypeX => write!(f, "type X"),
        }
    }
}

impl Failure for TestFailure {
    type Kind = FailureKind;

    fn kind(&self) -> FailureKind {
        match self {
            TestFailure::TypeA(_) => FailureKind::A,
            TestFailure::TypeB(_) => FailureKind::B,
            TestFailure::TypeX => FailureKind::X,
        }
    }
}

/// Policy with a delay in milliseconds.
pub fn policy(max_tries: u32, delay_ms: u64, half_open_threshold: i32) -> RetryPolicy {
    RetryPolicy::new(max_tries, Duration::from_millis(delay_ms), half_open_threshold)
}

/// Handler table mapping one kind to a constant.
pub fn handler(kind: FailureKind, value: i64) -> HandlerTable<i64, TestFailure> {
    HandlerTable::new().on(kind, move |_| value)
}

/// Invocation counter shared with an operation closure.
#[derive(Clone, Default)]
pub struct Calls(Arc<AtomicU32>);

impl Calls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call, returning its 1-based number.
    pub fn hit(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// An operation that always fails with `failure`.
pub fn always_failing(
    calls: &Calls,
    failure: TestFailure,
) -> impl FnMut() -> Result<i64, TestFailure> {
    let calls = calls.clone();
    move || {
        calls.hit();
        Err(failure.clone())
    }
}

/// An operation that fails `failures` times with `failure`, then returns `value`.
pub fn failing_then(
    calls: &Calls,
    failures: u32,
    failure: TestFailure,
    value: i64,
) -> impl FnMut() -> Result<i64, TestFailure> {
    let calls = calls.clone();
    move || {
        if calls.hit() <= failures {
            Err(failure.clone())
        } else {
            Ok(value)
        }
    }
}
