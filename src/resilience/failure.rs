//! Failure kinds and recovery handler dispatch.
//!
//! # Responsibilities
//! - Tag every operation failure with a kind
//! - Map kinds to recovery handlers that produce a substitute result
//!
//! # Design Decisions
//! - Dispatch is an exact tag match; there is no hierarchy walk
//! - A kind missing from the table is unhandled and goes back to the caller untouched

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::io;
use std::sync::Arc;

/// An operation failure that can be routed by its kind.
pub trait Failure: fmt::Display {
    /// Tag used to look up a recovery handler.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The tag of this particular failure.
    fn kind(&self) -> Self::Kind;
}

impl Failure for io::Error {
    type Kind = io::ErrorKind;

    fn kind(&self) -> io::ErrorKind {
        io::Error::kind(self)
    }
}

/// A recovery function: receives the failure, returns a substitute result.
pub type Handler<T, E> = Arc<dyn Fn(E) -> T + Send + Sync>;

/// Table of recovery handlers keyed by failure kind.
pub struct HandlerTable<T, E: Failure> {
    handlers: HashMap<E::Kind, Handler<T, E>>,
}

impl<T, E: Failure> HandlerTable<T, E> {
    /// Create an empty table. Every failure is unhandled.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `kind`, builder style.
    pub fn on<F>(mut self, kind: E::Kind, handler: F) -> Self
    where
        F: Fn(E) -> T + Send + Sync + 'static,
    {
        self.insert(kind, handler);
        self
    }

    /// Register `handler` for `kind`, replacing any previous handler for it.
    pub fn insert<F>(&mut self, kind: E::Kind, handler: F)
    where
        F: Fn(E) -> T + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
    }

    /// Whether a handler is registered for exactly this kind.
    pub fn handles(&self, kind: &E::Kind) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route a failure to its handler.
    ///
    /// Returns the substitute result, or hands the failure back unchanged when
    /// no handler is registered for its kind.
    pub fn dispatch(&self, failure: E) -> Result<T, E> {
        match self.handlers.get(&failure.kind()) {
            Some(handler) => Ok(handler(failure)),
            None => Err(failure),
        }
    }
}

impl<T, E: Failure> Default for HandlerTable<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E: Failure> Clone for HandlerTable<T, E> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<T, E: Failure> fmt::Debug for HandlerTable<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
