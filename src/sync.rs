//! Atomic primitives, imported from one place so that loom's checked
//! versions can be swapped in for model testing.

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicI32, AtomicPtr, Ordering};

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicI32, AtomicPtr, Ordering};
