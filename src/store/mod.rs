//! Reactive typed reading store.
//!
//! Readings live in a [`ReadingStorage`] keyed by namespaced [`EntryKey`]s.
//! Entries can be plain typed slots, fallback chains, aggregates over child
//! elements, or closure-backed computed values; every mutation fans out to
//! subscribed observers.

pub mod key;
pub mod storage;
pub mod value;

pub use key::EntryKey;
pub use storage::{ReadingStorage, Subscription};
pub use value::{
    Aggregation, ComputedValue, Distribution, MathValue, ReadingValue, Scalar, ScalarKind,
    ScalarValue, TypedValue,
};
