use core::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::battery::BatteryElement;
use crate::error::{Error, Result};
use crate::store::key::EntryKey;

/// Dynamically typed reading payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Float(f64),
    Int(i64),
    Flag(bool),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarKind {
    Float,
    Int,
    Flag,
    Text,
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Float(_) => ScalarKind::Float,
            Scalar::Int(_) => ScalarKind::Int,
            Scalar::Flag(_) => ScalarKind::Flag,
            Scalar::Text(_) => ScalarKind::Text,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Scalar::Float(v) => Some(*v),
            Scalar::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Flag(v) => write!(f, "{v}"),
            Scalar::Text(v) => write!(f, "{v}"),
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Float => "float",
            ScalarKind::Int => "int",
            ScalarKind::Flag => "flag",
            ScalarKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// Conversion between native Rust types and [`Scalar`], used by the typed
/// accessors on the storage.
pub trait ScalarValue: Sized {
    const KIND: ScalarKind;
    fn into_scalar(self) -> Scalar;
    fn from_scalar(scalar: &Scalar) -> Option<Self>;
}

impl ScalarValue for f64 {
    const KIND: ScalarKind = ScalarKind::Float;
    fn into_scalar(self) -> Scalar {
        Scalar::Float(self)
    }
    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        scalar.as_float()
    }
}

impl ScalarValue for i64 {
    const KIND: ScalarKind = ScalarKind::Int;
    fn into_scalar(self) -> Scalar {
        Scalar::Int(self)
    }
    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl ScalarValue for bool {
    const KIND: ScalarKind = ScalarKind::Flag;
    fn into_scalar(self) -> Scalar {
        Scalar::Flag(self)
    }
    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::Flag(v) => Some(*v),
            _ => None,
        }
    }
}

impl ScalarValue for String {
    const KIND: ScalarKind = ScalarKind::Text;
    fn into_scalar(self) -> Scalar {
        Scalar::Text(self)
    }
    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// How a mathematical entry combines its children's readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Sum,
    Average,
    Min,
    Max,
    /// Minimum across children scaled by the child count. Models serial
    /// capacity, where the weakest cell bounds the whole string.
    MinTimesCount,
    /// Children are expected to agree within the tolerance; disagreement is
    /// an aggregation fault rather than a silent pick.
    AllEqual { tolerance: f64 },
}

impl Aggregation {
    pub fn combine(&self, values: &[f64]) -> Result<f64> {
        if values.is_empty() {
            return Err(Error::Aggregation("no child readings available".into()));
        }
        match self {
            Aggregation::Sum => Ok(values.iter().sum()),
            Aggregation::Average => Ok(values.iter().sum::<f64>() / values.len() as f64),
            Aggregation::Min => Ok(values.iter().copied().fold(f64::INFINITY, f64::min)),
            Aggregation::Max => Ok(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            Aggregation::MinTimesCount => {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                Ok(min * values.len() as f64)
            }
            Aggregation::AllEqual { tolerance } => {
                let first = values[0];
                for &v in &values[1..] {
                    if (v - first).abs() > *tolerance {
                        return Err(Error::Aggregation(format!(
                            "child readings disagree: {first} vs {v}"
                        )));
                    }
                }
                Ok(first)
            }
        }
    }
}

/// How a value written to a mathematical entry is pushed back down to the
/// children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    SplitEvenly,
}

/// A plain typed slot, possibly not yet measured.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    pub kind: ScalarKind,
    pub value: Option<Scalar>,
}

impl TypedValue {
    pub fn undefined(kind: ScalarKind) -> Self {
        Self { kind, value: None }
    }
}

/// An entry derived from the same key on a set of child elements.
#[derive(Clone)]
pub struct MathValue {
    pub children: Vec<Arc<dyn BatteryElement>>,
    pub key: EntryKey,
    pub aggregation: Aggregation,
    pub distribution: Option<Distribution>,
}

impl fmt::Debug for MathValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MathValue")
            .field("children", &self.children.len())
            .field("key", &self.key)
            .field("aggregation", &self.aggregation)
            .field("distribution", &self.distribution)
            .finish()
    }
}

pub type ComputeFn = Arc<dyn Fn() -> Result<Option<Scalar>> + Send + Sync>;
pub type AssignFn = Arc<dyn Fn(Scalar) -> Result<()> + Send + Sync>;

/// An entry backed by arbitrary closures, for readings that are derived
/// rather than stored.
#[derive(Clone)]
pub struct ComputedValue {
    pub kind: ScalarKind,
    pub get: ComputeFn,
    pub set: Option<AssignFn>,
}

impl fmt::Debug for ComputedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedValue")
            .field("kind", &self.kind)
            .field("settable", &self.set.is_some())
            .finish()
    }
}

/// The backing of one storage entry.
///
/// `Fallback` chains alternatives: reads walk the chain and take the first
/// defined value, writes land on the first variant. The common wiring is
/// `[measured, aggregated]`, so a directly measured pack quantity shadows
/// the aggregate computed from the cells.
#[derive(Debug, Clone)]
pub enum ReadingValue {
    Typed(TypedValue),
    Fallback(Vec<ReadingValue>),
    Math(MathValue),
    Computed(ComputedValue),
}

impl ReadingValue {
    pub fn typed(kind: ScalarKind) -> Self {
        ReadingValue::Typed(TypedValue::undefined(kind))
    }

    pub fn with_value(scalar: Scalar) -> Self {
        ReadingValue::Typed(TypedValue {
            kind: scalar.kind(),
            value: Some(scalar),
        })
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            ReadingValue::Typed(t) => t.kind,
            ReadingValue::Fallback(chain) => chain
                .first()
                .map(ReadingValue::kind)
                .unwrap_or(ScalarKind::Float),
            ReadingValue::Math(_) => ScalarKind::Float,
            ReadingValue::Computed(c) => c.kind,
        }
    }
}
