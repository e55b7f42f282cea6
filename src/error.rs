use crate::store::key::EntryKey;
use crate::store::value::ScalarKind;
use crate::transport::TransportError;

/// Crate-wide fault taxonomy.
///
/// The classification mirrors how faults propagate: transient bus faults are
/// retried or absorbed close to the wire, protocol and configuration faults
/// abort the current operation immediately, and store-level faults surface to
/// whoever asked for the reading.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A retryable bus-level failure (NACK, timeout, short transfer).
    #[error("transient bus fault: {0}")]
    Transient(#[from] TransportError),

    /// The response shape cannot be reconciled with the known chain topology.
    /// Fatal for the current acquisition step, never retried.
    #[error("protocol consistency violation: {0}")]
    ProtocolConsistency(String),

    /// Out-of-range argument while constructing registers, packs or commands.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A reading was requested before any producer ever set it.
    #[error("reading {0} is not defined")]
    UndefinedReading(EntryKey),

    /// The stored value is not of the requested type.
    #[error("type mismatch for {key}: requested {requested}, stored {stored}")]
    TypeMismatch {
        key: EntryKey,
        requested: ScalarKind,
        stored: ScalarKind,
    },

    /// Child readings violate the electrical constraints of the topology,
    /// e.g. unequal voltages under parallel composition.
    #[error("aggregation fault: {0}")]
    Aggregation(String),
}

impl Error {
    /// True for faults that a bounded retry may resolve.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

pub type Result<T> = core::result::Result<T, Error>;
