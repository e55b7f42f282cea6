//! Bus transport interface consumed by the protocol codecs.
//!
//! The native driver that turns these calls into USB/serial I/O lives outside
//! this crate. Two physical bus shapes exist: an address-based single-device
//! bus (SMBus style) and an addressless daisy chain where every frame is seen
//! by all chips. Both are half-duplex request/response; callers must not issue
//! concurrent operations against the same connection.

use std::time::Duration;

/// Failure of a single bus transfer.
///
/// Every variant is a *transient communication fault* in the crate taxonomy:
/// the transfer may succeed when resubmitted, so codecs wrap these in a
/// bounded retry before giving up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("device did not acknowledge")]
    Nack,

    #[error("bus transfer timed out")]
    Timeout,

    #[error("short transfer: expected {expected} bytes, received {received}")]
    ShortTransfer { expected: usize, received: usize },

    #[error("bus i/o failure: {0}")]
    Io(String),
}

/// Address-based bus: every transfer names one device.
pub trait SmbusBus: Send {
    /// Write `payload` to the device at `address`. An empty payload is a
    /// quick-command probe: only the address byte appears on the wire.
    fn send(&mut self, address: u8, payload: &[u8]) -> Result<(), TransportError>;

    /// Read `length` bytes from the device at `address`.
    fn receive(&mut self, address: u8, length: usize) -> Result<Vec<u8>, TransportError>;

    /// Combined write-then-read without releasing the bus in between.
    fn transceive(
        &mut self,
        address: u8,
        payload: &[u8],
        response_length: usize,
    ) -> Result<Vec<u8>, TransportError>;
}

/// Addressless daisy-chain bus: frames are clocked through every chip in
/// order, each chip forwarding what it receives to the next.
pub trait ChainBus: Send {
    /// Broadcast a fully framed command (and optional write payload).
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Broadcast a command frame and clock `response_length` bytes back.
    /// Positions past the end of the physical chain return the bus idle
    /// pattern (all `0xFF`).
    fn transceive(
        &mut self,
        frame: &[u8],
        response_length: usize,
    ) -> Result<Vec<u8>, TransportError>;
}

/// Bounded retry for bus reads.
///
/// A transient fault triggers a short wait and a resubmission; any other
/// fault class propagates immediately. Exhausting the attempt budget
/// re-raises the last transient fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(20),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    pub fn run<T>(&self, mut op: impl FnMut() -> crate::Result<T>) -> crate::Result<T> {
        let mut last = None;
        for attempt in 1..=self.attempts.max(1) {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    tracing::debug!(attempt, %err, "transient bus fault, retrying");
                    last = Some(err);
                    if attempt < self.attempts {
                        std::thread::sleep(self.backoff);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        // `op` ran at least once, so a missing Ok implies a stored fault.
        Err(last.expect("retry loop exited without a result"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn flaky(failures: u32) -> impl FnMut() -> crate::Result<u32> {
        let mut calls = 0;
        move || {
            calls += 1;
            if calls <= failures {
                Err(Error::Transient(TransportError::Timeout))
            } else {
                Ok(calls)
            }
        }
    }

    #[test]
    fn succeeds_within_budget() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        assert_eq!(policy.run(flaky(2)).unwrap(), 3);
    }

    #[test]
    fn exhaustion_reraises_last_transient_fault() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let err = policy.run(flaky(4)).unwrap_err();
        assert!(matches!(err, Error::Transient(TransportError::Timeout)));
    }

    #[test]
    fn non_transient_faults_propagate_immediately() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let mut calls = 0;
        let err = policy
            .run(|| -> crate::Result<()> {
                calls += 1;
                Err(Error::InvalidConfig("bad register".into()))
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
