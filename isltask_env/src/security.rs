//! Security backend abstraction.

use crate::error::EnvError;
use crate::types::{CapabilityToken, PacketDescriptor, Receipt, TokenRequest};

/// Issues capability tokens and verifies delivered packets.
///
/// # Implementations
///
/// - **Local**: biscuit tokens + ed25519 receipts, all in-process
/// - **Ledger**: local crypto, every artifact recorded in an embedded store
/// - **Command**: shells out to an external tool, bounded by a timeout
///
/// # Contract
///
/// Each call is synchronous and returns once. A tampered packet is a `bad`
/// receipt, not an error. An `Err` means the backend could not answer at all;
/// callers must never treat it as success.
pub trait SecurityBackend {
    /// Backend name, for logs and reports.
    fn name(&self) -> &'static str;

    /// Issues a token for the request (admission or downlink upgrade).
    fn issue_token(&mut self, request: &TokenRequest) -> Result<CapabilityToken, EnvError>;

    /// Verifies a delivered packet and produces its receipt.
    fn verify(&mut self, packet: &PacketDescriptor) -> Result<Receipt, EnvError>;
}

impl<T: SecurityBackend + ?Sized> SecurityBackend for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn issue_token(&mut self, request: &TokenRequest) -> Result<CapabilityToken, EnvError> {
        (**self).issue_token(request)
    }

    fn verify(&mut self, packet: &PacketDescriptor) -> Result<Receipt, EnvError> {
        (**self).verify(packet)
    }
}
