//! Capability tokens and signed receipts.
//!
//! Tokens are Biscuit tokens signed by the issuer's root key. The scope,
//! task binding and validity window live in the token as Datalog facts and
//! checks; the verifying node supplies what it observed (task, step, hop
//! kind, sender) and the authorizer decides.
//!
//! Receipts are signed with the verifying node's Ed25519 key.

use biscuit_auth::{macros::*, Biscuit, KeyPair, PublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use isltask_env::{CapabilityToken, PacketDescriptor, Receipt, TokenRequest, TokenScope, Verdict};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors in token issuance and checking.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Biscuit error: {0}")]
    BiscuitError(String),
}

impl AuthError {
    /// Receipt reason for a failed check.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::InvalidToken(_) | AuthError::BiscuitError(_) => "invalid_token",
            AuthError::Unauthorized(_) => "unauthorized",
            AuthError::InvalidSignature => "invalid_signature",
        }
    }
}

fn datalog_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Mints scoped tokens for tasks.
pub struct TokenAuthority {
    root_keypair: KeyPair,
}

impl TokenAuthority {
    pub fn new(root_keypair: KeyPair) -> Self {
        Self { root_keypair }
    }

    pub fn public_key(&self) -> PublicKey {
        self.root_keypair.public()
    }

    /// Issues a sealed token for the request.
    pub fn issue(&self, request: &TokenRequest) -> Result<CapabilityToken, AuthError> {
        let task = datalog_int(request.task.0);
        let scope = request.scope.name();
        let issued = datalog_int(request.issued_at);
        let expiry = datalog_int(request.expiry);

        let mut builder = biscuit!(
            r#"
            task({task});
            scope({scope});
            check if packet_task({task});
            check if now($t), $t >= {issued}, $t <= {expiry};
        "#
        );

        if let TokenScope::Downlink { relay } = request.scope {
            let relay = relay.to_string();
            builder
                .add_fact(fact!("relay({relay})"))
                .map_err(|e| AuthError::BiscuitError(format!("{:?}", e)))?;
        }

        let biscuit = builder
            .build(&self.root_keypair)
            .map_err(|e| AuthError::BiscuitError(format!("{:?}", e)))?;
        let sealed = biscuit
            .to_vec()
            .map_err(|e| AuthError::BiscuitError(format!("{:?}", e)))?;

        Ok(CapabilityToken {
            id: request.token_id,
            subject: request.task,
            scope: request.scope,
            issued_at: request.issued_at,
            expiry: request.expiry,
            parent: request.parent,
            sealed,
        })
    }
}

/// Checks sealed tokens against an observed hop.
pub struct TokenVerifier {
    root_public_key: PublicKey,
}

impl TokenVerifier {
    pub fn new(root_public_key: PublicKey) -> Self {
        Self { root_public_key }
    }

    /// Authorizes the hop `packet.src -> packet.dst` at `packet.step` with
    /// the token's sealed form.
    ///
    /// This checks:
    /// 1. Token signature is valid (signed by the root authority)
    /// 2. Token is bound to the packet's task and valid at the arrival step
    /// 3. The hop is inside the token's scope
    pub fn authorize(&self, sealed: &[u8], packet: &PacketDescriptor) -> Result<(), AuthError> {
        let biscuit = Biscuit::from(sealed, self.root_public_key)
            .map_err(|e| AuthError::InvalidToken(format!("{:?}", e)))?;

        let mut authorizer = biscuit
            .authorizer()
            .map_err(|e| AuthError::BiscuitError(format!("{:?}", e)))?;

        let packet_task = datalog_int(packet.task.0);
        let now = datalog_int(packet.step);
        let hop_kind = if packet.dst.is_satellite() {
            "satellite"
        } else {
            "ground"
        };
        let sender = packet.src.to_string();

        authorizer
            .add_fact(fact!("packet_task({packet_task})"))
            .map_err(|e| AuthError::BiscuitError(format!("{:?}", e)))?;
        authorizer
            .add_fact(fact!("now({now})"))
            .map_err(|e| AuthError::BiscuitError(format!("{:?}", e)))?;
        authorizer
            .add_fact(fact!("hop_kind({hop_kind})"))
            .map_err(|e| AuthError::BiscuitError(format!("{:?}", e)))?;
        authorizer
            .add_fact(fact!("sender({sender})"))
            .map_err(|e| AuthError::BiscuitError(format!("{:?}", e)))?;

        for policy in [
            "allow if scope(\"unrestricted\")",
            "allow if scope(\"inter_satellite\"), hop_kind(\"satellite\")",
            "allow if scope(\"downlink\"), hop_kind(\"satellite\")",
            "allow if scope(\"downlink\"), relay($r), sender($r)",
        ] {
            authorizer
                .add_policy(policy)
                .map_err(|e| AuthError::BiscuitError(format!("{:?}", e)))?;
        }

        authorizer
            .authorize()
            .map_err(|e| AuthError::Unauthorized(format!("{:?}", e)))?;

        Ok(())
    }
}

/// SHA-256 of a payload.
pub fn payload_digest(payload: &[u8]) -> [u8; 32] {
    Sha256::digest(payload).into()
}

/// Canonical bytes a receipt signature covers.
fn receipt_body(receipt: &Receipt) -> Vec<u8> {
    let mut body = Vec::with_capacity(64);
    body.extend_from_slice(&receipt.packet.0.to_be_bytes());
    body.extend_from_slice(receipt.verifier.to_string().as_bytes());
    body.push(match receipt.verdict {
        Verdict::Ok => 1,
        Verdict::Bad => 0,
    });
    body.extend_from_slice(&receipt.payload_digest);
    if let Some(reason) = &receipt.reason {
        body.extend_from_slice(reason.as_bytes());
    }
    body
}

/// Signs the receipt in place with the verifier's key.
pub fn sign_receipt(receipt: &mut Receipt, key: &SigningKey) {
    let signature = key.sign(&receipt_body(receipt));
    receipt.signature = signature.to_bytes().to_vec();
}

/// Checks a receipt signature against the verifier's public key.
pub fn verify_receipt(receipt: &Receipt, public_key: &VerifyingKey) -> Result<(), AuthError> {
    let bytes: [u8; 64] = receipt
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| AuthError::InvalidSignature)?;
    let signature = Signature::from_bytes(&bytes);
    public_key
        .verify(&receipt_body(receipt), &signature)
        .map_err(|_| AuthError::InvalidSignature)
}

/// Receipt for a packet whose verification produced `verdict`.
pub fn receipt_for(
    packet: &PacketDescriptor,
    computed: [u8; 32],
    verdict: Verdict,
    reason: Option<&str>,
) -> Receipt {
    Receipt {
        packet: packet.id,
        verifier: packet.dst,
        verdict,
        payload_digest: computed,
        reason: reason.map(str::to_string),
        signature: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::DeterministicKeyProvider;
    use isltask_env::{NodeId, PacketId, TaskId, TokenId};
    use uuid::Uuid;

    fn request(scope: TokenScope) -> TokenRequest {
        TokenRequest {
            token_id: TokenId(1),
            task: TaskId(3),
            origin: NodeId::satellite(0),
            scope,
            issued_at: 2,
            expiry: 11,
            parent: None,
        }
    }

    fn packet(src: NodeId, dst: NodeId, step: u64, task: u64) -> PacketDescriptor {
        let payload = b"observation".to_vec();
        PacketDescriptor {
            id: PacketId(5),
            task: TaskId(task),
            src,
            dst,
            step,
            payload_ref: Uuid::from_u128(1),
            digest: payload_digest(&payload),
            payload,
            token: None,
        }
    }

    fn authority() -> (TokenAuthority, TokenVerifier) {
        let keys = DeterministicKeyProvider::new(42);
        let authority = TokenAuthority::new(keys.biscuit_root_key());
        let verifier = TokenVerifier::new(authority.public_key());
        (authority, verifier)
    }

    #[test]
    fn test_inter_satellite_token_denies_downlink() {
        let (authority, verifier) = authority();
        let token = authority.issue(&request(TokenScope::InterSatellite)).unwrap();

        let isl = packet(NodeId::satellite(0), NodeId::satellite(1), 3, 3);
        assert!(verifier.authorize(&token.sealed, &isl).is_ok());

        let down = packet(NodeId::satellite(0), NodeId::ground(0), 3, 3);
        let err = verifier.authorize(&token.sealed, &down).unwrap_err();
        assert_eq!(err.reason(), "unauthorized");
    }

    #[test]
    fn test_downlink_token_only_from_relay() {
        let (authority, verifier) = authority();
        let relay = NodeId::satellite(4);
        let token = authority.issue(&request(TokenScope::Downlink { relay })).unwrap();

        assert!(verifier
            .authorize(&token.sealed, &packet(relay, NodeId::ground(1), 5, 3))
            .is_ok());
        assert!(verifier
            .authorize(&token.sealed, &packet(NodeId::satellite(5), NodeId::ground(1), 5, 3))
            .is_err());
        assert!(verifier
            .authorize(&token.sealed, &packet(NodeId::satellite(5), NodeId::satellite(6), 5, 3))
            .is_ok());
    }

    #[test]
    fn test_token_bound_to_task_and_window() {
        let (authority, verifier) = authority();
        let token = authority.issue(&request(TokenScope::Unrestricted)).unwrap();
        let (a, b) = (NodeId::satellite(0), NodeId::ground(0));

        assert!(verifier.authorize(&token.sealed, &packet(a, b, 11, 3)).is_ok());
        assert!(verifier.authorize(&token.sealed, &packet(a, b, 12, 3)).is_err());
        assert!(verifier.authorize(&token.sealed, &packet(a, b, 1, 3)).is_err());
        assert!(verifier.authorize(&token.sealed, &packet(a, b, 5, 4)).is_err());
    }

    #[test]
    fn test_foreign_root_rejected() {
        let (authority, _) = authority();
        let token = authority.issue(&request(TokenScope::Unrestricted)).unwrap();

        let other = TokenVerifier::new(DeterministicKeyProvider::new(43).biscuit_root_key().public());
        let err = other
            .authorize(&token.sealed, &packet(NodeId::satellite(0), NodeId::ground(0), 3, 3))
            .unwrap_err();
        assert_eq!(err.reason(), "invalid_token");
    }

    #[test]
    fn test_receipt_signature_roundtrip() {
        let mut keys = DeterministicKeyProvider::new(1);
        let node = NodeId::ground(0);
        let pkt = packet(NodeId::satellite(0), node, 3, 3);
        let mut receipt = receipt_for(&pkt, pkt.digest, Verdict::Ok, None);

        sign_receipt(&mut receipt, &keys.node_key(pkt.dst));
        assert!(verify_receipt(&receipt, &keys.node_public_key(node)).is_ok());

        receipt.verdict = Verdict::Bad;
        assert!(verify_receipt(&receipt, &keys.node_public_key(node)).is_err());
    }
}
