//! Security backends for the tasking engine.
//!
//! - [`LocalBackend`]: Biscuit tokens and Ed25519 receipts, in-process
//! - [`LedgerBackend`]: the local crypto, with every token and receipt
//!   recorded in a sled database
//! - [`CommandBackend`]: delegates to an external tool over stdin/stdout
//!   JSON, each call bounded by a timeout
//!
//! The binary resolves one of these from the environment with
//! [`BackendKind::from_env`] and [`open_backend`].

use crate::keys::DeterministicKeyProvider;
use crate::trust::{payload_digest, receipt_for, sign_receipt, AuthError, TokenAuthority, TokenVerifier};
use ed25519_dalek::VerifyingKey;
use isltask_env::{
    CapabilityToken, EnvError, NodeId, PacketDescriptor, PacketId, Receipt, SecurityBackend,
    TokenId, TokenRequest, Verdict,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Selects the backend implementation.
pub const BACKEND_ENV: &str = "ISLTASK_BACKEND";

/// Command line of the external tool (`command` backend).
pub const BACKEND_CMD_ENV: &str = "ISLTASK_BACKEND_CMD";

/// Database directory (`ledger` backend); temporary if unset.
pub const LEDGER_PATH_ENV: &str = "ISLTASK_LEDGER_PATH";

// ============================================================================
// LOCAL
// ============================================================================

/// In-process backend: Biscuit capability tokens, Ed25519-signed receipts.
pub struct LocalBackend {
    authority: TokenAuthority,
    verifier: TokenVerifier,
    keys: DeterministicKeyProvider,
}

impl LocalBackend {
    /// Creates a backend whose keys derive from `key_seed`.
    pub fn new(key_seed: u64) -> Self {
        let keys = DeterministicKeyProvider::new(key_seed);
        let authority = TokenAuthority::new(keys.biscuit_root_key());
        let verifier = TokenVerifier::new(authority.public_key());
        Self {
            authority,
            verifier,
            keys,
        }
    }

    /// Public key a node signs its receipts with.
    pub fn node_public_key(&mut self, node: NodeId) -> VerifyingKey {
        self.keys.node_public_key(node)
    }

    fn check(&self, packet: &PacketDescriptor, computed: &[u8; 32]) -> Result<(), &'static str> {
        if computed != &packet.digest {
            return Err("digest_mismatch");
        }
        let token = packet.token.as_ref().ok_or("missing_token")?;
        self.verifier
            .authorize(&token.sealed, packet)
            .map_err(|e: AuthError| e.reason())
    }
}

impl SecurityBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn issue_token(&mut self, request: &TokenRequest) -> Result<CapabilityToken, EnvError> {
        self.authority
            .issue(request)
            .map_err(|e| EnvError::backend(e.to_string()))
    }

    fn verify(&mut self, packet: &PacketDescriptor) -> Result<Receipt, EnvError> {
        let computed = payload_digest(&packet.payload);
        let mut receipt = match self.check(packet, &computed) {
            Ok(()) => receipt_for(packet, computed, Verdict::Ok, None),
            Err(reason) => {
                debug!(packet = %packet.id, verifier = %packet.dst, reason, "Packet rejected");
                receipt_for(packet, computed, Verdict::Bad, Some(reason))
            }
        };
        sign_receipt(&mut receipt, &self.keys.node_key(packet.dst));
        Ok(receipt)
    }
}

// ============================================================================
// LEDGER
// ============================================================================

/// Local backend that records every issued token and receipt.
///
/// Keys are big-endian ids, values are JSON. A store failure surfaces as
/// `EnvError::Storage`, which the engine treats as the backend being
/// unavailable.
pub struct LedgerBackend {
    inner: LocalBackend,
    db: sled::Db,
    tokens: sled::Tree,
    receipts: sled::Tree,
}

impl LedgerBackend {
    /// Opens (or creates) a ledger at `path`.
    pub fn open<P: AsRef<Path>>(path: P, key_seed: u64) -> Result<Self, EnvError> {
        let db = sled::open(path.as_ref())
            .map_err(|e| EnvError::Storage(format!("Failed to open sled DB: {}", e)))?;
        Self::with_db(db, key_seed)
    }

    /// Creates a ledger that is deleted when dropped.
    pub fn temporary(key_seed: u64) -> Result<Self, EnvError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| EnvError::Storage(format!("Failed to create temp DB: {}", e)))?;
        Self::with_db(db, key_seed)
    }

    fn with_db(db: sled::Db, key_seed: u64) -> Result<Self, EnvError> {
        let tokens = db
            .open_tree("tokens")
            .map_err(|e| EnvError::Storage(e.to_string()))?;
        let receipts = db
            .open_tree("receipts")
            .map_err(|e| EnvError::Storage(e.to_string()))?;
        Ok(Self {
            inner: LocalBackend::new(key_seed),
            db,
            tokens,
            receipts,
        })
    }

    pub fn token(&self, id: TokenId) -> Result<Option<CapabilityToken>, EnvError> {
        read_json(&self.tokens, id.0)
    }

    pub fn receipt(&self, packet: PacketId) -> Result<Option<Receipt>, EnvError> {
        read_json(&self.receipts, packet.0)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn receipt_count(&self) -> usize {
        self.receipts.len()
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<(), EnvError> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| EnvError::Storage(e.to_string()))
    }

    pub fn node_public_key(&mut self, node: NodeId) -> VerifyingKey {
        self.inner.node_public_key(node)
    }
}

fn write_json<T: Serialize>(tree: &sled::Tree, id: u64, value: &T) -> Result<(), EnvError> {
    let bytes = serde_json::to_vec(value).map_err(|e| EnvError::Serialization(e.to_string()))?;
    tree.insert(id.to_be_bytes(), bytes)
        .map_err(|e| EnvError::Storage(e.to_string()))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(tree: &sled::Tree, id: u64) -> Result<Option<T>, EnvError> {
    let Some(bytes) = tree
        .get(id.to_be_bytes())
        .map_err(|e| EnvError::Storage(e.to_string()))?
    else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| EnvError::Serialization(e.to_string()))
}

impl SecurityBackend for LedgerBackend {
    fn name(&self) -> &'static str {
        "ledger"
    }

    fn issue_token(&mut self, request: &TokenRequest) -> Result<CapabilityToken, EnvError> {
        let token = self.inner.issue_token(request)?;
        write_json(&self.tokens, token.id.0, &token)?;
        Ok(token)
    }

    fn verify(&mut self, packet: &PacketDescriptor) -> Result<Receipt, EnvError> {
        let receipt = self.inner.verify(packet)?;
        write_json(&self.receipts, receipt.packet.0, &receipt)?;
        Ok(receipt)
    }
}

// ============================================================================
// COMMAND
// ============================================================================

/// Backend that shells out to an external tool.
///
/// The tool is invoked as `<program> <args...> issue-token` or
/// `<program> <args...> verify`, receives the request as JSON on stdin and
/// answers with a `CapabilityToken` or `Receipt` as JSON on stdout. A call
/// that outlives the timeout is killed and reported as `EnvError::Timeout`.
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    runtime: tokio::runtime::Runtime,
}

impl CommandBackend {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        timeout_ms: u64,
    ) -> Result<Self, EnvError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EnvError::backend(format!("Failed to start runtime: {}", e)))?;
        Ok(Self {
            program: program.into(),
            args,
            timeout: Duration::from_millis(timeout_ms),
            runtime,
        })
    }

    /// Parses a whitespace-separated command line.
    pub fn from_command_line(line: &str, timeout_ms: u64) -> Result<Self, EnvError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| EnvError::backend(format!("{} is empty", BACKEND_CMD_ENV)))?;
        Self::new(program, parts.collect(), timeout_ms)
    }

    fn exchange<Req, Resp>(&self, subcommand: &str, request: &Req) -> Result<Resp, EnvError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let input =
            serde_json::to_vec(request).map_err(|e| EnvError::Serialization(e.to_string()))?;
        let stdout = self.runtime.block_on(self.invoke(subcommand, input))?;
        serde_json::from_slice(&stdout).map_err(|e| {
            EnvError::backend(format!("{} {}: bad response: {}", self.program, subcommand, e))
        })
    }

    async fn invoke(&self, subcommand: &str, input: Vec<u8>) -> Result<Vec<u8>, EnvError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(subcommand)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EnvError::backend(format!("Failed to spawn {}: {}", self.program, e)))?;

        let call = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&input).await?;
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|e| EnvError::backend(format!("{}: {}", self.program, e)))?,
            Err(_) => return Err(EnvError::Timeout(self.timeout.as_millis() as u64)),
        };

        if !output.status.success() {
            return Err(EnvError::backend(format!(
                "{} {} exited with {}: {}",
                self.program,
                subcommand,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl SecurityBackend for CommandBackend {
    fn name(&self) -> &'static str {
        "command"
    }

    fn issue_token(&mut self, request: &TokenRequest) -> Result<CapabilityToken, EnvError> {
        self.exchange("issue-token", request)
    }

    fn verify(&mut self, packet: &PacketDescriptor) -> Result<Receipt, EnvError> {
        self.exchange("verify", packet)
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// Backend implementation chosen at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Ledger { path: Option<PathBuf> },
    Command { line: String },
}

impl BackendKind {
    /// Reads `ISLTASK_BACKEND` (default `local`) and its companion variables.
    pub fn from_env() -> Result<Self, EnvError> {
        let name = std::env::var(BACKEND_ENV).unwrap_or_else(|_| "local".to_string());
        let mut kind: BackendKind = name.parse()?;
        match &mut kind {
            BackendKind::Local => {}
            BackendKind::Ledger { path } => {
                *path = std::env::var_os(LEDGER_PATH_ENV).map(PathBuf::from);
            }
            BackendKind::Command { line } => {
                *line = std::env::var(BACKEND_CMD_ENV)
                    .map_err(|_| EnvError::backend(format!("{} is not set", BACKEND_CMD_ENV)))?;
            }
        }
        Ok(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Ledger { .. } => "ledger",
            BackendKind::Command { .. } => "command",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for BackendKind {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "local" => Ok(BackendKind::Local),
            "ledger" => Ok(BackendKind::Ledger { path: None }),
            "command" | "cmd" => Ok(BackendKind::Command {
                line: String::new(),
            }),
            other => Err(EnvError::backend(format!("unknown backend '{}'", other))),
        }
    }
}

/// Builds the selected backend.
pub fn open_backend(
    kind: &BackendKind,
    key_seed: u64,
    timeout_ms: u64,
) -> Result<Box<dyn SecurityBackend>, EnvError> {
    info!(backend = %kind, "Opening security backend");
    Ok(match kind {
        BackendKind::Local => Box::new(LocalBackend::new(key_seed)),
        BackendKind::Ledger { path: Some(path) } => Box::new(LedgerBackend::open(path, key_seed)?),
        BackendKind::Ledger { path: None } => Box::new(LedgerBackend::temporary(key_seed)?),
        BackendKind::Command { line } => {
            Box::new(CommandBackend::from_command_line(line, timeout_ms)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::verify_receipt;
    use isltask_env::{TaskId, TokenScope};
    use uuid::Uuid;

    fn request(id: u64, scope: TokenScope) -> TokenRequest {
        TokenRequest {
            token_id: TokenId(id),
            task: TaskId(1),
            origin: NodeId::satellite(0),
            scope,
            issued_at: 0,
            expiry: 9,
            parent: None,
        }
    }

    fn packet(token: Option<CapabilityToken>, dst: NodeId) -> PacketDescriptor {
        let payload = vec![7u8; 24];
        PacketDescriptor {
            id: PacketId(1),
            task: TaskId(1),
            src: NodeId::satellite(0),
            dst,
            step: 1,
            payload_ref: Uuid::from_u128(9),
            digest: payload_digest(&payload),
            payload,
            token,
        }
    }

    #[test]
    fn test_local_accepts_scoped_hop_and_signs() {
        let mut backend = LocalBackend::new(7);
        let token = backend.issue_token(&request(1, TokenScope::InterSatellite)).unwrap();

        let pkt = packet(Some(token), NodeId::satellite(1));
        let receipt = backend.verify(&pkt).unwrap();

        assert!(receipt.is_ok());
        let key = backend.node_public_key(NodeId::satellite(1));
        assert!(verify_receipt(&receipt, &key).is_ok());
    }

    #[test]
    fn test_local_rejection_reasons() {
        let mut backend = LocalBackend::new(7);
        let token = backend.issue_token(&request(1, TokenScope::InterSatellite)).unwrap();

        let mut tampered = packet(Some(token.clone()), NodeId::satellite(1));
        tampered.digest[0] ^= 0x01;
        let receipt = backend.verify(&tampered).unwrap();
        assert_eq!(receipt.reason.as_deref(), Some("digest_mismatch"));

        let receipt = backend.verify(&packet(None, NodeId::satellite(1))).unwrap();
        assert_eq!(receipt.reason.as_deref(), Some("missing_token"));

        let receipt = backend.verify(&packet(Some(token.clone()), NodeId::ground(0))).unwrap();
        assert_eq!(receipt.reason.as_deref(), Some("unauthorized"));

        let mut forged = token;
        forged.sealed = vec![0u8; 16];
        let receipt = backend.verify(&packet(Some(forged), NodeId::satellite(1))).unwrap();
        assert_eq!(receipt.reason.as_deref(), Some("invalid_token"));
    }

    #[test]
    fn test_ledger_records_tokens_and_receipts() {
        let mut ledger = LedgerBackend::temporary(3).unwrap();
        let token = ledger.issue_token(&request(4, TokenScope::Unrestricted)).unwrap();
        let receipt = ledger.verify(&packet(Some(token.clone()), NodeId::ground(0))).unwrap();

        assert_eq!(ledger.token_count(), 1);
        assert_eq!(ledger.receipt_count(), 1);
        assert_eq!(ledger.token(TokenId(4)).unwrap(), Some(token));
        assert_eq!(ledger.receipt(PacketId(1)).unwrap(), Some(receipt));
        assert_eq!(ledger.token(TokenId(5)).unwrap(), None);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("local".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert_eq!(
            "Ledger".parse::<BackendKind>().unwrap(),
            BackendKind::Ledger { path: None }
        );
        assert!("hsm".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_command_backend_missing_program() {
        let mut backend =
            CommandBackend::new("/nonexistent/isltask-tool", Vec::new(), 100).unwrap();
        let err = backend
            .issue_token(&request(1, TokenScope::Unrestricted))
            .unwrap_err();
        assert!(matches!(err, EnvError::BackendUnavailable(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_backend_times_out() {
        let mut backend = CommandBackend::new(
            "sh",
            vec!["-c".to_string(), "sleep 5".to_string()],
            50,
        )
        .unwrap();
        let err = backend.verify(&packet(None, NodeId::ground(0))).unwrap_err();
        assert!(matches!(err, EnvError::Timeout(50)));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_backend_reads_stdout() {
        let token = CapabilityToken {
            id: TokenId(2),
            subject: TaskId(1),
            scope: TokenScope::InterSatellite,
            issued_at: 0,
            expiry: 9,
            parent: None,
            sealed: Vec::new(),
        };
        let json = serde_json::to_string(&token).unwrap();
        let script = format!("cat > /dev/null; printf '%s' '{}'", json);
        let mut backend =
            CommandBackend::new("sh", vec!["-c".to_string(), script], 2000).unwrap();

        let issued = backend
            .issue_token(&request(2, TokenScope::InterSatellite))
            .unwrap();
        assert_eq!(issued, token);
    }
}
