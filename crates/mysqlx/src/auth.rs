//! SASL-style authentication mechanisms.
//!
//! The handshake driver is mechanism-agnostic: it asks the mechanism for an
//! initial response, forwards server challenges, and sends back
//! continuations until the server answers `AuthenticateOk` or `Error`.
//!
//! Shipped mechanisms:
//!
//! - `PLAIN` — single round, `schema NUL user NUL password` in cleartext;
//!   only safe over TLS
//! - `MYSQL41` — challenge/response over a 20-byte nonce:
//!   `SHA1(password) XOR SHA1(nonce + SHA1(SHA1(password)))`
//! - `SHA256_MEMORY` — challenge/response against the server's in-memory
//!   cache: `XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + nonce))`

use sha1::Sha1;
use sha2::{Digest, Sha256};

use mysqlx_core::error::{Error, ProtocolError, ProtocolErrorKind};

/// Well-known mechanism names as advertised by the server.
pub mod mechanisms {
    pub const PLAIN: &str = "PLAIN";
    pub const MYSQL41: &str = "MYSQL41";
    pub const SHA256_MEMORY: &str = "SHA256_MEMORY";
}

/// The credentials a mechanism works from.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub user: &'a str,
    pub password: &'a str,
    pub schema: &'a str,
}

/// A pluggable authentication mechanism.
pub trait AuthMechanism: Send + Sync {
    /// The mechanism name sent in `AuthenticateStart`.
    fn name(&self) -> &'static str;

    /// Whether this mechanism is acceptable given the server's advertised
    /// list.
    fn verify_server(&self, mechanisms: &[String]) -> bool {
        mechanisms.iter().any(|m| m == self.name())
    }

    /// The first `AuthenticateStart.auth_data`.
    fn initial_response(&self, creds: &Credentials<'_>) -> Vec<u8>;

    /// The next `AuthenticateContinue.auth_data` for a server challenge.
    fn continue_response(&self, creds: &Credentials<'_>, challenge: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Mechanism selection, used as the session's preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mechanism {
    #[default]
    Plain,
    Mysql41,
    Sha256Memory,
}

impl Mechanism {
    /// The implementation behind this selection.
    pub fn handler(self) -> &'static dyn AuthMechanism {
        match self {
            Mechanism::Plain => &Plain,
            Mechanism::Mysql41 => &Mysql41,
            Mechanism::Sha256Memory => &Sha256Memory,
        }
    }
}

/// SASL PLAIN.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

impl AuthMechanism for Plain {
    fn name(&self) -> &'static str {
        mechanisms::PLAIN
    }

    fn initial_response(&self, creds: &Credentials<'_>) -> Vec<u8> {
        let mut response =
            Vec::with_capacity(creds.schema.len() + creds.user.len() + creds.password.len() + 2);
        response.extend_from_slice(creds.schema.as_bytes());
        response.push(0);
        response.extend_from_slice(creds.user.as_bytes());
        response.push(0);
        response.extend_from_slice(creds.password.as_bytes());
        response
    }

    fn continue_response(
        &self,
        _creds: &Credentials<'_>,
        _challenge: &[u8],
    ) -> Result<Vec<u8>, Error> {
        Err(Error::Protocol(ProtocolError {
            kind: ProtocolErrorKind::UnexpectedMessage,
            message: "PLAIN authentication does not accept a server challenge".to_string(),
        }))
    }
}

/// MYSQL41 challenge/response.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mysql41;

impl AuthMechanism for Mysql41 {
    fn name(&self) -> &'static str {
        mechanisms::MYSQL41
    }

    fn initial_response(&self, _creds: &Credentials<'_>) -> Vec<u8> {
        Vec::new()
    }

    fn continue_response(
        &self,
        creds: &Credentials<'_>,
        challenge: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let mut response = Vec::new();
        response.extend_from_slice(creds.schema.as_bytes());
        response.push(0);
        response.extend_from_slice(creds.user.as_bytes());
        response.push(0);
        if !creds.password.is_empty() {
            let scramble = sha1_scramble(creds.password, challenge);
            response.push(b'*');
            response.extend_from_slice(hex_upper(&scramble).as_bytes());
        }
        Ok(response)
    }
}

/// SHA256_MEMORY challenge/response.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Memory;

impl AuthMechanism for Sha256Memory {
    fn name(&self) -> &'static str {
        mechanisms::SHA256_MEMORY
    }

    fn initial_response(&self, _creds: &Credentials<'_>) -> Vec<u8> {
        Vec::new()
    }

    fn continue_response(
        &self,
        creds: &Credentials<'_>,
        challenge: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let mut response = Vec::new();
        response.extend_from_slice(creds.schema.as_bytes());
        response.push(0);
        response.extend_from_slice(creds.user.as_bytes());
        response.push(0);
        if !creds.password.is_empty() {
            let scramble = sha256_scramble(creds.password, challenge);
            response.extend_from_slice(hex_upper(&scramble).as_bytes());
        }
        Ok(response)
    }
}

/// Compute the MYSQL41 scramble.
///
/// `SHA1(password) XOR SHA1(nonce + SHA1(SHA1(password)))`
fn sha1_scramble(password: &str, nonce: &[u8]) -> [u8; 20] {
    // Servers send exactly 20 nonce bytes; tolerate a longer challenge.
    let nonce = if nonce.len() > 20 { &nonce[..20] } else { nonce };

    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    let stage1: [u8; 20] = hasher.finalize().into();

    let mut hasher = Sha1::new();
    hasher.update(stage1);
    let stage2: [u8; 20] = hasher.finalize().into();

    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    let mut scramble = [0u8; 20];
    for (i, (a, b)) in stage1.iter().zip(stage3.iter()).enumerate() {
        scramble[i] = a ^ b;
    }
    scramble
}

/// Compute the SHA256_MEMORY scramble.
///
/// `XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + nonce))`
fn sha256_scramble(password: &str, nonce: &[u8]) -> [u8; 32] {
    // Some servers append a NUL to the 20-byte nonce; strip it.
    let nonce = if nonce.len() == 21 && nonce.last() == Some(&0) {
        &nonce[..20]
    } else {
        nonce
    };

    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    let password_hash: [u8; 32] = hasher.finalize().into();

    let mut hasher = Sha256::new();
    hasher.update(password_hash);
    let password_hash_hash: [u8; 32] = hasher.finalize().into();

    let mut hasher = Sha256::new();
    hasher.update(password_hash_hash);
    hasher.update(nonce);
    let salted: [u8; 32] = hasher.finalize().into();

    let mut scramble = [0u8; 32];
    for (i, (a, b)) in password_hash.iter().zip(salted.iter()).enumerate() {
        scramble[i] = a ^ b;
    }
    scramble
}

fn hex_upper(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02X}", byte));
    }
    out
}
