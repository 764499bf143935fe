//! TLS upgrade support.
//!
//! The X Protocol starts in cleartext; after a `CapabilitiesSet{tls:true}`
//! is acknowledged the client performs a TLS handshake and every subsequent
//! frame traverses the encrypted stream. This module wraps the factory's
//! duplex stream with rustls and drives the blocking handshake.
//!
//! On handshake failure the plain stream is handed back to the caller so the
//! connection can still be half-closed and released.
//!
//! TLS support is gated behind the `tls` cargo feature (enabled by default);
//! without it the upgrade path reports a configuration error.

use mysqlx_core::error::{Error, TlsError};

use crate::config::TlsOptions;

#[cfg(feature = "tls")]
use std::fs::File;
#[cfg(feature = "tls")]
use std::io::{self, BufReader, Read, Write};
#[cfg(feature = "tls")]
use std::path::Path;
#[cfg(feature = "tls")]
use std::sync::Arc;
#[cfg(feature = "tls")]
use std::time::Duration;

#[cfg(feature = "tls")]
use mysqlx_core::Stream;
#[cfg(feature = "tls")]
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};

/// A failed upgrade: the error plus the untouched plain stream.
pub struct HandshakeFailure<S> {
    pub stream: S,
    pub error: Error,
}

/// Validate a TLS option set before any bytes are exchanged.
///
/// A client certificate without its key is the one combination that cannot
/// work and is rejected eagerly.
pub fn validate_options(options: &TlsOptions) -> Result<(), Error> {
    if options.client_cert_path.is_some() && options.client_key_path.is_none() {
        return Err(tls_error(
            "a client certificate needs its private key; set both paths for mutual TLS",
        ));
    }
    Ok(())
}

fn tls_error(message: impl Into<String>) -> Error {
    Error::Tls(TlsError {
        message: message.into(),
        source: None,
    })
}

/// TLS stream wrapper over an arbitrary duplex stream.
#[cfg(feature = "tls")]
pub struct TlsStream<S: Stream> {
    conn: rustls::ClientConnection,
    stream: S,
}

#[cfg(feature = "tls")]
impl<S: Stream> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TlsStream({:?})", self.conn.protocol_version())
    }
}

#[cfg(feature = "tls")]
impl<S: Stream> TlsStream<S> {
    /// Wrap `stream` and perform the TLS handshake.
    ///
    /// `server_name` is the SNI/verification name, overridable through
    /// `TlsOptions::server_name`. On failure the untouched plain stream
    /// rides back inside the `HandshakeFailure`.
    pub fn connect(
        mut stream: S,
        options: &TlsOptions,
        server_name: &str,
    ) -> Result<Self, HandshakeFailure<S>> {
        match Self::establish(&mut stream, options, server_name) {
            Ok(conn) => Ok(TlsStream { conn, stream }),
            Err(error) => Err(HandshakeFailure { stream, error }),
        }
    }

    /// Build the session and drive the handshake over the blocking stream.
    fn establish(
        stream: &mut S,
        options: &TlsOptions,
        server_name: &str,
    ) -> Result<rustls::ClientConnection, Error> {
        validate_options(options)?;
        let config = build_client_config(options)?;

        let sni = options.server_name.as_deref().unwrap_or(server_name);
        let sni: ServerName<'static> = sni
            .to_string()
            .try_into()
            .map_err(|e| tls_error(format!("invalid TLS server name '{}': {}", sni, e)))?;

        let mut conn = rustls::ClientConnection::new(Arc::new(config), sni)
            .map_err(|e| tls_error(format!("TLS session setup failed: {}", e)))?;

        while conn.is_handshaking() {
            while conn.wants_write() {
                conn.write_tls(stream)
                    .map_err(|e| tls_error(format!("TLS handshake write failed: {}", e)))?;
            }
            if conn.wants_read() {
                match conn.read_tls(stream) {
                    Ok(0) => {
                        return Err(tls_error("peer closed the stream during the TLS handshake"))
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(tls_error(format!("TLS handshake read failed: {}", e)))
                    }
                }
                conn.process_new_packets()
                    .map_err(|e| tls_error(format!("TLS handshake failed: {}", e)))?;
            }
        }
        Ok(conn)
    }

    /// Negotiated protocol version, once the handshake completes.
    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// Pull one batch of TLS records off the transport into the session.
    ///
    /// Returns false when nothing further can arrive (closed or quiescent).
    fn pump_read(&mut self) -> io::Result<bool> {
        if !self.conn.wants_read() {
            return Ok(false);
        }
        if self.conn.read_tls(&mut self.stream)? == 0 {
            return Ok(false);
        }
        self.conn
            .process_new_packets()
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok(true)
    }

    /// Push any pending TLS records out to the transport.
    fn flush_tls(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        Ok(())
    }
}

#[cfg(feature = "tls")]
impl<S: Stream> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // Ok(0) from the plaintext reader is a clean close_notify.
            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
            if !self.pump_read()? {
                return Ok(0);
            }
        }
    }
}

#[cfg(feature = "tls")]
impl<S: Stream> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        self.flush_tls()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.conn.writer().flush()?;
        self.flush_tls()?;
        self.stream.flush()
    }
}

#[cfg(feature = "tls")]
impl<S: Stream> Stream for TlsStream<S> {
    fn half_close(&mut self) -> io::Result<()> {
        self.conn.send_close_notify();
        let _ = self.flush_tls();
        self.stream.half_close()
    }

    fn set_read_deadline(&mut self, deadline: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_deadline(deadline)
    }
}

/// Assemble the rustls client config the options describe: verification
/// against webpki roots, a caller-provided CA bundle, or none at all, plus
/// an optional client identity for mutual TLS.
#[cfg(feature = "tls")]
fn build_client_config(options: &TlsOptions) -> Result<rustls::ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let algorithms = provider.signature_verification_algorithms;

    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .map_err(|e| tls_error(format!("unsupported protocol versions: {}", e)))?;

    let builder = if options.danger_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { algorithms }))
    } else {
        builder.with_root_certificates(load_root_store(options)?)
    };

    match client_identity(options)? {
        Some((chain, key)) => builder
            .with_client_auth_cert(chain, key)
            .map_err(|e| tls_error(format!("client identity rejected: {}", e))),
        None => Ok(builder.with_no_client_auth()),
    }
}

/// The trust anchors: the configured CA bundle, or webpki roots.
#[cfg(feature = "tls")]
fn load_root_store(options: &TlsOptions) -> Result<rustls::RootCertStore, Error> {
    let mut roots = rustls::RootCertStore::empty();
    match &options.ca_cert_path {
        Some(path) => {
            for cert in read_pem_certs(path, "CA bundle")? {
                roots.add(cert).map_err(|e| {
                    tls_error(format!(
                        "rejected certificate in CA bundle {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(roots)
}

/// The client certificate chain and key, when mutual TLS is configured.
#[cfg(feature = "tls")]
#[allow(clippy::type_complexity)]
fn client_identity(
    options: &TlsOptions,
) -> Result<Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>, Error> {
    let (Some(cert_path), Some(key_path)) = (&options.client_cert_path, &options.client_key_path)
    else {
        return Ok(None);
    };

    let chain = read_pem_certs(cert_path, "client certificate")?;

    let key_file = File::open(key_path).map_err(|e| {
        tls_error(format!(
            "cannot read client key {}: {}",
            key_path.display(),
            e
        ))
    })?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| tls_error(format!("bad PEM in client key {}: {}", key_path.display(), e)))?
        .ok_or_else(|| {
            tls_error(format!(
                "client key {} holds no private key",
                key_path.display()
            ))
        })?;

    Ok(Some((chain, key)))
}

#[cfg(feature = "tls")]
fn read_pem_certs(path: &Path, what: &str) -> Result<Vec<CertificateDer<'static>>, Error> {
    let file = File::open(path)
        .map_err(|e| tls_error(format!("cannot read {} {}: {}", what, path.display(), e)))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|e| tls_error(format!("bad PEM in {} {}: {}", what, path.display(), e)))?;
    if certs.is_empty() {
        return Err(tls_error(format!(
            "{} {} holds no certificates",
            what,
            path.display()
        )));
    }
    Ok(certs)
}

/// Accepts whatever certificate the server presents, while still verifying
/// handshake signatures with the provider's algorithms. Only reachable
/// through `danger_skip_verify`, for servers with self-signed certificates.
#[cfg(feature = "tls")]
struct AcceptAnyCert {
    algorithms: rustls::crypto::WebPkiSupportedAlgorithms,
}

#[cfg(feature = "tls")]
impl std::fmt::Debug for AcceptAnyCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AcceptAnyCert")
    }
}

#[cfg(feature = "tls")]
impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// TLS stream placeholder when the `tls` feature is disabled.
#[cfg(not(feature = "tls"))]
#[derive(Debug)]
pub struct TlsStream<S> {
    #[allow(dead_code)]
    inner: S,
}

#[cfg(not(feature = "tls"))]
impl<S> TlsStream<S> {
    /// Always fails: enable the `tls` feature to use TLS upgrades.
    #[allow(unused_variables)]
    pub fn connect(
        stream: S,
        options: &TlsOptions,
        server_name: &str,
    ) -> Result<Self, HandshakeFailure<S>> {
        Err(HandshakeFailure {
            stream,
            error: tls_error(
                "TLS support requires the 'tls' feature. \
                 Add `mysqlx = { features = [\"tls\"] }` to your Cargo.toml.",
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_cert_without_key_rejected() {
        let options = TlsOptions::new().client_cert("/path/to/client.pem");
        assert!(validate_options(&options).is_err());

        let options = TlsOptions::new()
            .client_cert("/path/to/client.pem")
            .client_key("/path/to/client-key.pem");
        assert!(validate_options(&options).is_ok());
    }

    #[test]
    fn default_options_validate() {
        assert!(validate_options(&TlsOptions::new()).is_ok());
        assert!(validate_options(&TlsOptions::new().skip_verify(true)).is_ok());
        assert!(validate_options(&TlsOptions::new().ca_cert("/ca.pem")).is_ok());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn missing_ca_file_reported() {
        let options = TlsOptions::new().ca_cert("/nonexistent/ca.pem");
        let err = build_client_config(&options).unwrap_err();
        assert!(err.to_string().contains("cannot read CA bundle"));
    }

    #[cfg(feature = "tls")]
    #[test]
    fn no_verify_config_builds() {
        let options = TlsOptions::new().skip_verify(true);
        assert!(build_client_config(&options).is_ok());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn webpki_config_builds() {
        assert!(build_client_config(&TlsOptions::new()).is_ok());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn missing_client_key_file_reported() {
        let options = TlsOptions::new()
            .skip_verify(true)
            .client_cert("/nonexistent/client.pem")
            .client_key("/nonexistent/client-key.pem");
        let err = build_client_config(&options).unwrap_err();
        assert!(err.to_string().contains("client certificate"));
    }
}
