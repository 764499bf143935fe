//! Bundled socket factory.
//!
//! The protocol core consumes any `SocketFactory`; this module provides the
//! default TCP implementation (plus unix sockets when an endpoint carries a
//! socket path) and classifies acquisition failures into the transport error
//! kinds the router's transient predicate understands.

use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use log::debug;
use mysqlx_core::error::{ConnectionError, ConnectionErrorKind, Error};
use mysqlx_core::{Endpoint, SocketFactory, Stream};

/// Newtype so the `Stream` impl stays local to this crate.
#[derive(Debug)]
pub struct TcpStreamWrapper(pub TcpStream);

impl Stream for TcpStreamWrapper {
    fn half_close(&mut self) -> io::Result<()> {
        self.0.shutdown(Shutdown::Write)
    }

    fn set_read_deadline(&mut self, deadline: Option<Duration>) -> io::Result<()> {
        self.0.set_read_timeout(deadline)
    }
}

impl io::Read for TcpStreamWrapper {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl io::Write for TcpStreamWrapper {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[cfg(unix)]
#[derive(Debug)]
pub struct UnixStreamWrapper(pub UnixStream);

#[cfg(unix)]
impl io::Read for UnixStreamWrapper {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

#[cfg(unix)]
impl io::Write for UnixStreamWrapper {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[cfg(unix)]
impl Stream for UnixStreamWrapper {
    fn half_close(&mut self) -> io::Result<()> {
        self.0.shutdown(Shutdown::Write)
    }

    fn set_read_deadline(&mut self, deadline: Option<Duration>) -> io::Result<()> {
        self.0.set_read_timeout(deadline)
    }
}

/// The default factory: TCP with nodelay, unix sockets for endpoints with a
/// socket path.
#[derive(Debug, Default)]
pub struct TcpSocketFactory;

impl SocketFactory for TcpSocketFactory {
    fn connect(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Box<dyn Stream>, Error> {
        if let Some(path) = &endpoint.socket_path {
            return connect_unix(path);
        }

        let addrs = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| {
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::DnsResolution,
                    message: format!("failed to resolve {}: {}", endpoint.address(), e),
                    source: Some(Box::new(e)),
                })
            })?;

        let mut last_err: Option<io::Error> = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    debug!("connected to {} ({})", endpoint.address(), addr);
                    return Ok(Box::new(TcpStreamWrapper(stream)));
                }
                Err(e) => last_err = Some(e),
            }
        }

        let err = last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        });
        Err(classify_io_error(endpoint, err))
    }
}

#[cfg(unix)]
fn connect_unix(path: &str) -> Result<Box<dyn Stream>, Error> {
    let stream = UnixStream::connect(path).map_err(|e| classify_unix_error(path, e))?;
    Ok(Box::new(UnixStreamWrapper(stream)))
}

#[cfg(not(unix))]
fn connect_unix(path: &str) -> Result<Box<dyn Stream>, Error> {
    Err(Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message: format!("unix socket {} is not supported on this platform", path),
        source: None,
    }))
}

fn classify_io_error(endpoint: &Endpoint, err: io::Error) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::ConnectionRefused => ConnectionErrorKind::Refused,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectionErrorKind::Timeout,
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
            ConnectionErrorKind::Unreachable
        }
        io::ErrorKind::NotFound => ConnectionErrorKind::DnsResolution,
        _ => ConnectionErrorKind::Connect,
    };
    Error::Connection(ConnectionError {
        kind,
        message: format!("failed to connect to {}: {}", endpoint.address(), err),
        source: Some(Box::new(err)),
    })
}

#[cfg(unix)]
fn classify_unix_error(path: &str, err: io::Error) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::ConnectionRefused => ConnectionErrorKind::Refused,
        io::ErrorKind::NotFound => ConnectionErrorKind::Refused,
        io::ErrorKind::TimedOut => ConnectionErrorKind::Timeout,
        _ => ConnectionErrorKind::Connect,
    };
    Error::Connection(ConnectionError {
        kind,
        message: format!("failed to connect to unix socket {}: {}", path, err),
        source: Some(Box::new(err)),
    })
}
