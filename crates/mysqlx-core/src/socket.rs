//! Transport contracts: the duplex byte stream the driver consumes and the
//! factory that produces it.
//!
//! The protocol core never opens sockets itself. A `SocketFactory` hands it
//! a ready `Stream`, and from then on the stream is exclusively owned by one
//! connection until it is released on close.

use std::io::{Read, Write};
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::Error;

/// A duplex byte stream with half-close semantics.
///
/// `half_close` shuts down the write side while leaving reads open so a
/// closing connection can drain pending server frames. `set_read_deadline`
/// bounds that drain; implementations without timeout support may leave the
/// default no-op.
pub trait Stream: Read + Write + Send {
    /// Shut down the write side of the stream.
    fn half_close(&mut self) -> std::io::Result<()>;

    /// Bound subsequent reads by `deadline`; `None` restores blocking reads.
    fn set_read_deadline(&mut self, _deadline: Option<Duration>) -> std::io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Stream")
    }
}

impl<S: Stream + ?Sized> Stream for Box<S> {
    fn half_close(&mut self) -> std::io::Result<()> {
        (**self).half_close()
    }

    fn set_read_deadline(&mut self, deadline: Option<Duration>) -> std::io::Result<()> {
        (**self).set_read_deadline(deadline)
    }
}

/// Produces duplex streams for candidate endpoints.
///
/// A factory failure is classified by the `ConnectionErrorKind` it carries;
/// the router absorbs transient kinds (DNS, refused, timeout, unreachable)
/// and propagates everything else untouched.
pub trait SocketFactory: Send + Sync {
    /// Open a stream to `endpoint`, observing `timeout` as an upper bound.
    fn connect(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Box<dyn Stream>, Error>;
}
