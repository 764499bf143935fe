//! Connection: exclusive owner of one duplex stream.
//!
//! "Send one message" and "receive next message" are the only I/O
//! primitives the rest of the driver uses. A write failure, a read failure,
//! or a framing error poisons the connection: every later send or receive
//! fails fast without touching the stream again.
//!
//! The TLS upgrade swaps the underlying stream in place and may be invoked
//! exactly once, between capability negotiation and authentication.

use std::mem;
use std::time::Duration;

use log::trace;
use mysqlx_core::error::{
    ConnectionError, ConnectionErrorKind, Error, ProtocolError, ProtocolErrorKind,
};
use mysqlx_core::Stream;

use crate::config::TlsOptions;
use crate::protocol::{FrameCodec, Message};
use crate::tls::TlsStream;

const READ_CHUNK: usize = 8 * 1024;

/// Read deadline while draining a half-closed stream.
const CLOSE_DRAIN_DEADLINE: Duration = Duration::from_millis(200);

enum Transport {
    Plain(Box<dyn Stream>),
    #[cfg(feature = "tls")]
    Tls(TlsStream<Box<dyn Stream>>),
    Released,
}

/// One duplex stream plus the frame codec over it.
pub struct Connection {
    transport: Transport,
    codec: FrameCodec,
    poisoned: bool,
    closed: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transport = match self.transport {
            Transport::Plain(_) => "plain",
            #[cfg(feature = "tls")]
            Transport::Tls(_) => "tls",
            Transport::Released => "released",
        };
        f.debug_struct("Connection")
            .field("transport", &transport)
            .field("poisoned", &self.poisoned)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Transport {
    fn active(&mut self) -> Option<&mut dyn Stream> {
        match self {
            Transport::Plain(stream) => Some(stream.as_mut()),
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => Some(stream),
            Transport::Released => None,
        }
    }
}

impl Connection {
    /// Take exclusive ownership of a stream.
    pub fn new(stream: Box<dyn Stream>) -> Self {
        Self {
            transport: Transport::Plain(stream),
            codec: FrameCodec::new(),
            poisoned: false,
            closed: false,
        }
    }

    /// Whether an earlier failure has made this connection unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the stream currently runs through a TLS layer.
    pub fn is_secure(&self) -> bool {
        match self.transport {
            #[cfg(feature = "tls")]
            Transport::Tls(_) => true,
            _ => false,
        }
    }

    fn fail_fast(&self) -> Option<Error> {
        if self.closed {
            return Some(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "connection is closed".to_string(),
                source: None,
            }));
        }
        if self.poisoned {
            return Some(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "connection unusable after an earlier failure".to_string(),
                source: None,
            }));
        }
        None
    }

    /// Encode and write one message, atomically with respect to other
    /// writes on this connection.
    pub fn send(&mut self, msg: &Message) -> Result<(), Error> {
        if let Some(err) = self.fail_fast() {
            return Err(err);
        }

        let frame = FrameCodec::encode(msg.type_id, &msg.payload);
        let stream = match self.transport.active() {
            Some(stream) => stream,
            None => {
                return Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: "connection stream already released".to_string(),
                    source: None,
                }))
            }
        };

        let written = stream
            .write_all(&frame)
            .and_then(|()| stream.flush())
            .map_err(|e| {
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: format!("failed to write frame: {}", e),
                    source: Some(Box::new(e)),
                })
            });
        if let Err(err) = written {
            self.poisoned = true;
            return Err(err);
        }

        trace!("sent message type {} ({} bytes)", msg.type_id, frame.len());
        Ok(())
    }

    /// Block until one complete frame is available.
    pub fn receive(&mut self) -> Result<Message, Error> {
        if let Some(err) = self.fail_fast() {
            return Err(err);
        }

        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.codec.decode_next() {
                Ok(Some(msg)) => {
                    trace!(
                        "received message type {} ({} bytes)",
                        msg.type_id,
                        msg.payload.len()
                    );
                    return Ok(msg);
                }
                Ok(None) => {}
                Err(err) => {
                    self.poisoned = true;
                    return Err(err);
                }
            }

            let stream = match self.transport.active() {
                Some(stream) => stream,
                None => {
                    return Err(Error::Connection(ConnectionError {
                        kind: ConnectionErrorKind::Disconnected,
                        message: "connection stream already released".to_string(),
                        source: None,
                    }))
                }
            };

            match stream.read(&mut buf) {
                Ok(0) => {
                    self.poisoned = true;
                    return Err(Error::Connection(ConnectionError {
                        kind: ConnectionErrorKind::Disconnected,
                        message: "connection closed before a complete frame".to_string(),
                        source: None,
                    }));
                }
                Ok(n) => self.codec.extend(&buf[..n]),
                Err(e) => {
                    self.poisoned = true;
                    return Err(Error::Connection(ConnectionError {
                        kind: ConnectionErrorKind::Disconnected,
                        message: format!("failed to read frame: {}", e),
                        source: Some(Box::new(e)),
                    }));
                }
            }
        }
    }

    /// Wrap the stream in a TLS layer, in place.
    ///
    /// Valid exactly once, after capability negotiation and before
    /// authentication. On failure the plain stream is kept so `close` can
    /// still half-close it, but the connection is poisoned.
    pub fn upgrade(&mut self, options: &TlsOptions, server_name: &str) -> Result<(), Error> {
        if let Some(err) = self.fail_fast() {
            return Err(err);
        }
        if self.codec.buffered() > 0 {
            return Err(Error::Protocol(ProtocolError {
                kind: ProtocolErrorKind::UnexpectedMessage,
                message: "cleartext bytes still buffered at TLS upgrade".to_string(),
            }));
        }

        match mem::replace(&mut self.transport, Transport::Released) {
            Transport::Plain(stream) => match TlsStream::connect(stream, options, server_name) {
                #[cfg(feature = "tls")]
                Ok(tls) => {
                    self.transport = Transport::Tls(tls);
                    Ok(())
                }
                #[cfg(not(feature = "tls"))]
                Ok(_) => unreachable!("TLS placeholder never succeeds"),
                Err(failure) => {
                    self.transport = Transport::Plain(failure.stream);
                    self.poisoned = true;
                    Err(failure.error)
                }
            },
            #[cfg(feature = "tls")]
            transport @ Transport::Tls(_) => {
                self.transport = transport;
                self.poisoned = true;
                Err(Error::Tls(mysqlx_core::error::TlsError {
                    message: "TLS upgrade may only be performed once".to_string(),
                    source: None,
                }))
            }
            Transport::Released => Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "connection stream already released".to_string(),
                source: None,
            })),
        }
    }

    /// Half-close the write side, drain briefly, then release the stream.
    /// Idempotent.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match mem::replace(&mut self.transport, Transport::Released) {
            Transport::Plain(mut stream) => drain_and_release(stream.as_mut()),
            #[cfg(feature = "tls")]
            Transport::Tls(mut stream) => drain_and_release(&mut stream),
            Transport::Released => {}
        }
        Ok(())
    }
}

fn drain_and_release(stream: &mut dyn Stream) {
    let _ = stream.half_close();
    let _ = stream.set_read_deadline(Some(CLOSE_DRAIN_DEADLINE));

    // Bounded best-effort drain; the stream is dropped regardless.
    let mut buf = [0u8; 512];
    for _ in 0..8 {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory stream: serves scripted bytes, records writes, counts
    /// half-closes.
    struct ScriptedStream {
        input: io::Cursor<Vec<u8>>,
        written: Arc<std::sync::Mutex<Vec<u8>>>,
        half_closes: Arc<AtomicUsize>,
        fail_writes: bool,
    }

    impl ScriptedStream {
        fn boxed(
            input: Vec<u8>,
        ) -> (Box<dyn Stream>, Arc<std::sync::Mutex<Vec<u8>>>, Arc<AtomicUsize>) {
            let written = Arc::new(std::sync::Mutex::new(Vec::new()));
            let half_closes = Arc::new(AtomicUsize::new(0));
            let stream = Box::new(ScriptedStream {
                input: io::Cursor::new(input),
                written: written.clone(),
                half_closes: half_closes.clone(),
                fail_writes: false,
            });
            (stream, written, half_closes)
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Stream for ScriptedStream {
        fn half_close(&mut self) -> io::Result<()> {
            self.half_closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn send_writes_one_frame() {
        let (stream, written, _) = ScriptedStream::boxed(Vec::new());
        let mut conn = Connection::new(stream);

        conn.send(&Message {
            type_id: 1,
            payload: vec![],
        })
        .unwrap();

        assert_eq!(&*written.lock().unwrap(), &[1, 0, 0, 0, 1]);
    }

    #[test]
    fn receive_decodes_scripted_frames() {
        let mut input = FrameCodec::encode(2, b"caps");
        input.extend_from_slice(&FrameCodec::encode(4, &[]));
        let (stream, _, _) = ScriptedStream::boxed(input);
        let mut conn = Connection::new(stream);

        let first = conn.receive().unwrap();
        assert_eq!(first.type_id, 2);
        assert_eq!(first.payload, b"caps");

        let second = conn.receive().unwrap();
        assert_eq!(second.type_id, 4);
        assert!(second.payload.is_empty());
    }

    #[test]
    fn eof_before_complete_frame_poisons() {
        // A truncated frame: header promises more bytes than arrive.
        let mut input = 10u32.to_le_bytes().to_vec();
        input.push(13);
        let (stream, _, _) = ScriptedStream::boxed(input);
        let mut conn = Connection::new(stream);

        let err = conn.receive().unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert!(conn.is_poisoned());

        // Fail-fast on the next call, without touching the stream.
        assert!(conn.receive().is_err());
    }

    #[test]
    fn write_failure_poisons_and_fails_fast() {
        let written = Arc::new(std::sync::Mutex::new(Vec::new()));
        let half_closes = Arc::new(AtomicUsize::new(0));
        let stream = Box::new(ScriptedStream {
            input: io::Cursor::new(Vec::new()),
            written: written.clone(),
            half_closes: half_closes.clone(),
            fail_writes: true,
        });
        let mut conn = Connection::new(stream);

        let msg = Message {
            type_id: 12,
            payload: vec![1, 2],
        };
        assert!(conn.send(&msg).is_err());
        assert!(conn.is_poisoned());
        assert!(conn.send(&msg).is_err());
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn close_half_closes_exactly_once() {
        let (stream, _, half_closes) = ScriptedStream::boxed(Vec::new());
        let mut conn = Connection::new(stream);

        conn.close().unwrap();
        conn.close().unwrap();
        assert_eq!(half_closes.load(Ordering::SeqCst), 1);
        assert!(conn.is_closed());
        assert!(conn.send(&Message { type_id: 1, payload: vec![] }).is_err());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn failed_tls_upgrade_keeps_stream_for_cleanup() {
        // The scripted stream is not a TLS server: the handshake hits EOF.
        let (stream, _, half_closes) = ScriptedStream::boxed(Vec::new());
        let mut conn = Connection::new(stream);

        let options = TlsOptions::new().skip_verify(true);
        let err = conn.upgrade(&options, "localhost").unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
        assert!(conn.is_poisoned());
        assert!(!conn.is_secure());

        conn.close().unwrap();
        assert_eq!(half_closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn upgrade_with_buffered_cleartext_rejected() {
        // Deliver two frames but only consume one before upgrading.
        let mut input = FrameCodec::encode(2, &[]);
        input.extend_from_slice(&FrameCodec::encode(0, &[]));
        let (stream, _, _) = ScriptedStream::boxed(input);
        let mut conn = Connection::new(stream);

        // Both frames arrive in one read; the second stays buffered.
        conn.receive().unwrap();
        let err = conn
            .upgrade(&TlsOptions::new().skip_verify(true), "localhost")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError {
                kind: ProtocolErrorKind::UnexpectedMessage,
                ..
            })
        ));
    }
}
