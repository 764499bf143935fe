//! Router / failover controller.
//!
//! Holds the priority-ordered endpoint list and remembers transient
//! unavailability across connect attempts. Acquisition failures that match
//! the transient predicate mark the endpoint and move on; anything else
//! short-circuits the traversal untouched. When the whole list is
//! exhausted, the marks are cleared so the next attempt starts again from
//! the top, and the caller sees `NoRoutersAvailable` (code 4001).

use std::time::{Duration, Instant};

use log::debug;
use mysqlx_core::endpoint::{order_by_priority, validate_endpoints};
use mysqlx_core::error::{ConnectionError, ConnectionErrorKind, Error, RouterError};
use mysqlx_core::{Endpoint, SocketFactory, Stream};

/// Endpoint selection with availability memory.
#[derive(Debug)]
pub struct Router {
    /// Candidates, highest priority first
    endpoints: Vec<Endpoint>,
    unavailable: Vec<bool>,
}

impl Router {
    /// Validate and order an endpoint list.
    pub fn new(endpoints: &[Endpoint]) -> Result<Self, Error> {
        validate_endpoints(endpoints).map_err(Error::Config)?;
        let ordered = order_by_priority(endpoints);
        let count = ordered.len();
        Ok(Self {
            endpoints: ordered,
            unavailable: vec![false; count],
        })
    }

    /// Candidates in traversal order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// The highest-priority candidate.
    pub fn first(&self) -> &Endpoint {
        &self.endpoints[0]
    }

    /// Acquire a stream from the best available endpoint.
    ///
    /// `total_timeout` spans the whole traversal; each attempt gets the
    /// remaining budget.
    pub fn connect(
        &mut self,
        factory: &dyn SocketFactory,
        total_timeout: Duration,
    ) -> Result<(Box<dyn Stream>, Endpoint), Error> {
        let deadline = Instant::now() + total_timeout;

        for index in 0..self.endpoints.len() {
            if self.unavailable[index] {
                continue;
            }
            let endpoint = self.endpoints[index].clone();

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Timeout,
                    message: format!(
                        "connect deadline of {:?} exceeded before reaching {}",
                        total_timeout,
                        endpoint.address()
                    ),
                    source: None,
                }));
            }

            match factory.connect(&endpoint, remaining) {
                Ok(stream) => {
                    debug!("acquired stream to {}", endpoint.address());
                    return Ok((stream, endpoint));
                }
                Err(err) if err.is_transient() => {
                    debug!("marking {} unavailable: {}", endpoint.address(), err);
                    self.unavailable[index] = true;
                }
                Err(err) => return Err(err),
            }
        }

        // Give the full list another chance on the next attempt.
        self.unavailable.fill(false);
        Err(Error::Router(RouterError::all_routers_failed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::Mutex;

    struct NullStream;

    impl Read for NullStream {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for NullStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Stream for NullStream {
        fn half_close(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    enum Outcome {
        Accept,
        Transient(ConnectionErrorKind),
        Hard,
    }

    struct ScriptedFactory {
        outcomes: Vec<(&'static str, Outcome)>,
        attempts: Mutex<Vec<String>>,
    }

    impl ScriptedFactory {
        fn new(outcomes: Vec<(&'static str, Outcome)>) -> Self {
            Self {
                outcomes,
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl SocketFactory for ScriptedFactory {
        fn connect(
            &self,
            endpoint: &Endpoint,
            _timeout: Duration,
        ) -> Result<Box<dyn Stream>, Error> {
            self.attempts.lock().unwrap().push(endpoint.host.clone());
            let outcome = self
                .outcomes
                .iter()
                .find(|(host, _)| *host == endpoint.host)
                .map(|(_, outcome)| outcome)
                .expect("unexpected endpoint");
            match outcome {
                Outcome::Accept => Ok(Box::new(NullStream)),
                Outcome::Transient(kind) => Err(Error::Connection(ConnectionError {
                    kind: *kind,
                    message: format!("cannot reach {}", endpoint.host),
                    source: None,
                })),
                Outcome::Hard => Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Connect,
                    message: format!("hard failure on {}", endpoint.host),
                    source: None,
                })),
            }
        }
    }

    fn timeout() -> Duration {
        Duration::from_secs(5)
    }

    #[test]
    fn skips_transient_failures_and_remembers_them() {
        let factory = ScriptedFactory::new(vec![
            ("foo", Outcome::Transient(ConnectionErrorKind::DnsResolution)),
            ("bar", Outcome::Accept),
        ]);
        let mut router =
            Router::new(&[Endpoint::new("foo", 1), Endpoint::new("bar", 2)]).unwrap();

        let (_, endpoint) = router.connect(&factory, timeout()).unwrap();
        assert_eq!(endpoint.host, "bar");
        assert_eq!(factory.attempts(), ["foo", "bar"]);

        // foo stays marked: the next connect goes straight to bar.
        let (_, endpoint) = router.connect(&factory, timeout()).unwrap();
        assert_eq!(endpoint.host, "bar");
        assert_eq!(factory.attempts(), ["foo", "bar", "bar"]);
    }

    #[test]
    fn exhaustion_reports_4001_and_clears_marks() {
        let factory = ScriptedFactory::new(vec![
            ("foo", Outcome::Transient(ConnectionErrorKind::Refused)),
            ("bar", Outcome::Transient(ConnectionErrorKind::Refused)),
        ]);
        let mut router =
            Router::new(&[Endpoint::new("foo", 1), Endpoint::new("bar", 2)]).unwrap();

        let err = router.connect(&factory, timeout()).unwrap_err();
        assert_eq!(err.errno(), Some(4001));
        assert_eq!(err.to_string(), "All routers failed.");

        // Marks were cleared: the retry starts again from the top.
        let err = router.connect(&factory, timeout()).unwrap_err();
        assert_eq!(err.errno(), Some(4001));
        assert_eq!(factory.attempts(), ["foo", "bar", "foo", "bar"]);
    }

    #[test]
    fn non_transient_errors_short_circuit() {
        let factory = ScriptedFactory::new(vec![
            ("foo", Outcome::Hard),
            ("bar", Outcome::Accept),
        ]);
        let mut router =
            Router::new(&[Endpoint::new("foo", 1), Endpoint::new("bar", 2)]).unwrap();

        let err = router.connect(&factory, timeout()).unwrap_err();
        assert!(err.to_string().contains("hard failure on foo"));
        assert_eq!(factory.attempts(), ["foo"]);

        // No availability state was mutated: foo is attempted again.
        let _ = router.connect(&factory, timeout());
        assert_eq!(factory.attempts(), ["foo", "foo"]);
    }

    #[test]
    fn priorities_decide_traversal_order() {
        let factory = ScriptedFactory::new(vec![
            ("low", Outcome::Transient(ConnectionErrorKind::Refused)),
            ("high", Outcome::Transient(ConnectionErrorKind::Refused)),
        ]);
        let mut router = Router::new(&[
            Endpoint::new("low", 1).priority(10),
            Endpoint::new("high", 2).priority(90),
        ])
        .unwrap();

        let _ = router.connect(&factory, timeout());
        assert_eq!(factory.attempts(), ["high", "low"]);
    }

    #[test]
    fn invalid_endpoint_lists_are_rejected() {
        let err = Router::new(&[Endpoint::new("foo", 0)]).unwrap_err();
        assert_eq!(err.to_string(), "Port must be between 0 and 65536");

        let err = Router::new(&[
            Endpoint::new("foo", 1).priority(5),
            Endpoint::new("bar", 2),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("no priority to any of the routers"));

        let err = Router::new(&[Endpoint::new("foo", 1).priority(101)]).unwrap_err();
        assert_eq!(err.to_string(), "The priorities must be between 0 and 100");
    }

    #[test]
    fn zero_deadline_fails_with_timeout() {
        let factory = ScriptedFactory::new(vec![("foo", Outcome::Accept)]);
        let mut router = Router::new(&[Endpoint::new("foo", 1)]).unwrap();

        let err = router.connect(&factory, Duration::ZERO).unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Timeout,
                ..
            })
        ));
        assert!(factory.attempts().is_empty());
    }
}
