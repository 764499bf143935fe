//! Server endpoints and endpoint-list validation.
//!
//! A session is configured with an ordered list of candidate endpoints. The
//! list is either fully prioritized (every endpoint carries an explicit
//! priority in `0..=100`, higher wins) or fully unprioritized (list order
//! decides, first is highest); mixing the two is rejected.

use crate::error::ConfigError;

/// Default port served by the X Plugin.
pub const DEFAULT_PORT: u16 = 33060;

/// One candidate server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Hostname or IP address
    pub host: String,
    /// TCP port (1..=65535)
    pub port: u16,
    /// Unix socket path, used instead of TCP when set
    pub socket_path: Option<String>,
    /// Explicit priority (0..=100, higher is preferred); `None` means the
    /// list position decides
    pub priority: Option<u8>,
}

impl Endpoint {
    /// Create a TCP endpoint with implicit (list-order) priority.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            socket_path: None,
            priority: None,
        }
    }

    /// Create an endpoint for the default X Plugin port.
    pub fn localhost() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }

    /// Set an explicit priority.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Use a unix socket path instead of TCP.
    pub fn socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    /// `host:port` form for diagnostics.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Validate an endpoint list against the construction-time rules.
///
/// Rules:
/// - the list must not be empty
/// - every port is in `1..=65535` (ports above 65535 are unrepresentable in
///   the type, so only 0 can be observed here)
/// - priorities are all explicit or all implicit
/// - explicit priorities are in `0..=100`
pub fn validate_endpoints(endpoints: &[Endpoint]) -> Result<(), ConfigError> {
    if endpoints.is_empty() {
        return Err(ConfigError {
            message: "At least one router endpoint is required".to_string(),
        });
    }

    for endpoint in endpoints {
        if endpoint.port == 0 {
            return Err(ConfigError {
                message: "Port must be between 0 and 65536".to_string(),
            });
        }
    }

    let with_priority = endpoints.iter().filter(|e| e.priority.is_some()).count();
    if with_priority != 0 && with_priority != endpoints.len() {
        return Err(ConfigError {
            message: "You must either assign no priority to any of the routers or give \
                      a priority for every router"
                .to_string(),
        });
    }

    for endpoint in endpoints {
        if let Some(priority) = endpoint.priority {
            if priority > 100 {
                return Err(ConfigError {
                    message: "The priorities must be between 0 and 100".to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Order endpoints by descending priority, preserving list order for ties
/// and for fully implicit lists.
pub fn order_by_priority(endpoints: &[Endpoint]) -> Vec<Endpoint> {
    let mut ordered: Vec<Endpoint> = endpoints.to_vec();
    // Stable sort keeps list order as the tie breaker.
    ordered.sort_by(|a, b| b.priority.unwrap_or(0).cmp(&a.priority.unwrap_or(0)));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_builder() {
        let endpoint = Endpoint::new("db.example.com", 33061).priority(90);
        assert_eq!(endpoint.host, "db.example.com");
        assert_eq!(endpoint.port, 33061);
        assert_eq!(endpoint.priority, Some(90));
        assert_eq!(endpoint.address(), "db.example.com:33061");
    }

    #[test]
    fn rejects_port_zero() {
        let err = validate_endpoints(&[Endpoint::new("foo", 0)]).unwrap_err();
        assert_eq!(err.message, "Port must be between 0 and 65536");
    }

    #[test]
    fn rejects_mixed_priorities() {
        let endpoints = [
            Endpoint::new("foo", 33060).priority(50),
            Endpoint::new("bar", 33060),
        ];
        let err = validate_endpoints(&endpoints).unwrap_err();
        assert_eq!(
            err.message,
            "You must either assign no priority to any of the routers or give \
             a priority for every router"
        );
    }

    #[test]
    fn rejects_priority_above_100() {
        let endpoints = [
            Endpoint::new("foo", 33060).priority(101),
            Endpoint::new("bar", 33060).priority(10),
        ];
        let err = validate_endpoints(&endpoints).unwrap_err();
        assert_eq!(err.message, "The priorities must be between 0 and 100");
    }

    #[test]
    fn accepts_all_implicit_and_all_explicit() {
        let implicit = [Endpoint::new("foo", 33060), Endpoint::new("bar", 33060)];
        assert!(validate_endpoints(&implicit).is_ok());

        let explicit = [
            Endpoint::new("foo", 33060).priority(0),
            Endpoint::new("bar", 33060).priority(100),
        ];
        assert!(validate_endpoints(&explicit).is_ok());
    }

    #[test]
    fn rejects_empty_list() {
        assert!(validate_endpoints(&[]).is_err());
    }

    #[test]
    fn ordering_is_priority_descending_with_stable_ties() {
        let endpoints = [
            Endpoint::new("low", 1).priority(10),
            Endpoint::new("high", 2).priority(90),
            Endpoint::new("mid-a", 3).priority(50),
            Endpoint::new("mid-b", 4).priority(50),
        ];
        let ordered = order_by_priority(&endpoints);
        let hosts: Vec<&str> = ordered.iter().map(|e| e.host.as_str()).collect();
        assert_eq!(hosts, ["high", "mid-a", "mid-b", "low"]);
    }

    #[test]
    fn implicit_ordering_is_list_order() {
        let endpoints = [
            Endpoint::new("first", 1),
            Endpoint::new("second", 2),
            Endpoint::new("third", 3),
        ];
        let ordered = order_by_priority(&endpoints);
        let hosts: Vec<&str> = ordered.iter().map(|e| e.host.as_str()).collect();
        assert_eq!(hosts, ["first", "second", "third"]);
    }
}
