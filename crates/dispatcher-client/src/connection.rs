//! Connection state and endpoint resolution.

use std::fmt;

use url::Url;

use dispatcher_core::constants::{DEFAULT_PORT, SOCKET_PATH};
use dispatcher_core::{ClientError, Result};

/// Lifecycle of the client's transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport being established.
    Connecting,
    /// Transport up; frames can be sent.
    Connected,
}

impl ConnectionState {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a user-supplied endpoint into a socket URL.
///
/// Accepts a bare host (`nas.local`, `10.0.0.2:6000`) or a URL. `http` and
/// `https` map to `ws` and `wss`. A missing port becomes 5000 and an empty
/// path becomes `/socket`. Credentials embedded in the URL are rejected;
/// use `login` instead.
pub fn resolve_endpoint(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(invalid(input, "empty endpoint"));
    }

    let with_scheme = if input.contains("://") {
        input.to_owned()
    } else {
        format!("ws://{input}")
    };
    let parsed = Url::parse(&with_scheme).map_err(|e| invalid(input, &e.to_string()))?;

    let scheme = match parsed.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(invalid(input, &format!("unsupported scheme {other}"))),
    };
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid(input, "credentials are not accepted in the URL"));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| invalid(input, "missing host"))?;
    let port = parsed.port().unwrap_or(DEFAULT_PORT);
    let path = match parsed.path() {
        "" | "/" => SOCKET_PATH,
        path => path,
    };

    Ok(format!("{scheme}://{host}:{port}{path}"))
}

fn invalid(input: &str, reason: &str) -> ClientError {
    ClientError::Other {
        message: format!("invalid endpoint {input:?}: {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn bare_host_gets_defaults() {
        assert_eq!(resolve_endpoint("nas.local").unwrap(), "ws://nas.local:5000/socket");
    }

    #[test]
    fn host_with_port() {
        assert_eq!(resolve_endpoint("10.0.0.2:6000").unwrap(), "ws://10.0.0.2:6000/socket");
    }

    #[test]
    fn http_maps_to_ws() {
        assert_eq!(
            resolve_endpoint("http://nas.local/").unwrap(),
            "ws://nas.local:5000/socket"
        );
        assert_eq!(
            resolve_endpoint("https://nas.local:8443").unwrap(),
            "wss://nas.local:8443/socket"
        );
    }

    #[test]
    fn explicit_path_kept() {
        assert_eq!(
            resolve_endpoint("ws://127.0.0.1:5001/custom").unwrap(),
            "ws://127.0.0.1:5001/custom"
        );
    }

    #[test]
    fn credentials_rejected() {
        let err = resolve_endpoint("ws://root@nas.local").unwrap_err();
        assert_matches!(err, ClientError::Other { message } if message.contains("credentials"));
    }

    #[test]
    fn unknown_scheme_rejected() {
        assert!(resolve_endpoint("ftp://nas.local").is_err());
    }

    #[test]
    fn empty_rejected() {
        assert!(resolve_endpoint("  ").is_err());
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
