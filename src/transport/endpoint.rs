use crate::error::{AppResult, DaoError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A `tcp://host:port` address. A host of `*` binds every interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `tcp://*:<port>`
    pub fn wildcard(port: u16) -> Self {
        Self::new("*", port)
    }

    /// `tcp://127.0.0.1:<port>`
    pub fn local(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    /// Host part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the host is `*` or `0.0.0.0`.
    pub fn is_wildcard(&self) -> bool {
        self.host == "*"
    }

    /// Address handed to `bind`.
    pub fn bind_addr(&self) -> String {
        if self.is_wildcard() {
            format!("0.0.0.0:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Address handed to `connect`. A wildcard host connects to loopback.
    pub fn connect_addr(&self) -> String {
        if self.is_wildcard() {
            format!("127.0.0.1:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = DaoError;

    fn from_str(s: &str) -> AppResult<Self> {
        let invalid = || DaoError::Endpoint(s.to_string());
        let rest = s.strip_prefix("tcp://").ok_or_else(invalid)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wildcard_and_host() {
        let ep: Endpoint = "tcp://*:5558".parse().unwrap();
        assert!(ep.is_wildcard());
        assert_eq!(ep.bind_addr(), "0.0.0.0:5558");
        assert_eq!(ep.connect_addr(), "127.0.0.1:5558");
        assert_eq!(ep.to_string(), "tcp://*:5558");

        let ep: Endpoint = "tcp://rtc01.local:9000".parse().unwrap();
        assert_eq!(ep.host(), "rtc01.local");
        assert_eq!(ep.port(), 9000);
    }

    #[test]
    fn rejects_malformed() {
        for raw in ["5558", "udp://*:5558", "tcp://*", "tcp://:80", "tcp://*:99999"] {
            assert!(raw.parse::<Endpoint>().is_err(), "{raw} should not parse");
        }
    }
}
