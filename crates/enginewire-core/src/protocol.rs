use std::{fmt, str::FromStr};

/// The kind of transport a session is using.
///
/// The discriminants are bit flags so a set of enabled transports fits in a `u8`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Http long-polling
    Polling = 0x01,
    /// Websocket
    Websocket = 0x02,
    /// Length-prefixed frames over a bidirectional stream (webtransport)
    WebTransport = 0x04,
}

impl TransportType {
    /// All the transports, sorted from the least to the most capable.
    pub const ALL: [TransportType; 3] = [
        TransportType::Polling,
        TransportType::Websocket,
        TransportType::WebTransport,
    ];

    /// The transport name as it appears in the `transport` query param.
    pub const fn as_str(self) -> &'static str {
        match self {
            TransportType::Polling => "polling",
            TransportType::Websocket => "websocket",
            TransportType::WebTransport => "webtransport",
        }
    }

    /// The transports a session currently on `self` may upgrade to,
    /// filtered by the `enabled` bit set.
    ///
    /// Only polling sessions can upgrade.
    pub fn upgrades(self, enabled: u8) -> Vec<String> {
        match self {
            TransportType::Polling => [TransportType::Websocket, TransportType::WebTransport]
                .into_iter()
                .filter(|t| enabled & *t as u8 != 0)
                .map(|t| t.as_str().to_string())
                .collect(),
            TransportType::Websocket | TransportType::WebTransport => Vec::new(),
        }
    }
}

/// The `transport` query param does not name a known transport.
#[derive(Debug, Copy, Clone, thiserror::Error)]
#[error("unknown transport type")]
pub struct UnknownTransportError;

impl FromStr for TransportType {
    type Err = UnknownTransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "polling" => Ok(TransportType::Polling),
            "websocket" => Ok(TransportType::Websocket),
            "webtransport" => Ok(TransportType::WebTransport),
            _ => Err(UnknownTransportError),
        }
    }
}
impl TryFrom<u8> for TransportType {
    type Error = UnknownTransportError;
    fn try_from(t: u8) -> Result<Self, Self::Error> {
        match t {
            0x01 => Ok(TransportType::Polling),
            0x02 => Ok(TransportType::Websocket),
            0x04 => Ok(TransportType::WebTransport),
            _ => Err(UnknownTransportError),
        }
    }
}
impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `EIO` query param is missing or not a supported version.
#[derive(Debug, Copy, Clone, thiserror::Error)]
#[error("unknown protocol version")]
pub struct UnknownProtocolVersionError;

/// The transport protocol revision negotiated with the client.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    /// Revision 3: length-prefixed payloads, client initiated heartbeat.
    V3 = 3,
    /// Revision 4: record-separated payloads, server initiated heartbeat.
    V4 = 4,
}

impl FromStr for ProtocolVersion {
    type Err = UnknownProtocolVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "3" => Ok(ProtocolVersion::V3),
            "4" => Ok(ProtocolVersion::V4),
            _ => Err(UnknownProtocolVersionError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_upgrades_follow_enabled_transports() {
        let all = 0x07;
        assert_eq!(
            TransportType::Polling.upgrades(all),
            vec!["websocket", "webtransport"]
        );
        assert_eq!(
            TransportType::Polling.upgrades(TransportType::Polling as u8 | TransportType::WebTransport as u8),
            vec!["webtransport"]
        );
        assert!(TransportType::Websocket.upgrades(all).is_empty());
        assert!(TransportType::WebTransport.upgrades(all).is_empty());
    }

    #[test]
    fn parse_query_values() {
        assert_eq!("webtransport".parse::<TransportType>().unwrap(), TransportType::WebTransport);
        assert!("flash".parse::<TransportType>().is_err());
        assert_eq!("3".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V3);
        assert!("5".parse::<ProtocolVersion>().is_err());
    }
}
