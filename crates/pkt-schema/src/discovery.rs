//! LAN discovery datagrams.
//!
//! A client broadcasts `Q:<filename>`; any peer holding the artifact in its
//! cache answers `H:<filename>:<http-port>`. Plaintext and unauthenticated:
//! whatever a peer serves is verified like any other download.

/// UDP port used by discovery queries and replies.
pub const DISCOVERY_PORT: u16 = 1333;

/// One discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    /// "Who has this file?"
    Query {
        /// Artifact filename.
        filename: String,
    },
    /// "I have it, fetch it over HTTP on this port."
    Have {
        /// Artifact filename.
        filename: String,
        /// Port of the peer's static file server.
        port: u16,
    },
}

impl DiscoveryMessage {
    /// Wire form of the message.
    pub fn encode(&self) -> String {
        match self {
            Self::Query { filename } => format!("Q:{filename}"),
            Self::Have { filename, port } => format!("H:{filename}:{port}"),
        }
    }

    /// Parse a datagram. Anything malformed yields `None`.
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(datagram).ok()?.trim_end();

        if let Some(filename) = text.strip_prefix("Q:") {
            return valid_filename(filename).then(|| Self::Query {
                filename: filename.to_string(),
            });
        }

        let rest = text.strip_prefix("H:")?;
        let (filename, port) = rest.rsplit_once(':')?;
        let port = port.parse().ok()?;
        valid_filename(filename).then(|| Self::Have {
            filename: filename.to_string(),
            port,
        })
    }
}

fn valid_filename(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && name != "." && name != ".."
}
