//! Connection identity and traffic direction.
//!
//! A [`ConnectionKey`] names one TCP connection by its client and server
//! endpoints. The orientation is fixed when the connection is first seen so
//! that every later segment can be attributed to a [`Direction`].

use std::{fmt, net::SocketAddr};

use serde::Serialize;

/// Direction of traffic within a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Bytes sent by the client (requests).
    ClientToServer,
    /// Bytes sent by the server (responses).
    ServerToClient,
}

impl Direction {
    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::ClientToServer => "client_to_server",
            Direction::ServerToClient => "server_to_client",
        }
    }

    /// The opposite direction.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Direction::ClientToServer => Direction::ServerToClient,
            Direction::ServerToClient => Direction::ClientToServer,
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Direction::ClientToServer => 0,
            Direction::ServerToClient => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Identity of a TCP connection carrying HTTP/2.
///
/// ```
/// use std::net::SocketAddr;
///
/// use grpcdump::endpoint::{ConnectionKey, Direction};
///
/// let client: SocketAddr = "10.0.0.1:50000".parse().expect("addr");
/// let server: SocketAddr = "10.0.0.2:2379".parse().expect("addr");
/// let key = ConnectionKey::new(client, server);
/// assert_eq!(key.direction_of(client, server), Some(Direction::ClientToServer));
/// assert_eq!(key.direction_of(server, client), Some(Direction::ServerToClient));
/// assert_eq!(key.to_string(), "10.0.0.1:50000->10.0.0.2:2379");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionKey {
    client: SocketAddr,
    server: SocketAddr,
}

impl ConnectionKey {
    /// Create a key from the client and server endpoints.
    #[must_use]
    pub const fn new(client: SocketAddr, server: SocketAddr) -> Self { Self { client, server } }

    /// Endpoint that initiated the connection.
    #[must_use]
    pub const fn client(&self) -> SocketAddr { self.client }

    /// Endpoint serving the gRPC service.
    #[must_use]
    pub const fn server(&self) -> SocketAddr { self.server }

    /// Direction of a segment travelling from `src` to `dst`, if it belongs
    /// to this connection.
    #[must_use]
    pub fn direction_of(&self, src: SocketAddr, dst: SocketAddr) -> Option<Direction> {
        if src == self.client && dst == self.server {
            Some(Direction::ClientToServer)
        } else if src == self.server && dst == self.client {
            Some(Direction::ServerToClient)
        } else {
            None
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.client, self.server)
    }
}
