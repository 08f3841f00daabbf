//! Channel transport over a rendezvous socket.
//!
//! Abstracts a byte-stream connection that can be dialed from either side
//! of a socket-path-plus-port rendezvous point, plus the long-lived echo
//! workers used to exercise it.

mod channel;
mod echo_server;
mod endpoint;

pub use channel::{Channel, ChannelError};
pub use echo_server::{spawn_echo_dialer, EchoServer};
pub use endpoint::{Direction, Endpoint, DEFAULT_UDS_NAME, ECHO_SERVER_PORT};
