//! Message-of-the-day protocol.
//!
//! The server speaks first, so a port hosting `motd` hosts nothing else.
//! Every frame body is a u16-prefixed UTF-8 string.
//!
//! ```text
//! On connect:  "Welcome to <server>. Server time is <RFC 3339 UTC>."
//! Request:     <any text>
//! Response:    "message <n>"        n counts this session's messages
//! Request:     "quit"
//! Response:    "goodbye", then the connection closes
//! ```

pub mod handler;

pub use handler::Motd;
