//! Protocol implementations.
//!
//! - `echo`: replies with each message's body (id `0x01`)
//! - `ping`: binary ping/pong with server time (id `0x02`)
//! - `motd`: greets on connect, speaks first and needs its own port

pub mod echo;
pub mod motd;
pub mod ping;

use crate::runtime::ProtocolRegistry;

/// Registry of every protocol built into the server.
pub fn builtin_registry() -> ProtocolRegistry {
    let mut registry = ProtocolRegistry::new();
    registry
        .register::<echo::Echo>()
        .register::<ping::Ping>()
        .register::<motd::Motd>();
    registry
}
