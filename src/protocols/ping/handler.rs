//! Ping protocol handler.

use super::parser::{self, Command, ParseResult};
use crate::runtime::{Connection, Message, Protocol, ProtocolBase, ProtocolKind};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-connection ping bookkeeping, kept in the user context.
#[derive(Debug, Default)]
pub struct PingSession {
    pub pings: u64,
    pub last_seq: Option<u32>,
}

pub struct Ping {
    base: ProtocolBase,
}

impl ProtocolKind for Ping {
    const NAME: &'static str = "ping";
    const PROTOCOL_ID: Option<u8> = Some(0x02);

    fn create(connection: Arc<Connection>) -> Self {
        let base = ProtocolBase::new(&connection);
        base.set_user_context(PingSession::default());
        Self { base }
    }
}

impl Protocol for Ping {
    fn base(&self) -> &ProtocolBase {
        &self.base
    }

    fn on_recv_first_message(&self, msg: &mut Message) {
        self.parse_packet(msg);
    }

    fn parse_packet(&self, msg: &mut Message) {
        let (commands, failure) = parser::parse_all(msg);
        match &failure {
            Some(ParseResult::UnknownOpcode(opcode)) => {
                debug!(opcode = *opcode, "Unknown ping opcode");
            }
            Some(_) => debug!("Truncated ping command"),
            None => {}
        }
        let fault = failure.is_some();

        self.base
            .dispatch(move |protocol| execute(protocol.base(), commands, fault));
    }
}

fn execute(base: &ProtocolBase, commands: Vec<Command>, fault: bool) {
    for command in commands {
        match command {
            Command::Ping { seq } => {
                base.with_user_context(|session: Option<&mut PingSession>| {
                    if let Some(session) = session {
                        session.pings += 1;
                        session.last_seq = Some(seq);
                    }
                });
                let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
                if let Err(e) = base.with_output_buffer(|msg| parser::write_pong(msg, seq, millis))
                {
                    warn!(error = %e, seq, "Pong dropped");
                }
            }
            Command::Quit => {
                base.disconnect_after_flush();
                return;
            }
        }
    }

    if fault {
        base.disconnect_after_flush();
    }
}
