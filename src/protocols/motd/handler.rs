//! Message-of-the-day handler.

use crate::runtime::{Connection, Message, Protocol, ProtocolBase, ProtocolKind};
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Motd {
    base: ProtocolBase,
}

/// Messages seen on this connection. Only touched on the dispatcher.
#[derive(Debug, Default)]
struct Counter(u64);

impl ProtocolKind for Motd {
    const NAME: &'static str = "motd";
    const PROTOCOL_ID: Option<u8> = None;
    const SERVER_SENDS_FIRST: bool = true;

    fn create(connection: Arc<Connection>) -> Self {
        let base = ProtocolBase::new(&connection);
        base.set_user_context(Counter::default());
        Self { base }
    }
}

pub(crate) fn greeting(server_name: &str) -> String {
    format!(
        "Welcome to {server_name}. Server time is {}.",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

impl Protocol for Motd {
    fn base(&self) -> &ProtocolBase {
        &self.base
    }

    fn on_connect(&self) {
        self.base.dispatch(|protocol| {
            let base = protocol.base();
            let text = greeting(&base.context().settings().server_name);
            if let Err(e) = base.write_string(&text) {
                warn!(error = %e, "Greeting dropped");
            }
        });
    }

    fn on_recv_first_message(&self, msg: &mut Message) {
        self.parse_packet(msg);
    }

    fn parse_packet(&self, msg: &mut Message) {
        let text = match msg.get_string() {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "Malformed motd message");
                self.base.disconnect();
                return;
            }
        };

        self.base.dispatch(move |protocol| {
            let base = protocol.base();
            if text.trim().eq_ignore_ascii_case("quit") {
                if let Err(e) = base.write_string("goodbye") {
                    warn!(error = %e, "Goodbye dropped");
                }
                base.disconnect_after_flush();
                return;
            }

            let count = base.with_user_context(|counter: Option<&mut Counter>| {
                counter.map_or(0, |counter| {
                    counter.0 += 1;
                    counter.0
                })
            });
            if let Err(e) = base.write_string(&format!("message {count}")) {
                warn!(error = %e, "Reply dropped");
            }
        });
    }
}
