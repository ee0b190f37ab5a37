//! Echo protocol handler.

use crate::runtime::{Connection, Message, Protocol, ProtocolBase, ProtocolKind};
use std::sync::Arc;
use tracing::{trace, warn};

pub struct Echo {
    base: ProtocolBase,
}

impl ProtocolKind for Echo {
    const NAME: &'static str = "echo";
    const PROTOCOL_ID: Option<u8> = Some(0x01);

    fn create(connection: Arc<Connection>) -> Self {
        Self {
            base: ProtocolBase::new(&connection),
        }
    }
}

impl Protocol for Echo {
    fn base(&self) -> &ProtocolBase {
        &self.base
    }

    fn on_recv_first_message(&self, msg: &mut Message) {
        self.parse_packet(msg);
    }

    fn parse_packet(&self, msg: &mut Message) {
        let data = msg.get_raw().to_vec();
        if data.is_empty() {
            return;
        }
        trace!(len = data.len(), "Echoing");

        self.base.dispatch(move |protocol| {
            if let Err(e) = protocol.base().write_bytes(&data) {
                warn!(error = %e, "Echo reply dropped");
            }
        });
    }
}
