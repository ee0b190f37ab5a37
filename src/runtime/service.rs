//! Service registry and per-port protocol selection.

use crate::context::ServerContext;
use crate::error::ServiceError;
use crate::runtime::connection::{BoxedReader, BoxedWriter, Connection};
use crate::runtime::message::Message;
use crate::runtime::protocol::Protocol;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Compile-time metadata and constructor for a protocol.
pub trait ProtocolKind: Protocol + Sized {
    const NAME: &'static str;

    /// First byte of the first message that selects this protocol.
    const PROTOCOL_ID: Option<u8>;

    /// Whether the server writes before the client does.
    const SERVER_SENDS_FIRST: bool = false;

    fn create(connection: Arc<Connection>) -> Self;
}

type Constructor = fn(Arc<Connection>) -> Arc<dyn Protocol>;

fn construct<P: ProtocolKind>(connection: Arc<Connection>) -> Arc<dyn Protocol> {
    Arc::new(P::create(connection))
}

/// A protocol factory entry.
#[derive(Clone, Copy)]
pub struct Service {
    name: &'static str,
    protocol_id: Option<u8>,
    server_sends_first: bool,
    ctor: Constructor,
}

impl Service {
    pub fn of<P: ProtocolKind>() -> Self {
        Self {
            name: P::NAME,
            protocol_id: P::PROTOCOL_ID,
            server_sends_first: P::SERVER_SENDS_FIRST,
            ctor: construct::<P>,
        }
    }

    pub fn protocol_name(&self) -> &'static str {
        self.name
    }

    pub fn protocol_id(&self) -> Option<u8> {
        self.protocol_id
    }

    /// A protocol that speaks first needs the port to itself.
    pub fn is_single_socket(&self) -> bool {
        self.server_sends_first
    }

    pub fn make_protocol(&self, connection: &Arc<Connection>) -> Arc<dyn Protocol> {
        (self.ctor)(Arc::clone(connection))
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("protocol_id", &self.protocol_id)
            .field("server_sends_first", &self.server_sends_first)
            .finish()
    }
}

/// Protocol names the server can be configured with.
#[derive(Debug, Default)]
pub struct ProtocolRegistry {
    services: HashMap<&'static str, Service>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ProtocolKind>(&mut self) -> &mut Self {
        self.services.insert(P::NAME, Service::of::<P>());
        self
    }

    pub fn get(&self, name: &str) -> Result<Service, ServiceError> {
        self.services
            .get(name)
            .copied()
            .ok_or_else(|| ServiceError::UnknownProtocol(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.services.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// One listening address and the services it hosts.
#[derive(Debug)]
pub struct ServicePort {
    addr: SocketAddr,
    services: Vec<Service>,
}

impl ServicePort {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            services: Vec::new(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Add a service, rejecting combinations that cannot be told apart.
    pub fn add_service(&mut self, service: Service) -> Result<(), ServiceError> {
        if self.is_single_socket() || (service.is_single_socket() && !self.services.is_empty())
        {
            return Err(ServiceError::SingleSocketConflict(
                service.protocol_name().to_string(),
            ));
        }

        if !self.services.is_empty() {
            if let Some(unnamed) = std::iter::once(&service)
                .chain(self.services.iter())
                .find(|s| s.protocol_id().is_none())
            {
                return Err(ServiceError::AmbiguousService(
                    unnamed.protocol_name().to_string(),
                ));
            }
        }

        if let Some(id) = service.protocol_id() {
            if let Some(existing) = self.services.iter().find(|s| s.protocol_id() == Some(id)) {
                return Err(ServiceError::DuplicateProtocolId {
                    id,
                    existing: existing.protocol_name().to_string(),
                });
            }
        }

        debug!(addr = %self.addr, service = service.protocol_name(), "Service added");
        self.services.push(service);
        Ok(())
    }

    /// True when the port's only service speaks first.
    pub fn is_single_socket(&self) -> bool {
        self.services.first().is_some_and(Service::is_single_socket)
    }

    /// Pick the service for a connection's first message.
    ///
    /// A matching id byte is consumed. A lone service without an id takes
    /// the message untouched.
    pub fn make_protocol(
        &self,
        connection: &Arc<Connection>,
        msg: &mut Message,
    ) -> Option<Arc<dyn Protocol>> {
        let service = self.select(msg)?;
        trace!(
            conn_id = connection.id(),
            service = service.protocol_name(),
            "Service selected"
        );
        Some(service.make_protocol(connection))
    }

    fn select(&self, msg: &mut Message) -> Option<Service> {
        if let [service] = self.services.as_slice() {
            if service.protocol_id().is_none() {
                return Some(*service);
            }
        }

        let id = msg.get_at(msg.read_pos()).ok()?;
        let service = self
            .services
            .iter()
            .find(|s| s.protocol_id() == Some(id))
            .copied()?;
        msg.skip_bytes(1).ok()?;
        Some(service)
    }

    /// Register and start a connection accepted on this port.
    ///
    /// Returns `None` when the connection limit is reached.
    pub fn accept(
        self: &Arc<Self>,
        context: &Arc<ServerContext>,
        reader: BoxedReader,
        writer: BoxedWriter,
        peer: Option<SocketAddr>,
    ) -> Option<Arc<Connection>> {
        let connection = context.connections().insert_with(|id| {
            Connection::new(id, Arc::clone(context), Arc::clone(self), peer)
        });
        let Some(connection) = connection else {
            warn!(addr = %self.addr, peer = ?peer, "Connection limit reached, refusing");
            return None;
        };

        let protocol = match self.services.as_slice() {
            [service] if service.is_single_socket() => Some(service.make_protocol(&connection)),
            _ => None,
        };

        debug!(conn_id = connection.id(), peer = ?peer, addr = %self.addr, "Accepted connection");
        connection.accept_connection(reader, writer, protocol);
        Some(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{echo::Echo, motd::Motd, ping::Ping};

    fn port() -> ServicePort {
        ServicePort::new("127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ProtocolRegistry::new();
        registry.register::<Echo>().register::<Ping>();
        assert_eq!(registry.get("echo").unwrap().protocol_id(), Some(0x01));
        assert_eq!(registry.names(), vec!["echo", "ping"]);
        assert!(matches!(
            registry.get("gopher"),
            Err(ServiceError::UnknownProtocol(name)) if name == "gopher"
        ));
    }

    #[test]
    fn test_speaks_first_port_is_exclusive() {
        let mut port = port();
        port.add_service(Service::of::<Motd>()).unwrap();
        assert!(port.is_single_socket());
        assert!(matches!(
            port.add_service(Service::of::<Echo>()),
            Err(ServiceError::SingleSocketConflict(_))
        ));

        let mut port = self::port();
        port.add_service(Service::of::<Echo>()).unwrap();
        assert!(!port.is_single_socket());
        assert!(matches!(
            port.add_service(Service::of::<Motd>()),
            Err(ServiceError::SingleSocketConflict(name)) if name == "motd"
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut port = port();
        port.add_service(Service::of::<Echo>()).unwrap();
        assert!(matches!(
            port.add_service(Service::of::<Echo>()),
            Err(ServiceError::DuplicateProtocolId { id: 0x01, .. })
        ));
        port.add_service(Service::of::<Ping>()).unwrap();
        assert_eq!(port.services().len(), 2);
    }

    #[test]
    fn test_select_consumes_id_byte() {
        let mut port = port();
        port.add_service(Service::of::<Echo>()).unwrap();
        port.add_service(Service::of::<Ping>()).unwrap();

        let mut msg = Message::new();
        msg.add_byte(0x02).unwrap().add_u32(9).unwrap();
        let service = port.select(&mut msg).unwrap();
        assert_eq!(service.protocol_name(), "ping");
        assert_eq!(msg.read_pos(), 1);
        assert_eq!(msg.get_u32().unwrap(), 9);
    }

    #[test]
    fn test_select_no_match_leaves_message() {
        let mut port = port();
        port.add_service(Service::of::<Echo>()).unwrap();

        let mut msg = Message::new();
        msg.add_byte(0x7f).unwrap();
        assert!(port.select(&mut msg).is_none());
        assert_eq!(msg.read_pos(), 0);

        let mut empty = Message::new();
        assert!(port.select(&mut empty).is_none());
    }

    #[test]
    fn test_lone_unnamed_service_is_fallback() {
        let mut port = port();
        port.add_service(Service::of::<Motd>()).unwrap();

        let mut msg = Message::new();
        msg.add_string("hello").unwrap();
        let service = port.select(&mut msg).unwrap();
        assert_eq!(service.protocol_name(), "motd");
        assert_eq!(msg.read_pos(), 0);
    }
}
