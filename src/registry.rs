use std::{fmt, sync::Arc};

use parking_lot::RwLock;

use crate::{
    message::{Base, Command, NetCommand, NetQuery, Query},
    table::Table,
};

/// Receives queries addressed to the service's ID. A query expects a
/// response; handlers answer through `respond`.
pub trait QueryHandler: Send + Sync {
    fn handle_query(&self, query: Query);
}

/// Receives commands addressed to the service's ID. Fire and forget.
pub trait CommandHandler: Send + Sync {
    fn handle_command(&self, command: Command);
}

/// As `QueryHandler`, for queries that arrived through the overlay ingress.
pub trait NetQueryHandler: Send + Sync {
    fn handle_net_query(&self, query: NetQuery);
}

/// As `CommandHandler`, for commands that arrived through the overlay
/// ingress.
pub trait NetCommandHandler: Send + Sync {
    fn handle_net_command(&self, command: NetCommand);
}

/// The process-wide egress hook. The router hands it every message flagged
/// to-net, with the flag already cleared. What happens after the handoff
/// (re-encoding, encryption, overlay addressing) is the sender's business.
pub trait NetSender: Send + Sync {
    fn outgoing(&self, message: Base);

    /// The ipc port that messages bound for the net should be addressed to,
    /// when the sender knows it. Recorded at registration and used by
    /// `send_to_net`.
    fn port(&self) -> Option<u16> {
        None
    }
}

/// A registrable service.
///
/// A service exposes one or more roles by overriding the capability
/// accessors; every role defaults to "not implemented" and the usual
/// override is `Some(self)`. The registry probes all five accessors at
/// registration time.
pub trait Service: Send + Sync + 'static {
    fn service_id(&self) -> u32;

    fn query_handler(self: Arc<Self>) -> Option<Arc<dyn QueryHandler>> {
        None
    }

    fn command_handler(self: Arc<Self>) -> Option<Arc<dyn CommandHandler>> {
        None
    }

    fn net_query_handler(self: Arc<Self>) -> Option<Arc<dyn NetQueryHandler>> {
        None
    }

    fn net_command_handler(self: Arc<Self>) -> Option<Arc<dyn NetCommandHandler>> {
        None
    }

    fn net_sender(self: Arc<Self>) -> Option<Arc<dyn NetSender>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    QueryServiceTaken(u32),
    CommandServiceTaken(u32),
    NetQueryServiceTaken(u32),
    NetCommandServiceTaken(u32),
    NothingRegistered,
}

impl std::error::Error for RegisterError {}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone)]
struct NetSenderRecord {
    handler: Arc<dyn NetSender>,
    port: Option<u16>,
}

/// Role registries plus the singleton net-sender slot.
///
/// The net sender is written only during registration and read concurrently
/// from the dispatcher, so it lives behind its own lock and readers clone
/// the handle out.
#[derive(Default)]
pub(crate) struct Registry {
    pub queries: Table<Arc<dyn QueryHandler>>,
    pub commands: Table<Arc<dyn CommandHandler>>,
    pub net_queries: Table<Arc<dyn NetQueryHandler>>,
    pub net_commands: Table<Arc<dyn NetCommandHandler>>,
    net_sender: RwLock<Option<NetSenderRecord>>,
}

impl Registry {
    /// Install every role the service implements.
    ///
    /// Roles are checked in a fixed order: net sender, query, command,
    /// net-query, net-command. A net sender replaces any previous one; the
    /// per-ID roles install only into free slots and the first taken slot
    /// aborts the call with the matching error. Roles installed before the
    /// failure stay installed.
    pub fn register(&self, service: Arc<dyn Service>) -> Result<(), RegisterError> {
        let id = service.service_id();
        let mut installed = false;

        if let Some(handler) = service.clone().net_sender() {
            let port = handler.port();
            *self.net_sender.write() = Some(NetSenderRecord { handler, port });
            installed = true;
        }

        if let Some(handler) = service.clone().query_handler() {
            if !self.queries.try_set(id, handler) {
                return Err(RegisterError::QueryServiceTaken(id));
            }

            installed = true;
        }

        if let Some(handler) = service.clone().command_handler() {
            if !self.commands.try_set(id, handler) {
                return Err(RegisterError::CommandServiceTaken(id));
            }

            installed = true;
        }

        if let Some(handler) = service.clone().net_query_handler() {
            if !self.net_queries.try_set(id, handler) {
                return Err(RegisterError::NetQueryServiceTaken(id));
            }

            installed = true;
        }

        if let Some(handler) = service.net_command_handler() {
            if !self.net_commands.try_set(id, handler) {
                return Err(RegisterError::NetCommandServiceTaken(id));
            }

            installed = true;
        }

        if installed {
            Ok(())
        } else {
            Err(RegisterError::NothingRegistered)
        }
    }

    pub fn net_sender(&self) -> Option<Arc<dyn NetSender>> {
        self.net_sender
            .read()
            .as_ref()
            .map(|record| record.handler.clone())
    }

    pub fn net_sender_port(&self) -> Option<u16> {
        self.net_sender.read().as_ref().and_then(|record| record.port)
    }
}
