use std::sync::{
    Arc, Once,
    atomic::{AtomicU16, Ordering},
};

use ipc_router::{
    Command, CommandHandler, NetCommand, NetCommandHandler, NetQuery, NetQueryHandler, Query,
    QueryHandler, RegisterError, Router, Service,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

static LOGGER: Once = Once::new();
static NEXT_PORT: AtomicU16 = AtomicU16::new(41000);

/// Quiet the router's chatter. Dispatch misses are part of several tests and
/// would otherwise flood the output.
pub fn quiet_logs() {
    LOGGER.call_once(|| {
        let _ = simple_logger::init_with_level(log::Level::Warn);
    });
}

/// Tests share one loopback port incrementer so routers never collide.
pub fn next_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// Service mock exposing every per-ID role; each dispatched view is
/// forwarded into its own channel for the test body to assert on.
pub struct MockService {
    id: u32,
    query: UnboundedSender<Query>,
    command: UnboundedSender<Command>,
    net_query: UnboundedSender<NetQuery>,
    net_command: UnboundedSender<NetCommand>,
}

pub struct MockChannels {
    pub query: UnboundedReceiver<Query>,
    pub command: UnboundedReceiver<Command>,
    pub net_query: UnboundedReceiver<NetQuery>,
    pub net_command: UnboundedReceiver<NetCommand>,
}

impl MockService {
    /// A mock registered on a fresh router.
    pub async fn create(id: u32) -> anyhow::Result<(Router, MockChannels)> {
        let router = Router::new(next_port()).await?;
        let channels = Self::with_router(id, &router)?;

        Ok((router, channels))
    }

    /// A mock registered on an existing router, for same-port scenarios.
    pub fn with_router(id: u32, router: &Router) -> Result<MockChannels, RegisterError> {
        let (query_tx, query_rx) = unbounded_channel();
        let (command_tx, command_rx) = unbounded_channel();
        let (net_query_tx, net_query_rx) = unbounded_channel();
        let (net_command_tx, net_command_rx) = unbounded_channel();

        router.register(Arc::new(Self {
            id,
            query: query_tx,
            command: command_tx,
            net_query: net_query_tx,
            net_command: net_command_tx,
        }))?;

        Ok(MockChannels {
            query: query_rx,
            command: command_rx,
            net_query: net_query_rx,
            net_command: net_command_rx,
        })
    }
}

impl Service for MockService {
    fn service_id(&self) -> u32 {
        self.id
    }

    fn query_handler(self: Arc<Self>) -> Option<Arc<dyn QueryHandler>> {
        Some(self)
    }

    fn command_handler(self: Arc<Self>) -> Option<Arc<dyn CommandHandler>> {
        Some(self)
    }

    fn net_query_handler(self: Arc<Self>) -> Option<Arc<dyn NetQueryHandler>> {
        Some(self)
    }

    fn net_command_handler(self: Arc<Self>) -> Option<Arc<dyn NetCommandHandler>> {
        Some(self)
    }
}

impl QueryHandler for MockService {
    fn handle_query(&self, query: Query) {
        let _ = self.query.send(query);
    }
}

impl CommandHandler for MockService {
    fn handle_command(&self, command: Command) {
        let _ = self.command.send(command);
    }
}

impl NetQueryHandler for MockService {
    fn handle_net_query(&self, query: NetQuery) {
        let _ = self.net_query.send(query);
    }
}

impl NetCommandHandler for MockService {
    fn handle_net_command(&self, command: NetCommand) {
        let _ = self.net_command.send(command);
    }
}
