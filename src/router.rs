use std::{
    fmt,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use codec::{Flag, Header, Kind, OVERLAY_SERVICE, POOL_SERVICE};

use crate::{
    endpoint::{Endpoint, Error, Package},
    message::{Base, Callback, Command, NetCommand, NetQuery, Query, Response},
    registry::{RegisterError, Registry, Service},
    table::Table,
};

/// How long a response callback outlives its registration. Entries are
/// deleted unconditionally when the window closes, consumed or not; callers
/// that need timeout reporting must layer it themselves.
const CALLBACK_LIFETIME: Duration = Duration::from_secs(1);

struct RouterInner {
    endpoint: Endpoint,
    registry: Registry,
    callbacks: Table<Callback>,
    net_callbacks: Table<Callback>,
}

/// Process-local message router bound to one datagram port.
///
/// The router multiplexes the port among registered services, correlates
/// query/response pairs by message ID and hands to-net messages to the
/// registered net sender. It is a cheap clonable handle; every message it
/// builds carries one back, which is what makes `send` and `respond` work
/// from handler context.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Create a router bound to `127.0.0.1:port`.
    pub async fn new(port: u16) -> Result<Self, Error> {
        let inner = Arc::new(RouterInner {
            endpoint: Endpoint::bind(port).await?,
            registry: Registry::default(),
            callbacks: Table::default(),
            net_callbacks: Table::default(),
        });

        // The receive task must not keep the router alive on its own.
        let weak = Arc::downgrade(&inner);
        inner.endpoint.handler(move |package| {
            if let Some(inner) = weak.upgrade() {
                Router { inner }.receive(package);
            }
        });

        Ok(Self { inner })
    }

    /// Launch the receive loop. Calling run multiple times will not start
    /// multiple loops.
    pub fn run(&self) {
        self.inner.endpoint.run();
    }

    /// Halt the receive loop.
    pub fn stop(&self) {
        self.inner.endpoint.stop();
    }

    /// Close the endpoint. A closed router neither sends nor receives.
    pub fn close(&self) {
        self.inner.endpoint.close();
    }

    pub fn is_running(&self) -> bool {
        self.inner.endpoint.is_running()
    }

    pub fn is_open(&self) -> bool {
        self.inner.endpoint.is_open()
    }

    /// The bound UDP port.
    pub fn port(&self) -> u16 {
        self.inner.endpoint.port()
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Register a service for every role it implements. See
    /// [`Registry::register`](crate::registry) for the role order and the
    /// partial-install behavior on failure.
    pub fn register(&self, service: Arc<dyn Service>) -> Result<(), RegisterError> {
        self.inner.registry.register(service)
    }

    pub(crate) fn net_sender_port(&self) -> Option<u16> {
        self.inner.registry.net_sender_port()
    }

    /// Build a query: a message that expects a response correlated by its
    /// message ID.
    pub fn query(&self, kind: Kind, body: impl Into<Bytes>) -> Base {
        let mut header = Header::new(kind, body.into());
        header.set_flag(Flag::Query);

        Base {
            header,
            router: self.clone(),
            port: 0,
        }
    }

    /// Build a command: no flags, fire and forget.
    pub fn command(&self, kind: Kind, body: impl Into<Bytes>) -> Base {
        Base {
            header: Header::new(kind, body.into()),
            router: self.clone(),
            port: 0,
        }
    }

    /// Ask the pool service on `pool_port` for the ipc port a named service
    /// listens on.
    pub fn request_service_port(
        &self,
        service_name: &str,
        pool_port: u16,
        callback: impl Fn(Response) + Send + Sync + 'static,
    ) {
        self.query(Kind::GetPort, Bytes::copy_from_slice(service_name.as_bytes()))
            .to(pool_port)
            .set_service(POOL_SERVICE)
            .send_with(callback);
    }

    /// Announce a service ID to the overlay service on `overlay_port`.
    pub fn register_with_overlay(&self, service_id: u32, overlay_port: u16) {
        self.command(
            Kind::RegisterService,
            Bytes::copy_from_slice(&service_id.to_be_bytes()),
        )
        .to(overlay_port)
        .set_service(OVERLAY_SERVICE)
        .send();
    }

    /// Park a response continuation under the outbound message ID and
    /// schedule its unconditional deletion.
    ///
    /// There is no cancel on consume: if the response arrives first, the
    /// later delete hits an absent key and is a no-op. The timer holds a
    /// weak reference so an in-flight expiry cannot keep a dropped router
    /// alive.
    pub(crate) fn register_callback(&self, id: u32, callback: Callback, net: bool) {
        let table = if net {
            &self.inner.net_callbacks
        } else {
            &self.inner.callbacks
        };
        table.set(id, callback);

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(CALLBACK_LIFETIME).await;

            if let Some(inner) = weak.upgrade() {
                if net {
                    inner.net_callbacks.delete(&[id]);
                } else {
                    inner.callbacks.delete(&[id]);
                }
            }
        });
    }

    /// Entry from the receive path: decode, stamp the envelope ID into the
    /// header and dispatch. Packets that do not parse as a message are
    /// logged and never dispatched.
    fn receive(&self, package: Package) {
        log::debug!("got package: port={}, from={}", self.port(), package.addr);

        let mut header = match Header::unmarshal(&package.body) {
            Ok(header) => header,
            Err(e) => {
                log::info!("not a message: from={}, error={}", package.addr, e);
                return;
            }
        };

        // The envelope ID is authoritative; whatever the header carried is
        // discarded.
        header.id = package.id;

        self.dispatch(Base {
            header,
            router: self.clone(),
            port: package.addr.port(),
        });
    }

    /// Classify a message and hand it to the right party.
    ///
    /// Runs on the calling task: the receive loop for inbound messages, a
    /// dedicated task for loopback sends. Handlers may block; a slow handler
    /// blocks this task and nothing else.
    pub(crate) fn dispatch(&self, mut base: Base) {
        // Responses go to their parked callback. A response nobody is
        // waiting for falls through and is treated as a command; some
        // protocols rely on that.
        if base.is_response() {
            if base.is_from_net() {
                if let Some(callback) = self.inner.net_callbacks.get(base.id) {
                    callback(base);
                    return;
                }
            }

            if let Some(callback) = self.inner.callbacks.get(base.id) {
                callback(base);
                return;
            }
        }

        // Net egress. The net sender sees the message with the flag already
        // cleared; nobody else sees it at all.
        if base.is_to_net() {
            base.header.unset_flag(Flag::ToNet);

            match self.inner.registry.net_sender() {
                Some(sender) => sender.outgoing(base),
                None => log::warn!(
                    "no net sender registered: id={}, service={}",
                    base.id,
                    base.service
                ),
            }

            return;
        }

        // Overlay ingress is dispatched only to net handlers; a from-net
        // message never reaches a local service.
        if base.is_from_net() {
            let service = base.service;

            if base.is_query() {
                if let Some(handler) = self.inner.registry.net_queries.get(service) {
                    handler.handle_net_query(NetQuery(base));
                    return;
                }
            } else if let Some(handler) = self.inner.registry.net_commands.get(service) {
                handler.handle_net_command(NetCommand(base));
                return;
            }

            log::info!("no net handler: service={}, port={}", service, base.port());
            return;
        }

        // Local services.
        let service = base.service;

        if base.is_query() {
            if let Some(handler) = self.inner.registry.queries.get(service) {
                handler.handle_query(Query(base));
                return;
            }
        } else if let Some(handler) = self.inner.registry.commands.get(service) {
            handler.handle_command(Command(base));
            return;
        }

        log::info!(
            "no handler or callback: response={}, id={}, service={}, port={}",
            base.is_response(),
            base.id,
            service,
            base.port()
        );
    }
}

impl fmt::Display for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.endpoint)
    }
}
