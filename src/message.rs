use std::{
    net::SocketAddr,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use bytes::Bytes;
use codec::{Flag, Header};

use crate::router::Router;

/// Stored form of a response continuation. The typed callbacks the users
/// hand in are wrapped so both callback tables share one shape.
pub(crate) type Callback = Arc<dyn Fn(Base) + Send + Sync>;

/// In-process message envelope: a decoded header, the owning router and the
/// peer port: the source port for an inbound message, the destination port
/// for one under construction.
///
/// `Base` is the single concrete carrier. The query/command/response views
/// handed to services are flag views over it, taken by the dispatcher at the
/// moment of dispatch. All header accessors are promoted through `Deref`.
pub struct Base {
    pub(crate) header: Header,
    pub(crate) router: Router,
    pub(crate) port: u16,
}

impl Deref for Base {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}

impl DerefMut for Base {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.header
    }
}

impl Base {
    /// The peer port: where the message came from, or where `send` will
    /// send it.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Set the destination port.
    pub fn to(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the destination service ID on the header.
    pub fn set_service(mut self, service: u32) -> Self {
        self.header.service = service;
        self
    }

    /// Set the overlay address, for messages bound for the net egress.
    pub fn set_addr(mut self, addr: SocketAddr) -> Self {
        self.header.addr = Some(addr);
        self
    }

    /// OR a flag bit into the header.
    pub fn set_flag(mut self, flag: Flag) -> Self {
        self.header.set_flag(flag);
        self
    }

    /// Address the message to a remote service across the overlay: flag it
    /// to-net, record the overlay address and the remote service ID, and
    /// destinate the local overlay egress port.
    pub fn to_net(self, overlay_port: u16, net_addr: SocketAddr, remote_service: u32) -> Self {
        self.set_flag(Flag::ToNet)
            .set_addr(net_addr)
            .set_service(remote_service)
            .to(overlay_port)
    }

    /// Dispatch the message to its destination port.
    pub fn send(self) {
        self.finish(None, false);
    }

    /// As `send`, and if the message is a query the callback is invoked with
    /// the response. The callback lives for one second; responses arriving
    /// later than that invoke nothing.
    pub fn send_with(self, callback: impl Fn(Response) + Send + Sync + 'static) {
        self.finish(Some(Arc::new(move |base| callback(Response(base)))), false);
    }

    /// Hand the message to the net egress: flag it to-net, record the
    /// overlay address and send it to the net sender's recorded port. When
    /// no net sender port is known the message is logged and dropped.
    pub fn send_to_net(self, net_addr: SocketAddr) {
        self.transmit_to_net(net_addr, None);
    }

    /// As `send_to_net`; a query's callback goes into the net callback
    /// table and is invoked with the from-net response.
    pub fn send_to_net_with(
        self,
        net_addr: SocketAddr,
        callback: impl Fn(NetResponse) + Send + Sync + 'static,
    ) {
        self.transmit_to_net(
            net_addr,
            Some(Arc::new(move |base| callback(NetResponse(base)))),
        );
    }

    fn transmit_to_net(mut self, net_addr: SocketAddr, callback: Option<Callback>) {
        self.header.set_flag(Flag::ToNet);
        self.header.addr = Some(net_addr);

        let Some(port) = self.router.net_sender_port() else {
            log::warn!(
                "no net sender port recorded, dropping message: id={}, service={}",
                self.header.id,
                self.header.service
            );
            return;
        };

        self.port = port;
        self.finish(callback, true);
    }

    fn finish(mut self, callback: Option<Callback>, net: bool) {
        let id = self.header.id;

        // Register before dispatching so a fast response cannot beat the
        // callback into the table.
        if let Some(callback) = callback {
            if self.header.is_query() {
                self.router.register_callback(id, callback, net);
            }
        }

        // Loopback short-circuit: no serialization, the ID stays in the
        // header, and a fresh task keeps a handler that sends to itself off
        // its own stack.
        if self.port == self.router.port() {
            let router = self.router.clone();
            tokio::spawn(async move {
                router.dispatch(self);
            });
            return;
        }

        // The wire carries the ID in the envelope, not in the header.
        self.header.id = 0;
        let bytes = self.header.marshal();
        self.router.endpoint().send(id, bytes, self.port);
    }

    /// Respond to a query: same ID and kind, the response flag, addressed
    /// back to the peer port. A query that came in from the overlay gets
    /// the response flagged back out through the net egress, to the address
    /// it came from.
    pub fn respond(&self, body: impl Into<Bytes>) {
        let mut response = Base {
            header: self.header.reply(body.into()),
            router: self.router.clone(),
            port: self.port,
        };

        if self.header.is_from_net() {
            response.header.set_flag(Flag::ToNet);
            response.header.addr = self.header.addr;
        }

        response.send();
    }
}

/// A query from a local service. Expects `respond`.
pub struct Query(pub(crate) Base);

/// A command from a local service. Fire and forget.
pub struct Command(pub(crate) Base);

/// A response correlated to an earlier local query.
pub struct Response(pub(crate) Base);

/// A query that arrived through the overlay ingress. `respond` routes the
/// answer back out through the net egress.
pub struct NetQuery(pub(crate) Base);

/// A command that arrived through the overlay ingress.
pub struct NetCommand(pub(crate) Base);

/// A response that arrived through the overlay ingress.
pub struct NetResponse(pub(crate) Base);

impl Deref for Query {
    type Target = Base;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for Command {
    type Target = Base;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for Response {
    type Target = Base;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for NetQuery {
    type Target = Base;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for NetCommand {
    type Target = Base;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for NetResponse {
    type Target = Base;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
