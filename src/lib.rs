//! ## Inter-process message router
//!
//! Routes datagram messages between cooperating local services sharing a
//! UDP loopback mesh. One router owns one port and multiplexes it among any
//! number of logical services identified by a 32-bit service ID; queries
//! are correlated with their responses by message ID, and messages flagged
//! for the wide-area overlay are handed to a single registered net sender.
//!
//! Sends whose destination is the router's own port never touch the socket:
//! they are dispatched in process, body buffer shared, on a fresh task.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ipc_router::{Query, QueryHandler, Router, Service, codec::Kind};
//!
//! struct Echo;
//!
//! impl Service for Echo {
//!     fn service_id(&self) -> u32 {
//!         77
//!     }
//!
//!     fn query_handler(self: Arc<Self>) -> Option<Arc<dyn QueryHandler>> {
//!         Some(self)
//!     }
//! }
//!
//! impl QueryHandler for Echo {
//!     fn handle_query(&self, query: Query) {
//!         query.respond(query.body.clone());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let router = Router::new(4567).await?;
//!     router.register(Arc::new(Echo))?;
//!     router.run();
//!
//!     router
//!         .query(Kind::Test, "hello")
//!         .to(4567)
//!         .set_service(77)
//!         .send_with(|response| println!("{}", response.body_str()));
//!
//!     std::future::pending::<()>().await;
//!     Ok(())
//! }
//! ```

pub mod endpoint;
pub mod message;
pub mod registry;
pub mod router;

mod table;

pub use codec;

pub use self::{
    endpoint::Error,
    message::{Base, Command, NetCommand, NetQuery, NetResponse, Query, Response},
    registry::{
        CommandHandler, NetCommandHandler, NetQueryHandler, NetSender, QueryHandler,
        RegisterError, Service,
    },
    router::Router,
};
