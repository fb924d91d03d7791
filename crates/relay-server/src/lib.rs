pub mod dispatcher;
pub mod guard;
pub mod lifecycle;
pub mod race;
pub mod registry;
pub mod server;
pub mod session;
pub mod sink;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use dispatcher::Dispatcher;
pub use registry::SessionRegistry;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use session::{Session, SessionHandle};
