pub mod errors;
pub mod ids;
pub mod protocol;

pub use errors::RelayError;
pub use ids::{ConnectionId, RequestId};
