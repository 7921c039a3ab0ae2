pub mod events;
pub mod gateway;
pub mod registry;
pub mod session;

pub use events::{InboundCommand, OutboundEvent};
pub use gateway::{FanoutGateway, SendOutcome, SendRequest};
pub use registry::{ConnectionId, GroupKey, PresenceRegistry};
pub use session::WsSession;
