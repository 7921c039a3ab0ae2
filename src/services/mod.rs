pub mod activity;
pub mod availability_store;
pub mod conversation_store;
pub mod delivery_policy;
pub mod identity;
pub mod memory;
pub mod message_ledger;
pub mod receipts;
pub mod scheduler;
pub mod state_events;

use std::sync::Arc;

pub use activity::{ActivityReporter, PgActivityReporter};
pub use availability_store::{AvailabilityStore, PgAvailabilityStore};
pub use conversation_store::{ConversationStore, PgConversationStore};
pub use delivery_policy::{DeliveryDecision, DeliveryPolicy};
pub use identity::{AuthenticatedIdentity, IdentityResolver, JwtIdentityResolver};
pub use message_ledger::{MessageLedger, PgMessageLedger};
pub use scheduler::DeferredDeliveryScheduler;
pub use state_events::{StateChange, StateDispatcher, StateEventBus};

/// External collaborators the delivery core reads from and writes to
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn MessageLedger>,
    pub conversations: Arc<dyn ConversationStore>,
    pub availability: Arc<dyn AvailabilityStore>,
    pub identity: Arc<dyn IdentityResolver>,
    pub activity: Arc<dyn ActivityReporter>,
}
