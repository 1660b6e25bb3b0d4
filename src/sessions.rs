//! Session domain: the single source of truth for who has which live session.

mod authority;
mod global;
mod registry;
mod session;
mod store;

pub use authority::{ConflictPolicy, SessionAuthority, SessionLease};
pub use global::{global, install_global, teardown_global};
pub use session::{ConversationHandle, Session, SessionHealth, SessionKey, UserContext};
pub use store::{ConversationStore, InMemoryConversationStore};
