//! Message pipeline state: the pending-message cache, the custom JSON
//! history shadow, recent-reply deduplication, AI context formatting, and
//! the transactional promotion of cached messages into the host's official
//! conversation.

pub mod cache;
pub mod clean;
pub mod error;
pub mod format;
pub mod markers;
pub mod promote;
pub mod recent;
pub mod store;

pub use cache::{CachedDetail, CachedMessage, PendingCache};
pub use error::{HistoryError, Result};
pub use format::ContextEntry;
pub use promote::{promote_to_official, PromotionReport};
pub use recent::RecentReplies;
pub use store::{HistoryStore, StoredMessage};
