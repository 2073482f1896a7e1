//! In-process stores: conversation sessions and the long-term memory bank.

pub mod memory;
pub mod session;

pub use memory::{Memory, MemoryBank, MemorySortKey, MemorySummary};
pub use session::{Message, Session, SessionStore};
