//! # replaygate-storage
//!
//! Persistence layer for the Todo API that the idempotency engine protects.
//!
//! The main trait is [`TodoRepository`]; [`InMemoryTodoRepository`] is the
//! only backend and keeps everything in a `DashMap`.
//!
//! ## Example
//!
//! ```ignore
//! use replaygate_storage::{DynRepository, InMemoryTodoRepository};
//!
//! let repo: DynRepository = std::sync::Arc::new(InMemoryTodoRepository::new());
//! let created = repo.create(TodoItem::new("write docs", None)).await?;
//! ```

mod error;
mod memory;
mod traits;

pub use error::StorageError;
pub use memory::InMemoryTodoRepository;
pub use traits::TodoRepository;

/// Type alias for a shared repository trait object.
pub type DynRepository = std::sync::Arc<dyn TodoRepository>;
