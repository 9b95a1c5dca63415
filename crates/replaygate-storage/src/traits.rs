//! Repository trait for Todo persistence.

use async_trait::async_trait;
use replaygate_core::{TodoItem, UpdateTodo};
use uuid::Uuid;

use crate::error::StorageError;

/// The contract every Todo backend implements.
///
/// Implementations must be thread-safe (`Send + Sync`); the server shares a
/// single instance across all request tasks.
#[async_trait]
pub trait TodoRepository: Send + Sync {
    /// Returns all items ordered by creation time, oldest first.
    async fn list(&self) -> Result<Vec<TodoItem>, StorageError>;

    /// Reads an item by id.
    ///
    /// Returns `None` if the item does not exist.
    async fn get(&self, id: Uuid) -> Result<Option<TodoItem>, StorageError>;

    /// Stores a new item and returns it as persisted.
    async fn create(&self, item: TodoItem) -> Result<TodoItem, StorageError>;

    /// Applies `update` to an existing item.
    ///
    /// If `if_match` is provided, the update only succeeds when it equals the
    /// item's current ETag.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the item does not exist.
    /// Returns `StorageError::VersionConflict` if `if_match` doesn't match.
    async fn update(
        &self,
        id: Uuid,
        update: UpdateTodo,
        if_match: Option<&str>,
    ) -> Result<TodoItem, StorageError>;

    /// Deletes an item by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the item does not exist.
    async fn delete(&self, id: Uuid) -> Result<(), StorageError>;

    /// Number of stored items.
    async fn count(&self) -> Result<usize, StorageError>;
}
