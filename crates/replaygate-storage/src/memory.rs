//! In-memory Todo repository backed by a sharded concurrent map.

use async_trait::async_trait;
use dashmap::DashMap;
use replaygate_core::{TodoItem, UpdateTodo};
use uuid::Uuid;

use crate::error::StorageError;
use crate::traits::TodoRepository;

/// Process-local repository. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryTodoRepository {
    items: DashMap<Uuid, TodoItem>,
}

impl InMemoryTodoRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TodoRepository for InMemoryTodoRepository {
    async fn list(&self) -> Result<Vec<TodoItem>, StorageError> {
        let mut items: Vec<TodoItem> = self.items.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TodoItem>, StorageError> {
        Ok(self.items.get(&id).map(|e| e.value().clone()))
    }

    async fn create(&self, item: TodoItem) -> Result<TodoItem, StorageError> {
        self.items.insert(item.id, item.clone());
        tracing::debug!(id = %item.id, "todo created");
        Ok(item)
    }

    async fn update(
        &self,
        id: Uuid,
        update: UpdateTodo,
        if_match: Option<&str>,
    ) -> Result<TodoItem, StorageError> {
        // The shard stays locked for the check-and-apply.
        let mut entry = self
            .items
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found(id.to_string()))?;

        if let Some(expected) = if_match {
            let actual = entry.etag();
            if expected != actual {
                return Err(StorageError::version_conflict(expected, actual));
            }
        }

        entry.apply(update);
        Ok(entry.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StorageError> {
        self.items
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(id.to_string()))
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(title: &str) -> UpdateTodo {
        UpdateTodo {
            title: title.into(),
            notes: None,
            is_complete: false,
        }
    }

    #[tokio::test]
    async fn create_get_and_list_in_creation_order() {
        let repo = InMemoryTodoRepository::new();
        let first = repo.create(TodoItem::new("first", None)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        repo.create(TodoItem::new("second", None)).await.unwrap();

        assert_eq!(repo.get(first.id).await.unwrap().unwrap().title, "first");
        let titles: Vec<_> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, ["first", "second"]);
        assert_eq!(repo.count().await.unwrap(), 2);
        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_checks_if_match() {
        let repo = InMemoryTodoRepository::new();
        let item = repo.create(TodoItem::new("a", None)).await.unwrap();

        let err = repo
            .update(item.id, update("b"), Some("W/\"0\""))
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());

        let updated = repo
            .update(item.id, update("b"), Some(&item.etag()))
            .await
            .unwrap();
        assert_eq!(updated.title, "b");
        assert_ne!(updated.etag(), item.etag());

        // Unconditional update is allowed.
        let updated = repo.update(item.id, update("c"), None).await.unwrap();
        assert_eq!(updated.title, "c");
    }

    #[tokio::test]
    async fn missing_items_are_not_found() {
        let repo = InMemoryTodoRepository::new();
        let id = Uuid::new_v4();
        assert!(repo.update(id, update("x"), None).await.unwrap_err().is_not_found());
        assert!(repo.delete(id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_removes_item() {
        let repo = InMemoryTodoRepository::new();
        let item = repo.create(TodoItem::new("a", None)).await.unwrap();
        repo.delete(item.id).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
