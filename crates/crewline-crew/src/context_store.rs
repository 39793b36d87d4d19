use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

/// The three context-service affordances every crew gets (spec.md §4.2):
/// a namespaced key/value store keyed by `(user, namespace)` or
/// `(user, conversation, namespace)` (spec.md §6).
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn get_context(
        &self,
        user_id: &str,
        namespace: &str,
        conversation_id: Option<&str>,
    ) -> Option<Value>;

    async fn write_context(
        &self,
        user_id: &str,
        namespace: &str,
        conversation_id: Option<&str>,
        value: Value,
    );

    /// Shallow-merge `value` into whatever document is already stored.
    async fn merge_context(
        &self,
        user_id: &str,
        namespace: &str,
        conversation_id: Option<&str>,
        value: Value,
    );
}

fn key(user_id: &str, namespace: &str, conversation_id: Option<&str>) -> String {
    match conversation_id {
        Some(conv) => format!("{user_id}\0{conv}\0{namespace}"),
        None => format!("{user_id}\0\0{namespace}"),
    }
}

/// Process-local context store, used for tests and as a default when no
/// durable backend is wired in. Mirrors the teacher's per-user in-memory
/// cache pattern (`MemoryManager`'s cache), generalised from per-user keys
/// to per-(user, namespace, conversation?) keys.
#[derive(Default)]
pub struct InMemoryContextStore {
    docs: DashMap<String, Value>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn get_context(
        &self,
        user_id: &str,
        namespace: &str,
        conversation_id: Option<&str>,
    ) -> Option<Value> {
        self.docs.get(&key(user_id, namespace, conversation_id)).map(|v| v.clone())
    }

    async fn write_context(
        &self,
        user_id: &str,
        namespace: &str,
        conversation_id: Option<&str>,
        value: Value,
    ) {
        self.docs.insert(key(user_id, namespace, conversation_id), value);
    }

    async fn merge_context(
        &self,
        user_id: &str,
        namespace: &str,
        conversation_id: Option<&str>,
        value: Value,
    ) {
        let k = key(user_id, namespace, conversation_id);
        let mut entry = self.docs.entry(k).or_insert(Value::Object(Default::default()));
        if let (Value::Object(existing), Value::Object(incoming)) = (entry.value_mut(), &value) {
            for (field, v) in incoming {
                existing.insert(field.clone(), v.clone());
            }
        } else {
            *entry.value_mut() = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merge_shallow_merges_over_existing() {
        let store = InMemoryContextStore::new();
        store
            .write_context("u1", "ns", None, serde_json::json!({"a": 1, "b": 2}))
            .await;
        store
            .merge_context("u1", "ns", None, serde_json::json!({"b": 3, "c": 4}))
            .await;
        let merged = store.get_context("u1", "ns", None).await.unwrap();
        assert_eq!(merged, serde_json::json!({"a": 1, "b": 3, "c": 4}));
    }

    #[tokio::test]
    async fn conversation_scoped_and_user_scoped_are_distinct() {
        let store = InMemoryContextStore::new();
        store
            .write_context("u1", "ns", Some("conv1"), serde_json::json!({"x": 1}))
            .await;
        assert!(store.get_context("u1", "ns", None).await.is_none());
        assert!(store.get_context("u1", "ns", Some("conv1")).await.is_some());
    }
}
