use crate::error::Result;
use authz_model::{ObjectRef, RelationshipTuple};
use authz_store::TupleStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

type ReadCache = DashMap<(String, String, String), Arc<Vec<RelationshipTuple>>, ahash::RandomState>;

/// Request-scoped tuple reader.
///
/// Layers the request's contextual tuples over the store (read-through, never
/// written back), caches object lookups so one `(object, relation)` pair hits
/// the store at most once per request, and bounds in-flight store reads with
/// the request's semaphore.
pub struct RequestReader {
    store: Arc<dyn TupleStore>,
    contextual: Vec<RelationshipTuple>,
    cache: ReadCache,
    semaphore: Arc<Semaphore>,
}

impl RequestReader {
    pub fn new(
        store: Arc<dyn TupleStore>,
        contextual: Vec<RelationshipTuple>,
        semaphore: Arc<Semaphore>,
    ) -> Self {
        Self {
            store,
            contextual,
            cache: ReadCache::default(),
            semaphore,
        }
    }

    /// Tuples for `(object, relation)`, contextual tuples included.
    pub async fn read_by_object(
        &self,
        object: &ObjectRef,
        relation: &str,
    ) -> Result<Arc<Vec<RelationshipTuple>>> {
        let key = (
            object.object_type.clone(),
            object.object_id.clone(),
            relation.to_string(),
        );
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }

        let mut tuples = {
            // The semaphore is never closed while a request is running.
            let _permit = self.semaphore.acquire().await;
            self.store.find_by_object(object, Some(relation)).await?
        };

        for extra in &self.contextual {
            if extra.object == *object && extra.relation == relation && !tuples.contains(extra) {
                tuples.push(extra.clone());
            }
        }
        let tuples = Arc::new(tuples);
        self.cache.insert(key, tuples.clone());
        Ok(tuples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authz_model::SubjectRef;
    use authz_store::MemoryStore;

    fn tuple(subject: &str, relation: &str, object: &str) -> RelationshipTuple {
        RelationshipTuple::new(
            SubjectRef::parse(subject).unwrap(),
            relation,
            ObjectRef::parse(object).unwrap(),
        )
    }

    #[tokio::test]
    async fn layers_contextual_tuples_without_persisting() {
        let store: Arc<dyn TupleStore> = Arc::new(MemoryStore::new());
        store
            .write(vec![tuple("user:alice", "viewer", "doc:1")], vec![])
            .await
            .unwrap();

        let reader = RequestReader::new(
            store.clone(),
            vec![tuple("user:bob", "viewer", "doc:1")],
            Arc::new(Semaphore::new(4)),
        );
        let doc = ObjectRef::new("doc", "1");
        let seen = reader.read_by_object(&doc, "viewer").await.unwrap();
        assert_eq!(seen.len(), 2);

        // the layered tuple never reaches the store
        let persisted = store.find_by_object(&doc, Some("viewer")).await.unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_contextual_tuples_do_not_double() {
        let store: Arc<dyn TupleStore> = Arc::new(MemoryStore::new());
        store
            .write(vec![tuple("user:alice", "viewer", "doc:1")], vec![])
            .await
            .unwrap();

        let reader = RequestReader::new(
            store,
            vec![tuple("user:alice", "viewer", "doc:1")],
            Arc::new(Semaphore::new(4)),
        );
        let seen = reader
            .read_by_object(&ObjectRef::new("doc", "1"), "viewer")
            .await
            .unwrap();
        assert_eq!(seen.len(), 1);
    }
}
