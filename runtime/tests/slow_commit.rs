//! Operations whose commit is applied but acknowledged late.
//!
//! The store applies the commit and only then stalls, as a database whose reply
//! is slow to arrive. The engine must report what the store did, even when the
//! acknowledgement lands after the operation deadline.

#![allow(clippy::unwrap_used)]

use matchbook_core::store::{
    Document, DocumentKey, EntityStore, StoreFuture, StoreTransaction, Version,
};
use matchbook_core::types::{MatchStatus, UserId};
use matchbook_runtime::{Engine, EngineConfig};
use matchbook_testing::mocks::epoch;
use matchbook_testing::{InMemoryEntityStore, InMemoryFieldDirectory, fixtures, init_tracing, test_clock};
use std::sync::Arc;
use std::time::Duration;

struct SlowAckStore {
    inner: InMemoryEntityStore,
    ack_delay: Duration,
}

impl EntityStore for SlowAckStore {
    fn get<'a>(&'a self, key: &'a DocumentKey) -> StoreFuture<'a, Option<Document>> {
        self.inner.get(key)
    }

    fn scan<'a>(&'a self, collection: &'a str, id_prefix: &'a str) -> StoreFuture<'a, Vec<Document>> {
        self.inner.scan(collection, id_prefix)
    }

    fn insert<'a>(&'a self, key: &'a DocumentKey, body: serde_json::Value) -> StoreFuture<'a, Version> {
        self.inner.insert(key, body)
    }

    fn put<'a>(&'a self, key: &'a DocumentKey, body: serde_json::Value) -> StoreFuture<'a, Version> {
        self.inner.put(key, body)
    }

    fn compare_and_swap<'a>(
        &'a self,
        key: &'a DocumentKey,
        expected: Version,
        body: serde_json::Value,
    ) -> StoreFuture<'a, Version> {
        self.inner.compare_and_swap(key, expected, body)
    }

    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>> {
        Box::pin(async move {
            let inner = self.inner.begin().await?;
            let tx: Box<dyn StoreTransaction> = Box::new(SlowAckTransaction {
                inner,
                ack_delay: self.ack_delay,
            });
            Ok(tx)
        })
    }
}

struct SlowAckTransaction {
    inner: Box<dyn StoreTransaction>,
    ack_delay: Duration,
}

impl StoreTransaction for SlowAckTransaction {
    fn get<'a>(&'a mut self, key: &'a DocumentKey) -> StoreFuture<'a, Option<Document>> {
        self.inner.get(key)
    }

    fn scan<'a>(
        &'a mut self,
        collection: &'a str,
        id_prefix: &'a str,
    ) -> StoreFuture<'a, Vec<Document>> {
        self.inner.scan(collection, id_prefix)
    }

    fn insert<'a>(&'a mut self, key: &'a DocumentKey, body: serde_json::Value) -> StoreFuture<'a, Version> {
        self.inner.insert(key, body)
    }

    fn update<'a>(
        &'a mut self,
        key: &'a DocumentKey,
        expected: Version,
        body: serde_json::Value,
    ) -> StoreFuture<'a, Version> {
        self.inner.update(key, expected, body)
    }

    fn delete<'a>(&'a mut self, key: &'a DocumentKey, expected: Version) -> StoreFuture<'a, ()> {
        self.inner.delete(key, expected)
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        let Self { inner, ack_delay } = *self;
        Box::pin(async move {
            inner.commit().await?;
            tokio::time::sleep(ack_delay).await;
            Ok(())
        })
    }
}

fn slow_engine(store: &InMemoryEntityStore) -> Engine {
    init_tracing();
    Engine::new(
        Arc::new(SlowAckStore {
            inner: store.clone(),
            ack_delay: Duration::from_millis(200),
        }),
        Arc::new(InMemoryFieldDirectory::with_sample_fields()),
        Arc::new(test_clock()),
        EngineConfig::default().with_operation_deadline(Duration::from_millis(50)),
    )
}

#[tokio::test]
async fn join_acknowledged_after_deadline_reports_success() {
    let store = InMemoryEntityStore::new();
    let engine = slow_engine(&store);
    let created = engine
        .repository()
        .create_match(fixtures::new_match(epoch(), 1))
        .await
        .unwrap();

    let membership = engine
        .coordinator()
        .join_match(&UserId::new("alice"), created.id)
        .await
        .unwrap();

    assert_eq!(membership.user_id, UserId::new("alice"));
    assert_eq!(engine.repository().count_memberships(created.id).await.unwrap(), 1);
    assert_eq!(
        engine.repository().get_match(created.id).await.unwrap().status,
        MatchStatus::Full
    );
}

#[tokio::test]
async fn resolve_acknowledged_after_deadline_reports_success() {
    let store = InMemoryEntityStore::new();
    let engine = slow_engine(&store);
    let request = engine
        .role_requests()
        .submit_request(fixtures::organizer_request("alice"))
        .await
        .unwrap();

    let resolved = engine
        .role_requests()
        .resolve_request(
            request.id,
            matchbook_core::types::Decision::Approve,
            &UserId::new("admin"),
        )
        .await
        .unwrap();

    assert_eq!(
        engine.role_requests().get_request(request.id).await.unwrap(),
        resolved
    );
}
