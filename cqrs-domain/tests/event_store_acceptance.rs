use anyhow::Result as AnyResult;
use chrono::Utc;
use cqrs_domain::event::Event;
use cqrs_domain::eventstore::{EventStore, MemoryEventStore};
use cqrs_domain::{Context, DomainError, Id};
use std::sync::Arc;

fn event(id: &Id, version: usize) -> Event {
    Event::new("Deposited", Utc::now()).for_aggregate("Account", id.clone(), version)
}

#[tokio::test(flavor = "multi_thread")]
async fn namespaces_are_isolated() -> AnyResult<()> {
    let store = MemoryEventStore::new();
    let a = Context::new().with_namespace("a");
    let b = Context::new().with_namespace("b");
    let id = Id::new();

    store.save(&a, &[event(&id, 1)], 0).await?;
    assert!(store.load(&b, &id).await?.is_empty());
    // 同一标识在另一命名空间从头开始
    store.save(&b, &[event(&id, 1), event(&id, 2)], 0).await?;
    assert_eq!(store.load(&a, &id).await?.len(), 1);
    assert_eq!(store.load(&b, &id).await?.len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_writers_see_exactly_one_conflict() -> AnyResult<()> {
    let store = Arc::new(MemoryEventStore::new());
    let ctx = Context::new();
    let id = Id::new();
    store.save(&ctx, &[event(&id, 1)], 0).await?;

    let writers: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            let ctx = ctx.clone();
            let id = id.clone();
            tokio::spawn(async move { store.save(&ctx, &[event(&id, 2)], 1).await })
        })
        .collect();

    let mut ok = 0;
    let mut conflicts = 0;
    for w in writers {
        match w.await? {
            Ok(()) => ok += 1,
            Err(err) if err.is_version_conflict() => conflicts += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!((ok, conflicts), (1, 1));
    assert_eq!(store.load(&ctx, &id).await?.len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_batches_store_nothing() -> AnyResult<()> {
    let store = MemoryEventStore::new();
    let ctx = Context::new();
    let id = Id::new();

    assert!(matches!(
        store.save(&ctx, &[], 0).await,
        Err(DomainError::NoEvents)
    ));
    assert!(matches!(
        store.save(&ctx, &[event(&id, 1), event(&Id::new(), 2)], 0).await,
        Err(DomainError::MismatchedAggregateId)
    ));
    assert!(matches!(
        store.save(&ctx, &[event(&id, 1), event(&id, 3)], 0).await,
        Err(DomainError::IncorrectEventVersion { expected: 2, found: 3, .. })
    ));
    assert!(matches!(
        store.save(&ctx, &[event(&id, 2)], 1).await,
        Err(DomainError::VersionConflict { expected: 1, actual: 0, .. })
    ));
    assert!(store.load(&ctx, &id).await?.is_empty());

    store.save(&ctx, &[event(&id, 1), event(&id, 2)], 0).await?;
    let versions: Vec<usize> = store
        .load(&ctx, &id)
        .await?
        .iter()
        .map(Event::version)
        .collect();
    assert_eq!(versions, vec![1, 2]);
    Ok(())
}
