//! Per-entity sequential task runner
//!
//! Each orchestrating entity owns exactly one chain. Issuing a new task while a
//! prior one is still in flight does not cancel the prior task; it merely marks
//! it superseded. Only the most recently issued task is allowed to commit
//! results and clear the entity's busy flag; superseded results (and errors)
//! are discarded silently. Commits therefore always happen in issue order.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{Entity, Error, Result};
use crate::store::{Atom, Store};

/// Sequential async-task runner with last-commit-wins semantics.
#[derive(Clone)]
pub struct TaskChain {
    store: Store,
    busy: Atom<bool>,
    entity: Entity,
    latest: Arc<AtomicU64>,
    commit_lock: Arc<Mutex<()>>,
}

impl TaskChain {
    pub fn new(store: Store, busy: Atom<bool>, entity: Entity) -> Self {
        Self {
            store,
            busy,
            entity,
            latest: Arc::new(AtomicU64::new(0)),
            commit_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Run `work`, then apply `commit` to its result — but only if no newer
    /// task was issued in the meantime.
    ///
    /// The busy flag is raised before `work` starts (idempotent) and cleared
    /// only by the task that is still the latest when it settles. Errors from
    /// the committed task are re-thrown wrapped with the owning entity;
    /// superseded tasks settle as `Ok(())` with their outcome dropped.
    pub async fn run<T, W, C>(&self, work: W, commit: C) -> Result<()>
    where
        W: Future<Output = Result<T>>,
        C: FnOnce(Result<T>) -> Result<()>,
    {
        let seq = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        self.store
            .set(&self.busy, true)
            .map_err(|e| Error::from(e).for_entity(self.entity))?;

        let outcome = work.await;

        let _guard = self.commit_lock.lock().await;
        if self.latest.load(Ordering::SeqCst) != seq {
            tracing::debug!(
                entity = %self.entity,
                seq,
                failed = outcome.is_err(),
                "discarding superseded task result"
            );
            return Ok(());
        }

        let committed = commit(outcome);
        let cleared = self.store.set(&self.busy, false);

        match (committed, cleared) {
            (Err(e), _) => Err(e.for_entity(self.entity)),
            (Ok(()), Err(e)) => Err(Error::from(e).for_entity(self.entity)),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn chain_with_value() -> (Store, TaskChain, Atom<bool>, Atom<i32>) {
        let store = Store::new();
        let busy = store.atom(false);
        let chain = TaskChain::new(store.clone(), busy, Entity::Metadata);
        let value = store.atom(0);
        (store, chain, busy, value)
    }

    #[tokio::test]
    async fn test_single_task_commits_and_clears_busy() {
        let (store, chain, busy, value) = chain_with_value();
        let s = store.clone();
        chain
            .run(async { Ok(42) }, |r| {
                let v = r?;
                s.set(&value, v)?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(store.get(&value), 42);
        assert!(!store.get(&busy));
    }

    #[tokio::test]
    async fn test_superseded_task_does_not_commit() {
        let (store, chain, busy, value) = chain_with_value();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        // Task 1: blocked until released, would write 1
        let c1 = chain.clone();
        let s1 = store.clone();
        let t1 = tokio::spawn(async move {
            c1.run(
                async move {
                    gate.await.ok();
                    Ok(1)
                },
                |r| {
                    let v = r?;
                    s1.set(&value, v)?;
                    Ok(())
                },
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get(&busy));

        // Task 2: completes immediately, writes 2 and clears busy
        let s2 = store.clone();
        chain
            .run(async { Ok(2) }, |r| {
                let v = r?;
                s2.set(&value, v)?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(store.get(&value), 2);
        assert!(!store.get(&busy));

        // Task 1 resolves afterwards; its commit is skipped and busy untouched
        release.send(()).ok();
        t1.await.unwrap().unwrap();
        assert_eq!(store.get(&value), 2);
        assert!(!store.get(&busy));
    }

    #[tokio::test]
    async fn test_superseded_error_is_swallowed() {
        let (store, chain, _busy, value) = chain_with_value();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        let c1 = chain.clone();
        let t1 = tokio::spawn(async move {
            c1.run(
                async move {
                    gate.await.ok();
                    Err(Error::Config("stale failure".into()))
                },
                |r: Result<i32>| r.map(|_| ()),
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let s = store.clone();
        chain
            .run(async { Ok(7) }, |r| {
                let v = r?;
                s.set(&value, v)?;
                Ok(())
            })
            .await
            .unwrap();

        release.send(()).ok();
        // The stale task's error must not surface
        assert!(t1.await.unwrap().is_ok());
        assert_eq!(store.get(&value), 7);
    }

    #[tokio::test]
    async fn test_error_is_tagged_with_entity() {
        let (store, chain, busy, _value) = chain_with_value();
        let err = chain
            .run(
                async { Err::<(), _>(Error::Config("boom".into())) },
                |r| r,
            )
            .await
            .unwrap_err();
        assert_eq!(err.entity(), Some(Entity::Metadata));
        assert!(!store.get(&busy));
    }
}
