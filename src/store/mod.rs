//! Reactive store: observable value cells with dependency tracking
//!
//! The store is a registry of nodes. A node is either a plain atom (explicitly
//! written) or a computed atom (a pure function of other atoms, memoized until a
//! dependency changes). Dependency edges are recorded per read during a tracked
//! evaluation and rebuilt on every recomputation, so no stale edges survive.
//!
//! Guarantees:
//! - writes inside a transaction are coalesced; no subscriber fires more than
//!   once per transaction, and computed atoms recompute at most once with the
//!   final upstream values
//! - computed atoms are lazy: invalidation only flags them dirty, recomputation
//!   happens on the next read (or during notification delivery when subscribed)
//! - cycle detection at write time: writing an atom that is currently being
//!   recomputed or notified fails with [`StoreError::CyclicUpdate`]

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Reactive store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// An atom was written while it was being recomputed or while its
    /// subscribers were being notified.
    #[error("cyclic update: atom written during its own recomputation or notification")]
    CyclicUpdate,
}

type NodeId = u64;
type ComputeFn = Box<dyn Fn(&mut Eval<'_>) -> Box<dyn Any + Send> + Send>;
type EqFn = Box<dyn Fn(&dyn Any, &dyn Any) -> bool + Send>;
type Listener = Arc<dyn Fn() + Send + Sync>;

/// Typed handle to a store node.
///
/// Handles are cheap ids; the value lives in the [`Store`].
pub struct Atom<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Atom<T> {}

struct Node {
    value: Option<Box<dyn Any + Send>>,
    /// `Some` for computed nodes (taken out during evaluation), `None` for plain.
    compute: Option<ComputeFn>,
    is_computed: bool,
    dirty: bool,
    /// The value was replaced and subscribers have not heard about it yet.
    /// A recompute triggered from a sibling's evaluation clears `dirty` before
    /// this node's own delivery runs, so delivery keys off this flag instead.
    changed_since_notify: bool,
    deps: HashSet<NodeId>,
    dependents: HashSet<NodeId>,
    subscribers: HashMap<u64, Listener>,
    eq: EqFn,
}

#[derive(Default)]
struct StoreInner {
    nodes: HashMap<NodeId, Node>,
    next_node: NodeId,
    next_sub: u64,
    tx_depth: u32,
    flushing: bool,
    /// Insertion-ordered pending notifications, deduplicated by `pending_set`.
    pending: Vec<NodeId>,
    pending_set: HashSet<NodeId>,
    /// Computed nodes currently being evaluated (innermost last).
    eval_stack: Vec<NodeId>,
    /// Nodes whose subscribers are currently being notified.
    notifying: HashSet<NodeId>,
}

/// Registry of reactive atoms. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<StoreInner>>,
}

/// Tracked-evaluation context passed to computed atoms.
///
/// Every read through [`Eval::get`] registers the read atom as a dependency of
/// the computation being evaluated.
pub struct Eval<'a> {
    store: &'a Store,
    deps: Vec<NodeId>,
}

impl<'a> Eval<'a> {
    /// Read an atom, registering it as a dependency of the current computation.
    pub fn get<T: Clone + Send + 'static>(&mut self, atom: &Atom<T>) -> T {
        self.deps.push(atom.id);
        self.store.get(atom)
    }
}

/// Subscription guard; dropping it (or calling `unsubscribe`) removes the listener.
pub struct Subscription {
    store: Store,
    node: NodeId,
    sub: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut inner = self.store.lock();
        if let Some(node) = inner.nodes.get_mut(&self.node) {
            node.subscribers.remove(&self.sub);
        }
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a plain atom holding `initial`.
    pub fn atom<T>(&self, initial: T) -> Atom<T>
    where
        T: PartialEq + Send + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_node;
        inner.next_node += 1;
        inner.nodes.insert(
            id,
            Node {
                value: Some(Box::new(initial)),
                compute: None,
                is_computed: false,
                dirty: false,
                changed_since_notify: false,
                deps: HashSet::new(),
                dependents: HashSet::new(),
                subscribers: HashMap::new(),
                eq: eq_fn::<T>(),
            },
        );
        Atom {
            id,
            _marker: PhantomData,
        }
    }

    /// Create a computed atom.
    ///
    /// The compute function is evaluated once immediately (priming the cache and
    /// recording initial dependency edges) and thereafter lazily whenever a
    /// dependency has changed since the last read.
    pub fn computed<T, F>(&self, f: F) -> Atom<T>
    where
        T: PartialEq + Send + 'static,
        F: Fn(&mut Eval<'_>) -> T + Send + 'static,
    {
        let compute: ComputeFn = Box::new(move |eval| Box::new(f(eval)) as Box<dyn Any + Send>);
        let id = {
            let mut inner = self.lock();
            let id = inner.next_node;
            inner.next_node += 1;
            inner.nodes.insert(
                id,
                Node {
                    value: None,
                    compute: Some(compute),
                    is_computed: true,
                    dirty: true,
                    changed_since_notify: false,
                    deps: HashSet::new(),
                    dependents: HashSet::new(),
                    subscribers: HashMap::new(),
                    eq: eq_fn::<T>(),
                },
            );
            id
        };
        self.recompute(id);
        {
            // The priming evaluation is the initial value, not a change.
            let mut inner = self.lock();
            if let Some(node) = inner.nodes.get_mut(&id) {
                node.changed_since_notify = false;
            }
        }
        Atom {
            id,
            _marker: PhantomData,
        }
    }

    /// Read an atom's current value (untracked).
    ///
    /// Computed atoms are recomputed first if any dependency changed since the
    /// last read.
    pub fn get<T: Clone + Send + 'static>(&self, atom: &Atom<T>) -> T {
        self.ensure_fresh(atom.id);
        let inner = self.lock();
        let node = inner
            .nodes
            .get(&atom.id)
            .expect("atom read from a different store");
        node.value
            .as_ref()
            .and_then(|v| v.downcast_ref::<T>())
            .expect("atom value type mismatch")
            .clone()
    }

    /// Write a plain atom.
    ///
    /// Writing a value equal to the current one is a no-op. Dependents are
    /// flagged dirty and subscribers notified once the enclosing transaction
    /// (if any) completes.
    pub fn set<T>(&self, atom: &Atom<T>, value: T) -> Result<(), StoreError>
    where
        T: PartialEq + Send + 'static,
    {
        let should_flush = {
            let mut inner = self.lock();
            if inner.eval_stack.contains(&atom.id) || inner.notifying.contains(&atom.id) {
                return Err(StoreError::CyclicUpdate);
            }
            let node = inner
                .nodes
                .get_mut(&atom.id)
                .expect("atom written to a different store");
            let changed = match &node.value {
                Some(old) => !(node.eq)(old.as_ref(), &value),
                None => true,
            };
            if !changed {
                return Ok(());
            }
            node.value = Some(Box::new(value));
            node.changed_since_notify = true;
            Self::invalidate(&mut inner, atom.id);
            inner.tx_depth == 0 && !inner.flushing
        };
        if should_flush {
            self.flush();
        }
        Ok(())
    }

    /// Run `f` as a transaction: all notifications are deferred until `f`
    /// returns and coalesced so each dependent fires at most once.
    pub fn transaction<R>(&self, f: impl FnOnce() -> R) -> R {
        {
            let mut inner = self.lock();
            inner.tx_depth += 1;
        }
        let result = f();
        let should_flush = {
            let mut inner = self.lock();
            inner.tx_depth -= 1;
            inner.tx_depth == 0 && !inner.flushing
        };
        if should_flush {
            self.flush();
        }
        result
    }

    /// Subscribe to change notifications for an atom (plain or computed).
    pub fn subscribe<T>(
        &self,
        atom: &Atom<T>,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        let mut inner = self.lock();
        let sub = inner.next_sub;
        inner.next_sub += 1;
        if let Some(node) = inner.nodes.get_mut(&atom.id) {
            node.subscribers.insert(sub, Arc::new(listener));
        }
        Subscription {
            store: self.clone(),
            node: atom.id,
            sub,
        }
    }

    /// Flag `id` and its transitive computed dependents as pending/dirty.
    fn invalidate(inner: &mut StoreInner, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if inner.pending_set.insert(current) {
                inner.pending.push(current);
            } else if current != id {
                continue;
            }
            if let Some(node) = inner.nodes.get_mut(&current) {
                if current != id {
                    node.dirty = true;
                }
                stack.extend(node.dependents.iter().copied());
            }
        }
    }

    fn ensure_fresh(&self, id: NodeId) {
        let needs_recompute = {
            let inner = self.lock();
            match inner.nodes.get(&id) {
                Some(node) => node.is_computed && (node.dirty || node.value.is_none()),
                None => false,
            }
        };
        if needs_recompute {
            self.recompute(id);
        }
    }

    /// Recompute a computed node, rebuilding its dependency edges.
    ///
    /// A changed result raises the node's `changed_since_notify` flag; delivery
    /// consumes it.
    fn recompute(&self, id: NodeId) {
        let compute = {
            let mut inner = self.lock();
            if inner.eval_stack.contains(&id) {
                tracing::error!(node = id, "cyclic computed dependency detected");
                return;
            }
            let Some(node) = inner.nodes.get_mut(&id) else {
                return;
            };
            let Some(compute) = node.compute.take() else {
                tracing::error!(node = id, "re-entrant recomputation detected");
                return;
            };
            inner.eval_stack.push(id);
            compute
        };

        let mut eval = Eval {
            store: self,
            deps: Vec::new(),
        };
        let value = compute(&mut eval);

        let mut inner = self.lock();
        inner.eval_stack.pop();
        let new_deps: HashSet<NodeId> = eval.deps.into_iter().collect();
        let old_deps = match inner.nodes.get(&id) {
            Some(node) => node.deps.clone(),
            None => HashSet::new(),
        };
        for dep in old_deps.difference(&new_deps) {
            if let Some(dep_node) = inner.nodes.get_mut(dep) {
                dep_node.dependents.remove(&id);
            }
        }
        for dep in new_deps.difference(&old_deps) {
            if let Some(dep_node) = inner.nodes.get_mut(dep) {
                dep_node.dependents.insert(id);
            }
        }
        let Some(node) = inner.nodes.get_mut(&id) else {
            return;
        };
        node.deps = new_deps;
        node.compute = Some(compute);
        node.dirty = false;
        let changed = match &node.value {
            Some(old) => !(node.eq)(old.as_ref(), value.as_ref()),
            None => true,
        };
        if changed {
            node.value = Some(value);
            node.changed_since_notify = true;
        }
    }

    /// Deliver pending notifications until the queue drains.
    ///
    /// Listeners may write other atoms; those writes re-enter the pending queue
    /// and are delivered in the same drain loop.
    fn flush(&self) {
        {
            let mut inner = self.lock();
            if inner.flushing {
                return;
            }
            inner.flushing = true;
        }
        loop {
            let batch: Vec<NodeId> = {
                let mut inner = self.lock();
                if inner.pending.is_empty() {
                    inner.flushing = false;
                    break;
                }
                inner.pending_set.clear();
                std::mem::take(&mut inner.pending)
            };
            for id in batch {
                self.deliver(id);
            }
        }
    }

    fn deliver(&self, id: NodeId) {
        let (is_computed, dirty, has_subscribers, already_notifying) = {
            let inner = self.lock();
            match inner.nodes.get(&id) {
                Some(node) => (
                    node.is_computed,
                    node.dirty,
                    !node.subscribers.is_empty(),
                    inner.notifying.contains(&id),
                ),
                None => return,
            }
        };
        if already_notifying {
            tracing::warn!(node = id, "skipping re-entrant notification");
            return;
        }
        if is_computed {
            // Unsubscribed computed nodes stay lazily dirty.
            if !has_subscribers {
                return;
            }
            if dirty {
                self.recompute(id);
            }
        }
        // Whether the value changed is tracked on the node, not derived here: a
        // sibling's evaluation may already have freshened this node (clearing
        // `dirty`) before its own delivery runs.
        let listeners: Vec<Listener> = {
            let mut inner = self.lock();
            let pending_change = match inner.nodes.get_mut(&id) {
                Some(node) if !node.subscribers.is_empty() && node.changed_since_notify => {
                    node.changed_since_notify = false;
                    true
                }
                _ => false,
            };
            if !pending_change {
                return;
            }
            inner.notifying.insert(id);
            match inner.nodes.get(&id) {
                Some(node) => node.subscribers.values().cloned().collect(),
                None => Vec::new(),
            }
        };
        for listener in listeners {
            listener();
        }
        let mut inner = self.lock();
        inner.notifying.remove(&id);
    }
}

fn eq_fn<T: PartialEq + 'static>() -> EqFn {
    Box::new(|a, b| match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    })
}
