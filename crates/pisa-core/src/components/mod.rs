//! Reducer-driven anchor-state framework.
//!
//! Every stateful component derives its state by folding a pure reducer
//! over the ancestry of the current chain head. Nothing is remembered
//! between head events: on `NEW_HEAD(prev, head)` the driver finds the
//! common ancestor `A`, seeds the reducer there, folds once along
//! `A → prev` and once along `A → head`, and hands both states to the
//! component's edge handler.
//!
//! ```text
//!              fold ────────►  S_prev
//!       A ── ── prev
//!  seed ┤
//!       A ── ── ── ── head
//!              fold ────────►  S_head
//! ```
//!
//! Because both states are pure functions of their tips, a reorganisation
//! needs no undo logic: the abandoned branch's effects were only ever edge
//! transitions, and the edges simply do not fire on the new branch unless
//! its blocks reproduce them.
//!
//! Side effects happen exclusively in [`StateEventHandler`] on the diff of
//! the two states, so "what have we already done" is never tracked, only
//! "what does the chain currently say".

use crate::{cache::BlockCache, types::Block};
use async_trait::async_trait;
use std::{collections::HashMap, hash::Hash, sync::Arc};
use tracing::{error, warn};

/// A pure, synchronous reducer producing a component's anchor state.
pub trait StateReducer: Send + Sync {
    type State: Clone + Send + Sync;

    /// Seeds the state at an anchor block. May consult the cache for
    /// ancestry below the anchor, but must be deterministic for a fixed
    /// cache content.
    fn initial_state(&self, block: &Block) -> Self::State;

    /// Advances the state across one block.
    fn reduce(&self, prev: &Self::State, block: &Block) -> Self::State;
}

/// Receives the two anchor states of a head event, plus the tip blocks
/// the confirmation-depth edges are measured against.
#[async_trait]
pub trait StateEventHandler<S>: Send + Sync {
    async fn handle_new_state_event(
        &self,
        prev_state: &S,
        prev: &Block,
        new_state: &S,
        head: &Block,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
impl<S, T> StateEventHandler<S> for Arc<T>
where
    S: Send + Sync,
    T: StateEventHandler<S> + ?Sized,
{
    async fn handle_new_state_event(
        &self,
        prev_state: &S,
        prev: &Block,
        new_state: &S,
        head: &Block,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).handle_new_state_event(prev_state, prev, new_state, head).await
    }
}

/// Anything dispatched by the `BlockProcessor` on each new head.
///
/// Implementations must swallow their own failures: one component's error
/// never stops the dispatch of the others.
#[async_trait]
pub trait HeadListener: Send + Sync {
    async fn on_new_head(&self, prev: &Arc<Block>, head: &Arc<Block>);
}

/// Lifts a per-key reducer over a keyed collection.
///
/// The key set is supplied by a closure (typically a store snapshot) and
/// fetched per fold step. All reducer calls of one head event run in a
/// single synchronous stretch, so every call within the event observes the
/// same snapshot; keys added later are seeded on the next event, keys
/// removed in between simply drop out of the folded map.
pub struct MappedStateReducer<K, R, F>
where
    R: StateReducer,
    F: Fn() -> Vec<(K, R)> + Send + Sync,
{
    get_items: F,
    _marker: std::marker::PhantomData<fn() -> (K, R)>,
}

impl<K, R, F> MappedStateReducer<K, R, F>
where
    R: StateReducer,
    F: Fn() -> Vec<(K, R)> + Send + Sync,
{
    pub fn new(get_items: F) -> Self {
        Self { get_items, _marker: std::marker::PhantomData }
    }
}

impl<K, R, F> StateReducer for MappedStateReducer<K, R, F>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: StateReducer,
    F: Fn() -> Vec<(K, R)> + Send + Sync,
{
    type State = HashMap<K, R::State>;

    fn initial_state(&self, block: &Block) -> Self::State {
        (self.get_items)()
            .into_iter()
            .map(|(key, reducer)| {
                let state = reducer.initial_state(block);
                (key, state)
            })
            .collect()
    }

    fn reduce(&self, prev: &Self::State, block: &Block) -> Self::State {
        (self.get_items)()
            .into_iter()
            .map(|(key, reducer)| {
                let state = match prev.get(&key) {
                    Some(prev_state) => reducer.reduce(prev_state, block),
                    // Key surfaced mid-fold (should not happen within one
                    // event); seed it at this block rather than dropping it.
                    None => reducer.initial_state(block),
                };
                (key, state)
            })
            .collect()
    }
}

/// Binds a reducer and an edge handler into a dispatchable component.
pub struct Component<R, H>
where
    R: StateReducer,
    H: StateEventHandler<R::State>,
{
    name: &'static str,
    cache: Arc<BlockCache>,
    reducer: R,
    handler: H,
}

impl<R, H> Component<R, H>
where
    R: StateReducer,
    H: StateEventHandler<R::State>,
{
    pub fn new(name: &'static str, cache: Arc<BlockCache>, reducer: R, handler: H) -> Self {
        Self { name, cache, reducer, handler }
    }

    /// Folds the reducer from `ancestor` (seed, exclusive) to `tip`
    /// (inclusive). `None` when the path is not in the cache; the
    /// processor contract guarantees it is, so a miss is a bug upstream.
    fn anchor_state(&self, ancestor: &Block, tip: &Block) -> Option<R::State> {
        let path = self.cache.chain_between(&ancestor.hash, &tip.hash)?;
        let mut state = self.reducer.initial_state(ancestor);
        for block in &path {
            state = self.reducer.reduce(&state, block);
        }
        Some(state)
    }
}

#[async_trait]
impl<R, H> HeadListener for Component<R, H>
where
    R: StateReducer,
    H: StateEventHandler<R::State>,
{
    async fn on_new_head(&self, prev: &Arc<Block>, head: &Arc<Block>) {
        let Some(ancestor) = self.cache.common_ancestor(&prev.hash, &head.hash) else {
            error!(
                component = self.name,
                prev = prev.number,
                head = head.number,
                "no common ancestor in cache; skipping head event"
            );
            return;
        };

        let (Some(prev_state), Some(new_state)) =
            (self.anchor_state(&ancestor, prev), self.anchor_state(&ancestor, head))
        else {
            error!(
                component = self.name,
                ancestor = ancestor.number,
                "ancestor path missing from cache; skipping head event"
            );
            return;
        };

        if let Err(err) = self
            .handler
            .handle_new_state_event(&prev_state, prev, &new_state, head)
            .await
        {
            // One component failing must not starve the others.
            warn!(component = self.name, head = head.number, error = %err, "state event handler failed");
        }
    }
}
