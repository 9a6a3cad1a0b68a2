//! Stale-while-revalidate cell.
//!
//! On a key change the last-good value stays readable and is flagged stale
//! while a background refresh runs. Only the refresh started last may
//! replace it; responses for an older key are dropped.

use parking_lot::Mutex;
use std::fmt::Debug;

/// Proof that a refresh was started. Resolving with an outdated ticket is a no-op.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshTicket<K> {
    key: K,
    generation: u64,
}

impl<K> RefreshTicket<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// What a reader should render right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot<K, V> {
    /// Key the value is being refreshed for (or was last loaded for).
    pub key: Option<K>,
    /// Last-good value, possibly belonging to the previous key.
    pub value: Option<V>,
    pub stale: bool,
    pub refreshing: bool,
}

struct State<K, V> {
    key: Option<K>,
    value: Option<V>,
    stale: bool,
    generation: u64,
    in_flight: bool,
}

pub struct Revalidating<K, V> {
    state: Mutex<State<K, V>>,
}

impl<K, V> Default for Revalidating<K, V> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                key: None,
                value: None,
                stale: false,
                generation: 0,
                in_flight: false,
            }),
        }
    }
}

impl<K, V> Revalidating<K, V>
where
    K: Clone + PartialEq + Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a fresh value, e.g. from a synchronous cache hit. Supersedes any
    /// refresh in flight.
    pub fn set(&self, key: K, value: V) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.key = Some(key);
        state.value = Some(value);
        state.stale = false;
        state.in_flight = false;
    }

    /// Start a refresh for `key`. The current value stays visible and is
    /// marked stale; nothing is evicted.
    pub fn revalidate(&self, key: K) -> RefreshTicket<K> {
        let mut state = self.state.lock();
        state.generation += 1;
        state.key = Some(key.clone());
        state.stale = state.value.is_some();
        state.in_flight = true;
        tracing::debug!(key = ?key, generation = state.generation, "revalidating");
        RefreshTicket {
            key,
            generation: state.generation,
        }
    }

    /// Apply a refresh result. Returns false when the ticket was superseded.
    pub fn resolve(&self, ticket: &RefreshTicket<K>, value: V) -> bool {
        let mut state = self.state.lock();
        if state.generation != ticket.generation {
            tracing::debug!(
                key = ?ticket.key,
                ticket = ticket.generation,
                current = state.generation,
                "dropping superseded refresh result"
            );
            return false;
        }
        state.value = Some(value);
        state.stale = false;
        state.in_flight = false;
        true
    }

    /// A refresh failed. The stale value stays on screen.
    pub fn fail(&self, ticket: &RefreshTicket<K>) -> bool {
        let mut state = self.state.lock();
        if state.generation != ticket.generation {
            return false;
        }
        state.in_flight = false;
        true
    }

    pub fn is_current(&self, ticket: &RefreshTicket<K>) -> bool {
        self.state.lock().generation == ticket.generation
    }

    pub fn value(&self) -> Option<V> {
        self.state.lock().value.clone()
    }

    pub fn is_stale(&self) -> bool {
        self.state.lock().stale
    }

    pub fn snapshot(&self) -> Snapshot<K, V> {
        let state = self.state.lock();
        Snapshot {
            key: state.key.clone(),
            value: state.value.clone(),
            stale: state.stale,
            refreshing: state.in_flight,
        }
    }
}
