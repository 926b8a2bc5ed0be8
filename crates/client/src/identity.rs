use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatorbit_core::SenderId;
use futures::FutureExt;
use futures::future::Shared;

use crate::backend::BoxFuture;
use crate::error::ClientResult;

/// Remote lookup of a display name for an opaque sender id.
pub trait IdentityLookup: Send + Sync {
    fn lookup<'a>(&'a self, sender_id: &'a SenderId) -> BoxFuture<'a, ClientResult<String>>;
}

type SharedLookup = Shared<BoxFuture<'static, Option<String>>>;

struct InFlight {
    generation: u64,
    lookup: SharedLookup,
}

#[derive(Default)]
struct ResolverState {
    names: HashMap<SenderId, String>,
    in_flight: HashMap<SenderId, InFlight>,
    next_generation: u64,
}

/// Sender id to display name resolution with caching and request coalescing.
///
/// Create one per process and hand out `Arc` clones; the cache is keyed by
/// sender id only, so it is shared by every room view. Successful names are
/// kept for the life of the instance. Failures are not cached: the caller gets
/// the raw id and the next call retries.
pub struct IdentityResolver {
    lookup: Arc<dyn IdentityLookup>,
    state: Mutex<ResolverState>,
}

impl IdentityResolver {
    pub fn new(lookup: Arc<dyn IdentityLookup>) -> Self {
        Self {
            lookup,
            state: Mutex::new(ResolverState::default()),
        }
    }

    /// Synchronous answer when no lookup is needed.
    ///
    /// Ids that do not look opaque are returned as-is.
    pub fn cached(&self, sender_id: &SenderId) -> Option<String> {
        if !sender_id.is_opaque() {
            return Some(sender_id.to_string());
        }
        self.lock_state().names.get(sender_id).cloned()
    }

    pub fn is_pending(&self, sender_id: &SenderId) -> bool {
        self.lock_state().in_flight.contains_key(sender_id)
    }

    /// Resolves a display name, attaching to an in-flight lookup for the same id.
    pub async fn resolve(&self, sender_id: &SenderId) -> String {
        if !sender_id.is_opaque() {
            return sender_id.to_string();
        }

        let (generation, lookup) = {
            let mut state = self.lock_state();
            if let Some(name) = state.names.get(sender_id) {
                return name.clone();
            }

            match state.in_flight.get(sender_id) {
                Some(in_flight) => (in_flight.generation, in_flight.lookup.clone()),
                None => {
                    let generation = state.next_generation;
                    state.next_generation += 1;
                    let lookup = self.start_lookup(sender_id.clone());
                    state.in_flight.insert(
                        sender_id.clone(),
                        InFlight {
                            generation,
                            lookup: lookup.clone(),
                        },
                    );
                    (generation, lookup)
                }
            }
        };

        let outcome = lookup.await;

        let mut state = self.lock_state();
        // Only the generation we attached to may be retired; a retry may already own the slot.
        if state
            .in_flight
            .get(sender_id)
            .is_some_and(|in_flight| in_flight.generation == generation)
        {
            state.in_flight.remove(sender_id);
        }

        match outcome {
            Some(name) => state
                .names
                .entry(sender_id.clone())
                .or_insert(name)
                .clone(),
            None => sender_id.to_string(),
        }
    }

    fn start_lookup(&self, sender_id: SenderId) -> SharedLookup {
        let lookup = Arc::clone(&self.lookup);
        let future: BoxFuture<'static, Option<String>> = Box::pin(async move {
            match lookup.lookup(&sender_id).await {
                Ok(name) => {
                    tracing::debug!(sender_id = %sender_id, name = %name, "resolved sender identity");
                    Some(name)
                }
                Err(error) => {
                    tracing::warn!(
                        sender_id = %sender_id,
                        error = %error,
                        "identity lookup failed; showing raw id"
                    );
                    None
                }
            }
        });
        future.shared()
    }

    fn lock_state(&self) -> MutexGuard<'_, ResolverState> {
        // Critical sections never panic midway, so a poisoned map is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
