// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A minimal event emitter with token-based subscriptions.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Identifies a subscription to an [`Emitter`]. Pass it to [`Emitter::unsubscribe`] to stop
/// receiving events.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "the subscription can only be cancelled with its token"]
pub struct SubscriptionToken(u64);

/// Sends events to every subscribed listener.
///
/// Listeners are called on the thread that emits the event, in subscription order. They may
/// subscribe or unsubscribe listeners, including themselves, while being called; such changes
/// take effect from the next event on.
pub struct Emitter<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener<E>)>>,
}

impl<E> Emitter<E> {
    #[inline]
    pub fn new() -> Self {
        Emitter {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));

        SubscriptionToken(id)
    }

    /// Returns whether the subscription was still active.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut listeners = self.listeners.lock();
        let len = listeners.len();
        listeners.retain(|(id, _)| *id != token.0);

        listeners.len() != len
    }

    #[inline]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn emit(&self, event: &E) {
        let listeners: SmallVec<[Listener<E>; 4]> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(event);
        }
    }
}

impl<E> Default for Emitter<E> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listener_count", &self.listener_count())
            .finish_non_exhaustive()
    }
}
