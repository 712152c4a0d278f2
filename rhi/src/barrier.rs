// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Resource barriers and sets of them.
//!
//! A [`Barrier`] describes either a state transition or an ownership transfer between queue
//! families of one resource. A [`BarrierSet`] holds at most one barrier of each kind per
//! resource; adding a barrier for a resource that already has one of the same kind replaces it.

use crate::{
    device::QueueFamilyIndex,
    resource::{Resource, ResourceId, ResourceState},
};
use log::warn;
use parking_lot::Mutex;
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, Weak},
};

/// The kind of a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BarrierType {
    StateTransition,
    OwnerTransition,
}

/// Identifies a barrier within a [`BarrierSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BarrierId {
    barrier_type: BarrierType,
    resource_id: ResourceId,
}

impl BarrierId {
    #[inline]
    pub fn new(barrier_type: BarrierType, resource_id: ResourceId) -> Self {
        BarrierId {
            barrier_type,
            resource_id,
        }
    }

    #[inline]
    pub fn barrier_type(&self) -> BarrierType {
        self.barrier_type
    }

    #[inline]
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }
}

/// A transition between two resource states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateChange {
    pub before: ResourceState,
    pub after: ResourceState,
}

/// A transfer of ownership between two queue families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerChange {
    pub before: QueueFamilyIndex,
    pub after: QueueFamilyIndex,
}

/// What a barrier changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BarrierChange {
    State(StateChange),
    Owner(OwnerChange),
}

impl BarrierChange {
    #[inline]
    pub fn barrier_type(&self) -> BarrierType {
        match self {
            BarrierChange::State(_) => BarrierType::StateTransition,
            BarrierChange::Owner(_) => BarrierType::OwnerTransition,
        }
    }

    /// Returns the change of doing `self` and then `next`, if `next` starts where `self` ends.
    pub fn then(self, next: BarrierChange) -> Option<BarrierChange> {
        match (self, next) {
            (BarrierChange::State(first), BarrierChange::State(second))
                if first.after == second.before =>
            {
                Some(BarrierChange::State(StateChange {
                    before: first.before,
                    after: second.after,
                }))
            }
            (BarrierChange::Owner(first), BarrierChange::Owner(second))
                if first.after == second.before =>
            {
                Some(BarrierChange::Owner(OwnerChange {
                    before: first.before,
                    after: second.after,
                }))
            }
            _ => None,
        }
    }

    /// Returns whether the change leaves the resource as it was.
    #[inline]
    pub fn is_identity(&self) -> bool {
        match self {
            BarrierChange::State(change) => change.before == change.after,
            BarrierChange::Owner(change) => change.before == change.after,
        }
    }
}

/// A single state transition or ownership transfer of a resource.
///
/// The barrier only weakly references its resource. Barriers of resources that have been
/// dropped are skipped and pruned when their set is applied.
#[derive(Clone)]
pub struct Barrier {
    id: BarrierId,
    change: BarrierChange,
    resource: Weak<Resource>,
}

impl Barrier {
    /// Creates a transition of `resource` from `before` to `after`.
    pub fn state_transition(
        resource: &Arc<Resource>,
        before: ResourceState,
        after: ResourceState,
    ) -> Self {
        Barrier::new(resource, BarrierChange::State(StateChange { before, after }))
    }

    /// Creates an ownership transfer of `resource` from queue family `before` to `after`.
    pub fn owner_transition(
        resource: &Arc<Resource>,
        before: QueueFamilyIndex,
        after: QueueFamilyIndex,
    ) -> Self {
        Barrier::new(resource, BarrierChange::Owner(OwnerChange { before, after }))
    }

    fn new(resource: &Arc<Resource>, change: BarrierChange) -> Self {
        Barrier {
            id: BarrierId::new(change.barrier_type(), resource.id()),
            change,
            resource: Arc::downgrade(resource),
        }
    }

    #[inline]
    pub fn id(&self) -> BarrierId {
        self.id
    }

    #[inline]
    pub fn change(&self) -> BarrierChange {
        self.change
    }

    #[inline]
    pub fn state_change(&self) -> Option<StateChange> {
        match self.change {
            BarrierChange::State(change) => Some(change),
            BarrierChange::Owner(_) => None,
        }
    }

    #[inline]
    pub fn owner_change(&self) -> Option<OwnerChange> {
        match self.change {
            BarrierChange::Owner(change) => Some(change),
            BarrierChange::State(_) => None,
        }
    }

    /// Returns the resource, unless it has been dropped.
    #[inline]
    pub fn resource(&self) -> Option<Arc<Resource>> {
        self.resource.upgrade()
    }
}

impl PartialEq for Barrier {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.change == other.change
    }
}

impl Eq for Barrier {}

impl PartialOrd for Barrier {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Barrier {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        (self.id, self.change).cmp(&(other.id, other.change))
    }
}

impl Hash for Barrier {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.change.hash(state);
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("id", &self.id)
            .field("change", &self.change)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resource() {
            Some(resource) => write!(f, "resource `{}`", resource.name())?,
            None => write!(f, "released resource {}", self.id.resource_id)?,
        }

        match self.change {
            BarrierChange::State(StateChange { before, after }) => {
                write!(f, " state transition from {before:?} to {after:?}")
            }
            BarrierChange::Owner(OwnerChange { before, after }) => {
                write!(f, " ownership transfer from queue family {before} to {after}")
            }
        }
    }
}

/// The outcome of adding a barrier to a [`BarrierSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddResult {
    /// There was no barrier with the same id.
    Added,

    /// An identical barrier was already in the set.
    Existing,

    /// A barrier with the same id but a different change was replaced.
    Updated,
}

/// A set of barriers, keyed by [`BarrierId`].
///
/// All operations take `&self`; the set can be shared between threads. Iteration happens in
/// [`BarrierId`] order.
#[derive(Default)]
pub struct BarrierSet {
    barriers: Mutex<BTreeMap<BarrierId, Barrier>>,
}

impl BarrierSet {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set from the given barriers. Later barriers replace earlier ones with the same
    /// id.
    pub fn from_barriers(barriers: impl IntoIterator<Item = Barrier>) -> Self {
        BarrierSet {
            barriers: Mutex::new(
                barriers
                    .into_iter()
                    .map(|barrier| (barrier.id, barrier))
                    .collect(),
            ),
        }
    }

    /// Creates a set of the same transition and/or transfer for every one of `resources`.
    pub fn create_transitions(
        resources: &[Arc<Resource>],
        state_change: Option<StateChange>,
        owner_change: Option<OwnerChange>,
    ) -> Self {
        let barriers = resources.iter().flat_map(|resource| {
            let state = state_change.map(|StateChange { before, after }| {
                Barrier::state_transition(resource, before, after)
            });
            let owner = owner_change.map(|OwnerChange { before, after }| {
                Barrier::owner_transition(resource, before, after)
            });

            state.into_iter().chain(owner)
        });

        BarrierSet::from_barriers(barriers)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.barriers.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.barriers.lock().is_empty()
    }

    /// Returns a snapshot of the barriers in the set.
    pub fn barriers(&self) -> Vec<Barrier> {
        self.barriers.lock().values().cloned().collect()
    }

    /// Returns the barrier with the given id.
    pub fn get(&self, id: BarrierId) -> Option<Barrier> {
        self.barriers.lock().get(&id).cloned()
    }

    /// Adds a barrier, replacing the barrier with the same id if there is one.
    pub fn add(&self, barrier: Barrier) -> AddResult {
        let mut barriers = self.barriers.lock();

        match barriers.get_mut(&barrier.id) {
            None => {
                barriers.insert(barrier.id, barrier);

                AddResult::Added
            }
            Some(existing) if existing.change == barrier.change => AddResult::Existing,
            Some(existing) => {
                *existing = barrier;

                AddResult::Updated
            }
        }
    }

    /// Adds a barrier that executes after the barriers already in the set.
    ///
    /// If the set holds a barrier of the same id that ends where `barrier` starts, the two are
    /// combined into one barrier covering both, and dropped if the combination changes nothing.
    /// Otherwise this behaves like [`add`](Self::add).
    pub fn add_following(&self, barrier: Barrier) -> AddResult {
        let mut barriers = self.barriers.lock();

        let Some(existing) = barriers.get_mut(&barrier.id) else {
            barriers.insert(barrier.id, barrier);

            return AddResult::Added;
        };

        if existing.change == barrier.change {
            return AddResult::Existing;
        }

        match existing.change.then(barrier.change) {
            Some(combined) if combined.is_identity() => {
                barriers.remove(&barrier.id);
            }
            Some(combined) => existing.change = combined,
            None => *existing = barrier,
        }

        AddResult::Updated
    }

    /// Adds a state transition of `resource`.
    #[inline]
    pub fn add_state_transition(
        &self,
        resource: &Arc<Resource>,
        before: ResourceState,
        after: ResourceState,
    ) -> AddResult {
        self.add(Barrier::state_transition(resource, before, after))
    }

    /// Adds an ownership transfer of `resource`.
    #[inline]
    pub fn add_owner_transition(
        &self,
        resource: &Arc<Resource>,
        before: QueueFamilyIndex,
        after: QueueFamilyIndex,
    ) -> AddResult {
        self.add(Barrier::owner_transition(resource, before, after))
    }

    /// Removes the barrier with the given id. Returns whether there was one.
    #[inline]
    pub fn remove(&self, id: BarrierId) -> bool {
        self.barriers.lock().remove(&id).is_some()
    }

    #[inline]
    pub fn remove_state_transition(&self, resource: &Resource) -> bool {
        self.remove(BarrierId::new(BarrierType::StateTransition, resource.id()))
    }

    #[inline]
    pub fn remove_owner_transition(&self, resource: &Resource) -> bool {
        self.remove(BarrierId::new(BarrierType::OwnerTransition, resource.id()))
    }

    /// Returns whether the set holds exactly this state transition of `resource`.
    pub fn has_state_transition(
        &self,
        resource: &Resource,
        before: ResourceState,
        after: ResourceState,
    ) -> bool {
        self.get(BarrierId::new(BarrierType::StateTransition, resource.id()))
            .is_some_and(|barrier| barrier.state_change() == Some(StateChange { before, after }))
    }

    /// Returns whether the set holds exactly this ownership transfer of `resource`.
    pub fn has_owner_transition(
        &self,
        resource: &Resource,
        before: QueueFamilyIndex,
        after: QueueFamilyIndex,
    ) -> bool {
        self.get(BarrierId::new(BarrierType::OwnerTransition, resource.id()))
            .is_some_and(|barrier| barrier.owner_change() == Some(OwnerChange { before, after }))
    }

    /// Removes every barrier from the set.
    #[inline]
    pub fn clear(&self) {
        self.barriers.lock().clear();
    }

    /// Commits the effect of every barrier to its resource.
    ///
    /// Barriers whose resource has been dropped are skipped and removed from the set. The
    /// remaining barriers stay in the set.
    ///
    /// # Panics
    ///
    /// - Panics if a resource is not in the state or owned by the queue family that its barrier
    ///   transitions from.
    pub fn apply_transitions(&self) {
        self.barriers.lock().retain(|_, barrier| match barrier.resource() {
            Some(resource) => {
                resource.apply_barrier_change(barrier.change);

                true
            }
            None => {
                warn!("pruning {barrier} of a resource that has been dropped");

                false
            }
        });
    }
}

impl Clone for BarrierSet {
    fn clone(&self) -> Self {
        BarrierSet {
            barriers: Mutex::new(self.barriers.lock().clone()),
        }
    }
}

impl FromIterator<Barrier> for BarrierSet {
    fn from_iter<T: IntoIterator<Item = Barrier>>(iter: T) -> Self {
        BarrierSet::from_barriers(iter)
    }
}

impl fmt::Debug for BarrierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.barriers.lock().values()).finish()
    }
}

impl fmt::Display for BarrierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let barriers = self.barriers.lock();

        if barriers.is_empty() {
            return f.write_str("no barriers");
        }

        for (index, barrier) in barriers.values().enumerate() {
            if index != 0 {
                f.write_str("; ")?;
            }

            fmt::Display::fmt(barrier, f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{resource::BufferCreateInfo, tests::test_context, Device};

    fn buffer(device: &Arc<Device>, name: &str) -> Arc<Resource> {
        Resource::buffer(
            device,
            BufferCreateInfo {
                name: name.to_owned(),
                size: 16,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn add_reports_outcome() {
        let (_, device, _) = test_context!();
        let buffer = buffer(&device, "Buffer");
        let barriers = BarrierSet::new();

        assert_eq!(
            barriers.add_state_transition(&buffer, ResourceState::Common, ResourceState::CopyDest),
            AddResult::Added,
        );
        assert_eq!(
            barriers.add_state_transition(&buffer, ResourceState::Common, ResourceState::CopyDest),
            AddResult::Existing,
        );
        assert_eq!(
            barriers.add_state_transition(
                &buffer,
                ResourceState::Common,
                ResourceState::ShaderResource
            ),
            AddResult::Updated,
        );
        assert_eq!(
            barriers.add_owner_transition(&buffer, QueueFamilyIndex(0), QueueFamilyIndex(2)),
            AddResult::Added,
        );

        assert_eq!(barriers.len(), 2);
        assert!(barriers.has_state_transition(
            &buffer,
            ResourceState::Common,
            ResourceState::ShaderResource
        ));
        assert!(!barriers.has_state_transition(
            &buffer,
            ResourceState::Common,
            ResourceState::CopyDest
        ));

        assert!(barriers.remove_owner_transition(&buffer));
        assert!(!barriers.remove_owner_transition(&buffer));
        assert_eq!(barriers.len(), 1);
    }

    #[test]
    fn create_transitions_for_every_resource() {
        let (_, device, _) = test_context!();
        let resources = [buffer(&device, "A"), buffer(&device, "B")];

        let barriers = BarrierSet::create_transitions(
            &resources,
            Some(StateChange {
                before: ResourceState::Common,
                after: ResourceState::CopySource,
            }),
            Some(OwnerChange {
                before: QueueFamilyIndex(2),
                after: QueueFamilyIndex(0),
            }),
        );

        assert_eq!(barriers.len(), 4);
        assert!(barriers.has_owner_transition(
            &resources[1],
            QueueFamilyIndex(2),
            QueueFamilyIndex(0)
        ));
    }

    #[test]
    fn apply_prunes_dropped_resources() {
        let (_, device, _) = test_context!();
        let kept = buffer(&device, "Kept");
        let dropped = buffer(&device, "Dropped");
        let barriers = BarrierSet::new();
        barriers.add_state_transition(&kept, ResourceState::Common, ResourceState::CopyDest);
        barriers.add_state_transition(&dropped, ResourceState::Common, ResourceState::CopyDest);

        drop(dropped);
        barriers.apply_transitions();

        assert_eq!(barriers.len(), 1);
        assert_eq!(kept.state(), ResourceState::CopyDest);
        assert_eq!(
            barriers.to_string(),
            "resource `Kept` state transition from Common to CopyDest",
        );
    }

    #[test]
    fn following_barriers_are_combined() {
        let (_, device, _) = test_context!();
        let buffer = buffer(&device, "Buffer");
        let barriers = BarrierSet::new();

        barriers.add_following(Barrier::state_transition(
            &buffer,
            ResourceState::Common,
            ResourceState::CopyDest,
        ));
        assert_eq!(
            barriers.add_following(Barrier::state_transition(
                &buffer,
                ResourceState::CopyDest,
                ResourceState::ShaderResource,
            )),
            AddResult::Updated,
        );
        assert!(barriers.has_state_transition(
            &buffer,
            ResourceState::Common,
            ResourceState::ShaderResource
        ));

        barriers.add_following(Barrier::state_transition(
            &buffer,
            ResourceState::ShaderResource,
            ResourceState::Common,
        ));
        assert!(barriers.is_empty());
    }

    #[test]
    fn barriers_are_added_from_several_threads() {
        let (_, device, _) = test_context!();
        let buffers: Vec<_> = (0..64)
            .map(|index| buffer(&device, &format!("Buffer {index}")))
            .collect();
        let barriers = BarrierSet::new();
        let shared = &buffers[0];

        std::thread::scope(|scope| {
            for chunk in buffers.chunks(8) {
                let barriers = &barriers;

                scope.spawn(move || {
                    for buffer in chunk {
                        barriers.add_state_transition(
                            buffer,
                            ResourceState::Common,
                            ResourceState::CopyDest,
                        );
                        barriers.add_owner_transition(
                            buffer,
                            QueueFamilyIndex(0),
                            QueueFamilyIndex(1),
                        );
                    }

                    // Every thread also adds the same transition of a shared buffer.
                    barriers.add_state_transition(
                        shared,
                        ResourceState::Common,
                        ResourceState::CopyDest,
                    );
                });
            }
        });

        assert_eq!(barriers.len(), 128);

        for buffer in &buffers {
            buffer.set_owner_queue_family(QueueFamilyIndex(0));
        }

        barriers.apply_transitions();
        assert!(buffers.iter().all(|buffer| {
            buffer.state() == ResourceState::CopyDest
                && buffer.owner_queue_family() == Some(QueueFamilyIndex(1))
        }));
    }

    #[test]
    #[should_panic = "was recorded from another state"]
    fn stale_apply_panics() {
        let (_, device, _) = test_context!();
        let buffer = buffer(&device, "Buffer");
        let barriers = BarrierSet::new();
        barriers.add_state_transition(&buffer, ResourceState::Common, ResourceState::CopyDest);

        barriers.apply_transitions();
        barriers.apply_transitions();
    }
}
