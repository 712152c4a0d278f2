// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{Resource, ResourceKind, ResourceState};
use crate::barrier::BarrierSet;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{fmt, sync::Arc};

/// A group of vertex buffers that are bound together.
///
/// The set caches the barriers it produced last time its state was changed, so that binding the
/// same buffers again in a later frame does not allocate a new [`BarrierSet`].
pub struct BufferSet {
    buffers: SmallVec<[Arc<Resource>; 4]>,
    transition_barriers: Mutex<Option<Arc<BarrierSet>>>,
}

impl BufferSet {
    /// # Panics
    ///
    /// - Panics if `buffers` is empty.
    /// - Panics if any of the resources is not a buffer.
    pub fn new(buffers: impl IntoIterator<Item = Arc<Resource>>) -> Arc<Self> {
        let buffers: SmallVec<[Arc<Resource>; 4]> = buffers.into_iter().collect();

        assert!(!buffers.is_empty(), "a buffer set needs at least one buffer");

        for buffer in &buffers {
            assert!(
                matches!(buffer.kind(), ResourceKind::Buffer { .. }),
                "resource `{}` is not a buffer",
                buffer.name(),
            );
        }

        Arc::new(BufferSet {
            buffers,
            transition_barriers: Mutex::new(None),
        })
    }

    #[inline]
    pub fn buffers(&self) -> &[Arc<Resource>] {
        &self.buffers
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Requests a transition of every buffer to `state`.
    ///
    /// Returns the barriers that need to be recorded, or `None` if every buffer is already in
    /// `state`.
    pub fn set_state(&self, state: ResourceState) -> Option<Arc<BarrierSet>> {
        let mut barriers = self.transition_barriers.lock();

        for buffer in &self.buffers {
            buffer.set_state_with_barriers(state, &mut barriers);
        }

        barriers
            .as_ref()
            .filter(|barriers| !barriers.is_empty())
            .cloned()
    }
}

impl fmt::Debug for BufferSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.buffers.iter().map(|buffer| buffer.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{resource::BufferCreateInfo, tests::test_context};

    #[test]
    fn cached_barriers_follow_state() {
        let (_, device, _) = test_context!();
        let buffers: Vec<_> = (0..2)
            .map(|_| {
                Resource::buffer(
                    &device,
                    BufferCreateInfo {
                        size: 64,
                        stride: 16,
                        initial_state: ResourceState::CopyDest,
                        ..Default::default()
                    },
                )
                .unwrap()
            })
            .collect();
        let buffer_set = BufferSet::new(buffers.iter().cloned());

        let barriers = buffer_set.set_state(ResourceState::VertexBuffer).unwrap();
        assert_eq!(barriers.len(), 2);

        barriers.apply_transitions();
        assert!(buffers
            .iter()
            .all(|buffer| buffer.state() == ResourceState::VertexBuffer));

        // Already in the requested state: the cached transitions are pruned.
        assert!(buffer_set.set_state(ResourceState::VertexBuffer).is_none());
    }
}
