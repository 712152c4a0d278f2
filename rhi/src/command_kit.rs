// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Command kits, which bundle a queue with the lists and fences recorded for it.

use crate::{
    command_list::{
        AnyCommandList, CommandListId, CommandListObject, CommandListSet, CommandListState,
        CommandListType,
    },
    device::{Device, QueueFamilyIndex},
    queue::CommandQueue,
    sync::Fence,
    DeviceError,
};
use foldhash::HashMap;
use log::trace;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{fmt, sync::Arc};

type ListSetKey = (SmallVec<[CommandListId; 4]>, Option<u32>);

/// A queue together with command lists and fences that are created on demand.
///
/// Lists are identified by [`CommandListId`] and are created the first time they are requested.
/// Sets of lists and fences are cached as well, so a kit can be used every frame without
/// creating new objects.
pub struct CommandKit {
    name: String,
    list_type: CommandListType,
    queue: Arc<CommandQueue>,
    executor: Arc<rayon::ThreadPool>,
    lists: Mutex<HashMap<CommandListId, AnyCommandList>>,
    list_sets: Mutex<HashMap<ListSetKey, Arc<CommandListSet>>>,
    fences: Mutex<HashMap<u32, Arc<Fence>>>,
}

impl CommandKit {
    /// The fence used to wait for the kit's queue from the host.
    pub const DEFAULT_FENCE_ID: u32 = u32::MAX;

    /// The fence used to order the kit's queue around resource uploads.
    pub const UPLOAD_SYNC_FENCE_ID: u32 = u32::MAX - 1;

    /// Creates a kit recording lists of `list_type` for an existing queue.
    ///
    /// # Panics
    ///
    /// - Panics if `queue` can not execute lists of `list_type`.
    pub fn new(
        queue: Arc<CommandQueue>,
        list_type: CommandListType,
        executor: Arc<rayon::ThreadPool>,
    ) -> Self {
        assert!(
            list_type.is_supported_by(queue.list_type()),
            "{list_type:?} command lists can not be executed on {:?} queue `{}`",
            queue.list_type(),
            queue.name(),
        );

        CommandKit {
            name: format!("{} Kit", queue.name()),
            list_type,
            queue,
            executor,
            lists: Mutex::default(),
            list_sets: Mutex::default(),
            fences: Mutex::default(),
        }
    }

    /// Creates a kit with a new queue of `list_type` on the given queue family.
    pub fn with_new_queue(
        device: &Arc<Device>,
        list_type: CommandListType,
        queue_family_index: QueueFamilyIndex,
        name: impl Into<String>,
        executor: Arc<rayon::ThreadPool>,
    ) -> Result<Self, DeviceError> {
        let queue = CommandQueue::new(device, list_type, queue_family_index, name)?;

        Ok(CommandKit::new(queue, list_type, executor))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }

    #[inline]
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Returns whether the list with the given id has been created.
    #[inline]
    pub fn has_list(&self, id: CommandListId) -> bool {
        self.lists.lock().contains_key(&id)
    }

    /// Returns whether the list with the given id has been created and is in `state`.
    pub fn has_list_with_state(&self, id: CommandListId, state: CommandListState) -> bool {
        self.lists
            .lock()
            .get(&id)
            .is_some_and(|list| list.state() == state)
    }

    /// Returns the list with the given id, creating it if needed.
    pub fn list(&self, id: CommandListId) -> Result<AnyCommandList, DeviceError> {
        let mut lists = self.lists.lock();

        if let Some(list) = lists.get(&id) {
            return Ok(list.clone());
        }

        let name = match id {
            CommandListId::DEFAULT => format!("{} List", self.queue.name()),
            _ => format!("{} List ({id})", self.queue.name()),
        };
        let list = AnyCommandList::new(&self.queue, self.list_type, name, &self.executor)?;
        lists.insert(id, list.clone());

        Ok(list)
    }

    /// Returns the list with the given id, ready for encoding.
    ///
    /// An executing list is waited for, and a completed list is reset. For a parallel render
    /// list this covers the beginning, ending and every secondary list.
    ///
    /// # Panics
    ///
    /// - Panics if the list is committed but was never executed.
    pub fn list_for_encoding(&self, id: CommandListId) -> Result<AnyCommandList, DeviceError> {
        let list = self.list(id)?;

        if list.state() == CommandListState::Encoding {
            return Ok(list);
        }

        // The lists of one submission are marked completed one after the other.
        for execution_list in list.execution_lists() {
            if execution_list.state() == CommandListState::Executing {
                trace!(
                    "waiting for command list `{}` of `{}` to complete",
                    execution_list.name(),
                    self.name,
                );
                execution_list.wait_until_completed(None)?;
            }
        }

        list.reset()?;

        Ok(list)
    }

    /// Returns a set executing the lists with the given ids, in order.
    ///
    /// Sets are cached by ids and frame index. Lists that do not exist yet are created.
    pub fn list_set(
        &self,
        ids: &[CommandListId],
        frame_index: Option<u32>,
    ) -> Result<Arc<CommandListSet>, DeviceError> {
        let key: ListSetKey = (ids.iter().copied().collect(), frame_index);

        if let Some(set) = self.list_sets.lock().get(&key) {
            return Ok(set.clone());
        }

        let lists = ids
            .iter()
            .map(|&id| self.list(id))
            .collect::<Result<SmallVec<[_; 4]>, _>>()?;
        let objects: SmallVec<[&dyn CommandListObject; 4]> = lists
            .iter()
            .map(|list| list as &dyn CommandListObject)
            .collect();
        let set = CommandListSet::new(&objects, frame_index);

        Ok(self
            .list_sets
            .lock()
            .entry(key)
            .or_insert(set)
            .clone())
    }

    /// Returns the fence with the given id, creating it if needed.
    pub fn fence(&self, id: u32) -> Result<Arc<Fence>, DeviceError> {
        let mut fences = self.fences.lock();

        if let Some(fence) = fences.get(&id) {
            return Ok(fence.clone());
        }

        let fence = Arc::new(Fence::new(&self.queue)?);
        fences.insert(id, fence.clone());

        Ok(fence)
    }

    /// Blocks until the kit's queue has finished everything submitted to it.
    #[inline]
    pub fn wait_idle(&self) -> Result<(), DeviceError> {
        self.queue.wait_idle()
    }
}

impl fmt::Debug for CommandKit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandKit")
            .field("name", &self.name)
            .field("list_type", &self.list_type)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
