// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Command lists and their execution state machine.
//!
//! A command list is recorded while it is [`Encoding`], frozen by [`commit`], and handed to its
//! queue for execution as part of a [`CommandListSet`]. Once the device has finished executing
//! it, the list is [`Completed`] and may be executed again or reset to record new commands.
//!
//! Barriers recorded into a list are staged in the list. They are applied to their resources
//! when the list is committed, which is the point at which the tracked resource states start to
//! describe what the device will see.
//!
//! [`Encoding`]: CommandListState::Encoding
//! [`commit`]: CommandList::commit
//! [`Completed`]: CommandListState::Completed

use self::{
    compute::ComputeCommandList, parallel::ParallelRenderCommandList, render::RenderCommandList,
    transfer::TransferCommandList,
};
pub use self::render::{PrimitiveType, RenderState};
use crate::{
    barrier::{AddResult, Barrier, BarrierSet},
    device::QueueFamilyIndex,
    next_object_id,
    queue::CommandQueue,
    resource::{Resource, ResourceState, SubResource},
    DeviceError,
};
use log::{debug, trace};
use parking_lot::{Condvar, Mutex};
use smallvec::{smallvec, SmallVec};
use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

pub mod compute;
pub mod parallel;
pub mod render;
pub mod transfer;

/// The type of a command list, which determines the commands it can record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandListType {
    Transfer,
    Render,
    ParallelRender,
    Compute,
}

impl CommandListType {
    /// Returns whether a queue created for `queue_type` can execute lists of this type.
    ///
    /// Render queues execute every type of list, compute queues execute compute and transfer
    /// lists, and transfer queues only execute transfer lists.
    #[inline]
    pub fn is_supported_by(self, queue_type: CommandListType) -> bool {
        match queue_type {
            CommandListType::Render | CommandListType::ParallelRender => true,
            CommandListType::Compute => {
                matches!(self, CommandListType::Compute | CommandListType::Transfer)
            }
            CommandListType::Transfer => self == CommandListType::Transfer,
        }
    }
}

/// Identifies a command list within a command kit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandListId(pub u32);

impl CommandListId {
    /// The list used for regular recording.
    pub const DEFAULT: Self = Self(0);

    /// The list executed before resources are uploaded, to release their ownership.
    pub const PRE_UPLOAD_SYNC: Self = Self(u32::MAX - 1);

    /// The list executed after resources are uploaded, to acquire their ownership.
    pub const POST_UPLOAD_SYNC: Self = Self(u32::MAX);
}

impl fmt::Display for CommandListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CommandListId::PRE_UPLOAD_SYNC => f.write_str("pre-upload sync"),
            CommandListId::POST_UPLOAD_SYNC => f.write_str("post-upload sync"),
            CommandListId(id) => fmt::Display::fmt(&id, f),
        }
    }
}

/// The execution state of a command list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandListState {
    /// Commands are being recorded.
    Encoding,

    /// Recording has finished and the list can be executed.
    Committed,

    /// The list has been submitted to its queue and the device has not finished it yet.
    Executing,

    /// The device has finished executing the list.
    Completed,
}

/// The implementation of a command list by a native graphics API.
///
/// The core only calls the recording methods while the list is encoding, and only calls the
/// methods that match the type the list was created with.
pub trait NativeCommandList: Send + fmt::Debug {
    /// Discards every recorded command and starts recording anew.
    fn reset(&mut self, debug_group: Option<&str>) -> Result<(), DeviceError>;

    /// Finishes recording.
    fn commit(&mut self) -> Result<(), DeviceError>;

    fn record_barriers(&mut self, barriers: &[Barrier]);

    fn push_debug_group(&mut self, name: &str);

    fn pop_debug_group(&mut self);

    fn copy_resource(&mut self, source: &Resource, destination: &Resource);

    fn write_sub_resource(&mut self, resource: &Resource, sub_resource: &SubResource);

    fn set_render_state(&mut self, render_state: &dyn RenderState);

    fn set_vertex_buffers(&mut self, buffers: &[Arc<Resource>]);

    fn set_index_buffer(&mut self, buffer: &Resource);

    fn set_primitive_type(&mut self, primitive_type: PrimitiveType);

    fn draw(
        &mut self,
        vertex_count: u32,
        start_vertex: u32,
        instance_count: u32,
        start_instance: u32,
    );

    fn draw_indexed(
        &mut self,
        index_count: u32,
        start_index: u32,
        start_vertex: u32,
        instance_count: u32,
        start_instance: u32,
    );

    fn dispatch(&mut self, group_counts: [u32; 3]);

    fn as_any(&self) -> &dyn Any;
}

/// The state and operations shared by every type of command list.
///
/// The typed lists ([`TransferCommandList`], [`RenderCommandList`], [`ComputeCommandList`] and
/// [`ParallelRenderCommandList`]) dereference to this.
pub struct CommandList {
    id: u64,
    name: String,
    list_type: CommandListType,
    queue: Arc<CommandQueue>,
    native: Mutex<Box<dyn NativeCommandList>>,
    state: Mutex<CommandListState>,
    state_changed: Condvar,
    staged_barriers: BarrierSet,
    debug_group_depth: Mutex<u32>,
    validation_enabled: AtomicBool,
}

impl CommandList {
    /// # Panics
    ///
    /// - Panics if `queue` can not execute lists of `list_type`.
    pub(crate) fn new(
        queue: &Arc<CommandQueue>,
        list_type: CommandListType,
        name: String,
    ) -> Result<Arc<Self>, DeviceError> {
        assert!(
            list_type.is_supported_by(queue.list_type()),
            "{list_type:?} command list `{name}` can not be executed on {:?} queue `{}`",
            queue.list_type(),
            queue.name(),
        );

        let native = queue
            .device()
            .native()
            .create_command_list(queue.native(), list_type)?;

        debug!("created {list_type:?} command list `{name}` on queue `{}`", queue.name());

        Ok(Arc::new(CommandList {
            id: next_object_id(),
            name,
            list_type,
            queue: queue.clone(),
            native: Mutex::new(native),
            state: Mutex::new(CommandListState::Encoding),
            state_changed: Condvar::new(),
            staged_barriers: BarrierSet::new(),
            debug_group_depth: Mutex::new(0),
            validation_enabled: AtomicBool::new(true),
        }))
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
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

    #[inline]
    pub fn state(&self) -> CommandListState {
        *self.state.lock()
    }

    /// Returns whether recorded commands are validated before they reach the backend.
    #[inline]
    pub fn is_validation_enabled(&self) -> bool {
        self.validation_enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_validation_enabled(&self, enabled: bool) {
        self.validation_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Returns the barriers recorded since the last reset.
    #[inline]
    pub fn staged_barriers(&self) -> &BarrierSet {
        &self.staged_barriers
    }

    /// Discards every recorded command and starts encoding anew.
    ///
    /// # Panics
    ///
    /// - Panics if the list is committed or executing.
    #[inline]
    pub fn reset(&self) -> Result<(), DeviceError> {
        self.reset_with_debug_group(None)
    }

    /// Like [`reset`](Self::reset), but opens a debug group around the new commands which is
    /// closed when the list is committed.
    ///
    /// # Panics
    ///
    /// - Panics if the list is committed or executing.
    pub fn reset_with_debug_group(&self, debug_group: Option<&str>) -> Result<(), DeviceError> {
        let mut state = self.state.lock();

        assert!(
            matches!(
                *state,
                CommandListState::Encoding | CommandListState::Completed
            ),
            "command list `{}` can not be reset while it is {:?}",
            self.name,
            *state,
        );

        self.native.lock().reset(debug_group)?;

        if *state == CommandListState::Encoding {
            self.discard_staged_barriers();
        }

        self.staged_barriers.clear();
        *self.debug_group_depth.lock() = u32::from(debug_group.is_some());
        *state = CommandListState::Encoding;

        trace!("reset command list `{}`", self.name);

        Ok(())
    }

    /// Finishes recording, and applies the recorded barriers to their resources.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    /// - Panics if a recorded barrier no longer matches the state of its resource.
    pub fn commit(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();

        assert_eq!(
            *state,
            CommandListState::Encoding,
            "command list `{}` can only be committed while it is encoding",
            self.name,
        );

        {
            let mut native = self.native.lock();
            let mut depth = self.debug_group_depth.lock();

            while *depth != 0 {
                native.pop_debug_group();
                *depth -= 1;
            }

            native.commit()?;
        }

        self.staged_barriers.apply_transitions();
        *state = CommandListState::Committed;

        debug!("committed command list `{}`", self.name);

        Ok(())
    }

    /// Blocks until the device has finished executing the list.
    ///
    /// Returns immediately if the list is not executing.
    pub fn wait_until_completed(&self, timeout: Option<Duration>) -> Result<(), DeviceError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();

        while *state == CommandListState::Executing {
            match deadline {
                Some(deadline) => {
                    if self
                        .state_changed
                        .wait_until(&mut state, deadline)
                        .timed_out()
                        && *state == CommandListState::Executing
                    {
                        return Err(DeviceError::Timeout);
                    }
                }
                None => self.state_changed.wait(&mut state),
            }
        }

        Ok(())
    }

    /// Records every barrier of `barriers` that the list has not recorded yet.
    ///
    /// A barrier that continues a transition already recorded for the same resource is recorded
    /// as is, and combined with the earlier one in the staged barriers. Barriers of dropped
    /// resources are ignored.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    pub fn set_resource_barriers(&self, barriers: &BarrierSet) {
        self.verify_encoding("set_resource_barriers");

        let recorded: SmallVec<[Barrier; 8]> = barriers
            .barriers()
            .into_iter()
            .filter(|barrier| barrier.resource().is_some())
            .filter(|barrier| {
                matches!(
                    self.staged_barriers.add_following(barrier.clone()),
                    AddResult::Added | AddResult::Updated
                )
            })
            .collect();

        if !recorded.is_empty() {
            trace!(
                "recorded {} barriers in command list `{}`",
                recorded.len(),
                self.name,
            );
            self.native.lock().record_barriers(&recorded);
        }
    }

    /// Records a transition of `resource` to `state`, if it is not in that state yet.
    ///
    /// Returns whether a barrier was recorded.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    pub fn transition_resource_state(
        &self,
        resource: &Arc<Resource>,
        state: ResourceState,
    ) -> bool {
        let mut barriers = None;

        if !resource.set_state_with_barriers(state, &mut barriers) {
            return false;
        }

        match barriers {
            Some(barriers) => {
                self.set_resource_barriers(&barriers);

                true
            }
            // Auto-transitioned without a barrier.
            None => false,
        }
    }

    /// Records an ownership transfer of `resource` to `queue_family_index`, if it is not owned
    /// by that family yet.
    ///
    /// Returns whether a barrier was recorded.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    pub fn transition_resource_owner(
        &self,
        resource: &Arc<Resource>,
        queue_family_index: QueueFamilyIndex,
    ) -> bool {
        let mut barriers = None;

        if !resource.set_owner_queue_family_with_barriers(queue_family_index, &mut barriers) {
            return false;
        }

        match barriers {
            Some(barriers) => {
                self.set_resource_barriers(&barriers);

                true
            }
            None => false,
        }
    }

    /// Records a copy of the whole contents of `source` into `destination`.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    /// - Panics if `source` and `destination` are the same resource.
    pub fn copy_resource(&self, source: &Resource, destination: &Resource) {
        self.verify_encoding("copy_resource");
        assert_ne!(
            source.id(),
            destination.id(),
            "resource `{}` can not be copied onto itself",
            source.name(),
        );

        self.native.lock().copy_resource(source, destination);
    }

    /// Opens a named group of commands for debugging tools.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    pub fn push_debug_group(&self, name: &str) {
        self.verify_encoding("push_debug_group");

        let mut native = self.native.lock();
        native.push_debug_group(name);
        *self.debug_group_depth.lock() += 1;
    }

    /// Closes the innermost debug group.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    /// - Panics if there is no open debug group.
    pub fn pop_debug_group(&self) {
        self.verify_encoding("pop_debug_group");

        let mut native = self.native.lock();
        let mut depth = self.debug_group_depth.lock();
        assert!(
            *depth != 0,
            "command list `{}` has no open debug group",
            self.name,
        );
        native.pop_debug_group();
        *depth -= 1;
    }

    /// Takes back the planned states of barriers that are recorded but will never be applied.
    fn discard_staged_barriers(&self) {
        for barrier in self.staged_barriers.barriers() {
            if let Some(resource) = barrier.resource() {
                resource.discard_barrier_change(barrier.change());
            }
        }
    }

    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    pub(crate) fn verify_encoding(&self, operation: &str) {
        let state = self.state();

        assert_eq!(
            state,
            CommandListState::Encoding,
            "`{operation}` requires command list `{}` to be encoding",
            self.name,
        );
    }

    pub(crate) fn with_native<R>(&self, f: impl FnOnce(&mut dyn NativeCommandList) -> R) -> R {
        f(&mut **self.native.lock())
    }

    pub(crate) fn lock_native(&self) -> parking_lot::MutexGuard<'_, Box<dyn NativeCommandList>> {
        self.native.lock()
    }

    /// # Panics
    ///
    /// - Panics if the list is neither committed nor completed.
    pub(crate) fn mark_executing(&self) {
        let mut state = self.state.lock();

        assert!(
            matches!(
                *state,
                CommandListState::Committed | CommandListState::Completed
            ),
            "command list `{}` can not be executed while it is {:?}",
            self.name,
            *state,
        );

        *state = CommandListState::Executing;
    }

    pub(crate) fn mark_completed(&self) {
        let mut state = self.state.lock();

        if *state == CommandListState::Executing {
            *state = CommandListState::Completed;
            trace!("command list `{}` completed", self.name);
        }

        self.state_changed.notify_all();
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        if *self.state.get_mut() == CommandListState::Encoding {
            self.discard_staged_barriers();
        }
    }
}

impl fmt::Debug for CommandList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandList")
            .field("name", &self.name)
            .field("list_type", &self.list_type)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// An object that contributes one or more command lists to a [`CommandListSet`].
pub trait CommandListObject: Send + Sync {
    /// Returns the list that represents the object.
    fn command_list(&self) -> &Arc<CommandList>;

    /// Returns the lists to execute, in execution order.
    #[inline]
    fn execution_lists(&self) -> SmallVec<[Arc<CommandList>; 4]> {
        smallvec![self.command_list().clone()]
    }
}

impl CommandListObject for Arc<CommandList> {
    #[inline]
    fn command_list(&self) -> &Arc<CommandList> {
        self
    }
}

/// A command list of any type.
#[derive(Clone, Debug)]
pub enum AnyCommandList {
    Transfer(Arc<TransferCommandList>),
    Render(Arc<RenderCommandList>),
    ParallelRender(Arc<ParallelRenderCommandList>),
    Compute(Arc<ComputeCommandList>),
}

impl AnyCommandList {
    pub(crate) fn new(
        queue: &Arc<CommandQueue>,
        list_type: CommandListType,
        name: String,
        executor: &Arc<rayon::ThreadPool>,
    ) -> Result<Self, DeviceError> {
        Ok(match list_type {
            CommandListType::Transfer => {
                AnyCommandList::Transfer(Arc::new(TransferCommandList::new(queue, name)?))
            }
            CommandListType::Render => {
                AnyCommandList::Render(Arc::new(RenderCommandList::new(queue, name)?))
            }
            CommandListType::ParallelRender => AnyCommandList::ParallelRender(Arc::new(
                ParallelRenderCommandList::new(queue, name, executor.clone())?,
            )),
            CommandListType::Compute => {
                AnyCommandList::Compute(Arc::new(ComputeCommandList::new(queue, name)?))
            }
        })
    }

    #[inline]
    pub fn list_type(&self) -> CommandListType {
        self.command_list().list_type()
    }

    #[inline]
    pub fn state(&self) -> CommandListState {
        self.command_list().state()
    }

    /// Resets the list, including any secondary lists and drawing state.
    pub fn reset(&self) -> Result<(), DeviceError> {
        match self {
            AnyCommandList::Transfer(list) => list.reset(),
            AnyCommandList::Render(list) => list.reset(),
            AnyCommandList::ParallelRender(list) => list.reset(),
            AnyCommandList::Compute(list) => list.reset(),
        }
    }

    /// Commits the list, including any secondary lists.
    pub fn commit(&self) -> Result<(), DeviceError> {
        match self {
            AnyCommandList::ParallelRender(list) => list.commit(),
            _ => self.command_list().commit(),
        }
    }

    #[inline]
    pub fn as_transfer(&self) -> Option<&Arc<TransferCommandList>> {
        match self {
            AnyCommandList::Transfer(list) => Some(list),
            _ => None,
        }
    }

    #[inline]
    pub fn as_render(&self) -> Option<&Arc<RenderCommandList>> {
        match self {
            AnyCommandList::Render(list) => Some(list),
            _ => None,
        }
    }

    #[inline]
    pub fn as_parallel_render(&self) -> Option<&Arc<ParallelRenderCommandList>> {
        match self {
            AnyCommandList::ParallelRender(list) => Some(list),
            _ => None,
        }
    }

    #[inline]
    pub fn as_compute(&self) -> Option<&Arc<ComputeCommandList>> {
        match self {
            AnyCommandList::Compute(list) => Some(list),
            _ => None,
        }
    }
}

impl CommandListObject for AnyCommandList {
    #[inline]
    fn command_list(&self) -> &Arc<CommandList> {
        match self {
            AnyCommandList::Transfer(list) => list.command_list(),
            AnyCommandList::Render(list) => list.command_list(),
            AnyCommandList::ParallelRender(list) => list.command_list(),
            AnyCommandList::Compute(list) => list.command_list(),
        }
    }

    #[inline]
    fn execution_lists(&self) -> SmallVec<[Arc<CommandList>; 4]> {
        match self {
            AnyCommandList::ParallelRender(list) => list.execution_lists(),
            _ => smallvec![self.command_list().clone()],
        }
    }
}

/// An ordered group of command lists that are executed on one queue as a single submission.
pub struct CommandListSet {
    lists: SmallVec<[Arc<CommandList>; 4]>,
    queue: Arc<CommandQueue>,
    frame_index: Option<u32>,
    executing: Mutex<bool>,
    completed: Condvar,
}

impl CommandListSet {
    /// Creates a set of the lists contributed by `objects`, in order.
    ///
    /// # Panics
    ///
    /// - Panics if `objects` is empty.
    /// - Panics if the lists are not all created for the same queue.
    pub fn new(objects: &[&dyn CommandListObject], frame_index: Option<u32>) -> Arc<Self> {
        let lists: SmallVec<[Arc<CommandList>; 4]> = objects
            .iter()
            .flat_map(|object| object.execution_lists())
            .collect();

        assert!(!lists.is_empty(), "a command list set can not be empty");

        let queue = lists[0].queue().clone();

        for list in &lists[1..] {
            assert!(
                Arc::ptr_eq(list.queue(), &queue),
                "command list `{}` is created for queue `{}`, but the set executes on queue `{}`",
                list.name(),
                list.queue().name(),
                queue.name(),
            );
        }

        Arc::new(CommandListSet {
            lists,
            queue,
            frame_index,
            executing: Mutex::new(false),
            completed: Condvar::new(),
        })
    }

    /// Returns the flattened lists, in execution order.
    #[inline]
    pub fn lists(&self) -> &[Arc<CommandList>] {
        &self.lists
    }

    #[inline]
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    #[inline]
    pub fn frame_index(&self) -> Option<u32> {
        self.frame_index
    }

    #[inline]
    pub fn is_executing(&self) -> bool {
        *self.executing.lock()
    }

    /// Blocks until the device has finished executing the set.
    ///
    /// Returns immediately if the set is not executing.
    pub fn wait_until_completed(&self, timeout: Option<Duration>) -> Result<(), DeviceError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut executing = self.executing.lock();

        while *executing {
            match deadline {
                Some(deadline) => {
                    if self.completed.wait_until(&mut executing, deadline).timed_out()
                        && *executing
                    {
                        return Err(DeviceError::Timeout);
                    }
                }
                None => self.completed.wait(&mut executing),
            }
        }

        Ok(())
    }

    /// # Panics
    ///
    /// - Panics if the set is already executing.
    /// - Panics if any of the lists is neither committed nor completed.
    pub(crate) fn begin_execution(&self) {
        let mut executing = self.executing.lock();

        assert!(
            !*executing,
            "command list set is already executing on queue `{}`",
            self.queue.name(),
        );

        for list in &self.lists {
            list.mark_executing();
        }

        *executing = true;
    }

    pub(crate) fn complete(&self) {
        // Held while the lists complete, so that a list observed as completed can be executed
        // again as part of this set right away.
        let mut executing = self.executing.lock();

        for list in &self.lists {
            list.mark_completed();
        }

        *executing = false;
        self.completed.notify_all();
    }

    /// Gives the lists back after a submission was rejected by the backend.
    pub(crate) fn abort_execution(&self) {
        for list in &self.lists {
            let mut state = list.state.lock();

            if *state == CommandListState::Executing {
                *state = CommandListState::Committed;
            }

            list.state_changed.notify_all();
        }

        *self.executing.lock() = false;
        self.completed.notify_all();
    }
}

impl fmt::Debug for CommandListSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandListSet")
            .field(
                "lists",
                &self.lists.iter().map(|list| list.name()).collect::<Vec<_>>(),
            )
            .field("frame_index", &self.frame_index)
            .field("executing", &self.is_executing())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::WaitFor,
        resource::{BufferCreateInfo, ResourceUsage},
        tests::test_context,
    };

    #[test]
    fn state_machine() {
        let (_, device, context) = test_context!();
        let kit = context
            .default_command_kit(CommandListType::Render)
            .unwrap();
        let list = kit.list(CommandListId::DEFAULT).unwrap();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 16,
                usage: ResourceUsage::READBACK,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(list.state(), CommandListState::Encoding);
        assert!(list
            .command_list()
            .transition_resource_state(&buffer, ResourceState::ShaderResource));
        assert_eq!(buffer.state(), ResourceState::Common);

        list.commit().unwrap();
        assert_eq!(list.state(), CommandListState::Committed);
        assert_eq!(buffer.state(), ResourceState::ShaderResource);

        let set = kit.list_set(&[CommandListId::DEFAULT], None).unwrap();
        kit.queue().execute(&set, None).unwrap();
        set.wait_until_completed(None).unwrap();
        assert_eq!(list.state(), CommandListState::Completed);

        // A completed list may be executed again without recording.
        kit.queue().execute(&set, None).unwrap();
        context.wait_for_gpu(WaitFor::RenderComplete).unwrap();
        set.wait_until_completed(None).unwrap();

        list.reset().unwrap();
        assert_eq!(list.state(), CommandListState::Encoding);
        assert!(list.command_list().staged_barriers().is_empty());
    }

    #[test]
    #[should_panic = "can not be reset while it is Committed"]
    fn reset_while_committed_panics() {
        let (_, _, context) = test_context!();
        let kit = context
            .default_command_kit(CommandListType::Render)
            .unwrap();
        let list = kit.list(CommandListId::DEFAULT).unwrap();

        list.commit().unwrap();
        let _ = list.reset();
    }

    #[test]
    #[should_panic = "can only be committed while it is encoding"]
    fn double_commit_panics() {
        let (_, _, context) = test_context!();
        let kit = context
            .default_command_kit(CommandListType::Compute)
            .unwrap();
        let list = kit.list(CommandListId::DEFAULT).unwrap();

        list.commit().unwrap();
        let _ = list.commit();
    }

    #[test]
    fn repeated_barriers_are_recorded_once() {
        let (_, device, context) = test_context!();
        let kit = context
            .default_command_kit(CommandListType::Render)
            .unwrap();
        let list = kit.list(CommandListId::DEFAULT).unwrap();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 16,
                ..Default::default()
            },
        )
        .unwrap();

        let barriers = BarrierSet::new();
        barriers.add_state_transition(&buffer, ResourceState::Common, ResourceState::CopySource);
        list.command_list().set_resource_barriers(&barriers);
        list.command_list().set_resource_barriers(&barriers);

        assert_eq!(list.command_list().staged_barriers().len(), 1);

        // Applied exactly once, so the commit does not trip over a stale transition.
        list.commit().unwrap();
        assert_eq!(buffer.state(), ResourceState::CopySource);
    }

    #[test]
    fn reset_while_encoding_takes_back_planned_state() {
        let (_, device, context) = test_context!();
        let kit = context
            .default_command_kit(CommandListType::Render)
            .unwrap();
        let list = kit.list(CommandListId::DEFAULT).unwrap();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 16,
                ..Default::default()
            },
        )
        .unwrap();

        assert!(list
            .command_list()
            .transition_resource_state(&buffer, ResourceState::CopyDest));
        assert_eq!(buffer.planned_state(), ResourceState::CopyDest);

        list.reset().unwrap();
        assert_eq!(buffer.planned_state(), ResourceState::Common);

        assert!(list
            .command_list()
            .transition_resource_state(&buffer, ResourceState::CopyDest));
        assert!(list
            .command_list()
            .transition_resource_state(&buffer, ResourceState::Common));
        assert!(list.command_list().staged_barriers().is_empty());

        list.commit().unwrap();
        assert_eq!(buffer.state(), ResourceState::Common);
    }

    #[test]
    #[should_panic = "can not be executed on Transfer queue"]
    fn render_list_on_transfer_queue_panics() {
        let (_, device, _) = test_context!();
        let queue = CommandQueue::new(
            &device,
            CommandListType::Transfer,
            device.queue_family(CommandListType::Transfer),
            "Transfer",
        )
        .unwrap();

        let _ = RenderCommandList::new(&queue, "Render".to_owned());
    }

    #[test]
    fn wait_on_idle_list_returns_immediately() {
        let (_, _, context) = test_context!();
        let kit = context
            .default_command_kit(CommandListType::Render)
            .unwrap();
        let list = kit.list(CommandListId::DEFAULT).unwrap();

        list.command_list()
            .wait_until_completed(Some(Duration::from_millis(1)))
            .unwrap();
    }
}
