// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A backend that executes command lists on the host.
//!
//! Every queue of a [`HeadlessDevice`] is served by its own worker thread, which executes
//! submitted lists in order and honors fence signals and waits between queues. Resource memory
//! lives in host memory, and draws and dispatches are recorded as [`DrawRecord`]s instead of
//! being rasterized. Barriers are logged as [`BarrierRecord`]s when they execute. This makes it
//! possible to observe what the core submits, and in which order, without a GPU.

pub use self::queue::HeadlessCommandQueue;
use crate::{
    barrier::{Barrier, BarrierChange},
    command_list::{CommandListType, NativeCommandList, PrimitiveType, RenderState},
    device::{DeviceCapabilities, NativeDevice, QueueFamilyIndex},
    queue::NativeCommandQueue,
    resource::{
        NativeResource, Resource, ResourceDescription, ResourceId, ResourceKind, SubResource,
    },
    sync::NativeFence,
    DeviceError, NonExhaustive,
};
use log::trace;
use parking_lot::{Condvar, Mutex};
use std::{
    any::Any,
    fmt, mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

mod queue;

/// Parameters to create a new [`HeadlessDevice`].
#[derive(Clone, Debug)]
pub struct HeadlessDeviceCreateInfo {
    /// The default value is `"Headless"`.
    pub name: String,

    /// Whether the device reports that lists may be encoded on several threads at once.
    ///
    /// The default value is `true`.
    pub parallel_encoding: bool,

    /// Whether render, compute and transfer lists use distinct queue families (`0`, `1` and
    /// `2`). Otherwise every list type uses family `0`.
    ///
    /// The default value is `true`.
    pub separate_queue_families: bool,

    /// How long the worker of a queue sleeps before executing each submission.
    ///
    /// The default value is `None`.
    pub execution_delay: Option<Duration>,

    pub _ne: NonExhaustive,
}

impl Default for HeadlessDeviceCreateInfo {
    #[inline]
    fn default() -> Self {
        HeadlessDeviceCreateInfo {
            name: "Headless".to_owned(),
            parallel_encoding: true,
            separate_queue_families: true,
            execution_delay: None,
            _ne: crate::NE,
        }
    }
}

/// A draw or dispatch executed by a headless queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrawRecord {
    Draw {
        primitive_type: PrimitiveType,
        vertex_count: u32,
        start_vertex: u32,
        instance_count: u32,
        start_instance: u32,
    },
    DrawIndexed {
        primitive_type: PrimitiveType,
        /// The native handle of the bound index buffer.
        index_buffer: Option<u64>,
        index_count: u32,
        start_index: u32,
        start_vertex: u32,
        instance_count: u32,
        start_instance: u32,
    },
    Dispatch {
        group_counts: [u32; 3],
    },
}

/// A barrier executed by a headless queue, exactly as the core recorded it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierRecord {
    pub resource_id: ResourceId,
    pub change: BarrierChange,
}

/// What the queues of one device have executed.
#[derive(Debug, Default)]
struct ExecutionLog {
    draws: Mutex<Vec<DrawRecord>>,
    barriers: Mutex<Vec<BarrierRecord>>,
}

/// A device that executes everything on the host.
pub struct HeadlessDevice {
    name: String,
    capabilities: DeviceCapabilities,
    execution_delay: Option<Duration>,
    next_handle: AtomicU64,
    log: Arc<ExecutionLog>,
}

impl HeadlessDevice {
    pub fn new(create_info: HeadlessDeviceCreateInfo) -> Self {
        let HeadlessDeviceCreateInfo {
            name,
            parallel_encoding,
            separate_queue_families,
            execution_delay,
            _ne: _,
        } = create_info;

        let (compute_queue_family, transfer_queue_family) = if separate_queue_families {
            (QueueFamilyIndex(1), QueueFamilyIndex(2))
        } else {
            (QueueFamilyIndex(0), QueueFamilyIndex(0))
        };

        HeadlessDevice {
            name,
            capabilities: DeviceCapabilities {
                parallel_encoding,
                render_queue_family: QueueFamilyIndex(0),
                compute_queue_family,
                transfer_queue_family,
            },
            execution_delay,
            next_handle: AtomicU64::new(1),
            log: Arc::default(),
        }
    }

    /// Returns every draw and dispatch executed so far, in execution order.
    #[inline]
    pub fn executed_draws(&self) -> Vec<DrawRecord> {
        self.log.draws.lock().clone()
    }

    #[inline]
    pub fn clear_executed_draws(&self) {
        self.log.draws.lock().clear();
    }

    /// Returns every barrier executed so far, in execution order.
    #[inline]
    pub fn executed_barriers(&self) -> Vec<BarrierRecord> {
        self.log.barriers.lock().clone()
    }
}

impl NativeDevice for HeadlessDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_command_queue(
        &self,
        list_type: CommandListType,
        queue_family_index: QueueFamilyIndex,
    ) -> Result<Box<dyn NativeCommandQueue>, DeviceError> {
        let queue = HeadlessCommandQueue::new(
            format!("{list_type:?} {queue_family_index}"),
            self.execution_delay,
            self.log.clone(),
        )?;

        Ok(Box::new(queue))
    }

    fn create_command_list(
        &self,
        _queue: &dyn NativeCommandQueue,
        list_type: CommandListType,
    ) -> Result<Box<dyn NativeCommandList>, DeviceError> {
        Ok(Box::new(HeadlessCommandList::new(list_type)))
    }

    fn create_fence(
        &self,
        _queue: &dyn NativeCommandQueue,
    ) -> Result<Box<dyn NativeFence>, DeviceError> {
        Ok(Box::new(HeadlessFence {
            value: Arc::new(FenceValue::default()),
        }))
    }

    fn create_resource(
        &self,
        description: &ResourceDescription,
    ) -> Result<Box<dyn NativeResource>, DeviceError> {
        let sub_resources = match description.kind {
            ResourceKind::Buffer { size, .. } => {
                let size = usize::try_from(size).map_err(|_| DeviceError::OutOfHostMemory)?;

                vec![vec![0; size]]
            }
            ResourceKind::Texture {
                mip_levels,
                array_layers,
                ..
            } => vec![Vec::new(); (mip_levels * array_layers) as usize],
            ResourceKind::Sampler => Vec::new(),
        };

        Ok(Box::new(HeadlessResource {
            handle: self.next_handle.fetch_add(1, Ordering::Relaxed),
            memory: Arc::new(Mutex::new(sub_resources)),
        }))
    }
}

impl fmt::Debug for HeadlessDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessDevice")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("execution_delay", &self.execution_delay)
            .finish_non_exhaustive()
    }
}

/// The contents of every sub-resource of a resource.
type ResourceMemory = Mutex<Vec<Vec<u8>>>;

#[derive(Debug)]
struct HeadlessResource {
    handle: u64,
    memory: Arc<ResourceMemory>,
}

impl HeadlessResource {
    fn of(resource: &Resource) -> &HeadlessResource {
        resource
            .native()
            .as_any()
            .downcast_ref()
            .unwrap_or_else(|| {
                panic!(
                    "resource `{}` was not created by a headless device",
                    resource.name(),
                )
            })
    }
}

impl NativeResource for HeadlessResource {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn read_data(&self, sub_resource: u32) -> Result<Vec<u8>, DeviceError> {
        self.memory
            .lock()
            .get(sub_resource as usize)
            .cloned()
            .ok_or_else(|| {
                DeviceError::Backend(format!("sub-resource {sub_resource} does not exist").into())
            })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A fence value that can be waited for from any thread.
#[derive(Debug, Default)]
struct FenceValue {
    value: Mutex<u64>,
    reached: Condvar,
}

impl FenceValue {
    fn completed(&self) -> u64 {
        *self.value.lock()
    }

    fn signal(&self, value: u64) {
        let mut current = self.value.lock();
        *current = (*current).max(value);
        self.reached.notify_all();
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> Result<(), DeviceError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut current = self.value.lock();

        while *current < value {
            match deadline {
                Some(deadline) => {
                    if self.reached.wait_until(&mut current, deadline).timed_out()
                        && *current < value
                    {
                        return Err(DeviceError::Timeout);
                    }
                }
                None => self.reached.wait(&mut current),
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
struct HeadlessFence {
    value: Arc<FenceValue>,
}

impl HeadlessFence {
    fn of(fence: &dyn NativeFence) -> Result<&HeadlessFence, DeviceError> {
        fence
            .as_any()
            .downcast_ref()
            .ok_or_else(|| {
                DeviceError::Backend("the fence was not created by a headless device".into())
            })
    }
}

impl NativeFence for HeadlessFence {
    fn completed_value(&self) -> u64 {
        self.value.completed()
    }

    fn wait_on_cpu(&self, value: u64, timeout: Option<Duration>) -> Result<(), DeviceError> {
        self.value.wait(value, timeout)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A render state that only carries a name.
#[derive(Debug)]
pub struct HeadlessRenderState {
    name: String,
}

impl HeadlessRenderState {
    #[inline]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(HeadlessRenderState { name: name.into() })
    }
}

impl RenderState for HeadlessRenderState {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A command as executed by a headless queue worker.
#[derive(Debug)]
enum Command {
    Write {
        memory: Arc<ResourceMemory>,
        sub_resource: SubResource,
    },
    Copy {
        source: Arc<ResourceMemory>,
        destination: Arc<ResourceMemory>,
    },
    Barrier(BarrierRecord),
    Record(DrawRecord),
}

impl Command {
    fn execute(&self, log: &ExecutionLog) {
        match self {
            Command::Write {
                memory,
                sub_resource,
            } => {
                let mut memory = memory.lock();
                let Some(data) = memory.get_mut(sub_resource.index as usize) else {
                    return;
                };
                let start = sub_resource.offset as usize;
                let end = start + sub_resource.data.len();

                if data.len() < end {
                    data.resize(end, 0);
                }

                data[start..end].copy_from_slice(&sub_resource.data);
            }
            Command::Copy {
                source,
                destination,
            } => {
                let contents = source.lock().clone();
                *destination.lock() = contents;
            }
            Command::Barrier(record) => log.barriers.lock().push(*record),
            Command::Record(record) => log.draws.lock().push(record.clone()),
        }
    }
}

/// Records commands while encoding, and freezes them on commit so that queue workers can
/// execute them.
#[derive(Debug)]
struct HeadlessCommandList {
    list_type: CommandListType,
    recording: Vec<Command>,
    committed: Option<Arc<[Command]>>,
    primitive_type: PrimitiveType,
    index_buffer: Option<u64>,
    debug_group_depth: u32,
}

impl HeadlessCommandList {
    fn new(list_type: CommandListType) -> Self {
        HeadlessCommandList {
            list_type,
            recording: Vec::new(),
            committed: None,
            primitive_type: PrimitiveType::Triangle,
            index_buffer: None,
            debug_group_depth: 0,
        }
    }

    fn committed(list: &dyn NativeCommandList) -> Result<Arc<[Command]>, DeviceError> {
        let list: &HeadlessCommandList = list
            .as_any()
            .downcast_ref()
            .ok_or_else(|| {
                DeviceError::Backend("the command list was not created by a headless device".into())
            })?;

        list.committed
            .clone()
            .ok_or_else(|| DeviceError::Backend("the command list was not committed".into()))
    }
}

impl NativeCommandList for HeadlessCommandList {
    fn reset(&mut self, debug_group: Option<&str>) -> Result<(), DeviceError> {
        self.recording.clear();
        self.committed = None;
        self.primitive_type = PrimitiveType::Triangle;
        self.index_buffer = None;
        self.debug_group_depth = 0;

        if let Some(name) = debug_group {
            self.push_debug_group(name);
        }

        Ok(())
    }

    fn commit(&mut self) -> Result<(), DeviceError> {
        trace!(
            "committing {} commands of headless {:?} list",
            self.recording.len(),
            self.list_type,
        );
        self.committed = Some(mem::take(&mut self.recording).into());

        Ok(())
    }

    fn record_barriers(&mut self, barriers: &[Barrier]) {
        for barrier in barriers {
            trace!("{barrier}");
            self.recording.push(Command::Barrier(BarrierRecord {
                resource_id: barrier.id().resource_id(),
                change: barrier.change(),
            }));
        }
    }

    fn push_debug_group(&mut self, name: &str) {
        self.debug_group_depth += 1;
        trace!("debug group `{name}` at depth {}", self.debug_group_depth);
    }

    fn pop_debug_group(&mut self) {
        self.debug_group_depth = self.debug_group_depth.saturating_sub(1);
    }

    fn copy_resource(&mut self, source: &Resource, destination: &Resource) {
        self.recording.push(Command::Copy {
            source: HeadlessResource::of(source).memory.clone(),
            destination: HeadlessResource::of(destination).memory.clone(),
        });
    }

    fn write_sub_resource(&mut self, resource: &Resource, sub_resource: &SubResource) {
        self.recording.push(Command::Write {
            memory: HeadlessResource::of(resource).memory.clone(),
            sub_resource: sub_resource.clone(),
        });
    }

    fn set_render_state(&mut self, render_state: &dyn RenderState) {
        trace!("binding render state `{}`", render_state.name());
    }

    fn set_vertex_buffers(&mut self, _buffers: &[Arc<Resource>]) {}

    fn set_index_buffer(&mut self, buffer: &Resource) {
        self.index_buffer = Some(buffer.native().handle());
    }

    fn set_primitive_type(&mut self, primitive_type: PrimitiveType) {
        self.primitive_type = primitive_type;
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        start_vertex: u32,
        instance_count: u32,
        start_instance: u32,
    ) {
        self.recording.push(Command::Record(DrawRecord::Draw {
            primitive_type: self.primitive_type,
            vertex_count,
            start_vertex,
            instance_count,
            start_instance,
        }));
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        start_index: u32,
        start_vertex: u32,
        instance_count: u32,
        start_instance: u32,
    ) {
        self.recording.push(Command::Record(DrawRecord::DrawIndexed {
            primitive_type: self.primitive_type,
            index_buffer: self.index_buffer,
            index_count,
            start_index,
            start_vertex,
            instance_count,
            start_instance,
        }));
    }

    fn dispatch(&mut self, group_counts: [u32; 3]) {
        self.recording
            .push(Command::Record(DrawRecord::Dispatch { group_counts }));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        barrier::StateChange,
        command_list::{compute::ComputeCommandList, CommandListSet},
        queue::CommandQueue,
        resource::{BufferCreateInfo, ResourceState, ResourceUsage, TextureCreateInfo},
        tests::test_context,
    };

    #[test]
    fn fence_wait_times_out() {
        let fence = FenceValue::default();

        assert!(matches!(
            fence.wait(1, Some(Duration::from_millis(10))),
            Err(DeviceError::Timeout),
        ));

        fence.signal(2);
        fence.signal(1);
        assert_eq!(fence.completed(), 2);
        fence.wait(2, Some(Duration::ZERO)).unwrap();
    }

    #[test]
    fn texture_sub_resources_grow_on_write() {
        let (_, device, _) = test_context!();
        let texture = Resource::texture(
            &device,
            TextureCreateInfo {
                extent: [4, 1, 1],
                mip_levels: 1,
                array_layers: 2,
                usage: ResourceUsage::READBACK,
                ..Default::default()
            },
        )
        .unwrap();
        let queue = CommandQueue::new(
            &device,
            CommandListType::Render,
            device.queue_family(CommandListType::Render),
            "Render",
        )
        .unwrap();
        let mut list = HeadlessCommandList::new(CommandListType::Render);

        list.write_sub_resource(
            &texture,
            &SubResource {
                index: 1,
                offset: 2,
                data: vec![5, 6],
            },
        );
        list.commit().unwrap();

        let (sender, receiver) = crossbeam_channel::bounded(1);
        queue
            .native()
            .execute(
                &[&list],
                Box::new(move || {
                    let _ = sender.send(());
                }),
            )
            .unwrap();
        receiver.recv().unwrap();

        assert!(texture.read_data(0).unwrap().is_empty());
        assert_eq!(texture.read_data(1).unwrap(), [0, 0, 5, 6]);
    }

    #[test]
    fn uncommitted_list_is_rejected() {
        let (_, device, _) = test_context!();
        let queue = CommandQueue::new(
            &device,
            CommandListType::Compute,
            device.queue_family(CommandListType::Compute),
            "Compute",
        )
        .unwrap();
        let list = HeadlessCommandList::new(CommandListType::Compute);

        assert!(queue.native().execute(&[&list], Box::new(|| {})).is_err());
    }

    #[test]
    fn chained_transitions_reach_the_backend_from_their_own_state() {
        let (headless, device, _) = test_context!();
        let queue = CommandQueue::new(
            &device,
            CommandListType::Compute,
            device.queue_family(CommandListType::Compute),
            "Compute",
        )
        .unwrap();
        let list = ComputeCommandList::new(&queue, "Transitions").unwrap();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 4,
                ..Default::default()
            },
        )
        .unwrap();

        assert!(list.transition_resource_state(&buffer, ResourceState::CopyDest));
        assert!(list.transition_resource_state(&buffer, ResourceState::ShaderResource));
        assert_eq!(buffer.state(), ResourceState::Common);
        assert_eq!(buffer.planned_state(), ResourceState::ShaderResource);

        list.commit().unwrap();
        assert_eq!(buffer.state(), ResourceState::ShaderResource);

        let set = CommandListSet::new(&[&list], None);
        queue.execute(&set, None).unwrap();
        set.wait_until_completed(None).unwrap();

        let changes: Vec<_> = headless
            .executed_barriers()
            .into_iter()
            .filter(|record| record.resource_id == buffer.id())
            .map(|record| record.change)
            .collect();
        assert_eq!(
            changes,
            [
                BarrierChange::State(StateChange {
                    before: ResourceState::Common,
                    after: ResourceState::CopyDest,
                }),
                BarrierChange::State(StateChange {
                    before: ResourceState::CopyDest,
                    after: ResourceState::ShaderResource,
                }),
            ],
        );
    }

    #[test]
    fn dispatches_are_recorded() {
        let (headless, device, _) = test_context!();
        let queue = CommandQueue::new(
            &device,
            CommandListType::Compute,
            device.queue_family(CommandListType::Compute),
            "Compute",
        )
        .unwrap();
        let list = ComputeCommandList::new(&queue, "Dispatch").unwrap();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 4,
                ..Default::default()
            },
        )
        .unwrap();

        list.dispatch([8, 4, 1]);
        list.transition_resource_state(&buffer, ResourceState::UnorderedAccess);
        list.commit().unwrap();
        let set = CommandListSet::new(&[&list], None);
        queue.execute(&set, None).unwrap();
        set.wait_until_completed(None).unwrap();

        assert_eq!(
            headless.executed_draws(),
            [DrawRecord::Dispatch {
                group_counts: [8, 4, 1],
            }],
        );
    }
}
