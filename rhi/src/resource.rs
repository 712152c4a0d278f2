// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! GPU-visible resources and their state tracking.
//!
//! Every [`Resource`] remembers the [`ResourceState`] it is currently in and which queue family
//! owns it. Both can either be changed directly, when the caller knows no GPU synchronization is
//! needed, or by producing [`Barrier`]s that are applied once the command list recording them is
//! committed.
//!
//! [`Barrier`]: crate::barrier::Barrier

pub use self::buffer_set::BufferSet;
use crate::{
    barrier::{BarrierChange, BarrierSet, OwnerChange, StateChange},
    command_list::{AnyCommandList, CommandListId, CommandListObject},
    context::{Context, DeferredAction},
    device::{Device, QueueFamilyIndex},
    next_object_id, DeviceError, NonExhaustive,
};
use bitflags::bitflags;
use log::{debug, trace};
use parking_lot::Mutex;
use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

mod buffer_set;

/// The state a resource is in, as far as GPU access is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceState {
    Undefined,
    Common,
    VertexBuffer,
    ConstantBuffer,
    IndexBuffer,
    RenderTarget,
    UnorderedAccess,
    DepthWrite,
    DepthRead,
    ShaderResource,
    StreamOut,
    IndirectArgument,
    CopyDest,
    CopySource,
    ResolveDest,
    ResolveSource,
    GenericRead,
    Present,
}

bitflags! {
    /// How a resource is going to be used.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ResourceUsage: u32 {
        /// The resource is read from shaders.
        const SHADER_READ = 1 << 0;

        /// The resource is written to from shaders.
        const SHADER_WRITE = 1 << 1;

        /// The resource is used as a render target.
        const RENDER_TARGET = 1 << 2;

        /// The resource is accessed through its device address.
        const ADDRESSABLE = 1 << 3;

        /// The resource contents can be read back to the host.
        const READBACK = 1 << 4;
    }
}

/// A process-wide unique identifier of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Returns the raw identifier.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The format of the elements of an index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    /// Returns the size of one index in bytes.
    #[inline]
    pub const fn size(self) -> u64 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// What kind of resource this is, together with its dimensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer {
        size: u64,
        stride: u32,
        index_format: Option<IndexFormat>,
    },
    Texture {
        extent: [u32; 3],
        mip_levels: u32,
        array_layers: u32,
    },
    Sampler,
}

/// Everything a backend needs to know in order to create a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceDescription {
    pub name: String,
    pub kind: ResourceKind,
    pub usage: ResourceUsage,
}

/// The implementation of a resource by a native graphics API.
pub trait NativeResource: Send + Sync + fmt::Debug {
    /// Returns an opaque handle that identifies the native object.
    fn handle(&self) -> u64;

    /// Reads back the contents of a sub-resource.
    fn read_data(&self, sub_resource: u32) -> Result<Vec<u8>, DeviceError>;

    fn as_any(&self) -> &dyn Any;
}

/// Parameters to create a new buffer.
#[derive(Clone, Debug)]
pub struct BufferCreateInfo {
    pub name: String,

    /// The size of the buffer in bytes.
    ///
    /// The default value is `0`, which must be overridden.
    pub size: u64,

    /// The size of one element of a vertex or structured buffer.
    ///
    /// The default value is `0`.
    pub stride: u32,

    /// If set, the buffer holds indices of this format.
    ///
    /// The default value is `None`.
    pub index_format: Option<IndexFormat>,

    /// The default value is empty.
    pub usage: ResourceUsage,

    /// The state the buffer starts in.
    ///
    /// The default value is [`ResourceState::Common`].
    pub initial_state: ResourceState,

    /// If set, transitions out of this state are applied directly without producing a barrier.
    ///
    /// The default value is `None`.
    pub auto_transition_source_state: Option<ResourceState>,

    pub _ne: NonExhaustive,
}

impl Default for BufferCreateInfo {
    #[inline]
    fn default() -> Self {
        BufferCreateInfo {
            name: String::new(),
            size: 0,
            stride: 0,
            index_format: None,
            usage: ResourceUsage::empty(),
            initial_state: ResourceState::Common,
            auto_transition_source_state: None,
            _ne: crate::NE,
        }
    }
}

/// Parameters to create a new texture.
#[derive(Clone, Debug)]
pub struct TextureCreateInfo {
    pub name: String,

    /// The default value is `[1, 1, 1]`.
    pub extent: [u32; 3],

    /// The default value is `1`.
    pub mip_levels: u32,

    /// The default value is `1`.
    pub array_layers: u32,

    /// The default value is empty.
    pub usage: ResourceUsage,

    /// The default value is [`ResourceState::Common`].
    pub initial_state: ResourceState,

    /// The default value is `None`.
    pub auto_transition_source_state: Option<ResourceState>,

    pub _ne: NonExhaustive,
}

impl Default for TextureCreateInfo {
    #[inline]
    fn default() -> Self {
        TextureCreateInfo {
            name: String::new(),
            extent: [1, 1, 1],
            mip_levels: 1,
            array_layers: 1,
            usage: ResourceUsage::empty(),
            initial_state: ResourceState::Common,
            auto_transition_source_state: None,
            _ne: crate::NE,
        }
    }
}

/// Parameters to create a new sampler.
#[derive(Clone, Debug)]
pub struct SamplerCreateInfo {
    pub name: String,

    pub _ne: NonExhaustive,
}

impl Default for SamplerCreateInfo {
    #[inline]
    fn default() -> Self {
        SamplerCreateInfo {
            name: String::new(),
            _ne: crate::NE,
        }
    }
}

/// Data to be written to one sub-resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubResource {
    /// The index of the sub-resource: `mip_level + array_layer * mip_levels` for textures, and
    /// always `0` for buffers.
    pub index: u32,

    /// The offset in bytes within the sub-resource.
    pub offset: u64,

    pub data: Vec<u8>,
}

impl SubResource {
    /// Data covering the beginning of sub-resource `index`.
    #[inline]
    pub fn new(index: u32, data: Vec<u8>) -> Self {
        SubResource {
            index,
            offset: 0,
            data,
        }
    }
}

/// The committed state and owner, plus where the transitions requested so far lead.
///
/// Requests compare against and advance the planned values. Applying a barrier checks and
/// advances the committed ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ResourceTracking {
    state: ResourceState,
    owner_queue_family: Option<QueueFamilyIndex>,
    planned_state: ResourceState,
    planned_owner_queue_family: Option<QueueFamilyIndex>,
}

/// A buffer, texture or sampler living on the device.
pub struct Resource {
    id: ResourceId,
    description: ResourceDescription,
    tracking: Mutex<ResourceTracking>,
    auto_transition_source_state: Option<ResourceState>,
    pending_sub_resource_count: AtomicU32,
    native: Box<dyn NativeResource>,
}

impl Resource {
    /// Creates a new buffer.
    ///
    /// # Panics
    ///
    /// - Panics if `create_info.size` is zero.
    /// - Panics if `create_info.index_format` is set and `create_info.size` is not a multiple of
    ///   the index size.
    pub fn buffer(
        device: &Arc<Device>,
        create_info: BufferCreateInfo,
    ) -> Result<Arc<Resource>, DeviceError> {
        let BufferCreateInfo {
            name,
            size,
            stride,
            index_format,
            usage,
            initial_state,
            auto_transition_source_state,
            _ne: _,
        } = create_info;

        assert!(size != 0, "buffer `{name}` can not have a size of zero");

        if let Some(index_format) = index_format {
            assert!(
                size % index_format.size() == 0,
                "the size of index buffer `{name}` is not a multiple of the index size",
            );
        }

        let description = ResourceDescription {
            name,
            kind: ResourceKind::Buffer {
                size,
                stride,
                index_format,
            },
            usage,
        };

        Resource::new(
            device,
            description,
            initial_state,
            auto_transition_source_state,
        )
    }

    /// Creates a new texture.
    ///
    /// # Panics
    ///
    /// - Panics if any of `create_info.extent`, `create_info.mip_levels` or
    ///   `create_info.array_layers` is zero.
    pub fn texture(
        device: &Arc<Device>,
        create_info: TextureCreateInfo,
    ) -> Result<Arc<Resource>, DeviceError> {
        let TextureCreateInfo {
            name,
            extent,
            mip_levels,
            array_layers,
            usage,
            initial_state,
            auto_transition_source_state,
            _ne: _,
        } = create_info;

        assert!(
            extent.iter().all(|&dimension| dimension != 0),
            "texture `{name}` can not have an extent of zero",
        );
        assert!(mip_levels != 0 && array_layers != 0);

        let description = ResourceDescription {
            name,
            kind: ResourceKind::Texture {
                extent,
                mip_levels,
                array_layers,
            },
            usage,
        };

        Resource::new(
            device,
            description,
            initial_state,
            auto_transition_source_state,
        )
    }

    /// Creates a new sampler.
    pub fn sampler(
        device: &Arc<Device>,
        create_info: SamplerCreateInfo,
    ) -> Result<Arc<Resource>, DeviceError> {
        let description = ResourceDescription {
            name: create_info.name,
            kind: ResourceKind::Sampler,
            usage: ResourceUsage::SHADER_READ,
        };

        Resource::new(device, description, ResourceState::Common, None)
    }

    fn new(
        device: &Arc<Device>,
        description: ResourceDescription,
        initial_state: ResourceState,
        auto_transition_source_state: Option<ResourceState>,
    ) -> Result<Arc<Resource>, DeviceError> {
        let native = device.native().create_resource(&description)?;
        let id = ResourceId(next_object_id());

        debug!(
            "created resource `{}` {id} in state {initial_state:?}",
            description.name,
        );

        Ok(Arc::new(Resource {
            id,
            description,
            tracking: Mutex::new(ResourceTracking {
                state: initial_state,
                owner_queue_family: None,
                planned_state: initial_state,
                planned_owner_queue_family: None,
            }),
            auto_transition_source_state,
            pending_sub_resource_count: AtomicU32::new(0),
            native,
        }))
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.description.name
    }

    #[inline]
    pub fn description(&self) -> &ResourceDescription {
        &self.description
    }

    #[inline]
    pub fn kind(&self) -> &ResourceKind {
        &self.description.kind
    }

    #[inline]
    pub fn usage(&self) -> ResourceUsage {
        self.description.usage
    }

    #[inline]
    pub fn native(&self) -> &dyn NativeResource {
        &*self.native
    }

    /// Returns the size of the resource in bytes, or `0` for textures and samplers.
    #[inline]
    pub fn size(&self) -> u64 {
        match self.description.kind {
            ResourceKind::Buffer { size, .. } => size,
            _ => 0,
        }
    }

    /// Returns the index format if this is an index buffer.
    #[inline]
    pub fn index_format(&self) -> Option<IndexFormat> {
        match self.description.kind {
            ResourceKind::Buffer { index_format, .. } => index_format,
            _ => None,
        }
    }

    /// Returns the number of sub-resources.
    #[inline]
    pub fn sub_resource_count(&self) -> u32 {
        match self.description.kind {
            ResourceKind::Buffer { .. } => 1,
            ResourceKind::Texture {
                mip_levels,
                array_layers,
                ..
            } => mip_levels * array_layers,
            ResourceKind::Sampler => 0,
        }
    }

    /// Returns the number of formatted items held by the resource.
    ///
    /// This is the number of indices for index buffers, the number of elements for buffers with
    /// a stride, the size in bytes for other buffers and the number of texels of the top mip
    /// level for textures.
    pub fn formatted_items_count(&self) -> u32 {
        let count = match self.description.kind {
            ResourceKind::Buffer {
                size,
                index_format: Some(index_format),
                ..
            } => size / index_format.size(),
            ResourceKind::Buffer { size, stride, .. } if stride != 0 => size / u64::from(stride),
            ResourceKind::Buffer { size, .. } => size,
            ResourceKind::Texture { extent, .. } => extent.iter().map(|&d| u64::from(d)).product(),
            ResourceKind::Sampler => 0,
        };

        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Returns the number of sub-resources written by the last [`set_data`] call.
    ///
    /// [`set_data`]: Self::set_data
    #[inline]
    pub fn pending_sub_resource_count(&self) -> u32 {
        self.pending_sub_resource_count.load(Ordering::Acquire)
    }

    /// Returns the state the resource is currently tracked in.
    ///
    /// This is the state after every committed command list, and does not include transitions
    /// that are only recorded into lists that are still encoding.
    #[inline]
    pub fn state(&self) -> ResourceState {
        self.tracking.lock().state
    }

    /// Returns the state the resource ends up in once every recorded transition is committed.
    #[inline]
    pub fn planned_state(&self) -> ResourceState {
        self.tracking.lock().planned_state
    }

    /// Returns the queue family that currently owns the resource, if any.
    #[inline]
    pub fn owner_queue_family(&self) -> Option<QueueFamilyIndex> {
        self.tracking.lock().owner_queue_family
    }

    /// Returns the queue family that owns the resource once every recorded ownership transfer
    /// is committed.
    #[inline]
    pub fn planned_owner_queue_family(&self) -> Option<QueueFamilyIndex> {
        self.tracking.lock().planned_owner_queue_family
    }

    /// Returns the state out of which transitions happen without a barrier.
    #[inline]
    pub fn auto_transition_source_state(&self) -> Option<ResourceState> {
        self.auto_transition_source_state
    }

    /// Changes the tracked state without producing a barrier.
    ///
    /// Returns whether the state changed.
    pub fn set_state(&self, state: ResourceState) -> bool {
        let mut tracking = self.tracking.lock();

        if tracking.state == state {
            return false;
        }

        trace!(
            "resource `{}` state changed directly from {:?} to {state:?}",
            self.name(),
            tracking.state,
        );
        tracking.state = state;
        tracking.planned_state = state;

        true
    }

    /// Requests a transition to `state`, recording the needed barrier into `barriers`.
    ///
    /// Requests are compared against the [planned state], so a transition that another request
    /// already recorded is not recorded again, even before its command list is committed.
    ///
    /// - If the resource is already planned to be in `state`, any transition of this resource
    ///   is removed from `barriers` and `false` is returned.
    /// - If the resource is in its auto-transition source state, the state is changed directly
    ///   and no barrier is produced.
    /// - Otherwise a transition from the planned state to `state` is added to `barriers`,
    ///   creating the set if needed, and becomes the planned state. The tracked state only
    ///   changes once the barrier is applied.
    ///
    /// Returns whether a transition was requested.
    ///
    /// [planned state]: Self::planned_state
    pub fn set_state_with_barriers(
        self: &Arc<Self>,
        state: ResourceState,
        barriers: &mut Option<Arc<BarrierSet>>,
    ) -> bool {
        let before = {
            let mut tracking = self.tracking.lock();

            if tracking.planned_state == state {
                None
            } else if tracking.state == tracking.planned_state
                && Some(tracking.state) == self.auto_transition_source_state
            {
                trace!(
                    "resource `{}` auto-transitioned from {:?} to {state:?}",
                    self.name(),
                    tracking.state,
                );
                tracking.state = state;
                tracking.planned_state = state;

                return true;
            } else {
                let before = tracking.planned_state;
                tracking.planned_state = state;

                Some(before)
            }
        };

        match before {
            None => {
                if let Some(barriers) = barriers {
                    barriers.remove_state_transition(self);
                }

                false
            }
            Some(before) => {
                barriers
                    .get_or_insert_with(Default::default)
                    .add_state_transition(self, before, state);

                true
            }
        }
    }

    /// Changes the owning queue family without producing a barrier.
    ///
    /// Returns whether the owner changed.
    pub fn set_owner_queue_family(&self, queue_family_index: QueueFamilyIndex) -> bool {
        let mut tracking = self.tracking.lock();

        if tracking.owner_queue_family == Some(queue_family_index) {
            return false;
        }

        trace!(
            "resource `{}` ownership moved directly to queue family {queue_family_index}",
            self.name(),
        );
        tracking.owner_queue_family = Some(queue_family_index);
        tracking.planned_owner_queue_family = Some(queue_family_index);

        true
    }

    /// Requests an ownership transfer to `queue_family_index`, recording the needed barrier into
    /// `barriers`.
    ///
    /// A resource that has no owner yet is acquired directly. Otherwise this behaves like
    /// [`set_state_with_barriers`](Self::set_state_with_barriers).
    pub fn set_owner_queue_family_with_barriers(
        self: &Arc<Self>,
        queue_family_index: QueueFamilyIndex,
        barriers: &mut Option<Arc<BarrierSet>>,
    ) -> bool {
        let before = {
            let mut tracking = self.tracking.lock();

            match tracking.planned_owner_queue_family {
                Some(owner) if owner == queue_family_index => None,
                Some(owner) => {
                    tracking.planned_owner_queue_family = Some(queue_family_index);

                    Some(owner)
                }
                None => {
                    tracking.owner_queue_family = Some(queue_family_index);
                    tracking.planned_owner_queue_family = Some(queue_family_index);

                    return true;
                }
            }
        };

        match before {
            None => {
                if let Some(barriers) = barriers {
                    barriers.remove_owner_transition(self);
                }

                false
            }
            Some(before) => {
                barriers
                    .get_or_insert_with(Default::default)
                    .add_owner_transition(self, before, queue_family_index);

                true
            }
        }
    }

    /// Commits the effect of an applied barrier.
    ///
    /// # Panics
    ///
    /// - Panics if the tracked state or owner is not the one the barrier transitions from.
    pub(crate) fn apply_barrier_change(&self, change: BarrierChange) {
        let mut tracking = self.tracking.lock();

        match change {
            BarrierChange::State(StateChange { before, after }) => {
                assert_eq!(
                    tracking.state,
                    before,
                    "the transition of resource `{}` to {after:?} was recorded from another state",
                    self.name(),
                );
                tracking.state = after;
            }
            BarrierChange::Owner(OwnerChange { before, after }) => {
                assert_eq!(
                    tracking.owner_queue_family,
                    Some(before),
                    "the ownership transfer of resource `{}` to queue family {after} was recorded \
                    from another owner",
                    self.name(),
                );
                tracking.owner_queue_family = Some(after);
            }
        }
    }

    /// Takes back the plan of a barrier that is discarded without being applied.
    ///
    /// Nothing changes if a later request has already planned past the barrier.
    pub(crate) fn discard_barrier_change(&self, change: BarrierChange) {
        let mut tracking = self.tracking.lock();

        match change {
            BarrierChange::State(StateChange { after, .. }) => {
                if tracking.planned_state == after {
                    tracking.planned_state = tracking.state;
                }
            }
            BarrierChange::Owner(OwnerChange { after, .. }) => {
                if tracking.planned_owner_queue_family == Some(after) {
                    tracking.planned_owner_queue_family = tracking.owner_queue_family;
                }
            }
        }
    }

    /// Records uploads of `sub_resources` into the context's upload command list.
    ///
    /// If the resource is owned by a queue family other than the upload one, an ownership
    /// release is recorded into that family's pre-upload synchronization list. The resource is
    /// then transitioned to [`ResourceState::CopyDest`], the writes are recorded, and an upload
    /// is requested from the context. The data reaches the device at the next flush point.
    ///
    /// # Panics
    ///
    /// - Panics if `sub_resources` is empty.
    /// - Panics if a sub-resource index is out of range.
    /// - Panics if a write exceeds the size of a buffer.
    pub fn set_data(
        self: &Arc<Self>,
        context: &Context,
        sub_resources: &[SubResource],
    ) -> Result<(), DeviceError> {
        assert!(
            !sub_resources.is_empty(),
            "no data was given to set on resource `{}`",
            self.name(),
        );

        let sub_resource_count = self.sub_resource_count();

        for sub_resource in sub_resources {
            assert!(
                sub_resource.index < sub_resource_count,
                "sub-resource {} is out of range for resource `{}`, which has {} sub-resources",
                sub_resource.index,
                self.name(),
                sub_resource_count,
            );

            if let ResourceKind::Buffer { size, .. } = self.description.kind {
                assert!(
                    sub_resource.offset + sub_resource.data.len() as u64 <= size,
                    "the data written to buffer `{}` exceeds its size of {size} bytes",
                    self.name(),
                );
            }
        }

        let upload_kit = context.upload_command_kit()?;
        let upload_queue_family = upload_kit.queue().queue_family_index();

        match self.planned_owner_queue_family() {
            Some(owner) if owner != upload_queue_family => {
                self.release_ownership_for_upload(context, owner, upload_queue_family)?;
            }
            Some(_) => {}
            None => {
                self.set_owner_queue_family(upload_queue_family);
            }
        }

        let AnyCommandList::Transfer(upload_list) =
            upload_kit.list_for_encoding(CommandListId::DEFAULT)?
        else {
            unreachable!("the upload command kit always records transfer command lists");
        };

        upload_list.transition_resource_state(self, ResourceState::CopyDest);

        for sub_resource in sub_resources {
            upload_list.write_sub_resource(self, sub_resource);
        }

        let pending_count = sub_resources
            .iter()
            .map(|sub_resource| sub_resource.index + 1)
            .max()
            .unwrap_or(0);
        self.pending_sub_resource_count
            .store(pending_count, Ordering::Release);

        debug!(
            "recorded upload of {} sub-resources of resource `{}`",
            sub_resources.len(),
            self.name(),
        );
        context.request_deferred_action(DeferredAction::UploadResources);

        Ok(())
    }

    fn release_ownership_for_upload(
        self: &Arc<Self>,
        context: &Context,
        owner: QueueFamilyIndex,
        upload_queue_family: QueueFamilyIndex,
    ) -> Result<(), DeviceError> {
        let Some(owner_kit) = context.command_kit_for_family(owner) else {
            // No queue of the owning family is in use anymore.
            self.set_owner_queue_family(upload_queue_family);

            return Ok(());
        };

        let pre_upload_list = owner_kit.list_for_encoding(CommandListId::PRE_UPLOAD_SYNC)?;
        pre_upload_list
            .command_list()
            .transition_resource_owner(self, upload_queue_family);

        trace!(
            "recorded release of resource `{}` from queue family {owner} in `{}`",
            self.name(),
            owner_kit.name(),
        );

        Ok(())
    }

    /// Reads back the contents of a sub-resource.
    ///
    /// # Panics
    ///
    /// - Panics if the resource was not created with [`ResourceUsage::READBACK`].
    /// - Panics if `sub_resource` is out of range.
    pub fn read_data(&self, sub_resource: u32) -> Result<Vec<u8>, DeviceError> {
        assert!(
            self.usage().contains(ResourceUsage::READBACK),
            "resource `{}` was not created with readback usage",
            self.name(),
        );
        assert!(sub_resource < self.sub_resource_count());

        self.native.read_data(sub_resource)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracking = *self.tracking.lock();

        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("state", &tracking.state)
            .field("owner_queue_family", &tracking.owner_queue_family)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command_list::CommandListState, context::WaitFor, headless::HeadlessDeviceCreateInfo,
        tests::test_context,
    };

    #[test]
    fn set_state_is_idempotent() {
        let (_, device, _) = test_context!();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 16,
                ..Default::default()
            },
        )
        .unwrap();

        let mut barriers = None;
        assert!(buffer.set_state_with_barriers(ResourceState::CopyDest, &mut barriers));
        assert!(!buffer.set_state(ResourceState::Common));

        let barriers = barriers.unwrap();
        assert_eq!(barriers.len(), 1);
        assert!(barriers.has_state_transition(
            &buffer,
            ResourceState::Common,
            ResourceState::CopyDest
        ));
        assert_eq!(buffer.state(), ResourceState::Common);

        barriers.apply_transitions();
        assert_eq!(buffer.state(), ResourceState::CopyDest);
        assert!(!buffer.set_state(ResourceState::CopyDest));
    }

    #[test]
    fn unchanged_state_prunes_pending_barrier() {
        let (_, device, _) = test_context!();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 16,
                initial_state: ResourceState::CopyDest,
                ..Default::default()
            },
        )
        .unwrap();

        let mut barriers = None;
        assert!(buffer.set_state_with_barriers(ResourceState::VertexBuffer, &mut barriers));
        let barriers = barriers.unwrap();
        assert_eq!(barriers.len(), 1);
        assert_eq!(buffer.planned_state(), ResourceState::VertexBuffer);

        // Requesting the planned state again drops the transition from the set it is given.
        let mut cached = Some(Arc::new(BarrierSet::clone(&barriers)));
        assert!(!buffer.set_state_with_barriers(ResourceState::VertexBuffer, &mut cached));
        assert!(cached.unwrap().is_empty());
        assert_eq!(barriers.len(), 1);

        barriers.apply_transitions();
        assert_eq!(buffer.state(), ResourceState::VertexBuffer);

        let mut stale = Some(barriers);
        assert!(!buffer.set_state_with_barriers(ResourceState::VertexBuffer, &mut stale));
        assert!(stale.unwrap().is_empty());
    }

    #[test]
    fn unchanged_owner_prunes_pending_transfer() {
        let (_, device, _) = test_context!();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 16,
                ..Default::default()
            },
        )
        .unwrap();
        buffer.set_owner_queue_family(QueueFamilyIndex(0));

        let mut barriers = None;
        assert!(buffer.set_owner_queue_family_with_barriers(QueueFamilyIndex(2), &mut barriers));
        assert_eq!(buffer.owner_queue_family(), Some(QueueFamilyIndex(0)));
        assert_eq!(
            buffer.planned_owner_queue_family(),
            Some(QueueFamilyIndex(2)),
        );

        let barriers = barriers.unwrap();
        barriers.apply_transitions();
        assert_eq!(buffer.owner_queue_family(), Some(QueueFamilyIndex(2)));

        let mut stale = Some(barriers);
        assert!(!buffer.set_owner_queue_family_with_barriers(QueueFamilyIndex(2), &mut stale));
        assert!(stale.unwrap().is_empty());
    }

    #[test]
    fn auto_transition_source_state_skips_barrier() {
        let (_, device, _) = test_context!();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 16,
                initial_state: ResourceState::Undefined,
                auto_transition_source_state: Some(ResourceState::Undefined),
                ..Default::default()
            },
        )
        .unwrap();

        let mut barriers = None;
        assert!(buffer.set_state_with_barriers(ResourceState::CopyDest, &mut barriers));
        assert!(barriers.is_none());
        assert_eq!(buffer.state(), ResourceState::CopyDest);

        assert!(buffer.set_state_with_barriers(ResourceState::VertexBuffer, &mut barriers));
        assert_eq!(barriers.unwrap().len(), 1);
    }

    #[test]
    fn first_owner_is_acquired_directly() {
        let (_, device, _) = test_context!();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 16,
                ..Default::default()
            },
        )
        .unwrap();

        let mut barriers = None;
        assert!(buffer.set_owner_queue_family_with_barriers(QueueFamilyIndex(2), &mut barriers));
        assert!(barriers.is_none());
        assert_eq!(buffer.owner_queue_family(), Some(QueueFamilyIndex(2)));

        assert!(buffer.set_owner_queue_family_with_barriers(QueueFamilyIndex(0), &mut barriers));
        let barriers = barriers.unwrap();
        assert!(barriers.has_owner_transition(&buffer, QueueFamilyIndex(2), QueueFamilyIndex(0)));

        barriers.apply_transitions();
        assert_eq!(buffer.owner_queue_family(), Some(QueueFamilyIndex(0)));
    }

    #[test]
    fn formatted_items_count() {
        let (_, device, _) = test_context!();
        let index_buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 12,
                index_format: Some(IndexFormat::U16),
                ..Default::default()
            },
        )
        .unwrap();
        let vertex_buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 96,
                stride: 32,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(index_buffer.formatted_items_count(), 6);
        assert_eq!(vertex_buffer.formatted_items_count(), 3);
    }

    #[test]
    fn set_data_records_upload() {
        let (_, device, context) = test_context!();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                name: "Uploaded".to_owned(),
                size: 4,
                usage: ResourceUsage::READBACK,
                ..Default::default()
            },
        )
        .unwrap();

        buffer
            .set_data(&context, &[SubResource::new(0, vec![1, 2, 3, 4])])
            .unwrap();

        assert_eq!(buffer.pending_sub_resource_count(), 1);
        assert_eq!(
            context.requested_action(),
            DeferredAction::UploadResources
        );
        assert_eq!(
            buffer.owner_queue_family(),
            Some(device.queue_family(crate::command_list::CommandListType::Transfer)),
        );

        let upload_kit = context.upload_command_kit().unwrap();
        assert!(upload_kit.has_list_with_state(CommandListId::DEFAULT, CommandListState::Encoding));

        context.wait_for_gpu(WaitFor::RenderComplete).unwrap();
        context.wait_for_gpu(WaitFor::ResourcesUploaded).unwrap();

        assert_eq!(buffer.state(), ResourceState::CopyDest);
        assert_eq!(buffer.read_data(0).unwrap(), [1, 2, 3, 4]);
        assert_eq!(context.requested_action(), DeferredAction::None);
    }

    #[test]
    fn set_data_releases_foreign_ownership() {
        let (_, device, context) = test_context!(HeadlessDeviceCreateInfo::default());
        let render_family = device.queue_family(crate::command_list::CommandListType::Render);
        let texture = Resource::texture(
            &device,
            TextureCreateInfo {
                name: "Owned".to_owned(),
                extent: [2, 2, 1],
                mip_levels: 2,
                ..Default::default()
            },
        )
        .unwrap();
        texture.set_owner_queue_family(render_family);

        let render_kit = context
            .default_command_kit(crate::command_list::CommandListType::Render)
            .unwrap();

        texture
            .set_data(
                &context,
                &[
                    SubResource::new(1, vec![0; 4]),
                    SubResource::new(0, vec![0; 16]),
                ],
            )
            .unwrap();

        assert_eq!(texture.pending_sub_resource_count(), 2);
        assert!(render_kit.has_list_with_state(
            CommandListId::PRE_UPLOAD_SYNC,
            CommandListState::Encoding
        ));

        assert!(context.upload_resources().unwrap());
        assert_eq!(
            texture.owner_queue_family(),
            Some(device.queue_family(crate::command_list::CommandListType::Transfer)),
        );
        context.wait_for_gpu(WaitFor::ResourcesUploaded).unwrap();
        render_kit.queue().wait_idle().unwrap();
    }

    #[test]
    #[should_panic = "out of range"]
    fn set_data_rejects_out_of_range_sub_resource() {
        let (_, device, context) = test_context!();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 4,
                ..Default::default()
            },
        )
        .unwrap();

        let _ = buffer.set_data(&context, &[SubResource::new(1, vec![0; 4])]);
    }
}
