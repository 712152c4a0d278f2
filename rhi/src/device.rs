// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The device and its backend hooks.

use crate::{
    command_list::{CommandListType, NativeCommandList},
    queue::{CommandQueue, NativeCommandQueue},
    resource::{NativeResource, ResourceDescription},
    sync::NativeFence,
    DeviceError,
};
use log::debug;
use parking_lot::Mutex;
use std::{
    fmt,
    ops::Deref,
    sync::{Arc, Weak},
};

/// The implementation of a device by a native graphics API.
///
/// This is the only place where a backend plugs into the core. Every object the core creates
/// that needs a native counterpart goes through one of these factory methods.
pub trait NativeDevice: Send + Sync + fmt::Debug {
    /// Returns the human-readable name of the adapter.
    fn name(&self) -> &str;

    /// Returns the capabilities of the device.
    fn capabilities(&self) -> DeviceCapabilities;

    /// Creates a native queue that executes lists of `list_type` on the given family.
    fn create_command_queue(
        &self,
        list_type: CommandListType,
        queue_family_index: QueueFamilyIndex,
    ) -> Result<Box<dyn NativeCommandQueue>, DeviceError>;

    /// Creates a native command list that will be executed on `queue`.
    fn create_command_list(
        &self,
        queue: &dyn NativeCommandQueue,
        list_type: CommandListType,
    ) -> Result<Box<dyn NativeCommandList>, DeviceError>;

    /// Creates a native fence that is signaled from `queue`.
    fn create_fence(
        &self,
        queue: &dyn NativeCommandQueue,
    ) -> Result<Box<dyn NativeFence>, DeviceError>;

    /// Creates the native memory and views backing a resource.
    fn create_resource(
        &self,
        description: &ResourceDescription,
    ) -> Result<Box<dyn NativeResource>, DeviceError>;
}

/// The capabilities of a device that the core takes into account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities {
    /// Whether command lists may be encoded on several threads at once.
    ///
    /// When this is `false`, parallel render command lists encode their secondary lists one
    /// after another on the calling thread.
    pub parallel_encoding: bool,

    /// The queue family used for render command lists.
    pub render_queue_family: QueueFamilyIndex,

    /// The queue family used for compute command lists.
    pub compute_queue_family: QueueFamilyIndex,

    /// The queue family used for transfer command lists.
    pub transfer_queue_family: QueueFamilyIndex,
}

impl DeviceCapabilities {
    /// Returns the queue family that executes lists of the given type.
    #[inline]
    pub fn queue_family(&self, list_type: CommandListType) -> QueueFamilyIndex {
        match list_type {
            CommandListType::Render | CommandListType::ParallelRender => {
                self.render_queue_family
            }
            CommandListType::Compute => self.compute_queue_family,
            CommandListType::Transfer => self.transfer_queue_family,
        }
    }
}

/// A GPU device, as seen by the core.
pub struct Device {
    native: Arc<dyn NativeDevice>,
    capabilities: DeviceCapabilities,
    queues: Mutex<Vec<Weak<CommandQueue>>>,
}

impl Device {
    /// Wraps a native device.
    pub fn new(native: Arc<dyn NativeDevice>) -> Arc<Self> {
        let capabilities = native.capabilities();
        debug!("created device `{}` with {:?}", native.name(), capabilities);

        Arc::new(Device {
            native,
            capabilities,
            queues: Mutex::new(Vec::new()),
        })
    }

    /// Returns the native device.
    #[inline]
    pub fn native(&self) -> &Arc<dyn NativeDevice> {
        &self.native
    }

    /// Returns the name of the adapter.
    #[inline]
    pub fn name(&self) -> &str {
        self.native.name()
    }

    /// Returns the capabilities of the device.
    #[inline]
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Returns the queue family that executes lists of the given type.
    #[inline]
    pub fn queue_family(&self, list_type: CommandListType) -> QueueFamilyIndex {
        self.capabilities.queue_family(list_type)
    }

    pub(crate) fn register_queue(&self, queue: &Arc<CommandQueue>) {
        let mut queues = self.queues.lock();
        queues.retain(|queue| queue.strong_count() != 0);
        queues.push(Arc::downgrade(queue));
    }

    /// Blocks until every queue created on this device has finished executing.
    pub fn wait_idle(&self) -> Result<(), DeviceError> {
        let queues: Vec<_> = self
            .queues
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        for queue in queues {
            queue.wait_idle()?;
        }

        Ok(())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("native", &self.native)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// An index of a queue family on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct QueueFamilyIndex(pub u32);

impl From<u32> for QueueFamilyIndex {
    #[inline]
    fn from(val: u32) -> Self {
        Self(val)
    }
}

impl From<QueueFamilyIndex> for u32 {
    #[inline]
    fn from(val: QueueFamilyIndex) -> Self {
        val.0
    }
}

impl Deref for QueueFamilyIndex {
    type Target = u32;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for QueueFamilyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
