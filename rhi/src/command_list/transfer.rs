// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{CommandList, CommandListObject, CommandListType};
use crate::{
    queue::CommandQueue,
    resource::{Resource, ResourceKind, SubResource},
    DeviceError,
};
use std::{ops::Deref, sync::Arc};

/// A command list that records copies and uploads.
#[derive(Debug)]
pub struct TransferCommandList {
    base: Arc<CommandList>,
}

impl TransferCommandList {
    /// # Panics
    ///
    /// - Panics if `queue` can not execute transfer lists.
    pub fn new(queue: &Arc<CommandQueue>, name: impl Into<String>) -> Result<Self, DeviceError> {
        Ok(TransferCommandList {
            base: CommandList::new(queue, CommandListType::Transfer, name.into())?,
        })
    }

    /// Resets the list.
    #[inline]
    pub fn reset(&self) -> Result<(), DeviceError> {
        self.base.reset()
    }

    /// Records a write of `sub_resource.data` into `resource`.
    ///
    /// The resource is expected to be in [`ResourceState::CopyDest`] by the time the write
    /// executes.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    /// - Panics if `resource` is a sampler.
    ///
    /// [`ResourceState::CopyDest`]: crate::resource::ResourceState::CopyDest
    pub fn write_sub_resource(&self, resource: &Resource, sub_resource: &SubResource) {
        self.base.verify_encoding("write_sub_resource");
        assert!(
            !matches!(resource.kind(), ResourceKind::Sampler),
            "sampler `{}` has no data to write",
            resource.name(),
        );

        self.base
            .with_native(|native| native.write_sub_resource(resource, sub_resource));
    }
}

impl Deref for TransferCommandList {
    type Target = CommandList;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl CommandListObject for TransferCommandList {
    #[inline]
    fn command_list(&self) -> &Arc<CommandList> {
        &self.base
    }
}
