// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{CommandList, CommandListObject, CommandListType};
use crate::{queue::CommandQueue, DeviceError};
use std::{ops::Deref, sync::Arc};

/// A command list that records compute dispatches.
#[derive(Debug)]
pub struct ComputeCommandList {
    base: Arc<CommandList>,
}

impl ComputeCommandList {
    /// # Panics
    ///
    /// - Panics if `queue` can not execute compute lists.
    pub fn new(queue: &Arc<CommandQueue>, name: impl Into<String>) -> Result<Self, DeviceError> {
        Ok(ComputeCommandList {
            base: CommandList::new(queue, CommandListType::Compute, name.into())?,
        })
    }

    #[inline]
    pub fn reset(&self) -> Result<(), DeviceError> {
        self.base.reset()
    }

    /// Records a dispatch of `group_counts` workgroups.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    /// - Panics if validation is enabled and any of `group_counts` is zero.
    pub fn dispatch(&self, group_counts: [u32; 3]) {
        self.base.verify_encoding("dispatch");

        if self.base.is_validation_enabled() {
            assert!(
                group_counts.iter().all(|&count| count != 0),
                "command list `{}` can not dispatch {group_counts:?} workgroups",
                self.base.name(),
            );
        }

        self.base.with_native(|native| native.dispatch(group_counts));
    }
}

impl Deref for ComputeCommandList {
    type Target = CommandList;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl CommandListObject for ComputeCommandList {
    #[inline]
    fn command_list(&self) -> &Arc<CommandList> {
        &self.base
    }
}
