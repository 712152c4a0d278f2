// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{
    render::{RenderCommandList, RenderState},
    CommandList, CommandListObject, CommandListType,
};
use crate::{barrier::BarrierSet, queue::CommandQueue, DeviceError};
use log::debug;
use parking_lot::RwLock;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::{fmt, ops::Deref, sync::Arc};

/// A render pass encoded into several secondary render lists, one per thread.
///
/// The list itself is the beginning list of the pass: barriers that have to execute before any
/// secondary list are recorded into it with [`set_beginning_resource_barriers`]. Barriers that
/// have to execute after all of them go into the ending list with
/// [`set_ending_resource_barriers`]. The secondary lists are executed in between, in index
/// order.
///
/// Resets and commits of the secondary lists are spread over the worker pool, unless the device
/// does not support encoding on several threads.
///
/// [`set_beginning_resource_barriers`]: Self::set_beginning_resource_barriers
/// [`set_ending_resource_barriers`]: Self::set_ending_resource_barriers
pub struct ParallelRenderCommandList {
    base: Arc<CommandList>,
    ending: Arc<CommandList>,
    queue: Arc<CommandQueue>,
    executor: Arc<rayon::ThreadPool>,
    parallel_lists: RwLock<Vec<Arc<RenderCommandList>>>,
}

impl ParallelRenderCommandList {
    /// # Panics
    ///
    /// - Panics if `queue` can not execute render lists.
    pub fn new(
        queue: &Arc<CommandQueue>,
        name: impl Into<String>,
        executor: Arc<rayon::ThreadPool>,
    ) -> Result<Self, DeviceError> {
        let name = name.into();
        let ending = CommandList::new(queue, CommandListType::Render, format!("{name} [Ending]"))?;
        let base = CommandList::new(queue, CommandListType::ParallelRender, name)?;

        Ok(ParallelRenderCommandList {
            base,
            ending,
            queue: queue.clone(),
            executor,
            parallel_lists: RwLock::new(Vec::new()),
        })
    }

    /// Returns the secondary lists.
    #[inline]
    pub fn parallel_command_lists(&self) -> Vec<Arc<RenderCommandList>> {
        self.parallel_lists.read().clone()
    }

    #[inline]
    pub fn parallel_command_lists_count(&self) -> usize {
        self.parallel_lists.read().len()
    }

    /// Returns the list that is executed after every secondary list.
    #[inline]
    pub fn ending_command_list(&self) -> &Arc<CommandList> {
        &self.ending
    }

    /// Grows or shrinks the number of secondary lists to `count`.
    ///
    /// New lists inherit the validation setting of this list.
    pub fn set_parallel_command_lists_count(&self, count: usize) -> Result<(), DeviceError> {
        let mut parallel_lists = self.parallel_lists.write();

        if count <= parallel_lists.len() {
            parallel_lists.truncate(count);

            return Ok(());
        }

        let validation_enabled = self.base.is_validation_enabled();

        for index in parallel_lists.len()..count {
            let name = format!("{} - Thread {index}", self.base.name());
            let list = RenderCommandList::new(&self.queue, name)?;
            list.set_validation_enabled(validation_enabled);
            parallel_lists.push(Arc::new(list));
        }

        debug!(
            "parallel render command list `{}` now has {count} secondary lists",
            self.base.name(),
        );

        Ok(())
    }

    /// Enables or disables validation on this list and all of its secondary lists.
    pub fn set_validation_enabled(&self, enabled: bool) {
        self.base.set_validation_enabled(enabled);
        self.ending.set_validation_enabled(enabled);

        for list in self.parallel_lists.read().iter() {
            list.set_validation_enabled(enabled);
        }
    }

    /// Resets the beginning, ending and every secondary list.
    ///
    /// # Panics
    ///
    /// - Panics if any of the lists is committed or executing.
    pub fn reset(&self) -> Result<(), DeviceError> {
        self.base.reset()?;
        self.ending.reset()?;

        self.for_each_parallel_list(RenderCommandList::reset)
    }

    /// Resets every list and binds `render_state` on every secondary list.
    ///
    /// # Panics
    ///
    /// - Panics if any of the lists is committed or executing.
    pub fn reset_with_state(&self, render_state: &Arc<dyn RenderState>) -> Result<(), DeviceError> {
        self.base.reset()?;
        self.ending.reset()?;

        self.for_each_parallel_list(|list| list.reset_with_state(render_state))
    }

    /// Records barriers that execute before every secondary list.
    #[inline]
    pub fn set_beginning_resource_barriers(&self, barriers: &BarrierSet) {
        self.base.set_resource_barriers(barriers);
    }

    /// Records barriers that execute after every secondary list.
    #[inline]
    pub fn set_ending_resource_barriers(&self, barriers: &BarrierSet) {
        self.ending.set_resource_barriers(barriers);
    }

    /// Commits every secondary list, then the ending list, then the beginning list.
    ///
    /// # Panics
    ///
    /// - Panics if any of the lists is not encoding.
    pub fn commit(&self) -> Result<(), DeviceError> {
        self.for_each_parallel_list(|list| list.commit())?;
        self.ending.commit()?;

        self.base.commit()
    }

    fn for_each_parallel_list(
        &self,
        op: impl Fn(&RenderCommandList) -> Result<(), DeviceError> + Send + Sync,
    ) -> Result<(), DeviceError> {
        let guard = self.parallel_lists.read();
        let parallel_lists: &[Arc<RenderCommandList>] = &guard;

        if self.queue.device().capabilities().parallel_encoding {
            self.executor
                .install(|| parallel_lists.par_iter().try_for_each(|list| op(&**list)))
        } else {
            parallel_lists.iter().try_for_each(|list| op(&**list))
        }
    }
}

impl Deref for ParallelRenderCommandList {
    type Target = CommandList;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl CommandListObject for ParallelRenderCommandList {
    #[inline]
    fn command_list(&self) -> &Arc<CommandList> {
        &self.base
    }

    fn execution_lists(&self) -> SmallVec<[Arc<CommandList>; 4]> {
        let parallel_lists = self.parallel_lists.read();
        let mut lists = SmallVec::with_capacity(parallel_lists.len() + 2);
        lists.push(self.base.clone());
        lists.extend(
            parallel_lists
                .iter()
                .map(|list| list.command_list().clone()),
        );
        lists.push(self.ending.clone());

        lists
    }
}

impl fmt::Debug for ParallelRenderCommandList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelRenderCommandList")
            .field("base", &self.base)
            .field("ending", &self.ending)
            .field("parallel_lists", &*self.parallel_lists.read())
            .finish_non_exhaustive()
    }
}
