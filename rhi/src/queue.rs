// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Command queues, which execute command list sets in submission order.

use crate::{
    command_list::{CommandListSet, CommandListType, NativeCommandList},
    device::{Device, QueueFamilyIndex},
    next_object_id,
    sync::NativeFence,
    DeviceError,
};
use log::{debug, error, trace};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{any::Any, collections::VecDeque, fmt, sync::Arc};

/// Called by the backend once the device has finished executing a submission.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Called once a command list set has completed.
pub type CompletedHandler = Box<dyn FnOnce(&CommandListSet) + Send + 'static>;

/// The implementation of a command queue by a native graphics API.
///
/// Operations are executed by the device in the order they are submitted to the queue.
pub trait NativeCommandQueue: Send + Sync + fmt::Debug {
    /// Submits committed command lists for execution, in order.
    ///
    /// `on_complete` must be called exactly once, after the device has finished executing every
    /// one of the lists. It may be called from any thread.
    fn execute(
        &self,
        lists: &[&dyn NativeCommandList],
        on_complete: CompletionCallback,
    ) -> Result<(), DeviceError>;

    /// Makes the device set `fence` to `value` once all previously submitted work is done.
    fn signal(&self, fence: &dyn NativeFence, value: u64) -> Result<(), DeviceError>;

    /// Makes the device hold back subsequently submitted work until `fence` reaches `value`.
    ///
    /// This must not block the calling thread.
    fn wait(&self, fence: &dyn NativeFence, value: u64) -> Result<(), DeviceError>;

    fn as_any(&self) -> &dyn Any;
}

/// A queue of a given type and family on the device.
pub struct CommandQueue {
    id: u64,
    name: String,
    device: Arc<Device>,
    list_type: CommandListType,
    queue_family_index: QueueFamilyIndex,
    native: Box<dyn NativeCommandQueue>,
    executing: Mutex<VecDeque<Arc<CommandListSet>>>,
}

impl CommandQueue {
    pub fn new(
        device: &Arc<Device>,
        list_type: CommandListType,
        queue_family_index: QueueFamilyIndex,
        name: impl Into<String>,
    ) -> Result<Arc<Self>, DeviceError> {
        let name = name.into();
        let native = device
            .native()
            .create_command_queue(list_type, queue_family_index)?;

        debug!("created {list_type:?} queue `{name}` on queue family {queue_family_index}");

        let queue = Arc::new(CommandQueue {
            id: next_object_id(),
            name,
            device: device.clone(),
            list_type,
            queue_family_index,
            native,
            executing: Mutex::new(VecDeque::new()),
        });
        device.register_queue(&queue);

        Ok(queue)
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
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Returns the type of lists the queue was created for.
    #[inline]
    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }

    #[inline]
    pub fn queue_family_index(&self) -> QueueFamilyIndex {
        self.queue_family_index
    }

    #[inline]
    pub fn native(&self) -> &dyn NativeCommandQueue {
        &*self.native
    }

    /// Returns the number of sets that have been submitted and have not completed yet.
    #[inline]
    pub fn executing_count(&self) -> usize {
        self.executing.lock().len()
    }

    /// Submits `set` for execution.
    ///
    /// Every list of the set becomes executing. Once the device has finished the set,
    /// `on_complete` is called on an arbitrary thread, after which the lists become completed.
    ///
    /// # Panics
    ///
    /// - Panics if `set` was created for another queue.
    /// - Panics if `set` is already executing.
    /// - Panics if any list of `set` is neither committed nor completed.
    pub fn execute(
        self: &Arc<Self>,
        set: &Arc<CommandListSet>,
        on_complete: Option<CompletedHandler>,
    ) -> Result<(), DeviceError> {
        assert!(
            Arc::ptr_eq(set.queue(), self),
            "the command list set was created for queue `{}`, not `{}`",
            set.queue().name(),
            self.name,
        );

        set.begin_execution();
        self.executing.lock().push_back(set.clone());

        let queue = Arc::downgrade(self);
        let completed_set = set.clone();
        let callback: CompletionCallback = Box::new(move || {
            if let Some(on_complete) = on_complete {
                on_complete(&completed_set);
            }

            completed_set.complete();

            if let Some(queue) = queue.upgrade() {
                queue.remove_executing(&completed_set);
            }
        });

        let result = {
            let guards: SmallVec<[_; 4]> =
                set.lists().iter().map(|list| list.lock_native()).collect();
            let lists: SmallVec<[&dyn NativeCommandList; 4]> =
                guards.iter().map(|guard| &***guard).collect();

            self.native.execute(&lists, callback)
        };

        match result {
            Ok(()) => {
                trace!(
                    "executing {} command lists on queue `{}`",
                    set.lists().len(),
                    self.name,
                );

                Ok(())
            }
            Err(err) => {
                error!("queue `{}` failed to execute command lists: {err}", self.name);
                self.remove_executing(set);
                set.abort_execution();

                Err(err)
            }
        }
    }

    fn remove_executing(&self, set: &Arc<CommandListSet>) {
        let mut executing = self.executing.lock();

        if let Some(index) = executing
            .iter()
            .position(|executing_set| Arc::ptr_eq(executing_set, set))
        {
            executing.remove(index);
        }
    }

    /// Blocks until every set submitted to this queue has completed.
    pub fn wait_idle(&self) -> Result<(), DeviceError> {
        loop {
            let front = {
                let mut executing = self.executing.lock();
                executing.retain(|set| set.is_executing());

                executing.front().cloned()
            };

            match front {
                Some(set) => set.wait_until_completed(None)?,
                None => return Ok(()),
            }
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            error!("failed to wait for queue `{}` to become idle: {err}", self.name);
        }
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("name", &self.name)
            .field("list_type", &self.list_type)
            .field("queue_family_index", &self.queue_family_index)
            .field("native", &self.native)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CommandQueue {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CommandQueue {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command_list::{transfer::TransferCommandList, CommandListObject, CommandListState},
        headless::HeadlessDeviceCreateInfo,
        resource::{BufferCreateInfo, Resource, ResourceUsage, SubResource},
        tests::test_context,
    };
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[test]
    fn executes_in_submission_order() {
        let (_, device, _) = test_context!(HeadlessDeviceCreateInfo {
            execution_delay: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        let queue = CommandQueue::new(
            &device,
            CommandListType::Transfer,
            device.queue_family(CommandListType::Transfer),
            "Transfer",
        )
        .unwrap();
        let buffer = Resource::buffer(
            &device,
            BufferCreateInfo {
                size: 1,
                usage: ResourceUsage::READBACK,
                ..Default::default()
            },
        )
        .unwrap();

        let completed = Arc::new(AtomicUsize::new(0));
        let sets: Vec<_> = (0..3u8)
            .map(|value| {
                let list = TransferCommandList::new(&queue, format!("Write {value}")).unwrap();
                list.write_sub_resource(&buffer, &SubResource::new(0, vec![value]));
                list.commit().unwrap();

                CommandListSet::new(&[&list], None)
            })
            .collect();

        for (index, set) in sets.iter().enumerate() {
            let completed = completed.clone();
            queue
                .execute(
                    set,
                    Some(Box::new(move |_| {
                        assert_eq!(completed.fetch_add(1, Ordering::SeqCst), index);
                    })),
                )
                .unwrap();
        }

        assert!(queue.executing_count() > 0);
        queue.wait_idle().unwrap();

        assert_eq!(queue.executing_count(), 0);
        assert_eq!(completed.load(Ordering::SeqCst), 3);
        assert_eq!(buffer.read_data(0).unwrap(), [2]);
        assert!(sets.iter().all(|set| set
            .lists()
            .iter()
            .all(|list| list.state() == CommandListState::Completed)));
    }

    #[test]
    #[should_panic = "already executing"]
    fn executing_set_twice_panics() {
        let (_, device, _) = test_context!(HeadlessDeviceCreateInfo {
            execution_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let queue = CommandQueue::new(
            &device,
            CommandListType::Render,
            device.queue_family(CommandListType::Render),
            "Render",
        )
        .unwrap();
        let list = TransferCommandList::new(&queue, "List").unwrap();
        list.commit().unwrap();
        let set = CommandListSet::new(&[list.command_list()], None);

        queue.execute(&set, None).unwrap();
        let _ = queue.execute(&set, None);
    }

    #[test]
    fn completed_set_is_executed_again() {
        let (_, device, _) = test_context!();
        let queue = CommandQueue::new(
            &device,
            CommandListType::Compute,
            device.queue_family(CommandListType::Compute),
            "Compute",
        )
        .unwrap();
        let list = TransferCommandList::new(&queue, "List").unwrap();
        list.commit().unwrap();
        let set = CommandListSet::new(&[&list], None);

        for _ in 0..3 {
            queue.execute(&set, None).unwrap();
            set.wait_until_completed(None).unwrap();
        }

        device.wait_idle().unwrap();
        assert_eq!(list.state(), CommandListState::Completed);
    }
}
