// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Timeline fences that order work between queues and the host.

use crate::{queue::CommandQueue, DeviceError};
use log::trace;
use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// The implementation of a fence by a native graphics API.
///
/// A native fence holds a monotonically increasing value that is set by the device.
pub trait NativeFence: Send + Sync + fmt::Debug {
    /// Returns the last value the device has set the fence to.
    fn completed_value(&self) -> u64;

    /// Blocks the calling thread until the fence reaches `value`.
    fn wait_on_cpu(&self, value: u64, timeout: Option<Duration>) -> Result<(), DeviceError>;

    fn as_any(&self) -> &dyn Any;
}

/// A fence that is signaled from one queue.
///
/// Every [`signal`](Self::signal) increments the fence value. Waits are always for the last
/// signaled value.
pub struct Fence {
    queue: Arc<CommandQueue>,
    native: Box<dyn NativeFence>,
    value: AtomicU64,
}

impl Fence {
    /// Creates a fence that is signaled from `queue`.
    pub fn new(queue: &Arc<CommandQueue>) -> Result<Self, DeviceError> {
        let native = queue.device().native().create_fence(queue.native())?;

        Ok(Fence {
            queue: queue.clone(),
            native,
            value: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    #[inline]
    pub fn native(&self) -> &dyn NativeFence {
        &*self.native
    }

    /// Returns the last signaled value.
    #[inline]
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Returns the last value the device has reached.
    #[inline]
    pub fn completed_value(&self) -> u64 {
        self.native.completed_value()
    }

    /// Makes the queue set the fence to a new value once all previously submitted work is done.
    ///
    /// Returns the new value.
    pub fn signal(&self) -> Result<u64, DeviceError> {
        let value = self.value.fetch_add(1, Ordering::AcqRel) + 1;
        self.queue.native().signal(&*self.native, value)?;

        trace!("queue `{}` signals fence value {value}", self.queue.name());

        Ok(value)
    }

    /// Blocks the calling thread until the last signaled value is reached.
    #[inline]
    pub fn wait_on_cpu(&self, timeout: Option<Duration>) -> Result<(), DeviceError> {
        self.native.wait_on_cpu(self.value(), timeout)
    }

    /// Makes `waiting_queue` hold back subsequently submitted work until the last signaled value
    /// is reached. Does not block the calling thread.
    pub fn wait_on_gpu(&self, waiting_queue: &CommandQueue) -> Result<(), DeviceError> {
        let value = self.value();
        waiting_queue.native().wait(&*self.native, value)?;

        trace!(
            "queue `{}` waits for fence value {value} of queue `{}`",
            waiting_queue.name(),
            self.queue.name(),
        );

        Ok(())
    }

    /// Signals the fence and blocks until the device reaches the new value.
    pub fn flush_on_cpu(&self) -> Result<(), DeviceError> {
        self.signal()?;

        self.wait_on_cpu(None)
    }

    /// Signals the fence and makes `waiting_queue` wait for the new value.
    pub fn flush_on_gpu(&self, waiting_queue: &CommandQueue) -> Result<(), DeviceError> {
        self.signal()?;

        self.wait_on_gpu(waiting_queue)
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("queue", &self.queue.name())
            .field("value", &self.value())
            .field("completed_value", &self.completed_value())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command_list::CommandListType, headless::HeadlessDeviceCreateInfo, tests::test_context,
    };

    #[test]
    fn flush_on_cpu_reaches_signaled_value() {
        let (_, device, _) = test_context!();
        let queue = CommandQueue::new(
            &device,
            CommandListType::Render,
            device.queue_family(CommandListType::Render),
            "Render",
        )
        .unwrap();
        let fence = Fence::new(&queue).unwrap();

        assert_eq!(fence.value(), 0);
        fence.flush_on_cpu().unwrap();
        fence.flush_on_cpu().unwrap();

        assert_eq!(fence.value(), 2);
        assert_eq!(fence.completed_value(), 2);
    }

    #[test]
    fn gpu_wait_blocks_only_the_waiting_queue() {
        let (_, device, _) = test_context!(HeadlessDeviceCreateInfo::default());
        let signaling = CommandQueue::new(
            &device,
            CommandListType::Transfer,
            device.queue_family(CommandListType::Transfer),
            "Signaling",
        )
        .unwrap();
        let waiting = CommandQueue::new(
            &device,
            CommandListType::Render,
            device.queue_family(CommandListType::Render),
            "Waiting",
        )
        .unwrap();
        let signaling_fence = Fence::new(&signaling).unwrap();
        let waiting_fence = Fence::new(&waiting).unwrap();

        // Nothing was signaled yet on the signaling queue, so value 1 is never reached.
        signaling_fence.value.store(1, Ordering::Release);
        signaling_fence.wait_on_gpu(&waiting).unwrap();
        waiting_fence.signal().unwrap();

        assert!(waiting_fence
            .wait_on_cpu(Some(Duration::from_millis(50)))
            .unwrap_err()
            .is_timeout());

        signaling.native().signal(signaling_fence.native(), 1).unwrap();
        waiting_fence.wait_on_cpu(None).unwrap();
        assert_eq!(waiting_fence.completed_value(), 1);
    }
}
