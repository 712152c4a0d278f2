// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{Command, ExecutionLog, FenceValue, HeadlessCommandList, HeadlessFence};
use crate::{
    command_list::NativeCommandList,
    queue::{CompletionCallback, NativeCommandQueue},
    sync::NativeFence,
    DeviceError,
};
use crossbeam_channel::{Receiver, Sender};
use log::{error, trace};
use smallvec::SmallVec;
use std::{
    any::Any,
    fmt,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

enum QueueOperation {
    Execute {
        lists: SmallVec<[Arc<[Command]>; 4]>,
        on_complete: CompletionCallback,
    },
    Signal {
        fence: Arc<FenceValue>,
        value: u64,
    },
    Wait {
        fence: Arc<FenceValue>,
        value: u64,
    },
}

/// A queue whose operations are carried out in order by a dedicated worker thread.
///
/// Fence waits only block the worker, so the thread submitting work never waits for the device.
pub struct HeadlessCommandQueue {
    name: String,
    sender: Option<Sender<QueueOperation>>,
    worker: Option<JoinHandle<()>>,
}

impl HeadlessCommandQueue {
    pub(super) fn new(
        name: String,
        execution_delay: Option<Duration>,
        log: Arc<ExecutionLog>,
    ) -> Result<Self, DeviceError> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name(format!("Headless {name} Queue"))
            .spawn(move || run_worker(receiver, execution_delay, &log))
            .map_err(|err| DeviceError::Backend(err.into()))?;

        Ok(HeadlessCommandQueue {
            name,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    fn submit(&self, operation: QueueOperation) -> Result<(), DeviceError> {
        self.sender
            .as_ref()
            .ok_or(DeviceError::DeviceLost)?
            .send(operation)
            .map_err(|_| DeviceError::DeviceLost)
    }
}

fn run_worker(
    receiver: Receiver<QueueOperation>,
    execution_delay: Option<Duration>,
    log: &ExecutionLog,
) {
    for operation in receiver {
        match operation {
            QueueOperation::Execute { lists, on_complete } => {
                if let Some(delay) = execution_delay {
                    thread::sleep(delay);
                }

                for commands in &lists {
                    for command in commands.iter() {
                        command.execute(log);
                    }
                }

                on_complete();
            }
            QueueOperation::Signal { fence, value } => fence.signal(value),
            QueueOperation::Wait { fence, value } => {
                if let Err(err) = fence.wait(value, None) {
                    error!("headless queue failed to wait for fence value {value}: {err}");
                }
            }
        }
    }
}

impl NativeCommandQueue for HeadlessCommandQueue {
    fn execute(
        &self,
        lists: &[&dyn NativeCommandList],
        on_complete: CompletionCallback,
    ) -> Result<(), DeviceError> {
        let lists = lists
            .iter()
            .map(|&list| HeadlessCommandList::committed(list))
            .collect::<Result<_, _>>()?;

        self.submit(QueueOperation::Execute { lists, on_complete })
    }

    fn signal(&self, fence: &dyn NativeFence, value: u64) -> Result<(), DeviceError> {
        let fence = HeadlessFence::of(fence)?.value.clone();
        trace!("headless queue `{}` will signal {value}", self.name);

        self.submit(QueueOperation::Signal { fence, value })
    }

    fn wait(&self, fence: &dyn NativeFence, value: u64) -> Result<(), DeviceError> {
        let fence = HeadlessFence::of(fence)?.value.clone();
        trace!("headless queue `{}` will wait for {value}", self.name);

        self.submit(QueueOperation::Wait { fence, value })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for HeadlessCommandQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain the remaining operations and exit.
        drop(self.sender.take());

        // The last reference may be released by a completion callback on the worker itself.
        if let Some(worker) = self
            .worker
            .take()
            .filter(|worker| worker.thread().id() != thread::current().id())
        {
            if worker.join().is_err() {
                error!("the worker of headless queue `{}` panicked", self.name);
            }
        }
    }
}

impl fmt::Debug for HeadlessCommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessCommandQueue")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn wait_blocks_only_the_worker() {
        let queue =
            HeadlessCommandQueue::new("Test".to_owned(), None, Arc::default()).unwrap();
        let fence = HeadlessFence {
            value: Arc::new(FenceValue::default()),
        };
        let completed = Arc::new(AtomicBool::new(false));

        queue.wait(&fence, 1).unwrap();
        queue
            .execute(&[], {
                let completed = completed.clone();
                Box::new(move || completed.store(true, Ordering::SeqCst))
            })
            .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(!completed.load(Ordering::SeqCst));

        fence.value.signal(1);
        drop(queue);
        assert!(completed.load(Ordering::SeqCst));
    }
}
