// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Backend-agnostic core of a GPU rendering engine.
//!
//! This crate tracks the execution state of every GPU-visible resource, computes the barriers
//! that are needed when resources change state or move between queue families, and coordinates
//! the submission of command lists to command queues.
//!
//! # Overview
//!
//! - A [`Device`] wraps a backend implementation of [`NativeDevice`]. Every native API plugs into
//!   the core through the `Native*` traits ([`NativeDevice`], [`NativeCommandQueue`],
//!   [`NativeCommandList`], [`NativeFence`], [`NativeResource`]); the core never branches on
//!   which backend it is talking to. The [`headless`] module contains a backend that executes
//!   everything on CPU worker threads.
//!
//! - A [`Resource`] carries its current [`ResourceState`] and owning queue family. Requesting a
//!   state change produces [`Barrier`]s, which are collected in a [`BarrierSet`] and applied when
//!   the command list recording them is committed.
//!
//! - [`CommandList`]s are recorded against one [`CommandQueue`], grouped into a
//!   [`CommandListSet`] and executed by the queue. [`Fence`]s order work between queues and
//!   between the device and the host.
//!
//! - A [`Context`] owns a dedicated upload [`CommandKit`] plus one default kit per queue type,
//!   and runs deferred actions (resource uploads and initialization completion) at well-defined
//!   flush points. The upload protocol inserts GPU-side fence waits so that work on every other
//!   queue is correctly ordered around the uploads without blocking the host.
//!
//! - A [`ParallelRenderCommandList`] records one render pass into several secondary lists on
//!   the context's worker pool and submits them as one.
//!
//! [`NativeCommandQueue`]: queue::NativeCommandQueue
//! [`NativeCommandList`]: command_list::NativeCommandList
//! [`NativeFence`]: sync::NativeFence
//! [`NativeResource`]: resource::NativeResource
//! [`Resource`]: resource::Resource
//! [`ResourceState`]: resource::ResourceState
//! [`Barrier`]: barrier::Barrier
//! [`BarrierSet`]: barrier::BarrierSet
//! [`CommandList`]: command_list::CommandList
//! [`CommandListSet`]: command_list::CommandListSet
//! [`CommandQueue`]: queue::CommandQueue
//! [`Fence`]: sync::Fence
//! [`Context`]: context::Context
//! [`CommandKit`]: command_kit::CommandKit
//! [`ParallelRenderCommandList`]: command_list::parallel::ParallelRenderCommandList

pub use self::device::{Device, DeviceCapabilities, NativeDevice, QueueFamilyIndex};
use std::{
    error::Error,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

pub mod barrier;
pub mod command_kit;
pub mod command_list;
pub mod context;
pub mod device;
pub mod event;
pub mod headless;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod sync;

/// Error that can happen when the backend executes an operation on the device.
///
/// Failures of this kind are never swallowed by the core: GPU execution order can not be
/// partially honored, so they always propagate to the caller.
#[derive(Debug)]
pub enum DeviceError {
    /// A host memory allocation has failed.
    OutOfHostMemory,

    /// A device memory allocation has failed.
    OutOfDeviceMemory,

    /// The device has been lost, or the backend can no longer accept work.
    DeviceLost,

    /// A wait operation has not completed in the specified time.
    ///
    /// This is a recoverable condition; the caller may retry the wait.
    Timeout,

    /// A backend-specific failure.
    Backend(Box<dyn Error + Send + Sync>),
}

impl DeviceError {
    /// Returns `true` if the error is a [`DeviceError::Timeout`].
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeviceError::Timeout)
    }
}

impl Error for DeviceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DeviceError::Backend(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::OutOfHostMemory => f.write_str("a host memory allocation has failed"),
            DeviceError::OutOfDeviceMemory => {
                f.write_str("a device memory allocation has failed")
            }
            DeviceError::DeviceLost => f.write_str("the device has been lost"),
            DeviceError::Timeout => {
                f.write_str("the wait operation has not completed in the specified time")
            }
            DeviceError::Backend(_) => f.write_str("the backend reported a failure"),
        }
    }
}

/// Used in create-info structures to make them non-exhaustive while still allowing
/// `..Default::default()`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NonExhaustive(pub(crate) ());

impl fmt::Debug for NonExhaustive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("NonExhaustive")
    }
}

const NE: NonExhaustive = NonExhaustive(());

/// Returns a process-wide unique, non-zero object identifier.
pub(crate) fn next_object_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    /// Creates a headless device and a render context on top of it.
    ///
    /// Evaluates to `(headless_device, device, context)`.
    macro_rules! test_context {
        () => {
            $crate::tests::test_context!($crate::headless::HeadlessDeviceCreateInfo::default())
        };
        ($device_create_info:expr) => {
            $crate::tests::test_context!(
                $device_create_info,
                $crate::context::ContextCreateInfo::default()
            )
        };
        ($device_create_info:expr, $context_create_info:expr) => {{
            let _ = env_logger::builder().is_test(true).try_init();

            let headless =
                ::std::sync::Arc::new($crate::headless::HeadlessDevice::new($device_create_info));
            let device = $crate::device::Device::new(headless.clone());
            let context =
                $crate::context::Context::new(device.clone(), $context_create_info).unwrap();

            (headless, device, context)
        }};
    }
    pub(crate) use test_context;
}
