// Copyright (c) 2026 The rhi contributors
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The context, which owns the command kits and runs deferred actions.
//!
//! Work that can not be done at the moment it is requested, such as uploading resource data,
//! is recorded and then performed at the next flush point: [`Context::wait_for_gpu`],
//! [`Context::upload_resources`] or [`Context::complete_initialization`].
//!
//! # Upload protocol
//!
//! Resource data is recorded into the default list of the upload command kit. When the upload
//! is performed:
//!
//! 1. The pre-upload synchronization list of every other default kit, which releases ownership
//!    of the uploaded resources, is executed. Each of those queues signals a fence that the
//!    upload queue waits for on the device.
//! 2. The upload list is executed.
//! 3. The upload queue signals a fence that every other default kit's queue waits for on the
//!    device, after which their post-upload synchronization lists are executed.
//!
//! None of these waits block the host.

use crate::{
    command_kit::CommandKit,
    command_list::{CommandListId, CommandListState, CommandListType},
    device::{Device, QueueFamilyIndex},
    event::{Emitter, SubscriptionToken},
    queue::CommandQueue,
    registry::ObjectRegistry,
    DeviceError, NonExhaustive,
};
use bitflags::bitflags;
use foldhash::HashMap;
use log::{debug, error, info, trace};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
};

/// An action that is performed at the next flush point.
///
/// Actions are ordered: requesting an action never downgrades an already requested one, and
/// performing an action includes everything the lower ones do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DeferredAction {
    None = 0,
    UploadResources = 1,
    CompleteInitialization = 2,
}

impl DeferredAction {
    #[inline]
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => DeferredAction::None,
            1 => DeferredAction::UploadResources,
            _ => DeferredAction::CompleteInitialization,
        }
    }
}

/// What [`Context::wait_for_gpu`] waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WaitFor {
    RenderComplete,
    ComputeComplete,
    ResourcesUploaded,
}

/// The kind of work a context is created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextType {
    Render,
    Compute,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ContextOptions: u32 {
        /// Record uploads into a queue of the default queue family instead of the transfer one.
        const TRANSFER_WITH_DEFAULT_QUEUE = 1 << 0;
    }
}

/// Events emitted by a [`Context`] over its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextEvent {
    /// The context has released its device objects.
    Released,

    /// Initialization is being completed; listeners may still record uploads.
    CompletingInitialization,

    /// The context has been initialized on a device.
    Initialized,
}

/// Parameters to create a new [`Context`].
#[derive(Clone, Debug)]
pub struct ContextCreateInfo {
    /// The default value is `"Context"`.
    pub name: String,

    /// The default value is [`ContextType::Render`].
    pub context_type: ContextType,

    /// The default value is empty.
    pub options: ContextOptions,

    /// The number of threads of the worker pool used for parallel encoding. `None` uses as
    /// many threads as there are logical CPUs.
    ///
    /// The default value is `None`.
    pub worker_threads: Option<usize>,

    /// The number of frames that may be in flight at once, which bounds the frame indices
    /// used for per-frame command list sets.
    ///
    /// The default value is `3`.
    pub frame_buffers_count: u32,

    pub _ne: NonExhaustive,
}

impl Default for ContextCreateInfo {
    #[inline]
    fn default() -> Self {
        ContextCreateInfo {
            name: "Context".to_owned(),
            context_type: ContextType::Render,
            options: ContextOptions::empty(),
            worker_threads: None,
            frame_buffers_count: 3,
            _ne: crate::NE,
        }
    }
}

/// Error that can happen when creating a [`Context`].
#[derive(Debug)]
pub enum ContextCreationError {
    /// The worker pool could not be created.
    WorkerPoolCreation(rayon::ThreadPoolBuildError),
}

impl Error for ContextCreationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ContextCreationError::WorkerPoolCreation(err) => Some(err),
        }
    }
}

impl fmt::Display for ContextCreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextCreationError::WorkerPoolCreation(_) => {
                f.write_str("the worker pool could not be created")
            }
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for ContextCreationError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        ContextCreationError::WorkerPoolCreation(err)
    }
}

#[derive(Debug)]
struct ContextObjects {
    device: Arc<Device>,
    upload_command_kit: Option<Arc<CommandKit>>,
    default_command_kits: HashMap<CommandListType, Arc<CommandKit>>,
    queue_command_kits: HashMap<u64, Arc<CommandKit>>,
}

/// Owns the command kits used to record work on a device, and coordinates deferred actions.
pub struct Context {
    name: String,
    context_type: ContextType,
    options: ContextOptions,
    frame_buffers_count: u32,
    objects: Mutex<Option<ContextObjects>>,
    requested_action: AtomicU8,
    is_completing_initialization: AtomicBool,
    executor: Arc<rayon::ThreadPool>,
    events: Emitter<ContextEvent>,
    object_registry: ObjectRegistry,
}

impl Context {
    /// Creates a context and initializes it on `device`.
    ///
    /// # Panics
    ///
    /// - Panics if `create_info.frame_buffers_count` is zero.
    pub fn new(
        device: Arc<Device>,
        create_info: ContextCreateInfo,
    ) -> Result<Arc<Self>, ContextCreationError> {
        let ContextCreateInfo {
            name,
            context_type,
            options,
            worker_threads,
            frame_buffers_count,
            _ne: _,
        } = create_info;

        assert!(
            frame_buffers_count != 0,
            "the number of frame buffers of context `{name}` must not be zero",
        );

        let executor = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads.unwrap_or(0))
            .thread_name({
                let name = name.clone();
                move |index| format!("{name} Worker {index}")
            })
            .build()?;

        let context = Arc::new(Context {
            name,
            context_type,
            options,
            frame_buffers_count,
            objects: Mutex::new(None),
            requested_action: AtomicU8::new(DeferredAction::None as u8),
            is_completing_initialization: AtomicBool::new(false),
            executor: Arc::new(executor),
            events: Emitter::new(),
            object_registry: ObjectRegistry::new(),
        });
        context.initialize(device);

        Ok(context)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn context_type(&self) -> ContextType {
        self.context_type
    }

    #[inline]
    pub fn options(&self) -> ContextOptions {
        self.options
    }

    #[inline]
    pub fn frame_buffers_count(&self) -> u32 {
        self.frame_buffers_count
    }

    /// Returns the frame index to tag a per-frame command list set with, for the given frame
    /// number.
    #[inline]
    pub fn frame_index(&self, frame_number: u64) -> u32 {
        (frame_number % u64::from(self.frame_buffers_count)) as u32
    }

    /// Returns the worker pool used for parallel encoding.
    #[inline]
    pub fn executor(&self) -> &Arc<rayon::ThreadPool> {
        &self.executor
    }

    #[inline]
    pub fn object_registry(&self) -> &ObjectRegistry {
        &self.object_registry
    }

    /// Returns whether the context is initialized on a device.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.objects.lock().is_some()
    }

    /// Returns the device the context is initialized on.
    ///
    /// # Panics
    ///
    /// - Panics if the context is released.
    pub fn device(&self) -> Arc<Device> {
        self.with_objects(|objects| objects.device.clone())
    }

    /// Returns the list type of the default queue.
    #[inline]
    pub fn default_list_type(&self) -> CommandListType {
        match self.context_type {
            ContextType::Render => CommandListType::Render,
            ContextType::Compute => CommandListType::Compute,
        }
    }

    /// Returns the emitter of the context's lifecycle events.
    #[inline]
    pub fn events(&self) -> &Emitter<ContextEvent> {
        &self.events
    }

    /// Subscribes to the events of the context.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ContextEvent) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.events.subscribe(listener)
    }

    /// Cancels a subscription. Returns whether it was still active.
    #[inline]
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.events.unsubscribe(token)
    }

    /// Initializes the context on `device`.
    ///
    /// # Panics
    ///
    /// - Panics if the context is already initialized.
    pub fn initialize(&self, device: Arc<Device>) {
        {
            let mut objects = self.objects.lock();

            assert!(
                objects.is_none(),
                "context `{}` is already initialized",
                self.name,
            );

            info!("initializing context `{}` on device `{}`", self.name, device.name());

            *objects = Some(ContextObjects {
                device,
                upload_command_kit: None,
                default_command_kits: HashMap::default(),
                queue_command_kits: HashMap::default(),
            });
        }

        self.events.emit(&ContextEvent::Initialized);
    }

    /// Releases every command kit and the device.
    ///
    /// Does nothing if the context is already released.
    pub fn release(&self) {
        let Some(objects) = self.objects.lock().take() else {
            return;
        };

        info!("releasing context `{}`", self.name);

        self.requested_action
            .store(DeferredAction::None as u8, Ordering::Release);
        drop(objects);

        self.events.emit(&ContextEvent::Released);
    }

    /// Waits for the device to finish all work, then releases the context and initializes it
    /// again on `device`.
    pub fn reset(&self, device: Arc<Device>) -> Result<(), DeviceError> {
        if self.is_initialized() {
            self.wait_idle()?;
        }

        self.release();
        self.initialize(device);

        Ok(())
    }

    /// Blocks until every queue of the context has finished all of its work.
    pub fn wait_idle(&self) -> Result<(), DeviceError> {
        for kit in self.command_kits() {
            kit.wait_idle()?;
        }

        Ok(())
    }

    /// Returns the kit that uploads resource data, creating it if needed.
    ///
    /// # Panics
    ///
    /// - Panics if the context is released.
    pub fn upload_command_kit(&self) -> Result<Arc<CommandKit>, DeviceError> {
        let mut objects = self.objects.lock();
        let objects = self.expect_objects(&mut objects);

        if let Some(kit) = &objects.upload_command_kit {
            return Ok(kit.clone());
        }

        let queue_family_index =
            if self.options.contains(ContextOptions::TRANSFER_WITH_DEFAULT_QUEUE) {
                objects.device.queue_family(self.default_list_type())
            } else {
                objects.device.queue_family(CommandListType::Transfer)
            };
        let kit = Arc::new(CommandKit::with_new_queue(
            &objects.device,
            CommandListType::Transfer,
            queue_family_index,
            format!("{} Upload", self.name),
            self.executor.clone(),
        )?);
        objects.upload_command_kit = Some(kit.clone());

        Ok(kit)
    }

    /// Returns the default kit for lists of `list_type`, creating it if needed.
    ///
    /// # Panics
    ///
    /// - Panics if the context is released.
    pub fn default_command_kit(
        &self,
        list_type: CommandListType,
    ) -> Result<Arc<CommandKit>, DeviceError> {
        let mut objects = self.objects.lock();
        let objects = self.expect_objects(&mut objects);

        if let Some(kit) = objects.default_command_kits.get(&list_type) {
            return Ok(kit.clone());
        }

        let kit = Arc::new(CommandKit::with_new_queue(
            &objects.device,
            list_type,
            objects.device.queue_family(list_type),
            format!("{} {list_type:?}", self.name),
            self.executor.clone(),
        )?);
        objects.default_command_kits.insert(list_type, kit.clone());

        Ok(kit)
    }

    /// Returns the default kit for an existing queue, creating it if needed.
    ///
    /// # Panics
    ///
    /// - Panics if the context is released.
    pub fn default_command_kit_for_queue(&self, queue: &Arc<CommandQueue>) -> Arc<CommandKit> {
        let mut objects = self.objects.lock();
        let objects = self.expect_objects(&mut objects);

        if let Some(kit) = objects
            .default_command_kits
            .values()
            .find(|kit| Arc::ptr_eq(kit.queue(), queue))
        {
            return kit.clone();
        }

        objects
            .queue_command_kits
            .entry(queue.id())
            .or_insert_with(|| {
                Arc::new(CommandKit::new(
                    queue.clone(),
                    queue.list_type(),
                    self.executor.clone(),
                ))
            })
            .clone()
    }

    /// Returns a default kit whose queue belongs to the given family, if there is one.
    pub fn command_kit_for_family(
        &self,
        queue_family_index: QueueFamilyIndex,
    ) -> Option<Arc<CommandKit>> {
        let objects = self.objects.lock();
        let objects = objects.as_ref()?;

        objects
            .default_command_kits
            .values()
            .chain(objects.queue_command_kits.values())
            .find(|kit| kit.queue().queue_family_index() == queue_family_index)
            .cloned()
    }

    /// Returns the currently requested deferred action.
    #[inline]
    pub fn requested_action(&self) -> DeferredAction {
        DeferredAction::from_u8(self.requested_action.load(Ordering::Acquire))
    }

    /// Requests `action` to be performed at the next flush point.
    ///
    /// A lower action than the one already requested has no effect.
    pub fn request_deferred_action(&self, action: DeferredAction) {
        let previous = self
            .requested_action
            .fetch_max(action as u8, Ordering::AcqRel);
        let previous = DeferredAction::from_u8(previous);

        if action > previous {
            trace!("context `{}` requested {action:?}", self.name);
        }
    }

    /// Performs the requested deferred action now.
    pub fn perform_requested_action(&self) -> Result<(), DeviceError> {
        match self.requested_action() {
            DeferredAction::None => Ok(()),
            DeferredAction::UploadResources => {
                let _ = self.requested_action.compare_exchange(
                    DeferredAction::UploadResources as u8,
                    DeferredAction::None as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );

                self.upload_resources().map(|_| ()).inspect_err(|_| {
                    self.request_deferred_action(DeferredAction::UploadResources);
                })
            }
            DeferredAction::CompleteInitialization => self.complete_initialization(),
        }
    }

    /// Uploads pending resource data, lets the listeners of
    /// [`ContextEvent::CompletingInitialization`] record more, uploads that as well, and
    /// prunes the object registry.
    ///
    /// Calls made while the context is already completing initialization return immediately.
    pub fn complete_initialization(&self) -> Result<(), DeviceError> {
        if self
            .is_completing_initialization
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let _guard = scopeguard::guard((), |()| {
            self.is_completing_initialization
                .store(false, Ordering::Release);
        });

        info!("completing initialization of context `{}`", self.name);

        self.upload_resources()?;
        self.events.emit(&ContextEvent::CompletingInitialization);
        self.upload_resources()?;
        self.object_registry.complete_initialization();

        self.requested_action
            .store(DeferredAction::None as u8, Ordering::Release);

        Ok(())
    }

    /// Returns whether [`complete_initialization`](Self::complete_initialization) is running.
    #[inline]
    pub fn is_completing_initialization(&self) -> bool {
        self.is_completing_initialization.load(Ordering::Acquire)
    }

    /// Executes the upload command list, synchronized with every other default queue.
    ///
    /// Returns `false` if there was nothing to upload, and `true` if the uploads were submitted
    /// or are still executing.
    pub fn upload_resources(&self) -> Result<bool, DeviceError> {
        let Some(upload_kit) = self
            .with_objects_opt(|objects| objects.upload_command_kit.clone())
            .flatten()
        else {
            return Ok(false);
        };

        if !upload_kit.has_list(CommandListId::DEFAULT) {
            return Ok(false);
        }

        let upload_list = upload_kit.list(CommandListId::DEFAULT)?;

        match upload_list.state() {
            CommandListState::Executing => return Ok(true),
            CommandListState::Completed => return Ok(false),
            CommandListState::Encoding => upload_list.commit()?,
            CommandListState::Committed => {}
        }

        debug!("uploading resources of context `{}`", self.name);

        let upload_queue = upload_kit.queue();
        let other_kits = self.synchronized_command_kits(upload_queue);

        for kit in &other_kits {
            if self.execute_sync_list(kit, CommandListId::PRE_UPLOAD_SYNC)? {
                kit.fence(CommandKit::UPLOAD_SYNC_FENCE_ID)?
                    .flush_on_gpu(upload_queue)?;
            }
        }

        upload_queue.execute(&upload_kit.list_set(&[CommandListId::DEFAULT], None)?, None)?;

        let upload_fence = upload_kit.fence(CommandKit::UPLOAD_SYNC_FENCE_ID)?;
        upload_fence.signal()?;

        for kit in &other_kits {
            upload_fence.wait_on_gpu(kit.queue())?;
            self.execute_sync_list(kit, CommandListId::POST_UPLOAD_SYNC)?;
        }

        Ok(true)
    }

    /// Executes a pending synchronization list of `kit`. Returns whether it was executed.
    fn execute_sync_list(&self, kit: &CommandKit, id: CommandListId) -> Result<bool, DeviceError> {
        if !kit.has_list(id) {
            return Ok(false);
        }

        let list = kit.list(id)?;

        match list.state() {
            CommandListState::Executing | CommandListState::Completed => return Ok(false),
            CommandListState::Encoding => list.commit()?,
            CommandListState::Committed => {}
        }

        trace!("executing {id} list of `{}`", kit.name());
        kit.queue().execute(&kit.list_set(&[id], None)?, None)?;

        Ok(true)
    }

    /// Performs deferred actions and blocks until the device has finished the requested work.
    ///
    /// - [`WaitFor::RenderComplete`] and [`WaitFor::ComputeComplete`] perform the requested
    ///   action, then wait for the default render or compute queue.
    /// - [`WaitFor::ResourcesUploaded`] waits for the upload queue, then completes the
    ///   initialization if that was requested.
    pub fn wait_for_gpu(&self, wait_for: WaitFor) -> Result<(), DeviceError> {
        match wait_for {
            WaitFor::ResourcesUploaded => {
                if let Some(kit) = self
                    .with_objects_opt(|objects| objects.upload_command_kit.clone())
                    .flatten()
                {
                    kit.fence(CommandKit::DEFAULT_FENCE_ID)?.flush_on_cpu()?;
                }

                if self.requested_action() == DeferredAction::CompleteInitialization {
                    self.complete_initialization()?;
                }
            }
            WaitFor::RenderComplete | WaitFor::ComputeComplete => {
                self.perform_requested_action()?;

                let list_type = match wait_for {
                    WaitFor::ComputeComplete => CommandListType::Compute,
                    _ => CommandListType::Render,
                };

                let kit = self.with_objects_opt(|objects| {
                    objects.default_command_kits.get(&list_type).cloned()
                });

                if let Some(kit) = kit.flatten() {
                    kit.fence(CommandKit::DEFAULT_FENCE_ID)?.flush_on_cpu()?;
                }
            }
        }

        Ok(())
    }

    /// Returns every default kit whose queue is not `upload_queue`, one per queue.
    fn synchronized_command_kits(
        &self,
        upload_queue: &Arc<CommandQueue>,
    ) -> SmallVec<[Arc<CommandKit>; 4]> {
        self.with_objects_opt(|objects| {
            let mut kits: SmallVec<[Arc<CommandKit>; 4]> = SmallVec::new();

            for kit in objects
                .default_command_kits
                .values()
                .chain(objects.queue_command_kits.values())
            {
                if !Arc::ptr_eq(kit.queue(), upload_queue)
                    && !kits.iter().any(|other| Arc::ptr_eq(other.queue(), kit.queue()))
                {
                    kits.push(kit.clone());
                }
            }

            kits.sort_by_key(|kit| kit.queue().id());

            kits
        })
        .unwrap_or_default()
    }

    fn command_kits(&self) -> SmallVec<[Arc<CommandKit>; 4]> {
        self.with_objects_opt(|objects| {
            objects
                .upload_command_kit
                .iter()
                .chain(objects.default_command_kits.values())
                .chain(objects.queue_command_kits.values())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }

    fn expect_objects<'a>(
        &self,
        objects: &'a mut Option<ContextObjects>,
    ) -> &'a mut ContextObjects {
        objects
            .as_mut()
            .unwrap_or_else(|| panic!("context `{}` is released", self.name))
    }

    fn with_objects<R>(&self, f: impl FnOnce(&ContextObjects) -> R) -> R {
        let mut objects = self.objects.lock();

        f(self.expect_objects(&mut objects))
    }

    fn with_objects_opt<R>(&self, f: impl FnOnce(&ContextObjects) -> R) -> Option<R> {
        self.objects.lock().as_ref().map(f)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.objects.get_mut().is_some() {
            if let Err(err) = self.wait_idle() {
                error!("failed to wait for context `{}` to become idle: {err}", self.name);
            }
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("context_type", &self.context_type)
            .field("options", &self.options)
            .field("requested_action", &self.requested_action())
            .finish_non_exhaustive()
    }
}
