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
    resource::{BufferSet, Resource, ResourceState},
    DeviceError,
};
use parking_lot::Mutex;
use std::{
    any::Any,
    fmt,
    ops::Deref,
    sync::{Arc, Weak},
};

/// How vertices are assembled into primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Point,
    Line,
    LineStrip,
    Triangle,
    TriangleStrip,
}

/// A pipeline state object created by the backend.
///
/// The core only binds it; what it contains is up to the backend.
pub trait RenderState: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// What is currently bound on a render command list.
///
/// Everything is referenced weakly, so that binding a resource does not keep it alive.
#[derive(Debug, Default)]
struct DrawingState {
    render_state: Option<Weak<dyn RenderState>>,
    vertex_buffer_set: Option<Weak<BufferSet>>,
    index_buffer: Option<Weak<Resource>>,
    primitive_type: Option<PrimitiveType>,
}

/// A command list that records draws.
#[derive(Debug)]
pub struct RenderCommandList {
    base: Arc<CommandList>,
    drawing_state: Mutex<DrawingState>,
}

impl RenderCommandList {
    /// # Panics
    ///
    /// - Panics if `queue` can not execute render lists.
    pub fn new(queue: &Arc<CommandQueue>, name: impl Into<String>) -> Result<Self, DeviceError> {
        Ok(RenderCommandList {
            base: CommandList::new(queue, CommandListType::Render, name.into())?,
            drawing_state: Mutex::new(DrawingState::default()),
        })
    }

    /// Resets the list and forgets everything that was bound.
    ///
    /// # Panics
    ///
    /// - Panics if the list is committed or executing.
    pub fn reset(&self) -> Result<(), DeviceError> {
        self.base.reset()?;
        *self.drawing_state.lock() = DrawingState::default();

        Ok(())
    }

    /// Resets the list and binds `render_state`.
    ///
    /// # Panics
    ///
    /// - Panics if the list is committed or executing.
    pub fn reset_with_state(&self, render_state: &Arc<dyn RenderState>) -> Result<(), DeviceError> {
        self.reset()?;
        self.set_render_state(render_state);

        Ok(())
    }

    /// Binds `render_state`. Returns `false` if it was already bound.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    pub fn set_render_state(&self, render_state: &Arc<dyn RenderState>) -> bool {
        self.base.verify_encoding("set_render_state");

        let render_state_weak = Arc::downgrade(render_state);
        let mut drawing_state = self.drawing_state.lock();

        if drawing_state
            .render_state
            .as_ref()
            .is_some_and(|bound| Weak::ptr_eq(bound, &render_state_weak))
        {
            return false;
        }

        self.base
            .with_native(|native| native.set_render_state(&**render_state));
        drawing_state.render_state = Some(render_state_weak);

        true
    }

    /// Binds the vertex buffers of `buffer_set`. Returns `false` if they were already bound.
    ///
    /// If `set_resource_barriers` is `true`, the buffers are also transitioned to
    /// [`ResourceState::VertexBuffer`]. Secondary lists of a parallel render list pass `false`
    /// and leave the transitions to the beginning list.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    pub fn set_vertex_buffers(
        &self,
        buffer_set: &Arc<BufferSet>,
        set_resource_barriers: bool,
    ) -> bool {
        self.base.verify_encoding("set_vertex_buffers");

        let buffer_set_weak = Arc::downgrade(buffer_set);

        if self
            .drawing_state
            .lock()
            .vertex_buffer_set
            .as_ref()
            .is_some_and(|bound| Weak::ptr_eq(bound, &buffer_set_weak))
        {
            return false;
        }

        if set_resource_barriers {
            if let Some(barriers) = buffer_set.set_state(ResourceState::VertexBuffer) {
                self.base.set_resource_barriers(&barriers);
            }
        }

        self.base
            .with_native(|native| native.set_vertex_buffers(buffer_set.buffers()));
        self.drawing_state.lock().vertex_buffer_set = Some(buffer_set_weak);

        true
    }

    /// Binds `buffer` as the index buffer. Returns `false` if it was already bound.
    ///
    /// If `set_resource_barriers` is `true`, the buffer is also transitioned to
    /// [`ResourceState::IndexBuffer`].
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    /// - Panics if `buffer` is not an index buffer.
    pub fn set_index_buffer(&self, buffer: &Arc<Resource>, set_resource_barriers: bool) -> bool {
        self.base.verify_encoding("set_index_buffer");
        assert!(
            buffer.index_format().is_some(),
            "resource `{}` is not an index buffer",
            buffer.name(),
        );

        let buffer_weak = Arc::downgrade(buffer);

        if self
            .drawing_state
            .lock()
            .index_buffer
            .as_ref()
            .is_some_and(|bound| Weak::ptr_eq(bound, &buffer_weak))
        {
            return false;
        }

        if set_resource_barriers {
            self.base
                .transition_resource_state(buffer, ResourceState::IndexBuffer);
        }

        self.base
            .with_native(|native| native.set_index_buffer(buffer));
        self.drawing_state.lock().index_buffer = Some(buffer_weak);

        true
    }

    /// Records a non-indexed draw.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    /// - Panics if validation is enabled and `vertex_count` or `instance_count` is zero, or no
    ///   vertex buffers are bound.
    pub fn draw(
        &self,
        primitive_type: PrimitiveType,
        vertex_count: u32,
        start_vertex: u32,
        instance_count: u32,
        start_instance: u32,
    ) {
        self.base.verify_encoding("draw");

        let mut drawing_state = self.drawing_state.lock();

        if self.base.is_validation_enabled() {
            assert!(vertex_count != 0, "draw of zero vertices");
            assert!(instance_count != 0, "draw of zero instances");
            self.validate_vertex_buffers(&drawing_state);
        }

        self.base.with_native(|native| {
            if drawing_state.primitive_type != Some(primitive_type) {
                native.set_primitive_type(primitive_type);
            }

            native.draw(vertex_count, start_vertex, instance_count, start_instance);
        });
        drawing_state.primitive_type = Some(primitive_type);
    }

    /// Records an indexed draw.
    ///
    /// An `index_count` of zero draws every index of the bound index buffer.
    ///
    /// # Panics
    ///
    /// - Panics if the list is not encoding.
    /// - Panics if no index buffer is bound.
    /// - Panics if validation is enabled and the index range exceeds the index buffer,
    ///   `instance_count` is zero or no vertex buffers are bound.
    pub fn draw_indexed(
        &self,
        primitive_type: PrimitiveType,
        index_count: u32,
        start_index: u32,
        start_vertex: u32,
        instance_count: u32,
        start_instance: u32,
    ) {
        self.base.verify_encoding("draw_indexed");

        let mut drawing_state = self.drawing_state.lock();
        let index_buffer = drawing_state
            .index_buffer
            .as_ref()
            .and_then(Weak::upgrade)
            .unwrap_or_else(|| {
                panic!(
                    "command list `{}` has no index buffer bound for an indexed draw",
                    self.base.name(),
                )
            });
        let formatted_items_count = index_buffer.formatted_items_count();
        let index_count = if index_count == 0 {
            formatted_items_count
        } else {
            index_count
        };

        if self.base.is_validation_enabled() {
            assert!(
                u64::from(start_index) + u64::from(index_count)
                    <= u64::from(formatted_items_count),
                "indices {start_index}..{} exceed the {formatted_items_count} indices of buffer \
                `{}`",
                u64::from(start_index) + u64::from(index_count),
                index_buffer.name(),
            );
            assert!(instance_count != 0, "draw of zero instances");
            self.validate_vertex_buffers(&drawing_state);
        }

        self.base.with_native(|native| {
            if drawing_state.primitive_type != Some(primitive_type) {
                native.set_primitive_type(primitive_type);
            }

            native.draw_indexed(
                index_count,
                start_index,
                start_vertex,
                instance_count,
                start_instance,
            );
        });
        drawing_state.primitive_type = Some(primitive_type);
    }

    fn validate_vertex_buffers(&self, drawing_state: &DrawingState) {
        assert!(
            drawing_state
                .vertex_buffer_set
                .as_ref()
                .is_some_and(|buffer_set| buffer_set.strong_count() != 0),
            "command list `{}` has no vertex buffers bound for a draw",
            self.base.name(),
        );
    }
}

impl Deref for RenderCommandList {
    type Target = CommandList;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl CommandListObject for RenderCommandList {
    #[inline]
    fn command_list(&self) -> &Arc<CommandList> {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command_list::{CommandListId, CommandListSet},
        headless::{DrawRecord, HeadlessRenderState},
        resource::{BufferCreateInfo, IndexFormat},
        tests::test_context,
        Device,
    };

    fn vertex_buffers(device: &Arc<Device>) -> Arc<BufferSet> {
        BufferSet::new([Resource::buffer(
            device,
            BufferCreateInfo {
                name: "Vertices".to_owned(),
                size: 96,
                stride: 32,
                initial_state: ResourceState::CopyDest,
                ..Default::default()
            },
        )
        .unwrap()])
    }

    fn index_buffer(device: &Arc<Device>) -> Arc<Resource> {
        Resource::buffer(
            device,
            BufferCreateInfo {
                name: "Indices".to_owned(),
                size: 12,
                index_format: Some(IndexFormat::U32),
                initial_state: ResourceState::CopyDest,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn bindings_are_cached() {
        let (_, device, context) = test_context!();
        let kit = context
            .default_command_kit(CommandListType::Render)
            .unwrap();
        let list = kit.list(CommandListId::DEFAULT).unwrap();
        let list = list.as_render().unwrap();
        let vertex_buffers = vertex_buffers(&device);
        let index_buffer = index_buffer(&device);
        let render_state: Arc<dyn RenderState> = HeadlessRenderState::new("State");

        assert!(list.set_render_state(&render_state));
        assert!(!list.set_render_state(&render_state));
        assert!(list.set_vertex_buffers(&vertex_buffers, true));
        assert!(!list.set_vertex_buffers(&vertex_buffers, true));
        assert!(list.set_index_buffer(&index_buffer, true));
        assert!(!list.set_index_buffer(&index_buffer, true));

        assert_eq!(list.staged_barriers().len(), 2);

        list.reset_with_state(&render_state).unwrap();
        assert!(list.set_vertex_buffers(&vertex_buffers, false));
        assert!(list.staged_barriers().is_empty());
    }

    #[test]
    fn transition_requested_by_two_lists_is_recorded_once() {
        let (_, device, context) = test_context!();
        let kit = context
            .default_command_kit(CommandListType::Render)
            .unwrap();
        let first = kit.list(CommandListId::DEFAULT).unwrap();
        let second = kit.list(CommandListId(1)).unwrap();
        let vertex_buffers = vertex_buffers(&device);
        let buffer = &vertex_buffers.buffers()[0];

        assert!(first
            .as_render()
            .unwrap()
            .set_vertex_buffers(&vertex_buffers, true));
        assert!(second
            .as_render()
            .unwrap()
            .set_vertex_buffers(&vertex_buffers, true));
        assert_eq!(first.command_list().staged_barriers().len(), 1);
        assert!(second.command_list().staged_barriers().is_empty());
        assert_eq!(buffer.state(), ResourceState::CopyDest);
        assert_eq!(buffer.planned_state(), ResourceState::VertexBuffer);

        first.commit().unwrap();
        assert_eq!(buffer.state(), ResourceState::VertexBuffer);
        second.commit().unwrap();
        assert_eq!(buffer.state(), ResourceState::VertexBuffer);
    }

    #[test]
    fn draw_indexed_defaults_to_whole_index_buffer() {
        let (headless, device, context) = test_context!();
        let kit = context
            .default_command_kit(CommandListType::Render)
            .unwrap();
        let any_list = kit.list(CommandListId::DEFAULT).unwrap();
        let list = any_list.as_render().unwrap();
        let vertex_buffers = vertex_buffers(&device);
        let index_buffer = index_buffer(&device);

        list.set_vertex_buffers(&vertex_buffers, true);
        list.set_index_buffer(&index_buffer, true);
        list.draw_indexed(PrimitiveType::Triangle, 0, 0, 0, 1, 0);
        list.draw_indexed(PrimitiveType::Triangle, 2, 1, 0, 1, 0);
        any_list.commit().unwrap();

        assert_eq!(index_buffer.state(), ResourceState::IndexBuffer);
        assert_eq!(
            vertex_buffers.buffers()[0].state(),
            ResourceState::VertexBuffer
        );

        let set = CommandListSet::new(&[&any_list], None);
        kit.queue().execute(&set, None).unwrap();
        set.wait_until_completed(None).unwrap();

        let draws = headless.executed_draws();
        assert_eq!(draws.len(), 2);
        assert!(matches!(
            draws[0],
            DrawRecord::DrawIndexed {
                primitive_type: PrimitiveType::Triangle,
                index_count: 3,
                start_index: 0,
                ..
            }
        ));
        assert!(matches!(
            draws[1],
            DrawRecord::DrawIndexed {
                index_count: 2,
                start_index: 1,
                ..
            }
        ));
    }

    #[test]
    #[should_panic = "exceed the 3 indices"]
    fn draw_indexed_validates_range() {
        let (_, device, context) = test_context!();
        let kit = context
            .default_command_kit(CommandListType::Render)
            .unwrap();
        let list = kit.list(CommandListId::DEFAULT).unwrap();
        let list = list.as_render().unwrap();
        // Bindings are weak, so the buffers have to outlive the draw.
        let vertex_buffers = vertex_buffers(&device);
        let index_buffer = index_buffer(&device);

        list.set_vertex_buffers(&vertex_buffers, true);
        list.set_index_buffer(&index_buffer, true);
        list.draw_indexed(PrimitiveType::Triangle, 3, 1, 0, 1, 0);
    }

    #[test]
    fn disabled_validation_skips_checks() {
        let (_, device, context) = test_context!();
        let kit = context
            .default_command_kit(CommandListType::Render)
            .unwrap();
        let list = kit.list(CommandListId::DEFAULT).unwrap();
        let list = list.as_render().unwrap();
        let index_buffer = index_buffer(&device);

        list.set_validation_enabled(false);
        list.set_index_buffer(&index_buffer, false);
        list.draw_indexed(PrimitiveType::Line, 3, 1, 0, 1, 0);
        list.draw(PrimitiveType::Point, 0, 0, 0, 0);
    }
}
