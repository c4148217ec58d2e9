//! Command pools and the command recording the bridge needs.
//!
//! Pools are not thread-safe, so every presentation surface and every
//! device-bridge queue owns its own [`CommandPool`]. A [`CommandBuffer`] is
//! a thin recorder over a pool-allocated handle: it covers the transfer,
//! clear and draw commands used for presentation, plus layout transitions.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bridge_rhi::device::Device;
//! use bridge_rhi::command::{CommandPool, CommandBuffer};
//!
//! # fn example(device: Arc<Device>) -> Result<(), bridge_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), device.graphics_family())?;
//! let cmd = CommandBuffer::new(device.clone(), &pool)?;
//!
//! cmd.begin()?;
//! // ... record copy or rendering commands ...
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// A `VkCommandPool` whose buffers can be reset individually.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
}

impl CommandPool {
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        debug!("Command pool created for queue family {}", queue_family_index);
        Ok(Self { device, pool })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    fn allocate(&self) -> RhiResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        buffers.into_iter().next().ok_or_else(|| {
            RhiError::InvalidHandle("Command buffer allocation returned nothing".to_string())
        })
    }

    /// Returns a command buffer to the pool. It must not be pending.
    pub fn free_command_buffer(&self, buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, &[buffer]);
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_command_pool(self.pool, None) };
    }
}

/// Recorder over a primary command buffer.
///
/// Does not own the handle: it goes back to the pool through
/// [`CommandPool::free_command_buffer`], or with the pool itself.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let buffer = pool.allocate()?;
        Ok(Self { device, buffer })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins a one-time-submit recording.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    pub fn end(&self) -> RhiResult<()> {
        unsafe { self.device.handle().end_command_buffer(self.buffer)? };
        Ok(())
    }

    /// Resets the command buffer to its initial state.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }

        Ok(())
    }

    // =========================================================================
    // Dynamic Rendering (Vulkan 1.3)
    // =========================================================================

    /// Begins dynamic rendering.
    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo) {
        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, rendering_info);
        }
    }

    /// Ends dynamic rendering.
    pub fn end_rendering(&self) {
        unsafe {
            self.device.handle().cmd_end_rendering(self.buffer);
        }
    }

    /// Binds a graphics pipeline.
    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    /// Binds one vertex buffer at `binding`.
    pub fn bind_vertex_buffer(&self, binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, binding, &[buffer], &[offset]);
        }
    }

    /// Sets the viewport dynamically.
    pub fn set_viewport(&self, viewport: &vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(viewport));
        }
    }

    /// Sets the scissor rectangle dynamically.
    pub fn set_scissor(&self, scissor: &vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(scissor));
        }
    }

    /// Issues a non-indexed, single-instance draw.
    pub fn draw(&self, vertex_count: u32, first_vertex: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_draw(self.buffer, vertex_count, 1, first_vertex, 0);
        }
    }

    // =========================================================================
    // Transfer Commands
    // =========================================================================

    /// Copies data from a buffer to an image in `TRANSFER_DST_OPTIMAL` layout.
    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    /// Copies an image in `TRANSFER_SRC_OPTIMAL` layout into a buffer.
    pub fn copy_image_to_buffer(
        &self,
        src: vk::Image,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.handle().cmd_copy_image_to_buffer(
                self.buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                regions,
            );
        }
    }

    /// Clears a whole color image in `TRANSFER_DST_OPTIMAL` layout.
    pub fn clear_color_image(&self, image: vk::Image, rgba: [f32; 4]) {
        let color = vk::ClearColorValue { float32: rgba };
        unsafe {
            self.device.handle().cmd_clear_color_image(
                self.buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &color,
                &[color_subresource_range()],
            );
        }
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Records a layout transition for a single-level color image.
    pub fn transition_image(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let (src_stage, src_access, dst_stage, dst_access) =
            transition_masks(old_layout, new_layout);

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range())
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);

        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

/// Subresource range covering mip 0 / layer 0 of a color image.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Stage and access masks for the layout transitions the bridge records.
fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (
    vk::PipelineStageFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::AccessFlags,
) {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    match (old_layout, new_layout) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            (S::TOP_OF_PIPE, A::empty(), S::TRANSFER, A::TRANSFER_WRITE)
        }
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
            S::TOP_OF_PIPE,
            A::empty(),
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
        ),
        (L::UNDEFINED, L::PRESENT_SRC_KHR) => {
            (S::TOP_OF_PIPE, A::empty(), S::BOTTOM_OF_PIPE, A::empty())
        }
        (L::TRANSFER_SRC_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL) => (
            S::TRANSFER,
            A::TRANSFER_READ,
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::PRESENT_SRC_KHR) => {
            (S::TRANSFER, A::TRANSFER_WRITE, S::BOTTOM_OF_PIPE, A::empty())
        }
        (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_DST_OPTIMAL) => (
            S::TRANSFER,
            A::TRANSFER_WRITE,
            S::TRANSFER,
            A::TRANSFER_READ | A::TRANSFER_WRITE,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
            (S::TRANSFER, A::TRANSFER_WRITE, S::TRANSFER, A::TRANSFER_READ)
        }
        (L::TRANSFER_DST_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL) => (
            S::TRANSFER,
            A::TRANSFER_WRITE,
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
            S::BOTTOM_OF_PIPE,
            A::empty(),
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
            S::TRANSFER,
            A::TRANSFER_READ,
        ),
        _ => {
            warn!(
                "Unhandled layout transition: {:?} -> {:?}",
                old_layout, new_layout
            );
            (
                S::ALL_COMMANDS,
                A::MEMORY_READ | A::MEMORY_WRITE,
                S::ALL_COMMANDS,
                A::MEMORY_READ | A::MEMORY_WRITE,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
        assert_send::<CommandPool>();
    }

    #[test]
    fn test_upload_transition_waits_on_nothing() {
        let (src_stage, src_access, dst_stage, dst_access) = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert!(src_access.is_empty());
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(dst_access, vk::AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn test_present_transition_after_copy() {
        let (src_stage, _, dst_stage, dst_access) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert!(dst_access.is_empty());
    }

    #[test]
    fn test_transfer_write_after_write_is_ordered() {
        let (src_stage, src_access, dst_stage, dst_access) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);
        assert!(dst_access.contains(vk::AccessFlags::TRANSFER_WRITE));
    }

    #[test]
    fn test_unknown_transition_is_conservative() {
        let (src_stage, _, dst_stage, _) = transition_masks(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::GENERAL,
        );
        assert_eq!(src_stage, vk::PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(dst_stage, vk::PipelineStageFlags::ALL_COMMANDS);
    }

    #[test]
    fn test_color_range_covers_single_level() {
        let range = color_subresource_range();
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.layer_count, 1);
    }
}
