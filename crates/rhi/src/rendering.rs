//! Dynamic rendering helpers (Vulkan 1.3).
//!
//! The device bridge renders without VkRenderPass objects. A render pass is
//! one color attachment described by a load action, a store action and a
//! clear color; [`RenderingInfoBundle`] turns that into the
//! `VkRenderingInfo` handed to `vkCmdBeginRendering`.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use bridge_rhi::rendering::{ColorAttachment, LoadAction, RenderingInfoBundle, StoreAction};
//! use bridge_rhi::command::CommandBuffer;
//!
//! # fn example(image_view: vk::ImageView, cmd: &CommandBuffer) {
//! let attachment = ColorAttachment::new(image_view)
//!     .with_load_action(LoadAction::Clear)
//!     .with_store_action(StoreAction::Store)
//!     .with_clear_color([0.1, 0.1, 0.1, 1.0]);
//!
//! let bundle = RenderingInfoBundle::new(&attachment, vk::Extent2D { width: 800, height: 600 });
//! cmd.begin_rendering(&bundle.info());
//! // ... draw commands ...
//! cmd.end_rendering();
//! # }
//! ```

use ash::vk;

/// What happens to attachment contents when rendering starts.
///
/// The raw values are the ones accepted at the C ABI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum LoadAction {
    /// Previous contents are undefined.
    DontCare = 0,
    /// Previous contents are preserved.
    Load = 1,
    /// Contents are cleared to the clear color.
    #[default]
    Clear = 2,
}

impl LoadAction {
    /// Decodes a raw load action; `None` for unknown values.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(LoadAction::DontCare),
            1 => Some(LoadAction::Load),
            2 => Some(LoadAction::Clear),
            _ => None,
        }
    }

    /// Converts to the Vulkan load op.
    pub fn to_vk(self) -> vk::AttachmentLoadOp {
        match self {
            LoadAction::DontCare => vk::AttachmentLoadOp::DONT_CARE,
            LoadAction::Load => vk::AttachmentLoadOp::LOAD,
            LoadAction::Clear => vk::AttachmentLoadOp::CLEAR,
        }
    }
}

/// What happens to attachment contents when rendering ends.
///
/// The raw values are the ones accepted at the C ABI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum StoreAction {
    /// Results may be discarded.
    DontCare = 0,
    /// Results are written back.
    #[default]
    Store = 1,
}

impl StoreAction {
    /// Decodes a raw store action; `None` for unknown values.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(StoreAction::DontCare),
            1 => Some(StoreAction::Store),
            _ => None,
        }
    }

    /// Converts to the Vulkan store op.
    pub fn to_vk(self) -> vk::AttachmentStoreOp {
        match self {
            StoreAction::DontCare => vk::AttachmentStoreOp::DONT_CARE,
            StoreAction::Store => vk::AttachmentStoreOp::STORE,
        }
    }
}

/// Configuration for a color attachment in dynamic rendering.
///
/// # Default Values
///
/// - `layout`: `COLOR_ATTACHMENT_OPTIMAL`
/// - `load_action`: `Clear`
/// - `store_action`: `Store`
/// - `clear_color`: Black (0.0, 0.0, 0.0, 1.0)
#[derive(Clone, Copy, Debug)]
pub struct ColorAttachment {
    /// The image view to render to.
    pub image_view: vk::ImageView,
    /// The image layout during rendering.
    pub layout: vk::ImageLayout,
    /// How to load the attachment contents at the start of rendering.
    pub load_action: LoadAction,
    /// How to store the attachment contents at the end of rendering.
    pub store_action: StoreAction,
    /// Clear color as RGBA floats, used when `load_action` is `Clear`.
    pub clear_color: [f32; 4],
}

impl ColorAttachment {
    /// Creates a new color attachment with default settings.
    #[inline]
    pub fn new(image_view: vk::ImageView) -> Self {
        Self {
            image_view,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_action: LoadAction::Clear,
            store_action: StoreAction::Store,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    #[inline]
    pub fn with_load_action(mut self, load_action: LoadAction) -> Self {
        self.load_action = load_action;
        self
    }

    #[inline]
    pub fn with_store_action(mut self, store_action: StoreAction) -> Self {
        self.store_action = store_action;
        self
    }

    #[inline]
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Converts this attachment to a `VkRenderingAttachmentInfo`.
    #[inline]
    pub fn to_rendering_attachment_info(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(self.layout)
            .load_op(self.load_action.to_vk())
            .store_op(self.store_action.to_vk())
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            })
    }
}

/// A bundle containing `VkRenderingInfo` and its backing data.
///
/// This struct ensures that the attachment info outlives the
/// `VkRenderingInfo` that references it.
pub struct RenderingInfoBundle {
    color_attachments: [vk::RenderingAttachmentInfo<'static>; 1],
    render_area: vk::Rect2D,
}

impl RenderingInfoBundle {
    /// Creates a bundle rendering into `attachment` over the full `extent`.
    pub fn new(attachment: &ColorAttachment, extent: vk::Extent2D) -> Self {
        Self {
            color_attachments: [attachment.to_rendering_attachment_info()],
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        }
    }

    /// Returns the `VkRenderingInfo` referencing this bundle's data.
    pub fn info(&self) -> vk::RenderingInfo<'_> {
        vk::RenderingInfo::default()
            .render_area(self.render_area)
            .layer_count(1)
            .color_attachments(&self.color_attachments)
    }

    /// Returns the render area.
    #[inline]
    pub fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }

    /// Full-area viewport with the usual 0..1 depth range.
    pub fn viewport(&self) -> vk::Viewport {
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.render_area.extent.width as f32,
            height: self.render_area.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_action_raw_values() {
        assert_eq!(LoadAction::from_raw(0), Some(LoadAction::DontCare));
        assert_eq!(LoadAction::from_raw(1), Some(LoadAction::Load));
        assert_eq!(LoadAction::from_raw(2), Some(LoadAction::Clear));
        assert_eq!(LoadAction::from_raw(3), None);
        assert_eq!(LoadAction::Clear.to_vk(), vk::AttachmentLoadOp::CLEAR);
    }

    #[test]
    fn test_store_action_raw_values() {
        assert_eq!(StoreAction::from_raw(0), Some(StoreAction::DontCare));
        assert_eq!(StoreAction::from_raw(1), Some(StoreAction::Store));
        assert_eq!(StoreAction::from_raw(2), None);
        assert_eq!(StoreAction::Store.to_vk(), vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn test_color_attachment_defaults() {
        let attachment = ColorAttachment::new(vk::ImageView::null());
        assert_eq!(attachment.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(attachment.load_action, LoadAction::Clear);
        assert_eq!(attachment.store_action, StoreAction::Store);
        assert_eq!(attachment.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_color_attachment_to_info() {
        let attachment = ColorAttachment::new(vk::ImageView::null())
            .with_load_action(LoadAction::Load)
            .with_store_action(StoreAction::DontCare)
            .with_clear_color([0.25, 0.5, 0.75, 1.0]);
        let info = attachment.to_rendering_attachment_info();

        assert_eq!(info.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(info.store_op, vk::AttachmentStoreOp::DONT_CARE);
        let clear = unsafe { info.clear_value.color.float32 };
        assert_eq!(clear, [0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_bundle_covers_extent() {
        let attachment = ColorAttachment::new(vk::ImageView::null());
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let bundle = RenderingInfoBundle::new(&attachment, extent);

        assert_eq!(bundle.render_area().extent, extent);
        let info = bundle.info();
        assert_eq!(info.color_attachment_count, 1);
        assert_eq!(info.layer_count, 1);

        let viewport = bundle.viewport();
        assert_eq!(viewport.width, 640.0);
        assert_eq!(viewport.height, 480.0);
    }
}
