//! Graphics pipeline management.
//!
//! This module handles VkPipeline and VkPipelineLayout creation for the
//! render pipelines exposed by the device bridge.
//!
//! # Overview
//!
//! - [`PipelineLayout`] wraps VkPipelineLayout (the bridge binds no descriptors)
//! - [`RenderPipeline`] is a vertex/fragment pair with the bridge vertex layout;
//!   it owns one VkPipeline per primitive type, created on first use
//!
//! Every variant draws into a single color attachment through dynamic
//! rendering, with no culling, no depth test, blending off and a dynamic
//! viewport and scissor.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use bridge_rhi::device::Device;
//! use bridge_rhi::shader::ShaderLibrary;
//! use bridge_rhi::pipeline::{PrimitiveType, RenderPipeline};
//! use ash::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), bridge_rhi::RhiError> {
//! let library = ShaderLibrary::from_spirv_file(device.clone(), Path::new("default.spv"))?;
//! let vertex = library.function("vertex_main").expect("vertex entry point");
//! let fragment = library.function("fragment_main").expect("fragment entry point");
//!
//! let mut pipeline = RenderPipeline::new(device, vertex, fragment, vk::Format::B8G8R8A8_UNORM)?;
//! let _lines = pipeline.variant(PrimitiveType::LineStrip)?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::{ShaderFunction, ShaderStage};
use crate::vertex::BridgeVertex;

/// Vulkan pipeline layout wrapper.
///
/// The layout is immutable after creation and can be safely shared
/// between threads.
pub struct PipelineLayout {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan pipeline layout handle.
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a pipeline layout with no descriptor sets and no push constants.
    ///
    /// # Errors
    ///
    /// Returns an error if pipeline layout creation fails.
    pub fn empty(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default();

        let layout = unsafe {
            device
                .handle()
                .create_pipeline_layout(&create_info, None)?
        };

        debug!("Pipeline layout created");

        Ok(Self { device, layout })
    }

    /// Returns the Vulkan pipeline layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Primitive type of a draw call.
///
/// The raw values are the ones accepted at the C ABI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PrimitiveType {
    /// Independent points.
    Point = 0,
    /// Independent lines.
    Line = 1,
    /// Connected lines with each vertex after the first starting a new line.
    LineStrip = 2,
    /// Independent triangles.
    #[default]
    Triangle = 3,
    /// Connected triangles with shared edges.
    TriangleStrip = 4,
}

impl PrimitiveType {
    /// Decodes a raw primitive type; `None` for values outside `0..=4`.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(PrimitiveType::Point),
            1 => Some(PrimitiveType::Line),
            2 => Some(PrimitiveType::LineStrip),
            3 => Some(PrimitiveType::Triangle),
            4 => Some(PrimitiveType::TriangleStrip),
            _ => None,
        }
    }

    /// Converts to Vulkan primitive topology.
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveType::Point => vk::PrimitiveTopology::POINT_LIST,
            PrimitiveType::Line => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveType::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            PrimitiveType::Triangle => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveType::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

/// Render pipeline state: a vertex/fragment pair drawing [`BridgeVertex`] data
/// into one color format.
///
/// Vulkan bakes the primitive topology into the pipeline, so one VkPipeline is
/// kept per [`PrimitiveType`] and created the first time it is drawn with.
pub struct RenderPipeline {
    device: Arc<Device>,
    vertex: ShaderFunction,
    fragment: ShaderFunction,
    color_format: vk::Format,
    layout: PipelineLayout,
    variants: HashMap<PrimitiveType, vk::Pipeline>,
}

impl RenderPipeline {
    /// Creates the pipeline and eagerly builds the triangle variant, so
    /// incompatible shaders fail here rather than at draw time.
    ///
    /// # Errors
    ///
    /// Returns an error if either function has the wrong stage, or if layout
    /// or pipeline creation fails.
    pub fn new(
        device: Arc<Device>,
        vertex: ShaderFunction,
        fragment: ShaderFunction,
        color_format: vk::Format,
    ) -> RhiResult<Self> {
        check_stage(&vertex, ShaderStage::Vertex)?;
        check_stage(&fragment, ShaderStage::Fragment)?;

        let layout = PipelineLayout::empty(device.clone())?;
        let mut pipeline = Self {
            device,
            vertex,
            fragment,
            color_format,
            layout,
            variants: HashMap::new(),
        };
        pipeline.variant(PrimitiveType::Triangle)?;
        Ok(pipeline)
    }

    /// Returns the pipeline for `primitive`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if pipeline creation fails.
    pub fn variant(&mut self, primitive: PrimitiveType) -> RhiResult<vk::Pipeline> {
        if let Some(&pipeline) = self.variants.get(&primitive) {
            return Ok(pipeline);
        }
        let pipeline = self.create_variant(primitive)?;
        debug!("Created {:?} pipeline variant", primitive);
        self.variants.insert(primitive, pipeline);
        Ok(pipeline)
    }

    /// Returns the color attachment format the pipeline renders into.
    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    fn create_variant(&self, primitive: PrimitiveType) -> RhiResult<vk::Pipeline> {
        let stages = [
            self.vertex.stage_create_info(),
            self.fragment.stage_create_info(),
        ];
        let bindings = [BridgeVertex::binding_description()];
        let attributes = BridgeVertex::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(primitive.to_vk());

        // Viewport and scissor are set per encoder.
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let color_formats = [self.color_format];
        let mut rendering =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&blend)
            .dynamic_state(&dynamic)
            .layout(self.layout.handle())
            .push_next(&mut rendering);

        let pipelines = unsafe {
            self.device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?
        };
        pipelines.into_iter().next().ok_or_else(|| {
            RhiError::PipelineError(format!("No {:?} pipeline was returned", primitive))
        })
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        for (_, pipeline) in self.variants.drain() {
            unsafe { self.device.handle().destroy_pipeline(pipeline, None) };
        }
    }
}

fn check_stage(function: &ShaderFunction, expected: ShaderStage) -> RhiResult<()> {
    if function.stage() == expected {
        return Ok(());
    }
    Err(RhiError::PipelineError(format!(
        "Entry point {:?} is a {} function, expected {}",
        function.entry_point(),
        function.stage(),
        expected
    )))
}
