//! Vertex format accepted by bridge render pipelines.
//!
//! Pipelines created through the device bridge use one fixed layout:
//! attribute 0 is a `float2` position at offset 0, attribute 1 is a `float4`
//! color at offset 8, with a 24-byte stride on binding 0. [`BridgeVertex`]
//! matches that layout so Rust callers can fill vertex buffers with
//! `bytemuck::cast_slice`.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};

/// Vertex with a 2D position and an RGBA color.
///
/// The color is stored as `[f32; 4]` rather than [`Vec4`]: `Vec4` is 16-byte
/// aligned under SIMD, which would push it to offset 16.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BridgeVertex {
    pub position: Vec2,
    pub color: [f32; 4],
}

impl BridgeVertex {
    /// Byte stride between vertices.
    pub const STRIDE: u32 = 24;

    /// Vertex buffer binding the layout reads from.
    pub const BINDING: u32 = 0;

    /// Creates a new vertex.
    #[inline]
    pub fn new(position: Vec2, color: Vec4) -> Self {
        Self {
            position,
            color: color.to_array(),
        }
    }

    /// Get the vertex input binding description.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: Self::BINDING,
            stride: Self::STRIDE,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Get the vertex attribute descriptions.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            // Position at location 0
            vk::VertexInputAttributeDescription {
                binding: Self::BINDING,
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 0,
            },
            // Color at location 1
            vk::VertexInputAttributeDescription {
                binding: Self::BINDING,
                location: 1,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: 8,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_vertex_size_matches_stride() {
        assert_eq!(
            std::mem::size_of::<BridgeVertex>(),
            BridgeVertex::STRIDE as usize
        );
    }

    #[test]
    fn test_bridge_vertex_offsets() {
        assert_eq!(std::mem::offset_of!(BridgeVertex, position), 0);
        assert_eq!(std::mem::offset_of!(BridgeVertex, color), 8);
    }

    #[test]
    fn test_binding_description() {
        let binding = BridgeVertex::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 24);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn test_attribute_descriptions() {
        let attrs = BridgeVertex::attribute_descriptions();
        assert_eq!(attrs[0].location, 0);
        assert_eq!(attrs[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].location, 1);
        assert_eq!(attrs[1].format, vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(attrs[1].offset, 8);
    }

    #[test]
    fn test_cast_to_bytes() {
        let vertices = [
            BridgeVertex::new(Vec2::new(0.0, -0.5), Vec4::new(1.0, 0.0, 0.0, 1.0)),
            BridgeVertex::new(Vec2::new(0.5, 0.5), Vec4::new(0.0, 1.0, 0.0, 1.0)),
        ];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 48);

        let floats: &[f32] = bytemuck::cast_slice(&vertices);
        assert_eq!(&floats[0..6], &[0.0, -0.5, 1.0, 0.0, 0.0, 1.0]);
    }
}
