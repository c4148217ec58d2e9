//! Shader library management.
//!
//! This module handles SPIR-V loading and VkShaderModule creation. A
//! [`ShaderLibrary`] is one SPIR-V module that may contain several entry
//! points; a [`ShaderFunction`] names one of them and is what pipelines
//! are built from.
//!
//! # Overview
//!
//! - [`ShaderStage`] defines the type of shader (vertex, fragment, etc.)
//! - [`ShaderLibrary`] wraps VkShaderModule plus the entry points found in it
//! - [`ShaderFunction`] is a library plus one entry point name
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use bridge_rhi::device::Device;
//! use bridge_rhi::shader::ShaderLibrary;
//!
//! # fn example(device: Arc<Device>) -> Result<(), bridge_rhi::RhiError> {
//! let library = ShaderLibrary::from_spirv_file(device, Path::new("default.spv"))?;
//!
//! let vertex = library.function("vertex_main").expect("missing vertex entry point");
//! let fragment = library.function("fragment_main").expect("missing fragment entry point");
//!
//! let _stages = [vertex.stage_create_info(), fragment.stage_create_info()];
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, CString};
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// SPIR-V magic number, in host (little-endian) word order.
const SPIRV_MAGIC: u32 = 0x0723_0203;
/// Words in the SPIR-V module header.
const SPIRV_HEADER_WORDS: usize = 5;
/// `OpEntryPoint` opcode.
const OP_ENTRY_POINT: u16 = 15;

/// Shader stage type.
///
/// Defines which stage of the graphics or compute pipeline
/// the shader will be used in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader stage - processes each vertex
    Vertex,
    /// Fragment (pixel) shader stage - processes each fragment
    Fragment,
    /// Compute shader stage - general-purpose GPU computation
    Compute,
    /// Geometry shader stage - processes primitives
    Geometry,
    /// Tessellation control shader stage
    TessControl,
    /// Tessellation evaluation shader stage
    TessEvaluation,
}

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        }
    }

    /// Maps a SPIR-V execution model to a stage.
    ///
    /// Returns `None` for execution models the bridge never builds pipelines from
    /// (kernels, ray tracing, mesh shading).
    pub fn from_execution_model(model: u32) -> Option<Self> {
        match model {
            0 => Some(ShaderStage::Vertex),
            1 => Some(ShaderStage::TessControl),
            2 => Some(ShaderStage::TessEvaluation),
            3 => Some(ShaderStage::Geometry),
            4 => Some(ShaderStage::Fragment),
            5 => Some(ShaderStage::Compute),
            _ => None,
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
            ShaderStage::Geometry => "geometry",
            ShaderStage::TessControl => "tessellation control",
            ShaderStage::TessEvaluation => "tessellation evaluation",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An `OpEntryPoint` declared by a SPIR-V module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    /// Entry point name.
    pub name: String,
    /// Pipeline stage of the entry point.
    pub stage: ShaderStage,
}

/// Vulkan shader module with its declared entry points.
///
/// The module is destroyed when the last [`ShaderFunction`] referring to it
/// and the library itself are dropped.
pub struct ShaderLibrary {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan shader module handle.
    module: vk::ShaderModule,
    /// Entry points, in declaration order.
    entry_points: Vec<EntryPoint>,
}

impl ShaderLibrary {
    /// Loads a SPIR-V module from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid SPIR-V,
    /// or if shader module creation fails.
    pub fn from_spirv_file(device: Arc<Device>, path: &Path) -> RhiResult<Arc<Self>> {
        debug!("Loading shader library from {:?}", path);
        let code = read_spirv(path)?;
        Self::from_spirv_words(device, &code)
    }

    fn from_spirv_words(device: Arc<Device>, code: &[u32]) -> RhiResult<Arc<Self>> {
        let entry_points = parse_entry_points(code)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        info!(
            "Created shader library with {} entry point(s): {:?}",
            entry_points.len(),
            entry_points.iter().map(|e| e.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Arc::new(Self {
            device,
            module,
            entry_points,
        }))
    }

    /// Looks up an entry point by name.
    ///
    /// Returns `None` when the module declares no entry point called `name`.
    pub fn function(self: &Arc<Self>, name: &str) -> Option<ShaderFunction> {
        let entry = self.entry_points.iter().find(|e| e.name == name)?;
        let name = CString::new(entry.name.as_str()).ok()?;

        Some(ShaderFunction {
            library: Arc::clone(self),
            name,
            stage: entry.stage,
        })
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Returns the declared entry points.
    #[inline]
    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }
}

impl Drop for ShaderLibrary {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed shader library");
    }
}

/// One entry point of a [`ShaderLibrary`].
#[derive(Clone)]
pub struct ShaderFunction {
    library: Arc<ShaderLibrary>,
    name: CString,
    stage: ShaderStage,
}

impl ShaderFunction {
    /// Returns the shader stage.
    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Returns the entry point function name as a C string reference.
    #[inline]
    pub fn entry_point(&self) -> &CStr {
        &self.name
    }

    /// Returns the library this function lives in.
    #[inline]
    pub fn library(&self) -> &Arc<ShaderLibrary> {
        &self.library
    }

    /// Creates a pipeline shader stage create info structure.
    ///
    /// The returned structure borrows from this function and must not outlive it.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.library.module)
            .name(&self.name)
    }
}

impl std::fmt::Debug for ShaderFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderFunction")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .finish()
    }
}

/// Reads a SPIR-V file into code words.
pub fn read_spirv(path: &Path) -> RhiResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| {
        RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
    })?;
    spirv_words(&bytes)
}

/// Converts SPIR-V bytes into little-endian code words and checks the header.
pub fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V code must be 4-byte aligned, got {} bytes",
            bytes.len()
        )));
    }

    let code: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if code.len() < SPIRV_HEADER_WORDS || code[0] != SPIRV_MAGIC {
        return Err(RhiError::ShaderError(
            "Not a little-endian SPIR-V module".to_string(),
        ));
    }

    Ok(code)
}

/// Scans a SPIR-V module for `OpEntryPoint` instructions.
///
/// Entry points with execution models that have no [`ShaderStage`] are skipped.
///
/// # Errors
///
/// Returns an error if an instruction's word count is zero or runs past the
/// end of the module.
pub fn parse_entry_points(code: &[u32]) -> RhiResult<Vec<EntryPoint>> {
    let mut entry_points = Vec::new();
    let mut cursor = SPIRV_HEADER_WORDS;

    while cursor < code.len() {
        let word_count = (code[cursor] >> 16) as usize;
        let opcode = (code[cursor] & 0xffff) as u16;

        if word_count == 0 || cursor + word_count > code.len() {
            return Err(RhiError::ShaderError(format!(
                "Malformed SPIR-V instruction at word {}",
                cursor
            )));
        }

        // OpEntryPoint: model, function id, literal name, interface ids...
        if opcode == OP_ENTRY_POINT && word_count >= 4 {
            let operands = &code[cursor + 1..cursor + word_count];
            if let Some(stage) = ShaderStage::from_execution_model(operands[0]) {
                let name = literal_string(&operands[2..]);
                entry_points.push(EntryPoint { name, stage });
            }
        }

        cursor += word_count;
    }

    Ok(entry_points)
}

/// Decodes a nul-terminated SPIR-V literal string.
fn literal_string(words: &[u32]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .take_while(|&b| b != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
