//! Presentation surfaces for the bridge.
//!
//! A [`PresentationSurface`] shows a caller-owned pixel buffer in a window
//! without copying it into memory of its own. The buffer may hold K stacked
//! frames ("bands"); each present picks the visible band by byte offset.
//!
//! Two strategies implement [`Presenter`]:
//! - [`CpuPresenter`]: composites on the CPU and displays through a [`FrameSink`]
//! - [`GpuPresenter`]: imports the buffer into Vulkan and copies on the GPU

mod band;
mod cpu;
mod error;
mod gpu;
mod pixels;
mod surface;

pub use band::{BYTES_PER_PIXEL, BandLayout, RowSpan, VisibleRows};
pub use cpu::{CpuPresenter, FrameSink, NO_BUFFER_RGB, REJECTED_RGB, SoftbufferSink};
pub use error::{PresentError, PresentResult};
pub use gpu::{
    GpuPresenter, GpuTarget, OffscreenTarget, SwapchainTarget, copy_regions, open_device,
};
pub use pixels::{OWNED_ALIGNMENT, PixelBuffer};
pub use surface::{PresentableWindow, PresentationSurface, Presenter};
