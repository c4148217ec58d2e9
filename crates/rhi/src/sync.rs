//! Semaphores, fences, and the frames-in-flight ring.
//!
//! Host waits are always bounded: a fence that is not signaled in time
//! surfaces as [`RhiError::FenceTimeout`] instead of hanging the caller's
//! event loop.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bridge_rhi::device::Device;
//! use bridge_rhi::sync::FrameRing;
//!
//! # fn example(device: Arc<Device>) -> Result<(), bridge_rhi::RhiError> {
//! let mut ring = FrameRing::new(device)?;
//!
//! let frame = ring.current();
//! frame.in_flight_fence().wait(1_000_000_000)?;
//! frame.in_flight_fence().reset()?;
//! // ... record, submit, present ...
//! ring.advance();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::warn;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Frames the host may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Binary semaphore, created unsignaled.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let semaphore = unsafe {
            device
                .handle()
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_semaphore(self.semaphore, None) };
    }
}

/// Host-visible completion signal for a submission.
///
/// Waited on before reusing per-frame resources and before an imported
/// client buffer is released.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence; a `signaled` one lets the first wait return at once.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            device
                .handle()
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)?
        };
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Waits up to `timeout_ns` for the fence.
    ///
    /// # Errors
    ///
    /// [`RhiError::FenceTimeout`] when the bound expires; the Vulkan error
    /// otherwise (for example on device loss).
    pub fn wait(&self, timeout_ns: u64) -> RhiResult<()> {
        let result = unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, timeout_ns)
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => {
                warn!("Fence not signaled within {} ns", timeout_ns);
                Err(RhiError::FenceTimeout(timeout_ns))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the fence to unsignaled. It must not be pending on a queue.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }

    /// Non-blocking poll; errors (device loss) read as unsignaled.
    pub fn is_signaled(&self) -> bool {
        matches!(
            unsafe { self.device.handle().get_fence_status(self.fence) },
            Ok(true)
        )
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_fence(self.fence, None) };
    }
}

/// One frame's worth of synchronization.
///
/// ```text
/// wait + reset in_flight_fence
/// acquire            -> signals image_available
/// submit             waits image_available, signals render_finished + fence
/// present            waits render_finished
/// ```
///
/// Offscreen targets only use the fence.
pub struct FrameSync {
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    /// The fence starts signaled so the first frame does not wait.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device, true)?,
        })
    }

    #[inline]
    pub fn image_available_semaphore(&self) -> &Semaphore {
        &self.image_available
    }

    #[inline]
    pub fn render_finished_semaphore(&self) -> &Semaphore {
        &self.render_finished
    }

    #[inline]
    pub fn in_flight_fence(&self) -> &Fence {
        &self.in_flight
    }
}

/// Round-robin over [`MAX_FRAMES_IN_FLIGHT`] [`FrameSync`]s.
pub struct FrameRing {
    frames: Vec<FrameSync>,
    current: usize,
}

impl FrameRing {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let frames = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::new(device.clone()))
            .collect::<RhiResult<Vec<_>>>()?;
        Ok(Self { frames, current: 0 })
    }

    /// Current slot, in `0..MAX_FRAMES_IN_FLIGHT`.
    #[inline]
    pub fn index(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn current(&self) -> &FrameSync {
        &self.frames[self.current]
    }

    #[inline]
    pub fn advance(&mut self) {
        self.current = next_frame(self.current);
    }

    /// Waits (bounded) for every slot's fence, stopping at the first failure.
    pub fn wait_all(&self, timeout_ns: u64) -> RhiResult<()> {
        self.frames
            .iter()
            .try_for_each(|frame| frame.in_flight_fence().wait(timeout_ns))
    }
}

#[inline]
fn next_frame(current: usize) -> usize {
    (current + 1) % MAX_FRAMES_IN_FLIGHT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_frame_cycles_through_every_slot() {
        let mut seen = vec![0usize];
        let mut frame = 0;
        for _ in 1..MAX_FRAMES_IN_FLIGHT {
            frame = next_frame(frame);
            seen.push(frame);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..MAX_FRAMES_IN_FLIGHT).collect::<Vec<_>>());
        assert_eq!(next_frame(frame), 0);
    }

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSync>();
        assert_send_sync::<FrameRing>();
    }
}
