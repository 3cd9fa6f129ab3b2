//! Tracks which byte ranges of a buffer the GPU may still be reading.

use std::collections::VecDeque;

use crate::error::Result;
use crate::gpu::{FenceId, GraphicsBackend};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct LockedRange {
    offset: usize,
    size: usize,
    fence: FenceId,
}

impl LockedRange {
    #[inline]
    fn end(&self) -> usize {
        self.offset + self.size
    }

    #[inline]
    fn overlaps(&self, offset: usize, end: usize) -> bool {
        self.offset < end && offset < self.end()
    }
}

/// Fences over byte ranges of one ring buffer, in insertion order.
///
/// After a wrap the queue holds ranges of more than one lap, so it is not
/// sorted by offset. The GPU retires fences in submission order: once a fence
/// is signaled every older one is too.
#[derive(Debug, Default)]
pub struct FenceTracker {
    ranges: VecDeque<LockedRange>,
}

impl FenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ranges still locked.
    pub fn pending(&self) -> usize {
        self.ranges.len()
    }

    /// Inserts a fence after the draw that reads `[offset, offset + size)`.
    pub fn lock_range<B: GraphicsBackend + ?Sized>(&mut self, gpu: &mut B, offset: usize, size: usize) -> Result<()> {
        let fence = gpu.create_fence()?;
        self.ranges.push_back(LockedRange { offset, size, fence });
        Ok(())
    }

    /// Blocks until `[offset, offset + size)` is no longer read by the GPU.
    ///
    /// Returns `true` if the call had to wait on a fence that was not yet
    /// signaled. Only the newest overlapping fence is waited on; it and every
    /// older fence are released.
    pub fn wait_for_range<B: GraphicsBackend + ?Sized>(
        &mut self,
        gpu: &mut B,
        offset: usize,
        size: usize,
    ) -> Result<bool> {
        let end = offset + size;
        let Some(last) = self.ranges.iter().rposition(|r| r.overlaps(offset, end)) else {
            return Ok(false);
        };

        let fence = self.ranges[last].fence;
        let stalled = !gpu.fence_signaled(fence)?;
        if stalled {
            log::trace!("waiting on {fence} for bytes {offset}..{end}");
            gpu.wait_fence(fence)?;
        }
        for range in self.ranges.drain(..=last) {
            gpu.delete_fence(range.fence);
        }
        Ok(stalled)
    }

    /// Blocks until every locked range is released. Returns `true` if it waited.
    pub fn wait_for_all<B: GraphicsBackend + ?Sized>(&mut self, gpu: &mut B) -> Result<bool> {
        let Some(newest) = self.ranges.back().map(|r| r.fence) else {
            return Ok(false);
        };
        let stalled = !gpu.fence_signaled(newest)?;
        if stalled {
            gpu.wait_fence(newest)?;
        }
        for range in self.ranges.drain(..) {
            gpu.delete_fence(range.fence);
        }
        Ok(stalled)
    }

    /// Releases every fence without waiting.
    pub fn dispose<B: GraphicsBackend + ?Sized>(&mut self, gpu: &mut B) {
        for range in self.ranges.drain(..) {
            gpu.delete_fence(range.fence);
        }
    }
}

impl Drop for FenceTracker {
    fn drop(&mut self) {
        if !self.ranges.is_empty() {
            log::warn!("FenceTracker dropped with {} fences never released", self.ranges.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::gpu::{Call, Capabilities, RecordingBackend};

    fn gpu() -> RecordingBackend {
        RecordingBackend::new(Capabilities::FULL).with_latency(64)
    }

    #[test]
    fn disjoint_range_does_not_wait() {
        let mut gpu = gpu();
        let mut fences = FenceTracker::new();
        fences.lock_range(&mut gpu, 0, 100).unwrap();

        assert!(!fences.wait_for_range(&mut gpu, 100, 50).unwrap());
        assert_eq!(fences.pending(), 1);
        assert_eq!(gpu.stall_count(), 0);
        fences.dispose(&mut gpu);
    }

    #[test]
    fn overlap_waits_and_releases_older_fences() {
        let mut gpu = gpu();
        let mut fences = FenceTracker::new();
        fences.lock_range(&mut gpu, 0, 100).unwrap();
        fences.lock_range(&mut gpu, 100, 100).unwrap();
        fences.lock_range(&mut gpu, 200, 100).unwrap();

        assert!(fences.wait_for_range(&mut gpu, 150, 10).unwrap());
        assert_eq!(fences.pending(), 1);
        assert_eq!(gpu.stall_count(), 1);
        assert_eq!(gpu.live_fences(), 1);
        fences.dispose(&mut gpu);
    }

    #[test]
    fn newer_lap_behind_an_older_high_range_is_waited_on() {
        let mut gpu = gpu();
        let mut fences = FenceTracker::new();
        // Previous lap left a range near the top, the current lap restarted at 0.
        fences.lock_range(&mut gpu, 48, 16).unwrap();
        fences.lock_range(&mut gpu, 0, 16).unwrap();
        fences.lock_range(&mut gpu, 16, 16).unwrap();
        fences.lock_range(&mut gpu, 32, 16).unwrap();

        assert!(fences.wait_for_range(&mut gpu, 0, 32).unwrap());
        assert_eq!(fences.pending(), 1);
        assert_eq!(gpu.stall_count(), 1);
        assert_eq!(gpu.live_fences(), 1);

        assert!(fences.wait_for_range(&mut gpu, 32, 32).unwrap());
        assert_eq!(fences.pending(), 0);
        assert_eq!(gpu.live_fences(), 0);
    }

    #[test]
    fn query_past_every_range_keeps_them_locked() {
        let mut gpu = gpu();
        let mut fences = FenceTracker::new();
        fences.lock_range(&mut gpu, 200, 100).unwrap();
        fences.lock_range(&mut gpu, 0, 100).unwrap();

        assert!(!fences.wait_for_range(&mut gpu, 100, 100).unwrap());
        assert_eq!(fences.pending(), 2);
        assert_eq!(gpu.stall_count(), 0);
        fences.dispose(&mut gpu);
    }

    #[test]
    fn signaled_fence_is_released_without_stall() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let mut fences = FenceTracker::new();
        fences.lock_range(&mut gpu, 0, 100).unwrap();

        assert!(!fences.wait_for_range(&mut gpu, 0, 100).unwrap());
        assert_eq!(fences.pending(), 0);
        assert_eq!(gpu.count_calls(|c| matches!(c, Call::WaitFence { .. })), 0);
    }

    #[test]
    fn wait_for_all_drains() {
        let mut gpu = gpu();
        let mut fences = FenceTracker::new();
        fences.lock_range(&mut gpu, 0, 10).unwrap();
        fences.lock_range(&mut gpu, 10, 10).unwrap();

        assert!(fences.wait_for_all(&mut gpu).unwrap());
        assert_eq!(fences.pending(), 0);
        assert_eq!(gpu.live_fences(), 0);
        assert!(!fences.wait_for_all(&mut gpu).unwrap());
    }

    #[test]
    fn fence_creation_failure_is_surfaced() {
        let mut gpu = gpu();
        gpu.fail_fence_creation(true);
        let mut fences = FenceTracker::new();
        let err = fences.lock_range(&mut gpu, 0, 10).unwrap_err();
        assert!(matches!(err, RenderError::Gpu { .. }));
        assert_eq!(fences.pending(), 0);
    }
}
