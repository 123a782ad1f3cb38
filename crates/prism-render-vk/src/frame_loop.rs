// SPDX-License-Identifier: CEPL-1.0
//! Order of operations for one outer frame, independent of the Vulkan objects
//! that carry it out.

use ash::vk;
use prism_render::FrameOutcome;

use crate::error::EngineResult;
use crate::resize::ResizeDecision;
use crate::swapchain::{Acquire, Present};

/// The steps `run_frame` sequences. `VkEngine` implements them over its swap
/// chain, scheduler, scene and compositor.
pub(crate) trait FrameOps {
    fn poll_resize(&mut self) -> ResizeDecision;
    /// `false` when the surface still has no drawable area.
    fn rebuild_surface(&mut self) -> EngineResult<bool>;
    /// egui texture uploads for this frame.
    fn upload_ui(&mut self) -> EngineResult<()>;
    /// Fence wait on `slot`, then the frees parked on it.
    fn wait_slot(&mut self, slot: usize) -> EngineResult<()>;
    fn acquire(&mut self, slot: usize) -> EngineResult<Acquire>;
    fn render_scene(&mut self, slot: usize) -> EngineResult<()>;
    /// Records the UI pass into `image_index` and submits it; returns the
    /// semaphore present waits on.
    fn record_and_submit(&mut self, slot: usize, image_index: u32) -> EngineResult<vk::Semaphore>;
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> EngineResult<Present>;
    fn advance(&mut self);
}

pub(crate) fn run_frame(ops: &mut impl FrameOps, slot: usize) -> EngineResult<FrameOutcome> {
    match ops.poll_resize() {
        ResizeDecision::Defer => {
            ops.upload_ui()?;
            return Ok(FrameOutcome::Skipped);
        }
        ResizeDecision::Rebuild(_) => {
            if !ops.rebuild_surface()? {
                ops.upload_ui()?;
                return Ok(FrameOutcome::Skipped);
            }
        }
        ResizeDecision::Idle => {}
    }

    ops.wait_slot(slot)?;
    ops.upload_ui()?;

    let image_index = match ops.acquire(slot)? {
        Acquire::Ready(index) => index,
        Acquire::Stale => {
            // Nothing was signaled or submitted; the slot stays current.
            ops.rebuild_surface()?;
            return Ok(FrameOutcome::Rebuilt);
        }
    };

    // Blocks until the scene image is fully written.
    ops.render_scene(slot)?;
    let render_finished = ops.record_and_submit(slot, image_index)?;

    let present = ops.present(image_index, render_finished);
    ops.advance();
    match present? {
        Present::Ok => Ok(FrameOutcome::Presented),
        Present::Stale => {
            ops.rebuild_surface()?;
            Ok(FrameOutcome::Rebuilt)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use prism_render::RenderSize;

    use super::*;
    use crate::frame::SlotTracker;
    use crate::resize::ResizeGate;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Call {
        Rebuild,
        Upload,
        Wait(usize),
        Acquire(usize),
        Scene(usize),
        Submit(usize, u32),
        Present(u32),
        Advance,
    }

    /// Swap chain with `images` images handed out round-robin, unless a scripted
    /// result is queued. The GPU finishes every submission before the next wait.
    struct FakeFrame {
        gate: ResizeGate,
        tracker: SlotTracker,
        images: u32,
        next_image: u32,
        failing_rebuilds: usize,
        acquire_script: VecDeque<Acquire>,
        present_script: VecDeque<Present>,
        calls: Vec<Call>,
    }

    impl FakeFrame {
        fn new(slots: usize, images: u32) -> Self {
            Self {
                gate: ResizeGate::new(RenderSize::new(1280, 720)),
                tracker: SlotTracker::new(slots),
                images,
                next_image: 0,
                failing_rebuilds: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                calls: Vec::new(),
            }
        }

        fn frame(&mut self) -> FrameOutcome {
            self.calls.clear();
            let slot = self.tracker.current();
            run_frame(self, slot).unwrap()
        }
    }

    impl FrameOps for FakeFrame {
        fn poll_resize(&mut self) -> ResizeDecision {
            self.gate.poll()
        }

        fn rebuild_surface(&mut self) -> EngineResult<bool> {
            self.calls.push(Call::Rebuild);
            if self.failing_rebuilds > 0 || self.gate.is_minimized() {
                self.failing_rebuilds = self.failing_rebuilds.saturating_sub(1);
                self.gate.mark_stale();
                return Ok(false);
            }
            self.next_image = 0;
            Ok(true)
        }

        fn upload_ui(&mut self) -> EngineResult<()> {
            self.calls.push(Call::Upload);
            Ok(())
        }

        fn wait_slot(&mut self, slot: usize) -> EngineResult<()> {
            self.calls.push(Call::Wait(slot));
            self.tracker.fence_observed(slot);
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> EngineResult<Acquire> {
            self.calls.push(Call::Acquire(slot));
            if let Some(scripted) = self.acquire_script.pop_front() {
                return Ok(scripted);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.images;
            Ok(Acquire::Ready(index))
        }

        fn render_scene(&mut self, slot: usize) -> EngineResult<()> {
            self.calls.push(Call::Scene(slot));
            Ok(())
        }

        fn record_and_submit(&mut self, slot: usize, image_index: u32) -> EngineResult<vk::Semaphore> {
            self.calls.push(Call::Submit(slot, image_index));
            self.tracker.begin_recording(slot)?;
            self.tracker.submitted(slot)?;
            Ok(vk::Semaphore::null())
        }

        fn present(&mut self, image_index: u32, _wait: vk::Semaphore) -> EngineResult<Present> {
            self.calls.push(Call::Present(image_index));
            Ok(self.present_script.pop_front().unwrap_or(Present::Ok))
        }

        fn advance(&mut self) {
            self.calls.push(Call::Advance);
            self.tracker.advance();
        }
    }

    #[test]
    fn steady_state_alternates_slots_and_images() {
        let mut f = FakeFrame::new(2, 2);
        let mut seen = Vec::new();
        for _ in 0..4 {
            assert_eq!(f.frame(), FrameOutcome::Presented);
            seen.push(f.calls.clone());
        }
        assert_eq!(
            seen[0],
            [
                Call::Wait(0),
                Call::Upload,
                Call::Acquire(0),
                Call::Scene(0),
                Call::Submit(0, 0),
                Call::Present(0),
                Call::Advance,
            ]
        );
        assert_eq!(seen[1][4], Call::Submit(1, 1));
        assert_eq!(seen[2][4], Call::Submit(0, 0));
        assert_eq!(seen[3][4], Call::Submit(1, 1));
    }

    #[test]
    fn stale_acquire_rebuilds_without_advancing() {
        let mut f = FakeFrame::new(2, 2);
        f.acquire_script.push_back(Acquire::Stale);

        assert_eq!(f.frame(), FrameOutcome::Rebuilt);
        assert_eq!(
            f.calls,
            [Call::Wait(0), Call::Upload, Call::Acquire(0), Call::Rebuild]
        );
        assert_eq!(f.tracker.current(), 0);

        // Same slot again; its fence was observed and nothing was submitted.
        assert_eq!(f.frame(), FrameOutcome::Presented);
        assert!(f.calls.contains(&Call::Submit(0, 0)));
        assert_eq!(f.tracker.current(), 1);
    }

    #[test]
    fn stale_present_still_advances() {
        let mut f = FakeFrame::new(2, 3);
        f.present_script.push_back(Present::Stale);
        assert_eq!(f.frame(), FrameOutcome::Rebuilt);
        assert_eq!(&f.calls[5..], [Call::Present(0), Call::Advance, Call::Rebuild]);
        assert_eq!(f.tracker.current(), 1);
    }

    #[test]
    fn minimised_window_only_uploads_until_restored() {
        let mut f = FakeFrame::new(2, 2);
        f.gate.notify(RenderSize::new(0, 0));
        for _ in 0..3 {
            assert_eq!(f.frame(), FrameOutcome::Skipped);
            assert_eq!(f.calls, [Call::Upload]);
        }
        assert_eq!(f.tracker.current(), 0);

        f.gate.notify(RenderSize::new(1280, 720));
        assert_eq!(f.frame(), FrameOutcome::Presented);
        assert_eq!(f.calls[0], Call::Rebuild);
        assert_eq!(f.calls.iter().filter(|c| **c == Call::Rebuild).count(), 1);
        assert_eq!(f.frame(), FrameOutcome::Presented);
        assert!(!f.calls.contains(&Call::Rebuild));
    }

    #[test]
    fn undrawable_rebuild_skips_and_retries_next_frame() {
        let mut f = FakeFrame::new(2, 2);
        f.gate.mark_stale();
        f.failing_rebuilds = 1;
        assert_eq!(f.frame(), FrameOutcome::Skipped);
        assert_eq!(f.calls, [Call::Rebuild, Call::Upload]);
        assert_eq!(f.tracker.current(), 0);

        assert_eq!(f.frame(), FrameOutcome::Presented);
        assert_eq!(f.calls[..2], [Call::Rebuild, Call::Wait(0)]);
    }
}
