// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::context::DeviceContext;
use crate::error::{EngineResult, VkResultExt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    /// Handed to the queue; only a fence wait brings it back to `Idle`.
    Submitted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("slot {0} recorded before its fence was observed")]
    NotIdle(usize),
    #[error("slot {0} submitted without recording")]
    NotRecording(usize),
}

/// Per-slot state machine for the buffering slots. Knows nothing about Vulkan so
/// the reuse rules can be checked in isolation.
#[derive(Clone, Debug)]
pub struct SlotTracker {
    states: Vec<SlotState>,
    current: usize,
}

impl SlotTracker {
    pub fn new(slots: usize) -> Self {
        Self {
            states: vec![SlotState::Idle; slots.max(1)],
            current: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    /// The slot's fence has been seen signaled: whatever it submitted is done.
    pub fn fence_observed(&mut self, slot: usize) {
        if self.states[slot] == SlotState::Submitted {
            self.states[slot] = SlotState::Idle;
        }
    }

    pub fn begin_recording(&mut self, slot: usize) -> Result<(), SlotError> {
        match self.states[slot] {
            SlotState::Idle => {
                self.states[slot] = SlotState::Recording;
                Ok(())
            }
            _ => Err(SlotError::NotIdle(slot)),
        }
    }

    pub fn submitted(&mut self, slot: usize) -> Result<(), SlotError> {
        match self.states[slot] {
            SlotState::Recording => {
                self.states[slot] = SlotState::Submitted;
                Ok(())
            }
            _ => Err(SlotError::NotRecording(slot)),
        }
    }

    /// Recording was started but nothing will be submitted from it.
    pub fn abandon(&mut self, slot: usize) {
        if self.states[slot] == SlotState::Recording {
            self.states[slot] = SlotState::Idle;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.states
            .iter()
            .filter(|&&s| s == SlotState::Submitted)
            .count()
    }

    /// `(current + 1) mod N`; called after every present attempt.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.states.len();
    }
}

/// Sync objects and the reusable command buffer for one buffering slot.
pub struct FrameSlot {
    device: ash::Device,
    pool: vk::CommandPool,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub cmd: vk::CommandBuffer,
}

impl FrameSlot {
    fn new(ctx: &DeviceContext) -> EngineResult<Self> {
        let device = ctx.device();
        let mut slot = FrameSlot {
            device: device.clone(),
            pool: ctx.command_pool(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            cmd: vk::CommandBuffer::null(),
        };
        let sem_ci = vk::SemaphoreCreateInfo::default();
        // Created signaled so the first wait on every slot returns at once.
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        unsafe {
            slot.image_available = device
                .create_semaphore(&sem_ci, None)
                .creating("image-available semaphore")?;
            slot.render_finished = device
                .create_semaphore(&sem_ci, None)
                .creating("render-finished semaphore")?;
            slot.in_flight = device
                .create_fence(&fence_ci, None)
                .creating("in-flight fence")?;
        }
        slot.cmd = ctx.allocate_command_buffer(ctx.command_pool())?;
        Ok(slot)
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        unsafe {
            if self.cmd != vk::CommandBuffer::null() {
                self.device
                    .free_command_buffers(self.pool, std::slice::from_ref(&self.cmd));
            }
            self.device.destroy_fence(self.in_flight, None);
            self.device.destroy_semaphore(self.render_finished, None);
            self.device.destroy_semaphore(self.image_available, None);
        }
    }
}

/// Drives the slot rotation: wait -> record -> submit, one slot per frame.
pub struct FrameScheduler {
    device: ash::Device,
    slots: Vec<FrameSlot>,
    tracker: SlotTracker,
}

impl FrameScheduler {
    pub fn new(ctx: &DeviceContext, slot_count: usize) -> EngineResult<Self> {
        let slot_count = slot_count.max(1);
        let slots = (0..slot_count)
            .map(|_| FrameSlot::new(ctx))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self {
            device: ctx.device().clone(),
            slots,
            tracker: SlotTracker::new(slot_count),
        })
    }

    pub fn slot_count(&self) -> usize {
        self.tracker.len()
    }

    pub fn current(&self) -> usize {
        self.tracker.current()
    }

    pub fn image_available(&self, slot: usize) -> vk::Semaphore {
        self.slots[slot].image_available
    }

    /// Blocks on the current slot's fence with no timeout. This is the frame pacing point.
    pub fn wait_current(&mut self) -> EngineResult<usize> {
        let slot = self.tracker.current();
        unsafe {
            self.device
                .wait_for_fences(&[self.slots[slot].in_flight], true, u64::MAX)
                .submitting("wait_for_fences")?;
        }
        self.tracker.fence_observed(slot);
        Ok(slot)
    }

    /// Resets and begins the slot's command buffer.
    pub fn begin_recording(&mut self, slot: usize) -> EngineResult<vk::CommandBuffer> {
        self.tracker.begin_recording(slot)?;
        let cmd = self.slots[slot].cmd;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        let res = unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .and_then(|_| self.device.begin_command_buffer(cmd, &begin))
        };
        if let Err(e) = res {
            self.tracker.abandon(slot);
            return Err(e).submitting("begin_command_buffer");
        }
        Ok(cmd)
    }

    /// Ends recording, resets the fence, submits waiting on image-available and
    /// signaling render-finished plus the fence. Returns the semaphore present waits on.
    pub fn submit(&mut self, slot: usize, queue: vk::Queue) -> EngineResult<vk::Semaphore> {
        let s = &self.slots[slot];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &s.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_finished,
            ..Default::default()
        };
        unsafe {
            self.device
                .end_command_buffer(s.cmd)
                .submitting("end_command_buffer")?;
            self.device
                .reset_fences(&[s.in_flight])
                .submitting("reset_fences")?;
            self.device
                .queue_submit(queue, std::slice::from_ref(&submit), s.in_flight)
                .submitting("queue_submit")?;
        }
        let render_finished = s.render_finished;
        self.tracker.submitted(slot)?;
        Ok(render_finished)
    }

    pub fn advance(&mut self) {
        self.tracker.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Simulated GPU: each submitted slot completes at some later step.
    struct FakeGpu {
        pending: Vec<bool>,
    }

    impl FakeGpu {
        fn fence_signaled(&self, slot: usize) -> bool {
            !self.pending[slot]
        }
        fn complete(&mut self, slot: usize) {
            self.pending[slot] = false;
        }
    }

    #[test]
    fn fresh_slots_are_idle() {
        let t = SlotTracker::new(3);
        assert_eq!(t.len(), 3);
        assert!((0..3).all(|i| t.state(i) == SlotState::Idle));
        assert_eq!(t.current(), 0);
    }

    #[test]
    fn cannot_record_a_submitted_slot_before_its_fence() {
        let mut t = SlotTracker::new(2);
        t.begin_recording(0).unwrap();
        t.submitted(0).unwrap();
        assert_eq!(t.begin_recording(0), Err(SlotError::NotIdle(0)));
        t.fence_observed(0);
        assert!(t.begin_recording(0).is_ok());
    }

    #[test]
    fn submit_requires_recording() {
        let mut t = SlotTracker::new(2);
        assert_eq!(t.submitted(1), Err(SlotError::NotRecording(1)));
        t.begin_recording(1).unwrap();
        t.abandon(1);
        assert_eq!(t.state(1), SlotState::Idle);
    }

    #[test]
    fn rotation_wraps_with_period_n() {
        let mut t = SlotTracker::new(3);
        let seen: Vec<_> = (0..7)
            .map(|_| {
                let c = t.current();
                t.advance();
                c
            })
            .collect();
        assert_eq!(seen, [0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn fence_gates_reuse_and_in_flight_tracks_the_schedule() {
        for n in 2..=4 {
            let mut t = SlotTracker::new(n);
            let mut gpu = FakeGpu {
                pending: vec![false; n],
            };
            for frame in 0..50usize {
                let slot = t.current();
                // the GPU retires work out of band; older slots finish first
                if frame % 3 != 0 {
                    let oldest = (slot + 1) % n;
                    gpu.complete(oldest);
                }

                // Wrapped round onto a slot whose fence the CPU has not waited on yet.
                if frame >= n {
                    assert_eq!(t.state(slot), SlotState::Submitted);
                    assert_eq!(t.begin_recording(slot), Err(SlotError::NotIdle(slot)));
                }

                // blocking fence wait: the CPU stalls until the GPU is done
                if !gpu.fence_signaled(slot) {
                    gpu.complete(slot);
                }
                assert!(gpu.fence_signaled(slot));
                t.fence_observed(slot);

                t.begin_recording(slot).unwrap();
                t.submitted(slot).unwrap();
                gpu.pending[slot] = true;

                // Only the current slot's fence is ever observed, so every other
                // slot that has been submitted once stays Submitted.
                assert_eq!(t.in_flight(), (frame + 1).min(n), "frame {frame}");
                let busy = gpu.pending.iter().filter(|&&p| p).count();
                assert!(busy <= t.in_flight(), "frame {frame}: gpu has {busy} pending");
                t.advance();
            }
        }
    }

    #[test]
    fn slot_errors_keep_their_own_variant() {
        let err = crate::error::EngineError::from(SlotError::NotIdle(1));
        assert!(matches!(err, crate::error::EngineError::Slot(SlotError::NotIdle(1))));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("slot 1"));
    }

    #[test]
    fn observing_an_idle_slot_is_a_no_op() {
        let mut t = SlotTracker::new(2);
        t.fence_observed(0);
        assert_eq!(t.state(0), SlotState::Idle);
        t.begin_recording(0).unwrap();
        t.fence_observed(0);
        assert_eq!(t.state(0), SlotState::Recording);
    }
}
