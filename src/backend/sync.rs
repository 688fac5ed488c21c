// Synchronization primitives
//
// One fence per swapchain slot and exactly two semaphores shared across all
// slots. The semaphore pair is reused every iteration; this is only valid
// because at most one acquire/present pair is ever outstanding at a time.
// Keep it that way if the ring depth or submission pipelining changes.

use anyhow::{Context, Result};
use ash::vk;

/// CPU-observable state of a slot's fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Unsignaled,
}

/// CPU-side mirror of the per-slot fence ring.
///
/// A slot goes Unsignaled when its fence is consumed and reset for reuse, and
/// back to Signaled once the GPU retires the frame (observed at the next
/// wait). The frame loop's backpressure tests run against this model.
#[derive(Debug)]
pub struct SlotStates {
    states: Vec<FenceState>,
}

impl SlotStates {
    pub fn new(slot_count: usize) -> Self {
        Self {
            states: vec![FenceState::Signaled; slot_count],
        }
    }

    pub fn state(&self, slot: usize) -> FenceState {
        self.states[slot]
    }

    pub fn mark_waited(&mut self, slot: usize) {
        self.states[slot] = FenceState::Unsignaled;
    }

    pub fn mark_retired(&mut self, slot: usize) {
        self.states[slot] = FenceState::Signaled;
    }

    pub fn mark_all_retired(&mut self) {
        for state in &mut self.states {
            *state = FenceState::Signaled;
        }
    }

    /// Slots whose previous submission has not been observed as retired.
    pub fn in_flight(&self) -> usize {
        self.states
            .iter()
            .filter(|state| **state == FenceState::Unsignaled)
            .count()
    }

    pub fn slot_count(&self) -> usize {
        self.states.len()
    }
}

/// Per-slot fences plus the two shared ordering semaphores.
pub struct FrameSync {
    fences: Vec<vk::Fence>,
    pub image_acquired: vk::Semaphore,
    pub render_complete: vk::Semaphore,
    states: SlotStates,
}

impl FrameSync {
    pub fn new(device: &ash::Device, slot_count: usize) -> Result<Self> {
        // Fences start signaled so the first wait on a fresh slot never blocks.
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let fences = (0..slot_count)
            .map(|_| {
                unsafe { device.create_fence(&fence_info, None) }
                    .context("Failed to create frame fence")
            })
            .collect::<Result<Vec<_>>>()?;

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let image_acquired = unsafe { device.create_semaphore(&semaphore_info, None) }
            .context("Failed to create acquire semaphore")?;
        let render_complete = unsafe { device.create_semaphore(&semaphore_info, None) }
            .context("Failed to create render semaphore")?;

        Ok(Self {
            fences,
            image_acquired,
            render_complete,
            states: SlotStates::new(slot_count),
        })
    }

    pub fn fence(&self, slot: usize) -> vk::Fence {
        self.fences[slot]
    }

    pub fn in_flight(&self) -> usize {
        self.states.in_flight()
    }

    /// Block until the slot's fence signals, then reset it for reuse.
    ///
    /// This is the only backpressure in the system: it caps how far the CPU
    /// can record ahead of GPU completion at `slot_count - 1` frames.
    pub fn wait_and_reset(&mut self, device: &ash::Device, slot: usize) -> Result<()> {
        if self.states.state(slot) == FenceState::Unsignaled {
            log::trace!("slot {} not yet observed retired, waiting", slot);
        }
        unsafe {
            device
                .wait_for_fences(&[self.fences[slot]], true, u64::MAX)
                .context("Failed to wait for slot fence")?;
            device
                .reset_fences(&[self.fences[slot]])
                .context("Failed to reset slot fence")?;
        }
        self.states.mark_waited(slot);
        Ok(())
    }

    /// Block until the slot's fence signals, without resetting it.
    pub fn wait_retired(&mut self, device: &ash::Device, slot: usize) -> Result<()> {
        unsafe { device.wait_for_fences(&[self.fences[slot]], true, u64::MAX) }
            .context("Failed to wait for slot fence")?;
        self.states.mark_retired(slot);
        Ok(())
    }

    /// Submit an empty batch that signals the slot's fence once all GPU work
    /// queued before it retires. Decouples "submitted" from "safe to reuse".
    pub fn signal_slot(&self, device: &ash::Device, queue: vk::Queue, slot: usize) -> Result<()> {
        unsafe { device.queue_submit(queue, &[], self.fences[slot]) }
            .context("Failed to submit slot fence signal")
    }

    /// Block until every slot's fence signals. Run before any teardown so
    /// nothing is destroyed while the GPU may still reference it.
    pub fn wait_all(&mut self, device: &ash::Device) -> Result<()> {
        log::debug!("Draining {} slot fences", self.states.slot_count());
        unsafe { device.wait_for_fences(&self.fences, true, u64::MAX) }
            .context("Failed to drain frame fences")?;
        self.states.mark_all_retired();
        Ok(())
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            for &fence in &self.fences {
                device.destroy_fence(fence, None);
            }
            device.destroy_semaphore(self.image_acquired, None);
            device.destroy_semaphore(self.render_complete, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_start_signaled() {
        let states = SlotStates::new(3);
        for slot in 0..3 {
            assert_eq!(states.state(slot), FenceState::Signaled);
        }
        assert_eq!(states.in_flight(), 0);
        assert_eq!(states.slot_count(), 3);
    }

    #[test]
    fn wait_then_retire_round_trips() {
        let mut states = SlotStates::new(3);

        states.mark_waited(1);
        assert_eq!(states.state(1), FenceState::Unsignaled);
        assert_eq!(states.in_flight(), 1);

        states.mark_retired(1);
        assert_eq!(states.state(1), FenceState::Signaled);
        assert_eq!(states.in_flight(), 0);
    }

    #[test]
    fn drain_retires_everything() {
        let mut states = SlotStates::new(3);
        for slot in 0..3 {
            states.mark_waited(slot);
        }
        assert_eq!(states.in_flight(), 3);

        states.mark_all_retired();
        assert_eq!(states.in_flight(), 0);
    }
}
