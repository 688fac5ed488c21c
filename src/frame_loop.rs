// Frame loop - the steady-state acquire/record/submit/present machine
//
// Per iteration, in strict order:
//   Acquire -> WaitSlot -> Record -> Submit -> Present -> SignalSlot
//
// The CPU blocks in exactly three places: the per-slot fence wait, the image
// acquisition, and the final drain across all fences before teardown.
// Everything else returns as soon as the work is enqueued.

use crate::backend::{DeviceContext, FrameSync, SwapchainContext};
use crate::scene::{ContentProvider, SceneContext};
use anyhow::{Context, Result};
use ash::vk;

pub struct FrameLoop<'a> {
    device: &'a DeviceContext,
    swapchain: &'a SwapchainContext,
    sync: &'a mut FrameSync,
    clear_color: [f32; 4],
    /// Set by Acquire, read by Record, Submit, Present, and SignalSlot.
    current_slot: usize,
}

impl<'a> FrameLoop<'a> {
    pub fn new(
        device: &'a DeviceContext,
        swapchain: &'a SwapchainContext,
        sync: &'a mut FrameSync,
        clear_color: [f32; 4],
    ) -> Self {
        Self {
            device,
            swapchain,
            sync,
            clear_color,
            current_slot: 0,
        }
    }

    /// Run the loop for `frame_count` frames.
    ///
    /// The scene's `initialize` runs once inside a one-shot command buffer
    /// that is submitted and waited on before the first frame; its `shutdown`
    /// runs once after the final fence drain. A frame count of zero still
    /// performs both and the drain in between.
    pub fn run(
        &mut self,
        frame_count: u32,
        gpu: &SceneContext,
        provider: &mut dyn ContentProvider,
    ) -> Result<()> {
        self.upload(gpu, provider)?;

        log::info!("Rendering {} frames", frame_count);
        for frame in 0..frame_count {
            // Acquire: driver picks the slot, signals the acquire semaphore
            // once the image is actually free.
            self.current_slot = self.swapchain.acquire_next_slot(self.sync.image_acquired)?;

            // WaitSlot: the slot's previous frame may still be executing;
            // its command buffer cannot be re-recorded until the fence says
            // the GPU is done with it.
            self.sync.wait_and_reset(&self.device.device, self.current_slot)?;

            log::trace!(
                "frame {}: slot {}, {} slots in flight",
                frame,
                self.current_slot,
                self.sync.in_flight()
            );

            self.record(provider)?;
            self.submit()?;
            self.swapchain
                .present(self.device.queue, self.current_slot, self.sync.render_complete)?;

            // SignalSlot: an empty submission whose fence signals once all
            // work queued so far retires.
            self.sync
                .signal_slot(&self.device.device, self.device.queue, self.current_slot)?;
        }

        // Drain every slot before anything gets torn down.
        self.sync.wait_all(&self.device.device)?;
        provider.shutdown(&self.device.device);

        Ok(())
    }

    /// One-shot scene upload: record the setup command buffer, submit it
    /// fenced on slot 0, and wait for it synchronously.
    fn upload(&mut self, gpu: &SceneContext, provider: &mut dyn ContentProvider) -> Result<()> {
        let device = &self.device.device;
        let setup = self.device.setup_command_buffer;

        self.sync.wait_and_reset(device, 0)?;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { device.begin_command_buffer(setup, &begin_info) }
            .context("Failed to begin setup command buffer")?;

        provider.initialize(gpu, setup)?;

        unsafe { device.end_command_buffer(setup) }
            .context("Failed to end setup command buffer")?;

        let command_buffers = [setup];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();

        unsafe { device.queue_submit(self.device.queue, &[submit_info], self.sync.fence(0)) }
            .context("Failed to submit setup command buffer")?;

        self.sync.wait_retired(device, 0)
    }

    /// Record the slot's command buffer: clear, then hand the open render
    /// pass to the scene for its draw commands.
    fn record(&self, provider: &mut dyn ContentProvider) -> Result<()> {
        let device = &self.device.device;
        let cmd = self.device.frame_command_buffers[self.current_slot];

        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { device.begin_command_buffer(cmd, &begin_info) }
            .context("Failed to begin frame command buffer")?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];

        let pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.swapchain.render_pass)
            .framebuffer(self.swapchain.framebuffers[self.current_slot])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.swapchain.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);
        }

        provider.render(device, cmd);

        unsafe {
            device.cmd_end_render_pass(cmd);
            device
                .end_command_buffer(cmd)
                .context("Failed to end frame command buffer")?;
        }

        Ok(())
    }

    /// Submit the recorded frame: wait for the acquire at color-attachment
    /// output, signal render-complete. The slot's fence is deliberately not
    /// attached here; SignalSlot covers it after the present is queued.
    fn submit(&self) -> Result<()> {
        let wait_semaphores = [self.sync.image_acquired];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.device.frame_command_buffers[self.current_slot]];
        let signal_semaphores = [self.sync.render_complete];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(self.device.queue, &[submit_info.build()], vk::Fence::null())
        }
        .context("Failed to submit frame command buffer")
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::sync::{FenceState, SlotStates};

    /// Counts the provider lifecycle calls a run makes.
    #[derive(Default)]
    struct Recorder {
        initialized: u32,
        rendered: u32,
        shut_down: u32,
    }

    /// Mirror of `FrameLoop::run`'s phase order against the fence-state
    /// model: fenced upload on slot 0, per-frame wait/record/signal with a
    /// sequential acquire, final drain, shutdown. `retired` says which
    /// submissions the simulated GPU has finished; returns the first
    /// iteration whose WaitSlot found the fence still unsignaled.
    fn simulate_run(
        frames: u32,
        states: &mut SlotStates,
        recorder: &mut Recorder,
        gpu_retires: impl Fn(u32) -> bool,
    ) -> Option<u32> {
        let mut first_blocked = None;

        // Upload: wait+reset slot 0, submit, wait for retirement.
        states.mark_waited(0);
        recorder.initialized += 1;
        states.mark_retired(0);

        for frame in 0..frames {
            let slot = (frame as usize) % states.slot_count();

            if states.state(slot) == FenceState::Unsignaled {
                // A real wait_and_reset blocks here until the GPU retires
                // the slot's previous frame.
                if first_blocked.is_none() {
                    first_blocked = Some(frame);
                }
                states.mark_retired(slot);
            }
            states.mark_waited(slot);
            recorder.rendered += 1;

            if gpu_retires(frame) {
                states.mark_retired(slot);
            }
        }

        states.mark_all_retired();
        recorder.shut_down += 1;

        first_blocked
    }

    #[test]
    fn zero_frames_still_uploads_drains_and_shuts_down() {
        let mut states = SlotStates::new(3);
        let mut recorder = Recorder::default();

        let blocked = simulate_run(0, &mut states, &mut recorder, |_| false);

        assert_eq!(recorder.initialized, 1);
        assert_eq!(recorder.rendered, 0);
        assert_eq!(recorder.shut_down, 1);
        assert_eq!(blocked, None);
        assert_eq!(states.in_flight(), 0);
    }

    #[test]
    fn slow_gpu_blocks_after_ring_depth_frames() {
        // Five frames, ring depth three, a GPU that never retires anything:
        // the CPU records one frame per slot and then must stall on the
        // first reused slot - lookahead is capped at slot_count - 1.
        let mut states = SlotStates::new(3);
        let mut recorder = Recorder::default();

        let blocked = simulate_run(5, &mut states, &mut recorder, |_| false);

        assert_eq!(blocked, Some(3));
        assert_eq!(recorder.rendered, 5);
    }

    #[test]
    fn fast_gpu_never_blocks() {
        // A GPU that retires every frame immediately keeps every fence
        // signaled by the time its slot comes around again.
        let mut states = SlotStates::new(3);
        let mut recorder = Recorder::default();

        let blocked = simulate_run(12, &mut states, &mut recorder, |_| true);

        assert_eq!(blocked, None);
        assert_eq!(recorder.rendered, 12);
    }
}
