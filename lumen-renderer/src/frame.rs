//! Frame slots cycled round-robin so the CPU can record frame N+1 while the
//! GPU still executes frame N.

use std::time::Duration;
use lumen_rhi::{
    CommandPool, DeletionQueue, DescriptorAllocator, DescriptorAllocatorConfig, Device, RhiError, Timeline,
    FRAMES_IN_FLIGHT,
};

/// How [`FrameRing::wait_for_current`] got past the slot's fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotWait {
    /// The GPU had already finished the slot's previous submission.
    AlreadySignaled,
    /// The calling thread blocked until it finished.
    Waited,
}

struct FrameSlot<T> {
    data: T,
    /// Timeline value signaled by the last submission recorded in this slot.
    fence: u64,
}

/// A fixed ring of [`FRAMES_IN_FLIGHT`] slots fenced by one timeline.
///
/// Frame `n` uses slot `n % FRAMES_IN_FLIGHT` and signals the timeline with
/// `n + 1`. The frame index only advances once a frame has been submitted.
pub struct FrameRing<T> {
    slots: Vec<FrameSlot<T>>,
    frame_index: u64,
}

impl<T> FrameRing<T> {
    pub fn new<E>(mut create: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        let mut slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for index in 0..FRAMES_IN_FLIGHT {
            slots.push(FrameSlot { data: create(index)?, fence: 0 });
        }
        Ok(Self { slots, frame_index: 0 })
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn slot_index(&self) -> usize {
        (self.frame_index % FRAMES_IN_FLIGHT as u64) as usize
    }

    #[inline]
    pub fn current(&self) -> &T {
        &self.slots[self.slot_index()].data
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut T {
        let index = self.slot_index();
        &mut self.slots[index].data
    }

    /// Fence value the current slot must reach before it may be reused.
    #[inline]
    pub fn current_fence(&self) -> u64 {
        self.slots[self.slot_index()].fence
    }

    /// Value the submission of the current frame signals.
    #[inline]
    pub fn submit_value(&self) -> u64 {
        self.frame_index + 1
    }

    /// Block until the GPU is done with the current slot's previous frame.
    #[profiling::function]
    pub fn wait_for_current(&self, timeline: &impl Timeline, timeout: Duration) -> Result<SlotWait, RhiError> {
        let fence = self.current_fence();
        if timeline.value()? >= fence {
            return Ok(SlotWait::AlreadySignaled);
        }
        timeline.wait(fence, timeout)?;
        Ok(SlotWait::Waited)
    }

    /// Timeline value after which nothing submitted so far is still executing.
    ///
    /// Resources the current frame stops using may be dropped once it is reached.
    #[inline]
    pub fn retirement_fence(&self) -> u64 {
        self.frame_index
    }

    /// Record that the current frame was submitted with [`Self::submit_value`].
    pub fn mark_submitted(&mut self) {
        let index = self.slot_index();
        self.slots[index].fence = self.submit_value();
    }

    /// Move on to the next frame.
    pub fn advance(&mut self) {
        self.frame_index += 1;
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().map(|slot| &mut slot.data)
    }
}

/// Per-slot resources, reset every time the slot comes around.
pub struct FrameData {
    pub command_pool: CommandPool,
    pub descriptors: DescriptorAllocator,
    pub deletion_queue: DeletionQueue,
}

impl FrameData {
    pub fn new(device: &Device, index: usize) -> Result<Self, RhiError> {
        Ok(Self {
            command_pool: CommandPool::new(device, &format!("frame{index}.commands"), device.graphics_queue())?,
            descriptors: DescriptorAllocator::new(
                device,
                &format!("frame{index}.descriptors"),
                &DescriptorAllocatorConfig::default(),
            ),
            deletion_queue: DeletionQueue::new(),
        })
    }

    /// Release everything the slot's previous frame left behind.
    pub fn reset(&mut self) -> Result<(), RhiError> {
        self.deletion_queue.flush();
        self.command_pool.reset()?;
        self.descriptors.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use lumen_rhi::RetiredQueue;

    /// Completes submissions only when told to, like a GPU lagging behind.
    #[derive(Default)]
    struct FakeTimeline {
        completed: Cell<u64>,
        /// Value the "GPU" reaches once the host starts waiting.
        completes_on_wait: Cell<u64>,
        waits: Cell<u32>,
    }

    impl Timeline for FakeTimeline {
        fn value(&self) -> Result<u64, RhiError> {
            Ok(self.completed.get())
        }

        fn wait(&self, value: u64, _timeout: Duration) -> Result<(), RhiError> {
            self.waits.set(self.waits.get() + 1);
            self.completed.set(self.completed.get().max(self.completes_on_wait.get()));
            if self.completed.get() >= value {
                Ok(())
            } else {
                Err(RhiError::Timeout { value })
            }
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn ring() -> FrameRing<usize> {
        FrameRing::new(|index| Ok::<_, RhiError>(index)).unwrap()
    }

    fn submit(ring: &mut FrameRing<usize>) -> u64 {
        let value = ring.submit_value();
        ring.mark_submitted();
        ring.advance();
        value
    }

    #[test]
    fn slots_cycle_round_robin() {
        let mut ring = ring();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(*ring.current());
            submit(&mut ring);
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
        assert_eq!(ring.frame_index(), 5);
    }

    #[test]
    fn fresh_slots_never_block() {
        let ring = ring();
        let timeline = FakeTimeline::default();
        assert_eq!(ring.wait_for_current(&timeline, TIMEOUT).unwrap(), SlotWait::AlreadySignaled);
        assert_eq!(timeline.waits.get(), 0);
    }

    #[test]
    fn submissions_signal_frame_index_plus_one() {
        let mut ring = ring();
        assert_eq!(submit(&mut ring), 1);
        assert_eq!(submit(&mut ring), 2);
        assert_eq!(ring.current_fence(), 1);
        assert_eq!(ring.submit_value(), 3);
    }

    #[test]
    fn reuse_waits_for_the_slot_fence() {
        let mut ring = ring();
        submit(&mut ring);
        submit(&mut ring);

        // Frame 2 reuses slot 0, whose frame-0 submission has not completed yet.
        let timeline = FakeTimeline::default();
        timeline.completes_on_wait.set(1);
        assert_eq!(ring.wait_for_current(&timeline, TIMEOUT).unwrap(), SlotWait::Waited);
        assert!(timeline.value().unwrap() >= ring.current_fence());
    }

    #[test]
    fn warmed_up_ring_does_not_stall() {
        let mut ring = ring();
        submit(&mut ring);
        submit(&mut ring);

        let timeline = FakeTimeline::default();
        timeline.completed.set(1);
        assert_eq!(ring.wait_for_current(&timeline, TIMEOUT).unwrap(), SlotWait::AlreadySignaled);
        assert_eq!(timeline.waits.get(), 0);
    }

    #[test]
    fn expired_wait_is_reported() {
        let mut ring = ring();
        submit(&mut ring);
        submit(&mut ring);

        let timeline = FakeTimeline::default();
        let result = ring.wait_for_current(&timeline, TIMEOUT);
        assert!(matches!(result, Err(RhiError::Timeout { value: 1 })));
    }

    #[test]
    fn retired_resources_wait_for_the_last_submission() {
        let mut ring = ring();
        submit(&mut ring);
        let last_signal = submit(&mut ring);

        // Replaced while recording frame 2: frames 0 and 1 may still read it.
        let mut retired = RetiredQueue::new();
        retired.retire("draw targets", ring.retirement_fence());

        let timeline = FakeTimeline::default();
        timeline.completed.set(last_signal - 1);
        assert_eq!(retired.reclaim(timeline.value().unwrap()), 0);

        timeline.completed.set(last_signal);
        assert_eq!(retired.reclaim(timeline.value().unwrap()), 1);

        // Frame 2 draws into the new targets, so its own signal is not needed.
        assert!(ring.retirement_fence() < ring.submit_value());
    }

    #[test]
    fn skipped_frames_keep_the_slot() {
        let mut ring = ring();
        submit(&mut ring);
        // A frame whose acquire failed is never submitted nor advanced.
        assert_eq!(ring.slot_index(), 1);
        assert_eq!(ring.submit_value(), 2);
    }
}
