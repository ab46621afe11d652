//! Frame resource ring: per-frame constant and vertex storage, rotated so the
//! CPU can prepare frames ahead of the GPU without overwriting data still in
//! flight.
//!
//! The ring never touches the GPU directly. Each slot accumulates the records
//! written this frame (object constants, material constants, pass constants,
//! the wave vertex snapshot); the renderer drains them into that slot's GPU
//! buffers. Synchronization goes through [`FenceTimeline`], so the whole
//! rotation protocol runs under test with a counter instead of a device.

use std::sync::{Arc, Condvar, Mutex};

use bytemuck::Zeroable;

use crate::params::{ConfigError, FrameConfig};
use crate::scene::{MaterialConstants, ObjectConstants, PassConstants, Vertex};

/// Monotone completion counter shared between the submitting side and the
/// ring. `signal` reserves the next value and arranges for `completed` to
/// reach it once the work tied to it retires; `wait` blocks until then.
pub trait FenceTimeline {
    /// Reserve and return the next fence value, tying it to all work
    /// submitted so far.
    fn signal(&self) -> u64;

    /// Highest fence value known to be complete.
    fn completed(&self) -> u64;

    /// Block until `completed() >= value`.
    fn wait(&self, value: u64);
}

/// GPU-free timeline backed by a counter the owner advances by hand.
/// Used by tests and headless runs.
pub struct CountingFence {
    state: Mutex<CountingState>,
    cond: Condvar,
}

struct CountingState {
    next: u64,
    completed: u64,
}

impl CountingFence {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CountingState {
                next: 0,
                completed: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Mark every value up to and including `value` complete.
    pub fn complete_through(&self, value: u64) {
        let mut state = self.state.lock().unwrap();
        state.completed = state.completed.max(value);
        self.cond.notify_all();
    }
}

impl Default for CountingFence {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceTimeline for CountingFence {
    fn signal(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.next += 1;
        state.next
    }

    fn completed(&self) -> u64 {
        self.state.lock().unwrap().completed
    }

    fn wait(&self, value: u64) {
        let mut state = self.state.lock().unwrap();
        while state.completed < value {
            state = self.cond.wait(state).unwrap();
        }
    }
}

/// One in-flight frame's CPU-side storage.
pub struct FrameSlot {
    /// (object index, record) pairs written this frame, drained by the
    /// renderer into the slot's object buffer at `index * stride`.
    object_uploads: Vec<(u32, ObjectConstants)>,
    material_uploads: Vec<(u32, MaterialConstants)>,
    pass_constants: PassConstants,
    wave_vertices: Vec<Vertex>,
    /// Fence value stamped when this slot was last submitted; zero means the
    /// slot has never been in flight.
    fence: u64,
}

impl FrameSlot {
    fn new(wave_vertex_count: usize) -> Self {
        Self {
            object_uploads: Vec::new(),
            material_uploads: Vec::new(),
            pass_constants: PassConstants::zeroed(),
            wave_vertices: vec![Vertex::zeroed(); wave_vertex_count],
            fence: 0,
        }
    }

    /// Copy an object record to a fixed index in this slot.
    pub fn write_object(&mut self, index: u32, record: ObjectConstants) {
        self.object_uploads.push((index, record));
    }

    /// Copy a material record to a fixed index in this slot.
    pub fn write_material(&mut self, index: u32, record: MaterialConstants) {
        self.material_uploads.push((index, record));
    }

    pub fn set_pass_constants(&mut self, pass: PassConstants) {
        self.pass_constants = pass;
    }

    pub fn pass_constants(&self) -> &PassConstants {
        &self.pass_constants
    }

    pub fn wave_vertices_mut(&mut self) -> &mut [Vertex] {
        &mut self.wave_vertices
    }

    pub fn wave_vertices(&self) -> &[Vertex] {
        &self.wave_vertices
    }

    pub fn object_uploads(&self) -> &[(u32, ObjectConstants)] {
        &self.object_uploads
    }

    pub fn material_uploads(&self) -> &[(u32, MaterialConstants)] {
        &self.material_uploads
    }

    pub fn stamped_fence(&self) -> u64 {
        self.fence
    }
}

/// Shared ownership of a timeline still satisfies the contract.
impl<F: FenceTimeline> FenceTimeline for Arc<F> {
    fn signal(&self) -> u64 {
        (**self).signal()
    }

    fn completed(&self) -> u64 {
        (**self).completed()
    }

    fn wait(&self, value: u64) {
        (**self).wait(value)
    }
}

/// Fixed-depth circular array of frame slots. `advance` is the single
/// back-pressure point of the pipeline: it blocks until the GPU has retired
/// the slot it is about to hand out.
pub struct FrameResourceRing<F: FenceTimeline> {
    slots: Vec<FrameSlot>,
    current: usize,
    fence: F,
}

impl<F: FenceTimeline> FrameResourceRing<F> {
    pub fn new(
        config: &FrameConfig,
        wave_vertex_count: usize,
        fence: F,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            slots: (0..config.ring_depth)
                .map(|_| FrameSlot::new(wave_vertex_count))
                .collect(),
            // First advance() lands on slot 0.
            current: config.ring_depth - 1,
            fence,
        })
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn fence(&self) -> &F {
        &self.fence
    }

    /// Rotate to the next slot. If that slot's last submission has not been
    /// retired by the GPU yet, block until its stamped fence value completes.
    /// This bounds how far ahead of the GPU the CPU may run.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();

        let stamped = self.slots[self.current].fence;
        if stamped != 0 && self.fence.completed() < stamped {
            self.fence.wait(stamped);
        }

        // The slot is ours again; clear last cycle's upload lists.
        let slot = &mut self.slots[self.current];
        slot.object_uploads.clear();
        slot.material_uploads.clear();
    }

    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    pub fn current_slot_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    /// Record the fence value signalled for this frame's submission; the next
    /// time the ring rotates into this slot, `advance` waits on it.
    pub fn stamp_current(&mut self, fence_value: u64) {
        self.slots[self.current].fence = fence_value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::FrameConfig;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn ring(depth: usize, fence: Arc<CountingFence>) -> FrameResourceRing<Arc<CountingFence>> {
        FrameResourceRing::new(&FrameConfig { ring_depth: depth }, 16, fence).unwrap()
    }

    #[test]
    fn depth_below_two_is_rejected() {
        let fence = Arc::new(CountingFence::new());
        assert!(FrameResourceRing::new(&FrameConfig { ring_depth: 1 }, 16, fence).is_err());
    }

    #[test]
    fn slots_rotate_modulo_depth() {
        let fence = Arc::new(CountingFence::new());
        let mut ring = ring(3, fence.clone());

        let mut seen = Vec::new();
        for _ in 0..6 {
            ring.advance();
            seen.push(ring.current_index());
            // Retire immediately so rotation never blocks in this test.
            let value = fence.signal();
            ring.stamp_current(value);
            fence.complete_through(value);
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn advance_skips_wait_for_never_submitted_slots() {
        let fence = Arc::new(CountingFence::new());
        let mut ring = ring(3, fence);

        // No stamps anywhere; all three rotations must return immediately.
        for _ in 0..3 {
            ring.advance();
        }
    }

    #[test]
    fn stamp_round_trips_through_the_slot() {
        let fence = Arc::new(CountingFence::new());
        let mut ring = ring(2, fence.clone());

        ring.advance();
        assert_eq!(ring.current_slot().stamped_fence(), 0);

        let value = fence.signal();
        ring.stamp_current(value);
        assert_eq!(ring.current_slot().stamped_fence(), value);
    }

    #[test]
    fn advance_blocks_until_stamped_fence_completes() {
        let fence = Arc::new(CountingFence::new());
        let mut ring = ring(2, fence.clone());

        // Fill both slots with unretired submissions.
        ring.advance();
        ring.stamp_current(fence.signal()); // slot 0 -> fence 1
        ring.advance();
        ring.stamp_current(fence.signal()); // slot 1 -> fence 2

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            ring.advance(); // needs fence 1
            tx.send(ring.current_index()).unwrap();
        });

        // Nothing retired yet: advance must still be blocked.
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(mpsc::RecvTimeoutError::Timeout)
        );

        fence.complete_through(1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(0));
        handle.join().unwrap();
    }

    #[test]
    fn advance_returns_immediately_once_fence_is_complete() {
        let fence = Arc::new(CountingFence::new());
        let mut ring = ring(2, fence.clone());

        ring.advance();
        let value = fence.signal();
        ring.stamp_current(value);
        fence.complete_through(value);

        ring.advance();
        ring.advance(); // back to the retired slot; must not block
        assert_eq!(ring.current_index(), 0);
    }

    #[test]
    fn rotating_into_a_slot_clears_its_upload_lists() {
        let fence = Arc::new(CountingFence::new());
        let mut ring = ring(2, fence.clone());

        ring.advance();
        ring.current_slot_mut()
            .write_object(0, ObjectConstants::zeroed());
        assert_eq!(ring.current_slot().object_uploads().len(), 1);
        let value = fence.signal();
        ring.stamp_current(value);
        fence.complete_through(value);

        ring.advance();
        ring.advance();
        assert!(ring.current_slot().object_uploads().is_empty());
    }
}
