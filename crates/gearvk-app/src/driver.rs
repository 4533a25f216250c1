//! Frame orchestration.
//!
//! [`FrameLoop`] owns the per-frame sequencing: waiting on the slot ring,
//! acquiring, recording, presenting, and deciding when the swapchain must
//! be rebuilt. The Vulkan side is behind the [`FrameDriver`] trait so the
//! sequencing can be tested without a device.

use crate::frame::FrameState;

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired.
    Image {
        image_index: u32,
        /// The swapchain still works but no longer matches the surface.
        suboptimal: bool,
    },
    /// The swapchain is out of date; nothing was acquired.
    Stale,
}

/// Result of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented or dropped, and the swapchain must be rebuilt.
    Stale,
}

/// What a [`FrameLoop::step`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A frame was recorded, submitted, and presented.
    Rendered,
    /// The swapchain was rebuilt instead; no frame was submitted.
    Rebuilt,
}

/// The device-facing half of the frame loop.
pub trait FrameDriver {
    type Error;

    /// Number of frame slots in flight.
    fn slot_count(&self) -> usize;

    /// Extent the current swapchain was built with.
    fn built_extent(&self) -> (u32, u32);

    /// Block until the slot's previous submission has retired.
    fn wait_slot(&mut self, slot: usize) -> Result<(), Self::Error>;

    /// Acquire the next swapchain image against the slot's semaphore.
    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome, Self::Error>;

    /// Record and submit one frame into the acquired image.
    fn record_and_submit(
        &mut self,
        slot: usize,
        image_index: u32,
        state: &FrameState,
    ) -> Result<(), Self::Error>;

    /// Present the image.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome, Self::Error>;

    /// Tear down and rebuild the swapchain at the given extent.
    fn rebuild(&mut self, extent: (u32, u32)) -> Result<(), Self::Error>;
}

/// Sequences frames over a [`FrameDriver`].
///
/// Slots are reused in FIFO order. A rebuild always happens between the
/// wait and the next submission, and resets slot order to the start of
/// the ring.
pub struct FrameLoop<D: FrameDriver> {
    driver: D,
    state: FrameState,
    slot: usize,
    pending_extent: (u32, u32),
    rebuild_scheduled: bool,
    frames_presented: u64,
}

impl<D: FrameDriver> FrameLoop<D> {
    /// Create a loop around a driver whose swapchain is already built.
    pub fn new(driver: D) -> Self {
        let pending_extent = driver.built_extent();
        Self {
            driver,
            state: FrameState::default(),
            slot: 0,
            pending_extent,
            rebuild_scheduled: false,
            frames_presented: 0,
        }
    }

    /// Request the swapchain be rebuilt at a new size before the next frame.
    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.pending_extent = (width, height);
    }

    /// Number of frames presented so far.
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// The animation and view state.
    pub fn state(&self) -> &FrameState {
        &self.state
    }

    /// Mutable access to the animation and view state.
    pub fn state_mut(&mut self) -> &mut FrameState {
        &mut self.state
    }

    /// The underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable access to the underlying driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Run one frame: either render and present, or rebuild the swapchain.
    pub fn step(&mut self, dt: f32) -> Result<StepOutcome, D::Error> {
        self.driver.wait_slot(self.slot)?;

        // A scheduled rebuild or a pending resize preempts the frame.
        if self.rebuild_scheduled || self.pending_extent != self.driver.built_extent() {
            return self.rebuild();
        }

        let (image_index, suboptimal) = match self.driver.acquire(self.slot)? {
            AcquireOutcome::Image {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::Stale => return self.rebuild(),
        };

        self.driver
            .record_and_submit(self.slot, image_index, &self.state)?;

        // A stale present still counts as a frame; the rebuild happens
        // before the next submission. Likewise a suboptimal acquire
        // delivered a usable image: render it and fold the rebuild into
        // the next iteration instead of dropping the acquire.
        if self.driver.present(self.slot, image_index)? == PresentOutcome::Stale || suboptimal {
            self.rebuild_scheduled = true;
        }

        self.frames_presented += 1;
        self.slot = (self.slot + 1) % self.driver.slot_count();
        self.state.advance(dt);

        Ok(StepOutcome::Rendered)
    }

    fn rebuild(&mut self) -> Result<StepOutcome, D::Error> {
        self.driver.rebuild(self.pending_extent)?;
        self.rebuild_scheduled = false;
        self.slot = 0;
        Ok(StepOutcome::Rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Wait(usize),
        Acquire(usize),
        Submit { slot: usize, image_index: u32 },
        Present { slot: usize, image_index: u32 },
        Rebuild(u32, u32),
    }

    #[derive(Default)]
    struct FakeDriver {
        events: Vec<Event>,
        extent: (u32, u32),
        next_image: u32,
        image_count: u32,
        stale_acquires: VecDeque<bool>,
        stale_presents: VecDeque<bool>,
        suboptimal_acquires: VecDeque<bool>,
        // Fence simulation: a submit puts its slot in flight, and waits
        // retire outstanding work in the scripted completion order.
        in_flight: Vec<bool>,
        completion_order: VecDeque<usize>,
        completed: Vec<usize>,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self {
                extent: (300, 300),
                image_count: 3,
                in_flight: vec![false; 2],
                ..Default::default()
            }
        }

        fn submits(&self) -> Vec<Event> {
            self.events
                .iter()
                .filter(|e| matches!(e, Event::Submit { .. }))
                .copied()
                .collect()
        }

        fn rebuild_count(&self) -> usize {
            self.events
                .iter()
                .filter(|e| matches!(e, Event::Rebuild(..)))
                .count()
        }
    }

    impl FrameDriver for FakeDriver {
        type Error = std::convert::Infallible;

        fn slot_count(&self) -> usize {
            2
        }

        fn built_extent(&self) -> (u32, u32) {
            self.extent
        }

        fn wait_slot(&mut self, slot: usize) -> Result<(), Self::Error> {
            self.events.push(Event::Wait(slot));
            // Unscripted work retires in submission order.
            while self.in_flight[slot] {
                let retired = self.completion_order.pop_front().unwrap_or(slot);
                self.in_flight[retired] = false;
                self.completed.push(retired);
            }
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome, Self::Error> {
            self.events.push(Event::Acquire(slot));
            if self.stale_acquires.pop_front() == Some(true) {
                return Ok(AcquireOutcome::Stale);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Image {
                image_index,
                suboptimal: self.suboptimal_acquires.pop_front() == Some(true),
            })
        }

        fn record_and_submit(
            &mut self,
            slot: usize,
            image_index: u32,
            _state: &FrameState,
        ) -> Result<(), Self::Error> {
            self.events.push(Event::Submit { slot, image_index });
            self.in_flight[slot] = true;
            Ok(())
        }

        fn present(
            &mut self,
            slot: usize,
            image_index: u32,
        ) -> Result<PresentOutcome, Self::Error> {
            self.events.push(Event::Present { slot, image_index });
            if self.stale_presents.pop_front() == Some(true) {
                Ok(PresentOutcome::Stale)
            } else {
                Ok(PresentOutcome::Presented)
            }
        }

        fn rebuild(&mut self, extent: (u32, u32)) -> Result<(), Self::Error> {
            self.events.push(Event::Rebuild(extent.0, extent.1));
            self.extent = extent;
            self.next_image = 0;
            // A rebuild waits for idle, retiring everything outstanding.
            self.in_flight.iter_mut().for_each(|f| *f = false);
            Ok(())
        }
    }

    #[test]
    fn single_step_renders_one_frame() {
        let mut frame_loop = FrameLoop::new(FakeDriver::new());

        let outcome = frame_loop.step(0.016).unwrap();

        assert_eq!(outcome, StepOutcome::Rendered);
        assert_eq!(frame_loop.frames_presented(), 1);
        assert_eq!(
            frame_loop.driver().events,
            vec![
                Event::Wait(0),
                Event::Acquire(0),
                Event::Submit {
                    slot: 0,
                    image_index: 0
                },
                Event::Present {
                    slot: 0,
                    image_index: 0
                },
            ]
        );
    }

    #[test]
    fn slots_are_reused_in_fifo_order() {
        let mut frame_loop = FrameLoop::new(FakeDriver::new());

        for _ in 0..4 {
            frame_loop.step(0.016).unwrap();
        }

        let slots: Vec<usize> = frame_loop
            .driver()
            .submits()
            .iter()
            .map(|e| match e {
                Event::Submit { slot, .. } => *slot,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1]);
    }

    #[test]
    fn resize_rebuilds_exactly_once_before_next_submit() {
        let mut frame_loop = FrameLoop::new(FakeDriver::new());

        frame_loop.step(0.016).unwrap();
        frame_loop.request_resize(640, 480);

        assert_eq!(frame_loop.step(0.016).unwrap(), StepOutcome::Rebuilt);
        assert_eq!(frame_loop.step(0.016).unwrap(), StepOutcome::Rendered);
        assert_eq!(frame_loop.step(0.016).unwrap(), StepOutcome::Rendered);

        let driver = frame_loop.driver();
        assert_eq!(driver.rebuild_count(), 1);
        assert_eq!(driver.built_extent(), (640, 480));

        // No submission between the resize request and the rebuild. The
        // resize lands right after the first frame's present.
        let resize_pos = driver
            .events
            .iter()
            .position(|e| matches!(e, Event::Present { .. }))
            .unwrap()
            + 1;
        let rebuild_pos = driver
            .events
            .iter()
            .position(|e| matches!(e, Event::Rebuild(..)))
            .unwrap();
        assert!(!driver.events[resize_pos..rebuild_pos]
            .iter()
            .any(|e| matches!(e, Event::Submit { .. })));
    }

    #[test]
    fn rebuild_restarts_slot_order() {
        let mut frame_loop = FrameLoop::new(FakeDriver::new());

        frame_loop.step(0.016).unwrap(); // slot 0
        frame_loop.request_resize(640, 480);
        frame_loop.step(0.016).unwrap(); // rebuilt
        frame_loop.step(0.016).unwrap(); // slot 0 again

        let slots: Vec<usize> = frame_loop
            .driver()
            .submits()
            .iter()
            .map(|e| match e {
                Event::Submit { slot, .. } => *slot,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(slots, vec![0, 0]);
    }

    #[test]
    fn stale_acquire_rebuilds_without_submitting() {
        let mut driver = FakeDriver::new();
        driver.stale_acquires.push_back(true);
        let mut frame_loop = FrameLoop::new(driver);

        assert_eq!(frame_loop.step(0.016).unwrap(), StepOutcome::Rebuilt);
        assert_eq!(frame_loop.frames_presented(), 0);
        assert!(frame_loop.driver().submits().is_empty());
        assert_eq!(frame_loop.driver().rebuild_count(), 1);
    }

    #[test]
    fn stale_present_schedules_rebuild_for_next_step() {
        let mut driver = FakeDriver::new();
        driver.stale_presents.push_back(true);
        let mut frame_loop = FrameLoop::new(driver);

        // The stale frame still counts as presented.
        assert_eq!(frame_loop.step(0.016).unwrap(), StepOutcome::Rendered);
        assert_eq!(frame_loop.frames_presented(), 1);

        // The next step rebuilds before acquiring anything.
        assert_eq!(frame_loop.step(0.016).unwrap(), StepOutcome::Rebuilt);
        assert_eq!(frame_loop.driver().rebuild_count(), 1);

        assert_eq!(frame_loop.step(0.016).unwrap(), StepOutcome::Rendered);
    }

    #[test]
    fn animation_advances_per_rendered_frame() {
        let mut frame_loop = FrameLoop::new(FakeDriver::new());

        frame_loop.step(0.1).unwrap();
        assert_relative_eq!(frame_loop.state().angle, 7.0, epsilon = 1e-5);

        frame_loop.state_mut().toggle_animation();
        frame_loop.step(0.1).unwrap();
        assert_relative_eq!(frame_loop.state().angle, 7.0, epsilon = 1e-5);
    }

    #[test]
    fn rebuild_does_not_advance_animation() {
        let mut frame_loop = FrameLoop::new(FakeDriver::new());

        frame_loop.request_resize(100, 100);
        frame_loop.step(0.1).unwrap();

        assert_relative_eq!(frame_loop.state().angle, 0.0);
        assert_eq!(frame_loop.frames_presented(), 0);
    }

    #[test]
    fn out_of_order_completion_preserves_fifo_reuse() {
        let mut driver = FakeDriver::new();
        // Slot 1's work finishes before slot 0's even though slot 0 was
        // submitted first.
        driver.completion_order.extend([1, 0]);
        let mut frame_loop = FrameLoop::new(driver);

        for _ in 0..4 {
            frame_loop.step(0.016).unwrap();
        }

        let driver = frame_loop.driver();
        assert_eq!(driver.completed, vec![1, 0]);

        let waits: Vec<usize> = driver
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Wait(slot) => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(waits, vec![0, 1, 0, 1]);

        let slots: Vec<usize> = driver
            .submits()
            .iter()
            .map(|e| match e {
                Event::Submit { slot, .. } => *slot,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1]);
    }

    #[test]
    fn suboptimal_acquire_renders_then_rebuilds() {
        let mut driver = FakeDriver::new();
        driver.suboptimal_acquires.push_back(true);
        let mut frame_loop = FrameLoop::new(driver);

        // The acquired image is rendered and presented.
        assert_eq!(frame_loop.step(0.016).unwrap(), StepOutcome::Rendered);
        assert_eq!(frame_loop.frames_presented(), 1);
        assert_eq!(frame_loop.driver().rebuild_count(), 0);

        // The rebuild runs before anything else on the next step.
        assert_eq!(frame_loop.step(0.016).unwrap(), StepOutcome::Rebuilt);
        assert_eq!(frame_loop.driver().rebuild_count(), 1);
    }

    struct FailingDriver;

    impl FrameDriver for FailingDriver {
        type Error = &'static str;

        fn slot_count(&self) -> usize {
            2
        }

        fn built_extent(&self) -> (u32, u32) {
            (300, 300)
        }

        fn wait_slot(&mut self, _slot: usize) -> Result<(), Self::Error> {
            Ok(())
        }

        fn acquire(&mut self, _slot: usize) -> Result<AcquireOutcome, Self::Error> {
            Ok(AcquireOutcome::Image {
                image_index: 0,
                suboptimal: false,
            })
        }

        fn record_and_submit(
            &mut self,
            _slot: usize,
            _image_index: u32,
            _state: &FrameState,
        ) -> Result<(), Self::Error> {
            Err("submit failed")
        }

        fn present(
            &mut self,
            _slot: usize,
            _image_index: u32,
        ) -> Result<PresentOutcome, Self::Error> {
            Ok(PresentOutcome::Presented)
        }

        fn rebuild(&mut self, _extent: (u32, u32)) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[test]
    fn driver_errors_propagate_out_of_step() {
        let mut frame_loop = FrameLoop::new(FailingDriver);

        assert_eq!(frame_loop.step(0.016), Err("submit failed"));
        assert_eq!(frame_loop.frames_presented(), 0);
        assert_relative_eq!(frame_loop.state().angle, 0.0);
    }
}
