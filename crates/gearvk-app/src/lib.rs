//! Window runner and frame orchestration.
//!
//! [`run`] opens a window, builds the GPU context, and drives the frame
//! loop. The loop itself lives in [`driver`] behind the [`FrameDriver`]
//! trait so its sequencing is testable without a device.

pub mod driver;
pub mod frame;
pub mod runner;

pub use driver::{AcquireOutcome, FrameDriver, FrameLoop, PresentOutcome, StepOutcome};
pub use frame::{FrameState, DEGREES_PER_SECOND, VIEW_ROT_STEP};
pub use runner::{run, sample_count_from_u32, AppConfig};
