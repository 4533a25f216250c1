//! Vulkan abstraction layer for gearvk.
//!
//! This crate provides:
//! - Vulkan instance and device management
//! - GPU capability detection
//! - Device-generated-commands entry points (VK_EXT_device_generated_commands)
//! - Memory allocation via gpu-allocator
//! - Command buffer management
//! - Swapchain handling and frame-in-flight synchronization

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod dgc;
pub mod error;
pub mod instance;
pub mod memory;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{DeviceContext, DeviceContextBuilder};
pub use descriptors::{write_uniform_buffer, DescriptorPool, DescriptorSetLayoutBuilder};
pub use dgc::DeviceGeneratedCommands;
pub use error::{GpuError, Result};
pub use memory::{find_memory_type, GpuAllocator, GpuBuffer};
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::{SwapchainConfig, SwapchainUnit};
pub use sync::{create_fence, create_semaphore, FrameRing, FrameSlot};
