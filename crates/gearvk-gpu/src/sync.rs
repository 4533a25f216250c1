//! Synchronization primitives.

use crate::command::CommandPool;
use crate::error::Result;
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
) -> Result<()> {
    device.wait_for_fences(&[fence], true, timeout_ns)?;
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// Per-slot resources for one frame in flight.
pub struct FrameSlot {
    /// Fence signaled when the slot's last submission retires.
    pub in_flight: vk::Fence,
    /// Command buffer re-recorded each time the slot is reused.
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore signaled when the acquired image is ready.
    pub image_acquired: vk::Semaphore,
}

/// Fixed ring of frame slots, reused in FIFO order by the frame loop.
///
/// Each slot owns its fence, command buffer, and acquire semaphore. One
/// render-done semaphore is shared across slots: with FIFO reuse only one
/// present is outstanding against it at a time.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    /// Semaphore signaled by the render submission and waited by present.
    pub render_done: vk::Semaphore,
}

impl FrameRing {
    /// Create a frame ring with the given number of slots.
    ///
    /// Fences start signaled so the first wait on each slot passes.
    ///
    /// # Safety
    /// The device and pool must be valid.
    pub unsafe fn new(device: &ash::Device, pool: &CommandPool, slot_count: usize) -> Result<Self> {
        let command_buffers = pool.allocate_command_buffers(
            device,
            vk::CommandBufferLevel::PRIMARY,
            slot_count as u32,
        )?;

        let mut slots = Vec::with_capacity(slot_count);
        for command_buffer in command_buffers {
            slots.push(FrameSlot {
                in_flight: create_fence(device, true)?,
                command_buffer,
                image_acquired: create_semaphore(device)?,
            });
        }

        Ok(Self {
            slots,
            render_done: create_semaphore(device)?,
        })
    }

    /// Get a slot by index.
    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    /// Number of slots in the ring.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Wait for a slot's previous submission to retire.
    ///
    /// The fence is left signaled; reset it only once a new submission
    /// against the slot is guaranteed.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device, index: usize) -> Result<()> {
        wait_for_fence(device, self.slots[index].in_flight, u64::MAX)
    }

    /// Destroy all resources.
    ///
    /// # Safety
    /// The device must be valid and the slots must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device, pool: &CommandPool) {
        for slot in &self.slots {
            device.destroy_fence(slot.in_flight, None);
            device.destroy_semaphore(slot.image_acquired, None);
            device.free_command_buffers(pool.handle(), &[slot.command_buffer]);
        }
        device.destroy_semaphore(self.render_done, None);
    }
}
