//! VK_EXT_device_generated_commands bindings.
//!
//! The extension postdates ash's generated bindings, so the structures are
//! declared here as `#[repr(C)]` mirrors of the C API and the entry points
//! are resolved by name through `vkGetDeviceProcAddr`.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{c_void, CStr};

/// Extension name, for the device creation extension list.
pub const EXTENSION_NAME: &CStr = c"VK_EXT_device_generated_commands";

// Structure type values from the registry (extension number 573).
pub const STRUCTURE_TYPE_PHYSICAL_DEVICE_DEVICE_GENERATED_COMMANDS_FEATURES_EXT:
    vk::StructureType = vk::StructureType::from_raw(1_000_572_000);
pub const STRUCTURE_TYPE_GENERATED_COMMANDS_MEMORY_REQUIREMENTS_INFO_EXT: vk::StructureType =
    vk::StructureType::from_raw(1_000_572_002);
pub const STRUCTURE_TYPE_INDIRECT_EXECUTION_SET_CREATE_INFO_EXT: vk::StructureType =
    vk::StructureType::from_raw(1_000_572_003);
pub const STRUCTURE_TYPE_GENERATED_COMMANDS_INFO_EXT: vk::StructureType =
    vk::StructureType::from_raw(1_000_572_004);
pub const STRUCTURE_TYPE_INDIRECT_COMMANDS_LAYOUT_CREATE_INFO_EXT: vk::StructureType =
    vk::StructureType::from_raw(1_000_572_006);
pub const STRUCTURE_TYPE_INDIRECT_COMMANDS_LAYOUT_TOKEN_EXT: vk::StructureType =
    vk::StructureType::from_raw(1_000_572_007);
pub const STRUCTURE_TYPE_WRITE_INDIRECT_EXECUTION_SET_PIPELINE_EXT: vk::StructureType =
    vk::StructureType::from_raw(1_000_572_008);
pub const STRUCTURE_TYPE_WRITE_INDIRECT_EXECUTION_SET_SHADER_EXT: vk::StructureType =
    vk::StructureType::from_raw(1_000_572_011);
pub const STRUCTURE_TYPE_INDIRECT_EXECUTION_SET_PIPELINE_INFO_EXT: vk::StructureType =
    vk::StructureType::from_raw(1_000_572_012);
pub const STRUCTURE_TYPE_INDIRECT_EXECUTION_SET_SHADER_INFO_EXT: vk::StructureType =
    vk::StructureType::from_raw(1_000_572_013);
pub const STRUCTURE_TYPE_INDIRECT_EXECUTION_SET_SHADER_LAYOUT_INFO_EXT: vk::StructureType =
    vk::StructureType::from_raw(1_000_572_014);

/// VK_BUFFER_USAGE_2_PREPROCESS_BUFFER_BIT_EXT
pub const BUFFER_USAGE_2_PREPROCESS_BUFFER_EXT: vk::BufferUsageFlags2KHR =
    vk::BufferUsageFlags2KHR::from_raw(0x8000_0000);

/// VK_PIPELINE_CREATE_2_INDIRECT_BINDABLE_BIT_EXT
pub const PIPELINE_CREATE_2_INDIRECT_BINDABLE_EXT: vk::PipelineCreateFlags2KHR =
    vk::PipelineCreateFlags2KHR::from_raw(1 << 38);

/// VK_SHADER_CREATE_INDIRECT_BINDABLE_BIT_EXT
pub const SHADER_CREATE_INDIRECT_BINDABLE_EXT: vk::ShaderCreateFlagsEXT =
    vk::ShaderCreateFlagsEXT::from_raw(0x80);

/// VkIndirectCommandsLayoutEXT (non-dispatchable handle).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IndirectCommandsLayoutEXT(u64);

impl IndirectCommandsLayoutEXT {
    pub const fn null() -> Self {
        Self(0)
    }
}

/// VkIndirectExecutionSetEXT (non-dispatchable handle).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IndirectExecutionSetEXT(u64);

impl IndirectExecutionSetEXT {
    pub const fn null() -> Self {
        Self(0)
    }
}

/// VkIndirectCommandsTokenTypeEXT
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectCommandsTokenTypeEXT(pub i32);

impl IndirectCommandsTokenTypeEXT {
    pub const EXECUTION_SET: Self = Self(0);
    pub const DRAW: Self = Self(6);
}

/// VkIndirectExecutionSetInfoTypeEXT
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectExecutionSetInfoTypeEXT(pub i32);

impl IndirectExecutionSetInfoTypeEXT {
    pub const PIPELINES: Self = Self(0);
    pub const SHADER_OBJECTS: Self = Self(1);
}

/// VkPhysicalDeviceDeviceGeneratedCommandsFeaturesEXT
///
/// Chains into `VkDeviceCreateInfo` to enable the feature.
#[repr(C)]
pub struct PhysicalDeviceDeviceGeneratedCommandsFeaturesEXT {
    pub s_type: vk::StructureType,
    pub p_next: *mut c_void,
    pub device_generated_commands: vk::Bool32,
}

impl Default for PhysicalDeviceDeviceGeneratedCommandsFeaturesEXT {
    fn default() -> Self {
        Self {
            s_type: STRUCTURE_TYPE_PHYSICAL_DEVICE_DEVICE_GENERATED_COMMANDS_FEATURES_EXT,
            p_next: std::ptr::null_mut(),
            device_generated_commands: vk::FALSE,
        }
    }
}

// Layout starts with sType/pNext, so the struct is chainable.
unsafe impl vk::ExtendsDeviceCreateInfo for PhysicalDeviceDeviceGeneratedCommandsFeaturesEXT {}

/// VkIndirectCommandsExecutionSetTokenEXT
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IndirectCommandsExecutionSetTokenEXT {
    pub ty: IndirectExecutionSetInfoTypeEXT,
    pub shader_stages: vk::ShaderStageFlags,
}

/// VkIndirectCommandsTokenDataEXT
#[repr(C)]
#[derive(Clone, Copy)]
pub union IndirectCommandsTokenDataEXT {
    pub p_execution_set: *const IndirectCommandsExecutionSetTokenEXT,
    pub p_raw: *const c_void,
}

/// VkIndirectCommandsLayoutTokenEXT
#[repr(C)]
pub struct IndirectCommandsLayoutTokenEXT {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub token_type: IndirectCommandsTokenTypeEXT,
    pub data: IndirectCommandsTokenDataEXT,
    pub offset: u32,
}

impl Default for IndirectCommandsLayoutTokenEXT {
    fn default() -> Self {
        Self {
            s_type: STRUCTURE_TYPE_INDIRECT_COMMANDS_LAYOUT_TOKEN_EXT,
            p_next: std::ptr::null(),
            token_type: IndirectCommandsTokenTypeEXT::DRAW,
            data: IndirectCommandsTokenDataEXT {
                p_raw: std::ptr::null(),
            },
            offset: 0,
        }
    }
}

/// VkIndirectCommandsLayoutCreateInfoEXT
#[repr(C)]
pub struct IndirectCommandsLayoutCreateInfoEXT {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub flags: vk::Flags,
    pub shader_stages: vk::ShaderStageFlags,
    pub indirect_stride: u32,
    pub pipeline_layout: vk::PipelineLayout,
    pub token_count: u32,
    pub p_tokens: *const IndirectCommandsLayoutTokenEXT,
}

impl Default for IndirectCommandsLayoutCreateInfoEXT {
    fn default() -> Self {
        Self {
            s_type: STRUCTURE_TYPE_INDIRECT_COMMANDS_LAYOUT_CREATE_INFO_EXT,
            p_next: std::ptr::null(),
            flags: 0,
            shader_stages: vk::ShaderStageFlags::empty(),
            indirect_stride: 0,
            pipeline_layout: vk::PipelineLayout::null(),
            token_count: 0,
            p_tokens: std::ptr::null(),
        }
    }
}

/// VkIndirectExecutionSetPipelineInfoEXT
#[repr(C)]
pub struct IndirectExecutionSetPipelineInfoEXT {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub initial_pipeline: vk::Pipeline,
    pub max_pipeline_count: u32,
}

impl Default for IndirectExecutionSetPipelineInfoEXT {
    fn default() -> Self {
        Self {
            s_type: STRUCTURE_TYPE_INDIRECT_EXECUTION_SET_PIPELINE_INFO_EXT,
            p_next: std::ptr::null(),
            initial_pipeline: vk::Pipeline::null(),
            max_pipeline_count: 0,
        }
    }
}

/// VkIndirectExecutionSetShaderLayoutInfoEXT
#[repr(C)]
pub struct IndirectExecutionSetShaderLayoutInfoEXT {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub set_layout_count: u32,
    pub p_set_layouts: *const vk::DescriptorSetLayout,
}

impl Default for IndirectExecutionSetShaderLayoutInfoEXT {
    fn default() -> Self {
        Self {
            s_type: STRUCTURE_TYPE_INDIRECT_EXECUTION_SET_SHADER_LAYOUT_INFO_EXT,
            p_next: std::ptr::null(),
            set_layout_count: 0,
            p_set_layouts: std::ptr::null(),
        }
    }
}

/// VkIndirectExecutionSetShaderInfoEXT
#[repr(C)]
pub struct IndirectExecutionSetShaderInfoEXT {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub shader_count: u32,
    pub p_initial_shaders: *const vk::ShaderEXT,
    pub p_set_layout_infos: *const IndirectExecutionSetShaderLayoutInfoEXT,
    pub max_shader_count: u32,
    pub push_constant_range_count: u32,
    pub p_push_constant_ranges: *const vk::PushConstantRange,
}

impl Default for IndirectExecutionSetShaderInfoEXT {
    fn default() -> Self {
        Self {
            s_type: STRUCTURE_TYPE_INDIRECT_EXECUTION_SET_SHADER_INFO_EXT,
            p_next: std::ptr::null(),
            shader_count: 0,
            p_initial_shaders: std::ptr::null(),
            p_set_layout_infos: std::ptr::null(),
            max_shader_count: 0,
            push_constant_range_count: 0,
            p_push_constant_ranges: std::ptr::null(),
        }
    }
}

/// VkIndirectExecutionSetInfoEXT
#[repr(C)]
#[derive(Clone, Copy)]
pub union IndirectExecutionSetInfoEXT {
    pub p_pipeline_info: *const IndirectExecutionSetPipelineInfoEXT,
    pub p_shader_info: *const IndirectExecutionSetShaderInfoEXT,
}

/// VkIndirectExecutionSetCreateInfoEXT
#[repr(C)]
pub struct IndirectExecutionSetCreateInfoEXT {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub ty: IndirectExecutionSetInfoTypeEXT,
    pub info: IndirectExecutionSetInfoEXT,
}

impl IndirectExecutionSetCreateInfoEXT {
    pub fn pipelines(info: &IndirectExecutionSetPipelineInfoEXT) -> Self {
        Self {
            s_type: STRUCTURE_TYPE_INDIRECT_EXECUTION_SET_CREATE_INFO_EXT,
            p_next: std::ptr::null(),
            ty: IndirectExecutionSetInfoTypeEXT::PIPELINES,
            info: IndirectExecutionSetInfoEXT {
                p_pipeline_info: info,
            },
        }
    }

    pub fn shader_objects(info: &IndirectExecutionSetShaderInfoEXT) -> Self {
        Self {
            s_type: STRUCTURE_TYPE_INDIRECT_EXECUTION_SET_CREATE_INFO_EXT,
            p_next: std::ptr::null(),
            ty: IndirectExecutionSetInfoTypeEXT::SHADER_OBJECTS,
            info: IndirectExecutionSetInfoEXT {
                p_shader_info: info,
            },
        }
    }
}

/// VkWriteIndirectExecutionSetPipelineEXT
#[repr(C)]
pub struct WriteIndirectExecutionSetPipelineEXT {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub index: u32,
    pub pipeline: vk::Pipeline,
}

impl WriteIndirectExecutionSetPipelineEXT {
    pub fn new(index: u32, pipeline: vk::Pipeline) -> Self {
        Self {
            s_type: STRUCTURE_TYPE_WRITE_INDIRECT_EXECUTION_SET_PIPELINE_EXT,
            p_next: std::ptr::null(),
            index,
            pipeline,
        }
    }
}

/// VkWriteIndirectExecutionSetShaderEXT
#[repr(C)]
pub struct WriteIndirectExecutionSetShaderEXT {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub index: u32,
    pub shader: vk::ShaderEXT,
}

impl WriteIndirectExecutionSetShaderEXT {
    pub fn new(index: u32, shader: vk::ShaderEXT) -> Self {
        Self {
            s_type: STRUCTURE_TYPE_WRITE_INDIRECT_EXECUTION_SET_SHADER_EXT,
            p_next: std::ptr::null(),
            index,
            shader,
        }
    }
}

/// VkGeneratedCommandsMemoryRequirementsInfoEXT
#[repr(C)]
pub struct GeneratedCommandsMemoryRequirementsInfoEXT {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub indirect_execution_set: IndirectExecutionSetEXT,
    pub indirect_commands_layout: IndirectCommandsLayoutEXT,
    pub max_sequence_count: u32,
    pub max_draw_count: u32,
}

impl Default for GeneratedCommandsMemoryRequirementsInfoEXT {
    fn default() -> Self {
        Self {
            s_type: STRUCTURE_TYPE_GENERATED_COMMANDS_MEMORY_REQUIREMENTS_INFO_EXT,
            p_next: std::ptr::null(),
            indirect_execution_set: IndirectExecutionSetEXT::null(),
            indirect_commands_layout: IndirectCommandsLayoutEXT::null(),
            max_sequence_count: 0,
            max_draw_count: 0,
        }
    }
}

/// VkGeneratedCommandsInfoEXT
#[repr(C)]
pub struct GeneratedCommandsInfoEXT {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub shader_stages: vk::ShaderStageFlags,
    pub indirect_execution_set: IndirectExecutionSetEXT,
    pub indirect_commands_layout: IndirectCommandsLayoutEXT,
    pub indirect_address: vk::DeviceAddress,
    pub indirect_address_size: vk::DeviceSize,
    pub preprocess_address: vk::DeviceAddress,
    pub preprocess_size: vk::DeviceSize,
    pub max_sequence_count: u32,
    pub sequence_count_address: vk::DeviceAddress,
    pub max_draw_count: u32,
}

impl Default for GeneratedCommandsInfoEXT {
    fn default() -> Self {
        Self {
            s_type: STRUCTURE_TYPE_GENERATED_COMMANDS_INFO_EXT,
            p_next: std::ptr::null(),
            shader_stages: vk::ShaderStageFlags::empty(),
            indirect_execution_set: IndirectExecutionSetEXT::null(),
            indirect_commands_layout: IndirectCommandsLayoutEXT::null(),
            indirect_address: 0,
            indirect_address_size: 0,
            preprocess_address: 0,
            preprocess_size: 0,
            max_sequence_count: 0,
            sequence_count_address: 0,
            max_draw_count: 0,
        }
    }
}

type PfnCreateIndirectCommandsLayout = unsafe extern "system" fn(
    vk::Device,
    *const IndirectCommandsLayoutCreateInfoEXT,
    *const c_void,
    *mut IndirectCommandsLayoutEXT,
) -> vk::Result;
type PfnDestroyIndirectCommandsLayout =
    unsafe extern "system" fn(vk::Device, IndirectCommandsLayoutEXT, *const c_void);
type PfnCreateIndirectExecutionSet = unsafe extern "system" fn(
    vk::Device,
    *const IndirectExecutionSetCreateInfoEXT,
    *const c_void,
    *mut IndirectExecutionSetEXT,
) -> vk::Result;
type PfnDestroyIndirectExecutionSet =
    unsafe extern "system" fn(vk::Device, IndirectExecutionSetEXT, *const c_void);
type PfnUpdateIndirectExecutionSetPipeline = unsafe extern "system" fn(
    vk::Device,
    IndirectExecutionSetEXT,
    u32,
    *const WriteIndirectExecutionSetPipelineEXT,
);
type PfnUpdateIndirectExecutionSetShader = unsafe extern "system" fn(
    vk::Device,
    IndirectExecutionSetEXT,
    u32,
    *const WriteIndirectExecutionSetShaderEXT,
);
type PfnGetGeneratedCommandsMemoryRequirements = unsafe extern "system" fn(
    vk::Device,
    *const GeneratedCommandsMemoryRequirementsInfoEXT,
    *mut vk::MemoryRequirements2<'static>,
);
type PfnCmdExecuteGeneratedCommands =
    unsafe extern "system" fn(vk::CommandBuffer, vk::Bool32, *const GeneratedCommandsInfoEXT);

/// Resolved VK_EXT_device_generated_commands entry points.
pub struct DeviceGeneratedCommands {
    device: vk::Device,
    create_indirect_commands_layout: PfnCreateIndirectCommandsLayout,
    destroy_indirect_commands_layout: PfnDestroyIndirectCommandsLayout,
    create_indirect_execution_set: PfnCreateIndirectExecutionSet,
    destroy_indirect_execution_set: PfnDestroyIndirectExecutionSet,
    update_indirect_execution_set_pipeline: PfnUpdateIndirectExecutionSetPipeline,
    update_indirect_execution_set_shader: PfnUpdateIndirectExecutionSetShader,
    get_generated_commands_memory_requirements: PfnGetGeneratedCommandsMemoryRequirements,
    cmd_execute_generated_commands: PfnCmdExecuteGeneratedCommands,
}

impl DeviceGeneratedCommands {
    /// Resolve the extension entry points.
    ///
    /// # Safety
    /// The instance and device must be valid, and the device must have been
    /// created with VK_EXT_device_generated_commands enabled.
    pub unsafe fn load(instance: &ash::Instance, device: &ash::Device) -> Result<Self> {
        macro_rules! load_fn {
            ($name:literal) => {{
                let name: &CStr = $name;
                match instance.get_device_proc_addr(device.handle(), name.as_ptr()) {
                    Some(f) => std::mem::transmute(f),
                    None => {
                        return Err(GpuError::ExtensionNotSupported(format!(
                            "missing device entry point {}",
                            name.to_string_lossy()
                        )))
                    }
                }
            }};
        }

        Ok(Self {
            device: device.handle(),
            create_indirect_commands_layout: load_fn!(c"vkCreateIndirectCommandsLayoutEXT"),
            destroy_indirect_commands_layout: load_fn!(c"vkDestroyIndirectCommandsLayoutEXT"),
            create_indirect_execution_set: load_fn!(c"vkCreateIndirectExecutionSetEXT"),
            destroy_indirect_execution_set: load_fn!(c"vkDestroyIndirectExecutionSetEXT"),
            update_indirect_execution_set_pipeline: load_fn!(
                c"vkUpdateIndirectExecutionSetPipelineEXT"
            ),
            update_indirect_execution_set_shader: load_fn!(
                c"vkUpdateIndirectExecutionSetShaderEXT"
            ),
            get_generated_commands_memory_requirements: load_fn!(
                c"vkGetGeneratedCommandsMemoryRequirementsEXT"
            ),
            cmd_execute_generated_commands: load_fn!(c"vkCmdExecuteGeneratedCommandsEXT"),
        })
    }

    /// Create an indirect commands layout.
    ///
    /// # Safety
    /// The create info must be valid.
    pub unsafe fn create_indirect_commands_layout(
        &self,
        create_info: &IndirectCommandsLayoutCreateInfoEXT,
    ) -> Result<IndirectCommandsLayoutEXT> {
        let mut layout = IndirectCommandsLayoutEXT::null();
        (self.create_indirect_commands_layout)(
            self.device,
            create_info,
            std::ptr::null(),
            &mut layout,
        )
        .result()?;
        Ok(layout)
    }

    /// Destroy an indirect commands layout.
    ///
    /// # Safety
    /// The layout must not be in use.
    pub unsafe fn destroy_indirect_commands_layout(&self, layout: IndirectCommandsLayoutEXT) {
        (self.destroy_indirect_commands_layout)(self.device, layout, std::ptr::null());
    }

    /// Create an indirect execution set.
    ///
    /// # Safety
    /// The create info must be valid.
    pub unsafe fn create_indirect_execution_set(
        &self,
        create_info: &IndirectExecutionSetCreateInfoEXT,
    ) -> Result<IndirectExecutionSetEXT> {
        let mut set = IndirectExecutionSetEXT::null();
        (self.create_indirect_execution_set)(self.device, create_info, std::ptr::null(), &mut set)
            .result()?;
        Ok(set)
    }

    /// Destroy an indirect execution set.
    ///
    /// # Safety
    /// The set must not be in use.
    pub unsafe fn destroy_indirect_execution_set(&self, set: IndirectExecutionSetEXT) {
        (self.destroy_indirect_execution_set)(self.device, set, std::ptr::null());
    }

    /// Write pipelines into execution set slots.
    ///
    /// # Safety
    /// All pipelines must be valid and indirect-bindable.
    pub unsafe fn update_indirect_execution_set_pipeline(
        &self,
        set: IndirectExecutionSetEXT,
        writes: &[WriteIndirectExecutionSetPipelineEXT],
    ) {
        (self.update_indirect_execution_set_pipeline)(
            self.device,
            set,
            writes.len() as u32,
            writes.as_ptr(),
        );
    }

    /// Write shader objects into execution set slots.
    ///
    /// # Safety
    /// All shaders must be valid and indirect-bindable.
    pub unsafe fn update_indirect_execution_set_shader(
        &self,
        set: IndirectExecutionSetEXT,
        writes: &[WriteIndirectExecutionSetShaderEXT],
    ) {
        (self.update_indirect_execution_set_shader)(
            self.device,
            set,
            writes.len() as u32,
            writes.as_ptr(),
        );
    }

    /// Query the preprocess scratch requirements for a generated dispatch.
    ///
    /// # Safety
    /// The info must reference a valid execution set and commands layout.
    pub unsafe fn get_generated_commands_memory_requirements(
        &self,
        info: &GeneratedCommandsMemoryRequirementsInfoEXT,
    ) -> vk::MemoryRequirements {
        let mut requirements: vk::MemoryRequirements2<'static> =
            vk::MemoryRequirements2::default();
        (self.get_generated_commands_memory_requirements)(self.device, info, &mut requirements);
        requirements.memory_requirements
    }

    /// Record execution of device-generated commands.
    ///
    /// # Safety
    /// Must be recorded inside a render pass instance with the referenced
    /// state bound; the indirect and preprocess buffers must be valid.
    pub unsafe fn cmd_execute_generated_commands(
        &self,
        command_buffer: vk::CommandBuffer,
        is_preprocessed: bool,
        info: &GeneratedCommandsInfoEXT,
    ) {
        (self.cmd_execute_generated_commands)(
            command_buffer,
            vk::Bool32::from(is_preprocessed),
            info,
        );
    }
}
