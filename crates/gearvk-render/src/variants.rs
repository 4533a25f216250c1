//! Shading variant sets.
//!
//! Each gear is shaded by its own vertex-stage variant; the variants are
//! registered in an indirect execution set so the generated commands can
//! switch between them per sequence. Two providers exist: one graphics
//! pipeline per gear, or shader objects sharing a single fragment shader.

use crate::table::{vertex_variant_indices, VariantMode};
use ash::vk;
use gearvk_gpu::dgc::{
    self, IndirectExecutionSetEXT, IndirectExecutionSetPipelineInfoEXT,
    IndirectExecutionSetShaderInfoEXT, IndirectExecutionSetShaderLayoutInfoEXT,
    WriteIndirectExecutionSetPipelineEXT, WriteIndirectExecutionSetShaderEXT,
};
use gearvk_gpu::{DeviceContext, GpuError, Result};
use gearvk_mesh::gear::{NORMAL_OFFSET, VERTEX_STRIDE};

/// Shader stages selected through the execution set.
pub const VARIANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// A registered set of shading variants behind an indirect execution set.
pub trait ShadingVariantSet {
    /// Which provider backs this set.
    fn mode(&self) -> VariantMode;

    /// The execution set the generated commands index into.
    fn execution_set(&self) -> IndirectExecutionSetEXT;

    /// Bind the baseline variant and any state the generated draws inherit.
    ///
    /// # Safety
    /// Must be recorded inside a dynamic rendering instance.
    unsafe fn bind_baseline(
        &self,
        gpu: &DeviceContext,
        cmd: vk::CommandBuffer,
        extent: vk::Extent2D,
    );

    /// Destroy the variants and the execution set.
    ///
    /// # Safety
    /// Nothing recorded against the set may still be in flight.
    unsafe fn destroy(&self, gpu: &DeviceContext);
}

/// Two-binding vertex layout over the shared gear vertex buffer.
///
/// Both bindings read the same buffer with the same stride; the normal
/// binding is offset to the normal field at bind time.
fn vertex_bindings() -> [vk::VertexInputBindingDescription; 2] {
    [
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: VERTEX_STRIDE as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        },
        vk::VertexInputBindingDescription {
            binding: 1,
            stride: VERTEX_STRIDE as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        },
    ]
}

fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 2] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 1,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
    ]
}

fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Bind the shared vertex buffer twice: positions at the start of the
/// vertex, normals at their interleaved offset.
///
/// # Safety
/// The command buffer must be recording and the buffer valid.
pub unsafe fn bind_gear_vertex_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
) {
    device.cmd_bind_vertex_buffers(cmd, 0, &[buffer, buffer], &[0, NORMAL_OFFSET]);
}

/// One indirect-bindable graphics pipeline per gear.
pub struct PipelineVariants {
    pipelines: [vk::Pipeline; 3],
    execution_set: IndirectExecutionSetEXT,
}

impl PipelineVariants {
    /// Create the three gear pipelines and register them in an execution set.
    ///
    /// # Safety
    /// The layout and formats must be valid for the device.
    pub unsafe fn new(
        gpu: &DeviceContext,
        pipeline_layout: vk::PipelineLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        let device = gpu.device();

        let fragment_module = create_shader_module(device, gearvk_shaders::gear_fragment_shader())?;
        let vertex_spirv = gearvk_shaders::gear_vertex_shaders();

        let mut pipelines = [vk::Pipeline::null(); 3];
        let mut result: Result<()> = Ok(());

        for (i, spirv) in vertex_spirv.iter().enumerate() {
            let vertex_module = match create_shader_module(device, spirv) {
                Ok(module) => module,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };

            let created = create_gear_pipeline(
                device,
                pipeline_layout,
                vertex_module,
                fragment_module,
                color_format,
                depth_format,
                samples,
            );
            device.destroy_shader_module(vertex_module, None);

            match created {
                Ok(pipeline) => pipelines[i] = pipeline,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        device.destroy_shader_module(fragment_module, None);

        if let Err(e) = result {
            for pipeline in pipelines {
                if pipeline != vk::Pipeline::null() {
                    device.destroy_pipeline(pipeline, None);
                }
            }
            return Err(e);
        }

        // Register the pipelines: the set is created around the baseline
        // pipeline, the other two are written into their slots.
        let pipeline_info = IndirectExecutionSetPipelineInfoEXT {
            initial_pipeline: pipelines[0],
            max_pipeline_count: 3,
            ..Default::default()
        };
        let create_info = dgc::IndirectExecutionSetCreateInfoEXT::pipelines(&pipeline_info);
        let execution_set = gpu.dgc().create_indirect_execution_set(&create_info)?;

        let indices = vertex_variant_indices(VariantMode::Pipelines);
        let writes = [
            WriteIndirectExecutionSetPipelineEXT::new(indices[1], pipelines[1]),
            WriteIndirectExecutionSetPipelineEXT::new(indices[2], pipelines[2]),
        ];
        gpu.dgc()
            .update_indirect_execution_set_pipeline(execution_set, &writes);

        tracing::debug!("created pipeline variant set");

        Ok(Self {
            pipelines,
            execution_set,
        })
    }
}

impl ShadingVariantSet for PipelineVariants {
    fn mode(&self) -> VariantMode {
        VariantMode::Pipelines
    }

    fn execution_set(&self) -> IndirectExecutionSetEXT {
        self.execution_set
    }

    unsafe fn bind_baseline(
        &self,
        gpu: &DeviceContext,
        cmd: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) {
        let device = gpu.device();

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipelines[0]);
        device.cmd_set_viewport(cmd, 0, &[full_viewport(extent)]);
        device.cmd_set_scissor(cmd, 0, &[extent.into()]);
    }

    unsafe fn destroy(&self, gpu: &DeviceContext) {
        gpu.dgc().destroy_indirect_execution_set(self.execution_set);
        for pipeline in self.pipelines {
            gpu.device().destroy_pipeline(pipeline, None);
        }
    }
}

/// Shader objects: three vertex shaders plus a shared fragment shader.
pub struct ShaderObjectVariants {
    vertex_shaders: [vk::ShaderEXT; 3],
    fragment_shader: vk::ShaderEXT,
    samples: vk::SampleCountFlags,
    execution_set: IndirectExecutionSetEXT,
}

impl ShaderObjectVariants {
    /// Create the gear shader objects and register them in an execution set.
    ///
    /// # Safety
    /// The device must have been created with VK_EXT_shader_object enabled.
    pub unsafe fn new(
        gpu: &DeviceContext,
        set_layout: vk::DescriptorSetLayout,
        push_constant_range: vk::PushConstantRange,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        let loader = gpu
            .shader_object()
            .ok_or_else(|| GpuError::InvalidState("shader objects not enabled".to_string()))?;

        let set_layouts = [set_layout];
        let push_ranges = [push_constant_range];
        let vertex_spirv = gearvk_shaders::gear_vertex_shaders();

        let mut create_infos = Vec::with_capacity(4);
        for spirv in &vertex_spirv {
            create_infos.push(
                vk::ShaderCreateInfoEXT::default()
                    .flags(dgc::SHADER_CREATE_INDIRECT_BINDABLE_EXT)
                    .stage(vk::ShaderStageFlags::VERTEX)
                    .next_stage(vk::ShaderStageFlags::FRAGMENT)
                    .code_type(vk::ShaderCodeTypeEXT::SPIRV)
                    .code(bytemuck::cast_slice(spirv))
                    .name(c"main")
                    .set_layouts(&set_layouts)
                    .push_constant_ranges(&push_ranges),
            );
        }
        create_infos.push(
            vk::ShaderCreateInfoEXT::default()
                .flags(dgc::SHADER_CREATE_INDIRECT_BINDABLE_EXT)
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .code_type(vk::ShaderCodeTypeEXT::SPIRV)
                .code(bytemuck::cast_slice(gearvk_shaders::gear_fragment_shader()))
                .name(c"main"),
        );

        let shaders = loader.create_shaders(&create_infos, None).map_err(|(_, e)| {
            GpuError::ShaderCompilation(format!("shader object creation failed: {e}"))
        })?;

        let vertex_shaders = [shaders[0], shaders[1], shaders[2]];
        let fragment_shader = shaders[3];

        // The set starts with the baseline vertex shader and the shared
        // fragment shader; the remaining vertex variants are written after.
        // Layout infos describe each initial shader's descriptor interface.
        let initial_shaders = [vertex_shaders[0], fragment_shader];
        let vertex_layout_info = IndirectExecutionSetShaderLayoutInfoEXT {
            set_layout_count: 1,
            p_set_layouts: set_layouts.as_ptr(),
            ..Default::default()
        };
        let fragment_layout_info = IndirectExecutionSetShaderLayoutInfoEXT::default();
        let layout_infos = [vertex_layout_info, fragment_layout_info];

        let shader_info = IndirectExecutionSetShaderInfoEXT {
            shader_count: initial_shaders.len() as u32,
            p_initial_shaders: initial_shaders.as_ptr(),
            p_set_layout_infos: layout_infos.as_ptr(),
            max_shader_count: 4,
            push_constant_range_count: push_ranges.len() as u32,
            p_push_constant_ranges: push_ranges.as_ptr(),
            ..Default::default()
        };
        let create_info = dgc::IndirectExecutionSetCreateInfoEXT::shader_objects(&shader_info);
        let execution_set = gpu.dgc().create_indirect_execution_set(&create_info)?;

        let indices = vertex_variant_indices(VariantMode::ShaderObjects);
        let writes = [
            WriteIndirectExecutionSetShaderEXT::new(indices[1], vertex_shaders[1]),
            WriteIndirectExecutionSetShaderEXT::new(indices[2], vertex_shaders[2]),
        ];
        gpu.dgc()
            .update_indirect_execution_set_shader(execution_set, &writes);

        tracing::debug!("created shader object variant set");

        Ok(Self {
            vertex_shaders,
            fragment_shader,
            samples,
            execution_set,
        })
    }
}

impl ShadingVariantSet for ShaderObjectVariants {
    fn mode(&self) -> VariantMode {
        VariantMode::ShaderObjects
    }

    fn execution_set(&self) -> IndirectExecutionSetEXT {
        self.execution_set
    }

    unsafe fn bind_baseline(
        &self,
        gpu: &DeviceContext,
        cmd: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) {
        let device = gpu.device();
        // Checked at construction time.
        let Some(loader) = gpu.shader_object() else {
            return;
        };

        let stages = [vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::FRAGMENT];
        let shaders = [self.vertex_shaders[0], self.fragment_shader];
        loader.cmd_bind_shaders(cmd, &stages, &shaders);

        // Shader objects leave all pipeline state dynamic; set everything
        // the gear draws rely on.
        let bindings: Vec<vk::VertexInputBindingDescription2EXT> = vertex_bindings()
            .iter()
            .map(|b| {
                vk::VertexInputBindingDescription2EXT::default()
                    .binding(b.binding)
                    .stride(b.stride)
                    .input_rate(b.input_rate)
                    .divisor(1)
            })
            .collect();
        let attributes: Vec<vk::VertexInputAttributeDescription2EXT> = vertex_attributes()
            .iter()
            .map(|a| {
                vk::VertexInputAttributeDescription2EXT::default()
                    .location(a.location)
                    .binding(a.binding)
                    .format(a.format)
                    .offset(a.offset)
            })
            .collect();
        loader.cmd_set_vertex_input(cmd, &bindings, &attributes);

        device.cmd_set_viewport_with_count(cmd, &[full_viewport(extent)]);
        device.cmd_set_scissor_with_count(cmd, &[extent.into()]);
        device.cmd_set_primitive_topology(cmd, vk::PrimitiveTopology::TRIANGLE_STRIP);
        device.cmd_set_primitive_restart_enable(cmd, false);
        device.cmd_set_rasterizer_discard_enable(cmd, false);
        device.cmd_set_cull_mode(cmd, vk::CullModeFlags::BACK);
        device.cmd_set_front_face(cmd, vk::FrontFace::COUNTER_CLOCKWISE);
        device.cmd_set_depth_test_enable(cmd, true);
        device.cmd_set_depth_write_enable(cmd, true);
        device.cmd_set_depth_compare_op(cmd, vk::CompareOp::LESS_OR_EQUAL);
        device.cmd_set_depth_bounds_test_enable(cmd, false);
        device.cmd_set_depth_bias_enable(cmd, false);
        device.cmd_set_stencil_test_enable(cmd, false);

        loader.cmd_set_polygon_mode(cmd, vk::PolygonMode::FILL);
        loader.cmd_set_rasterization_samples(cmd, self.samples);
        loader.cmd_set_sample_mask(cmd, self.samples, &[u32::MAX]);
        loader.cmd_set_alpha_to_coverage_enable(cmd, false);
        loader.cmd_set_depth_clamp_enable(cmd, false);
        loader.cmd_set_logic_op_enable(cmd, false);
        loader.cmd_set_color_blend_enable(cmd, 0, &[vk::FALSE]);
        loader.cmd_set_color_write_mask(cmd, 0, &[vk::ColorComponentFlags::RGBA]);
    }

    unsafe fn destroy(&self, gpu: &DeviceContext) {
        gpu.dgc().destroy_indirect_execution_set(self.execution_set);
        if let Some(loader) = gpu.shader_object() {
            for shader in self.vertex_shaders {
                loader.destroy_shader(shader, None);
            }
            loader.destroy_shader(self.fragment_shader, None);
        }
    }
}

/// Create a shader module from SPIR-V words.
///
/// # Safety
/// The device must be valid.
unsafe fn create_shader_module(
    device: &ash::Device,
    spirv: &[u32],
) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);
    let module = device.create_shader_module(&create_info, None)?;
    Ok(module)
}

/// Create one indirect-bindable gear pipeline.
///
/// # Safety
/// All handles must be valid.
#[allow(clippy::too_many_arguments)]
unsafe fn create_gear_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    vertex_module: vk::ShaderModule,
    fragment_module: vk::ShaderModule,
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Result<vk::Pipeline> {
    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_module)
            .name(c"main"),
    ];

    let bindings = vertex_bindings();
    let attributes = vertex_attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_STRIP);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample =
        vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(samples);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

    let blend_attachment = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA);
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
        .attachments(std::slice::from_ref(&blend_attachment));

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_formats = [color_format];
    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(depth_format);

    // Indirect-bindable is a flags2-only bit.
    let mut flags2 = vk::PipelineCreateFlags2CreateInfoKHR::default()
        .flags(dgc::PIPELINE_CREATE_2_INDIRECT_BINDABLE_EXT);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info)
        .push_next(&mut flags2);

    let pipelines = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        .map_err(|(_, e)| GpuError::PipelineCreation(e.to_string()))?;

    Ok(pipelines[0])
}
