// SPDX-License-Identifier: CEPL-1.0
use std::io::Cursor;

use ash::vk;
use tracing::{debug, info};

use crate::command::CommandContext;
use crate::driver::{ensure_live, Driver, GraphicsPipelineRequest};
use crate::error::{PipelineError, RecordError};
use crate::push_constant::{PushConstantBlock, PushConstantValue};

const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineId(u32);

/// Anything that can contribute draws to the frame's single render pass.
pub trait RenderPipeline {
    fn record(&self, ctx: &mut CommandContext<'_>) -> Result<(), RecordError>;

    /// Called after a reset produced a render pass with a different colour
    /// format. Pipelines built against the old pass must be recreated.
    fn rebuild(
        &mut self,
        _driver: &dyn Driver,
        _render_pass: vk::RenderPass,
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    fn push_constants_mut(&mut self) -> Option<&mut PushConstantBlock> {
        None
    }

    fn destroy(&mut self, driver: &dyn Driver);
}

/// One descriptor-set-layout binding, kept as plain data so a description
/// can be stored and reused across rebuilds.
#[derive(Clone, Copy, Debug)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

#[derive(Clone, Debug)]
pub struct GraphicsPipelineDesc {
    pub vertex_spirv: Vec<u8>,
    pub fragment_spirv: Vec<u8>,
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub bindings: Vec<DescriptorBinding>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    pub vertex_count: u32,
    pub instance_count: u32,
}

impl GraphicsPipelineDesc {
    /// A vertex-buffer-less triangle list drawing three vertices once.
    pub fn new(vertex_spirv: impl Into<Vec<u8>>, fragment_spirv: impl Into<Vec<u8>>) -> Self {
        GraphicsPipelineDesc {
            vertex_spirv: vertex_spirv.into(),
            fragment_spirv: fragment_spirv.into(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            bindings: Vec::new(),
            push_constant_ranges: Vec::new(),
            vertex_count: 3,
            instance_count: 1,
        }
    }

    pub fn with_push_constants(mut self, range: vk::PushConstantRange) -> Self {
        self.push_constant_ranges.push(range);
        self
    }

    pub fn with_draw(mut self, vertex_count: u32, instance_count: u32) -> Self {
        self.vertex_count = vertex_count;
        self.instance_count = instance_count;
        self
    }
}

fn decode_spirv(stage: vk::ShaderStageFlags, bytes: &[u8]) -> Result<Vec<u32>, PipelineError> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| {
        PipelineError::InvalidSpirv {
            stage,
            reason: e.to_string(),
        }
    })?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(PipelineError::InvalidSpirv {
            stage,
            reason: "missing SPIR-V magic number".into(),
        });
    }
    Ok(words)
}

/// A vertex + fragment program with its layout, drawn with fixed counts.
#[derive(Debug)]
pub struct GraphicsPipeline {
    vertex: Vec<u32>,
    fragment: Vec<u32>,
    topology: vk::PrimitiveTopology,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    vertex_count: u32,
    instance_count: u32,
    set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    push: Option<PushConstantBlock>,
}

impl GraphicsPipeline {
    pub fn new(
        driver: &dyn Driver,
        render_pass: vk::RenderPass,
        desc: &GraphicsPipelineDesc,
    ) -> Result<Self, PipelineError> {
        let vertex = decode_spirv(vk::ShaderStageFlags::VERTEX, &desc.vertex_spirv)?;
        let fragment = decode_spirv(vk::ShaderStageFlags::FRAGMENT, &desc.fragment_spirv)?;
        let push = if desc.push_constant_ranges.is_empty() {
            None
        } else {
            Some(PushConstantBlock::new(
                &desc.push_constant_ranges,
                driver.limits().max_push_constants_size,
            )?)
        };

        let mut p = GraphicsPipeline {
            vertex,
            fragment,
            topology: desc.topology,
            cull_mode: desc.cull_mode,
            front_face: desc.front_face,
            vertex_count: desc.vertex_count,
            instance_count: desc.instance_count,
            set_layout: vk::DescriptorSetLayout::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            push,
        };
        if let Err(e) = p.create_layouts(driver, &desc.bindings) {
            p.destroy(driver);
            return Err(e);
        }
        if let Err(e) = p.create_pipeline(driver, render_pass) {
            p.destroy(driver);
            return Err(e);
        }
        Ok(p)
    }

    fn create_layouts(
        &mut self,
        driver: &dyn Driver,
        bindings: &[DescriptorBinding],
    ) -> Result<(), PipelineError> {
        if !bindings.is_empty() {
            let raw: Vec<vk::DescriptorSetLayoutBinding<'_>> = bindings
                .iter()
                .map(|b| vk::DescriptorSetLayoutBinding {
                    binding: b.binding,
                    descriptor_type: b.descriptor_type,
                    descriptor_count: b.count,
                    stage_flags: b.stages,
                    ..Default::default()
                })
                .collect();
            self.set_layout = driver
                .create_descriptor_set_layout(&raw)
                .map_err(PipelineError::vk("descriptor set layout creation"))?;
        }
        let set_layouts: &[vk::DescriptorSetLayout] =
            if self.set_layout == vk::DescriptorSetLayout::null() {
                &[]
            } else {
                std::slice::from_ref(&self.set_layout)
            };
        let ranges = self.push.as_ref().map(|p| p.ranges()).unwrap_or(&[]);
        self.layout = driver
            .create_pipeline_layout(set_layouts, ranges)
            .map_err(PipelineError::vk("pipeline layout creation"))?;
        Ok(())
    }

    /// Shader modules only live for the duration of pipeline creation.
    fn create_pipeline(
        &mut self,
        driver: &dyn Driver,
        render_pass: vk::RenderPass,
    ) -> Result<(), PipelineError> {
        let render_pass = ensure_live(render_pass, "render pass")?;
        let vs = driver
            .create_shader_module(&self.vertex)
            .map_err(PipelineError::vk("vertex shader module creation"))?;
        let fs = match driver.create_shader_module(&self.fragment) {
            Ok(fs) => fs,
            Err(e) => {
                driver.destroy_shader_module(vs);
                return Err(PipelineError::vk("fragment shader module creation")(e));
            }
        };
        let created = driver.create_graphics_pipeline(&GraphicsPipelineRequest {
            render_pass,
            layout: self.layout,
            vertex: vs,
            fragment: fs,
            topology: self.topology,
            cull_mode: self.cull_mode,
            front_face: self.front_face,
        });
        driver.destroy_shader_module(fs);
        driver.destroy_shader_module(vs);
        self.pipeline = created.map_err(PipelineError::vk("graphics pipeline creation"))?;
        Ok(())
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }
}

impl RenderPipeline for GraphicsPipeline {
    fn record(&self, ctx: &mut CommandContext<'_>) -> Result<(), RecordError> {
        ctx.bind_pipeline(self.pipeline)?;
        if let Some(push) = &self.push {
            push.record(ctx, self.layout)?;
        }
        ctx.draw(self.vertex_count, self.instance_count);
        Ok(())
    }

    fn rebuild(
        &mut self,
        driver: &dyn Driver,
        render_pass: vk::RenderPass,
    ) -> Result<(), PipelineError> {
        if self.pipeline != vk::Pipeline::null() {
            driver.destroy_pipeline(self.pipeline);
            self.pipeline = vk::Pipeline::null();
        }
        self.create_pipeline(driver, render_pass)
    }

    fn push_constants_mut(&mut self) -> Option<&mut PushConstantBlock> {
        self.push.as_mut()
    }

    fn destroy(&mut self, driver: &dyn Driver) {
        if self.pipeline != vk::Pipeline::null() {
            driver.destroy_pipeline(self.pipeline);
            self.pipeline = vk::Pipeline::null();
        }
        if self.layout != vk::PipelineLayout::null() {
            driver.destroy_pipeline_layout(self.layout);
            self.layout = vk::PipelineLayout::null();
        }
        if self.set_layout != vk::DescriptorSetLayout::null() {
            driver.destroy_descriptor_set_layout(self.set_layout);
            self.set_layout = vk::DescriptorSetLayout::null();
        }
    }
}

/// Registered pipelines, drawn in registration order.
#[derive(Default)]
pub struct PipelineRegistry {
    next_id: u32,
    pipelines: Vec<(PipelineId, Box<dyn RenderPipeline>)>,
}

impl PipelineRegistry {
    pub fn register(&mut self, pipeline: Box<dyn RenderPipeline>) -> PipelineId {
        let id = PipelineId(self.next_id);
        self.next_id += 1;
        self.pipelines.push((id, pipeline));
        debug!("registered pipeline {id:?} ({} total)", self.pipelines.len());
        id
    }

    pub fn register_graphics(
        &mut self,
        driver: &dyn Driver,
        render_pass: vk::RenderPass,
        desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineId, PipelineError> {
        let p = GraphicsPipeline::new(driver, render_pass, desc)?;
        Ok(self.register(Box::new(p)))
    }

    /// The caller guarantees no pending frame still references it.
    pub fn unregister(&mut self, driver: &dyn Driver, id: PipelineId) -> Result<(), PipelineError> {
        let at = self
            .pipelines
            .iter()
            .position(|(i, _)| *i == id)
            .ok_or(PipelineError::UnknownPipeline(id))?;
        let (_, mut p) = self.pipelines.remove(at);
        p.destroy(driver);
        Ok(())
    }

    pub fn set_push_constant(
        &mut self,
        id: PipelineId,
        stages: vk::ShaderStageFlags,
        offset: u32,
        value: PushConstantValue,
    ) -> Result<(), PipelineError> {
        let (_, p) = self
            .pipelines
            .iter_mut()
            .find(|(i, _)| *i == id)
            .ok_or(PipelineError::UnknownPipeline(id))?;
        let block = p
            .push_constants_mut()
            .ok_or(PipelineError::NoPushConstants(id))?;
        block.set(stages, offset, value)?;
        Ok(())
    }

    pub fn record_all(&self, ctx: &mut CommandContext<'_>) -> Result<(), RecordError> {
        for (_, p) in &self.pipelines {
            p.record(ctx)?;
        }
        Ok(())
    }

    pub fn rebuild(
        &mut self,
        driver: &dyn Driver,
        render_pass: vk::RenderPass,
    ) -> Result<(), PipelineError> {
        info!("rebuilding {} pipelines for a new colour format", self.pipelines.len());
        for (_, p) in &mut self.pipelines {
            p.rebuild(driver, render_pass)?;
        }
        Ok(())
    }

    pub fn destroy_all(&mut self, driver: &dyn Driver) {
        for (_, mut p) in self.pipelines.drain(..) {
            p.destroy(driver);
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = PipelineId> + '_ {
        self.pipelines.iter().map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
