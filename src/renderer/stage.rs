//! 演示阶段流水线
//!
//! 每个演示由一组有序的阶段（`Stage`）组合而成，而不是层层继承的应用类。
//! 渲染器按固定顺序调用各个钩子，每个钩子依次作用于全部阶段：
//!
//! | 时机 | 钩子 |
//! |------|------|
//! | 初始化 | `build_geometry` → `build_materials` → `build_render_items` → `build_pipelines` |
//! | 每帧更新 | `animate` → `update_object_constants` → `update_material_constants` → `update_dynamic_vertices` → `update_pass_constants` |
//! | 每帧绘制 | `draw` |
//!
//! 所有钩子都有空的默认实现，阶段只需实现自己关心的部分。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::core::error::Result;
use super::command::{CommandList, PipelineId};
use super::demos;
use super::resource::{FrameConstants, UploadBuffer};
use super::scene::{PassConstants, RenderLayer, Scene, Vertex};

/// 每帧传给阶段的只读信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub total_time: f32,
    pub delta_time: f32,
    pub width: u32,
    pub height: u32,
    pub frame_index: u64,
}

impl FrameContext {
    /// 宽高比
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// 管线状态表：渲染层 → 管线状态
#[derive(Debug, Default)]
pub struct PipelineTable {
    layers: BTreeMap<RenderLayer, PipelineId>,
    names: Vec<String>,
}

impl PipelineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为渲染层注册管线状态，重复注册时覆盖旧的映射
    pub fn register(&mut self, layer: RenderLayer, name: impl Into<String>) -> PipelineId {
        let id = PipelineId(self.names.len() as u32);
        let name = name.into();
        debug!(layer = layer.name(), pipeline = %name, id = id.0, "Pipeline state registered");
        self.names.push(name);
        self.layers.insert(layer, id);
        id
    }

    pub fn get(&self, layer: RenderLayer) -> Option<PipelineId> {
        self.layers.get(&layer).copied()
    }

    pub fn name(&self, id: PipelineId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    /// 打开命令列表时使用的初始管线状态（按绘制顺序的第一个）
    pub fn initial(&self) -> Option<PipelineId> {
        RenderLayer::DRAW_ORDER.iter().find_map(|layer| self.get(*layer))
    }

    /// 已注册的（层, 管线状态）
    pub fn iter(&self) -> impl Iterator<Item = (RenderLayer, PipelineId)> + '_ {
        self.layers.iter().map(|(layer, id)| (*layer, *id))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// 演示阶段
pub trait Stage {
    /// 阶段名称，用于日志
    fn name(&self) -> &'static str;

    fn build_geometry(&mut self, _scene: &mut Scene) -> Result<()> {
        Ok(())
    }

    fn build_materials(&mut self, _scene: &mut Scene) -> Result<()> {
        Ok(())
    }

    fn build_render_items(&mut self, _scene: &mut Scene) -> Result<()> {
        Ok(())
    }

    fn build_pipelines(&mut self, _pipelines: &mut PipelineTable) -> Result<()> {
        Ok(())
    }

    /// 除主 Pass 之外还需要的 Pass 常量数量
    fn extra_passes(&self) -> usize {
        0
    }

    /// 修改场景数据（变换、材质），修改会标记脏计数器
    fn animate(&mut self, _frame: &FrameContext, _scene: &mut Scene) -> Result<()> {
        Ok(())
    }

    fn update_object_constants(&mut self, _scene: &mut Scene, _constants: &mut FrameConstants) -> Result<()> {
        Ok(())
    }

    fn update_material_constants(&mut self, _scene: &mut Scene, _constants: &mut FrameConstants) -> Result<()> {
        Ok(())
    }

    /// 重写本阶段在当前槽位中预留的动态顶点
    ///
    /// 只有场景预留过动态顶点时才会调用。
    fn update_dynamic_vertices(&mut self, _frame: &FrameContext, _vertices: &mut UploadBuffer<Vertex>) -> Result<()> {
        Ok(())
    }

    /// `passes[0]` 是主 Pass，其余由声明了 `extra_passes` 的阶段追加
    fn update_pass_constants(&mut self, _frame: &FrameContext, _passes: &mut Vec<PassConstants>) -> Result<()> {
        Ok(())
    }

    /// 覆盖清屏颜色
    fn clear_color(&self) -> Option<[f32; 4]> {
        None
    }

    fn draw(
        &mut self,
        _scene: &Scene,
        _pipelines: &PipelineTable,
        _constants: &FrameConstants,
        _list: &mut CommandList,
    ) -> Result<()> {
        Ok(())
    }
}

/// 有序的阶段列表
pub struct StagePipeline {
    stages: Vec<Box<dyn Stage>>,
    passes: Vec<PassConstants>,
}

impl StagePipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            passes: Vec::new(),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 每个帧资源需要的 Pass 常量数量
    pub fn pass_count(&self) -> usize {
        1 + self.stages.iter().map(|stage| stage.extra_passes()).sum::<usize>()
    }

    /// 运行所有构建钩子
    pub fn build(&mut self, scene: &mut Scene, pipelines: &mut PipelineTable) -> Result<()> {
        for stage in self.stages.iter_mut() {
            stage.build_geometry(scene)?;
        }
        for stage in self.stages.iter_mut() {
            stage.build_materials(scene)?;
        }
        for stage in self.stages.iter_mut() {
            stage.build_render_items(scene)?;
        }
        for stage in self.stages.iter_mut() {
            stage.build_pipelines(pipelines)?;
        }

        info!(
            stages = ?self.names(),
            geometries = scene.geometries().len(),
            materials = scene.materials().len(),
            render_items = scene.items().len(),
            pipelines = pipelines.len(),
            "Demo built"
        );
        Ok(())
    }

    /// 运行每帧的更新钩子，并把 Pass 常量写入当前帧资源
    pub fn update(&mut self, frame: &FrameContext, scene: &mut Scene, constants: &mut FrameConstants) -> Result<()> {
        for stage in self.stages.iter_mut() {
            stage.animate(frame, scene)?;
        }
        for stage in self.stages.iter_mut() {
            stage.update_object_constants(scene, constants)?;
        }
        for stage in self.stages.iter_mut() {
            stage.update_material_constants(scene, constants)?;
        }
        if let Some(vertices) = constants.dynamic_vertices.as_mut() {
            for stage in self.stages.iter_mut() {
                stage.update_dynamic_vertices(frame, vertices)?;
            }
        }

        let mut passes = vec![PassConstants::default()];
        for stage in self.stages.iter_mut() {
            stage.update_pass_constants(frame, &mut passes)?;
        }
        for (index, pass) in passes.iter().enumerate() {
            constants.pass.copy_data(index, pass)?;
        }
        self.passes = passes;
        Ok(())
    }

    /// 运行绘制钩子
    pub fn draw(
        &mut self,
        scene: &Scene,
        pipelines: &PipelineTable,
        constants: &FrameConstants,
        list: &mut CommandList,
    ) -> Result<()> {
        for stage in self.stages.iter_mut() {
            stage.draw(scene, pipelines, constants, list)?;
        }
        Ok(())
    }

    /// 清屏颜色；多个阶段给出时以最后一个为准
    pub fn clear_color(&self, default: [f32; 4]) -> [f32; 4] {
        self.stages
            .iter()
            .filter_map(|stage| stage.clear_color())
            .last()
            .unwrap_or(default)
    }

    /// 最近一次更新写入的 Pass 常量
    pub fn passes(&self) -> &[PassConstants] {
        &self.passes
    }
}

/// 演示类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemoKind {
    /// 几何体，无材质
    Shapes,
    /// 几何体 + 材质 + 平行光
    Light,
    /// 地形、水面和铁丝网箱子，带雾
    Blend,
    /// Blend 加上公告板树
    Trees,
    /// 镜面反射与平面阴影
    Stencil,
}

impl DemoKind {
    pub const ALL: [DemoKind; 5] = [
        DemoKind::Shapes,
        DemoKind::Light,
        DemoKind::Blend,
        DemoKind::Trees,
        DemoKind::Stencil,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DemoKind::Shapes => "shapes",
            DemoKind::Light => "light",
            DemoKind::Blend => "blend",
            DemoKind::Trees => "trees",
            DemoKind::Stencil => "stencil",
        }
    }

    pub fn from_name(name: &str) -> Option<DemoKind> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    /// 组装演示的阶段列表
    pub fn stages(&self) -> Vec<Box<dyn Stage>> {
        match self {
            DemoKind::Shapes => demos::shapes(),
            DemoKind::Light => demos::light(),
            DemoKind::Blend => demos::blend(),
            DemoKind::Trees => demos::trees(),
            DemoKind::Stencil => demos::stencil(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::resource::{FrameResourceLayout, HostStorage, UploadAllocator, UploadStorage};

    struct HostAllocator;

    impl UploadAllocator for HostAllocator {
        fn allocate_upload(&mut self, byte_size: u64) -> Result<Box<dyn UploadStorage>> {
            Ok(Box::new(HostStorage::new(byte_size, 0x2000_0000)))
        }
    }

    /// 记录钩子调用顺序的阶段
    struct HookRecorder {
        tag: &'static str,
        log: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
    }

    impl Stage for HookRecorder {
        fn name(&self) -> &'static str {
            self.tag
        }

        fn build_geometry(&mut self, _scene: &mut Scene) -> Result<()> {
            self.log.borrow_mut().push(format!("{}:geometry", self.tag));
            Ok(())
        }

        fn build_pipelines(&mut self, _pipelines: &mut PipelineTable) -> Result<()> {
            self.log.borrow_mut().push(format!("{}:pipelines", self.tag));
            Ok(())
        }

        fn update_pass_constants(&mut self, frame: &FrameContext, passes: &mut Vec<PassConstants>) -> Result<()> {
            passes[0].total_time = frame.total_time;
            self.log.borrow_mut().push(format!("{}:pass", self.tag));
            Ok(())
        }
    }

    fn frame() -> FrameContext {
        FrameContext {
            total_time: 2.5,
            delta_time: 0.016,
            width: 800,
            height: 600,
            frame_index: 0,
        }
    }

    #[test]
    fn test_hooks_run_in_stage_order() {
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(HookRecorder { tag: "a", log: log.clone() }),
            Box::new(HookRecorder { tag: "b", log: log.clone() }),
        ];
        let mut pipeline = StagePipeline::new(stages);

        let mut scene = Scene::new(3);
        let mut pipelines = PipelineTable::new();
        pipeline.build(&mut scene, &mut pipelines).unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["a:geometry", "b:geometry", "a:pipelines", "b:pipelines"]
        );

        let layout = FrameResourceLayout { pass_count: 1, object_count: 1, material_count: 1, dynamic_vertex_count: 0 };
        let mut constants = FrameConstants::new(&mut HostAllocator, layout).unwrap();
        pipeline.update(&frame(), &mut scene, &mut constants).unwrap();
        assert_eq!(constants.pass.read(0).unwrap().total_time, 2.5);
        assert_eq!(pipeline.passes().len(), 1);
    }

    #[test]
    fn test_pipeline_table() {
        let mut table = PipelineTable::new();
        assert_eq!(table.initial(), None);

        let translucent = table.register(RenderLayer::Translucent, "transparent");
        let opaque = table.register(RenderLayer::Opaque, "opaque");
        assert_eq!(table.initial(), Some(opaque));
        assert_eq!(table.get(RenderLayer::Translucent), Some(translucent));
        assert_eq!(table.name(opaque), Some("opaque"));
        assert_eq!(table.get(RenderLayer::Shadow), None);
    }

    #[test]
    fn test_demo_kind_names() {
        for kind in DemoKind::ALL {
            assert_eq!(DemoKind::from_name(kind.name()), Some(kind));
            assert!(!kind.stages().is_empty());
        }
        assert_eq!(DemoKind::from_name("Stencil"), Some(DemoKind::Stencil));
        assert_eq!(DemoKind::from_name("blur"), None);
    }
}
