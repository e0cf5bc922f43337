//! 演示内容
//!
//! 具体的阶段实现，以及每个演示的阶段组合。
//! 静态几何体只记录子网格的索引区间；水面顶点每帧重新计算，写入当前帧资源。

use std::f32::consts::PI;

use crate::core::error::{DxLearnError, Result};
use crate::core::math::{self, Matrix4, Point3, Vector3};
use super::command::{Command, CommandList, PrimitiveTopology};
use super::resource::{FrameConstants, UploadBuffer};
use super::scene::{Light, MaterialDesc, PassConstants, RenderItemDesc, RenderLayer, Scene, SubmeshRange, Vertex};
use super::stage::{FrameContext, PipelineTable, Stage};

/// 三盏主光源（方向、强度）
pub const KEY_LIGHTS: [([f32; 3], [f32; 3]); 3] = [
    ([0.57735, -0.57735, 0.57735], [0.6, 0.6, 0.6]),
    ([-0.57735, -0.57735, 0.57735], [0.3, 0.3, 0.3]),
    ([0.0, -0.707, -0.707], [0.15, 0.15, 0.15]),
];

const AMBIENT_LIGHT: [f32; 4] = [0.25, 0.25, 0.35, 1.0];

/// 骷髅模型的顶点与三角形数量
const SKULL_VERTICES: u32 = 31076;
const SKULL_TRIANGLES: u32 = 60339;

/// 网格的顶点数和索引数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshCounts {
    pub vertices: u32,
    pub indices: u32,
}

impl MeshCounts {
    /// 细分 `subdivisions` 次的立方体（最多 6 次）
    ///
    /// 每次细分把一个三角形拆成四个，新网格不共享顶点。
    pub fn cube(subdivisions: u32) -> Self {
        let subdivisions = subdivisions.min(6);
        if subdivisions == 0 {
            return Self { vertices: 24, indices: 36 };
        }
        let triangles_before_last = 12 * 4u32.pow(subdivisions - 1);
        Self {
            vertices: triangles_before_last * 6,
            indices: triangles_before_last * 12,
        }
    }

    /// m × n 个顶点的网格
    pub fn grid(rows: u32, columns: u32) -> Self {
        Self {
            vertices: rows * columns,
            indices: (rows - 1) * (columns - 1) * 6,
        }
    }

    pub fn sphere(slices: u32, stacks: u32) -> Self {
        Self {
            vertices: (stacks - 1) * (slices + 1) + 2,
            indices: slices * 6 + (stacks - 2) * slices * 6,
        }
    }

    /// 带顶盖和底盖的圆柱
    pub fn cylinder(slices: u32, stacks: u32) -> Self {
        Self {
            vertices: (stacks + 1) * (slices + 1) + 2 * (slices + 2),
            indices: stacks * slices * 6 + slices * 6,
        }
    }
}

/// 把多个网格拼接到同一对顶点/索引缓冲中
#[derive(Debug, Default)]
struct GeometryBuilder {
    submeshes: Vec<(String, SubmeshRange)>,
    vertices: u32,
    indices: u32,
}

impl GeometryBuilder {
    fn push(mut self, name: &str, counts: MeshCounts) -> Self {
        self.submeshes.push((
            name.to_string(),
            SubmeshRange {
                index_count: counts.indices,
                start_index: self.indices,
                base_vertex: self.vertices as i32,
            },
        ));
        self.vertices += counts.vertices;
        self.indices += counts.indices;
        self
    }

    fn build(self, scene: &mut Scene, name: &str) {
        scene.add_geometry(name, self.submeshes);
    }
}

fn material(albedo: [f32; 4], fresnel: f32, roughness: f32) -> MaterialDesc {
    MaterialDesc {
        diffuse_albedo: albedo,
        fresnel_r0: [fresnel; 3],
        roughness,
    }
}

fn item(scene: &Scene, name: &str, geometry: &str, submesh: &str) -> Result<RenderItemDesc> {
    let (geo, range) = scene.submesh(geometry, submesh)?;
    Ok(RenderItemDesc::new(name, geo, range))
}

/// 盒子、网格、球体、圆柱组成的场景
///
/// 带材质时额外加入骷髅，对应光照演示。
pub struct ShapesContent {
    lit: bool,
}

impl ShapesContent {
    pub fn plain() -> Self {
        Self { lit: false }
    }

    pub fn lit() -> Self {
        Self { lit: true }
    }

    fn with_material(&self, scene: &Scene, desc: RenderItemDesc, material: &str) -> Result<RenderItemDesc> {
        if self.lit {
            Ok(desc.with_material(scene.material_index(material)?))
        } else {
            Ok(desc)
        }
    }
}

impl Stage for ShapesContent {
    fn name(&self) -> &'static str {
        "shapes"
    }

    fn build_geometry(&mut self, scene: &mut Scene) -> Result<()> {
        GeometryBuilder::default()
            .push("box", MeshCounts::cube(3))
            .push("grid", MeshCounts::grid(60, 40))
            .push("sphere", MeshCounts::sphere(20, 20))
            .push("cylinder", MeshCounts::cylinder(20, 20))
            .build(scene, "shapeGeo");

        if self.lit {
            GeometryBuilder::default()
                .push("skull", MeshCounts { vertices: SKULL_VERTICES, indices: SKULL_TRIANGLES * 3 })
                .build(scene, "skullGeo");
        }
        Ok(())
    }

    fn build_materials(&mut self, scene: &mut Scene) -> Result<()> {
        if self.lit {
            scene.add_material("bricks0", material([1.0; 4], 0.02, 0.1));
            scene.add_material("stone0", material([1.0; 4], 0.05, 0.3));
            scene.add_material("tile0", material([1.0; 4], 0.02, 0.3));
            scene.add_material("skullMat", material([1.0; 4], 0.05, 0.3));
        }
        Ok(())
    }

    fn build_render_items(&mut self, scene: &mut Scene) -> Result<()> {
        let desc = item(scene, "box", "shapeGeo", "box")?
            .with_world(math::translation(0.0, 0.5, 0.0) * math::scaling(2.0, 2.0, 2.0));
        let desc = self.with_material(scene, desc, "stone0")?;
        scene.add_render_item(desc)?;

        let desc = item(scene, "grid", "shapeGeo", "grid")?.with_tex_transform(math::scaling(8.0, 8.0, 1.0));
        let desc = self.with_material(scene, desc, "tile0")?;
        scene.add_render_item(desc)?;

        if self.lit {
            let desc = item(scene, "skull", "skullGeo", "skull")?
                .with_world(math::translation(0.0, 1.0, 0.0) * math::scaling(0.5, 0.5, 0.5));
            let desc = self.with_material(scene, desc, "skullMat")?;
            scene.add_render_item(desc)?;
        }

        for i in 0..5 {
            let z = -10.0 + i as f32 * 5.0;
            let columns = [
                (format!("leftCylinder{}", i), "cylinder", -5.0, 1.5, "bricks0"),
                (format!("rightCylinder{}", i), "cylinder", 5.0, 1.5, "bricks0"),
                (format!("leftSphere{}", i), "sphere", -5.0, 3.5, "stone0"),
                (format!("rightSphere{}", i), "sphere", 5.0, 3.5, "stone0"),
            ];
            for (name, submesh, x, y, mat) in columns {
                let desc = item(scene, &name, "shapeGeo", submesh)?.with_world(math::translation(x, y, z));
                let desc = self.with_material(scene, desc, mat)?;
                scene.add_render_item(desc)?;
            }
        }
        Ok(())
    }
}

/// 丘陵地形、水面和铁丝网箱子
///
/// 水面顶点随时间变化，每帧整体写入当前槽位的动态顶点缓冲区。
pub struct WavesContent {
    rows: usize,
    columns: usize,
    spacing: f32,
    first_vertex: usize,
}

impl Default for WavesContent {
    fn default() -> Self {
        Self {
            rows: 128,
            columns: 128,
            spacing: 1.0,
            first_vertex: 0,
        }
    }
}

impl WavesContent {
    const AMPLITUDE: f32 = 0.4;
    const WAVE_NUMBER: [f32; 2] = [0.2, 0.15];
    const ANGULAR_SPEED: f32 = 1.5;

    pub fn vertex_count(&self) -> usize {
        self.rows * self.columns
    }

    fn width(&self) -> f32 {
        (self.columns - 1) as f32 * self.spacing
    }

    fn depth(&self) -> f32 {
        (self.rows - 1) as f32 * self.spacing
    }

    /// 第 `row` 行第 `column` 列的水面顶点在时刻 `t` 的状态
    pub fn vertex(&self, row: usize, column: usize, t: f32) -> Vertex {
        let (width, depth) = (self.width(), self.depth());
        let x = -0.5 * width + column as f32 * self.spacing;
        let z = 0.5 * depth - row as f32 * self.spacing;

        let [kx, kz] = Self::WAVE_NUMBER;
        let phase_x = kx * x + Self::ANGULAR_SPEED * t;
        let phase_z = kz * z + 0.5 * Self::ANGULAR_SPEED * t;
        let y = Self::AMPLITUDE * phase_x.sin() * phase_z.cos();

        // 法线取自高度场的偏导数
        let dy_dx = Self::AMPLITUDE * kx * phase_x.cos() * phase_z.cos();
        let dy_dz = -Self::AMPLITUDE * kz * phase_x.sin() * phase_z.sin();
        let normal = Vector3::new(-dy_dx, 1.0, -dy_dz).normalize();

        // [-w/2, w/2] 映射到 [0, 1]
        Vertex {
            pos: [x, y, z],
            normal: [normal.x, normal.y, normal.z],
            tex_c: [0.5 + x / width, 0.5 - z / depth],
        }
    }
}

impl Stage for WavesContent {
    fn name(&self) -> &'static str {
        "waves"
    }

    fn build_geometry(&mut self, scene: &mut Scene) -> Result<()> {
        let water = MeshCounts::grid(self.rows as u32, self.columns as u32);
        GeometryBuilder::default().push("grid", MeshCounts::grid(50, 50)).build(scene, "landGeo");
        GeometryBuilder::default().push("grid", water).build(scene, "waterGeo");
        GeometryBuilder::default().push("box", MeshCounts::cube(3)).build(scene, "boxGeo");
        self.first_vertex = scene.reserve_dynamic_vertices(self.vertex_count());
        Ok(())
    }

    fn build_materials(&mut self, scene: &mut Scene) -> Result<()> {
        scene.add_material("grass", material([1.0; 4], 0.01, 0.125));
        scene.add_material("water", material([1.0, 1.0, 1.0, 0.5], 0.1, 0.0));
        scene.add_material("wirefence", material([1.0; 4], 0.1, 0.25));
        Ok(())
    }

    fn build_render_items(&mut self, scene: &mut Scene) -> Result<()> {
        let water = item(scene, "water", "waterGeo", "grid")?
            .with_tex_transform(math::scaling(5.0, 5.0, 1.0))
            .with_material(scene.material_index("water")?)
            .with_layer(RenderLayer::Translucent)
            .with_dynamic_vertices(self.first_vertex);
        scene.add_render_item(water)?;

        let land = item(scene, "land", "landGeo", "grid")?
            .with_tex_transform(math::scaling(5.0, 5.0, 1.0))
            .with_material(scene.material_index("grass")?);
        scene.add_render_item(land)?;

        let fence = item(scene, "wireBox", "boxGeo", "box")?
            .with_world(math::translation(3.0, 2.0, -9.0))
            .with_material(scene.material_index("wirefence")?)
            .with_layer(RenderLayer::AlphaTested);
        scene.add_render_item(fence)?;
        Ok(())
    }

    fn update_dynamic_vertices(&mut self, frame: &FrameContext, vertices: &mut UploadBuffer<Vertex>) -> Result<()> {
        for row in 0..self.rows {
            for column in 0..self.columns {
                let vertex = self.vertex(row, column, frame.total_time);
                vertices.copy_data(self.first_vertex + row * self.columns + column, &vertex)?;
            }
        }
        Ok(())
    }
}

/// 公告板树：16 个点图元，由几何着色器展开
pub struct TreeSprites;

impl TreeSprites {
    pub const COUNT: u32 = 16;
}

impl Stage for TreeSprites {
    fn name(&self) -> &'static str {
        "tree-sprites"
    }

    fn build_geometry(&mut self, scene: &mut Scene) -> Result<()> {
        let points = MeshCounts { vertices: Self::COUNT, indices: Self::COUNT };
        GeometryBuilder::default().push("points", points).build(scene, "treeSpritesGeo");
        Ok(())
    }

    fn build_materials(&mut self, scene: &mut Scene) -> Result<()> {
        scene.add_material("treeSprites", material([1.0; 4], 0.01, 0.125));
        Ok(())
    }

    fn build_render_items(&mut self, scene: &mut Scene) -> Result<()> {
        let trees = item(scene, "trees", "treeSpritesGeo", "points")?
            .with_material(scene.material_index("treeSprites")?)
            .with_layer(RenderLayer::AlphaTestedTreeSprites)
            .with_topology(PrimitiveTopology::PointList);
        scene.add_render_item(trees)?;
        Ok(())
    }
}

/// 滚动水面材质的纹理坐标
pub struct WaterAnimation {
    material: &'static str,
    speed: [f32; 2],
}

impl Default for WaterAnimation {
    fn default() -> Self {
        Self {
            material: "water",
            speed: [0.1, 0.02],
        }
    }
}

impl Stage for WaterAnimation {
    fn name(&self) -> &'static str {
        "water-animation"
    }

    fn animate(&mut self, frame: &FrameContext, scene: &mut Scene) -> Result<()> {
        let water = scene.material_by_name_mut(self.material)?;
        let mut transform = *water.transform();

        // 平移分量位于最后一列
        for (row, speed) in self.speed.iter().enumerate() {
            let mut offset = transform[(row, 3)] + speed * frame.delta_time;
            if offset >= 1.0 {
                offset -= 1.0;
            }
            transform[(row, 3)] = offset;
        }

        water.set_transform(transform);
        Ok(())
    }
}

/// 房间、镜子和骷髅
///
/// 骷髅在镜前来回移动，镜像和阴影的世界矩阵随之更新。
pub struct MirrorRoom {
    base: Vector3,
    applied: Option<Vector3>,
}

impl Default for MirrorRoom {
    fn default() -> Self {
        Self {
            base: Vector3::new(0.0, 1.0, -5.0),
            applied: None,
        }
    }
}

impl MirrorRoom {
    pub const SKULL: &'static str = "skull";
    pub const REFLECTED_SKULL: &'static str = "reflectedSkull";
    pub const SHADOWED_SKULL: &'static str = "shadowedSkull";

    fn skull_translation(&self, total_time: f32) -> Vector3 {
        let mut translation = self.base;
        translation.x += 1.5 * (0.5 * total_time).sin();
        translation.y = translation.y.max(0.0);
        translation
    }

    fn set_world(scene: &mut Scene, name: &str, world: Matrix4) -> Result<()> {
        scene
            .item_by_name_mut(name)
            .ok_or_else(|| DxLearnError::Runtime(format!("Unknown render item {}", name)))?
            .set_world(world);
        Ok(())
    }
}

impl Stage for MirrorRoom {
    fn name(&self) -> &'static str {
        "mirror-room"
    }

    fn build_geometry(&mut self, scene: &mut Scene) -> Result<()> {
        // 地板 2 个三角形，三面墙 6 个，镜子 2 个，共用 20 个顶点
        scene.add_geometry(
            "roomGeo",
            [
                ("floor", SubmeshRange { index_count: 6, start_index: 0, base_vertex: 0 }),
                ("wall", SubmeshRange { index_count: 18, start_index: 6, base_vertex: 0 }),
                ("mirror", SubmeshRange { index_count: 6, start_index: 24, base_vertex: 0 }),
            ],
        );
        GeometryBuilder::default()
            .push("skull", MeshCounts { vertices: SKULL_VERTICES, indices: SKULL_TRIANGLES * 3 })
            .build(scene, "skullGeo");
        Ok(())
    }

    fn build_materials(&mut self, scene: &mut Scene) -> Result<()> {
        scene.add_material("bricks", material([1.0; 4], 0.05, 0.25));
        scene.add_material("checkertile", material([1.0; 4], 0.07, 0.3));
        scene.add_material("icemirror", material([1.0, 1.0, 1.0, 0.3], 0.1, 0.5));
        scene.add_material("skullMat", material([1.0; 4], 0.05, 0.3));
        scene.add_material("shadowMat", material([0.0, 0.0, 0.0, 0.5], 0.001, 0.0));
        Ok(())
    }

    fn build_render_items(&mut self, scene: &mut Scene) -> Result<()> {
        let floor = item(scene, "floor", "roomGeo", "floor")?.with_material(scene.material_index("checkertile")?);
        scene.add_render_item(floor)?;

        let walls = item(scene, "walls", "roomGeo", "wall")?.with_material(scene.material_index("bricks")?);
        scene.add_render_item(walls)?;

        let skull = item(scene, Self::SKULL, "skullGeo", "skull")?.with_material(scene.material_index("skullMat")?);
        scene.add_render_item(skull.clone())?;

        let mut reflected = skull.clone().with_layer(RenderLayer::Reflected);
        reflected.name = Self::REFLECTED_SKULL.to_string();
        scene.add_render_item(reflected)?;

        let mut shadowed = skull
            .with_material(scene.material_index("shadowMat")?)
            .with_layer(RenderLayer::Shadow);
        shadowed.name = Self::SHADOWED_SKULL.to_string();
        scene.add_render_item(shadowed)?;

        let mirror = item(scene, "mirror", "roomGeo", "mirror")?
            .with_material(scene.material_index("icemirror")?)
            .with_layer(RenderLayer::Mirrors);
        let mirror = scene.add_render_item(mirror)?;
        scene.add_to_layer(mirror, RenderLayer::Translucent)?;
        Ok(())
    }

    fn animate(&mut self, frame: &FrameContext, scene: &mut Scene) -> Result<()> {
        let translation = self.skull_translation(frame.total_time);
        if self.applied == Some(translation) {
            return Ok(());
        }

        let skull_world = math::translation(translation.x, translation.y, translation.z)
            * math::scaling(0.45, 0.45, 0.45)
            * math::rotation_y(0.5 * PI);

        // 镜面为 xy 平面
        let mirror = math::reflection(&Vector3::z(), 0.0);

        // 阴影压到 xz 平面，略微抬高避免深度冲突
        let to_main_light = -Vector3::from(KEY_LIGHTS[0].0);
        let shadow = math::translation(0.0, 0.001, 0.0) * math::planar_shadow(&Vector3::y(), 0.0, &to_main_light);

        Self::set_world(scene, Self::SKULL, skull_world)?;
        Self::set_world(scene, Self::REFLECTED_SKULL, mirror * skull_world)?;
        Self::set_world(scene, Self::SHADOWED_SKULL, shadow * skull_world)?;
        self.applied = Some(translation);
        Ok(())
    }
}

/// 为每个渲染层注册管线状态
pub struct StandardPipelines {
    layers: Vec<RenderLayer>,
}

impl StandardPipelines {
    pub fn new(layers: &[RenderLayer]) -> Self {
        Self { layers: layers.to_vec() }
    }
}

impl Stage for StandardPipelines {
    fn name(&self) -> &'static str {
        "pipelines"
    }

    fn build_pipelines(&mut self, pipelines: &mut PipelineTable) -> Result<()> {
        for layer in &self.layers {
            pipelines.register(*layer, layer.name());
        }
        Ok(())
    }
}

/// 把脏的渲染项写入物体常量
pub struct ObjectConstantsStage;

impl Stage for ObjectConstantsStage {
    fn name(&self) -> &'static str {
        "object-constants"
    }

    fn update_object_constants(&mut self, scene: &mut Scene, constants: &mut FrameConstants) -> Result<()> {
        scene.update_object_constants(&mut constants.objects)?;
        Ok(())
    }
}

/// 把脏的材质写入材质常量
pub struct MaterialConstantsStage;

impl Stage for MaterialConstantsStage {
    fn name(&self) -> &'static str {
        "material-constants"
    }

    fn update_material_constants(&mut self, scene: &mut Scene, constants: &mut FrameConstants) -> Result<()> {
        scene.update_material_constants(&mut constants.materials)?;
        Ok(())
    }
}

/// 主 Pass：相机、投影和时间
///
/// 相机位于以原点为中心的球面上，`theta` 为方位角，`phi` 为极角。
pub struct MainPass {
    eye: Point3,
    target: Point3,
}

impl MainPass {
    pub const NEAR_Z: f32 = 1.0;
    pub const FAR_Z: f32 = 1000.0;

    pub fn orbit(radius: f32, theta: f32, phi: f32) -> Self {
        Self {
            eye: Point3::new(
                radius * phi.sin() * theta.cos(),
                radius * phi.cos(),
                radius * phi.sin() * theta.sin(),
            ),
            target: Point3::origin(),
        }
    }

    pub fn eye(&self) -> Point3 {
        self.eye
    }
}

impl Stage for MainPass {
    fn name(&self) -> &'static str {
        "main-pass"
    }

    fn update_pass_constants(&mut self, frame: &FrameContext, passes: &mut Vec<PassConstants>) -> Result<()> {
        let view = math::look_at_lh(&self.eye, &self.target, &Vector3::y());
        let proj = math::perspective_fov_lh(0.25 * PI, frame.aspect_ratio(), Self::NEAR_Z, Self::FAR_Z);
        let view_proj = proj * view;
        let invert = |m: &Matrix4| m.try_inverse().unwrap_or_else(math::identity);

        let width = frame.width.max(1) as f32;
        let height = frame.height.max(1) as f32;

        let pass = &mut passes[0];
        pass.view = math::to_shader_matrix(&view);
        pass.inv_view = math::to_shader_matrix(&invert(&view));
        pass.proj = math::to_shader_matrix(&proj);
        pass.inv_proj = math::to_shader_matrix(&invert(&proj));
        pass.view_proj = math::to_shader_matrix(&view_proj);
        pass.inv_view_proj = math::to_shader_matrix(&invert(&view_proj));
        pass.eye_pos_w = [self.eye.x, self.eye.y, self.eye.z];
        pass.render_target_size = [width, height];
        pass.inv_render_target_size = [1.0 / width, 1.0 / height];
        pass.near_z = Self::NEAR_Z;
        pass.far_z = Self::FAR_Z;
        pass.total_time = frame.total_time;
        pass.delta_time = frame.delta_time;
        Ok(())
    }
}

/// 环境光与三盏平行光
pub struct Lighting;

impl Stage for Lighting {
    fn name(&self) -> &'static str {
        "lighting"
    }

    fn update_pass_constants(&mut self, _frame: &FrameContext, passes: &mut Vec<PassConstants>) -> Result<()> {
        let pass = &mut passes[0];
        pass.ambient_light = AMBIENT_LIGHT;
        for (slot, (direction, strength)) in pass.lights.iter_mut().zip(KEY_LIGHTS) {
            *slot = Light::directional(direction, strength);
        }
        Ok(())
    }
}

/// 线性雾，清屏颜色与雾颜色一致
pub struct Fog {
    pub color: [f32; 4],
    pub start: f32,
    pub range: f32,
}

impl Default for Fog {
    fn default() -> Self {
        Self {
            color: [0.7, 0.7, 0.7, 1.0],
            start: 5.0,
            range: 150.0,
        }
    }
}

impl Stage for Fog {
    fn name(&self) -> &'static str {
        "fog"
    }

    fn update_pass_constants(&mut self, _frame: &FrameContext, passes: &mut Vec<PassConstants>) -> Result<()> {
        let pass = &mut passes[0];
        pass.fog_color = self.color;
        pass.fog_start = self.start;
        pass.fog_range = self.range;
        Ok(())
    }

    fn clear_color(&self) -> Option<[f32; 4]> {
        Some(self.color)
    }
}

/// 镜像 Pass：主 Pass 的光照方向关于镜面反射
pub struct ReflectedPass;

impl Stage for ReflectedPass {
    fn name(&self) -> &'static str {
        "reflected-pass"
    }

    fn extra_passes(&self) -> usize {
        1
    }

    fn update_pass_constants(&mut self, _frame: &FrameContext, passes: &mut Vec<PassConstants>) -> Result<()> {
        let mirror = math::reflection(&Vector3::z(), 0.0);
        let mut reflected = passes[0];
        for light in reflected.lights.iter_mut().take(KEY_LIGHTS.len()) {
            let direction = mirror.transform_vector(&Vector3::from(light.direction));
            light.direction = [direction.x, direction.y, direction.z];
        }
        passes.push(reflected);
        Ok(())
    }
}

/// 按渲染层分组录制绘制调用
pub struct LayerDraw {
    layers: Vec<RenderLayer>,
    pass_overrides: Vec<(RenderLayer, usize)>,
}

impl LayerDraw {
    pub fn new(layers: &[RenderLayer]) -> Self {
        Self {
            layers: layers.to_vec(),
            pass_overrides: Vec::new(),
        }
    }

    /// 绘制某一层时改用另一份 Pass 常量
    pub fn with_pass(mut self, layer: RenderLayer, pass: usize) -> Self {
        self.pass_overrides.push((layer, pass));
        self
    }

    fn pass_for(&self, layer: RenderLayer) -> Option<usize> {
        self.pass_overrides
            .iter()
            .find(|(l, _)| *l == layer)
            .map(|(_, pass)| *pass)
    }
}

impl Stage for LayerDraw {
    fn name(&self) -> &'static str {
        "layer-draw"
    }

    fn draw(
        &mut self,
        scene: &Scene,
        pipelines: &PipelineTable,
        constants: &FrameConstants,
        list: &mut CommandList,
    ) -> Result<()> {
        for layer in RenderLayer::DRAW_ORDER.iter().filter(|l| self.layers.contains(*l)) {
            let pipeline = pipelines.get(*layer).ok_or_else(|| {
                DxLearnError::Runtime(format!("No pipeline state registered for layer {}", layer.name()))
            })?;
            let draws = scene
                .layer(*layer)
                .map(|item| item.draw_call(scene, constants))
                .collect::<Result<Vec<_>>>()?;

            match self.pass_for(*layer) {
                Some(pass) => {
                    list.push(Command::BindPassConstants { address: constants.pass.element_address(pass)? })?;
                    list.draw_group(pipeline, layer.stencil_ref(), draws)?;
                    list.push(Command::BindPassConstants { address: constants.pass.element_address(0)? })?;
                }
                None => list.draw_group(pipeline, layer.stencil_ref(), draws)?,
            }
        }
        Ok(())
    }
}

/// 几何体演示
pub fn shapes() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(ShapesContent::plain()),
        Box::new(StandardPipelines::new(&[RenderLayer::Opaque])),
        Box::new(ObjectConstantsStage),
        Box::new(MainPass::orbit(15.0, 1.5 * PI, 0.25 * PI)),
        Box::new(LayerDraw::new(&[RenderLayer::Opaque])),
    ]
}

/// 光照演示
pub fn light() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(ShapesContent::lit()),
        Box::new(StandardPipelines::new(&[RenderLayer::Opaque])),
        Box::new(ObjectConstantsStage),
        Box::new(MaterialConstantsStage),
        Box::new(MainPass::orbit(15.0, 1.5 * PI, 0.25 * PI)),
        Box::new(Lighting),
        Box::new(LayerDraw::new(&[RenderLayer::Opaque])),
    ]
}

const BLEND_LAYERS: [RenderLayer; 3] = [RenderLayer::Opaque, RenderLayer::AlphaTested, RenderLayer::Translucent];

/// 混合演示
pub fn blend() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(WavesContent::default()),
        Box::new(WaterAnimation::default()),
        Box::new(StandardPipelines::new(&BLEND_LAYERS)),
        Box::new(ObjectConstantsStage),
        Box::new(MaterialConstantsStage),
        Box::new(MainPass::orbit(50.0, 1.5 * PI, 0.5 * PI - 0.1)),
        Box::new(Lighting),
        Box::new(Fog::default()),
        Box::new(LayerDraw::new(&BLEND_LAYERS)),
    ]
}

/// 公告板树演示
pub fn trees() -> Vec<Box<dyn Stage>> {
    let layers = [
        RenderLayer::Opaque,
        RenderLayer::AlphaTested,
        RenderLayer::AlphaTestedTreeSprites,
        RenderLayer::Translucent,
    ];
    vec![
        Box::new(WavesContent::default()),
        Box::new(TreeSprites),
        Box::new(WaterAnimation::default()),
        Box::new(StandardPipelines::new(&layers)),
        Box::new(ObjectConstantsStage),
        Box::new(MaterialConstantsStage),
        Box::new(MainPass::orbit(50.0, 1.5 * PI, 0.5 * PI - 0.1)),
        Box::new(Lighting),
        Box::new(Fog::default()),
        Box::new(LayerDraw::new(&layers)),
    ]
}

/// 模板演示：镜面反射与平面阴影
pub fn stencil() -> Vec<Box<dyn Stage>> {
    let layers = [
        RenderLayer::Opaque,
        RenderLayer::Mirrors,
        RenderLayer::Reflected,
        RenderLayer::Translucent,
        RenderLayer::Shadow,
    ];
    vec![
        Box::new(MirrorRoom::default()),
        Box::new(StandardPipelines::new(&layers)),
        Box::new(ObjectConstantsStage),
        Box::new(MaterialConstantsStage),
        Box::new(MainPass::orbit(12.0, 1.24 * PI, 0.42 * PI)),
        Box::new(Lighting),
        Box::new(ReflectedPass),
        Box::new(LayerDraw::new(&layers).with_pass(RenderLayer::Reflected, 1)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::command::{CommandAllocator, PipelineId};
    use crate::renderer::resource::{FrameResourceLayout, HostStorage, UploadAllocator, UploadStorage};
    use crate::renderer::stage::{DemoKind, StagePipeline};

    struct HostAllocator;

    impl UploadAllocator for HostAllocator {
        fn allocate_upload(&mut self, byte_size: u64) -> Result<Box<dyn UploadStorage>> {
            Ok(Box::new(HostStorage::new(byte_size, 0x4000_0000)))
        }
    }

    struct NullAllocator;

    impl CommandAllocator for NullAllocator {
        fn reset(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn frame(total_time: f32, delta_time: f32) -> FrameContext {
        FrameContext {
            total_time,
            delta_time,
            width: 800,
            height: 600,
            frame_index: 0,
        }
    }

    fn build(kind: DemoKind) -> (StagePipeline, Scene, PipelineTable, FrameConstants) {
        let mut pipeline = StagePipeline::new(kind.stages());
        let mut scene = Scene::new(3);
        let mut pipelines = PipelineTable::new();
        pipeline.build(&mut scene, &mut pipelines).unwrap();
        let layout = FrameResourceLayout {
            pass_count: pipeline.pass_count(),
            object_count: scene.items().len(),
            material_count: scene.materials().len(),
            dynamic_vertex_count: scene.dynamic_vertex_count(),
        };
        let constants = FrameConstants::new(&mut HostAllocator, layout).unwrap();
        (pipeline, scene, pipelines, constants)
    }

    #[test]
    fn test_mesh_counts() {
        assert_eq!(MeshCounts::cube(0).indices, 36);
        assert_eq!(MeshCounts::cube(3), MeshCounts { vertices: 1152, indices: 2304 });
        assert_eq!(MeshCounts::grid(60, 40).indices, 13806);
        assert_eq!(MeshCounts::sphere(20, 20).indices, 2280);
        assert_eq!(MeshCounts::cylinder(20, 20).indices, 2520);
    }

    #[test]
    fn test_shapes_submeshes_are_concatenated() {
        let (_, scene, _, _) = build(DemoKind::Shapes);
        let (_, grid) = scene.submesh("shapeGeo", "grid").unwrap();
        assert_eq!(grid.start_index, 2304);
        assert_eq!(grid.base_vertex, 1152);

        let (_, cylinder) = scene.submesh("shapeGeo", "cylinder").unwrap();
        assert_eq!(cylinder.start_index, 2304 + 13806 + 2280);
        assert_eq!(scene.items().len(), 22);
        assert!(scene.materials().is_empty());
    }

    #[test]
    fn test_light_demo_uses_materials() {
        let (_, scene, _, _) = build(DemoKind::Light);
        assert_eq!(scene.items().len(), 23);
        assert_eq!(scene.materials().len(), 4);
        assert!(scene.items().iter().all(|item| item.material().is_some()));
    }

    #[test]
    fn test_water_scrolls_and_wraps() {
        let (mut pipeline, mut scene, _, mut constants) = build(DemoKind::Blend);
        pipeline.update(&frame(0.0, 9.5), &mut scene, &mut constants).unwrap();

        let water = scene.material(scene.material_index("water").unwrap()).unwrap();
        assert!((water.transform()[(0, 3)] - 0.95).abs() < 1e-5);
        assert!((water.transform()[(1, 3)] - 0.19).abs() < 1e-5);

        pipeline.update(&frame(0.0, 1.0), &mut scene, &mut constants).unwrap();
        let water = scene.material(scene.material_index("water").unwrap()).unwrap();
        assert!((water.transform()[(0, 3)] - 0.05).abs() < 1e-5);
        assert_eq!(water.dirty().remaining(), 2);
    }

    #[test]
    fn test_waves_rewrite_every_vertex_and_bind_them() {
        let waves = WavesContent::default();
        let (mut pipeline, mut scene, pipelines, mut constants) = build(DemoKind::Blend);
        assert_eq!(scene.dynamic_vertex_count(), waves.vertex_count());

        pipeline.update(&frame(1.0, 0.016), &mut scene, &mut constants).unwrap();
        let vertices = constants.dynamic_vertices.as_ref().unwrap();
        assert_eq!(vertices.write_count(), waves.vertex_count() as u64);
        assert_eq!(vertices.read(0).unwrap(), waves.vertex(0, 0, 1.0));
        assert_eq!(vertices.read(129).unwrap(), waves.vertex(1, 1, 1.0));
        assert_ne!(waves.vertex(1, 1, 1.0), waves.vertex(1, 1, 2.0));

        let mut list = CommandList::begin(&mut NullAllocator, pipelines.initial()).unwrap();
        pipeline.draw(&scene, &pipelines, &constants, &mut list).unwrap();
        let bound: Vec<u64> = list
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Draw(d) => d.vertex_buffer,
                _ => None,
            })
            .collect();
        assert_eq!(bound, vec![vertices.element_address(0).unwrap()]);
    }

    #[test]
    fn test_wave_surface_is_centered() {
        let waves = WavesContent::default();
        let corner = waves.vertex(0, 0, 0.0);
        assert_eq!(corner.pos[0], -63.5);
        assert_eq!(corner.pos[2], 63.5);
        assert_eq!(corner.tex_c, [0.0, 0.0]);

        let normal = waves.vertex(40, 70, 3.0).normal;
        let length = normal.iter().map(|n| n * n).sum::<f32>().sqrt();
        assert!((length - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_blend_clears_to_fog_color() {
        let (pipeline, _, _, _) = build(DemoKind::Blend);
        assert_eq!(pipeline.clear_color([0.0; 4]), Fog::default().color);

        let (pipeline, _, _, _) = build(DemoKind::Shapes);
        assert_eq!(pipeline.clear_color([0.0; 4]), [0.0; 4]);
    }

    #[test]
    fn test_stencil_draw_groups() {
        let (mut pipeline, mut scene, pipelines, mut constants) = build(DemoKind::Stencil);
        assert_eq!(pipeline.pass_count(), 2);
        pipeline.update(&frame(1.0, 0.016), &mut scene, &mut constants).unwrap();

        let mut list = CommandList::begin(&mut NullAllocator, pipelines.initial()).unwrap();
        pipeline.draw(&scene, &pipelines, &constants, &mut list).unwrap();

        let groups: Vec<PipelineId> = list
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::SetPipeline(id) => Some(*id),
                _ => None,
            })
            .collect();
        let names: Vec<&str> = groups.iter().filter_map(|id| pipelines.name(*id)).collect();
        assert_eq!(
            names,
            vec!["opaque", "markStencilMirrors", "drawStencilReflections", "transparent", "shadow"]
        );
        // 地板、墙、骷髅、镜子(两次)、镜像骷髅、阴影骷髅
        assert_eq!(list.draw_count(), 7);

        let reflected_pass = constants.pass.element_address(1).unwrap();
        assert!(list.commands().contains(&Command::BindPassConstants { address: reflected_pass }));
    }

    #[test]
    fn test_reflected_pass_mirrors_lights() {
        let (mut pipeline, mut scene, _, mut constants) = build(DemoKind::Stencil);
        pipeline.update(&frame(0.0, 0.016), &mut scene, &mut constants).unwrap();

        let main = constants.pass.read(0).unwrap();
        let reflected = constants.pass.read(1).unwrap();
        assert_eq!(reflected.lights[0].direction[2], -main.lights[0].direction[2]);
        assert_eq!(reflected.lights[0].direction[0], main.lights[0].direction[0]);
        assert_eq!(reflected.view, main.view);
    }

    #[test]
    fn test_skull_motion_redirties_three_items() {
        let (mut pipeline, mut scene, _, mut constants) = build(DemoKind::Stencil);
        for _ in 0..3 {
            pipeline.update(&frame(0.0, 0.0), &mut scene, &mut constants).unwrap();
        }
        assert!(scene.items().iter().all(|item| !item.dirty().is_dirty()));

        pipeline.update(&frame(2.0, 0.016), &mut scene, &mut constants).unwrap();
        let dirty: Vec<&str> = scene
            .items()
            .iter()
            .filter(|item| item.dirty().is_dirty())
            .map(|item| item.name())
            .collect();
        assert_eq!(dirty, vec![MirrorRoom::SKULL, MirrorRoom::REFLECTED_SKULL, MirrorRoom::SHADOWED_SKULL]);
    }

    #[test]
    fn test_tree_sprites_are_points() {
        let (mut pipeline, mut scene, pipelines, mut constants) = build(DemoKind::Trees);
        pipeline.update(&frame(0.0, 0.016), &mut scene, &mut constants).unwrap();

        let mut list = CommandList::begin(&mut NullAllocator, pipelines.initial()).unwrap();
        pipeline.draw(&scene, &pipelines, &constants, &mut list).unwrap();
        let points = list
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::Draw(d) if d.topology == PrimitiveTopology::PointList))
            .count();
        assert_eq!(points, 1);
    }
}
