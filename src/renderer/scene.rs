//! 场景数据模块
//!
//! 渲染项、材质以及它们写入常量缓冲区时的布局。
//!
//! 场景拥有全部渲染项和材质；帧资源环只通过常量缓冲区索引引用它们。
//! 渲染项和材质各带一个 `DirtyCounter`，修改后会被写入每个槽位恰好一次。

use bytemuck::{Pod, Zeroable};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

use crate::core::error::{DxLearnError, Result};
use crate::core::math::{self, Matrix4};
use super::command::{DrawCall, GeometryId, PrimitiveTopology};
use super::dirty::DirtyCounter;
use super::resource::{FrameConstants, UploadBuffer};

/// Pass 常量中的光源数量上限
pub const MAX_LIGHTS: usize = 16;

/// 物体常量
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    pub world: [[f32; 4]; 4],
    pub tex_transform: [[f32; 4]; 4],
}

/// 材质常量
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub diffuse_albedo: [f32; 4],
    pub fresnel_r0: [f32; 3],
    pub roughness: f32,
    pub mat_transform: [[f32; 4]; 4],
}

/// 动态顶点：位置、法线、纹理坐标
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub tex_c: [f32; 2],
}

/// 光源
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Light {
    pub strength: [f32; 3],
    pub falloff_start: f32,
    pub direction: [f32; 3],
    pub falloff_end: f32,
    pub position: [f32; 3],
    pub spot_power: f32,
}

impl Light {
    /// 平行光
    pub fn directional(direction: [f32; 3], strength: [f32; 3]) -> Self {
        Self {
            strength,
            falloff_start: 1.0,
            direction,
            falloff_end: 10.0,
            position: [0.0; 3],
            spot_power: 64.0,
        }
    }
}

/// Pass 常量
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PassConstants {
    pub view: [[f32; 4]; 4],
    pub inv_view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub inv_proj: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub inv_view_proj: [[f32; 4]; 4],
    pub eye_pos_w: [f32; 3],
    pub pad0: f32,
    pub render_target_size: [f32; 2],
    pub inv_render_target_size: [f32; 2],
    pub near_z: f32,
    pub far_z: f32,
    pub total_time: f32,
    pub delta_time: f32,
    pub ambient_light: [f32; 4],
    pub fog_color: [f32; 4],
    pub fog_start: f32,
    pub fog_range: f32,
    pub pad1: [f32; 2],
    pub lights: [Light; MAX_LIGHTS],
}

impl Default for PassConstants {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

/// 渲染层
///
/// 每层使用一个管线状态，按 `DRAW_ORDER` 顺序绘制。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenderLayer {
    Opaque,
    Mirrors,
    Reflected,
    AlphaTested,
    Translucent,
    Shadow,
    AlphaTestedTreeSprites,
}

impl RenderLayer {
    pub const DRAW_ORDER: [RenderLayer; 7] = [
        RenderLayer::Opaque,
        RenderLayer::Mirrors,
        RenderLayer::Reflected,
        RenderLayer::AlphaTested,
        RenderLayer::AlphaTestedTreeSprites,
        RenderLayer::Translucent,
        RenderLayer::Shadow,
    ];

    /// 绘制本层前需要设置的模板参考值
    pub fn stencil_ref(&self) -> Option<u32> {
        match self {
            RenderLayer::Mirrors | RenderLayer::Reflected => Some(1),
            RenderLayer::Translucent | RenderLayer::Shadow => Some(0),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RenderLayer::Opaque => "opaque",
            RenderLayer::Mirrors => "markStencilMirrors",
            RenderLayer::Reflected => "drawStencilReflections",
            RenderLayer::AlphaTested => "alphaTested",
            RenderLayer::Translucent => "transparent",
            RenderLayer::Shadow => "shadow",
            RenderLayer::AlphaTestedTreeSprites => "treeSprites",
        }
    }
}

/// 几何体中的一个子区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmeshRange {
    pub index_count: u32,
    pub start_index: u32,
    pub base_vertex: i32,
}

/// 几何体：共享顶点/索引缓冲的一组子网格
#[derive(Debug, Clone)]
pub struct Geometry {
    pub id: GeometryId,
    pub name: String,
    pub submeshes: HashMap<String, SubmeshRange>,
}

/// 材质参数
#[derive(Debug, Clone)]
pub struct MaterialDesc {
    pub diffuse_albedo: [f32; 4],
    pub fresnel_r0: [f32; 3],
    pub roughness: f32,
}

/// 材质
#[derive(Debug, Clone)]
pub struct Material {
    name: String,
    cb_index: usize,
    diffuse_albedo: [f32; 4],
    fresnel_r0: [f32; 3],
    roughness: f32,
    transform: Matrix4,
    dirty: DirtyCounter,
}

impl Material {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 在材质常量缓冲区中的索引
    pub fn cb_index(&self) -> usize {
        self.cb_index
    }

    pub fn transform(&self) -> &Matrix4 {
        &self.transform
    }

    pub fn diffuse_albedo(&self) -> [f32; 4] {
        self.diffuse_albedo
    }

    pub fn dirty(&self) -> &DirtyCounter {
        &self.dirty
    }

    pub fn set_transform(&mut self, transform: Matrix4) {
        self.transform = transform;
        self.dirty.mark();
    }

    pub fn set_diffuse_albedo(&mut self, albedo: [f32; 4]) {
        self.diffuse_albedo = albedo;
        self.dirty.mark();
    }

    pub fn to_constants(&self) -> MaterialConstants {
        MaterialConstants {
            diffuse_albedo: self.diffuse_albedo,
            fresnel_r0: self.fresnel_r0,
            roughness: self.roughness,
            mat_transform: math::to_shader_matrix(&self.transform),
        }
    }
}

/// 渲染项描述
#[derive(Debug, Clone)]
pub struct RenderItemDesc {
    pub name: String,
    pub world: Matrix4,
    pub tex_transform: Matrix4,
    pub geometry: GeometryId,
    pub submesh: SubmeshRange,
    pub material: Option<usize>,
    pub topology: PrimitiveTopology,
    pub layer: RenderLayer,
    /// 使用帧资源中的动态顶点，值为第一个顶点的位置
    pub dynamic_vertices: Option<usize>,
}

impl RenderItemDesc {
    /// 单位变换、三角形列表、不透明层
    pub fn new(name: impl Into<String>, geometry: GeometryId, submesh: SubmeshRange) -> Self {
        Self {
            name: name.into(),
            world: math::identity(),
            tex_transform: math::identity(),
            geometry,
            submesh,
            material: None,
            topology: PrimitiveTopology::TriangleList,
            layer: RenderLayer::Opaque,
            dynamic_vertices: None,
        }
    }

    pub fn with_world(mut self, world: Matrix4) -> Self {
        self.world = world;
        self
    }

    pub fn with_tex_transform(mut self, tex_transform: Matrix4) -> Self {
        self.tex_transform = tex_transform;
        self
    }

    pub fn with_material(mut self, material: usize) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_layer(mut self, layer: RenderLayer) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_dynamic_vertices(mut self, first_vertex: usize) -> Self {
        self.dynamic_vertices = Some(first_vertex);
        self
    }
}

/// 渲染项：一次绘制调用的描述
#[derive(Debug, Clone)]
pub struct RenderItem {
    name: String,
    world: Matrix4,
    tex_transform: Matrix4,
    dirty: DirtyCounter,
    object_index: usize,
    material: Option<usize>,
    geometry: GeometryId,
    submesh: SubmeshRange,
    topology: PrimitiveTopology,
    layer: RenderLayer,
    dynamic_vertices: Option<usize>,
}

impl RenderItem {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn world(&self) -> &Matrix4 {
        &self.world
    }

    /// 在物体常量缓冲区中的索引
    pub fn object_index(&self) -> usize {
        self.object_index
    }

    pub fn material(&self) -> Option<usize> {
        self.material
    }

    pub fn layer(&self) -> RenderLayer {
        self.layer
    }

    /// 动态顶点的起始位置，静态几何体为 None
    pub fn dynamic_vertices(&self) -> Option<usize> {
        self.dynamic_vertices
    }

    pub fn dirty(&self) -> &DirtyCounter {
        &self.dirty
    }

    pub fn set_world(&mut self, world: Matrix4) {
        self.world = world;
        self.dirty.mark();
    }

    pub fn set_material(&mut self, material: Option<usize>) {
        self.material = material;
        self.dirty.mark();
    }

    pub fn to_constants(&self) -> ObjectConstants {
        ObjectConstants {
            world: math::to_shader_matrix(&self.world),
            tex_transform: math::to_shader_matrix(&self.tex_transform),
        }
    }

    /// 以当前帧资源的常量缓冲区地址生成绘制调用
    pub fn draw_call(&self, scene: &Scene, constants: &FrameConstants) -> Result<DrawCall> {
        let material_constants = match self.material {
            Some(index) => {
                let material = scene.material(index)?;
                Some(constants.materials.element_address(material.cb_index())?)
            }
            None => None,
        };

        // 动态顶点每帧写入当前槽位，必须绑定本槽位的那一份
        let vertex_buffer = match self.dynamic_vertices {
            Some(first) => {
                let vertices = constants.dynamic_vertices.as_ref().ok_or_else(|| {
                    DxLearnError::Runtime(format!("Render item {} needs dynamic vertices", self.name))
                })?;
                Some(vertices.element_address(first)?)
            }
            None => None,
        };

        Ok(DrawCall {
            geometry: self.geometry,
            topology: self.topology,
            index_count: self.submesh.index_count,
            start_index: self.submesh.start_index,
            base_vertex: self.submesh.base_vertex,
            object_constants: constants.objects.element_address(self.object_index)?,
            material_constants,
            vertex_buffer,
        })
    }
}

/// 场景
///
/// 拥有几何体、材质和渲染项，并按渲染层索引渲染项。
#[derive(Debug)]
pub struct Scene {
    frame_resource_count: usize,
    geometries: Vec<Geometry>,
    materials: Vec<Material>,
    material_lookup: HashMap<String, usize>,
    items: Vec<RenderItem>,
    layers: BTreeMap<RenderLayer, Vec<usize>>,
    dynamic_vertex_count: usize,
}

impl Scene {
    /// `frame_resource_count` 决定脏计数器的初始值
    pub fn new(frame_resource_count: usize) -> Self {
        Self {
            frame_resource_count,
            geometries: Vec::new(),
            materials: Vec::new(),
            material_lookup: HashMap::new(),
            items: Vec::new(),
            layers: BTreeMap::new(),
            dynamic_vertex_count: 0,
        }
    }

    pub fn frame_resource_count(&self) -> usize {
        self.frame_resource_count
    }

    /// 注册几何体
    pub fn add_geometry<I, S>(&mut self, name: impl Into<String>, submeshes: I) -> GeometryId
    where
        I: IntoIterator<Item = (S, SubmeshRange)>,
        S: Into<String>,
    {
        let id = GeometryId(self.geometries.len() as u32);
        self.geometries.push(Geometry {
            id,
            name: name.into(),
            submeshes: submeshes.into_iter().map(|(n, r)| (n.into(), r)).collect(),
        });
        id
    }

    /// 按名字查找子网格
    pub fn submesh(&self, geometry: &str, submesh: &str) -> Result<(GeometryId, SubmeshRange)> {
        self.geometries
            .iter()
            .find(|g| g.name == geometry)
            .and_then(|g| g.submeshes.get(submesh).map(|range| (g.id, *range)))
            .ok_or_else(|| DxLearnError::Runtime(format!("Unknown submesh {}/{}", geometry, submesh)))
    }

    pub fn geometries(&self) -> &[Geometry] {
        &self.geometries
    }

    /// 在每个帧资源的动态顶点缓冲区中预留 `count` 个顶点，返回起始位置
    pub fn reserve_dynamic_vertices(&mut self, count: usize) -> usize {
        let first = self.dynamic_vertex_count;
        self.dynamic_vertex_count += count;
        first
    }

    /// 每个帧资源需要的动态顶点数量
    pub fn dynamic_vertex_count(&self) -> usize {
        self.dynamic_vertex_count
    }

    /// 添加材质，返回其常量缓冲区索引
    pub fn add_material(&mut self, name: impl Into<String>, desc: MaterialDesc) -> usize {
        let name = name.into();
        let cb_index = self.materials.len();
        self.material_lookup.insert(name.clone(), cb_index);
        self.materials.push(Material {
            name,
            cb_index,
            diffuse_albedo: desc.diffuse_albedo,
            fresnel_r0: desc.fresnel_r0,
            roughness: desc.roughness,
            transform: math::identity(),
            dirty: DirtyCounter::new(self.frame_resource_count),
        });
        cb_index
    }

    pub fn material_index(&self, name: &str) -> Result<usize> {
        self.material_lookup
            .get(name)
            .copied()
            .ok_or_else(|| DxLearnError::Runtime(format!("Unknown material {}", name)))
    }

    pub fn material(&self, index: usize) -> Result<&Material> {
        self.materials
            .get(index)
            .ok_or_else(|| DxLearnError::Runtime(format!("Material index {} out of range", index)))
    }

    pub fn material_by_name_mut(&mut self, name: &str) -> Result<&mut Material> {
        let index = self.material_index(name)?;
        Ok(&mut self.materials[index])
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// 添加渲染项，返回其物体常量缓冲区索引
    pub fn add_render_item(&mut self, desc: RenderItemDesc) -> Result<usize> {
        if let Some(material) = desc.material {
            self.material(material)?;
        }

        let object_index = self.items.len();
        self.layers.entry(desc.layer).or_default().push(object_index);
        self.items.push(RenderItem {
            name: desc.name,
            world: desc.world,
            tex_transform: desc.tex_transform,
            dirty: DirtyCounter::new(self.frame_resource_count),
            object_index,
            material: desc.material,
            geometry: desc.geometry,
            submesh: desc.submesh,
            topology: desc.topology,
            layer: desc.layer,
            dynamic_vertices: desc.dynamic_vertices,
        });
        Ok(object_index)
    }

    /// 让已有的渲染项同时出现在另一层（镜面既写模板又做半透明混合）
    pub fn add_to_layer(&mut self, item: usize, layer: RenderLayer) -> Result<()> {
        if item >= self.items.len() {
            return Err(DxLearnError::Runtime(format!("Render item index {} out of range", item)));
        }
        let members = self.layers.entry(layer).or_default();
        if !members.contains(&item) {
            members.push(item);
        }
        Ok(())
    }

    pub fn items(&self) -> &[RenderItem] {
        &self.items
    }

    pub fn item_mut(&mut self, index: usize) -> Option<&mut RenderItem> {
        self.items.get_mut(index)
    }

    pub fn item_by_name_mut(&mut self, name: &str) -> Option<&mut RenderItem> {
        self.items.iter_mut().find(|item| item.name == name)
    }

    /// 某一层的渲染项
    pub fn layer(&self, layer: RenderLayer) -> impl Iterator<Item = &RenderItem> {
        self.layers
            .get(&layer)
            .into_iter()
            .flatten()
            .map(move |&index| &self.items[index])
    }

    pub fn layer_len(&self, layer: RenderLayer) -> usize {
        self.layers.get(&layer).map_or(0, Vec::len)
    }

    /// 把脏的渲染项写入当前帧资源的物体常量缓冲区
    ///
    /// 返回写入的数量。
    pub fn update_object_constants(&mut self, buffer: &mut UploadBuffer<ObjectConstants>) -> Result<usize> {
        let mut written = 0;
        for item in &mut self.items {
            if item.dirty.is_dirty() {
                buffer.copy_data(item.object_index, &item.to_constants())?;
                item.dirty.consume();
                written += 1;
            }
        }
        if written > 0 {
            trace!(written, "Object constants updated");
        }
        Ok(written)
    }

    /// 把脏的材质写入当前帧资源的材质常量缓冲区
    pub fn update_material_constants(&mut self, buffer: &mut UploadBuffer<MaterialConstants>) -> Result<usize> {
        let mut written = 0;
        for material in &mut self.materials {
            if material.dirty.is_dirty() {
                buffer.copy_data(material.cb_index, &material.to_constants())?;
                material.dirty.consume();
                written += 1;
            }
        }
        if written > 0 {
            trace!(written, "Material constants updated");
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::resource::{BufferUsageType, HostStorage};

    fn object_buffer(count: usize) -> UploadBuffer<ObjectConstants> {
        let size = UploadBuffer::<ObjectConstants>::required_size(count, BufferUsageType::Constant);
        UploadBuffer::new(Box::new(HostStorage::new(size, 0)), count, BufferUsageType::Constant).unwrap()
    }

    fn box_range() -> SubmeshRange {
        SubmeshRange { index_count: 36, start_index: 0, base_vertex: 0 }
    }

    #[test]
    fn test_constant_layouts() {
        assert_eq!(std::mem::size_of::<ObjectConstants>(), 128);
        assert_eq!(std::mem::size_of::<MaterialConstants>(), 96);
        assert_eq!(std::mem::size_of::<Light>(), 48);
        assert_eq!(std::mem::size_of::<PassConstants>() % 16, 0);
    }

    #[test]
    fn test_layers_keep_insertion_order() {
        let mut scene = Scene::new(3);
        let geo = scene.add_geometry("boxGeo", [("box", box_range())]);
        let (_, range) = scene.submesh("boxGeo", "box").unwrap();

        scene.add_render_item(RenderItemDesc::new("a", geo, range)).unwrap();
        scene.add_render_item(RenderItemDesc::new("b", geo, range).with_layer(RenderLayer::Translucent)).unwrap();
        scene.add_render_item(RenderItemDesc::new("c", geo, range)).unwrap();

        let opaque: Vec<&str> = scene.layer(RenderLayer::Opaque).map(|i| i.name()).collect();
        assert_eq!(opaque, vec!["a", "c"]);
        assert_eq!(scene.layer_len(RenderLayer::Translucent), 1);
        assert_eq!(scene.layer_len(RenderLayer::Shadow), 0);
    }

    #[test]
    fn test_unknown_material_is_rejected() {
        let mut scene = Scene::new(3);
        let geo = scene.add_geometry("boxGeo", [("box", box_range())]);
        let desc = RenderItemDesc::new("a", geo, box_range()).with_material(4);
        assert!(scene.add_render_item(desc).is_err());
    }

    #[test]
    fn test_object_update_consumes_dirty_counter() {
        let mut scene = Scene::new(3);
        let geo = scene.add_geometry("boxGeo", [("box", box_range())]);
        scene.add_render_item(RenderItemDesc::new("box", geo, box_range())).unwrap();

        let mut buffer = object_buffer(1);
        let writes: Vec<usize> = (0..4).map(|_| scene.update_object_constants(&mut buffer).unwrap()).collect();
        assert_eq!(writes, vec![1, 1, 1, 0]);

        scene.item_by_name_mut("box").unwrap().set_world(math::translation(0.0, 2.0, 0.0));
        assert_eq!(scene.items()[0].dirty().remaining(), 3);
        scene.update_object_constants(&mut buffer).unwrap();
        assert_eq!(buffer.read(0).unwrap().world[3], [0.0, 2.0, 0.0, 1.0]);
    }
}
