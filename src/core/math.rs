//! 数学类型模块
//!
//! 基于 `nalgebra`，提供演示中用到的少量类型别名与矩阵辅助函数。

pub use nalgebra::{Matrix4 as Mat4, Point3 as Pt3, Vector3 as Vec3, Vector4 as Vec4};

pub type Vector3 = Vec3<f32>;
pub type Vector4 = Vec4<f32>;
pub type Point3 = Pt3<f32>;
pub type Matrix4 = Mat4<f32>;

/// 单位矩阵
pub fn identity() -> Matrix4 {
    Matrix4::identity()
}

/// 平移矩阵
pub fn translation(x: f32, y: f32, z: f32) -> Matrix4 {
    Matrix4::new_translation(&Vector3::new(x, y, z))
}

/// 非均匀缩放矩阵
pub fn scaling(x: f32, y: f32, z: f32) -> Matrix4 {
    Matrix4::new_nonuniform_scaling(&Vector3::new(x, y, z))
}

/// 绕 Y 轴旋转
pub fn rotation_y(angle: f32) -> Matrix4 {
    Matrix4::from_axis_angle(&Vector3::y_axis(), angle)
}

/// 左手坐标系观察矩阵
pub fn look_at_lh(eye: &Point3, target: &Point3, up: &Vector3) -> Matrix4 {
    Matrix4::look_at_lh(eye, target, up)
}

/// 左手坐标系透视投影，深度映射到 [0, 1]
pub fn perspective_fov_lh(fov_y: f32, aspect: f32, near_z: f32, far_z: f32) -> Matrix4 {
    let y_scale = 1.0 / (0.5 * fov_y).tan();
    let x_scale = y_scale / aspect;
    let range = far_z / (far_z - near_z);

    let mut m = Matrix4::zeros();
    m[(0, 0)] = x_scale;
    m[(1, 1)] = y_scale;
    m[(2, 2)] = range;
    m[(2, 3)] = -range * near_z;
    m[(3, 2)] = 1.0;
    m
}

/// 关于平面 `n·p + d = 0` 的镜像矩阵，`n` 需为单位向量
pub fn reflection(normal: &Vector3, d: f32) -> Matrix4 {
    let mut m = Matrix4::identity();
    for row in 0..3 {
        for col in 0..3 {
            m[(row, col)] -= 2.0 * normal[row] * normal[col];
        }
        m[(row, 3)] = -2.0 * normal[row] * d;
    }
    m
}

/// 把几何体沿平行光方向压到平面 `n·p + d = 0` 上的投影矩阵
///
/// `to_light` 指向光源（光照方向取反）。
pub fn planar_shadow(normal: &Vector3, d: f32, to_light: &Vector3) -> Matrix4 {
    let plane = Vector4::new(normal.x, normal.y, normal.z, d);
    let light = Vector4::new(to_light.x, to_light.y, to_light.z, 0.0);
    Matrix4::identity() * plane.dot(&light) - light * plane.transpose()
}

/// 转换为着色器常量布局
///
/// nalgebra 按列存储，HLSL 默认按列主序读取 cbuffer 中的矩阵，
/// 因此这里直接按列拷贝，不需要额外转置。
pub fn to_shader_matrix(m: &Matrix4) -> [[f32; 4]; 4] {
    let mut out = [[0.0; 4]; 4];
    for (col, dst) in out.iter_mut().enumerate() {
        for (row, value) in dst.iter_mut().enumerate() {
            *value = m[(row, col)];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_matrix_is_column_major() {
        let m = translation(1.0, 2.0, 3.0);
        let gpu = to_shader_matrix(&m);
        // 平移分量位于最后一列
        assert_eq!(gpu[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(gpu[0], [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_perspective_maps_near_and_far() {
        let proj = perspective_fov_lh(std::f32::consts::FRAC_PI_4, 1.0, 1.0, 1000.0);
        let near = proj * Vector4::new(0.0, 0.0, 1.0, 1.0);
        let far = proj * Vector4::new(0.0, 0.0, 1000.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_reflection_about_xy_plane() {
        let r = reflection(&Vector3::z(), 0.0);
        let p = r * Vector4::new(1.0, 2.0, 3.0, 1.0);
        assert_eq!(p, Vector4::new(1.0, 2.0, -3.0, 1.0));
    }

    #[test]
    fn test_planar_shadow_lands_on_ground() {
        let s = planar_shadow(&Vector3::y(), 0.0, &Vector3::new(0.0, 1.0, 0.0));
        let p = s * Vector4::new(2.0, 5.0, -1.0, 1.0);
        assert!((p.y / p.w).abs() < 1e-6);
        assert!((p.x / p.w - 2.0).abs() < 1e-6);
    }
}
