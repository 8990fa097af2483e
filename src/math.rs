//! 角度与 3x4 仿射矩阵工具
//!
//! 角度约定：度数，分量顺序为 (pitch, yaw, roll)。
//! 矩阵使用 glam::Mat4，但只当作 3x4 仿射矩阵使用，最后一行恒为 (0, 0, 0, 1)。

use glam::{Mat4, Vec3, Vec4};

/// pitch 分量索引
pub const PITCH: usize = 0;
/// yaw 分量索引
pub const YAW: usize = 1;
/// roll 分量索引
pub const ROLL: usize = 2;

// ============================================================================
// 角度 <-> 方向
// ============================================================================

/// 欧拉角转 forward / right / up 三个方向向量
pub fn angle_vectors(angles: Vec3) -> (Vec3, Vec3, Vec3) {
    let (sy, cy) = angles[YAW].to_radians().sin_cos();
    let (sp, cp) = angles[PITCH].to_radians().sin_cos();
    let (sr, cr) = angles[ROLL].to_radians().sin_cos();

    let forward = Vec3::new(cp * cy, cp * sy, -sp);
    let right = Vec3::new(
        -sr * sp * cy + cr * sy,
        -sr * sp * sy - cr * cy,
        -sr * cp,
    );
    let up = Vec3::new(
        cr * sp * cy + sr * sy,
        cr * sp * sy - sr * cy,
        cr * cp,
    );
    (forward, right, up)
}

/// 欧拉角转旋转矩阵
///
/// 三列依次为 forward、left(= -right)、up，平移为零。
pub fn angles_to_matrix(angles: Vec3) -> Mat4 {
    let (forward, right, up) = angle_vectors(angles);
    Mat4::from_cols(
        forward.extend(0.0),
        (-right).extend(0.0),
        up.extend(0.0),
        Vec4::W,
    )
}

/// 方向向量转欧拉角（roll 恒为 0）
pub fn vector_to_angles(v: Vec3) -> Vec3 {
    let (yaw, pitch) = if v.x == 0.0 && v.y == 0.0 {
        (0.0, if v.z > 0.0 { 90.0 } else { 270.0 })
    } else {
        let mut yaw = if v.x != 0.0 {
            v.y.atan2(v.x).to_degrees()
        } else if v.y > 0.0 {
            90.0
        } else {
            270.0
        };
        if yaw < 0.0 {
            yaw += 360.0;
        }

        let forward = (v.x * v.x + v.y * v.y).sqrt();
        let mut pitch = v.z.atan2(forward).to_degrees();
        if pitch < 0.0 {
            pitch += 360.0;
        }
        (yaw, pitch)
    };
    Vec3::new(-pitch, yaw, 0.0)
}

// ============================================================================
// 角度归一化
// ============================================================================

/// 归一化到 [0, 360)
#[inline]
pub fn angle_normalize_360(angle: f32) -> f32 {
    angle.rem_euclid(360.0)
}

/// 归一化到 (-180, 180]
#[inline]
pub fn angle_normalize_180(angle: f32) -> f32 {
    let a = angle_normalize_360(angle);
    if a > 180.0 {
        a - 360.0
    } else {
        a
    }
}

/// 以 0 为中心的归一化，结果位于 [-180, 180]
///
/// 与 `angle_normalize_180` 的区别：保留 fmod 的符号语义，180 与 -180 都可能出现。
#[inline]
pub fn angle_norm_zero(theta: f32) -> f32 {
    let ret = theta % 360.0;
    if ret < -180.0 {
        ret + 360.0
    } else if ret > 180.0 {
        ret - 360.0
    } else {
        ret
    }
}

// ============================================================================
// 矩阵工具
// ============================================================================

/// 世界矩阵：先按实体角度旋转，再平移到实体位置
#[inline]
pub fn world_matrix(angles: Vec3, position: Vec3) -> Mat4 {
    Mat4::from_translation(position) * angles_to_matrix(angles)
}

/// 取矩阵平移部分
#[inline]
pub fn origin(m: &Mat4) -> Vec3 {
    m.w_axis.truncate()
}

/// 取矩阵 X 轴方向
#[inline]
pub fn x_axis(m: &Mat4) -> Vec3 {
    m.x_axis.truncate()
}

/// 按实体缩放平移部分；全零缩放视为 1
#[inline]
pub fn scale_origin(mut m: Mat4, scale: Vec3) -> Mat4 {
    if scale != Vec3::ZERO {
        m.w_axis.x *= scale.x;
        m.w_axis.y *= scale.y;
        m.w_axis.z *= scale.z;
    }
    m
}

/// 逐系数线性插值（12 个有效系数，最后一行保持不变）
#[inline]
pub fn lerp_matrix(from: &Mat4, to: &Mat4, t: f32) -> Mat4 {
    *from + (*to - *from) * t
}

/// 矩阵中是否存在 NaN
#[inline]
pub fn has_nan(m: &Mat4) -> bool {
    m.is_nan()
}
