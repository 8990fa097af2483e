//! 骨骼覆盖 - 单个骨骼上的覆盖状态
//!
//! 一个覆盖条目在任一时刻只处于一种模式：
//! - Idle: 已登记但没有任何覆盖（可被释放）
//! - Angles: 角度/矩阵覆盖（前乘或后乘）
//! - Animation: 独立的动画播放
//! - Physics: 布娃娃/IK 接管，普通的角度和动画请求会被忽略

use bitflags::bitflags;
use glam::{Mat4, Vec3};

use crate::animation::{AnimPlayback, EndBehavior};
use crate::math::{angles_to_matrix, PITCH, ROLL, YAW};

// ============================================================================
// 轴向重映射
// ============================================================================

/// 角度覆盖的轴向
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    PositiveX,
    PositiveY,
    PositiveZ,
    NegativeX,
    NegativeY,
    NegativeZ,
}

impl Orientation {
    /// 单位轴向量
    #[inline]
    pub fn unit(self) -> Vec3 {
        match self {
            Orientation::PositiveX => Vec3::X,
            Orientation::PositiveY => Vec3::Y,
            Orientation::PositiveZ => Vec3::Z,
            Orientation::NegativeX => Vec3::NEG_X,
            Orientation::NegativeY => Vec3::NEG_Y,
            Orientation::NegativeZ => Vec3::NEG_Z,
        }
    }
}

/// 骨骼局部空间中 up / left / forward 分别对应的轴
///
/// 默认值 (+Z, -Y, +X) 在前乘模式下不改变角度。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AngleAxes {
    pub up: Orientation,
    pub left: Orientation,
    pub forward: Orientation,
}

impl Default for AngleAxes {
    fn default() -> Self {
        Self {
            up: Orientation::PositiveZ,
            left: Orientation::NegativeY,
            forward: Orientation::PositiveX,
        }
    }
}

impl AngleAxes {
    pub fn new(up: Orientation, left: Orientation, forward: Orientation) -> Self {
        Self { up, left, forward }
    }

    /// 前乘模式：把请求的 (pitch, yaw, roll) 按轴向重排到骨骼空间
    pub fn remap_angles(&self, angles: Vec3) -> Vec3 {
        use Orientation::*;
        let (a0, a1, a2) = (angles[PITCH], angles[YAW], angles[ROLL]);

        let yaw = match self.up {
            NegativeX => a2 + 180.0,
            PositiveX => a2,
            NegativeY | PositiveY => a0,
            NegativeZ => a1 + 180.0,
            PositiveZ => a1,
        };
        let pitch = match self.left {
            NegativeX => a2,
            PositiveX => a2 + 180.0,
            NegativeY => a0,
            PositiveY => a0 + 180.0,
            NegativeZ | PositiveZ => a1,
        };
        let roll = match self.forward {
            NegativeX | PositiveX => a2,
            NegativeY => a0,
            PositiveY => a0 + 180.0,
            NegativeZ => a1,
            PositiveZ => a1 + 180.0,
        };
        Vec3::new(pitch, yaw, roll)
    }

    /// 后乘模式的轴置换矩阵：三列分别取 forward、left、up 对应的单位轴
    pub fn permutation(&self) -> Mat4 {
        Mat4::from_cols(
            self.forward.unit().extend(0.0),
            self.left.unit().extend(0.0),
            self.up.unit().extend(0.0),
            glam::Vec4::W,
        )
    }
}

// ============================================================================
// 角度限制
// ============================================================================

/// 每轴角度范围（度）
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct AngleLimits {
    pub min: Vec3,
    pub max: Vec3,
}

impl AngleLimits {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// 对称范围 [-v, v]
    pub fn symmetric(v: f32) -> Self {
        Self {
            min: Vec3::splat(-v),
            max: Vec3::splat(v),
        }
    }

    /// 全零限制视为不受约束
    #[inline]
    pub fn is_free(&self) -> bool {
        self.min == Vec3::ZERO && self.max == Vec3::ZERO
    }

    /// 按断裂倍率放宽
    #[inline]
    pub fn scaled(&self, multiplier: f32) -> Self {
        Self {
            min: self.min * multiplier,
            max: self.max * multiplier,
        }
    }

    /// 逐轴夹紧（min 与 max 相等时固定在该值）
    #[inline]
    pub fn clamp(&self, angles: Vec3) -> Vec3 {
        angles.max(self.min).min(self.max)
    }

    #[inline]
    pub fn contains(&self, angles: Vec3) -> bool {
        angles.cmpge(self.min).all() && angles.cmple(self.max).all()
    }
}

// ============================================================================
// 角度覆盖
// ============================================================================

/// 覆盖矩阵与动画矩阵的组合顺序
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AnglePlacement {
    /// override * anim，角度在骨骼自身的基础姿态空间中表达
    #[default]
    PreMultiply,
    /// anim * override，角度直接生成矩阵，不经过基础姿态
    PostMultiply,
}

/// 角度覆盖请求
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngleRequest {
    pub angles: Vec3,
    pub placement: AnglePlacement,
    pub axes: AngleAxes,
    /// 设置时对请求角度做夹紧
    pub limits: Option<AngleLimits>,
}

impl AngleRequest {
    pub fn new(angles: Vec3) -> Self {
        Self {
            angles,
            placement: AnglePlacement::PreMultiply,
            axes: AngleAxes::default(),
            limits: None,
        }
    }

    pub fn post_multiply(mut self) -> Self {
        self.placement = AnglePlacement::PostMultiply;
        self
    }

    pub fn with_axes(mut self, axes: AngleAxes) -> Self {
        self.axes = axes;
        self
    }

    pub fn with_limits(mut self, limits: AngleLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// 已生效的角度覆盖
#[derive(Clone, Debug, PartialEq)]
pub struct AngleOverride {
    pub placement: AnglePlacement,
    /// 夹紧后的角度；矩阵覆盖时为 None
    pub angles: Option<Vec3>,
    pub limits: Option<AngleLimits>,
    /// 合成时使用的覆盖矩阵
    pub matrix: Mat4,
}

impl AngleOverride {
    /// 由角度请求生成覆盖矩阵
    ///
    /// 前乘：basePose * R(重映射角度) * basePoseInv
    /// 后乘：R(角度) * 轴置换
    pub fn from_request(request: &AngleRequest, base_pose: &Mat4, base_pose_inv: &Mat4) -> Self {
        let angles = match request.limits {
            Some(limits) => limits.clamp(request.angles),
            None => request.angles,
        };

        let matrix = match request.placement {
            AnglePlacement::PreMultiply => {
                let rotation = angles_to_matrix(request.axes.remap_angles(angles));
                *base_pose * rotation * *base_pose_inv
            }
            AnglePlacement::PostMultiply => {
                let mut adjusted = angles;
                if request.axes.left == Orientation::PositiveY {
                    adjusted[PITCH] += 180.0;
                }
                angles_to_matrix(adjusted) * request.axes.permutation()
            }
        };

        Self {
            placement: request.placement,
            angles: Some(angles),
            limits: request.limits,
            matrix,
        }
    }

    /// 直接使用给定矩阵
    pub fn from_matrix(matrix: Mat4, placement: AnglePlacement) -> Self {
        Self {
            placement,
            angles: None,
            limits: None,
            matrix,
        }
    }
}

// ============================================================================
// 动画请求
// ============================================================================

/// 动画播放请求
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimRequest {
    pub start_frame: i32,
    pub end_frame: i32,
    pub speed: f32,
    pub end: EndBehavior,
    /// 交叉淡入时长 (ms)
    pub blend_time: Option<i32>,
    /// 从指定帧开始
    pub set_frame: Option<f32>,
}

impl AnimRequest {
    pub fn new(start_frame: i32, end_frame: i32, speed: f32) -> Self {
        Self {
            start_frame,
            end_frame,
            speed,
            end: EndBehavior::Stop,
            blend_time: None,
            set_frame: None,
        }
    }

    pub fn looping(mut self) -> Self {
        self.end = EndBehavior::Loop;
        self
    }

    pub fn freeze(mut self) -> Self {
        self.end = EndBehavior::Freeze;
        self
    }

    pub fn blend(mut self, ms: i32) -> Self {
        self.blend_time = Some(ms);
        self
    }

    pub fn at_frame(mut self, frame: f32) -> Self {
        self.set_frame = Some(frame);
        self
    }
}

// ============================================================================
// 物理关节
// ============================================================================

/// 关节在求解中的角色
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JointRole {
    /// 模型根：直接积分位置偏移，覆盖矩阵前乘
    ModelRoot,
    /// 骨盆：为模型根提供期望的位置偏移，自身也参与角度求解
    Pelvis,
    /// 受约束求解的关节
    Pcj,
    /// 只提供位置的被动效应器，不参与角度求解
    Passive,
}

impl JointRole {
    /// 覆盖矩阵与动画矩阵的组合顺序
    #[inline]
    pub fn placement(self) -> AnglePlacement {
        match self {
            JointRole::ModelRoot => AnglePlacement::PreMultiply,
            _ => AnglePlacement::PostMultiply,
        }
    }
}

bitflags! {
    /// 关节分类标志
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct JointFlags: u32 {
        /// 效应器：求解器试图移动其世界位置
        const EFFECTOR      = 1 << 0;
        /// 轻量关节：叠加身体速度的反向拖拽
        const LIGHTWEIGHT   = 1 << 1;
        /// 不可断裂：超出限制后仍可继续恢复
        const UNSNAPPABLE   = 1 << 2;
        /// 正由 IK 驱动
        const IK_CONTROLLED = 1 << 3;
    }
}

/// 骨盆偏移（角度与位置）
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct PelvisOffset {
    pub angles: Vec3,
    pub position: Vec3,
}

/// 布娃娃/IK 接管的关节状态
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicsJoint {
    /// 是否参与当前的布娃娃/IK 求解；false 表示仅登记的 IK 关节
    pub active: bool,
    pub role: JointRole,
    pub flags: JointFlags,
    pub radius: f32,
    pub weight: f32,
    pub limits: AngleLimits,

    // ========== 角度状态 ==========
    pub current_angles: Vec3,
    pub last_angles: Vec3,
    /// 物理覆盖矩阵（合成时直接使用）
    pub override_matrix: Mat4,
    pub base_pose: Mat4,
    pub base_pose_inv: Mat4,
    pub snapped: bool,

    // ========== 目标追踪 ==========
    pub last_position: Vec3,
    pub velocity: Vec3,
    pub gravity_pull: f32,
    pub solid_count: u32,
    pub velocity_effector: Vec3,
    pub velocity_root: Vec3,
    pub last_shot_dir: Vec3,
    pub original_origin: Vec3,
    pub reference_origin: Vec3,
    pub offset_rotation: f32,
    pub goal_override: Option<Vec3>,
    pub gradient_speed: Option<f32>,

    // ========== IK ==========
    pub ik_position: Vec3,
    pub ik_speed: f32,
    /// IK 关节冻结的动画
    pub anim: Option<AnimPlayback>,

    // ========== 状态机 ==========
    pub start_time: i32,
    pub dynamic_since: Option<i32>,
    pub rest_since: Option<i32>,

    pub pelvis_offset: PelvisOffset,
    /// 在工作集中的位置
    pub rag_index: Option<usize>,
}

impl PhysicsJoint {
    pub fn new(role: JointRole, flags: JointFlags, radius: f32, limits: AngleLimits, now: i32) -> Self {
        Self {
            active: true,
            role,
            flags,
            radius,
            weight: 1.0,
            limits,
            current_angles: Vec3::ZERO,
            last_angles: Vec3::ZERO,
            override_matrix: Mat4::IDENTITY,
            base_pose: Mat4::IDENTITY,
            base_pose_inv: Mat4::IDENTITY,
            snapped: false,
            last_position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            gravity_pull: 0.0,
            solid_count: 0,
            velocity_effector: Vec3::ZERO,
            velocity_root: Vec3::ZERO,
            last_shot_dir: Vec3::ZERO,
            original_origin: Vec3::ZERO,
            reference_origin: Vec3::ZERO,
            offset_rotation: 0.0,
            goal_override: None,
            gradient_speed: None,
            ik_position: Vec3::ZERO,
            ik_speed: 0.0,
            anim: None,
            start_time: now,
            dynamic_since: None,
            rest_since: None,
            pelvis_offset: PelvisOffset::default(),
            rag_index: None,
        }
    }

    #[inline]
    pub fn is_effector(&self) -> bool {
        self.flags.contains(JointFlags::EFFECTOR)
    }

    #[inline]
    pub fn is_ik_controlled(&self) -> bool {
        self.flags.contains(JointFlags::IK_CONTROLLED)
    }

    #[inline]
    pub fn is_unsnappable(&self) -> bool {
        self.flags.contains(JointFlags::UNSNAPPABLE)
    }

    /// 由当前角度重建覆盖矩阵：basePose * R(angles) * basePoseInv
    pub fn rebuild_override(&mut self) {
        self.override_matrix = self.base_pose * angles_to_matrix(self.current_angles) * self.base_pose_inv;
    }
}

// ============================================================================
// 覆盖条目
// ============================================================================

/// 覆盖模式
#[derive(Clone, Debug, PartialEq, Default)]
pub enum OverrideMode {
    #[default]
    Idle,
    Angles(AngleOverride),
    Animation(AnimPlayback),
    Physics(Box<PhysicsJoint>),
}

/// 覆盖表中的一个条目
#[derive(Clone, Debug, PartialEq)]
pub struct BoneOverride {
    pub bone: usize,
    pub mode: OverrideMode,
}

impl BoneOverride {
    pub fn new(bone: usize) -> Self {
        Self {
            bone,
            mode: OverrideMode::Idle,
        }
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        matches!(self.mode, OverrideMode::Idle)
    }

    /// 是否由布娃娃/IK 接管（包括仅登记的 IK 关节）
    #[inline]
    pub fn is_physics(&self) -> bool {
        matches!(self.mode, OverrideMode::Physics(_))
    }

    /// 是否参与当前求解
    #[inline]
    pub fn is_active_joint(&self) -> bool {
        matches!(&self.mode, OverrideMode::Physics(j) if j.active)
    }

    #[inline]
    pub fn physics(&self) -> Option<&PhysicsJoint> {
        match &self.mode {
            OverrideMode::Physics(j) => Some(j),
            _ => None,
        }
    }

    #[inline]
    pub fn physics_mut(&mut self) -> Option<&mut PhysicsJoint> {
        match &mut self.mode {
            OverrideMode::Physics(j) => Some(j),
            _ => None,
        }
    }

    /// 该骨骼上携带的动画（普通动画，或物理关节下保持的动画）
    #[inline]
    pub fn playback(&self) -> Option<&AnimPlayback> {
        match &self.mode {
            OverrideMode::Animation(anim) => Some(anim),
            OverrideMode::Physics(j) => j.anim.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::angle_vectors;

    #[test]
    fn test_default_axes_keep_angles() {
        let axes = AngleAxes::default();
        let a = Vec3::new(10.0, 20.0, 30.0);
        assert_eq!(axes.remap_angles(a), a);
    }

    #[test]
    fn test_remap_swaps_axes() {
        // up = -X: yaw 取 roll + 180；left = +Z: pitch 取 yaw；forward = -Y: roll 取 pitch
        let axes = AngleAxes::new(Orientation::NegativeX, Orientation::PositiveZ, Orientation::NegativeY);
        let r = axes.remap_angles(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(r, Vec3::new(2.0, 183.0, 1.0));
    }

    #[test]
    fn test_limits_clamp() {
        let limits = AngleLimits::new(Vec3::new(-10.0, -10.0, -90.0), Vec3::new(10.0, 10.0, 90.0));
        assert_eq!(limits.clamp(Vec3::new(50.0, 0.0, 0.0)), Vec3::new(10.0, 0.0, 0.0));
        assert!(limits.contains(Vec3::new(0.0, 5.0, -80.0)));
        assert!(!limits.contains(Vec3::new(11.0, 0.0, 0.0)));

        // 上下限相等时固定
        let fixed = AngleLimits::new(Vec3::new(0.0, 0.0, -20.0), Vec3::new(0.0, 0.0, -20.0));
        assert_eq!(fixed.clamp(Vec3::new(5.0, 5.0, 5.0)), Vec3::new(0.0, 0.0, -20.0));
    }

    #[test]
    fn test_free_limits() {
        assert!(AngleLimits::default().is_free());
        assert!(!AngleLimits::symmetric(15.0).is_free());
        assert_eq!(AngleLimits::symmetric(10.0).scaled(1.5), AngleLimits::symmetric(15.0));
    }

    #[test]
    fn test_premultiply_sandwich() {
        // 基础姿态为平移时，夹心后的旋转绕骨骼原点
        let base = Mat4::from_translation(Vec3::new(0.0, 0.0, 10.0));
        let request = AngleRequest::new(Vec3::new(0.0, 90.0, 0.0));
        let o = AngleOverride::from_request(&request, &base, &base.inverse());
        let p = o.matrix.transform_point3(Vec3::new(1.0, 0.0, 10.0));
        assert!((p - Vec3::new(0.0, 1.0, 10.0)).length() < 1e-4);
    }

    #[test]
    fn test_postmultiply_permutation() {
        let axes = AngleAxes::new(Orientation::PositiveZ, Orientation::NegativeY, Orientation::PositiveX);
        let request = AngleRequest::new(Vec3::new(0.0, 45.0, 0.0)).post_multiply().with_axes(axes);
        let o = AngleOverride::from_request(&request, &Mat4::IDENTITY, &Mat4::IDENTITY);
        // 第一列 = R * forward 轴
        let (forward, _, _) = angle_vectors(Vec3::new(0.0, 45.0, 0.0));
        assert!((o.matrix.x_axis.truncate() - forward).length() < 1e-5);
        assert_eq!(o.placement, AnglePlacement::PostMultiply);
    }

    #[test]
    fn test_request_limits_applied() {
        let request = AngleRequest::new(Vec3::new(50.0, 0.0, 0.0))
            .with_limits(AngleLimits::new(Vec3::new(-10.0, -10.0, -90.0), Vec3::new(10.0, 10.0, 90.0)));
        let o = AngleOverride::from_request(&request, &Mat4::IDENTITY, &Mat4::IDENTITY);
        assert_eq!(o.angles, Some(Vec3::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn test_role_placement() {
        assert_eq!(JointRole::ModelRoot.placement(), AnglePlacement::PreMultiply);
        assert_eq!(JointRole::Pcj.placement(), AnglePlacement::PostMultiply);
    }
}
