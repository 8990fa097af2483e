//! 布娃娃 / IK 调用参数

use glam::{Mat4, Vec3};

use crate::math::world_matrix;
use crate::skeleton::{AngleLimits, JointFlags};

/// 每 tick 的实体参数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RagdollUpdateParams {
    /// 实体角度 (pitch, yaw, roll)
    pub angles: Vec3,
    /// 实体原点
    pub position: Vec3,
    /// 模型缩放；全零视为 1
    pub scale: Vec3,
    /// 实体速度
    pub velocity: Vec3,
    /// 碰撞查询时忽略的实体
    pub entity: Option<i32>,
    /// 作为理想姿态的动画帧
    pub settle_frame: usize,
}

impl RagdollUpdateParams {
    pub fn new(position: Vec3) -> Self {
        Self {
            angles: Vec3::ZERO,
            position,
            scale: Vec3::ZERO,
            velocity: Vec3::ZERO,
            entity: None,
            settle_frame: 0,
        }
    }

    pub fn with_angles(mut self, angles: Vec3) -> Self {
        self.angles = angles;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_entity(mut self, entity: i32) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn with_settle_frame(mut self, frame: usize) -> Self {
        self.settle_frame = frame;
        self
    }

    /// 实体世界矩阵
    #[inline]
    pub fn world_matrix(&self) -> Mat4 {
        world_matrix(self.angles, self.position)
    }

    /// 实际使用的缩放
    #[inline]
    pub fn effective_scale(&self) -> Vec3 {
        if self.scale == Vec3::ZERO {
            Vec3::ONE
        } else {
            self.scale
        }
    }
}

/// 启动布娃娃的参数：实体状态加上死亡动画的帧范围
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RagdollStartParams {
    pub angles: Vec3,
    pub position: Vec3,
    pub scale: Vec3,
    pub velocity: Vec3,
    pub entity: Option<i32>,
    /// 死亡动画起始帧
    pub start_frame: i32,
    /// 死亡动画结束帧（不包含）
    pub end_frame: i32,
}

impl RagdollStartParams {
    pub fn new(position: Vec3, start_frame: i32, end_frame: i32) -> Self {
        Self {
            angles: Vec3::ZERO,
            position,
            scale: Vec3::ZERO,
            velocity: Vec3::ZERO,
            entity: None,
            start_frame,
            end_frame,
        }
    }

    pub fn with_angles(mut self, angles: Vec3) -> Self {
        self.angles = angles;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// 预求解使用的参数：速度清零，以死亡动画最后一帧为理想姿态
    pub fn settle_params(&self) -> RagdollUpdateParams {
        RagdollUpdateParams {
            angles: self.angles,
            position: self.position,
            scale: self.scale,
            velocity: Vec3::ZERO,
            entity: self.entity,
            settle_frame: (self.end_frame - 1).max(0) as usize,
        }
    }
}

/// IK 关节激活参数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IkJointParams {
    pub angles: Vec3,
    pub position: Vec3,
    pub scale: Vec3,
    pub radius: f32,
    pub limits: AngleLimits,
    /// 冻结在这段动画上（end 不包含）
    pub start_frame: i32,
    pub end_frame: i32,
    /// 已经在同一段动画上时也重新设置
    pub force_anim: bool,
    /// 覆盖默认的关节标志
    pub flags: Option<JointFlags>,
}

impl IkJointParams {
    pub fn new(position: Vec3, radius: f32, limits: AngleLimits) -> Self {
        Self {
            angles: Vec3::ZERO,
            position,
            scale: Vec3::ZERO,
            radius,
            limits,
            start_frame: 0,
            end_frame: 0,
            force_anim: false,
            flags: None,
        }
    }

    pub fn with_anim(mut self, start_frame: i32, end_frame: i32) -> Self {
        self.start_frame = start_frame;
        self.end_frame = end_frame;
        self
    }

    pub fn update_params(&self) -> RagdollUpdateParams {
        RagdollUpdateParams::new(self.position)
            .with_angles(self.angles)
            .with_scale(self.scale)
    }
}
