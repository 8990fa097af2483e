//! 骨骼系统
//!
//! 核心设计思想：
//! - SkeletonSource: 外部提供的不可变骨架（层次、基础姿态、动画帧）
//! - SkeletonTopology: 每个骨架只算一次的拓扑缓存
//! - BoneOverrideTable: 每个模型实例的稀疏骨骼覆盖表
//! - PoseComposer: 按父在前的顺序合成骨骼矩阵

mod bone_override;
mod override_table;
mod pose_composer;
mod skeleton_data;
mod topology;

pub use bone_override::{
    AngleAxes, AngleLimits, AngleOverride, AnglePlacement, AngleRequest, AnimRequest,
    BoneOverride, JointFlags, JointRole, Orientation, OverrideMode, PelvisOffset, PhysicsJoint,
};
pub use override_table::{AnimationState, BoneOverrideTable};
pub use pose_composer::{ComposeMode, PoseBuffer, PoseComposer};
pub use skeleton_data::{BoneDesc, SkeletonBuilder, SkeletonData};
pub use topology::SkeletonTopology;

pub use crate::animation::EndBehavior;

use glam::Mat4;

// ============================================================================
// 骨架查询接口
// ============================================================================

/// 骨架数据源（只读）
///
/// 索引均为骨骼序号，调用方保证在 `0..bone_count()` 内。
pub trait SkeletonSource: Send + Sync {
    fn bone_count(&self) -> usize;

    fn bone_name(&self, index: usize) -> &str;

    fn bone_parent(&self, index: usize) -> Option<usize>;

    /// 基础姿态（模型空间）
    fn base_pose(&self, index: usize) -> Mat4;

    fn base_pose_inverse(&self, index: usize) -> Mat4;

    /// 动画帧数
    fn frame_count(&self) -> usize;

    /// 某帧某骨骼相对父骨骼的局部矩阵；没有动画数据时为单位矩阵
    fn frame_pose(&self, bone: usize, frame: usize) -> Mat4;

    /// 名称查找（不区分大小写）
    fn find_bone(&self, name: &str) -> Option<usize> {
        (0..self.bone_count()).find(|&i| self.bone_name(i).eq_ignore_ascii_case(name))
    }
}
