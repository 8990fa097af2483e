//! 骨骼姿态合成与布娃娃/IK 运行时引擎
//!
//! 模块划分：
//! - skeleton: 骨骼数据、拓扑缓存、骨骼覆盖表、姿态合成
//! - animation: 动画播放时间模型、时钟
//! - physics: 布娃娃/IK 求解（工作集、目标追踪、约束求解、状态机）
//! - model: 单个模型实例的对外接口

pub mod animation;
pub mod math;
pub mod model;
pub mod physics;
pub mod skeleton;

pub use animation::{AnimationClock, ManualClock};
pub use model::{IkState, ModelFlags, ModelInstance, RagdollPhase, TickOutcome};
pub use physics::{
    get_config, reset_config, set_config, step_instances, CollisionTracer, ContentMask, FloorPlane,
    IkJointParams, JointSpec, NoCollision, NullEvents, RagToBase, Ragdoll, RagdollConfig,
    RagdollEvents, RagdollRig, RagdollStartParams, RagdollUpdateParams, ShotWait, SolveState,
    TraceResult,
};
pub use skeleton::{
    AngleAxes, AngleLimits, AnglePlacement, AngleRequest, AnimRequest, BoneOverride,
    BoneOverrideTable, ComposeMode, EndBehavior, JointFlags, JointRole, Orientation, OverrideMode,
    PelvisOffset, PoseBuffer, PoseComposer, SkeletonBuilder, SkeletonData, SkeletonSource,
    SkeletonTopology,
};

use thiserror::Error;

// ============================================================================
// 错误类型
// ============================================================================

/// 引擎错误
#[derive(Debug, Error)]
pub enum RigError {
    /// 骨骼名称不在骨架中
    #[error("unknown bone '{0}'")]
    UnknownBone(String),

    /// 覆盖表已满
    #[error("bone override table is full (capacity {capacity})")]
    TableFull { capacity: usize },

    /// 覆盖表索引无效（越界或空槽）
    #[error("invalid bone override index {0}")]
    InvalidOverride(usize),

    /// 布娃娃/IK 初始化时没有可用关节
    #[error("no active ragdoll or IK joints")]
    NoActiveJoints,

    /// 骨架拓扑错误
    #[error("invalid skeleton: {0}")]
    InvalidSkeleton(String),

    /// 动画帧范围超出骨架帧数
    #[error("invalid animation range {start}..{end} (skeleton has {frames} frames)")]
    InvalidAnimRange { start: i32, end: i32, frames: usize },
}

/// 结果类型
pub type Result<T> = std::result::Result<T, RigError>;
