//! 布娃娃 / IK 物理
//!
//! - working_set: 每次更新重建的扁平关节集合
//! - effector: 目标追踪（重力、碰撞、速度、抖动）
//! - solver: 有限差分梯度求解
//! - state: Dynamic / Settling / Settled 状态机
//! - ragdoll: 每个实例的求解状态与启动流程

mod collision;
mod config;
mod effector;
mod events;
mod params;
mod ragdoll;
mod rig;
mod solver;
mod state;
mod working_set;

pub use collision::{CollisionTracer, ContentMask, FloorPlane, NoCollision, TraceResult, WORLD_ENTITY};
pub use config::{get_config, reset_config, set_config, RagToBase, RagdollConfig, ShotWait};
pub use events::{NullEvents, RagdollEvents};
pub use params::{IkJointParams, RagdollStartParams, RagdollUpdateParams};
pub use ragdoll::Ragdoll;
pub use rig::{JointSpec, RagdollRig};
pub use state::{disturb, update_joint_state, AggregateState, SolveState, StateUpdate};
pub use working_set::{GoalSource, RagEffector, RagJoint, SolveContext, WorkingSet};

use rayon::prelude::*;

use crate::model::{ModelInstance, TickOutcome};
use crate::Result;

/// 并行更新多个实例
///
/// `params[i]` 对应 `instances[i]`，多余的一方被忽略。
pub fn step_instances(
    instances: &mut [ModelInstance],
    params: &[RagdollUpdateParams],
    tracer: &dyn CollisionTracer,
    now: i32,
) -> Vec<Result<TickOutcome>> {
    instances
        .par_iter_mut()
        .zip(params.par_iter())
        .map(|(instance, p)| instance.tick_at(p, tracer, now))
        .collect()
}
