//! 布娃娃状态机
//!
//! 每个关节独立维护两个时间戳：
//! - dynamic_since: 进入 Dynamic 的时刻
//! - rest_since: 进入 Settling 的时刻
//! 两者都为空时关节处于 Settled。
//!
//! 判断依据是实体原点相对参考原点的位移，不看关节自身的位置。

use glam::Vec3;

use super::config::RagdollConfig;
use crate::skeleton::PhysicsJoint;

/// 求解状态，按活跃程度排序
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SolveState {
    /// 已静止，不再求解
    #[default]
    Settled,
    /// 正在衰减到静止
    Settling,
    /// 受到扰动，全速求解
    Dynamic,
}

/// 单个关节的状态更新结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StateUpdate {
    pub state: SolveState,
    /// 求解衰减系数 [0, 1]
    pub decay: f32,
    /// 实体原点相对参考原点的位移
    pub origin_change: Vec3,
}

/// 推进一个关节的状态
pub fn update_joint_state(
    joint: &mut PhysicsJoint,
    origin: Vec3,
    now: i32,
    force_solve: bool,
    config: &RagdollConfig,
) -> StateUpdate {
    let origin_change = origin - joint.reference_origin;
    let moved = origin_change.length_squared() > config.origin_change_threshold_sq;

    let mut decay = 1.0;
    let state;

    if force_solve || joint.dynamic_since.is_some() {
        let since = joint.dynamic_since.unwrap_or(0);
        if now > since + config.dynamic_window_ms {
            joint.reference_origin = origin;
            if moved {
                joint.dynamic_since = Some(now);
                state = SolveState::Dynamic;
            } else {
                joint.dynamic_since = None;
                joint.rest_since = Some(now);
                state = SolveState::Settling;
            }
        } else {
            state = SolveState::Dynamic;
        }
    } else if let Some(rest) = joint.rest_since {
        decay = (1.0 - (now - rest) as f32 / config.settle_window_ms as f32).clamp(0.0, 1.0);
        if now > rest + config.settle_window_ms {
            joint.reference_origin = origin;
            if moved {
                joint.rest_since = Some(now);
                state = SolveState::Settling;
            } else {
                joint.rest_since = None;
                state = SolveState::Settled;
            }
        } else {
            state = SolveState::Settling;
        }
    } else {
        if joint.is_ik_controlled() || moved {
            joint.dynamic_since = Some(now);
            state = SolveState::Dynamic;
        } else {
            state = SolveState::Settled;
        }
        decay = 0.0;
    }

    StateUpdate {
        state,
        decay,
        origin_change,
    }
}

/// 把关节推回 Dynamic
#[inline]
pub fn disturb(joint: &mut PhysicsJoint, now: i32) {
    joint.dynamic_since = Some(now);
    joint.rest_since = None;
}

/// 全部关节的汇总：取最活跃的状态、最大的衰减和最大的下落
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AggregateState {
    pub state: SolveState,
    pub decay: f32,
    /// 最小的 z 位移（下落为负）
    pub drop: f32,
}

impl AggregateState {
    pub fn new() -> Self {
        Self {
            state: SolveState::Settled,
            decay: 0.0,
            drop: 0.0,
        }
    }

    pub fn merge(&mut self, update: &StateUpdate) {
        self.state = self.state.max(update.state);
        self.decay = self.decay.max(update.decay);
        self.drop = self.drop.min(update.origin_change.z);
    }
}

impl Default for AggregateState {
    fn default() -> Self {
        Self::new()
    }
}
