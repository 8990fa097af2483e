//! 约束求解器 - 数值梯度下降
//!
//! 对每个受约束关节的三个欧拉角分别做有限差分：
//!   gs[k] = P * R(angles + δ·e_k) * N,   P = world * R(angles)^-1,  N = world^-1
//! gs[k] 把当前世界空间映射到扰动后的世界空间，作用到每个后代效应器上，
//! 位移在期望方向上的投影就是该轴的梯度。
//!
//! 关节按父在前的顺序处理，同一次遍历中子关节看到的是父关节更新前的世界矩阵。

use glam::{Mat4, Vec3};

use super::state::SolveState;
use super::working_set::{SolveContext, WorkingSet};
use crate::math::{angle_norm_zero, angles_to_matrix, origin};
use crate::skeleton::{AngleLimits, BoneOverrideTable, JointRole, PhysicsJoint};

/// 单个关节的有限差分结果
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Gradient {
    /// 每轴的加权投影和
    del: Vec3,
    /// 参与的后代效应器数量
    effectors: usize,
    /// 后代效应器的固体计数之和
    solid: u32,
}

fn gradient(
    ctx: &SolveContext,
    table: &BoneOverrideTable,
    set: &WorkingSet,
    index: usize,
    angles: Vec3,
) -> Gradient {
    let world = set.world(index);
    let n = world.inverse();
    let p = world * angles_to_matrix(angles).inverse();

    let delta = ctx.config.finite_difference_delta;
    let gs: [Mat4; 3] = std::array::from_fn(|k| {
        let mut perturbed = angles;
        perturbed[k] += delta;
        p * angles_to_matrix(perturbed) * n
    });

    let mut g = Gradient::default();
    for &d in &set.joint(index).dependents {
        let Some(dep) = table.get(set.joint(d).slot).and_then(|e| e.physics()) else {
            continue;
        };
        if !dep.active || !dep.is_effector() {
            continue;
        }
        debug_assert!(d > index, "dependents must follow their ancestor");

        let e = set.effector(d);
        let dep_world = set.world(d);
        for (k, m) in gs.iter().enumerate() {
            let change = origin(&(*m * dep_world)) - e.current_origin;
            g.del[k] += change.dot(e.desired_direction) * dep.weight;
        }
        g.effectors += 1;
        g.solid += dep.solid_count;
    }
    g
}

/// 沿梯度更新角度并向上一次的角度阻尼回拉；可选夹紧到限制内
fn step_angles(joint: &mut PhysicsJoint, del: Vec3, fac: f32, damping: f32, clamp: Option<&AngleLimits>) {
    let last = joint.current_angles;
    joint.last_angles = last;

    for k in 0..3 {
        let mut a = last[k] + del[k] * fac;
        a = (last[k] - a) * damping + a;
        a = angle_norm_zero(a);
        debug_assert!(!a.is_nan(), "NaN joint angle");
        if a.is_nan() {
            a = last[k];
        }
        joint.current_angles[k] = a;
    }

    if let Some(limits) = clamp {
        joint.current_angles = limits.clamp(joint.current_angles);
    }
}

#[inline]
fn damping(ctx: &SolveContext, state: SolveState) -> f32 {
    if state == SolveState::Dynamic {
        ctx.config.damping_dynamic
    } else {
        ctx.config.damping
    }
}

// ============================================================================
// 布娃娃求解
// ============================================================================

/// 一次完整的求解遍历
///
/// - `decay`: 步长衰减，Settling 状态下随时间减小
/// - `limit`: 是否应用角度限制（启动预求解时关闭）
pub(crate) fn solve(
    ctx: &SolveContext,
    table: &mut BoneOverrideTable,
    set: &mut WorkingSet,
    decay: f32,
    limit: bool,
) {
    let cfg = ctx.config;
    let damp = damping(ctx, set.state);

    for i in 0..set.len() {
        let slot = set.joint(i).slot;
        let Some(joint) = table.get(slot).and_then(|e| e.physics()) else {
            continue;
        };
        if !joint.active || joint.role == JointRole::Passive {
            continue;
        }

        if joint.role == JointRole::ModelRoot {
            let Some(offset) = set.desired_pelvis_offset else {
                continue;
            };
            let local = set.world(i).inverse().transform_vector3(offset);
            let Some(joint) = table.get_mut(slot).and_then(|e| e.physics_mut()) else {
                continue;
            };
            let move_to = joint.velocity_root + local * cfg.root_gain;
            joint.velocity_root = (joint.velocity_root - move_to) * cfg.root_damping + move_to;
            joint.override_matrix.w_axis = joint.velocity_root.extend(1.0);
            continue;
        }

        let g = gradient(ctx, table, set, i, joint.current_angles);
        let Some(joint) = table.get_mut(slot).and_then(|e| e.physics_mut()) else {
            continue;
        };

        let all_solid = g.solid + joint.solid_count;
        let unsnappable = joint.is_unsnappable();
        let recip = if g.effectors > 0 {
            (cfg.gradient_norm / g.effectors as f32).sqrt()
        } else {
            0.0
        };
        let step = joint.gradient_speed.unwrap_or_else(|| cfg.gradient_step(all_solid));
        let fac = decay * recip * step;
        let multiplier = if unsnappable { 1.0 } else { cfg.break_multiplier };
        let limits = joint.limits.scaled(multiplier);

        // 卡得太久就放开限制，断裂的关节不再夹紧
        let clamp = limit
            && (all_solid < cfg.free_move_solid_count || unsnappable)
            && (!joint.snapped || unsnappable);
        step_angles(joint, g.del, fac, damp, clamp.then_some(&limits));

        let snapped = !limits.contains(joint.current_angles);
        if snapped != joint.snapped {
            let name = ctx.skeleton.bone_name(set.joint(i).bone);
            log::debug!("[Ragdoll] 关节 {} {}", name, if snapped { "断裂" } else { "恢复" });
            ctx.events.bone_snapped(name, snapped);
            joint.snapped = snapped;
        }

        joint.rebuild_override();
    }
}

// ============================================================================
// IK 求解
// ============================================================================

/// IK 求解遍历：只处理 IK 驱动的关节，全零限制的关节自由转动
pub(crate) fn solve_ik(
    ctx: &SolveContext,
    table: &mut BoneOverrideTable,
    set: &mut WorkingSet,
    decay: f32,
    limit: bool,
) {
    let cfg = ctx.config;
    let damp = damping(ctx, set.state);

    for i in 0..set.len() {
        let slot = set.joint(i).slot;
        let Some(joint) = table.get(slot).and_then(|e| e.physics()) else {
            continue;
        };
        if !joint.active || joint.role == JointRole::ModelRoot || !joint.is_ik_controlled() {
            continue;
        }

        let g = gradient(ctx, table, set, i, joint.current_angles);
        let Some(joint) = table.get_mut(slot).and_then(|e| e.physics_mut()) else {
            continue;
        };

        let step = if joint.ik_speed == 0.0 { cfg.ik_speed } else { joint.ik_speed };
        // IK 中每个关节按单个效应器归一化
        let fac = decay * cfg.gradient_norm.sqrt() * step;
        let limits = joint.limits;
        let clamp = limit && !limits.is_free();
        step_angles(joint, g.del, fac, damp, clamp.then_some(&limits));
        joint.rebuild_override();
    }
}
