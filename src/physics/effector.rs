//! 效应器目标追踪
//!
//! 每次迭代为每个效应器计算期望位移 `desired_direction`：
//! - 骨盆：给出模型根应当移动的偏移
//! - 外部目标：直接朝目标移动
//! - 卡在固体中：退回动画位置或从实体原点方向推出
//! - 其余：简单的速度积分（重力、质量衰减、反弹）
//!
//! 碰撞全部通过 `CollisionTracer` 查询。

use glam::Vec3;
use rand::rngs::StdRng;
use rand::Rng;

use super::collision::ContentMask;
use super::config::RagToBase;
use super::working_set::{GoalSource, SolveContext, WorkingSet};
use crate::math::{angle_normalize_180, angle_vectors, origin, vector_to_angles, x_axis, YAW};
use crate::skeleton::{BoneOverrideTable, JointFlags, JointRole, PhysicsJoint};

/// 每轴抖动：两个均匀分布相乘，集中在 0 附近
#[inline]
fn jitter(rng: &mut StdRng, amplitude: f32) -> Vec3 {
    let mut v = Vec3::ZERO;
    for k in 0..3 {
        v[k] = rng.random_range(-amplitude..=amplitude) * rng.random_range(-amplitude..=amplitude);
    }
    v
}

// ============================================================================
// 动画参考位置
// ============================================================================

/// 骨盆在动画帧中和当前的位置/朝向
struct PelvisFrame {
    anim_pos: Vec3,
    anim_yaw: f32,
    pos: Vec3,
    yaw: f32,
}

/// 工作集中每个关节在理想动画帧中的世界位置
struct BaseTargets {
    positions: Vec<Vec3>,
    pelvis: Option<PelvisFrame>,
}

impl BaseTargets {
    fn compute(ctx: &SolveContext, table: &BoneOverrideTable, set: &WorkingSet) -> Option<Self> {
        if ctx.config.rag_to_base == RagToBase::Off {
            return None;
        }

        let pose = ctx.animation_pose(table, ctx.params.settle_frame);
        let positions = set
            .joints()
            .iter()
            .map(|j| origin(&ctx.pose_world(&pose, j.bone)))
            .collect();

        let pelvis = match (ctx.config.rag_to_base, set.pelvis()) {
            (RagToBase::PelvisRelative, Some(p)) => {
                let anim = ctx.pose_world(&pose, set.joint(p).bone);
                let current = set.world(p);
                // 只关心水平朝向
                let flat = |v: Vec3| Vec3::new(v.x, v.y, 0.0);
                Some(PelvisFrame {
                    anim_pos: origin(&anim),
                    anim_yaw: vector_to_angles(flat(x_axis(&anim)))[YAW],
                    pos: origin(&current),
                    yaw: vector_to_angles(flat(x_axis(&current)))[YAW],
                })
            }
            _ => None,
        };

        Some(Self { positions, pelvis })
    }
}

/// 绕骨盆把动画位置旋到当前朝向，再平移到当前骨盆位置
///
/// yaw 差值变化小于滞回角时沿用上一次的旋转，避免目标随骨盆抖动。
fn pelvis_relative(base: Vec3, pelvis: &PelvisFrame, offset_rotation: &mut f32, hysteresis: f32) -> Vec3 {
    let mut fa = angle_normalize_180(pelvis.anim_yaw - pelvis.yaw);
    if (fa - *offset_rotation).abs() > hysteresis {
        *offset_rotation = fa;
    } else {
        fa = *offset_rotation;
    }

    let v = base - pelvis.anim_pos;
    let f = v.length();
    let mut a = vector_to_angles(v);
    a[YAW] -= fa;
    let (dir, _, _) = angle_vectors(a);
    let rotated = pelvis.anim_pos + dir.normalize_or_zero() * f;

    pelvis.pos + (rotated - pelvis.anim_pos)
}

// ============================================================================
// 布娃娃目标
// ============================================================================

/// 为每个效应器计算本次迭代的期望位移；返回是否有关节卡在固体中
pub(crate) fn settle_effectors(
    ctx: &SolveContext,
    table: &mut BoneOverrideTable,
    set: &mut WorkingSet,
    rng: &mut StdRng,
) -> bool {
    let cfg = ctx.config;
    let pos = ctx.params.position;
    let scale = ctx.params.effective_scale();
    let base = BaseTargets::compute(ctx, table, set);
    let mut any_solid = false;

    for i in 0..set.len() {
        let (slot, bone, parent) = {
            let j = set.joint(i);
            (j.slot, j.bone, j.parent_joint)
        };
        let parent_origin = parent.map(|p| set.effector(p).current_origin);
        let Some(joint) = table.get_mut(slot).and_then(|e| e.physics_mut()) else {
            continue;
        };
        if !joint.active {
            continue;
        }
        let cur = set.effector(i).current_origin;

        if joint.role == JointRole::Pelvis {
            let goal = pos + Vec3::new(0.0, 0.0, cfg.pelvis_rest_height + joint.radius * scale.z + cfg.pelvis_lift);
            set.desired_pelvis_offset = Some(goal - cur);
            let e = set.effector_mut(i);
            e.desired_origin = goal;
            e.goal_source = GoalSource::PelvisRest;
            joint.last_position = cur;
            continue;
        }

        if !joint.is_effector() {
            continue;
        }

        if let Some(goal) = joint.goal_override {
            let e = set.effector_mut(i);
            e.desired_origin = goal;
            e.desired_direction = goal - cur + joint.velocity_effector * cfg.velocity_effector_scale;
            e.goal_source = GoalSource::Override;
            joint.velocity_effector *= cfg.velocity_effector_damping;
            joint.solid_count = 0;
            joint.last_position = cur;
            continue;
        }

        let maxs = Vec3::splat(joint.radius) * scale;
        let mins = -maxs;

        let base_pos = base.as_ref().map(|b| match &b.pelvis {
            Some(pelvis) => pelvis_relative(b.positions[i], pelvis, &mut joint.offset_rotation, cfg.rag_to_base_hysteresis),
            None => b.positions[i],
        });

        let tr = ctx.tracer.trace(cur, mins, maxs, parent_origin.unwrap_or(pos), ctx.params.entity, ContentMask::RAGDOLL);

        let start_solid = tr.blocked();
        let (goal, source) = if start_solid {
            any_solid = true;
            let (mut goal, source) = match base_pos {
                Some(b) => (b, GoalSource::BasePose),
                None => (pos + (cur - pos).normalize_or_zero() * cfg.push_distance, GoalSource::PushOut),
            };
            // 地面上方，考虑盒子尺寸
            goal.z = pos.z - cfg.floor_offset - mins.z;
            let tr = ctx.tracer.trace(pos, mins, maxs, goal, ctx.params.entity, ContentMask::RAGDOLL);
            (tr.end_pos, source)
        } else {
            // 朝动画位置（或远离父关节）轻推，z 交给重力
            let hint = match (base_pos, parent_origin) {
                (Some(b), _) => b - cur,
                (None, Some(p)) => cur - p,
                (None, None) => cur - pos,
            };
            if hint.length() > cfg.hint_min_distance {
                let mut push = hint.normalize() * cfg.hint_speed;
                push.z = 0.0;
                joint.velocity += push;
            }

            // 轻的肢体反向拖在身体后面
            if joint.flags.contains(JointFlags::LIGHTWEIGHT) {
                let drag = -(ctx.params.velocity * cfg.lightweight_drag).clamp_length_max(cfg.lightweight_drag_cap);
                if drag.z != 0.0 {
                    joint.velocity = drag;
                } else {
                    joint.velocity += drag;
                }
            }

            match apply_real_bone_physics(ctx, joint, cur, mins, maxs) {
                Some(goal) => (goal, GoalSource::Physics),
                None => (pos, GoalSource::EntityOrigin),
            }
        };

        if start_solid {
            joint.solid_count += 1;
            if joint.solid_count == cfg.stuck_notify_count + 1 {
                ctx.events.bone_in_solid(ctx.skeleton.bone_name(bone), cur, joint.solid_count);
            }
            if joint.solid_count == cfg.stuck_log_count + 1 {
                log::debug!(
                    "[Ragdoll] 骨骼 {} 长时间卡在固体中 (solid count {})",
                    ctx.skeleton.bone_name(bone),
                    joint.solid_count
                );
            }
        } else {
            joint.solid_count = 0;
        }

        let mut desired = goal - cur;
        if let Some(cap) = cfg.direction_cap {
            let mut cap = cap;
            if joint.solid_count > cfg.direction_cap_solid_count {
                desired *= (joint.solid_count as f32 * 0.2).min(16.0);
                cap *= 8.0;
            }
            desired = desired.clamp(Vec3::splat(-cap), Vec3::splat(cap));
        }
        desired += joint.velocity_effector * cfg.velocity_effector_scale + jitter(rng, cfg.jitter);
        joint.velocity_effector *= cfg.velocity_effector_damping;
        joint.last_position = cur;

        let e = set.effector_mut(i);
        e.desired_origin = goal;
        e.desired_direction = desired;
        e.goal_source = source;
    }

    any_solid
}

/// 速度积分一步；返回 None 表示起点已在固体中，无法得到目标
pub(crate) fn apply_real_bone_physics(
    ctx: &SolveContext,
    joint: &mut PhysicsJoint,
    cur: Vec3,
    mins: Vec3,
    maxs: Vec3,
) -> Option<Vec3> {
    let cfg = ctx.config;
    let entity = ctx.params.entity;
    let ground = ctx.tracer.trace(cur, mins, maxs, cur - Vec3::Z, entity, ContentMask::RAGDOLL);

    let on_ground = if cfg.gravity != 0.0 {
        let on_ground = ground.hit_entity.is_some();
        if on_ground {
            joint.gravity_pull = 0.0;
        } else {
            // 实体本身还在动时不累积
            if ctx.params.velocity.z == 0.0 {
                joint.gravity_pull += cfg.gravity;
            }
            joint.gravity_pull = joint.gravity_pull.min(cfg.max_gravity_pull);
            joint.velocity.z -= joint.gravity_pull;
        }
        on_ground
    } else {
        ground.hit() && !ground.start_solid && !ground.all_solid
    };

    if joint.velocity == Vec3::ZERO {
        return Some(cur);
    }

    let projected = cur + joint.velocity * cfg.velocity_scale;
    joint.velocity *= 1.0 - cfg.bone_mass;
    let speed = joint.velocity.length();

    if speed < 1.0 && on_ground {
        joint.velocity = Vec3::ZERO;
        joint.gravity_pull = 0.0;
        return Some(cur);
    }

    let tr = ctx.tracer.trace(cur, mins, maxs, projected, entity, ContentMask::RAGDOLL);
    if tr.start_solid || tr.all_solid {
        return None;
    }
    if tr.fraction == 1.0 {
        return Some(tr.end_pos);
    }

    if cfg.bounce != 0.0 {
        let bounce = tr.plane_normal * speed * cfg.bounce;
        if bounce.z > 0.0 {
            joint.gravity_pull = (joint.gravity_pull - bounce.z * (1.0 - cfg.bone_mass)).max(0.0);
        }
        joint.velocity += bounce;
    } else {
        joint.velocity.x = 0.0;
        joint.velocity.y = 0.0;
        if cfg.gravity == 0.0 {
            joint.velocity.z = 0.0;
        }
    }

    Some(tr.end_pos)
}

// ============================================================================
// 启动 / IK 目标
// ============================================================================

/// 预求解时把每个效应器拉回启动时记录的位置
pub(crate) fn match_original(table: &mut BoneOverrideTable, set: &mut WorkingSet) {
    set.desired_pelvis_offset = None;
    for i in 0..set.len() {
        let slot = set.joint(i).slot;
        let Some(joint) = table.get_mut(slot).and_then(|e| e.physics_mut()) else {
            continue;
        };
        if !joint.active || !joint.is_effector() {
            continue;
        }
        let e = set.effector_mut(i);
        e.desired_origin = joint.original_origin;
        e.desired_direction = joint.original_origin - e.current_origin;
        e.goal_source = GoalSource::Original;
        joint.last_position = e.current_origin;
    }
}

/// IK 迭代：每个效应器朝 IK 目标移动
pub(crate) fn ik_reposition(
    ctx: &SolveContext,
    table: &mut BoneOverrideTable,
    set: &mut WorkingSet,
    rng: &mut StdRng,
) {
    let cfg = ctx.config;
    for i in 0..set.len() {
        let slot = set.joint(i).slot;
        let Some(joint) = table.get_mut(slot).and_then(|e| e.physics_mut()) else {
            continue;
        };
        if !joint.active || !joint.is_effector() {
            continue;
        }
        let e = set.effector_mut(i);
        e.desired_origin = joint.ik_position;
        e.desired_direction = joint.ik_position - e.current_origin
            + joint.velocity_effector * cfg.ik_velocity_scale
            + jitter(rng, cfg.jitter);
        e.goal_source = GoalSource::Ik;
        joint.velocity_effector *= cfg.ik_velocity_damping;
        joint.last_position = e.current_origin;
    }
}
