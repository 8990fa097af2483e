//! 布娃娃 / IK 运行时
//!
//! 每个模型实例持有一个 `Ragdoll`：工作集、随机数发生器和静止通知标记。
//! 所有状态都在实例内部，多个实例可以在不同线程上同时更新。
//!
//! 一次布娃娃 tick：
//! 1. 推进每个关节的状态机，得到汇总状态
//! 2. Settled 时直接返回（只通知一次）
//! 3. 重建工作集，迭代 { 更新位置 -> 追踪目标 -> 求解 }
//! 4. 最后再更新一次位置，得到包围盒和质心

use glam::{Mat4, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::RagdollConfig;
use super::effector::{ik_reposition, match_original, settle_effectors};
use super::params::{IkJointParams, RagdollStartParams};
use super::rig::{JointSpec, RagdollRig};
use super::solver::{solve, solve_ik};
use super::state::{disturb, update_joint_state, AggregateState, SolveState};
use super::working_set::{SolveContext, WorkingSet};
use crate::animation::AnimPlayback;
use crate::math::origin;
use crate::skeleton::{
    AngleLimits, AnimRequest, BoneOverride, BoneOverrideTable, ComposeMode, EndBehavior,
    JointFlags, JointRole, OverrideMode, PhysicsJoint, PoseComposer, SkeletonSource,
};
use crate::{Result, RigError};

/// 把条目切换为物理接管；返回关节以及它之前是否已经是物理关节
///
/// 原有的动画保留在关节上继续驱动合成。
fn take_physics(entry: &mut BoneOverride, role: JointRole, now: i32) -> (Box<PhysicsJoint>, bool) {
    match std::mem::take(&mut entry.mode) {
        OverrideMode::Physics(joint) => (joint, true),
        OverrideMode::Animation(anim) => {
            let mut joint = Box::new(PhysicsJoint::new(role, JointFlags::empty(), 0.0, AngleLimits::default(), now));
            joint.anim = Some(anim);
            (joint, false)
        }
        _ => (
            Box::new(PhysicsJoint::new(role, JointFlags::empty(), 0.0, AngleLimits::default(), now)),
            false,
        ),
    }
}

/// 集中在限制中点附近的初始角度
fn central_angles(limits: &AngleLimits, rng: &mut StdRng) -> Vec3 {
    let mut angles = Vec3::ZERO;
    for k in 0..3 {
        let s = rng.random_range(-1.0f32..=1.0)
            * rng.random_range(-1.0f32..=1.0)
            * rng.random_range(-1.0f32..=1.0)
            * 0.5
            + 0.5;
        angles[k] = (limits.min[k] - limits.max[k]) * s + limits.max[k];
    }
    angles
}

/// 布娃娃 / IK 求解状态
#[derive(Clone, Debug)]
pub struct Ragdoll {
    set: WorkingSet,
    rng: StdRng,
    settled_notified: bool,
}

impl Ragdoll {
    pub fn new(seed: u64) -> Self {
        Self {
            set: WorkingSet::new(),
            rng: StdRng::seed_from_u64(seed),
            settled_notified: false,
        }
    }

    #[inline]
    pub fn working_set(&self) -> &WorkingSet {
        &self.set
    }

    /// 包围盒（相对实体原点）
    #[inline]
    pub fn bounds(&self) -> (Vec3, Vec3) {
        self.set.bounds()
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        self.set.center()
    }

    pub fn reset(&mut self) {
        self.set.clear();
        self.settled_notified = false;
    }

    fn build(&mut self, ctx: &SolveContext, table: &mut BoneOverrideTable) -> Result<()> {
        self.set
            .build(ctx.skeleton, ctx.topology, table, ctx.config.max_physics_joints)
    }

    /// 关节的通用初始化
    ///
    /// `fresh` 为 true 时同时重置角度、速度和状态机。
    #[allow(clippy::too_many_arguments)]
    fn configure_joint(
        &mut self,
        joint: &mut PhysicsJoint,
        role: JointRole,
        flags: JointFlags,
        radius: f32,
        limits: AngleLimits,
        now: i32,
        fresh: bool,
    ) {
        joint.active = true;
        joint.role = role;
        joint.flags = flags;
        joint.radius = radius;
        joint.weight = 1.0;
        joint.limits = if role == JointRole::Passive { AngleLimits::default() } else { limits };
        joint.start_time = now;
        joint.gravity_pull = 0.0;
        joint.velocity = Vec3::ZERO;
        joint.solid_count = 0;
        joint.snapped = false;
        joint.offset_rotation = 0.0;
        joint.gradient_speed = None;
        joint.goal_override = None;

        if !fresh {
            return;
        }
        joint.override_matrix = Mat4::IDENTITY;
        joint.velocity_effector = Vec3::ZERO;
        joint.velocity_root = Vec3::ZERO;
        joint.last_position = Vec3::ZERO;
        joint.last_shot_dir = Vec3::ZERO;
        joint.dynamic_since = Some(now);
        joint.rest_since = None;
        joint.current_angles = match role {
            JointRole::Pcj => central_angles(&joint.limits, &mut self.rng),
            _ => Vec3::ZERO,
        };
        joint.last_angles = joint.current_angles;
    }

    // ========================================================================
    // 布娃娃
    // ========================================================================

    /// 启动布娃娃：登记骨架、冻结死亡动画、预求解到当前动画姿态
    ///
    /// `ctx.params` 应为 `RagdollStartParams::settle_params()` 的结果。
    pub fn start(
        &mut self,
        ctx: &SolveContext,
        table: &mut BoneOverrideTable,
        rig: &RagdollRig,
        start: &RagdollStartParams,
    ) -> Result<()> {
        let skeleton = ctx.skeleton;

        let pose = PoseComposer::new(skeleton, ctx.topology, table, ctx.base_frame, ctx.now)
            .compose(ComposeMode::Full);

        let mut registered: Vec<(usize, Vec3, &JointSpec)> = Vec::with_capacity(rig.joints.len());
        for spec in &rig.joints {
            let Some(bone) = skeleton.find_bone(&spec.name) else {
                log::debug!("[Ragdoll] 骨架中没有骨骼 {}，跳过", spec.name);
                continue;
            };
            match table.add_bone(bone) {
                Ok(slot) => registered.push((slot, origin(&ctx.pose_world(&pose, bone)), spec)),
                Err(e) => log::warn!("[Ragdoll] 无法登记骨骼 {}: {}", spec.name, e),
            }
        }

        let freeze = AnimRequest::new(start.start_frame, start.end_frame - 1, 1.0).freeze();
        for name in &rig.freeze_bones {
            if let Err(e) = table.set_animation(skeleton, name, &freeze, ctx.now) {
                log::debug!("[Ragdoll] 冻结动画失败 {}: {}", name, e);
            }
        }

        for &(slot, original, spec) in &registered {
            let Some(entry) = table.get_mut(slot) else {
                continue;
            };
            let (mut joint, was_physics) = take_physics(entry, spec.role, ctx.now);
            self.configure_joint(
                &mut joint,
                spec.role,
                spec.flags,
                spec.radius,
                spec.effective_limits(),
                ctx.now,
                !was_physics,
            );
            joint.reference_origin = start.position;
            joint.original_origin = original;
            entry.mode = OverrideMode::Physics(joint);
        }

        self.build(ctx, table)?;
        self.set.state = SolveState::Dynamic;
        self.settled_notified = false;
        self.set.update_positions(ctx, table);

        let span = ctx.config.pre_settle_span;
        for k in 0..ctx.config.pre_settle_iterations {
            settle_effectors(ctx, table, &mut self.set, &mut self.rng);
            self.set.update_positions(ctx, table);
            match_original(table, &mut self.set);
            solve(ctx, table, &mut self.set, 1.0 - k as f32 / span, false);
        }

        log::info!("[Ragdoll] 布娃娃启动: {} 个关节", self.set.len());
        Ok(())
    }

    /// 每 tick 更新；IK 关节存在时改为 IK 求解
    pub fn tick(&mut self, ctx: &SolveContext, table: &mut BoneOverrideTable, force_solve: bool) -> Result<SolveState> {
        let any_ik = table
            .iter()
            .any(|(_, e)| e.physics().is_some_and(|j| j.active && j.is_ik_controlled()));
        if any_ik {
            self.tick_ik(ctx, table)
        } else {
            self.tick_ragdoll(ctx, table, force_solve)
        }
    }

    fn tick_ragdoll(&mut self, ctx: &SolveContext, table: &mut BoneOverrideTable, force_solve: bool) -> Result<SolveState> {
        let cfg = ctx.config;
        let mut agg = AggregateState::new();
        let mut active = 0;
        for (_, entry) in table.iter_mut() {
            if let Some(joint) = entry.physics_mut().filter(|j| j.active) {
                agg.merge(&update_joint_state(joint, ctx.params.position, ctx.now, force_solve, cfg));
                active += 1;
            }
        }
        if active == 0 {
            return Err(RigError::NoActiveJoints);
        }

        if agg.state != self.set.state {
            log::debug!("[Ragdoll] 状态 {:?} -> {:?}", self.set.state, agg.state);
        }
        self.set.state = agg.state;

        if agg.state == SolveState::Settled {
            if !self.settled_notified {
                self.settled_notified = true;
                ctx.events.ragdoll_settled();
            }
            return Ok(SolveState::Settled);
        }
        self.settled_notified = false;

        let mut iterations = if agg.state == SolveState::Dynamic {
            cfg.dynamic_iterations
        } else {
            cfg.settling_iterations
        };
        if agg.drop < -cfg.fast_drop_distance {
            iterations *= 2;
        }

        self.build(ctx, table)?;
        for _ in 0..iterations {
            self.set.update_positions(ctx, table);
            settle_effectors(ctx, table, &mut self.set, &mut self.rng);
            solve(ctx, table, &mut self.set, agg.decay * 2.0, true);
        }
        self.set.update_positions(ctx, table);
        Ok(agg.state)
    }

    /// 冲击：沿射击方向推动所有布娃娃关节，距离越近越强
    pub fn impact(&mut self, table: &mut BoneOverrideTable, config: &RagdollConfig, hit: Vec3, shot_start: Vec3, now: i32) -> usize {
        if !config.kick_bones {
            return 0;
        }
        let dir = hit - shot_start;
        if dir.length() < 1.0 {
            return 0;
        }
        let dir = dir.normalize();

        let mut kicked = 0;
        for (_, entry) in table.iter_mut() {
            let Some(joint) = entry.physics_mut().filter(|j| j.active) else {
                continue;
            };
            joint.last_shot_dir = dir;
            let dist = (joint.last_position - hit).length().max(1.0);
            let effect = config.impact_strength / (dist * dist);
            let r = self.rng.random_range(0.0..=config.impact_random);
            let s = effect + r;
            joint.velocity_effector = Vec3::new(dir.x * s, dir.y * s, dir.z.abs() * s);
            disturb(joint, now);
            kicked += 1;
        }
        kicked
    }

    // ========================================================================
    // IK
    // ========================================================================

    /// 登记标准效应器（不参与求解，等待 `activate_ik_joint`）
    pub fn init_ik(&mut self, skeleton: &dyn SkeletonSource, table: &mut BoneOverrideTable, rig: &RagdollRig, now: i32) -> Result<usize> {
        let mut count = 0;
        for (name, radius) in &rig.ik_effectors {
            let Some(bone) = skeleton.find_bone(name) else {
                log::debug!("[IK] 骨架中没有骨骼 {}，跳过", name);
                continue;
            };
            let slot = match table.add_bone(bone) {
                Ok(slot) => slot,
                Err(e) => {
                    log::warn!("[IK] 无法登记效应器 {}: {}", name, e);
                    continue;
                }
            };
            let Some(entry) = table.get_mut(slot) else {
                continue;
            };
            if entry.is_active_joint() {
                continue;
            }
            let (mut joint, _) = take_physics(entry, JointRole::Pcj, now);
            joint.active = false;
            joint.role = JointRole::Pcj;
            joint.flags = JointFlags::EFFECTOR;
            joint.radius = *radius;
            joint.limits = AngleLimits::default();
            joint.dynamic_since = Some(now);
            entry.mode = OverrideMode::Physics(joint);
            count += 1;
        }

        if count == 0 {
            return Err(RigError::NoActiveJoints);
        }
        log::info!("[IK] 初始化: {} 个效应器", count);
        Ok(count)
    }

    /// 把一个关节切换为 IK 驱动；已经在求解中的关节返回 Ok(false)
    pub fn activate_ik_joint(
        &mut self,
        ctx: &SolveContext,
        table: &mut BoneOverrideTable,
        name: &str,
        params: &IkJointParams,
    ) -> Result<bool> {
        let skeleton = ctx.skeleton;
        let bone = skeleton
            .find_bone(name)
            .ok_or_else(|| RigError::UnknownBone(name.to_string()))?;
        let slot = table.add_bone(bone)?;
        if table.get(slot).is_some_and(|e| e.is_active_joint()) {
            log::debug!("[IK] {} 已在求解中", name);
            return Ok(false);
        }

        let original = {
            let composer = PoseComposer::new(skeleton, ctx.topology, table, ctx.base_frame, ctx.now);
            let joint = composer.bone_matrix(bone) * skeleton.base_pose(bone);
            origin(&(ctx.params.world_matrix() * crate::math::scale_origin(joint, ctx.params.scale)))
        };

        let entry = table.get_mut(slot).ok_or(RigError::InvalidOverride(slot))?;
        let (mut joint, _) = take_physics(entry, JointRole::Pcj, ctx.now);
        joint.ik_speed = ctx.config.ik_speed;
        joint.ik_position = Vec3::ZERO;
        joint.reference_origin = params.position;
        joint.original_origin = original;

        let end = params.end_frame - 1;
        let same_range = joint
            .anim
            .as_ref()
            .is_some_and(|a| a.start_frame == params.start_frame && a.end_frame == end);
        let frames = skeleton.frame_count();
        let in_range = params.end_frame > params.start_frame
            && params.start_frame >= 0
            && (params.start_frame as usize) < frames
            && params.end_frame <= frames as i32;
        if (!same_range || params.force_anim) && in_range {
            joint.anim = Some(AnimPlayback::new(params.start_frame, end, 1.0, EndBehavior::Freeze, ctx.now, None));
        }

        let flags = params.flags.unwrap_or(JointFlags::IK_CONTROLLED | JointFlags::EFFECTOR);
        self.configure_joint(&mut joint, JointRole::Pcj, flags, params.radius, params.limits, ctx.now, true);
        entry.mode = OverrideMode::Physics(joint);

        self.build(ctx, table)?;
        for j in self.set.joints() {
            if let Some(joint) = table.get_mut(j.slot).and_then(|e| e.physics_mut()) {
                joint.reference_origin = params.position;
            }
        }
        log::debug!("[IK] {} 切换为 IK 驱动", name);
        Ok(true)
    }

    /// 取消 IK 驱动；关节不在求解中时返回 false
    pub fn deactivate_ik_joint(&mut self, skeleton: &dyn SkeletonSource, table: &mut BoneOverrideTable, name: &str) -> Result<bool> {
        let bone = skeleton
            .find_bone(name)
            .ok_or_else(|| RigError::UnknownBone(name.to_string()))?;
        let Some(joint) = table
            .find_bone(bone)
            .and_then(|slot| table.get_mut(slot))
            .and_then(|e| e.physics_mut())
            .filter(|j| j.active)
        else {
            return Ok(false);
        };
        joint.active = false;
        joint.flags.remove(JointFlags::IK_CONTROLLED);
        Ok(true)
    }

    /// 释放所有物理关节
    pub fn reset_ik(&mut self, table: &mut BoneOverrideTable) {
        let slots: Vec<usize> = table
            .iter()
            .filter(|(_, e)| e.is_physics())
            .map(|(i, _)| i)
            .collect();
        for slot in slots {
            if let Some(entry) = table.get_mut(slot) {
                entry.mode = OverrideMode::Idle;
            }
            match table.remove(slot) {
                Ok(true) => {}
                Ok(false) => log::debug!("[IK] 槽位 {} 仍被占用，未释放", slot),
                Err(e) => log::debug!("[IK] 释放槽位 {} 失败: {}", slot, e),
            }
        }
        self.reset();
    }

    /// 设置所有求解关节的 IK 目标
    pub fn ik_move(&mut self, ctx: &SolveContext, table: &mut BoneOverrideTable, desired: Vec3, speed: f32) -> Result<()> {
        self.build(ctx, table)?;
        for j in self.set.joints() {
            if let Some(joint) = table.get_mut(j.slot).and_then(|e| e.physics_mut()) {
                joint.reference_origin = ctx.params.position;
                joint.ik_position = desired;
                joint.ik_speed = speed;
            }
        }
        Ok(())
    }

    fn tick_ik(&mut self, ctx: &SolveContext, table: &mut BoneOverrideTable) -> Result<SolveState> {
        self.build(ctx, table)?;
        self.set.state = SolveState::Dynamic;
        for _ in 0..ctx.config.ik_iterations {
            self.set.update_positions(ctx, table);
            ik_reposition(ctx, table, &mut self.set, &mut self.rng);
            solve_ik(ctx, table, &mut self.set, 2.0, true);
        }
        self.set.update_positions(ctx, table);
        Ok(SolveState::Dynamic)
    }
}
