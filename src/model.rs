//! 模型实例
//!
//! 一个 `ModelInstance` 对应场景中的一个角色：共享的骨架与拓扑、
//! 自己的覆盖表、布娃娃状态和配置快照。所有修改都通过实例进行，
//! 不同实例之间没有共享的可变状态。

use std::sync::Arc;

use bitflags::bitflags;
use glam::Vec3;

use crate::animation::{AnimationClock, ManualClock};
use crate::physics::{
    get_config, CollisionTracer, IkJointParams, NoCollision, NullEvents, Ragdoll, RagdollConfig,
    RagdollEvents, RagdollRig, RagdollStartParams, RagdollUpdateParams, ShotWait, SolveContext,
    SolveState,
};
use crate::skeleton::{
    BoneOverrideTable, ComposeMode, JointRole, PelvisOffset, PhysicsJoint, PoseBuffer,
    PoseComposer, SkeletonSource, SkeletonTopology,
};
use crate::{Result, RigError};

bitflags! {
    /// 模型级别的布娃娃标志
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ModelFlags: u32 {
        /// 已请求布娃娃，等待死亡动画
        const RAG_PENDING           = 1 << 0;
        /// 死亡动画已结束
        const RAG_DONE              = 1 << 1;
        /// 布娃娃已启动
        const RAG_STARTED           = 1 << 2;
        /// 死亡过程中撞到了东西
        const COLLISION_DURING_DEATH = 1 << 3;
        /// 死亡过程中在斜面上滑动
        const COLLISION_SLIDE       = 1 << 4;
        /// 强制保持 Dynamic
        const FORCE_SOLVE           = 1 << 5;
    }
}

/// 布娃娃启动请求的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RagdollPhase {
    /// 死亡动画开始
    StartDeathAnim,
    /// 死亡动画结束
    EndDeathAnim,
    /// 死亡过程中发生碰撞
    DeathCollision { slide: bool },
    /// 尸体被击中
    CorpseShot,
    /// 只关闭效应器，不启动
    DisableEffectors,
}

/// 单个关节的 IK 请求
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IkState {
    /// 取消 IK 驱动
    None,
    /// 以给定参数切换为 IK 驱动
    Active(IkJointParams),
}

/// 一次 tick 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// 没有物理关节，只播放动画
    Animated,
    /// 布娃娃或 IK 已求解
    Solved(SolveState),
}

/// 模型实例
pub struct ModelInstance {
    skeleton: Arc<dyn SkeletonSource>,
    topology: Arc<SkeletonTopology>,
    table: BoneOverrideTable,
    config: RagdollConfig,
    rig: RagdollRig,
    events: Arc<dyn RagdollEvents>,
    clock: Arc<dyn AnimationClock>,
    ragdoll: Ragdoll,
    pub flags: ModelFlags,
    /// 没有动画的骨骼使用的帧
    pub base_frame: usize,
}

impl ModelInstance {
    /// 使用全局配置创建
    pub fn new(skeleton: Arc<dyn SkeletonSource>) -> Result<Self> {
        let topology = Arc::new(SkeletonTopology::build(skeleton.as_ref())?);
        Ok(Self::with_topology(skeleton, topology, get_config()))
    }

    /// 使用指定配置创建
    pub fn with_config(skeleton: Arc<dyn SkeletonSource>, config: RagdollConfig) -> Result<Self> {
        let topology = Arc::new(SkeletonTopology::build(skeleton.as_ref())?);
        Ok(Self::with_topology(skeleton, topology, config))
    }

    /// 多个实例共享同一份拓扑
    pub fn with_topology(
        skeleton: Arc<dyn SkeletonSource>,
        topology: Arc<SkeletonTopology>,
        config: RagdollConfig,
    ) -> Self {
        Self {
            table: BoneOverrideTable::new(config.max_override_slots),
            rig: RagdollRig::humanoid(config.radius_scale),
            ragdoll: Ragdoll::new(config.seed),
            events: Arc::new(NullEvents),
            clock: Arc::new(ManualClock::new(0)),
            skeleton,
            topology,
            config,
            flags: ModelFlags::empty(),
            base_frame: 0,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn RagdollEvents>) -> Self {
        self.events = events;
        self
    }

    /// 动画时间来源，默认是停在 0 的 `ManualClock`
    pub fn with_clock(mut self, clock: Arc<dyn AnimationClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_rig(mut self, rig: RagdollRig) -> Self {
        self.rig = rig;
        self
    }

    /// 时钟的当前时间（毫秒）
    #[inline]
    pub fn now(&self) -> i32 {
        self.clock.current_time_ms()
    }

    #[inline]
    pub fn skeleton(&self) -> &dyn SkeletonSource {
        self.skeleton.as_ref()
    }

    #[inline]
    pub fn topology(&self) -> &SkeletonTopology {
        &self.topology
    }

    #[inline]
    pub fn table(&self) -> &BoneOverrideTable {
        &self.table
    }

    #[inline]
    pub fn table_mut(&mut self) -> &mut BoneOverrideTable {
        &mut self.table
    }

    #[inline]
    pub fn config(&self) -> &RagdollConfig {
        &self.config
    }

    #[inline]
    pub fn rig(&self) -> &RagdollRig {
        &self.rig
    }

    #[inline]
    pub fn ragdoll(&self) -> &Ragdoll {
        &self.ragdoll
    }

    /// 拆分借用：求解上下文只读，覆盖表和布娃娃可写
    fn split<'a>(
        &'a mut self,
        tracer: &'a dyn CollisionTracer,
        params: &'a RagdollUpdateParams,
        now: i32,
    ) -> (SolveContext<'a>, &'a mut BoneOverrideTable, &'a mut Ragdoll, &'a RagdollRig) {
        let ctx = SolveContext {
            skeleton: self.skeleton.as_ref(),
            topology: self.topology.as_ref(),
            config: &self.config,
            tracer,
            events: self.events.as_ref(),
            params,
            base_frame: self.base_frame,
            now,
        };
        (ctx, &mut self.table, &mut self.ragdoll, &self.rig)
    }

    /// 时钟当前时间的姿态（模型空间骨骼矩阵）
    pub fn compose(&self) -> PoseBuffer {
        self.compose_at(self.now())
    }

    pub fn compose_at(&self, now: i32) -> PoseBuffer {
        PoseComposer::new(self.skeleton.as_ref(), &self.topology, &self.table, self.base_frame, now)
            .compose(ComposeMode::Full)
    }

    // ========================================================================
    // 每帧更新
    // ========================================================================

    /// 按时钟当前时间推进
    pub fn tick(&mut self, params: &RagdollUpdateParams, tracer: &dyn CollisionTracer) -> Result<TickOutcome> {
        let now = self.now();
        self.tick_at(params, tracer, now)
    }

    /// 推进动画，存在物理关节时运行布娃娃或 IK 求解
    pub fn tick_at(&mut self, params: &RagdollUpdateParams, tracer: &dyn CollisionTracer, now: i32) -> Result<TickOutcome> {
        self.table.advance(now);
        if !self.table.iter().any(|(_, e)| e.is_physics()) {
            return Ok(TickOutcome::Animated);
        }

        let force_solve = self.flags.contains(ModelFlags::FORCE_SOLVE);
        let (ctx, table, ragdoll, _) = self.split(tracer, params, now);
        match ragdoll.tick(&ctx, table, force_solve) {
            Ok(state) => Ok(TickOutcome::Solved(state)),
            Err(RigError::NoActiveJoints) => Ok(TickOutcome::Animated),
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // 布娃娃生命周期
    // ========================================================================

    /// 处理一次布娃娃请求；返回本次是否真正启动
    pub fn start_ragdoll(
        &mut self,
        phase: RagdollPhase,
        params: &RagdollStartParams,
        tracer: &dyn CollisionTracer,
        now: i32,
    ) -> Result<bool> {
        match phase {
            RagdollPhase::StartDeathAnim => {
                self.flags.insert(ModelFlags::RAG_PENDING);
                return Ok(false);
            }
            RagdollPhase::EndDeathAnim => {
                self.flags.insert(ModelFlags::RAG_PENDING | ModelFlags::RAG_DONE);
                let collided = self
                    .flags
                    .intersects(ModelFlags::COLLISION_DURING_DEATH | ModelFlags::COLLISION_SLIDE);
                match self.config.wait_for_shot {
                    ShotWait::Always => return Ok(false),
                    ShotWait::UnlessCollided if !collided => return Ok(false),
                    _ => {}
                }
            }
            RagdollPhase::DeathCollision { slide } => {
                self.flags.insert(if slide {
                    ModelFlags::COLLISION_SLIDE
                } else {
                    ModelFlags::COLLISION_DURING_DEATH
                });
                let wait = self.config.keep_death_anim || self.config.wait_for_shot != ShotWait::Never;
                if wait && !self.flags.contains(ModelFlags::RAG_DONE) {
                    return Ok(false);
                }
            }
            RagdollPhase::CorpseShot => {}
            RagdollPhase::DisableEffectors => return Ok(false),
        }

        if self.flags.contains(ModelFlags::RAG_STARTED) {
            return Ok(false);
        }

        let settle = params.settle_params();
        let (ctx, table, ragdoll, rig) = self.split(tracer, &settle, now);
        ragdoll.start(&ctx, table, rig, params)?;
        self.flags
            .insert(ModelFlags::RAG_PENDING | ModelFlags::RAG_DONE | ModelFlags::RAG_STARTED);
        Ok(true)
    }

    /// 清除布娃娃；未启动时不做任何事
    pub fn reset_ragdoll(&mut self) -> bool {
        if !self.flags.contains(ModelFlags::RAG_STARTED) {
            return false;
        }
        self.table.clear();
        self.ragdoll.reset();
        self.flags
            .remove(ModelFlags::RAG_PENDING | ModelFlags::RAG_DONE | ModelFlags::RAG_STARTED);
        log::info!("[Ragdoll] 布娃娃已重置");
        true
    }

    /// 子弹冲击；返回受影响的关节数
    pub fn apply_impact(&mut self, hit: Vec3, shot_start: Vec3, now: i32) -> usize {
        self.ragdoll
            .impact(&mut self.table, &self.config, hit, shot_start, now)
    }

    // ========================================================================
    // IK
    // ========================================================================

    pub fn init_ik(&mut self, now: i32) -> Result<usize> {
        self.ragdoll
            .init_ik(self.skeleton.as_ref(), &mut self.table, &self.rig, now)
    }

    /// 切换单个关节的 IK 状态；返回状态是否改变
    pub fn set_ik_state(&mut self, name: &str, state: IkState, now: i32) -> Result<bool> {
        match state {
            IkState::None => self
                .ragdoll
                .deactivate_ik_joint(self.skeleton.as_ref(), &mut self.table, name),
            IkState::Active(joint) => {
                let params = joint.update_params();
                let (ctx, table, ragdoll, _) = self.split(&NoCollision, &params, now);
                ragdoll.activate_ik_joint(&ctx, table, name, &joint)
            }
        }
    }

    pub fn reset_ik(&mut self) {
        self.ragdoll.reset_ik(&mut self.table);
        log::info!("[IK] 已重置");
    }

    /// 设置所有 IK 关节的目标位置和速度
    pub fn ik_move(&mut self, params: &RagdollUpdateParams, desired: Vec3, speed: f32, now: i32) -> Result<()> {
        let (ctx, table, ragdoll, _) = self.split(&NoCollision, params, now);
        ragdoll.ik_move(&ctx, table, desired, speed)
    }

    // ========================================================================
    // 单关节覆盖
    // ========================================================================

    fn physics_joint_mut(&mut self, name: &str) -> Result<Option<&mut PhysicsJoint>> {
        let bone = self
            .skeleton
            .find_bone(name)
            .ok_or_else(|| RigError::UnknownBone(name.to_string()))?;
        Ok(self
            .table
            .find_bone(bone)
            .and_then(|slot| self.table.get_mut(slot))
            .and_then(|e| e.physics_mut()))
    }

    /// 固定效应器目标（世界坐标）；关节不是物理关节时返回 false
    pub fn set_effector_goal(&mut self, name: &str, goal: Vec3) -> Result<bool> {
        Ok(self.physics_joint_mut(name)?.map(|j| j.goal_override = Some(goal)).is_some())
    }

    pub fn clear_effector_goal(&mut self, name: &str) -> Result<bool> {
        Ok(self.physics_joint_mut(name)?.map(|j| j.goal_override = None).is_some())
    }

    /// 覆盖单个关节的梯度步长；`None` 恢复默认
    pub fn set_gradient_speed(&mut self, name: &str, speed: Option<f32>) -> Result<bool> {
        Ok(self.physics_joint_mut(name)?.map(|j| j.gradient_speed = speed).is_some())
    }

    fn model_root_mut(&mut self) -> Option<&mut PhysicsJoint> {
        self.table
            .iter_mut()
            .filter_map(|(_, e)| e.physics_mut())
            .find(|j| j.role == JointRole::ModelRoot)
    }

    /// 模型根上的骨盆偏移
    pub fn pelvis_offset(&self) -> Option<PelvisOffset> {
        self.table
            .iter()
            .filter_map(|(_, e)| e.physics())
            .find(|j| j.role == JointRole::ModelRoot)
            .map(|j| j.pelvis_offset)
    }

    pub fn set_pelvis_offset(&mut self, offset: PelvisOffset) -> bool {
        match self.model_root_mut() {
            Some(joint) => {
                joint.pelvis_offset = offset;
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // 求解结果
    // ========================================================================

    /// 包围盒（相对实体原点）；布娃娃未运行时为 None
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        (!self.ragdoll.working_set().is_empty()).then(|| self.ragdoll.bounds())
    }

    pub fn center(&self) -> Option<Vec3> {
        (!self.ragdoll.working_set().is_empty()).then(|| self.ragdoll.center())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::SkeletonBuilder;
    use glam::Mat4;

    fn instance() -> ModelInstance {
        let skeleton = SkeletonBuilder::new()
            .bone("model_root", None, Mat4::IDENTITY)
            .bone("pelvis", Some("model_root"), Mat4::from_translation(Vec3::new(0.0, 0.0, 40.0)))
            .bone("thoracic", Some("pelvis"), Mat4::from_translation(Vec3::new(0.0, 0.0, 60.0)))
            .frame(vec![Mat4::IDENTITY; 3])
            .frame(vec![Mat4::IDENTITY; 3])
            .build()
            .unwrap();
        ModelInstance::with_config(Arc::new(skeleton), RagdollConfig::default()).unwrap()
    }

    fn start(m: &mut ModelInstance, phase: RagdollPhase) -> bool {
        let params = RagdollStartParams::new(Vec3::ZERO, 0, 2);
        m.start_ragdoll(phase, &params, &NoCollision, 0).unwrap()
    }

    #[test]
    fn test_start_death_anim_only_marks_pending() {
        let mut m = instance();
        assert!(!start(&mut m, RagdollPhase::StartDeathAnim));
        assert_eq!(m.flags, ModelFlags::RAG_PENDING);
        assert!(m.table().is_empty());
    }

    #[test]
    fn test_start_once() {
        let mut m = instance();
        assert!(start(&mut m, RagdollPhase::EndDeathAnim));
        assert!(m.flags.contains(ModelFlags::RAG_STARTED));
        assert_eq!(m.ragdoll().working_set().len(), 3);
        assert!(!start(&mut m, RagdollPhase::CorpseShot));
    }

    #[test]
    fn test_wait_for_shot() {
        let mut m = instance();
        m.config.wait_for_shot = ShotWait::Always;
        assert!(!start(&mut m, RagdollPhase::EndDeathAnim));
        assert!(!m.flags.contains(ModelFlags::RAG_STARTED));
        assert!(start(&mut m, RagdollPhase::CorpseShot));
    }

    #[test]
    fn test_collision_waits_for_anim_end() {
        let mut m = instance();
        m.config.keep_death_anim = true;
        assert!(!start(&mut m, RagdollPhase::DeathCollision { slide: true }));
        assert!(m.flags.contains(ModelFlags::COLLISION_SLIDE));

        m.config.wait_for_shot = ShotWait::UnlessCollided;
        // 已经发生过碰撞，动画结束即启动
        assert!(start(&mut m, RagdollPhase::EndDeathAnim));
    }

    #[test]
    fn test_disable_effectors_never_starts() {
        let mut m = instance();
        assert!(!start(&mut m, RagdollPhase::DisableEffectors));
        assert!(m.flags.is_empty());
    }

    #[test]
    fn test_reset_only_when_started() {
        let mut m = instance();
        assert!(!m.reset_ragdoll());
        start(&mut m, RagdollPhase::CorpseShot);
        assert!(m.pelvis_offset().is_some());
        assert!(m.reset_ragdoll());
        assert!(m.table().is_empty());
        assert!(!m.flags.intersects(ModelFlags::RAG_STARTED | ModelFlags::RAG_DONE));
        assert!(m.bounds().is_none());
    }

    #[test]
    fn test_effector_goal_requires_physics_joint() {
        let mut m = instance();
        assert!(!m.set_effector_goal("pelvis", Vec3::ONE).unwrap());
        assert!(matches!(m.set_effector_goal("tail", Vec3::ONE), Err(RigError::UnknownBone(_))));

        start(&mut m, RagdollPhase::CorpseShot);
        assert!(m.set_effector_goal("pelvis", Vec3::ONE).unwrap());
        assert!(m.set_gradient_speed("PELVIS", Some(0.1)).unwrap());
        assert!(m.clear_effector_goal("pelvis").unwrap());
    }

    #[test]
    fn test_tick_without_physics_is_animated() {
        let mut m = instance();
        let params = RagdollUpdateParams::new(Vec3::ZERO);
        assert_eq!(m.tick_at(&params, &NoCollision, 50).unwrap(), TickOutcome::Animated);
    }
}
