//! 布娃娃工作集
//!
//! 每次布娃娃/IK 更新开始时，从覆盖表中收集所有物理关节，
//! 按 (深度, 骨骼索引) 排成父在前的扁平数组。工作集由模型实例独占，
//! 不在实例之间共享，因此可以并行更新多个实例。
//!
//! 依赖列表（每个关节在工作集中的后代）只在关节集合变化时重算。

use glam::{Mat4, Vec3};

use super::collision::CollisionTracer;
use super::config::RagdollConfig;
use super::events::RagdollEvents;
use super::params::RagdollUpdateParams;
use super::state::SolveState;
use crate::math::{has_nan, origin, scale_origin};
use crate::skeleton::{
    BoneOverrideTable, ComposeMode, JointRole, PoseBuffer, PoseComposer, SkeletonSource,
    SkeletonTopology,
};
use crate::{Result, RigError};

// ============================================================================
// 求解上下文
// ============================================================================

/// 一次更新中只读的输入
pub struct SolveContext<'a> {
    pub skeleton: &'a dyn SkeletonSource,
    pub topology: &'a SkeletonTopology,
    pub config: &'a RagdollConfig,
    pub tracer: &'a dyn CollisionTracer,
    pub events: &'a dyn RagdollEvents,
    pub params: &'a RagdollUpdateParams,
    /// 没有动画的骨骼使用的帧
    pub base_frame: usize,
    pub now: i32,
}

impl<'a> SolveContext<'a> {
    /// 只使用给定动画帧合成的姿态（忽略所有覆盖）
    pub fn animation_pose(&self, table: &BoneOverrideTable, frame: usize) -> PoseBuffer {
        PoseComposer::new(self.skeleton, self.topology, table, self.base_frame, self.now)
            .compose(ComposeMode::AnimationOnly(frame))
    }

    /// 姿态中某个关节的世界矩阵
    pub fn pose_world(&self, pose: &PoseBuffer, bone: usize) -> Mat4 {
        self.params.world_matrix() * scale_origin(pose.joint(self.skeleton, bone), self.params.scale)
    }
}

// ============================================================================
// 工作集
// ============================================================================

/// 工作集中的一个关节
#[derive(Clone, Debug, PartialEq)]
pub struct RagJoint {
    /// 覆盖表槽位
    pub slot: usize,
    pub bone: usize,
    /// 最近的处于激活状态的祖先关节
    pub parent_joint: Option<usize>,
    /// 工作集中的全部后代，按离根距离升序
    pub dependents: Vec<usize>,
}

/// 期望位置的来源
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GoalSource {
    #[default]
    None,
    /// 骨盆静止高度
    PelvisRest,
    /// 外部指定的目标
    Override,
    /// 自由运动积分
    Physics,
    /// 运动积分失败，退回实体原点
    EntityOrigin,
    /// 卡在固体中，回到动画帧中的位置
    BasePose,
    /// 卡在固体中，从实体原点方向推出
    PushOut,
    /// IK 目标
    Ik,
    /// 启动时的原始位置
    Original,
}

/// 关节在当前迭代中的位置与目标
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct RagEffector {
    pub radius: f32,
    pub weight: f32,
    pub current_origin: Vec3,
    pub desired_direction: Vec3,
    pub desired_origin: Vec3,
    pub goal_source: GoalSource,
}

/// 扁平化的布娃娃工作集
#[derive(Clone, Debug, Default)]
pub struct WorkingSet {
    joints: Vec<RagJoint>,
    effectors: Vec<RagEffector>,
    world: Vec<Mat4>,
    joint_of_bone: Vec<Option<usize>>,
    /// (槽位, 骨骼, 是否激活)，用于判断是否需要重建依赖
    signature: Vec<(usize, usize, bool)>,
    pelvis: Option<usize>,
    bounds_min: Vec3,
    bounds_max: Vec3,
    center: Vec3,
    pose: PoseBuffer,
    /// 骨盆希望移动的位移（世界空间）
    pub desired_pelvis_offset: Option<Vec3>,
    /// 本次更新的汇总状态
    pub state: SolveState,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    #[inline]
    pub fn joints(&self) -> &[RagJoint] {
        &self.joints
    }

    #[inline]
    pub fn joint(&self, index: usize) -> &RagJoint {
        &self.joints[index]
    }

    #[inline]
    pub fn effector(&self, index: usize) -> &RagEffector {
        &self.effectors[index]
    }

    #[inline]
    pub fn effector_mut(&mut self, index: usize) -> &mut RagEffector {
        &mut self.effectors[index]
    }

    /// 关节的世界矩阵（最近一次 `update_positions` 的结果）
    #[inline]
    pub fn world(&self, index: usize) -> Mat4 {
        self.world[index]
    }

    /// 骨骼在工作集中的位置
    pub fn joint_index(&self, bone: usize) -> Option<usize> {
        self.joint_of_bone.get(bone).copied().flatten()
    }

    /// 骨盆关节
    #[inline]
    pub fn pelvis(&self) -> Option<usize> {
        self.pelvis
    }

    /// 包围盒（相对实体原点）
    #[inline]
    pub fn bounds(&self) -> (Vec3, Vec3) {
        (self.bounds_min, self.bounds_max)
    }

    /// 质心（取骨盆位置）
    #[inline]
    pub fn center(&self) -> Vec3 {
        self.center
    }

    #[inline]
    pub fn pose(&self) -> &PoseBuffer {
        &self.pose
    }

    pub fn clear(&mut self) {
        self.joints.clear();
        self.effectors.clear();
        self.world.clear();
        self.joint_of_bone.clear();
        self.signature.clear();
        self.pelvis = None;
        self.desired_pelvis_offset = None;
    }

    /// 从覆盖表收集物理关节并排序
    ///
    /// 没有任何物理关节时返回 NoActiveJoints，工作集被清空。
    pub fn build(
        &mut self,
        skeleton: &dyn SkeletonSource,
        topology: &SkeletonTopology,
        table: &mut BoneOverrideTable,
        max_joints: usize,
    ) -> Result<()> {
        let mut found: Vec<(usize, usize, bool)> = table
            .iter()
            .filter_map(|(slot, e)| e.physics().map(|j| (slot, e.bone, j.active)))
            .collect();
        found.sort_by_key(|&(_, bone, _)| (topology.depth(bone), bone));

        if found.len() > max_joints {
            log::warn!("[Ragdoll] 物理关节数 {} 超过上限 {}，多余的被忽略", found.len(), max_joints);
            found.truncate(max_joints);
        }

        for (_, entry) in table.iter_mut() {
            if let Some(joint) = entry.physics_mut() {
                joint.rag_index = None;
            }
        }

        if found.is_empty() {
            self.clear();
            return Err(RigError::NoActiveJoints);
        }

        if found != self.signature {
            self.rebuild(topology, &found);
            self.signature = found;
        }

        // 每次都刷新的数据：半径、权重、基础姿态
        self.pelvis = None;
        for (i, joint) in self.joints.iter().enumerate() {
            let Some(physics) = table.get_mut(joint.slot).and_then(|e| e.physics_mut()) else {
                continue;
            };
            physics.rag_index = Some(i);
            physics.base_pose = skeleton.base_pose(joint.bone);
            physics.base_pose_inv = skeleton.base_pose_inverse(joint.bone);
            if physics.role == JointRole::Pelvis && physics.active && self.pelvis.is_none() {
                self.pelvis = Some(i);
            }

            let e = &mut self.effectors[i];
            e.radius = physics.radius;
            e.weight = physics.weight;
        }
        Ok(())
    }

    /// 重建顺序、父关节和依赖列表
    fn rebuild(&mut self, topology: &SkeletonTopology, found: &[(usize, usize, bool)]) {
        let count = found.len();
        self.joint_of_bone = vec![None; topology.bone_count()];
        for (i, &(_, bone, _)) in found.iter().enumerate() {
            self.joint_of_bone[bone] = Some(i);
        }

        let joint_of_bone = &self.joint_of_bone;
        let active_bone = |bone: usize| joint_of_bone[bone].map_or(false, |j| found[j].2);

        self.joints = found
            .iter()
            .map(|&(slot, bone, _)| RagJoint {
                slot,
                bone,
                parent_joint: topology
                    .nearest_ancestor(bone, active_bone)
                    .and_then(|b| joint_of_bone[b]),
                dependents: topology
                    .descendants(bone)
                    .iter()
                    .filter_map(|&d| joint_of_bone[d])
                    .collect(),
            })
            .collect();

        self.effectors = vec![RagEffector::default(); count];
        self.world = vec![Mat4::IDENTITY; count];
        log::debug!("[Ragdoll] 工作集重建: {} 个关节", count);
    }

    /// 合成当前姿态，更新每个关节的世界矩阵、包围盒和质心
    pub fn update_positions(&mut self, ctx: &SolveContext, table: &BoneOverrideTable) {
        let composer = PoseComposer::new(ctx.skeleton, ctx.topology, table, ctx.base_frame, ctx.now);
        composer.compose_into(ComposeMode::Full, &mut self.pose);

        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);

        for (i, joint) in self.joints.iter().enumerate() {
            let m = ctx.pose_world(&self.pose, joint.bone);
            debug_assert!(!has_nan(&m), "NaN in joint matrix for bone {}", joint.bone);
            self.world[i] = m;

            let o = origin(&m);
            self.effectors[i].current_origin = o;
            min = min.min(o);
            max = max.max(o);
        }

        if self.joints.is_empty() {
            return;
        }

        let pad = Vec3::splat(ctx.config.bounds_padding);
        self.bounds_min = min - ctx.params.position - pad;
        self.bounds_max = max - ctx.params.position + pad;
        self.center = self.effectors[self.pelvis.unwrap_or(0)].current_origin;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collision::NoCollision;
    use crate::physics::events::NullEvents;
    use crate::skeleton::{AngleLimits, JointFlags, OverrideMode, PhysicsJoint, SkeletonBuilder, SkeletonData};

    fn skeleton() -> SkeletonData {
        SkeletonBuilder::new()
            .bone("model_root", None, Mat4::IDENTITY)
            .bone("pelvis", Some("model_root"), Mat4::from_translation(Vec3::new(0.0, 0.0, 40.0)))
            .bone("thoracic", Some("pelvis"), Mat4::from_translation(Vec3::new(0.0, 0.0, 60.0)))
            .bone("rhand", Some("thoracic"), Mat4::from_translation(Vec3::new(0.0, -30.0, 60.0)))
            .build()
            .unwrap()
    }

    fn add_joint(table: &mut BoneOverrideTable, s: &SkeletonData, name: &str, role: JointRole, flags: JointFlags) {
        let i = table.add_or_reuse(s, name).unwrap();
        let joint = PhysicsJoint::new(role, flags, 2.0, AngleLimits::default(), 0);
        table.get_mut(i).unwrap().mode = OverrideMode::Physics(Box::new(joint));
    }

    #[test]
    fn test_parent_first_order_and_dependents() {
        let s = skeleton();
        let topo = SkeletonTopology::build(&s).unwrap();
        let mut table = BoneOverrideTable::new(8);
        // 故意倒序登记
        add_joint(&mut table, &s, "rhand", JointRole::Passive, JointFlags::EFFECTOR);
        add_joint(&mut table, &s, "pelvis", JointRole::Pelvis, JointFlags::empty());

        let mut set = WorkingSet::new();
        set.build(&s, &topo, &mut table, 16).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.joint(0).bone, 1);
        assert_eq!(set.joint(1).bone, 3);
        assert_eq!(set.joint(0).dependents, vec![1]);
        assert_eq!(set.joint(1).parent_joint, Some(0));
        assert_eq!(set.pelvis(), Some(0));
        assert_eq!(table.get(0).unwrap().physics().unwrap().rag_index, Some(1));
    }

    #[test]
    fn test_empty_set_fails() {
        let s = skeleton();
        let topo = SkeletonTopology::build(&s).unwrap();
        let mut table = BoneOverrideTable::new(8);
        let mut set = WorkingSet::new();
        assert!(matches!(set.build(&s, &topo, &mut table, 16), Err(RigError::NoActiveJoints)));
    }

    #[test]
    fn test_truncates_to_limit() {
        let s = skeleton();
        let topo = SkeletonTopology::build(&s).unwrap();
        let mut table = BoneOverrideTable::new(8);
        add_joint(&mut table, &s, "pelvis", JointRole::Pelvis, JointFlags::empty());
        add_joint(&mut table, &s, "thoracic", JointRole::Pcj, JointFlags::EFFECTOR);
        add_joint(&mut table, &s, "rhand", JointRole::Passive, JointFlags::EFFECTOR);

        let mut set = WorkingSet::new();
        set.build(&s, &topo, &mut table, 2).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.joint_index(3), None);
        assert_eq!(table.get(2).unwrap().physics().unwrap().rag_index, None);
    }

    #[test]
    fn test_positions_and_bounds() {
        let s = skeleton();
        let topo = SkeletonTopology::build(&s).unwrap();
        let mut table = BoneOverrideTable::new(8);
        add_joint(&mut table, &s, "pelvis", JointRole::Pelvis, JointFlags::empty());
        add_joint(&mut table, &s, "rhand", JointRole::Passive, JointFlags::EFFECTOR);

        let mut set = WorkingSet::new();
        set.build(&s, &topo, &mut table, 16).unwrap();

        let config = RagdollConfig::default();
        let params = RagdollUpdateParams::new(Vec3::new(100.0, 0.0, 0.0));
        let ctx = SolveContext {
            skeleton: &s,
            topology: &topo,
            config: &config,
            tracer: &NoCollision,
            events: &NullEvents,
            params: &params,
            base_frame: 0,
            now: 0,
        };
        set.update_positions(&ctx, &table);

        assert!((set.effector(0).current_origin - Vec3::new(100.0, 0.0, 40.0)).length() < 1e-4);
        assert!((set.effector(1).current_origin - Vec3::new(100.0, -30.0, 60.0)).length() < 1e-4);
        assert_eq!(set.center(), set.effector(0).current_origin);

        let (min, max) = set.bounds();
        assert!((min - Vec3::new(-10.0, -40.0, 30.0)).length() < 1e-4);
        assert!((max - Vec3::new(10.0, 10.0, 70.0)).length() < 1e-4);
    }
}
