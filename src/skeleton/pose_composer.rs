//! 姿态合成
//!
//! 按父在前的顺序遍历骨架：
//!   bone_matrix(b) = bone_matrix(parent) * local(b)
//! local(b) 由动画帧和该骨骼的覆盖共同决定：
//! - 无覆盖 / 动画：动画局部矩阵
//! - 前乘角度：override * anim
//! - 后乘角度：anim * override
//! - 物理（模型根）：override * anim；其余物理关节：anim * override
//!
//! 骨骼使用的动画来自自身或最近的携带动画的祖先，没有则使用实例的基础帧。
//! 合成是只读的，相同状态下两次合成结果逐位相同。

use glam::Mat4;

use super::bone_override::{AnglePlacement, BoneOverride, JointRole, OverrideMode};
use super::override_table::BoneOverrideTable;
use super::topology::SkeletonTopology;
use super::SkeletonSource;
use crate::animation::AnimPlayback;
use crate::math::lerp_matrix;

/// 合成结果缓存：每根骨骼的模型空间矩阵
#[derive(Clone, Debug, Default)]
pub struct PoseBuffer {
    bones: Vec<Mat4>,
}

impl PoseBuffer {
    pub fn new(bone_count: usize) -> Self {
        Self {
            bones: vec![Mat4::IDENTITY; bone_count],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    /// 骨骼矩阵（模型空间，不含基础姿态）
    #[inline]
    pub fn bone(&self, bone: usize) -> Mat4 {
        self.bones[bone]
    }

    /// 关节矩阵：bone_matrix * base_pose
    #[inline]
    pub fn joint(&self, skeleton: &dyn SkeletonSource, bone: usize) -> Mat4 {
        self.bones[bone] * skeleton.base_pose(bone)
    }

    pub fn as_slice(&self) -> &[Mat4] {
        &self.bones
    }
}

/// 合成时是否应用覆盖
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComposeMode {
    /// 动画 + 全部覆盖
    Full,
    /// 只使用给定帧的动画，忽略所有覆盖
    AnimationOnly(usize),
}

/// 姿态合成器（只读视图）
pub struct PoseComposer<'a> {
    skeleton: &'a dyn SkeletonSource,
    topology: &'a SkeletonTopology,
    table: &'a BoneOverrideTable,
    /// bone -> 覆盖条目
    entries: Vec<Option<&'a BoneOverride>>,
    base_frame: usize,
    now: i32,
}

impl<'a> PoseComposer<'a> {
    pub fn new(
        skeleton: &'a dyn SkeletonSource,
        topology: &'a SkeletonTopology,
        table: &'a BoneOverrideTable,
        base_frame: usize,
        now: i32,
    ) -> Self {
        let mut entries = vec![None; skeleton.bone_count()];
        for (_, entry) in table.iter() {
            if let Some(slot) = entries.get_mut(entry.bone) {
                *slot = Some(entry);
            }
        }
        Self {
            skeleton,
            topology,
            table,
            entries,
            base_frame,
            now,
        }
    }

    pub fn table(&self) -> &BoneOverrideTable {
        self.table
    }

    /// 动画帧的局部矩阵（含交叉淡入）
    fn animated_local(&self, bone: usize, playback: Option<&AnimPlayback>) -> Mat4 {
        let frames = self.skeleton.frame_count();
        let Some(anim) = playback else {
            return self.skeleton.frame_pose(bone, self.base_frame);
        };
        if frames == 0 {
            return Mat4::IDENTITY;
        }

        let sample = anim.sample(self.now, frames);
        let current = self.skeleton.frame_pose(bone, sample.current);
        let next = self.skeleton.frame_pose(bone, sample.next);
        let pose = lerp_matrix(&current, &next, sample.lerp);

        match anim.blend_weight(self.now) {
            Some((blend, weight)) => {
                let last = frames - 1;
                let from = (blend.from_frame.max(0.0) as usize).min(last);
                let to = (blend.lerp_frame.max(0.0) as usize).min(last);
                let old = lerp_matrix(
                    &self.skeleton.frame_pose(bone, from),
                    &self.skeleton.frame_pose(bone, to),
                    blend.from_frame.fract(),
                );
                lerp_matrix(&old, &pose, weight)
            }
            None => pose,
        }
    }

    /// 覆盖作用后的局部矩阵
    fn apply_override(entry: Option<&BoneOverride>, anim: Mat4) -> Mat4 {
        let Some(entry) = entry else {
            return anim;
        };
        match &entry.mode {
            OverrideMode::Idle | OverrideMode::Animation(_) => anim,
            OverrideMode::Angles(o) => match o.placement {
                AnglePlacement::PreMultiply => o.matrix * anim,
                AnglePlacement::PostMultiply => anim * o.matrix,
            },
            OverrideMode::Physics(joint) if joint.active => match joint.role {
                JointRole::ModelRoot => joint.override_matrix * anim,
                _ => anim * joint.override_matrix,
            },
            OverrideMode::Physics(_) => anim,
        }
    }

    /// 合成全部骨骼
    pub fn compose_into(&self, mode: ComposeMode, buffer: &mut PoseBuffer) {
        let count = self.skeleton.bone_count();
        if buffer.bones.len() != count {
            buffer.bones.resize(count, Mat4::IDENTITY);
        }

        // 每根骨骼继承的动画来源
        let mut playback: Vec<Option<&AnimPlayback>> = vec![None; count];

        for &bone in self.topology.order() {
            let parent = self.topology.parent(bone);
            let entry = self.entries[bone];

            let local = match mode {
                ComposeMode::AnimationOnly(frame) => self.skeleton.frame_pose(bone, frame),
                ComposeMode::Full => {
                    let inherited = entry
                        .and_then(|e| e.playback())
                        .or_else(|| parent.and_then(|p| playback[p]));
                    playback[bone] = inherited;
                    let anim = self.animated_local(bone, inherited);
                    Self::apply_override(entry, anim)
                }
            };

            buffer.bones[bone] = match parent {
                Some(p) => buffer.bones[p] * local,
                None => local,
            };
        }
    }

    /// 合成全部骨骼并返回新缓存
    pub fn compose(&self, mode: ComposeMode) -> PoseBuffer {
        let mut buffer = PoseBuffer::new(self.skeleton.bone_count());
        self.compose_into(mode, &mut buffer);
        buffer
    }

    /// 单根骨骼的模型空间矩阵（只遍历祖先链）
    pub fn bone_matrix(&self, bone: usize) -> Mat4 {
        self.bone_matrix_at(bone, ComposeMode::Full)
    }

    /// 按指定模式计算单根骨骼的模型空间矩阵
    pub fn bone_matrix_at(&self, bone: usize, mode: ComposeMode) -> Mat4 {
        let mut chain: Vec<usize> = self.topology.ancestors(bone).collect();
        chain.reverse();
        chain.push(bone);

        let mut inherited: Option<&AnimPlayback> = None;
        let mut matrix: Option<Mat4> = None;
        for b in chain {
            let local = match mode {
                ComposeMode::AnimationOnly(frame) => self.skeleton.frame_pose(b, frame),
                ComposeMode::Full => {
                    let entry = self.entries[b];
                    if let Some(p) = entry.and_then(|e| e.playback()) {
                        inherited = Some(p);
                    }
                    Self::apply_override(entry, self.animated_local(b, inherited))
                }
            };
            matrix = Some(match matrix {
                Some(m) => m * local,
                None => local,
            });
        }
        matrix.unwrap_or(Mat4::IDENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::bone_override::{AngleLimits, AngleRequest, AnimRequest, JointFlags, PhysicsJoint};
    use crate::skeleton::{SkeletonBuilder, SkeletonData};
    use glam::Vec3;

    fn skeleton() -> SkeletonData {
        // 每帧 pelvis 沿 X 平移 frame 个单位
        let mut b = SkeletonBuilder::new()
            .bone("model_root", None, Mat4::IDENTITY)
            .bone("pelvis", Some("model_root"), Mat4::from_translation(Vec3::new(0.0, 0.0, 40.0)))
            .bone("cranium", Some("pelvis"), Mat4::from_translation(Vec3::new(0.0, 0.0, 70.0)));
        for f in 0..10 {
            b = b.frame(vec![
                Mat4::IDENTITY,
                Mat4::from_translation(Vec3::new(f as f32, 0.0, 0.0)),
                Mat4::IDENTITY,
            ]);
        }
        b.build().unwrap()
    }

    fn origin(m: Mat4) -> Vec3 {
        m.w_axis.truncate()
    }

    #[test]
    fn test_base_frame_without_overrides() {
        let s = skeleton();
        let topo = SkeletonTopology::build(&s).unwrap();
        let table = BoneOverrideTable::new(8);
        let pose = PoseComposer::new(&s, &topo, &table, 3, 0).compose(ComposeMode::Full);
        assert!((origin(pose.bone(2)) - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-5);
        assert!((origin(pose.joint(&s, 2)) - Vec3::new(3.0, 0.0, 70.0)).length() < 1e-5);
    }

    #[test]
    fn test_child_inherits_parent_animation() {
        let s = skeleton();
        let topo = SkeletonTopology::build(&s).unwrap();
        let mut table = BoneOverrideTable::new(8);
        table
            .set_animation(&s, "model_root", &AnimRequest::new(0, 10, 1.0), 0)
            .unwrap();
        // 250ms = 第 5 帧
        let pose = PoseComposer::new(&s, &topo, &table, 0, 250).compose(ComposeMode::Full);
        assert!((origin(pose.bone(2)) - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_composition_idempotent() {
        let s = skeleton();
        let topo = SkeletonTopology::build(&s).unwrap();
        let mut table = BoneOverrideTable::new(8);
        table
            .set_animation(&s, "pelvis", &AnimRequest::new(0, 10, 1.0).looping(), 0)
            .unwrap();
        table
            .set_angles(&s, "cranium", &AngleRequest::new(Vec3::new(10.0, 20.0, 0.0)))
            .unwrap();
        let composer = PoseComposer::new(&s, &topo, &table, 0, 333);
        let a = composer.compose(ComposeMode::Full);
        let b = composer.compose(ComposeMode::Full);
        assert_eq!(a.as_slice(), b.as_slice());
        assert_eq!(composer.bone_matrix(2), a.bone(2));
    }

    #[test]
    fn test_premultiplied_angles_rotate_about_joint() {
        let s = skeleton();
        let topo = SkeletonTopology::build(&s).unwrap();
        let mut table = BoneOverrideTable::new(8);
        table
            .set_angles(&s, "cranium", &AngleRequest::new(Vec3::new(0.0, 90.0, 0.0)))
            .unwrap();
        let pose = PoseComposer::new(&s, &topo, &table, 0, 0).compose(ComposeMode::Full);
        // 绕关节自身旋转，关节位置不变
        assert!((origin(pose.joint(&s, 2)) - Vec3::new(0.0, 0.0, 70.0)).length() < 1e-4);
    }

    #[test]
    fn test_physics_override_and_animation_only() {
        let s = skeleton();
        let topo = SkeletonTopology::build(&s).unwrap();
        let mut table = BoneOverrideTable::new(8);
        let i = table.add_or_reuse(&s, "pelvis").unwrap();
        let mut joint = PhysicsJoint::new(JointRole::Pcj, JointFlags::empty(), 1.0, AngleLimits::default(), 0);
        joint.override_matrix = Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0));
        table.get_mut(i).unwrap().mode = OverrideMode::Physics(Box::new(joint));

        let composer = PoseComposer::new(&s, &topo, &table, 2, 0);
        let full = composer.compose(ComposeMode::Full);
        assert!((origin(full.bone(1)) - Vec3::new(2.0, 5.0, 0.0)).length() < 1e-5);

        let anim = composer.compose(ComposeMode::AnimationOnly(4));
        assert!((origin(anim.bone(1)) - Vec3::new(4.0, 0.0, 0.0)).length() < 1e-5);
        assert_eq!(composer.bone_matrix_at(2, ComposeMode::AnimationOnly(4)), anim.bone(2));
    }

    #[test]
    fn test_blend_starts_from_old_frame() {
        let s = skeleton();
        let topo = SkeletonTopology::build(&s).unwrap();
        let mut table = BoneOverrideTable::new(8);
        table
            .set_animation(&s, "pelvis", &AnimRequest::new(0, 10, 1.0).freeze(), 0)
            .unwrap();
        // 100ms 时位于第 2 帧，切换到从第 8 帧开始的动画，淡入 100ms
        table
            .set_animation(&s, "pelvis", &AnimRequest::new(8, 10, 0.0).freeze().blend(100), 100)
            .unwrap();
        let at_start = PoseComposer::new(&s, &topo, &table, 0, 100).compose(ComposeMode::Full);
        assert!((origin(at_start.bone(1)).x - 2.0).abs() < 1e-4);
        let halfway = PoseComposer::new(&s, &topo, &table, 0, 150).compose(ComposeMode::Full);
        assert!((origin(halfway.bone(1)).x - 5.0).abs() < 1e-4);
    }
}
