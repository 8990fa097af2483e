//! 内存骨架数据
//!
//! 骨骼按父在前的顺序登记，名称查找不区分大小写。
//! 可选的逐帧局部矩阵供动画播放采样使用。

use std::collections::HashMap;

use glam::Mat4;

use super::SkeletonSource;
use crate::{Result, RigError};

/// 单根骨骼描述
#[derive(Clone, Debug)]
pub struct BoneDesc {
    pub name: String,
    pub parent: Option<usize>,
    pub base_pose: Mat4,
    pub base_pose_inv: Mat4,
}

/// 不可变骨架
#[derive(Clone, Debug, Default)]
pub struct SkeletonData {
    bones: Vec<BoneDesc>,
    name_index: HashMap<String, usize>,
    /// frames[frame][bone]
    frames: Vec<Vec<Mat4>>,
}

impl SkeletonData {
    /// 开始构建
    pub fn builder() -> SkeletonBuilder {
        SkeletonBuilder::default()
    }

    pub fn bones(&self) -> &[BoneDesc] {
        &self.bones
    }
}

impl SkeletonSource for SkeletonData {
    fn bone_count(&self) -> usize {
        self.bones.len()
    }

    fn bone_name(&self, index: usize) -> &str {
        &self.bones[index].name
    }

    fn bone_parent(&self, index: usize) -> Option<usize> {
        self.bones[index].parent
    }

    fn base_pose(&self, index: usize) -> Mat4 {
        self.bones[index].base_pose
    }

    fn base_pose_inverse(&self, index: usize) -> Mat4 {
        self.bones[index].base_pose_inv
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn frame_pose(&self, bone: usize, frame: usize) -> Mat4 {
        self.frames
            .get(frame)
            .and_then(|f| f.get(bone))
            .copied()
            .unwrap_or(Mat4::IDENTITY)
    }

    fn find_bone(&self, name: &str) -> Option<usize> {
        self.name_index.get(&name.to_ascii_lowercase()).copied()
    }
}

// ============================================================================
// 构建器
// ============================================================================

/// 骨架构建器
#[derive(Debug, Default)]
pub struct SkeletonBuilder {
    bones: Vec<(String, Option<String>, Mat4)>,
    frames: Vec<Vec<Mat4>>,
}

impl SkeletonBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加骨骼；父骨骼必须已经添加
    pub fn bone(mut self, name: &str, parent: Option<&str>, base_pose: Mat4) -> Self {
        self.bones.push((name.to_string(), parent.map(str::to_string), base_pose));
        self
    }

    /// 添加一帧动画（每根骨骼的局部矩阵，按骨骼顺序）
    pub fn frame(mut self, poses: Vec<Mat4>) -> Self {
        self.frames.push(poses);
        self
    }

    pub fn build(self) -> Result<SkeletonData> {
        let mut name_index = HashMap::with_capacity(self.bones.len());
        let mut bones = Vec::with_capacity(self.bones.len());

        for (i, (name, parent, base_pose)) in self.bones.into_iter().enumerate() {
            let key = name.to_ascii_lowercase();
            if name_index.contains_key(&key) {
                return Err(RigError::InvalidSkeleton(format!("duplicate bone '{}'", name)));
            }

            let parent = match parent {
                Some(p) => match name_index.get(&p.to_ascii_lowercase()) {
                    Some(&idx) => Some(idx),
                    None => {
                        return Err(RigError::InvalidSkeleton(format!(
                            "bone '{}' references parent '{}' before it is defined",
                            name, p
                        )))
                    }
                },
                None => None,
            };

            name_index.insert(key, i);
            bones.push(BoneDesc {
                name,
                parent,
                base_pose,
                base_pose_inv: base_pose.inverse(),
            });
        }

        if let Some(bad) = self.frames.iter().position(|f| f.len() != bones.len()) {
            return Err(RigError::InvalidSkeleton(format!(
                "frame {} has {} poses, expected {}",
                bad,
                self.frames[bad].len(),
                bones.len()
            )));
        }

        Ok(SkeletonData {
            bones,
            name_index,
            frames: self.frames,
        })
    }
}
