//! 骨骼覆盖表
//!
//! 每个模型实例一张稀疏表：每根骨骼最多一个条目，空槽为 None。
//! 新条目优先复用第一个空槽，删除后裁掉末尾的空槽。
//!
//! 布娃娃/IK 接管的骨骼会忽略普通的角度、矩阵和动画请求，
//! 这种情况不是错误，只记录 debug 日志。

use glam::Mat4;

use super::bone_override::{
    AngleOverride, AnglePlacement, AngleRequest, AnimRequest, BoneOverride, OverrideMode,
};
use super::SkeletonSource;
use crate::animation::{AnimPlayback, EndBehavior, PlaybackStatus};
use crate::{Result, RigError};

/// 动画查询结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationState {
    /// 当前小数帧号
    pub frame: f32,
    pub start_frame: i32,
    pub end_frame: i32,
    pub speed: f32,
    pub end: EndBehavior,
    pub paused: bool,
}

/// 骨骼覆盖表
#[derive(Clone, Debug)]
pub struct BoneOverrideTable {
    entries: Vec<Option<BoneOverride>>,
    capacity: usize,
}

impl BoneOverrideTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// 表长度（包括中间的空槽）
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 已占用条目数
    pub fn occupied(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&BoneOverride> {
        self.entries.get(index).and_then(|e| e.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut BoneOverride> {
        self.entries.get_mut(index).and_then(|e| e.as_mut())
    }

    /// 遍历已占用条目
    pub fn iter(&self) -> impl Iterator<Item = (usize, &BoneOverride)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut BoneOverride)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(i, e)| e.as_mut().map(|e| (i, e)))
    }

    /// 按骨骼索引查找条目
    pub fn find_bone(&self, bone: usize) -> Option<usize> {
        self.iter().find(|(_, e)| e.bone == bone).map(|(i, _)| i)
    }

    /// 按骨骼名称查找条目
    pub fn find(&self, skeleton: &dyn SkeletonSource, name: &str) -> Option<usize> {
        skeleton.find_bone(name).and_then(|bone| self.find_bone(bone))
    }

    /// 查找或新增条目；名称不在骨架中时返回 UnknownBone
    pub fn add_or_reuse(&mut self, skeleton: &dyn SkeletonSource, name: &str) -> Result<usize> {
        let bone = skeleton
            .find_bone(name)
            .ok_or_else(|| RigError::UnknownBone(name.to_string()))?;
        self.add_bone(bone)
    }

    /// 按骨骼索引查找或新增条目
    pub fn add_bone(&mut self, bone: usize) -> Result<usize> {
        if let Some(index) = self.find_bone(bone) {
            return Ok(index);
        }

        if let Some(index) = self.entries.iter().position(|e| e.is_none()) {
            self.entries[index] = Some(BoneOverride::new(bone));
            return Ok(index);
        }

        if self.entries.len() >= self.capacity {
            log::warn!("[Bones] 覆盖表已满 (capacity {})", self.capacity);
            return Err(RigError::TableFull {
                capacity: self.capacity,
            });
        }

        self.entries.push(Some(BoneOverride::new(bone)));
        Ok(self.entries.len() - 1)
    }

    /// 释放条目
    ///
    /// 只有空闲且不受物理接管的条目会被释放，返回 Ok(false) 表示仍在使用。
    pub fn remove(&mut self, index: usize) -> Result<bool> {
        let entry = self.get(index).ok_or(RigError::InvalidOverride(index))?;
        if !entry.is_idle() {
            return Ok(false);
        }
        self.entries[index] = None;
        self.trim();
        Ok(true)
    }

    /// 裁掉末尾的空槽
    fn trim(&mut self) {
        while matches!(self.entries.last(), Some(None)) {
            self.entries.pop();
        }
    }

    /// 清空整张表
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 物理接管的条目忽略普通请求
    fn owned_by_physics(&self, index: usize, op: &str) -> bool {
        match self.get(index) {
            Some(entry) if entry.is_physics() => {
                log::debug!("[Bones] 忽略 {}：骨骼 {} 由物理接管", op, entry.bone);
                true
            }
            _ => false,
        }
    }

    // ========================================================================
    // 角度 / 矩阵覆盖
    // ========================================================================

    /// 设置角度覆盖（带可选限制）
    pub fn set_angles(
        &mut self,
        skeleton: &dyn SkeletonSource,
        name: &str,
        request: &AngleRequest,
    ) -> Result<()> {
        let index = self.add_or_reuse(skeleton, name)?;
        if self.owned_by_physics(index, "set_angles") {
            return Ok(());
        }
        let entry = self.get_mut(index).ok_or(RigError::InvalidOverride(index))?;
        let bone = entry.bone;
        entry.mode = OverrideMode::Angles(AngleOverride::from_request(
            request,
            &skeleton.base_pose(bone),
            &skeleton.base_pose_inverse(bone),
        ));
        Ok(())
    }

    /// 直接设置覆盖矩阵
    pub fn set_matrix(
        &mut self,
        skeleton: &dyn SkeletonSource,
        name: &str,
        matrix: Mat4,
        placement: AnglePlacement,
    ) -> Result<()> {
        let index = self.add_or_reuse(skeleton, name)?;
        if self.owned_by_physics(index, "set_matrix") {
            return Ok(());
        }
        let entry = self.get_mut(index).ok_or(RigError::InvalidOverride(index))?;
        entry.mode = OverrideMode::Angles(AngleOverride::from_matrix(matrix, placement));
        Ok(())
    }

    /// 停止角度覆盖；返回是否存在角度覆盖
    pub fn stop_angles(&mut self, skeleton: &dyn SkeletonSource, name: &str) -> Result<bool> {
        let bone = skeleton
            .find_bone(name)
            .ok_or_else(|| RigError::UnknownBone(name.to_string()))?;
        let Some(index) = self.find_bone(bone) else {
            return Ok(false);
        };
        let entry = self.get_mut(index).ok_or(RigError::InvalidOverride(index))?;
        if !matches!(entry.mode, OverrideMode::Angles(_)) {
            return Ok(false);
        }
        entry.mode = OverrideMode::Idle;
        self.remove(index)?;
        Ok(true)
    }

    // ========================================================================
    // 动画
    // ========================================================================

    /// 设置骨骼动画
    ///
    /// 带淡入时间且该骨骼正在播放时，记录旧动画的当前帧用于交叉淡入。
    pub fn set_animation(
        &mut self,
        skeleton: &dyn SkeletonSource,
        name: &str,
        request: &AnimRequest,
        now: i32,
    ) -> Result<()> {
        let frames = skeleton.frame_count();
        if request.start_frame < 0
            || request.start_frame as usize >= frames
            || request.end_frame < -1
            || request.end_frame > frames as i32
        {
            return Err(RigError::InvalidAnimRange {
                start: request.start_frame,
                end: request.end_frame,
                frames,
            });
        }

        let index = self.add_or_reuse(skeleton, name)?;
        if self.owned_by_physics(index, "set_animation") {
            return Ok(());
        }
        let entry = self.get_mut(index).ok_or(RigError::InvalidOverride(index))?;

        let blend = match (&entry.mode, request.blend_time) {
            (OverrideMode::Animation(previous), Some(ms)) if ms > 0 => {
                Some(AnimPlayback::blend_from(previous, now, ms, frames))
            }
            _ => None,
        };

        let mut playback = AnimPlayback::new(
            request.start_frame,
            request.end_frame,
            request.speed,
            request.end,
            now,
            request.set_frame,
        );
        playback.blend = blend;
        entry.mode = OverrideMode::Animation(playback);
        Ok(())
    }

    /// 停止动画；返回是否存在动画
    pub fn stop_animation(&mut self, skeleton: &dyn SkeletonSource, name: &str) -> Result<bool> {
        let bone = skeleton
            .find_bone(name)
            .ok_or_else(|| RigError::UnknownBone(name.to_string()))?;
        let Some(index) = self.find_bone(bone) else {
            return Ok(false);
        };
        let entry = self.get_mut(index).ok_or(RigError::InvalidOverride(index))?;
        if !matches!(entry.mode, OverrideMode::Animation(_)) {
            return Ok(false);
        }
        entry.mode = OverrideMode::Idle;
        self.remove(index)?;
        Ok(true)
    }

    /// 暂停/继续切换；返回切换后的暂停状态
    ///
    /// 继续时在暂停所在帧重新开始，相当于把起始时间整体后移。
    pub fn pause_animation(
        &mut self,
        skeleton: &dyn SkeletonSource,
        name: &str,
        now: i32,
    ) -> Result<bool> {
        let frames = skeleton.frame_count();
        let index = self
            .find(skeleton, name)
            .ok_or_else(|| RigError::UnknownBone(name.to_string()))?;
        let entry = self.get_mut(index).ok_or(RigError::InvalidOverride(index))?;
        let OverrideMode::Animation(anim) = &mut entry.mode else {
            return Ok(false);
        };

        match anim.pause_time {
            Some(paused_at) => {
                let frame = anim.current_frame(paused_at, frames);
                *anim = AnimPlayback::new(
                    anim.start_frame,
                    anim.end_frame,
                    anim.speed,
                    anim.end,
                    now,
                    Some(frame),
                );
                Ok(false)
            }
            None => {
                anim.pause_time = Some(now);
                Ok(true)
            }
        }
    }

    fn playback_of(&self, skeleton: &dyn SkeletonSource, name: &str) -> Option<&AnimPlayback> {
        self.find(skeleton, name)
            .and_then(|i| self.get(i))
            .and_then(|e| e.playback())
    }

    pub fn is_paused(&self, skeleton: &dyn SkeletonSource, name: &str) -> bool {
        self.playback_of(skeleton, name)
            .map(|a| a.is_paused())
            .unwrap_or(false)
    }

    /// 动画帧范围
    pub fn animation_range(&self, skeleton: &dyn SkeletonSource, name: &str) -> Option<(i32, i32)> {
        self.playback_of(skeleton, name)
            .map(|a| (a.start_frame, a.end_frame))
    }

    /// 当前动画状态
    pub fn animation_state(
        &self,
        skeleton: &dyn SkeletonSource,
        name: &str,
        now: i32,
    ) -> Option<AnimationState> {
        let frames = skeleton.frame_count();
        self.playback_of(skeleton, name).map(|a| AnimationState {
            frame: a.current_frame(now, frames),
            start_frame: a.start_frame,
            end_frame: a.end_frame,
            speed: a.speed,
            end: a.end,
            paused: a.is_paused(),
        })
    }

    /// 每帧推进动画：循环重新锚定，停止的动画释放条目；返回释放数量
    pub fn advance(&mut self, now: i32) -> usize {
        let mut finished = Vec::new();
        for (i, entry) in self.iter_mut() {
            match &mut entry.mode {
                OverrideMode::Animation(anim) => {
                    if anim.advance(now) == PlaybackStatus::Finished {
                        entry.mode = OverrideMode::Idle;
                        finished.push(i);
                    }
                }
                OverrideMode::Physics(joint) => {
                    if let Some(anim) = joint.anim.as_mut() {
                        if anim.advance(now) == PlaybackStatus::Finished {
                            joint.anim = None;
                        }
                    }
                }
                _ => {}
            }
        }

        let mut freed = 0;
        for i in finished {
            if matches!(self.remove(i), Ok(true)) {
                freed += 1;
            }
        }
        freed
    }

    /// 删除不再需要的骨骼的覆盖（物理关节保留）
    pub fn remove_redundant(&mut self, keep: impl Fn(usize) -> bool) {
        for slot in self.entries.iter_mut() {
            let redundant = matches!(slot, Some(e) if !e.is_physics() && !keep(e.bone));
            if redundant {
                *slot = None;
            }
        }
        self.trim();
    }
}
