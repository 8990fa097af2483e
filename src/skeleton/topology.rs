//! 骨架拓扑缓存
//!
//! 每个骨架只计算一次：父子关系、深度、父在前的遍历顺序，
//! 以及按 (深度, 索引) 排序的后代列表。求解器依赖这个顺序。

use super::SkeletonSource;
use crate::{Result, RigError};

/// 骨架拓扑
#[derive(Clone, Debug, Default)]
pub struct SkeletonTopology {
    parents: Vec<Option<usize>>,
    depth: Vec<u32>,
    children: Vec<Vec<usize>>,
    order: Vec<usize>,
    descendants: Vec<Vec<usize>>,
}

impl SkeletonTopology {
    /// 从骨架构建；越界父索引或环会返回 InvalidSkeleton
    pub fn build(skeleton: &dyn SkeletonSource) -> Result<Self> {
        let count = skeleton.bone_count();
        let parents: Vec<Option<usize>> = (0..count).map(|i| skeleton.bone_parent(i)).collect();

        let mut children = vec![Vec::new(); count];
        for (i, parent) in parents.iter().enumerate() {
            if let Some(p) = *parent {
                if p >= count {
                    return Err(RigError::InvalidSkeleton(format!(
                        "bone {} has parent {} out of range",
                        i, p
                    )));
                }
                children[p].push(i);
            }
        }

        // 深度：沿父链上溯，步数超过骨骼数即存在环
        let mut depth = vec![0u32; count];
        for (i, d) in depth.iter_mut().enumerate() {
            let mut steps = 0u32;
            let mut cursor = parents[i];
            while let Some(p) = cursor {
                steps += 1;
                if steps as usize > count {
                    return Err(RigError::InvalidSkeleton(format!("cycle through bone {}", i)));
                }
                cursor = parents[p];
            }
            *d = steps;
        }

        let mut order: Vec<usize> = (0..count).collect();
        order.sort_by_key(|&i| (depth[i], i));

        let mut descendants = vec![Vec::new(); count];
        for (i, list) in descendants.iter_mut().enumerate() {
            let mut stack = children[i].clone();
            while let Some(b) = stack.pop() {
                list.push(b);
                stack.extend_from_slice(&children[b]);
            }
            list.sort_by_key(|&b| (depth[b], b));
        }

        Ok(Self {
            parents,
            depth,
            children,
            order,
            descendants,
        })
    }

    #[inline]
    pub fn bone_count(&self) -> usize {
        self.parents.len()
    }

    #[inline]
    pub fn parent(&self, bone: usize) -> Option<usize> {
        self.parents[bone]
    }

    #[inline]
    pub fn depth(&self, bone: usize) -> u32 {
        self.depth[bone]
    }

    #[inline]
    pub fn children(&self, bone: usize) -> &[usize] {
        &self.children[bone]
    }

    /// 父在前的全骨骼顺序
    #[inline]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// 全部后代，按离根距离升序
    #[inline]
    pub fn descendants(&self, bone: usize) -> &[usize] {
        &self.descendants[bone]
    }

    /// 从父骨骼开始向上的祖先链
    pub fn ancestors(&self, bone: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.parents[bone], move |&b| self.parents[b])
    }

    pub fn is_ancestor(&self, ancestor: usize, bone: usize) -> bool {
        self.ancestors(bone).any(|b| b == ancestor)
    }

    /// 最近的满足条件的祖先（不含自身）
    pub fn nearest_ancestor(&self, bone: usize, pred: impl Fn(usize) -> bool) -> Option<usize> {
        self.ancestors(bone).find(|&b| pred(b))
    }
}
