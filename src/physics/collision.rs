//! 碰撞查询接口
//!
//! 引擎本身不持有碰撞世界，所有查询都通过 `CollisionTracer` 交给外部。
//! 查询是同步的：给定起点、轴对齐盒和终点，返回第一个阻挡面。

use bitflags::bitflags;
use glam::Vec3;

bitflags! {
    /// 碰撞查询的内容掩码
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ContentMask: u32 {
        const SOLID   = 1 << 0;
        const TERRAIN = 1 << 1;
        const BODY    = 1 << 2;
        const CORPSE  = 1 << 3;
        const WATER   = 1 << 4;
        /// 布娃娃查询使用的掩码
        const RAGDOLL = Self::SOLID.bits() | Self::TERRAIN.bits();
    }
}

/// 世界实体编号（静态几何）
pub const WORLD_ENTITY: i32 = 1022;

/// 单次查询结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraceResult {
    /// 沿线段前进的比例，1.0 表示未被阻挡
    pub fraction: f32,
    /// 停止位置
    pub end_pos: Vec3,
    /// 起点已在固体中
    pub start_solid: bool,
    /// 整条线段都在固体中
    pub all_solid: bool,
    /// 阻挡面法线
    pub plane_normal: Vec3,
    /// 被击中的实体
    pub hit_entity: Option<i32>,
}

impl TraceResult {
    /// 未被阻挡的结果
    pub fn clear(end: Vec3) -> Self {
        Self {
            fraction: 1.0,
            end_pos: end,
            start_solid: false,
            all_solid: false,
            plane_normal: Vec3::ZERO,
            hit_entity: None,
        }
    }

    /// 是否被阻挡
    #[inline]
    pub fn hit(&self) -> bool {
        self.fraction < 1.0
    }

    /// 起点在固体中、全程在固体中或者被阻挡
    #[inline]
    pub fn blocked(&self) -> bool {
        self.start_solid || self.all_solid || self.fraction != 1.0
    }
}

/// 碰撞查询服务
pub trait CollisionTracer: Send + Sync {
    /// 用 [mins, maxs] 盒从 start 扫到 end
    fn trace(
        &self,
        start: Vec3,
        mins: Vec3,
        maxs: Vec3,
        end: Vec3,
        ignore: Option<i32>,
        mask: ContentMask,
    ) -> TraceResult;
}

/// 没有任何几何的世界
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCollision;

impl CollisionTracer for NoCollision {
    fn trace(&self, _start: Vec3, _mins: Vec3, _maxs: Vec3, end: Vec3, _ignore: Option<i32>, _mask: ContentMask) -> TraceResult {
        TraceResult::clear(end)
    }
}

/// 水平无限大的地面：z < height 的空间全部为固体
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FloorPlane {
    pub height: f32,
}

impl FloorPlane {
    pub fn new(height: f32) -> Self {
        Self { height }
    }
}

impl CollisionTracer for FloorPlane {
    fn trace(&self, start: Vec3, mins: Vec3, _maxs: Vec3, end: Vec3, _ignore: Option<i32>, mask: ContentMask) -> TraceResult {
        if !mask.intersects(ContentMask::SOLID | ContentMask::TERRAIN) {
            return TraceResult::clear(end);
        }

        // 只有盒子底面会碰到地面
        let start_bottom = start.z + mins.z;
        let end_bottom = end.z + mins.z;

        if start_bottom < self.height {
            if end_bottom < self.height {
                return TraceResult {
                    fraction: 0.0,
                    end_pos: start,
                    start_solid: true,
                    all_solid: true,
                    plane_normal: Vec3::Z,
                    hit_entity: Some(WORLD_ENTITY),
                };
            }
            return TraceResult {
                start_solid: true,
                ..TraceResult::clear(end)
            };
        }

        if end_bottom < self.height {
            let fraction = (start_bottom - self.height) / (start_bottom - end_bottom);
            return TraceResult {
                fraction,
                end_pos: start + (end - start) * fraction,
                start_solid: false,
                all_solid: false,
                plane_normal: Vec3::Z,
                hit_entity: Some(WORLD_ENTITY),
            };
        }

        TraceResult::clear(end)
    }
}
