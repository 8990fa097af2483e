//! 布娃娃通知回调
//!
//! 所有回调都是可选的，默认实现为空。回调在求解过程中同步触发，
//! 实现方不应在回调里再操作同一个模型实例。

use glam::Vec3;

/// 布娃娃事件接收者
pub trait RagdollEvents: Send + Sync {
    /// 关节进入或离开断裂状态
    fn bone_snapped(&self, _bone: &str, _snapped: bool) {}

    /// 关节连续多次卡在固体中
    fn bone_in_solid(&self, _bone: &str, _position: Vec3, _solid_count: u32) {}

    /// 整个布娃娃已经静止
    fn ragdoll_settled(&self) {}
}

/// 忽略所有事件
#[derive(Clone, Copy, Debug, Default)]
pub struct NullEvents;

impl RagdollEvents for NullEvents {}
