//! 布娃娃 / IK 配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。
//! 单位：长度为模型单位，时间为毫秒，角度为度。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 卡在固体中时的目标修正方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RagToBase {
    /// 从固体中向实体原点方向推出
    #[default]
    Off,
    /// 回到动画帧中的位置
    Direct,
    /// 回到动画帧中的位置，并跟随骨盆当前的 yaw
    PelvisRelative,
}

/// 死亡动画结束后何时真正开始布娃娃
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShotWait {
    /// 动画结束立即开始
    #[default]
    Never,
    /// 一直等到第一次被击中
    Always,
    /// 死亡过程中没有发生碰撞时才等待击中
    UnlessCollided,
}

/// 布娃娃配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct RagdollConfig {
    // ========== 状态机 ==========
    /// 保持 Dynamic 的时间窗口 (ms)，默认 1000
    pub dynamic_window_ms: i32,
    /// Settling 衰减窗口 (ms)，默认 1000
    pub settle_window_ms: i32,
    /// 关节位置变化阈值（距离平方），默认 15.0
    pub origin_change_threshold_sq: f32,
    /// Dynamic 状态每 tick 迭代次数，默认 4
    pub dynamic_iterations: usize,
    /// Settling 状态每 tick 迭代次数，默认 2
    pub settling_iterations: usize,
    /// 关节下落超过此距离时迭代翻倍，默认 100.0
    pub fast_drop_distance: f32,

    // ========== 约束求解 ==========
    /// 有限差分扰动角度 (度)，默认 0.5
    pub finite_difference_delta: f32,
    /// 梯度归一化分子：recip = sqrt(gradient_norm / 效应器数)，默认 4.0
    pub gradient_norm: f32,
    /// 基础步长，默认 0.40
    pub step_base: f32,
    /// 较多效应器在固体中时的步长，默认 0.50
    pub step_solid: f32,
    /// 大量效应器在固体中时的步长，默认 0.60
    pub step_deep_solid: f32,
    /// step_solid 的固体计数阈值，默认 10
    pub step_solid_count: u32,
    /// step_deep_solid 的固体计数阈值，默认 32
    pub step_deep_solid_count: u32,
    /// 角度阻尼（向上一 tick 角度回拉），默认 0.75
    pub damping: f32,
    /// Dynamic 状态下的阻尼，默认 0.85
    pub damping_dynamic: f32,
    /// 可断裂关节的限制放宽倍率，默认 1.5
    pub break_multiplier: f32,
    /// 固体计数超过此值时放开限制，默认 32
    pub free_move_solid_count: u32,
    /// 模型根位置积分增益，默认 0.20
    pub root_gain: f32,
    /// 模型根位置阻尼，默认 0.25
    pub root_damping: f32,

    // ========== 目标追踪 ==========
    /// 每 tick 重力加速，默认 3.0
    pub gravity: f32,
    /// 重力累积上限，默认 256.0
    pub max_gravity_pull: f32,
    /// 每 tick 速度衰减比例，默认 0.09
    pub bone_mass: f32,
    /// 碰撞反弹系数，0 = 不反弹，默认 0.0
    pub bounce: f32,
    /// 速度到位移的比例，默认 0.1
    pub velocity_scale: f32,
    /// 冲击速度对期望方向的放大，默认 60.0
    pub velocity_effector_scale: f32,
    /// 冲击速度每次迭代的保留比例，默认 1.0
    pub velocity_effector_damping: f32,
    /// 随机抖动幅度，默认 0.75
    pub jitter: f32,
    /// 朝向目标的提示速度，默认 8.0
    pub hint_speed: f32,
    /// 提示生效的最小距离，默认 2.0
    pub hint_min_distance: f32,
    /// 轻量关节的身体速度反向拖拽比例，默认 0.5
    pub lightweight_drag: f32,
    /// 拖拽速度上限，默认 64.0
    pub lightweight_drag_cap: f32,
    /// 卡在固体中时的推出距离，默认 40.0
    pub push_distance: f32,
    /// 推出目标相对实体原点的地面高度，默认 23.0
    pub floor_offset: f32,
    /// 骨盆静止高度（相对实体原点），默认 -24.0
    pub pelvis_rest_height: f32,
    /// 骨盆高度额外抬升，默认 2.0
    pub pelvis_lift: f32,
    /// 卡在固体中时的目标修正方式，默认 Off
    pub rag_to_base: RagToBase,
    /// PelvisRelative 模式下 yaw 跟随的滞回角 (度)，默认 16.0
    pub rag_to_base_hysteresis: f32,
    /// 连续卡住多少 tick 后发出通知，默认 8
    pub stuck_notify_count: u32,
    /// 连续卡住多少 tick 后记录日志，默认 64
    pub stuck_log_count: u32,
    /// 期望方向每轴上限；None 表示不限制，默认 None
    pub direction_cap: Option<f32>,
    /// 方向放大的固体计数阈值，默认 5
    pub direction_cap_solid_count: u32,

    // ========== 冲击 ==========
    /// 冲击强度（除以距离平方），默认 150.0
    pub impact_strength: f32,
    /// 冲击随机附加，默认 0.05
    pub impact_random: f32,
    /// 冲击是否推动关节，默认 true
    pub kick_bones: bool,

    // ========== IK ==========
    /// IK 每 tick 迭代次数，默认 12
    pub ik_iterations: usize,
    /// IK 默认步长，默认 0.40
    pub ik_speed: f32,
    /// IK 速度放大，默认 10.0
    pub ik_velocity_scale: f32,
    /// IK 速度每 tick 衰减，默认 0.8
    pub ik_velocity_damping: f32,

    // ========== 启动 ==========
    /// 启动时预求解迭代次数，默认 20
    pub pre_settle_iterations: usize,
    /// 预求解衰减跨度：decay = 1 - k / span，默认 40.0
    pub pre_settle_span: f32,
    /// 关节半径缩放，默认 0.3
    pub radius_scale: f32,
    /// 死亡动画结束后的等待策略，默认 Never
    pub wait_for_shot: ShotWait,
    /// 死亡过程中的碰撞不打断动画，默认 false
    pub keep_death_anim: bool,

    // ========== 容量 ==========
    /// 覆盖表最大条目数，默认 256
    pub max_override_slots: usize,
    /// 工作集最大关节数，默认 256
    pub max_physics_joints: usize,
    /// 包围盒额外边距，默认 10.0
    pub bounds_padding: f32,

    // ========== 调试 ==========
    /// 随机种子（抖动与初始角度），默认 0x5eed
    pub seed: u64,
}

impl Default for RagdollConfig {
    fn default() -> Self {
        Self {
            // ====== 状态机 ======
            dynamic_window_ms: 1000,
            settle_window_ms: 1000,
            origin_change_threshold_sq: 15.0,
            dynamic_iterations: 4,
            settling_iterations: 2,
            fast_drop_distance: 100.0,

            // ====== 约束求解 ======
            // 步长随固体计数增加，卡得越深走得越快
            finite_difference_delta: 0.5,
            gradient_norm: 4.0,
            step_base: 0.40,
            step_solid: 0.50,
            step_deep_solid: 0.60,
            step_solid_count: 10,
            step_deep_solid_count: 32,
            damping: 0.75,
            damping_dynamic: 0.85,
            break_multiplier: 1.5,
            free_move_solid_count: 32,
            root_gain: 0.20,
            root_damping: 0.25,

            // ====== 目标追踪 ======
            gravity: 3.0,
            max_gravity_pull: 256.0,
            bone_mass: 0.09,
            bounce: 0.0,
            velocity_scale: 0.1,
            velocity_effector_scale: 60.0,
            velocity_effector_damping: 1.0,
            jitter: 0.75,
            hint_speed: 8.0,
            hint_min_distance: 2.0,
            lightweight_drag: 0.5,
            lightweight_drag_cap: 64.0,
            push_distance: 40.0,
            floor_offset: 23.0,
            pelvis_rest_height: -24.0,
            pelvis_lift: 2.0,
            rag_to_base: RagToBase::Off,
            rag_to_base_hysteresis: 16.0,
            stuck_notify_count: 8,
            stuck_log_count: 64,
            direction_cap: None,
            direction_cap_solid_count: 5,

            // ====== 冲击 ======
            impact_strength: 150.0,
            impact_random: 0.05,
            kick_bones: true,

            // ====== IK ======
            ik_iterations: 12,
            ik_speed: 0.40,
            ik_velocity_scale: 10.0,
            ik_velocity_damping: 0.8,

            // ====== 启动 ======
            pre_settle_iterations: 20,
            pre_settle_span: 40.0,
            radius_scale: 0.3,
            wait_for_shot: ShotWait::Never,
            keep_death_anim: false,

            // ====== 容量 ======
            max_override_slots: 256,
            max_physics_joints: 256,
            bounds_padding: 10.0,

            // ====== 调试 ======
            seed: 0x5eed,
        }
    }
}

impl RagdollConfig {
    /// 按固体计数选择梯度步长
    #[inline]
    pub fn gradient_step(&self, solid_count: u32) -> f32 {
        if solid_count > self.step_deep_solid_count {
            self.step_deep_solid
        } else if solid_count > self.step_solid_count {
            self.step_solid
        } else {
            self.step_base
        }
    }
}

/// 全局配置实例
static RAGDOLL_CONFIG: Lazy<RwLock<RagdollConfig>> = Lazy::new(|| {
    RwLock::new(RagdollConfig::default())
});

/// 获取当前配置（只读）
pub fn get_config() -> RagdollConfig {
    RAGDOLL_CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: RagdollConfig) {
    *RAGDOLL_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *RAGDOLL_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = RagdollConfig::default();
}
