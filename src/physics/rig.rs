//! 布娃娃骨架描述
//!
//! 哪些骨骼参与求解、各自的角色、标志、半径和角度限制都由 `RagdollRig` 声明，
//! 启动布娃娃时按顺序登记到覆盖表中。

use glam::Vec3;

use crate::skeleton::{AngleLimits, JointFlags, JointRole};

/// 单个关节的声明
#[derive(Clone, Debug, PartialEq)]
pub struct JointSpec {
    pub name: String,
    pub role: JointRole,
    pub flags: JointFlags,
    pub radius: f32,
    /// 被动关节忽略此值
    pub limits: AngleLimits,
}

impl JointSpec {
    pub fn new(name: &str, role: JointRole, flags: JointFlags, radius: f32, limits: AngleLimits) -> Self {
        Self {
            name: name.to_string(),
            role,
            flags,
            radius,
            limits,
        }
    }

    /// 只提供位置的被动效应器
    pub fn passive(name: &str, flags: JointFlags, radius: f32) -> Self {
        Self::new(name, JointRole::Passive, flags, radius, AngleLimits::default())
    }

    /// 实际使用的限制
    pub fn effective_limits(&self) -> AngleLimits {
        match self.role {
            JointRole::Passive => AngleLimits::default(),
            _ => self.limits,
        }
    }
}

/// 布娃娃骨架
#[derive(Clone, Debug, PartialEq)]
pub struct RagdollRig {
    pub joints: Vec<JointSpec>,
    /// 启动时冻结在死亡动画上的骨骼
    pub freeze_bones: Vec<String>,
    /// IK 初始化时登记的效应器 (名称, 半径)
    pub ik_effectors: Vec<(String, f32)>,
}

fn limits(min: [f32; 3], max: [f32; 3]) -> AngleLimits {
    AngleLimits::new(Vec3::from(min), Vec3::from(max))
}

impl RagdollRig {
    /// 标准人形骨架
    ///
    /// `r` 为半径缩放（默认配置 0.3）。
    pub fn humanoid(r: f32) -> Self {
        use JointRole::*;
        let effector = JointFlags::EFFECTOR;
        let light = JointFlags::LIGHTWEIGHT;
        let unsnap = JointFlags::UNSNAPPABLE;
        let limb = effector | light;

        let joints = vec![
            JointSpec::new("model_root", ModelRoot, unsnap, 10.0 * r, limits([-90.0, -45.0, -45.0], [90.0, 45.0, 45.0])),
            JointSpec::new("pelvis", Pelvis, unsnap, 10.0 * r, AngleLimits::symmetric(45.0)),
            JointSpec::new("lower_lumbar", Pcj, unsnap, 10.0 * r, AngleLimits::symmetric(15.0)),
            JointSpec::new("upper_lumbar", Pcj, unsnap, 10.0 * r, AngleLimits::symmetric(15.0)),
            JointSpec::new("thoracic", Pcj, effector | unsnap, 12.0 * r, AngleLimits::symmetric(25.0)),
            JointSpec::new("cranium", Pcj, light | unsnap, 6.0 * r, limits([-10.0, -10.0, -90.0], [10.0, 10.0, 90.0])),
            JointSpec::new("rhumerus", Pcj, light | unsnap, 4.0 * r, limits([-100.0, -40.0, -15.0], [-15.0, 80.0, 15.0])),
            JointSpec::new("lhumerus", Pcj, light | unsnap, 4.0 * r, limits([-50.0, -80.0, -15.0], [15.0, 40.0, 15.0])),
            JointSpec::new("rradius", Pcj, light, 3.0 * r, limits([-25.0, -20.0, -20.0], [90.0, 20.0, -20.0])),
            JointSpec::new("lradius", Pcj, light, 3.0 * r, limits([-90.0, -20.0, -20.0], [30.0, 20.0, -20.0])),
            JointSpec::new("rfemurYZ", Pcj, light, 6.0 * r, limits([-80.0, -50.0, -20.0], [30.0, 5.0, 20.0])),
            JointSpec::new("lfemurYZ", Pcj, light, 6.0 * r, limits([-60.0, -5.0, -20.0], [50.0, 50.0, 20.0])),
            JointSpec::new("rtibia", Pcj, limb, 4.0 * r, limits([-20.0, -15.0, -15.0], [100.0, 15.0, 15.0])),
            JointSpec::new("ltibia", Pcj, limb, 4.0 * r, limits([20.0, -15.0, -15.0], [100.0, 15.0, 15.0])),
            // 被动效应器
            JointSpec::passive("rhand", limb, 6.0 * 1.2 * r),
            JointSpec::passive("lhand", limb, 6.0 * 1.2 * r),
            JointSpec::passive("rtalus", limb, 4.0 * 1.2 * r),
            JointSpec::passive("ltalus", limb, 4.0 * 1.2 * r),
            JointSpec::passive("rradiusX", limb, 6.0 * 1.2 * r),
            JointSpec::passive("lradiusX", limb, 6.0 * 1.2 * r),
            JointSpec::passive("rfemurX", limb, 10.0 * 1.2 * r),
            JointSpec::passive("lfemurX", limb, 10.0 * 1.2 * r),
            JointSpec::passive("ceyebrow", limb, 5.0),
        ];

        let freeze_bones = ["upper_lumbar", "lower_lumbar", "Motion", "lfemurYZ", "rfemurYZ", "rhumerus", "lhumerus"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let ik_effectors = [
            ("rhand", 6.0),
            ("lhand", 6.0),
            ("rtibia", 4.0),
            ("ltibia", 4.0),
            ("rtalus", 4.0),
            ("ltalus", 4.0),
            ("rradiusX", 6.0),
            ("lradiusX", 6.0),
            ("rfemurX", 10.0),
            ("lfemurX", 10.0),
            ("ceyebrow", 10.0),
        ]
        .iter()
        .map(|&(n, radius)| (n.to_string(), radius))
        .collect();

        Self {
            joints,
            freeze_bones,
            ik_effectors,
        }
    }

    pub fn joint(&self, name: &str) -> Option<&JointSpec> {
        self.joints.iter().find(|j| j.name.eq_ignore_ascii_case(name))
    }
}

impl Default for RagdollRig {
    fn default() -> Self {
        Self::humanoid(0.3)
    }
}
