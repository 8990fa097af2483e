//! 集成测试公用：人形测试骨架与事件记录

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use glam::{Mat4, Vec3};
use ragdoll_engine::{
    ModelInstance, RagdollConfig, RagdollEvents, SkeletonBuilder, SkeletonData, SkeletonSource,
};

/// 动画帧数
pub const FRAMES: usize = 10;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// (名称, 父骨骼, 模型空间位置)
const BONES: &[(&str, Option<&str>, [f32; 3])] = &[
    ("model_root", None, [0.0, 0.0, 0.0]),
    ("pelvis", Some("model_root"), [0.0, 0.0, 40.0]),
    ("lower_lumbar", Some("pelvis"), [0.0, 0.0, 45.0]),
    ("upper_lumbar", Some("lower_lumbar"), [0.0, 0.0, 50.0]),
    ("thoracic", Some("upper_lumbar"), [0.0, 0.0, 60.0]),
    ("cranium", Some("thoracic"), [0.0, 0.0, 70.0]),
    ("ceyebrow", Some("cranium"), [4.0, 0.0, 74.0]),
    ("rhumerus", Some("thoracic"), [0.0, -8.0, 60.0]),
    ("rradius", Some("rhumerus"), [0.0, -8.0, 45.0]),
    ("rradiusX", Some("rradius"), [0.0, -8.0, 40.0]),
    ("rhand", Some("rradius"), [0.0, -8.0, 30.0]),
    ("lhumerus", Some("thoracic"), [0.0, 8.0, 60.0]),
    ("lradius", Some("lhumerus"), [0.0, 8.0, 45.0]),
    ("lradiusX", Some("lradius"), [0.0, 8.0, 40.0]),
    ("lhand", Some("lradius"), [0.0, 8.0, 30.0]),
    ("rfemurYZ", Some("pelvis"), [0.0, -5.0, 38.0]),
    ("rfemurX", Some("rfemurYZ"), [0.0, -5.0, 30.0]),
    ("rtibia", Some("rfemurYZ"), [0.0, -5.0, 20.0]),
    ("rtalus", Some("rtibia"), [0.0, -5.0, 2.0]),
    ("lfemurYZ", Some("pelvis"), [0.0, 5.0, 38.0]),
    ("lfemurX", Some("lfemurYZ"), [0.0, 5.0, 30.0]),
    ("ltibia", Some("lfemurYZ"), [0.0, 5.0, 20.0]),
    ("ltalus", Some("ltibia"), [0.0, 5.0, 2.0]),
];

/// 站立的人形骨架，所有动画帧都是基础姿态
pub fn humanoid() -> SkeletonData {
    let mut builder = SkeletonBuilder::new();
    for &(name, parent, pos) in BONES {
        builder = builder.bone(name, parent, Mat4::from_translation(Vec3::from(pos)));
    }
    for _ in 0..FRAMES {
        builder = builder.frame(vec![Mat4::IDENTITY; BONES.len()]);
    }
    builder.build().expect("valid test skeleton")
}

pub fn instance(config: RagdollConfig) -> ModelInstance {
    ModelInstance::with_config(Arc::new(humanoid()), config).expect("valid topology")
}

/// 工作集中某根骨骼的当前世界位置
pub fn joint_origin(model: &ModelInstance, name: &str) -> Vec3 {
    let bone = model.skeleton().find_bone(name).expect("bone exists");
    let set = model.ragdoll().working_set();
    let index = set.joint_index(bone).expect("bone in working set");
    set.effector(index).current_origin
}

/// 记录所有事件
#[derive(Default)]
pub struct Recorder {
    pub snapped: Mutex<Vec<(String, bool)>>,
    pub in_solid: Mutex<Vec<String>>,
    pub settled: AtomicUsize,
}

impl Recorder {
    pub fn settled_count(&self) -> usize {
        self.settled.load(Ordering::SeqCst)
    }

    pub fn solid_bones(&self) -> Vec<String> {
        self.in_solid.lock().unwrap().clone()
    }
}

impl RagdollEvents for Recorder {
    fn bone_snapped(&self, bone: &str, snapped: bool) {
        self.snapped.lock().unwrap().push((bone.to_string(), snapped));
    }

    fn bone_in_solid(&self, bone: &str, _position: Vec3, _solid_count: u32) {
        self.in_solid.lock().unwrap().push(bone.to_string());
    }

    fn ragdoll_settled(&self) {
        self.settled.fetch_add(1, Ordering::SeqCst);
    }
}
