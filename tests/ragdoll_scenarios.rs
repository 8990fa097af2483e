//! 完整的布娃娃 / IK 场景

mod common;

use std::sync::Arc;

use common::{init_logger, instance, joint_origin, Recorder, FRAMES};
use glam::Vec3;
use ragdoll_engine::physics::GoalSource;
use ragdoll_engine::{
    step_instances, AngleLimits, AngleRequest, AnimationClock, BoneOverrideTable, FloorPlane, IkJointParams,
    IkState, JointFlags, ManualClock, ModelInstance, NoCollision, RagToBase, RagdollConfig, RagdollPhase,
    RagdollStartParams, RagdollUpdateParams, SkeletonSource, SkeletonTopology, SolveState,
    TickOutcome,
};

fn start_params() -> RagdollStartParams {
    RagdollStartParams::new(Vec3::ZERO, 0, FRAMES as i32)
}

fn start(model: &mut ModelInstance, tracer: &FloorPlane) {
    let started = model
        .start_ragdoll(RagdollPhase::CorpseShot, &start_params(), tracer, 0)
        .unwrap();
    assert!(started);
}

fn angles_of(model: &ModelInstance, name: &str) -> Vec3 {
    let bone = model.skeleton().find_bone(name).unwrap();
    let slot = model.table().find_bone(bone).unwrap();
    model.table().get(slot).unwrap().physics().unwrap().current_angles
}

#[test]
fn test_working_set_is_parent_first() {
    init_logger();
    let mut model = instance(RagdollConfig::default());
    start(&mut model, &FloorPlane::new(0.0));

    let set = model.ragdoll().working_set();
    assert_eq!(set.len(), 23);
    for (i, joint) in set.joints().iter().enumerate() {
        if let Some(parent) = joint.parent_joint {
            assert!(parent < i, "parent {} after child {}", parent, i);
        }
        assert!(joint.dependents.iter().all(|&d| d > i));
        let depth = model.topology().depth(joint.bone);
        for &d in &joint.dependents {
            assert!(model.topology().depth(set.joint(d).bone) > depth);
        }
    }
}

#[test]
fn test_cranium_stays_within_limits() {
    init_logger();
    let mut model = instance(RagdollConfig::default());
    let floor = FloorPlane::new(0.0);
    start(&mut model, &floor);

    let limits = model.rig().joint("cranium").unwrap().limits;
    let params = RagdollUpdateParams::new(Vec3::ZERO);
    for t in 1..=10 {
        model.tick_at(&params, &floor, t * 50).unwrap();
        // 不可断裂的关节每一步都被夹紧
        assert!(limits.contains(angles_of(&model, "cranium")));
    }
}

#[test]
fn test_angles_clamped_unless_snapped() {
    init_logger();
    let config = RagdollConfig::default();
    let break_multiplier = config.break_multiplier;
    let mut model = instance(config);
    let floor = FloorPlane::new(0.0);
    start(&mut model, &floor);

    let params = RagdollUpdateParams::new(Vec3::ZERO).with_velocity(Vec3::new(0.0, 0.0, -40.0));
    for t in 1..=40 {
        model.tick_at(&params, &floor, t * 50).unwrap();
        for (_, entry) in model.table().iter() {
            let Some(joint) = entry.physics() else {
                continue;
            };
            let multiplier = if joint.is_unsnappable() { 1.0 } else { break_multiplier };
            assert!(
                joint.snapped || joint.limits.scaled(multiplier).contains(joint.current_angles),
                "bone {} angles {:?} outside {:?}",
                entry.bone,
                joint.current_angles,
                joint.limits
            );
            assert!(joint.current_angles.is_finite());
        }
    }
}

#[test]
fn test_start_solid_returns_to_base_pose() {
    init_logger();
    let mut config = RagdollConfig::default();
    config.rag_to_base = RagToBase::Direct;
    let recorder = Arc::new(Recorder::default());
    let mut model = instance(config).with_events(recorder.clone());

    // 地面高于脚踝和膝盖
    let floor = FloorPlane::new(30.0);
    start(&mut model, &floor);
    model
        .tick_at(&RagdollUpdateParams::new(Vec3::ZERO), &floor, 50)
        .unwrap();

    let bone = model.skeleton().find_bone("rtalus").unwrap();
    let set = model.ragdoll().working_set();
    let talus = set.joint_index(bone).unwrap();
    assert_eq!(set.effector(talus).goal_source, GoalSource::BasePose);
    assert!(!recorder.solid_bones().is_empty());

    let (min, max) = model.bounds().unwrap();
    assert!(min.is_finite() && max.is_finite());
    assert!(min.cmple(max).all());
}

#[test]
fn test_start_solid_pushes_out_without_base_pose() {
    init_logger();
    let mut model = instance(RagdollConfig::default());
    let floor = FloorPlane::new(30.0);
    start(&mut model, &floor);
    model
        .tick_at(&RagdollUpdateParams::new(Vec3::ZERO), &floor, 50)
        .unwrap();

    let bone = model.skeleton().find_bone("rtalus").unwrap();
    let set = model.ragdoll().working_set();
    let talus = set.joint_index(bone).unwrap();
    assert_eq!(set.effector(talus).goal_source, GoalSource::PushOut);
}

#[test]
fn test_free_slot_reuse() {
    let skeleton = common::humanoid();
    let mut table = BoneOverrideTable::new(8);
    let request = AngleRequest::new(Vec3::new(10.0, 0.0, 0.0));

    table.set_angles(&skeleton, "rhand", &request).unwrap();
    table.set_angles(&skeleton, "lhand", &request).unwrap();
    let peak = table.len();

    assert!(table.stop_angles(&skeleton, "rhand").unwrap());
    table.set_angles(&skeleton, "cranium", &request).unwrap();
    assert!(table.len() <= peak + 1);
    assert_eq!(table.len(), peak);
}

#[test]
fn test_composition_idempotent_while_ragdolling() {
    init_logger();
    let mut model = instance(RagdollConfig::default());
    let floor = FloorPlane::new(0.0);
    start(&mut model, &floor);
    model
        .tick_at(&RagdollUpdateParams::new(Vec3::ZERO), &floor, 50)
        .unwrap();

    let a = model.compose_at(75);
    let b = model.compose_at(75);
    assert_eq!(a.as_slice(), b.as_slice());
}

#[test]
fn test_settle_convergence() {
    init_logger();
    let recorder = Arc::new(Recorder::default());
    let mut model = instance(RagdollConfig::default()).with_events(recorder.clone());
    let floor = FloorPlane::new(0.0);
    start(&mut model, &floor);

    let params = RagdollUpdateParams::new(Vec3::ZERO);
    let mut first_settling = None;
    let mut first_settled = None;
    let mut t = 0;
    while t < 3000 {
        t += 50;
        let TickOutcome::Solved(state) = model.tick_at(&params, &floor, t).unwrap() else {
            panic!("ragdoll stopped solving");
        };
        match state {
            SolveState::Settling if first_settling.is_none() => first_settling = Some(t),
            SolveState::Settled if first_settled.is_none() => first_settled = Some(t),
            _ => {}
        }
        if first_settled.is_some() {
            assert_eq!(state, SolveState::Settled);
        }
    }

    assert_eq!(first_settling, Some(1050));
    assert_eq!(first_settled, Some(2100));
    assert_eq!(recorder.settled_count(), 1);

    // 静止后姿态不再变化
    let before = model.compose_at(3050);
    model.tick_at(&params, &floor, 3100).unwrap();
    let after = model.compose_at(3500);
    for (x, y) in before.as_slice().iter().zip(after.as_slice()) {
        assert!(x.abs_diff_eq(*y, 1e-4));
    }
}

#[test]
fn test_settle_driven_by_clock() {
    init_logger();
    let clock = Arc::new(ManualClock::new(0));
    let recorder = Arc::new(Recorder::default());
    let mut model = instance(RagdollConfig::default())
        .with_events(recorder.clone())
        .with_clock(clock.clone());
    let floor = FloorPlane::new(0.0);
    start(&mut model, &floor);

    let params = RagdollUpdateParams::new(Vec3::ZERO);
    let mut first_settling = None;
    let mut first_settled = None;
    while clock.advance(50) <= 2500 {
        assert_eq!(model.now(), clock.current_time_ms());
        let TickOutcome::Solved(state) = model.tick(&params, &floor).unwrap() else {
            panic!("ragdoll stopped solving");
        };
        match state {
            SolveState::Settling if first_settling.is_none() => first_settling = Some(model.now()),
            SolveState::Settled if first_settled.is_none() => first_settled = Some(model.now()),
            _ => {}
        }
    }

    assert_eq!(first_settling, Some(1050));
    assert_eq!(first_settled, Some(2100));
    assert_eq!(recorder.settled_count(), 1);

    // 时钟不动时，姿态与显式时间的结果一致
    assert_eq!(model.compose().as_slice(), model.compose_at(clock.current_time_ms()).as_slice());
}

#[test]
fn test_impact_wakes_settled_ragdoll() {
    init_logger();
    let recorder = Arc::new(Recorder::default());
    let mut model = instance(RagdollConfig::default()).with_events(recorder.clone());
    let floor = FloorPlane::new(0.0);
    start(&mut model, &floor);

    let params = RagdollUpdateParams::new(Vec3::ZERO);
    let mut t = 0;
    while t < 2100 {
        t += 50;
        model.tick_at(&params, &floor, t).unwrap();
    }
    assert_eq!(model.tick_at(&params, &floor, t + 50).unwrap(), TickOutcome::Solved(SolveState::Settled));

    // 太近的射击不产生冲击
    assert_eq!(model.apply_impact(Vec3::new(0.0, 0.0, 40.0), Vec3::new(0.0, 0.0, 40.5), t), 0);
    let kicked = model.apply_impact(Vec3::new(0.0, 0.0, 40.0), Vec3::new(-100.0, 0.0, 40.0), t + 60);
    assert_eq!(kicked, 23);
    assert_eq!(model.tick_at(&params, &floor, t + 100).unwrap(), TickOutcome::Solved(SolveState::Dynamic));

    // 移动实体同样会唤醒
    let mut model = instance(RagdollConfig::default());
    start(&mut model, &floor);
    let mut t = 0;
    while t < 2100 {
        t += 50;
        model.tick_at(&params, &floor, t).unwrap();
    }
    let moved = RagdollUpdateParams::new(Vec3::new(10.0, 0.0, 0.0));
    assert_eq!(model.tick_at(&moved, &floor, t + 50).unwrap(), TickOutcome::Solved(SolveState::Dynamic));
    assert_eq!(recorder.settled_count(), 1);
}

#[test]
fn test_ik_reaches_toward_target() {
    init_logger();
    let mut model = instance(RagdollConfig::default());
    assert_eq!(model.init_ik(0).unwrap(), 11);

    let shoulder = IkJointParams {
        flags: Some(JointFlags::IK_CONTROLLED),
        ..IkJointParams::new(Vec3::ZERO, 4.0, AngleLimits::default())
    };
    let hand = IkJointParams::new(Vec3::ZERO, 6.0, AngleLimits::default());
    assert!(model.set_ik_state("rhumerus", IkState::Active(shoulder), 0).unwrap());
    assert!(model.set_ik_state("rhand", IkState::Active(hand), 0).unwrap());
    assert!(!model.set_ik_state("rhand", IkState::Active(hand), 0).unwrap());

    let params = RagdollUpdateParams::new(Vec3::ZERO);
    let target = Vec3::new(21.0, -8.0, 39.0);
    model.ik_move(&params, target, 0.4, 0).unwrap();

    let before = (Vec3::new(0.0, -8.0, 30.0) - target).length();
    for t in 1..=5 {
        let outcome = model.tick_at(&params, &NoCollision, t * 50).unwrap();
        assert_eq!(outcome, TickOutcome::Solved(SolveState::Dynamic));
    }
    let after = (joint_origin(&model, "rhand") - target).length();
    assert!(after < before, "hand moved away: {} -> {}", before, after);

    assert!(model.set_ik_state("rhand", IkState::None, 300).unwrap());
    assert!(!model.set_ik_state("rhand", IkState::None, 300).unwrap());

    model.reset_ik();
    assert!(model.table().iter().all(|(_, e)| !e.is_physics()));
    assert_eq!(model.tick_at(&params, &NoCollision, 400).unwrap(), TickOutcome::Animated);
}

#[test]
fn test_step_instances_in_parallel() {
    init_logger();
    let skeleton: Arc<dyn SkeletonSource> = Arc::new(common::humanoid());
    let topology = Arc::new(SkeletonTopology::build(skeleton.as_ref()).unwrap());
    let floor = FloorPlane::new(0.0);

    let mut models: Vec<ModelInstance> = (0..4)
        .map(|_| ModelInstance::with_topology(skeleton.clone(), topology.clone(), RagdollConfig::default()))
        .collect();
    for model in &mut models {
        start(model, &floor);
    }

    let params = vec![RagdollUpdateParams::new(Vec3::ZERO); models.len()];
    for t in 1..=3 {
        let results = step_instances(&mut models, &params, &floor, t * 50);
        assert_eq!(results.len(), 4);
        for r in results {
            assert_eq!(r.unwrap(), TickOutcome::Solved(SolveState::Dynamic));
        }
    }

    // 相同种子、相同输入得到相同结果
    let hand = joint_origin(&models[0], "rhand");
    for model in &models[1..] {
        assert_eq!(joint_origin(model, "rhand"), hand);
    }
}
