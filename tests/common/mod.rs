//! 集成测试共用的模型数据与断言
#![allow(dead_code)]

use glam::{Mat4, Vec2, Vec3, Vec4};
use mmd_runtime::model::desc::{
    BoneDesc, IkDesc, IkLinkDesc, JointDesc, MaterialDesc, ModelDesc, RigidBodyDesc, RigidBodyMode,
    RigidBodyShape, VertexDesc, VertexWeight,
};
use mmd_runtime::skeleton::BoneSet;
use mmd_runtime::{MmdModel, ModelConfig, PhysicsConfig, SkinningConfig};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn assert_vec3_near(actual: Vec3, expected: Vec3, eps: f32) {
    assert!(
        (actual - expected).length() <= eps,
        "expected {expected:?}, got {actual:?}"
    );
}

/// global == parent_global * local（根骨骼 global == local）
pub fn assert_hierarchy_invariant(bones: &BoneSet) {
    for (i, bone) in bones.bones().iter().enumerate() {
        let expected = match bone.parent_id() {
            Some(p) => bones.global_transform(p) * bone.local_transform(),
            None => bone.local_transform(),
        };
        assert!(
            bones.global_transform(i).abs_diff_eq(expected, 1e-4),
            "bone {} '{}' breaks the hierarchy invariant",
            i,
            bone.name
        );
    }
}

pub fn vertex(position: Vec3, weight: VertexWeight) -> VertexDesc {
    VertexDesc {
        position,
        normal: Vec3::Y,
        uv: Vec2::new(0.25, 0.75),
        weight,
    }
}

pub fn no_physics() -> ModelConfig {
    ModelConfig {
        physics: None,
        skinning: SkinningConfig::default(),
    }
}

/// 单根骨骼 + 两个材质
pub fn single_bone_model() -> ModelDesc {
    ModelDesc {
        name: "plate".into(),
        vertices: vec![
            vertex(Vec3::ONE, VertexWeight::Bdef1 { bone: 0 }),
            vertex(Vec3::new(-1.0, 0.0, 2.0), VertexWeight::Bdef1 { bone: 0 }),
        ],
        bones: vec![BoneDesc::new("center", -1, Vec3::ZERO)],
        materials: vec![
            MaterialDesc::new("face", Vec4::new(0.8, 0.7, 0.6, 1.0)),
            MaterialDesc::new("hair", Vec4::new(0.2, 0.1, 0.1, 1.0)),
        ],
        ..ModelDesc::default()
    }
}

/// 两节链（link 绕原点旋转，effector 在其上方 1 单位）+ 独立的 IK 骨骼
///
/// `limits` 为 link 的角度限制，`goal` 为 IK 骨骼位置。
pub fn ik_chain_model(goal: Vec3, iterations: u32, limit_angle: f32, limits: Option<(Vec3, Vec3)>) -> ModelDesc {
    let mut ik = BoneDesc::new("leg_ik", -1, goal);
    ik.ik = Some(IkDesc {
        target: 1,
        iterations,
        limit_angle,
        links: vec![IkLinkDesc { bone: 0, limits }],
    });
    ModelDesc {
        name: "ik_chain".into(),
        vertices: vec![vertex(Vec3::new(0.0, 1.0, 0.0), VertexWeight::Bdef1 { bone: 1 })],
        bones: vec![
            BoneDesc::new("knee", -1, Vec3::ZERO),
            BoneDesc::new("ankle", 0, Vec3::new(0.0, 1.0, 0.0)),
            ik,
        ],
        ..ModelDesc::default()
    }
}

fn sphere(name: &str, bone: i32, position: Vec3, mode: RigidBodyMode) -> RigidBodyDesc {
    RigidBodyDesc {
        name: name.into(),
        bone,
        group: 1,
        collision_mask: 0xFFFF & !(1 << 1),
        shape: Some(RigidBodyShape::Sphere),
        size: Vec3::splat(0.1),
        position,
        rotation: Vec3::ZERO,
        mass: 1.0,
        linear_damping: 0.5,
        angular_damping: 0.5,
        restitution: 0.0,
        friction: 0.5,
        mode,
    }
}

/// 头 + 两节头发，头部刚体跟随骨骼，头发刚体由物理驱动
pub fn hair_model() -> ModelDesc {
    let joint = |name: &str, a: i32, b: i32, y: f32| JointDesc {
        name: name.into(),
        rigid_body_a: a,
        rigid_body_b: b,
        position: Vec3::new(0.0, y, 0.0),
        rotation: Vec3::ZERO,
        linear_min: Vec3::ZERO,
        linear_max: Vec3::ZERO,
        angular_min: Vec3::splat(-0.6),
        angular_max: Vec3::splat(0.6),
        linear_spring: Vec3::ZERO,
        angular_spring: Vec3::splat(5.0),
    };
    ModelDesc {
        name: "hair".into(),
        vertices: vec![
            vertex(Vec3::new(0.0, 2.5, 0.0), VertexWeight::Bdef1 { bone: 1 }),
            vertex(Vec3::new(0.0, 1.75, 0.0), VertexWeight::Bdef2 { bones: [2, 3], weight: 0.5 }),
        ],
        bones: vec![
            BoneDesc::new("center", -1, Vec3::ZERO),
            BoneDesc::new("head", 0, Vec3::new(0.0, 2.5, 0.0)),
            BoneDesc::new("hair_1", 1, Vec3::new(0.0, 2.0, 0.0)),
            BoneDesc::new("hair_2", 2, Vec3::new(0.0, 1.5, 0.0)),
        ],
        rigid_bodies: vec![
            sphere("head", 1, Vec3::new(0.0, 2.5, 0.0), RigidBodyMode::Static),
            sphere("hair_1", 2, Vec3::new(0.0, 1.75, 0.0), RigidBodyMode::Dynamic),
            sphere("hair_2", 3, Vec3::new(0.0, 1.25, 0.0), RigidBodyMode::DynamicWithBonePosition),
        ],
        joints: vec![joint("head_hair", 0, 1, 2.0), joint("hair_hair", 1, 2, 1.5)],
        ..ModelDesc::default()
    }
}

pub fn build_with_physics(desc: &ModelDesc) -> MmdModel {
    MmdModel::build(
        desc,
        ModelConfig {
            physics: Some(PhysicsConfig::default()),
            skinning: SkinningConfig::default(),
        },
    )
    .expect("model with valid shapes builds")
}

pub fn globals(bones: &BoneSet) -> Vec<Mat4> {
    bones.global_transforms().to_vec()
}
