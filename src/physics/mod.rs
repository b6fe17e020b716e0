//! MMD 物理系统（rapier3d）
//!
//! 刚体在骨骼驱动与物理驱动之间切换，动态刚体的结果回写到骨骼全局变换。

pub mod config;
pub mod mmd_joint;
pub mod mmd_physics;
pub mod mmd_rigid_body;
pub mod motion_state;

pub use config::PhysicsConfig;
pub use mmd_joint::{AxisState, MmdJoint};
pub use mmd_physics::MMDPhysics;
pub use mmd_rigid_body::MmdRigidBody;
pub use motion_state::MotionState;

use glam::{Mat4, Quat, Vec3};
use rapier3d::na::{Isometry3, Quaternion, Translation3, UnitQuaternion};

/// glam 矩阵 → rapier 位姿（忽略缩放）
pub(crate) fn mat4_to_isometry(m: &Mat4) -> Isometry3<f32> {
    let (_, rotation, translation) = m.to_scale_rotation_translation();
    Isometry3::from_parts(
        Translation3::new(translation.x, translation.y, translation.z),
        UnitQuaternion::from_quaternion(Quaternion::new(rotation.w, rotation.x, rotation.y, rotation.z)),
    )
}

/// rapier 位姿 → glam 矩阵
pub(crate) fn isometry_to_mat4(iso: &Isometry3<f32>) -> Mat4 {
    let c = iso.rotation.coords;
    let t = iso.translation.vector;
    Mat4::from_rotation_translation(Quat::from_xyzw(c.x, c.y, c.z, c.w), Vec3::new(t.x, t.y, t.z))
}
