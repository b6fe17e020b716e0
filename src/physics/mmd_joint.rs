//! MMD 关节（6 自由度弹簧约束）
//!
//! 每个轴按限制区间决定状态：min == max 锁定，min < max 限制，min > max 自由。
//! 弹簧刚度非零的轴挂一个目标位置为 0 的位置马达。

use glam::{EulerRot, Mat4, Quat, Vec3};
use rapier3d::prelude::*;

use super::config::PhysicsConfig;
use super::mat4_to_isometry;
use super::mmd_rigid_body::MmdRigidBody;
use crate::model::desc::JointDesc;

/// 单轴状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisState {
    Locked,
    Limited(f32, f32),
    Free,
}

impl AxisState {
    pub fn from_range(min: f32, max: f32) -> Self {
        if min == max {
            Self::Locked
        } else if min < max {
            Self::Limited(min, max)
        } else {
            Self::Free
        }
    }
}

const LINEAR_AXES: [(JointAxis, JointAxesMask); 3] = [
    (JointAxis::LinX, JointAxesMask::LIN_X),
    (JointAxis::LinY, JointAxesMask::LIN_Y),
    (JointAxis::LinZ, JointAxesMask::LIN_Z),
];

const ANGULAR_AXES: [(JointAxis, JointAxesMask); 3] = [
    (JointAxis::AngX, JointAxesMask::ANG_X),
    (JointAxis::AngY, JointAxesMask::ANG_Y),
    (JointAxis::AngZ, JointAxesMask::ANG_Z),
];

/// MMD 关节
#[derive(Debug)]
pub struct MmdJoint {
    pub name: String,
    pub rigid_body_a: usize,
    pub rigid_body_b: usize,
    pub(crate) handle: ImpulseJointHandle,
}

/// 关节在模型空间中的变换（欧拉角 YXZ）
pub fn joint_world_transform(desc: &JointDesc) -> Mat4 {
    let rotation = Quat::from_euler(EulerRot::YXZ, desc.rotation.y, desc.rotation.x, desc.rotation.z);
    Mat4::from_rotation_translation(rotation, desc.position)
}

/// 由限制与弹簧参数构建通用关节
pub fn build_generic_joint(
    desc: &JointDesc,
    frame_a: Mat4,
    frame_b: Mat4,
    config: &PhysicsConfig,
) -> GenericJoint {
    let linear = axis_states(desc.linear_min, desc.linear_max);
    let angular = axis_states(desc.angular_min, desc.angular_max);

    let mut locked = JointAxesMask::empty();
    for (state, (_, mask)) in linear.iter().zip(LINEAR_AXES).chain(angular.iter().zip(ANGULAR_AXES)) {
        if *state == AxisState::Locked {
            locked |= mask;
        }
    }

    let mut builder = GenericJointBuilder::new(locked)
        .local_frame1(mat4_to_isometry(&frame_a))
        .local_frame2(mat4_to_isometry(&frame_b))
        .contacts_enabled(false);

    let springs = [desc.linear_spring, desc.angular_spring];
    for (group, (states, axes)) in [(linear, LINEAR_AXES), (angular, ANGULAR_AXES)].into_iter().enumerate() {
        for (i, (state, (axis, _))) in states.iter().zip(axes).enumerate() {
            if let AxisState::Limited(min, max) = *state {
                builder = builder.limits(axis, [min, max]);
            }
            let stiffness = springs[group][i] * config.spring_stiffness_scale;
            if *state != AxisState::Locked && stiffness != 0.0 {
                builder = builder.motor_position(axis, 0.0, stiffness, 0.0);
            }
        }
    }

    builder.build()
}

fn axis_states(min: Vec3, max: Vec3) -> [AxisState; 3] {
    [
        AxisState::from_range(min.x, max.x),
        AxisState::from_range(min.y, max.y),
        AxisState::from_range(min.z, max.z),
    ]
}

impl MmdJoint {
    /// 创建关节并加入集合
    ///
    /// 刚体索引越界或两端为同一刚体时跳过（返回 None）。
    pub fn build(
        desc: &JointDesc,
        rigid_bodies: &[MmdRigidBody],
        config: &PhysicsConfig,
        joints: &mut ImpulseJointSet,
    ) -> Option<Self> {
        let a = usize::try_from(desc.rigid_body_a).ok().filter(|&i| i < rigid_bodies.len());
        let b = usize::try_from(desc.rigid_body_b).ok().filter(|&i| i < rigid_bodies.len());
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) if a != b => (a, b),
            _ => {
                log::warn!(
                    "关节 '{}' 的刚体索引无效 ({}, {})，跳过",
                    desc.name,
                    desc.rigid_body_a,
                    desc.rigid_body_b
                );
                return None;
            }
        };

        let world = joint_world_transform(desc);
        let frame_a = rigid_bodies[a].initial_transform().inverse() * world;
        let frame_b = rigid_bodies[b].initial_transform().inverse() * world;
        let joint = build_generic_joint(desc, frame_a, frame_b, config);
        let handle = joints.insert(rigid_bodies[a].handle, rigid_bodies[b].handle, joint, true);

        Some(Self {
            name: desc.name.clone(),
            rigid_body_a: a,
            rigid_body_b: b,
            handle,
        })
    }

    #[inline]
    pub fn handle(&self) -> ImpulseJointHandle {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> JointDesc {
        JointDesc {
            name: "j".into(),
            rigid_body_a: 0,
            rigid_body_b: 1,
            position: Vec3::new(0.0, 1.0, 0.0),
            rotation: Vec3::ZERO,
            linear_min: Vec3::ZERO,
            linear_max: Vec3::ZERO,
            angular_min: Vec3::new(-0.5, 1.0, 0.0),
            angular_max: Vec3::new(0.5, -1.0, 0.0),
            linear_spring: Vec3::ZERO,
            angular_spring: Vec3::new(10.0, 0.0, 0.0),
        }
    }

    #[test]
    fn test_axis_state() {
        assert_eq!(AxisState::from_range(0.0, 0.0), AxisState::Locked);
        assert_eq!(AxisState::from_range(-1.0, 1.0), AxisState::Limited(-1.0, 1.0));
        assert_eq!(AxisState::from_range(1.0, -1.0), AxisState::Free);
    }

    #[test]
    fn test_locked_axes() {
        let joint = build_generic_joint(&desc(), Mat4::IDENTITY, Mat4::IDENTITY, &PhysicsConfig::default());
        let locked = joint.locked_axes;
        assert!(locked.contains(JointAxesMask::LIN_X | JointAxesMask::LIN_Y | JointAxesMask::LIN_Z));
        assert!(locked.contains(JointAxesMask::ANG_Z));
        assert!(!locked.contains(JointAxesMask::ANG_X));
        assert!(!locked.contains(JointAxesMask::ANG_Y));
    }

    #[test]
    fn test_invalid_bodies_skipped() {
        let mut joints = ImpulseJointSet::new();
        let mut d = desc();
        d.rigid_body_b = 0;
        assert!(MmdJoint::build(&d, &[], &PhysicsConfig::default(), &mut joints).is_none());
        d.rigid_body_a = -1;
        assert!(MmdJoint::build(&d, &[], &PhysicsConfig::default(), &mut joints).is_none());
        assert_eq!(joints.len(), 0);
    }
}
