//! MMD 刚体
//!
//! 将 [`RigidBodyDesc`] 转换为 rapier 刚体 + 碰撞体，并持有两个运动状态：
//! 运动学状态（骨骼驱动）与活动状态（物理驱动 / 固定）。

use glam::{EulerRot, Mat4, Quat};
use rapier3d::prelude::*;

use super::config::PhysicsConfig;
use super::motion_state::MotionState;
use super::{isometry_to_mat4, mat4_to_isometry};
use crate::model::desc::{RigidBodyDesc, RigidBodyMode, RigidBodyShape};
use crate::skeleton::BoneSet;
use crate::{MmdError, Result};

/// 动态刚体的最小质量（质量为 0 的动态刚体在求解器中不可移动）
const MIN_DYNAMIC_MASS: f32 = 1e-3;

/// MMD 刚体
#[derive(Debug)]
pub struct MmdRigidBody {
    pub name: String,
    pub bone: Option<usize>,
    pub mode: RigidBodyMode,
    /// 所属碰撞组 (0-15)
    pub group: u8,
    /// 可碰撞组掩码
    pub collision_mask: u16,
    pub(crate) handle: RigidBodyHandle,
    collider: ColliderHandle,
    /// 构建时的世界变换
    initial_transform: Mat4,
    /// 骨骼空间 → 刚体空间
    offset: Mat4,
    kinematic_state: MotionState,
    active_state: MotionState,
    /// true = 骨骼驱动（运动学）
    kinematic: bool,
}

/// 刚体在模型空间中的初始变换（欧拉角 YXZ）
pub fn rigid_body_world_transform(desc: &RigidBodyDesc) -> Mat4 {
    let rotation = Quat::from_euler(EulerRot::YXZ, desc.rotation.y, desc.rotation.x, desc.rotation.z);
    Mat4::from_rotation_translation(rotation, desc.position)
}

/// 根据描述创建碰撞形状构建器
fn collider_builder(index: usize, desc: &RigidBodyDesc) -> Result<ColliderBuilder> {
    let invalid = |reason: String| MmdError::InvalidShape {
        index,
        name: desc.name.clone(),
        reason,
    };
    let Some(shape) = desc.shape else {
        return Err(invalid("missing shape".into()));
    };
    if !desc.size.is_finite() {
        return Err(invalid(format!("non-finite size {:?}", desc.size)));
    }

    let size = desc.size;
    match shape {
        RigidBodyShape::Sphere => {
            if size.x <= 0.0 {
                return Err(invalid(format!("sphere radius {} must be positive", size.x)));
            }
            Ok(ColliderBuilder::ball(size.x))
        }
        RigidBodyShape::Box => {
            if size.min_element() <= 0.0 {
                return Err(invalid(format!("box half extents {:?} must be positive", size)));
            }
            Ok(ColliderBuilder::cuboid(size.x, size.y, size.z))
        }
        RigidBodyShape::Capsule => {
            if size.x <= 0.0 || size.y < 0.0 {
                return Err(invalid(format!(
                    "capsule radius {} / height {} out of range",
                    size.x, size.y
                )));
            }
            Ok(ColliderBuilder::capsule_y(size.y * 0.5, size.x))
        }
    }
}

/// 碰撞组过滤：自身组为 1 << group，掩码为可碰撞组
pub fn interaction_groups(group: u8, collision_mask: u16) -> InteractionGroups {
    InteractionGroups::new(
        Group::from_bits_truncate(1u32 << group.min(15)),
        Group::from_bits_truncate(collision_mask as u32),
    )
}

impl MmdRigidBody {
    /// 创建刚体并加入集合
    ///
    /// 形状缺失或尺寸非法时返回 [`MmdError::InvalidShape`]，此时不会向集合插入任何对象。
    pub fn build(
        index: usize,
        desc: &RigidBodyDesc,
        bones: &BoneSet,
        config: &PhysicsConfig,
        bodies: &mut RigidBodySet,
        colliders: &mut ColliderSet,
    ) -> Result<Self> {
        let collider = collider_builder(index, desc)?;

        let bone = usize::try_from(desc.bone)
            .ok()
            .filter(|&b| b < bones.bone_count());
        if bone.is_none() && desc.bone >= 0 {
            log::warn!("刚体 '{}' 的骨骼索引 {} 越界，视为无骨骼", desc.name, desc.bone);
        }

        let world = rigid_body_world_transform(desc);
        let offset = match bone {
            Some(b) => bones.global_transform(b).inverse() * world,
            None => Mat4::IDENTITY,
        };

        let kinematic_state = match bone {
            Some(b) => MotionState::kinematic(b, offset),
            None => MotionState::default_fixed(world),
        };
        let active_state = match (desc.mode, bone) {
            (RigidBodyMode::Static, _) => kinematic_state.clone(),
            (RigidBodyMode::Dynamic, Some(b)) => MotionState::dynamic(b, offset, bones.global_transform(b)),
            (RigidBodyMode::DynamicWithBonePosition, Some(b)) => {
                MotionState::dynamic_with_bone_merge(b, offset, bones.global_transform(b))
            }
            (_, None) => MotionState::default_fixed(world),
        };

        let dynamic = desc.mode != RigidBodyMode::Static;
        let body = if dynamic {
            RigidBodyBuilder::dynamic()
        } else {
            RigidBodyBuilder::kinematic_position_based()
        }
        .position(mat4_to_isometry(&world))
        .linear_damping(desc.linear_damping * config.linear_damping_scale)
        .angular_damping(desc.angular_damping * config.angular_damping_scale)
        .build();

        let mass = if dynamic {
            (desc.mass * config.mass_scale).max(MIN_DYNAMIC_MASS)
        } else {
            desc.mass.max(0.0)
        };
        let collider = collider
            .mass(mass)
            .friction(desc.friction)
            .restitution(desc.restitution)
            .collision_groups(interaction_groups(desc.group, desc.collision_mask))
            .build();

        let handle = bodies.insert(body);
        let collider = colliders.insert_with_parent(collider, handle, bodies);

        Ok(Self {
            name: desc.name.clone(),
            bone,
            mode: desc.mode,
            group: desc.group,
            collision_mask: desc.collision_mask,
            handle,
            collider,
            initial_transform: world,
            offset,
            kinematic_state,
            active_state,
            kinematic: !dynamic,
        })
    }

    #[inline]
    pub fn handle(&self) -> RigidBodyHandle {
        self.handle
    }

    #[inline]
    pub fn collider_handle(&self) -> ColliderHandle {
        self.collider
    }

    #[inline]
    pub fn initial_transform(&self) -> Mat4 {
        self.initial_transform
    }

    #[inline]
    pub fn offset(&self) -> Mat4 {
        self.offset
    }

    /// 当前是否由骨骼驱动（静态模式始终为 true）
    #[inline]
    pub fn is_kinematic(&self) -> bool {
        self.kinematic || self.mode == RigidBodyMode::Static
    }

    /// 当前生效的运动状态
    pub fn motion_state(&self) -> &MotionState {
        if self.is_kinematic() {
            &self.kinematic_state
        } else {
            &self.active_state
        }
    }

    /// 切换驱动方式
    ///
    /// `activation == true` 表示骨骼驱动（运动学），`false` 表示交给物理。
    /// 静态模式刚体始终保持运动学。
    pub fn set_activation(&mut self, activation: bool, bodies: &mut RigidBodySet) {
        self.kinematic = activation;
        let body_type = if self.is_kinematic() {
            RigidBodyType::KinematicPositionBased
        } else {
            RigidBodyType::Dynamic
        };
        if let Some(body) = bodies.get_mut(self.handle) {
            if body.body_type() != body_type {
                body.set_body_type(body_type, true);
            }
        }
    }

    /// 活动状态回到骨骼当前姿势
    pub fn reset_transform(&mut self, bones: &BoneSet) {
        self.active_state.reset(bones);
    }

    /// 当前运动状态给出的世界变换
    pub fn world_transform(&self, bones: &BoneSet) -> Mat4 {
        self.motion_state().world_transform(bones)
    }

    /// 把物理结果写回骨骼全局变换
    pub fn reflect_global_transform(&self, bones: &mut BoneSet) {
        self.active_state.reflect_global_transform(bones);
    }

    /// 由全局变换反推局部变换
    pub fn calc_local_transform(&self, bones: &mut BoneSet) {
        if let Some(bone) = self.bone {
            bones.calc_local_from_global(bone);
        }
    }

    /// 把运动学状态推到 rapier 刚体（子步前调用）
    pub(crate) fn push_kinematic(&self, bones: &BoneSet, bodies: &mut RigidBodySet) {
        if !self.is_kinematic() {
            return;
        }
        let world = self.kinematic_state.world_transform(bones);
        if let Some(body) = bodies.get_mut(self.handle) {
            body.set_next_kinematic_position(mat4_to_isometry(&world));
        }
    }

    /// 读取 rapier 刚体位姿写入活动状态（步进后调用）
    pub(crate) fn pull_dynamic(&mut self, bodies: &RigidBodySet) {
        if self.is_kinematic() {
            return;
        }
        if let Some(body) = bodies.get(self.handle) {
            self.active_state.set_world_transform(isometry_to_mat4(body.position()));
        }
    }

    /// 传送刚体到当前运动状态的位置，清除速度与受力
    pub(crate) fn teleport(&self, bones: &BoneSet, bodies: &mut RigidBodySet) {
        let world = mat4_to_isometry(&self.world_transform(bones));
        if let Some(body) = bodies.get_mut(self.handle) {
            body.set_position(world, true);
            if self.is_kinematic() {
                body.set_next_kinematic_position(world);
            }
            body.set_linvel(vector![0.0, 0.0, 0.0], true);
            body.set_angvel(vector![0.0, 0.0, 0.0], true);
            body.reset_forces(true);
            body.reset_torques(true);
            body.wake_up(true);
        }
    }

    /// 速度钳制
    pub(crate) fn clamp_velocity(&self, config: &PhysicsConfig, bodies: &mut RigidBodySet) {
        if self.is_kinematic() {
            return;
        }
        let Some(body) = bodies.get_mut(self.handle) else {
            return;
        };
        let linvel = *body.linvel();
        let speed = linvel.norm();
        if speed > config.max_linear_velocity {
            body.set_linvel(linvel * (config.max_linear_velocity / speed), false);
        }
        let angvel = *body.angvel();
        let speed = angvel.norm();
        if speed > config.max_angular_velocity {
            body.set_angvel(angvel * (config.max_angular_velocity / speed), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::desc::BoneDesc;
    use glam::Vec3;

    fn desc(shape: Option<RigidBodyShape>, size: Vec3) -> RigidBodyDesc {
        RigidBodyDesc {
            name: "skirt".into(),
            bone: 1,
            group: 3,
            collision_mask: 0b1111_1111_1111_0111,
            shape,
            size,
            position: Vec3::new(0.0, 1.5, 0.2),
            rotation: Vec3::new(0.3, 0.2, 0.1),
            mass: 1.0,
            linear_damping: 0.5,
            angular_damping: 0.5,
            restitution: 0.0,
            friction: 0.5,
            mode: RigidBodyMode::Dynamic,
        }
    }

    fn bones() -> BoneSet {
        BoneSet::from_descs(&[
            BoneDesc::new("root", -1, Vec3::ZERO),
            BoneDesc::new("hip", 0, Vec3::new(0.0, 2.0, 0.0)),
        ])
    }

    #[test]
    fn test_shape_errors() {
        let bones = bones();
        let config = PhysicsConfig::default();
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();
        let cases = [
            desc(None, Vec3::ONE),
            desc(Some(RigidBodyShape::Sphere), Vec3::ZERO),
            desc(Some(RigidBodyShape::Box), Vec3::new(1.0, -1.0, 1.0)),
            desc(Some(RigidBodyShape::Capsule), Vec3::new(f32::NAN, 1.0, 0.0)),
        ];
        for (i, case) in cases.iter().enumerate() {
            let result = MmdRigidBody::build(i, case, &bones, &config, &mut bodies, &mut colliders);
            assert!(matches!(result, Err(MmdError::InvalidShape { index, .. }) if index == i));
        }
        assert_eq!(bodies.len(), 0);
        assert_eq!(colliders.len(), 0);
    }

    #[test]
    fn test_collision_groups() {
        let groups = interaction_groups(3, 0b0101);
        assert_eq!(groups.memberships.bits(), 1 << 3);
        assert_eq!(groups.filter.bits(), 0b0101);
        // 组号上限 15
        assert_eq!(interaction_groups(40, 0).memberships.bits(), 1 << 15);
    }

    #[test]
    fn test_euler_yxz() {
        let d = desc(Some(RigidBodyShape::Sphere), Vec3::ONE);
        let world = rigid_body_world_transform(&d);
        let expected = Quat::from_rotation_y(0.2) * Quat::from_rotation_x(0.3) * Quat::from_rotation_z(0.1);
        let (_, rotation, translation) = world.to_scale_rotation_translation();
        assert!(rotation.angle_between(expected) < 1e-5);
        assert_eq!(translation, d.position);
    }

    #[test]
    fn test_offset_round_trip() {
        let bones = bones();
        let config = PhysicsConfig::default();
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();
        let d = desc(Some(RigidBodyShape::Capsule), Vec3::new(0.2, 1.0, 0.0));
        let mut body = MmdRigidBody::build(0, &d, &bones, &config, &mut bodies, &mut colliders).unwrap();

        assert!(!body.is_kinematic());
        assert!((bones.global_transform(1) * body.offset()).abs_diff_eq(body.initial_transform(), 1e-5));
        assert!(body.world_transform(&bones).abs_diff_eq(body.initial_transform(), 1e-5));

        body.set_activation(true, &mut bodies);
        assert!(body.is_kinematic());
        assert!(bodies[body.handle()].is_kinematic());
        body.set_activation(false, &mut bodies);
        assert!(bodies[body.handle()].is_dynamic());
    }

    #[test]
    fn test_static_stays_kinematic() {
        let bones = bones();
        let config = PhysicsConfig::default();
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();
        let mut d = desc(Some(RigidBodyShape::Box), Vec3::ONE);
        d.mode = RigidBodyMode::Static;
        let mut body = MmdRigidBody::build(0, &d, &bones, &config, &mut bodies, &mut colliders).unwrap();
        body.set_activation(false, &mut bodies);
        assert!(body.is_kinematic());
        assert!(bodies[body.handle()].is_kinematic());
    }
}
