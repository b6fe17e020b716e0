//! MMD 物理世界管理器
//!
//! 使用 rapier3d 引擎，管理刚体、关节与固定步长步进。
//! 流程：build_physics → 每帧 [set_activation(false) → update → reflect → calc_local]

use std::num::NonZeroUsize;

use glam::Vec3;
use rapier3d::prelude::*;

use super::config::PhysicsConfig;
use super::mmd_joint::MmdJoint;
use super::mmd_rigid_body::MmdRigidBody;
use crate::model::desc::{JointDesc, RigidBodyDesc, RigidBodyMode};
use crate::skeleton::BoneSet;
use crate::Result;

/// MMD 物理世界管理器（rapier3d）
///
/// 物理在模型空间运行，与骨骼全局变换共用坐标系。
pub struct MMDPhysics {
    config: PhysicsConfig,
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,

    /// MMD 刚体数据列表
    rigid_bodies: Vec<MmdRigidBody>,
    /// MMD 关节数据列表
    joints: Vec<MmdJoint>,
    /// 未消耗的累计时间
    accumulated_time: f32,
    /// 已执行的子步总数
    step_count: u64,
}

impl MMDPhysics {
    /// 创建新的物理世界
    pub fn new(config: PhysicsConfig) -> Self {
        let integration_parameters = IntegrationParameters {
            dt: config.fixed_time_step(),
            num_solver_iterations: NonZeroUsize::new(config.solver_iterations.max(1))
                .unwrap_or(NonZeroUsize::MIN),
            ..IntegrationParameters::default()
        };

        if config.debug_log {
            log::info!("[rapier] 物理世界创建: FPS={}, 重力Y={}", config.physics_fps, config.gravity_y);
        }

        Self {
            gravity: vector![0.0, config.gravity_y, 0.0],
            integration_parameters,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            rigid_bodies: Vec::new(),
            joints: Vec::new(),
            accumulated_time: 0.0,
            step_count: 0,
            config,
        }
    }

    /// 构建物理系统
    ///
    /// 一次性创建所有刚体和关节。任何刚体形状非法时整体失败。
    /// 骨骼需已完成初始全局变换计算。
    pub fn build_physics(
        &mut self,
        rigid_body_descs: &[RigidBodyDesc],
        joint_descs: &[JointDesc],
        bones: &BoneSet,
    ) -> Result<()> {
        // 第一步：创建所有刚体
        self.rigid_bodies.reserve(rigid_body_descs.len());
        for (index, desc) in rigid_body_descs.iter().enumerate() {
            let body = MmdRigidBody::build(
                index,
                desc,
                bones,
                &self.config,
                &mut self.bodies,
                &mut self.colliders,
            )?;
            self.rigid_bodies.push(body);
        }

        // 第二步：创建关节
        if self.config.joints_enabled {
            self.joints.reserve(joint_descs.len());
            for desc in joint_descs {
                if let Some(joint) =
                    MmdJoint::build(desc, &self.rigid_bodies, &self.config, &mut self.impulse_joints)
                {
                    self.joints.push(joint);
                }
            }
        }

        let count = |mode| self.rigid_bodies.iter().filter(|rb| rb.mode == mode).count();
        log::info!(
            "物理构建完成: {} 刚体 ({}跟骨 + {}物理 + {}物理跟骨), {} 关节",
            self.rigid_bodies.len(),
            count(RigidBodyMode::Static),
            count(RigidBodyMode::Dynamic),
            count(RigidBodyMode::DynamicWithBonePosition),
            self.joints.len()
        );
        Ok(())
    }

    /// 切换所有刚体的驱动方式（true = 骨骼驱动）
    pub fn set_activation(&mut self, activation: bool) {
        for rb in &mut self.rigid_bodies {
            rb.set_activation(activation, &mut self.bodies);
        }
    }

    /// 推进模拟
    ///
    /// 按固定步长累计时间，每帧最多执行 `max_substep_count` 个子步，
    /// 多余时间丢弃。每个子步前运动学刚体跟随骨骼，之后钳制动态刚体速度。
    pub fn update(&mut self, elapsed: f32, bones: &BoneSet) {
        let fixed = self.integration_parameters.dt;
        if fixed <= 0.0 || !elapsed.is_finite() {
            return;
        }
        self.accumulated_time += elapsed.max(0.0);
        let available = (self.accumulated_time / fixed).floor() as u32;
        self.accumulated_time -= available as f32 * fixed;
        let steps = available.min(self.config.max_substep_count);

        for _ in 0..steps {
            self.step_once(bones);
        }
        self.pull_dynamic();
    }

    fn pull_dynamic(&mut self) {
        for rb in &mut self.rigid_bodies {
            rb.pull_dynamic(&self.bodies);
        }
    }

    fn step_once(&mut self, bones: &BoneSet) {
        for rb in &self.rigid_bodies {
            rb.push_kinematic(bones, &mut self.bodies);
        }

        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
        self.step_count += 1;

        for rb in &self.rigid_bodies {
            rb.clamp_velocity(&self.config, &mut self.bodies);
        }
    }

    /// 动态刚体结果写回骨骼
    pub fn reflect_global_transforms(&self, bones: &mut BoneSet) {
        for rb in &self.rigid_bodies {
            rb.reflect_global_transform(bones);
        }
    }

    /// 被物理覆盖的骨骼重新推导局部变换
    pub fn calc_local_transforms(&self, bones: &mut BoneSet) {
        for rb in &self.rigid_bodies {
            rb.calc_local_transform(bones);
        }
    }

    /// 重置物理状态到骨骼当前姿势
    ///
    /// 所有刚体切回骨骼驱动并传送到骨骼位置，清零速度和受力，
    /// 与帧率无关地步进一个固定步长后回写骨骼，避免首帧因位置突变而爆开。
    pub fn reset(&mut self, bones: &mut BoneSet) {
        self.set_activation(true);
        self.accumulated_time = 0.0;
        for rb in &mut self.rigid_bodies {
            rb.reset_transform(bones);
            rb.teleport(bones, &mut self.bodies);
        }

        self.step_once(bones);
        self.pull_dynamic();

        self.reflect_global_transforms(bones);
        self.calc_local_transforms(bones);
        bones.update_root_global_transforms();
    }

    /// 设置重力
    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = vector![gravity.x, gravity.y, gravity.z];
    }

    pub fn gravity(&self) -> Vec3 {
        Vec3::new(self.gravity.x, self.gravity.y, self.gravity.z)
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn rigid_bodies(&self) -> &[MmdRigidBody] {
        &self.rigid_bodies
    }

    pub fn joints(&self) -> &[MmdJoint] {
        &self.joints
    }

    pub fn rigid_body_count(&self) -> usize {
        self.rigid_bodies.len()
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    /// 自创建以来执行的子步总数
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// rapier 刚体集合（调试绘制用）
    pub fn body_set(&self) -> &RigidBodySet {
        &self.bodies
    }
}

impl std::fmt::Debug for MMDPhysics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MMDPhysics")
            .field("rigid_bodies", &self.rigid_bodies.len())
            .field("joints", &self.joints.len())
            .field("config", &self.config)
            .finish()
    }
}
