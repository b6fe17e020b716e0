//! 刚体运动状态
//!
//! 负责骨骼与刚体之间的变换交换。每个刚体持有两个运动状态：
//! 运动学状态（由骨骼驱动）与活动状态（由物理驱动或固定），
//! 同一时刻只有一个生效。
//!
//! 约定：刚体世界变换 = 骨骼全局变换 * offset。

use glam::Mat4;

use crate::skeleton::BoneSet;

/// 运动状态
#[derive(Debug, Clone, PartialEq)]
pub enum MotionState {
    /// 每步由骨骼当前全局变换推导
    Kinematic { bone: usize, offset: Mat4 },
    /// 无骨骼：保存刚体自身变换，重置时回到初始值
    DefaultFixed { initial: Mat4, transform: Mat4 },
    /// 物理驱动骨骼
    Dynamic {
        bone: usize,
        offset: Mat4,
        inv_offset: Mat4,
        transform: Mat4,
    },
    /// 物理驱动骨骼旋转，位置保持骨骼自身
    DynamicWithBoneMerge {
        bone: usize,
        offset: Mat4,
        inv_offset: Mat4,
        transform: Mat4,
    },
}

impl MotionState {
    pub fn kinematic(bone: usize, offset: Mat4) -> Self {
        Self::Kinematic { bone, offset }
    }

    pub fn default_fixed(transform: Mat4) -> Self {
        Self::DefaultFixed {
            initial: transform,
            transform,
        }
    }

    pub fn dynamic(bone: usize, offset: Mat4, bone_global: Mat4) -> Self {
        Self::Dynamic {
            bone,
            offset,
            inv_offset: offset.inverse(),
            transform: bone_global * offset,
        }
    }

    pub fn dynamic_with_bone_merge(bone: usize, offset: Mat4, bone_global: Mat4) -> Self {
        Self::DynamicWithBoneMerge {
            bone,
            offset,
            inv_offset: offset.inverse(),
            transform: bone_global * offset,
        }
    }

    /// 关联的骨骼
    pub fn bone(&self) -> Option<usize> {
        match self {
            Self::Kinematic { bone, .. }
            | Self::Dynamic { bone, .. }
            | Self::DynamicWithBoneMerge { bone, .. } => Some(*bone),
            Self::DefaultFixed { .. } => None,
        }
    }

    /// 刚体世界变换
    pub fn world_transform(&self, bones: &BoneSet) -> Mat4 {
        match self {
            Self::Kinematic { bone, offset } => bones.global_transform(*bone) * *offset,
            Self::DefaultFixed { transform, .. }
            | Self::Dynamic { transform, .. }
            | Self::DynamicWithBoneMerge { transform, .. } => *transform,
        }
    }

    /// 保存物理模拟后的刚体世界变换
    pub fn set_world_transform(&mut self, world: Mat4) {
        match self {
            Self::Kinematic { .. } => {}
            Self::DefaultFixed { transform, .. }
            | Self::Dynamic { transform, .. }
            | Self::DynamicWithBoneMerge { transform, .. } => *transform = world,
        }
    }

    /// 重置到骨骼当前姿势（无骨骼时回到初始值）
    pub fn reset(&mut self, bones: &BoneSet) {
        match self {
            Self::Kinematic { .. } => {}
            Self::DefaultFixed { initial, transform } => *transform = *initial,
            Self::Dynamic { bone, offset, transform, .. }
            | Self::DynamicWithBoneMerge { bone, offset, transform, .. } => {
                *transform = bones.global_transform(*bone) * *offset;
            }
        }
    }

    /// 将刚体变换写回骨骼全局变换，并更新其子树
    pub fn reflect_global_transform(&self, bones: &mut BoneSet) {
        match self {
            Self::Kinematic { .. } | Self::DefaultFixed { .. } => {}
            Self::Dynamic { bone, inv_offset, transform, .. } => {
                bones.set_global_transform(*bone, *transform * *inv_offset);
                bones.update_child_transform(*bone);
            }
            Self::DynamicWithBoneMerge { bone, inv_offset, transform, .. } => {
                let mut global = *transform * *inv_offset;
                global.w_axis = bones.global_transform(*bone).w_axis;
                bones.set_global_transform(*bone, global);
                bones.update_child_transform(*bone);
            }
        }
    }
}
