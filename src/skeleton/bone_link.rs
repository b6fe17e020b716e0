//! 骨骼节点 - 参考 nphysics MultibodyLink 设计
//!
//! BoneLink 是骨骼系统的核心单元，类似于 nphysics 的 MultibodyLink。
//! 全局变换不保存在节点内，而是由 BoneSet 的连续数组统一持有，
//! 节点只通过自身索引引用它。

use glam::{Mat4, Quat, Vec3};
use bitflags::bitflags;

use crate::model::desc::BoneDesc;

// ============================================================================
// 骨骼标志
// ============================================================================

bitflags! {
    /// 骨骼标志位
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BoneFlags: u32 {
        /// 可旋转
        const ROTATABLE = 1 << 0;
        /// 可移动
        const MOVABLE = 1 << 1;
        /// 是 IK 骨骼
        const IK = 1 << 2;
        /// 附加旋转
        const APPEND_ROTATE = 1 << 3;
        /// 附加平移
        const APPEND_TRANSLATE = 1 << 4;
        /// 附加变换使用本地坐标
        const APPEND_LOCAL = 1 << 5;
        /// 物理后变形
        const DEFORM_AFTER_PHYSICS = 1 << 8;
        /// IK 启用（IK 链上的骨骼，本地旋转叠加 IK 旋转）
        const IK_ENABLED = 1 << 9;
    }
}

// ============================================================================
// 附加变换配置
// ============================================================================

/// 附加变换配置
#[derive(Clone, Debug)]
pub struct AppendConfig {
    /// 附加变换源骨骼索引
    pub parent: usize,
    /// 附加变换比率
    pub rate: f32,
}

// ============================================================================
// 骨骼节点
// ============================================================================

/// 骨骼节点 - 类似 nphysics MultibodyLink
///
/// 本地变换 = 缩放 · 旋转 · 平移，其中
/// - 平移 = 动画平移 + 姿势平移（+ 附加平移）
/// - 旋转 = IK 旋转 · 动画旋转 · 姿势旋转（· 附加旋转）
///
/// 姿势层（translate/rotate/scale）每帧由 `begin_update_transform` 重新载入初始值，
/// 之后由骨骼 Morph 叠加。
#[derive(Clone, Debug)]
pub struct BoneLink {
    // ========================================
    // 静态数据（初始化后不变）
    // ========================================

    /// 骨骼名称
    pub name: String,

    /// 骨骼内部索引
    pub(crate) internal_id: usize,

    /// 父骨骼索引 (-1 表示根骨骼)
    pub parent_index: i32,

    /// 子骨骼索引
    pub(crate) children: Vec<usize>,

    /// 变换层级（用于排序）
    pub transform_level: i32,

    /// 骨骼标志
    pub flags: BoneFlags,

    /// 初始位置（模型空间）
    pub initial_position: Vec3,

    /// 初始姿势
    pub init_translate: Vec3,
    pub init_rotate: Quat,
    pub init_scale: Vec3,

    /// 逆绑定矩阵（用于蒙皮）
    pub inverse_init: Mat4,

    /// 附加变换配置
    pub append_config: Option<AppendConfig>,

    /// 挂在本骨骼上的 IK 求解器索引
    pub(crate) ik_solver: Option<usize>,

    // ========================================
    // 动态数据（每帧更新）
    // ========================================

    /// 姿势层
    pub translate: Vec3,
    pub rotate: Quat,
    pub scale: Vec3,

    /// 动画平移
    pub animation_translate: Vec3,

    /// 动画旋转
    pub animation_rotate: Quat,

    /// 部分权重混合用的基准动画
    pub base_animation_translate: Vec3,
    pub base_animation_rotate: Quat,

    /// IK 旋转
    pub ik_rotate: Quat,

    /// 附加平移（计算结果）
    pub append_translate: Vec3,

    /// 附加旋转（计算结果）
    pub append_rotate: Quat,

    /// 本地变换矩阵 (local_to_parent)
    pub local_to_parent: Mat4,
}

impl BoneLink {
    /// 创建新骨骼
    pub fn new(name: String) -> Self {
        Self {
            name,
            internal_id: 0,
            parent_index: -1,
            children: Vec::new(),
            transform_level: 0,
            flags: BoneFlags::ROTATABLE,
            initial_position: Vec3::ZERO,
            init_translate: Vec3::ZERO,
            init_rotate: Quat::IDENTITY,
            init_scale: Vec3::ONE,
            inverse_init: Mat4::IDENTITY,
            append_config: None,
            ik_solver: None,
            translate: Vec3::ZERO,
            rotate: Quat::IDENTITY,
            scale: Vec3::ONE,
            animation_translate: Vec3::ZERO,
            animation_rotate: Quat::IDENTITY,
            base_animation_translate: Vec3::ZERO,
            base_animation_rotate: Quat::IDENTITY,
            ik_rotate: Quat::IDENTITY,
            append_translate: Vec3::ZERO,
            append_rotate: Quat::IDENTITY,
            local_to_parent: Mat4::IDENTITY,
        }
    }

    /// 从输入数据创建（父子关系与附加变换由 BoneSet 校验后设置）
    pub fn from_desc(index: usize, desc: &BoneDesc) -> Self {
        let mut bone = Self::new(desc.name.clone());
        bone.internal_id = index;
        bone.parent_index = desc.parent;
        bone.transform_level = desc.transform_level;
        bone.initial_position = desc.position;
        // IK_ENABLED 是运行时状态，由 IK 链注册决定
        bone.flags = desc.flags - BoneFlags::IK_ENABLED;
        bone
    }

    // ========================================
    // 访问器
    // ========================================

    /// 骨骼索引
    #[inline]
    pub fn link_id(&self) -> usize {
        self.internal_id
    }

    /// 父骨骼索引
    #[inline]
    pub fn parent_id(&self) -> Option<usize> {
        if self.parent_index >= 0 {
            Some(self.parent_index as usize)
        } else {
            None
        }
    }

    /// 是否为根骨骼
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_index < 0
    }

    #[inline]
    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// 动画 + 姿势平移
    #[inline]
    pub fn animate_translate(&self) -> Vec3 {
        self.animation_translate + self.translate
    }

    /// 动画 + 姿势旋转
    #[inline]
    pub fn animate_rotate(&self) -> Quat {
        self.animation_rotate * self.rotate
    }

    // ========================================
    // 变换计算
    // ========================================

    /// 帧开始：重新载入初始姿势，清除 IK 旋转
    pub fn begin_update_transform(&mut self) {
        self.translate = self.init_translate;
        self.rotate = self.init_rotate;
        self.scale = self.init_scale;
        self.ik_rotate = Quat::IDENTITY;
        self.on_begin_update_transform();
    }

    /// 帧开始钩子：清除上一帧的附加变换
    fn on_begin_update_transform(&mut self) {
        self.append_translate = Vec3::ZERO;
        self.append_rotate = Quat::IDENTITY;
    }

    /// 清除动画状态
    #[inline]
    pub fn clear_animation(&mut self) {
        self.animation_translate = Vec3::ZERO;
        self.animation_rotate = Quat::IDENTITY;
    }

    #[inline]
    pub fn save_base_animation(&mut self) {
        self.base_animation_translate = self.animation_translate;
        self.base_animation_rotate = self.animation_rotate;
    }

    #[inline]
    pub fn clear_base_animation(&mut self) {
        self.base_animation_translate = Vec3::ZERO;
        self.base_animation_rotate = Quat::IDENTITY;
    }

    /// 计算本地变换 (local_to_parent)
    pub fn compute_local_transform(&mut self) {
        let mut translate = self.animate_translate();
        if self.flags.contains(BoneFlags::APPEND_TRANSLATE) {
            translate += self.append_translate;
        }

        let mut rotation = self.animate_rotate();
        if self.flags.contains(BoneFlags::IK_ENABLED) {
            rotation = self.ik_rotate * rotation;
        }
        if self.flags.contains(BoneFlags::APPEND_ROTATE) {
            rotation = rotation * self.append_rotate;
        }

        self.local_to_parent = Mat4::from_scale_rotation_translation(self.scale, rotation, translate);
    }

    /// 更新本地变换
    #[inline]
    pub fn update_local_transform(&mut self) {
        self.compute_local_transform();
    }

    /// 获取本地变换
    #[inline]
    pub fn local_transform(&self) -> Mat4 {
        self.local_to_parent
    }

    /// 设置本地变换（物理回写后使用）
    #[inline]
    pub fn set_local_transform(&mut self, transform: Mat4) {
        self.local_to_parent = transform;
    }

    /// 逆绑定矩阵
    #[inline]
    pub fn inverse_bind_matrix(&self) -> Mat4 {
        self.inverse_init
    }

    // ========================================
    // 标志检查方法
    // ========================================

    #[inline]
    pub fn is_ik(&self) -> bool {
        self.flags.contains(BoneFlags::IK)
    }

    #[inline]
    pub fn is_append_rotate(&self) -> bool {
        self.flags.contains(BoneFlags::APPEND_ROTATE)
    }

    #[inline]
    pub fn is_append_translate(&self) -> bool {
        self.flags.contains(BoneFlags::APPEND_TRANSLATE)
    }

    #[inline]
    pub fn is_append_local(&self) -> bool {
        self.flags.contains(BoneFlags::APPEND_LOCAL)
    }

    #[inline]
    pub fn deform_after_physics(&self) -> bool {
        self.flags.contains(BoneFlags::DEFORM_AFTER_PHYSICS)
    }

    #[inline]
    pub fn enable_ik(&self) -> bool {
        self.flags.contains(BoneFlags::IK_ENABLED)
    }

    #[inline]
    pub fn set_enable_ik(&mut self, enabled: bool) {
        self.flags.set(BoneFlags::IK_ENABLED, enabled);
    }
}

impl Default for BoneLink {
    fn default() -> Self {
        Self::new(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_transform_composition() {
        let mut bone = BoneLink::new("arm".into());
        bone.init_translate = Vec3::new(0.0, 1.0, 0.0);
        bone.begin_update_transform();
        bone.animation_translate = Vec3::new(1.0, 0.0, 0.0);
        bone.animation_rotate = Quat::from_rotation_z(0.5);
        bone.compute_local_transform();

        let (scale, rotation, translation) = bone.local_to_parent.to_scale_rotation_translation();
        assert!((scale - Vec3::ONE).length() < 1e-6);
        assert!(rotation.angle_between(Quat::from_rotation_z(0.5)) < 1e-5);
        assert!((translation - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_ik_rotate_only_when_enabled() {
        let mut bone = BoneLink::new("knee".into());
        bone.ik_rotate = Quat::from_rotation_x(0.3);
        bone.compute_local_transform();
        assert!(Quat::from_mat4(&bone.local_to_parent).angle_between(Quat::IDENTITY) < 1e-6);

        bone.set_enable_ik(true);
        bone.compute_local_transform();
        let r = Quat::from_mat4(&bone.local_to_parent);
        assert!(r.angle_between(Quat::from_rotation_x(0.3)) < 1e-5);
    }

    #[test]
    fn test_begin_update_clears_ik_and_append() {
        let mut bone = BoneLink::new("b".into());
        bone.ik_rotate = Quat::from_rotation_y(1.0);
        bone.append_translate = Vec3::ONE;
        bone.translate = Vec3::splat(5.0);
        bone.begin_update_transform();
        assert_eq!(bone.ik_rotate, Quat::IDENTITY);
        assert_eq!(bone.append_translate, Vec3::ZERO);
        assert_eq!(bone.translate, bone.init_translate);
    }
}
