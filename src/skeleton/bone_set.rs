//! 骨骼集合 - 类似 nphysics Multibody
//!
//! 以扁平数组持有全部骨骼，父子关系只以索引表示。
//! 全局变换保存在独立的连续数组中，这是唯一的真实来源。

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};

use super::bone_link::{AppendConfig, BoneFlags, BoneLink};
use super::ik_solver::{IkLink, IkSolver};
use crate::model::desc::BoneDesc;

/// 骨骼集合
#[derive(Clone, Debug, Default)]
pub struct BoneSet {
    bones: Vec<BoneLink>,
    /// 全局变换（按骨骼索引）
    global_transforms: Vec<Mat4>,
    /// 按变形层级排序的骨骼索引
    sorted_indices: Vec<usize>,
    ik_solvers: Vec<IkSolver>,
    name_to_index: HashMap<String, usize>,
}

impl BoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从输入数据构建骨骼层次
    ///
    /// 非法父骨骼（越界或形成环）按根骨骼处理，
    /// 非法附加变换源与 IK 链接被丢弃，均输出警告。
    pub fn from_descs(descs: &[BoneDesc]) -> Self {
        let count = descs.len();
        let mut bones: Vec<BoneLink> = descs
            .iter()
            .enumerate()
            .map(|(i, desc)| BoneLink::from_desc(i, desc))
            .collect();

        // 父骨骼校验
        for i in 0..count {
            let parent = bones[i].parent_index;
            if parent >= count as i32 || parent < -1 {
                log::warn!("骨骼 '{}' 的父骨骼索引 {} 越界，按根骨骼处理", bones[i].name, parent);
                bones[i].parent_index = -1;
            } else if Self::has_cycle(&bones, i) {
                log::warn!("骨骼 '{}' 的父骨骼链形成环，断开父骨骼 {}", bones[i].name, parent);
                bones[i].parent_index = -1;
            }
        }

        for i in 0..count {
            if let Some(parent) = bones[i].parent_id() {
                bones[parent].children.push(i);
            }
        }

        // 初始平移 = 自身位置 - 父骨骼位置
        for i in 0..count {
            let shift = match bones[i].parent_id() {
                Some(parent) => bones[i].initial_position - bones[parent].initial_position,
                None => bones[i].initial_position,
            };
            bones[i].init_translate = shift;
        }

        // 附加变换
        for (i, desc) in descs.iter().enumerate() {
            let Some(append) = &desc.append else {
                continue;
            };
            if append.parent < 0 || append.parent as usize >= count || append.parent as usize == i {
                if append.parent >= 0 {
                    log::warn!("骨骼 '{}' 的附加变换源 {} 无效，忽略", bones[i].name, append.parent);
                }
                bones[i].flags.remove(BoneFlags::APPEND_ROTATE | BoneFlags::APPEND_TRANSLATE);
                continue;
            }
            bones[i].append_config = Some(AppendConfig {
                parent: append.parent as usize,
                rate: append.rate,
            });
        }

        // IK
        let mut ik_solvers = Vec::new();
        for (i, desc) in descs.iter().enumerate() {
            let Some(ik) = &desc.ik else {
                continue;
            };
            if ik.target < 0 || ik.target as usize >= count {
                log::warn!("IK 骨骼 '{}' 的目标 {} 越界，忽略 IK", bones[i].name, ik.target);
                continue;
            }
            let mut links = Vec::with_capacity(ik.links.len());
            for link in &ik.links {
                if link.bone < 0 || link.bone as usize >= count {
                    log::warn!("IK 骨骼 '{}' 的链接 {} 越界，跳过", bones[i].name, link.bone);
                    continue;
                }
                let link_idx = link.bone as usize;
                bones[link_idx].set_enable_ik(true);
                links.push(IkLink::new(link_idx, link.limits));
            }
            log::debug!("IK '{}': target={}, links={}", bones[i].name, ik.target, links.len());
            bones[i].ik_solver = Some(ik_solvers.len());
            ik_solvers.push(IkSolver::new(i, ik.target as usize, ik.iterations, ik.limit_angle, links));
        }

        // 变形层级排序（稳定排序，同层级保持索引顺序）
        let mut sorted_indices: Vec<usize> = (0..count).collect();
        sorted_indices.sort_by_key(|&i| bones[i].transform_level);

        let name_to_index = bones
            .iter()
            .enumerate()
            .map(|(i, b)| (b.name.clone(), i))
            .collect();

        let mut set = Self {
            bones,
            global_transforms: vec![Mat4::IDENTITY; count],
            sorted_indices,
            ik_solvers,
            name_to_index,
        };

        set.begin_update_transform();
        for i in 0..count {
            set.bones[i].compute_local_transform();
        }
        set.update_root_global_transforms();
        set.calculate_inverse_init_transform();

        log::info!("骨骼构建完成: {} 骨骼, {} IK", count, set.ik_solvers.len());
        set
    }

    /// 祖先链检测：沿父骨骼向上走回到自身即为环
    fn has_cycle(bones: &[BoneLink], index: usize) -> bool {
        let mut current = bones[index].parent_index;
        let mut steps = 0;
        while current >= 0 {
            let idx = current as usize;
            if idx == index {
                return true;
            }
            steps += 1;
            // 环不经过自身时由环上的骨骼负责断开
            if steps > bones.len() {
                return false;
            }
            current = bones[idx].parent_index;
        }
        false
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn bones(&self) -> &[BoneLink] {
        &self.bones
    }

    #[inline]
    pub fn get_bone(&self, index: usize) -> Option<&BoneLink> {
        self.bones.get(index)
    }

    #[inline]
    pub fn get_bone_mut(&mut self, index: usize) -> Option<&mut BoneLink> {
        self.bones.get_mut(index)
    }

    pub fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    #[inline]
    pub fn sorted_indices(&self) -> &[usize] {
        &self.sorted_indices
    }

    #[inline]
    pub fn global_transforms(&self) -> &[Mat4] {
        &self.global_transforms
    }

    #[inline]
    pub fn global_transform(&self, index: usize) -> Mat4 {
        self.global_transforms.get(index).copied().unwrap_or(Mat4::IDENTITY)
    }

    #[inline]
    pub fn set_global_transform(&mut self, index: usize, transform: Mat4) {
        if let Some(global) = self.global_transforms.get_mut(index) {
            *global = transform;
        }
    }

    #[inline]
    pub fn ik_solvers(&self) -> &[IkSolver] {
        &self.ik_solvers
    }

    #[inline]
    pub fn ik_solver_mut(&mut self, index: usize) -> Option<&mut IkSolver> {
        self.ik_solvers.get_mut(index)
    }

    /// 查找挂在指定骨骼上的 IK 求解器
    pub fn find_ik_solver_by_bone(&self, bone_index: usize) -> Option<usize> {
        self.bones.get(bone_index).and_then(|b| b.ik_solver)
    }

    /// 设置骨骼动画平移
    pub fn set_bone_translation(&mut self, index: usize, translation: Vec3) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.animation_translate = translation;
        }
    }

    /// 设置骨骼动画旋转
    pub fn set_bone_rotation(&mut self, index: usize, rotation: Quat) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.animation_rotate = rotation;
        }
    }

    // ========================================
    // 动画状态
    // ========================================

    pub fn clear_animation(&mut self) {
        for bone in &mut self.bones {
            bone.clear_animation();
        }
    }

    pub fn save_base_animation(&mut self) {
        for bone in &mut self.bones {
            bone.save_base_animation();
        }
        for solver in &mut self.ik_solvers {
            solver.save_base_animation();
        }
    }

    pub fn clear_base_animation(&mut self) {
        for bone in &mut self.bones {
            bone.clear_base_animation();
        }
        for solver in &mut self.ik_solvers {
            solver.clear_base_animation();
        }
    }

    pub fn enable_all_ik(&mut self) {
        for solver in &mut self.ik_solvers {
            solver.set_enabled(true);
        }
    }

    // ========================================
    // 变换计算
    // ========================================

    /// 帧开始：载入初始姿势、清除 IK 旋转
    pub fn begin_update_transform(&mut self) {
        for bone in &mut self.bones {
            bone.begin_update_transform();
        }
    }

    #[inline]
    pub fn update_local_transform(&mut self, index: usize) {
        self.bones[index].compute_local_transform();
    }

    /// 更新指定骨骼及其全部子孙的全局变换（父先于子）
    #[inline]
    pub fn update_global_transform(&mut self, index: usize) {
        update_global_recursive(&self.bones, &mut self.global_transforms, index);
    }

    /// 仅更新指定骨骼的子树（骨骼自身的全局变换保持不变）
    pub fn update_child_transform(&mut self, index: usize) {
        let children = self.bones[index].children.clone();
        for child in children {
            update_global_recursive(&self.bones, &mut self.global_transforms, child);
        }
    }

    /// 从所有根骨骼开始更新全局变换
    pub fn update_root_global_transforms(&mut self) {
        for i in 0..self.bones.len() {
            if self.bones[i].is_root() {
                update_global_recursive(&self.bones, &mut self.global_transforms, i);
            }
        }
    }

    /// 计算附加变换并更新本地变换
    pub fn update_append_transform(&mut self, index: usize) {
        let Some(append) = self.bones[index].append_config.clone() else {
            return;
        };
        let source = &self.bones[append.parent];
        let is_local = self.bones[index].is_append_local();
        let source_has_append = source.append_config.is_some();

        let append_rotate = if self.bones[index].is_append_rotate() {
            let mut rotate = if !is_local && source_has_append {
                source.append_rotate
            } else {
                source.animate_rotate()
            };
            if source.enable_ik() {
                rotate = source.ik_rotate * rotate;
            }
            Some(Quat::IDENTITY.slerp(rotate, append.rate))
        } else {
            None
        };

        let append_translate = if self.bones[index].is_append_translate() {
            let translate = if !is_local && source_has_append {
                source.append_translate
            } else {
                source.animate_translate() - source.init_translate
            };
            Some(translate * append.rate)
        } else {
            None
        };

        let bone = &mut self.bones[index];
        if let Some(rotate) = append_rotate {
            bone.append_rotate = rotate;
        }
        if let Some(translate) = append_translate {
            bone.append_translate = translate;
        }
        bone.compute_local_transform();
    }

    /// 骨骼动画更新（物理前 / 物理后两遍）
    ///
    /// 1. 按变形层级更新本地变换
    /// 2. 从本遍的子树根更新全局变换
    /// 3. 按变形层级处理附加变换与 IK
    /// 4. 再次从子树根更新全局变换
    pub fn update_transforms(&mut self, after_physics: bool) {
        let sorted = std::mem::take(&mut self.sorted_indices);

        for &i in &sorted {
            if self.bones[i].deform_after_physics() == after_physics {
                self.bones[i].compute_local_transform();
            }
        }
        for &i in &sorted {
            if self.is_pass_root(i, after_physics) {
                self.update_global_transform(i);
            }
        }
        for &i in &sorted {
            if self.bones[i].deform_after_physics() != after_physics {
                continue;
            }
            if self.bones[i].append_config.is_some() {
                self.update_append_transform(i);
                self.update_global_transform(i);
            }
            if let Some(solver_idx) = self.bones[i].ik_solver {
                let Self { bones, global_transforms, ik_solvers, .. } = self;
                ik_solvers[solver_idx].solve(bones, global_transforms);
                self.update_global_transform(i);
            }
        }
        for &i in &sorted {
            if self.is_pass_root(i, after_physics) {
                self.update_global_transform(i);
            }
        }

        self.sorted_indices = sorted;
    }

    /// 本遍中需要从其开始更新全局变换的骨骼：
    /// 属于本遍，且没有父骨骼或父骨骼不属于本遍
    fn is_pass_root(&self, index: usize, after_physics: bool) -> bool {
        let bone = &self.bones[index];
        bone.deform_after_physics() == after_physics
            && bone
                .parent_id()
                .map_or(true, |p| self.bones[p].deform_after_physics() != after_physics)
    }

    /// 由全局变换反算本地变换（物理回写后使用）
    pub fn calc_local_from_global(&mut self, index: usize) {
        let global = self.global_transforms[index];
        let local = match self.bones[index].parent_id() {
            Some(parent) => self.global_transforms[parent].inverse() * global,
            None => global,
        };
        self.bones[index].set_local_transform(local);
    }

    /// 缓存初始全局变换的逆（蒙皮用）
    pub fn calculate_inverse_init_transform(&mut self) {
        for (bone, global) in self.bones.iter_mut().zip(&self.global_transforms) {
            bone.inverse_init = global.inverse();
        }
    }

    /// 蒙皮矩阵 = 全局变换 * 逆绑定矩阵
    pub fn skinning_matrices_into(&self, out: &mut Vec<Mat4>) {
        out.clear();
        out.extend(
            self.bones
                .iter()
                .zip(&self.global_transforms)
                .map(|(bone, global)| *global * bone.inverse_init),
        );
    }

    pub fn skinning_matrices(&self) -> Vec<Mat4> {
        let mut out = Vec::with_capacity(self.bones.len());
        self.skinning_matrices_into(&mut out);
        out
    }
}

/// 递归更新全局变换：global = parent_global * local
pub(crate) fn update_global_recursive(bones: &[BoneLink], globals: &mut [Mat4], index: usize) {
    let bone = &bones[index];
    globals[index] = match bone.parent_id() {
        Some(parent) => globals[parent] * bone.local_to_parent,
        None => bone.local_to_parent,
    };
    for &child in &bone.children {
        update_global_recursive(bones, globals, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::desc::{AppendDesc, BoneDesc, IkDesc, IkLinkDesc};

    fn approx_mat(a: Mat4, b: Mat4) -> bool {
        a.abs_diff_eq(b, 1e-5)
    }

    fn chain() -> Vec<BoneDesc> {
        vec![
            BoneDesc::new("root", -1, Vec3::ZERO),
            BoneDesc::new("upper", 0, Vec3::new(0.0, 1.0, 0.0)),
            BoneDesc::new("lower", 1, Vec3::new(0.0, 2.0, 0.0)),
        ]
    }

    fn assert_hierarchy_invariant(set: &BoneSet) {
        for (i, bone) in set.bones().iter().enumerate() {
            let expected = match bone.parent_id() {
                Some(p) => set.global_transform(p) * bone.local_transform(),
                None => bone.local_transform(),
            };
            assert!(approx_mat(set.global_transform(i), expected), "bone {i}");
        }
    }

    #[test]
    fn test_initial_globals_match_rest_positions() {
        let set = BoneSet::from_descs(&chain());
        for (i, desc) in chain().iter().enumerate() {
            let pos = set.global_transform(i).w_axis.truncate();
            assert!((pos - desc.position).length() < 1e-6);
            assert!(approx_mat(set.global_transform(i) * set.bones()[i].inverse_init, Mat4::IDENTITY));
        }
    }

    #[test]
    fn test_cycle_is_broken_at_load() {
        let mut descs = chain();
        descs[0].parent = 2;
        let set = BoneSet::from_descs(&descs);
        // 0 -> 2 -> 1 -> 0 形成环，第一个检测到环的骨骼被断开
        assert!(set.bones()[0].is_root());
        assert_eq!(set.bones()[1].parent_id(), Some(0));
        assert_hierarchy_invariant(&set);
    }

    #[test]
    fn test_self_parent_and_out_of_range() {
        let mut descs = chain();
        descs[1].parent = 1;
        descs[2].parent = 42;
        let set = BoneSet::from_descs(&descs);
        assert!(set.bones()[1].is_root());
        assert!(set.bones()[2].is_root());
    }

    #[test]
    fn test_update_transforms_keeps_invariant() {
        let mut set = BoneSet::from_descs(&chain());
        set.begin_update_transform();
        set.set_bone_rotation(0, Quat::from_rotation_z(0.4));
        set.set_bone_rotation(1, Quat::from_rotation_x(-0.7));
        set.set_bone_translation(2, Vec3::new(0.1, 0.0, 0.0));
        set.update_transforms(false);
        set.update_transforms(true);
        assert_hierarchy_invariant(&set);
    }

    #[test]
    fn test_after_physics_child_of_regular_parent() {
        let mut descs = chain();
        descs[2].flags |= BoneFlags::DEFORM_AFTER_PHYSICS;
        let mut set = BoneSet::from_descs(&descs);
        set.begin_update_transform();
        set.update_transforms(false);
        set.set_bone_rotation(2, Quat::from_rotation_y(0.9));
        set.update_transforms(true);
        assert_hierarchy_invariant(&set);
        let rotation = Quat::from_mat4(&set.global_transform(2));
        assert!(rotation.angle_between(Quat::from_rotation_y(0.9)) < 1e-5);
    }

    #[test]
    fn test_update_child_transform_only_touches_subtree() {
        let mut set = BoneSet::from_descs(&chain());
        let moved = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0));
        set.set_global_transform(1, moved);
        set.update_child_transform(1);
        assert!(approx_mat(set.global_transform(1), moved));
        let lower = set.global_transform(2).w_axis.truncate();
        assert!((lower - Vec3::new(5.0, 1.0, 0.0)).length() < 1e-5);
        assert!(approx_mat(set.global_transform(0), Mat4::IDENTITY));
    }

    #[test]
    fn test_calc_local_from_global() {
        let mut set = BoneSet::from_descs(&chain());
        let target = Mat4::from_rotation_translation(Quat::from_rotation_y(0.5), Vec3::new(1.0, 1.0, 0.0));
        set.set_global_transform(1, target);
        set.calc_local_from_global(1);
        set.update_root_global_transforms();
        assert!(approx_mat(set.global_transform(1), target));
        assert_hierarchy_invariant(&set);
    }

    #[test]
    fn test_append_rotate_weight() {
        let mut descs = chain();
        descs.push(BoneDesc::new("follower", 0, Vec3::new(1.0, 0.0, 0.0)));
        descs[3].flags |= BoneFlags::APPEND_ROTATE;
        descs[3].append = Some(AppendDesc { parent: 1, rate: 0.5 });
        let mut set = BoneSet::from_descs(&descs);

        set.begin_update_transform();
        set.set_bone_rotation(1, Quat::from_rotation_y(1.0));
        set.update_transforms(false);

        let follower = set.bones()[3].append_rotate;
        assert!(follower.angle_between(Quat::from_rotation_y(0.5)) < 1e-5);
        assert_hierarchy_invariant(&set);
    }

    #[test]
    fn test_invalid_append_source_dropped() {
        let mut descs = chain();
        descs[2].flags |= BoneFlags::APPEND_TRANSLATE;
        descs[2].append = Some(AppendDesc { parent: 99, rate: 1.0 });
        let set = BoneSet::from_descs(&descs);
        assert!(set.bones()[2].append_config.is_none());
        assert!(!set.bones()[2].is_append_translate());
    }

    #[test]
    fn test_deform_depth_sort_is_stable() {
        let mut descs = chain();
        descs[0].transform_level = 2;
        descs[2].transform_level = 1;
        let set = BoneSet::from_descs(&descs);
        assert_eq!(set.sorted_indices(), &[1, 2, 0]);
    }

    #[test]
    fn test_ik_registration_marks_chain() {
        let mut descs = chain();
        descs.push(BoneDesc::new("ik", -1, Vec3::new(0.0, 2.0, 0.0)));
        descs[3].flags |= BoneFlags::IK;
        descs[3].ik = Some(IkDesc {
            target: 2,
            iterations: 10,
            limit_angle: 1.0,
            links: vec![IkLinkDesc { bone: 1, limits: None }, IkLinkDesc { bone: 77, limits: None }],
        });
        let set = BoneSet::from_descs(&descs);
        assert_eq!(set.ik_solvers().len(), 1);
        assert_eq!(set.ik_solvers()[0].links().len(), 1);
        assert!(set.bones()[1].enable_ik());
        assert_eq!(set.find_ik_solver_by_bone(3), Some(0));
    }
}
