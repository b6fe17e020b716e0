//! IK 求解器 - 参考 nphysics 约束求解思想重新实现
//!
//! 设计原则：
//! - 使用迭代求解方式（CCD），链接按顺序逐个求解
//! - 支持角度限制
//! - 支持单轴模式（膝盖等）
//! - 保留距离最小的一次迭代结果，变差时回退并提前结束

use glam::{Mat3, Mat4, Quat, Vec3};
use std::f32::consts::PI;

use super::bone_link::BoneLink;
use super::bone_set::update_global_recursive;

// ============================================================================
// IK 链状态
// ============================================================================

/// IK 链接
#[derive(Clone, Debug)]
pub struct IkLink {
    /// 链接骨骼索引
    pub bone_index: usize,
    /// 角度限制 (min, max)，弧度
    pub limits: Option<(Vec3, Vec3)>,
    /// 上一次迭代的欧拉角（用于连续性）
    prev_angle: Vec3,
    /// 最佳 IK 旋转（用于回退）
    save_ik_rotate: Quat,
    /// 单轴模式下的累积角度（整个求解过程中累积，不按迭代重置）
    plane_mode_angle: f32,
}

impl IkLink {
    pub fn new(bone_index: usize, limits: Option<(Vec3, Vec3)>) -> Self {
        Self {
            bone_index,
            limits,
            prev_angle: Vec3::ZERO,
            save_ik_rotate: Quat::IDENTITY,
            plane_mode_angle: 0.0,
        }
    }

    fn reset(&mut self) {
        self.prev_angle = Vec3::ZERO;
        self.save_ik_rotate = Quat::IDENTITY;
        self.plane_mode_angle = 0.0;
    }

    /// 单轴模式检测：只有一个轴的限制非零
    fn plane_solve_axis(&self) -> Option<SolveAxis> {
        let (min, max) = self.limits?;
        let active = |a: f32, b: f32| a != 0.0 || b != 0.0;
        let x = active(min.x, max.x);
        let y = active(min.y, max.y);
        let z = active(min.z, max.z);
        match (x, y, z) {
            (true, false, false) => Some(SolveAxis::X),
            (false, true, false) => Some(SolveAxis::Y),
            (false, false, true) => Some(SolveAxis::Z),
            _ => None,
        }
    }
}

/// 求解轴类型
#[derive(Clone, Copy, Debug, PartialEq)]
enum SolveAxis {
    X,
    Y,
    Z,
}

impl SolveAxis {
    fn index(self) -> usize {
        match self {
            SolveAxis::X => 0,
            SolveAxis::Y => 1,
            SolveAxis::Z => 2,
        }
    }

    fn vector(self) -> Vec3 {
        match self {
            SolveAxis::X => Vec3::X,
            SolveAxis::Y => Vec3::Y,
            SolveAxis::Z => Vec3::Z,
        }
    }
}

/// 小于此角度（度）的修正直接跳过
const MIN_ANGLE_DEGREES: f32 = 1.0e-3;

// ============================================================================
// IK 求解器
// ============================================================================

/// IK 求解器
#[derive(Clone, Debug)]
pub struct IkSolver {
    /// IK 骨骼（目标位置）
    pub bone_index: usize,
    /// 末端效应器骨骼
    pub target_index: usize,
    /// 迭代次数
    pub iterations: u32,
    /// 单次迭代角度限制
    pub limit_angle: f32,
    /// IK 链（从效应器侧到根侧）
    links: Vec<IkLink>,
    /// 是否启用
    enabled: bool,
    /// 部分权重混合用的基准启用状态
    base_anim_enabled: bool,
    /// 本次求解中每次迭代后的最佳距离
    distance_history: Vec<f32>,
}

impl IkSolver {
    /// 创建新的 IK 求解器
    pub fn new(bone_index: usize, target_index: usize, iterations: u32, limit_angle: f32, links: Vec<IkLink>) -> Self {
        Self {
            bone_index,
            target_index,
            iterations,
            limit_angle,
            links,
            enabled: true,
            base_anim_enabled: true,
            distance_history: Vec::new(),
        }
    }

    #[inline]
    pub fn links(&self) -> &[IkLink] {
        &self.links
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[inline]
    pub fn base_anim_enabled(&self) -> bool {
        self.base_anim_enabled
    }

    #[inline]
    pub fn save_base_animation(&mut self) {
        self.base_anim_enabled = self.enabled;
    }

    #[inline]
    pub fn clear_base_animation(&mut self) {
        self.base_anim_enabled = true;
    }

    /// 上一次求解的最佳距离序列（单调不增）
    #[inline]
    pub fn distance_history(&self) -> &[f32] {
        &self.distance_history
    }

    /// 上一次求解达到的最小效应器-目标距离
    pub fn best_distance(&self) -> Option<f32> {
        self.distance_history.last().copied()
    }

    /// 求解 IK
    pub fn solve(&mut self, bones: &mut [BoneLink], globals: &mut [Mat4]) {
        self.distance_history.clear();
        if !self.enabled {
            return;
        }

        let count = bones.len();
        if self.target_index >= count || self.bone_index >= count {
            return;
        }

        // 重置链状态
        for link in &mut self.links {
            link.reset();
            let idx = link.bone_index;
            bones[idx].ik_rotate = Quat::IDENTITY;
            bones[idx].compute_local_transform();
            update_global_recursive(bones, globals, idx);
        }

        let mut best_distance = f32::MAX;

        // 迭代求解
        for iteration in 0..self.iterations {
            self.solve_iteration(bones, globals, iteration);

            let target_pos = globals[self.target_index].w_axis.truncate();
            let ik_pos = globals[self.bone_index].w_axis.truncate();
            let distance = (target_pos - ik_pos).length();

            if distance < best_distance {
                best_distance = distance;
                self.distance_history.push(distance);
                for link in &mut self.links {
                    link.save_ik_rotate = bones[link.bone_index].ik_rotate;
                }
            } else {
                // 恢复最佳结果并退出
                for link in &self.links {
                    let idx = link.bone_index;
                    bones[idx].ik_rotate = link.save_ik_rotate;
                    bones[idx].compute_local_transform();
                    update_global_recursive(bones, globals, idx);
                }
                break;
            }
        }
    }

    /// 单次迭代求解
    fn solve_iteration(&mut self, bones: &mut [BoneLink], globals: &mut [Mat4], iteration: u32) {
        let ik_pos = globals[self.bone_index].w_axis.truncate();

        for chain_idx in 0..self.links.len() {
            let link_idx = self.links[chain_idx].bone_index;
            if link_idx == self.target_index {
                continue;
            }

            if let Some(axis) = self.links[chain_idx].plane_solve_axis() {
                self.solve_plane(bones, globals, iteration, chain_idx, axis);
                continue;
            }

            // 通用 3 轴求解
            let target_pos = globals[self.target_index].w_axis.truncate();
            let inv_link = globals[link_idx].inverse();

            let ik_vec = inv_link.transform_point3(ik_pos).normalize_or_zero();
            let target_vec = inv_link.transform_point3(target_pos).normalize_or_zero();

            if ik_vec == Vec3::ZERO || target_vec == Vec3::ZERO {
                continue;
            }

            let dot = target_vec.dot(ik_vec).clamp(-1.0, 1.0);
            let angle = dot.acos();
            if angle.to_degrees() < MIN_ANGLE_DEGREES {
                continue;
            }

            let angle = angle.clamp(-self.limit_angle, self.limit_angle);
            let axis = target_vec.cross(ik_vec).normalize_or_zero();
            if axis == Vec3::ZERO {
                continue;
            }

            let delta_rot = Quat::from_axis_angle(axis, angle);
            let animate_rotate = bones[link_idx].animate_rotate();
            let mut chain_rot = bones[link_idx].ik_rotate * animate_rotate * delta_rot;

            // 应用角度限制
            let link = &mut self.links[chain_idx];
            if let Some((limit_min, limit_max)) = link.limits {
                let euler = decompose_rotation(Mat3::from_quat(chain_rot), link.prev_angle);
                let clamped = euler.clamp(limit_min, limit_max);

                // 增量限制
                let limit = Vec3::splat(self.limit_angle);
                let clamped = (clamped - link.prev_angle).clamp(-limit, limit) + link.prev_angle;
                link.prev_angle = clamped;

                chain_rot = compose_rotation(clamped);
            }

            // 以纯 IK 分量保存
            bones[link_idx].ik_rotate = chain_rot * animate_rotate.inverse();
            bones[link_idx].compute_local_transform();
            update_global_recursive(bones, globals, link_idx);
        }
    }

    /// 单轴求解（膝盖等关节）
    fn solve_plane(
        &mut self,
        bones: &mut [BoneLink],
        globals: &mut [Mat4],
        iteration: u32,
        chain_idx: usize,
        solve_axis: SolveAxis,
    ) {
        let rotate_axis = solve_axis.vector();
        let link = &mut self.links[chain_idx];
        let link_idx = link.bone_index;
        let Some((limits_min, limits_max)) = link.limits else {
            return;
        };
        let limit_min = limits_min[solve_axis.index()];
        let limit_max = limits_max[solve_axis.index()];

        let ik_pos = globals[self.bone_index].w_axis.truncate();
        let target_pos = globals[self.target_index].w_axis.truncate();

        let inv_link = globals[link_idx].inverse();
        let ik_vec = inv_link.transform_point3(ik_pos).normalize_or_zero();
        let target_vec = inv_link.transform_point3(target_pos).normalize_or_zero();

        if ik_vec == Vec3::ZERO || target_vec == Vec3::ZERO {
            return;
        }

        let dot = target_vec.dot(ik_vec).clamp(-1.0, 1.0);
        let angle = dot.acos().clamp(-self.limit_angle, self.limit_angle);

        // 测试两个方向
        let dot_pos = (Quat::from_axis_angle(rotate_axis, angle) * target_vec).dot(ik_vec);
        let dot_neg = (Quat::from_axis_angle(rotate_axis, -angle) * target_vec).dot(ik_vec);

        let mut new_angle = link.plane_mode_angle;
        if dot_pos > dot_neg {
            new_angle += angle;
        } else {
            new_angle -= angle;
        }

        // 第 0 次迭代：超出范围时尝试反向，否则取离范围中点更近的方向
        if iteration == 0 && (new_angle < limit_min || new_angle > limit_max) {
            if -new_angle > limit_min && -new_angle < limit_max {
                new_angle = -new_angle;
            } else {
                let half = (limit_min + limit_max) * 0.5;
                if (half - new_angle).abs() > (half + new_angle).abs() {
                    new_angle = -new_angle;
                }
            }
        }

        new_angle = new_angle.clamp(limit_min, limit_max);
        link.plane_mode_angle = new_angle;

        bones[link_idx].ik_rotate =
            Quat::from_axis_angle(rotate_axis, new_angle) * bones[link_idx].animate_rotate().inverse();
        bones[link_idx].compute_local_transform();
        update_global_recursive(bones, globals, link_idx);
    }
}

// ============================================================================
// 欧拉角分解
// ============================================================================

/// 欧拉角合成旋转：R = Rz · Ry · Rx
fn compose_rotation(angles: Vec3) -> Quat {
    Quat::from_rotation_z(angles.z) * Quat::from_rotation_y(angles.y) * Quat::from_rotation_x(angles.x)
}

/// 从旋转矩阵分解欧拉角（compose_rotation 的逆），取最接近 prev 的解
fn decompose_rotation(m: Mat3, prev: Vec3) -> Vec3 {
    let epsilon = 1.0e-6_f32;
    let sy = -m.col(0).z;

    let result = if (1.0 - sy.abs()) < epsilon {
        // Gimbal lock
        let ry = sy.asin();
        let sx = prev.x.sin();
        let sz = prev.z.sin();

        if sx.abs() < sz.abs() {
            let cx = prev.x.cos();
            if cx > 0.0 {
                Vec3::new(0.0, ry, (-m.col(1).x).asin())
            } else {
                Vec3::new(PI, ry, m.col(1).x.asin())
            }
        } else {
            let cz = prev.z.cos();
            if cz > 0.0 {
                Vec3::new((-m.col(2).y).asin(), ry, 0.0)
            } else {
                Vec3::new(m.col(2).y.asin(), ry, PI)
            }
        }
    } else {
        Vec3::new(
            m.col(1).z.atan2(m.col(2).z),
            (-m.col(0).z).asin(),
            m.col(0).y.atan2(m.col(0).x),
        )
    };

    find_closest_euler(result, prev)
}

/// 找到最接近 prev 的欧拉角表示
fn find_closest_euler(r: Vec3, prev: Vec3) -> Vec3 {
    let candidates = [
        r,
        Vec3::new(r.x + PI, PI - r.y, r.z + PI),
        Vec3::new(r.x + PI, PI - r.y, r.z - PI),
        Vec3::new(r.x + PI, -PI - r.y, r.z + PI),
        Vec3::new(r.x + PI, -PI - r.y, r.z - PI),
        Vec3::new(r.x - PI, PI - r.y, r.z + PI),
        Vec3::new(r.x - PI, PI - r.y, r.z - PI),
        Vec3::new(r.x - PI, -PI - r.y, r.z + PI),
        Vec3::new(r.x - PI, -PI - r.y, r.z - PI),
    ];

    let mut best = r;
    let mut best_error = euler_error(r, prev);
    for candidate in &candidates[1..] {
        let error = euler_error(*candidate, prev);
        if error < best_error {
            best_error = error;
            best = *candidate;
        }
    }
    best
}

fn euler_error(a: Vec3, b: Vec3) -> f32 {
    angle_diff(a.x, b.x).abs() + angle_diff(a.y, b.y).abs() + angle_diff(a.z, b.z).abs()
}

/// 计算角度差（考虑周期性）
fn angle_diff(a: f32, b: f32) -> f32 {
    let mut diff = normalize_angle(a) - normalize_angle(b);
    if diff > PI {
        diff -= 2.0 * PI;
    } else if diff < -PI {
        diff += 2.0 * PI;
    }
    diff
}

/// 角度归一化到 [0, 2π)
fn normalize_angle(angle: f32) -> f32 {
    let r = angle % (2.0 * PI);
    if r < 0.0 {
        r + 2.0 * PI
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_axis_detection() {
        let hinge = IkLink::new(0, Some((Vec3::new(-3.0, 0.0, 0.0), Vec3::new(-0.01, 0.0, 0.0))));
        assert_eq!(hinge.plane_solve_axis(), Some(SolveAxis::X));

        let free = IkLink::new(0, None);
        assert_eq!(free.plane_solve_axis(), None);

        let two_axes = IkLink::new(0, Some((Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 0.0))));
        assert_eq!(two_axes.plane_solve_axis(), None);
    }

    #[test]
    fn test_decompose_round_trip() {
        let angles = Vec3::new(0.3, -0.4, 0.2);
        let q = compose_rotation(angles);
        let euler = decompose_rotation(Mat3::from_quat(q), Vec3::ZERO);
        assert!((euler - angles).length() < 1e-4, "{euler:?}");
    }

    #[test]
    fn test_angle_diff_wraps() {
        assert!((angle_diff(0.1, 2.0 * PI - 0.1) - 0.2).abs() < 1e-5);
        assert!((angle_diff(-0.1, 0.1) + 0.2).abs() < 1e-5);
    }
}
