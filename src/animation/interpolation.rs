//! 插值工具

use glam::Vec3;

use super::bezier_curve::{BezierCurve, Curve};

/// 骨骼关键帧插值参数（X/Y/Z 平移与旋转各一条曲线）
///
/// 保存在区间起点的关键帧上，描述从该帧到下一帧的缓动。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoneKeyframeInterpolation {
    pub translation_x: BezierCurve,
    pub translation_y: BezierCurve,
    pub translation_z: BezierCurve,
    pub orientation: BezierCurve,
}

impl BoneKeyframeInterpolation {
    /// 从 [0, 127] 范围的控制点参数构建
    pub fn build(x: [u8; 4], y: [u8; 4], z: [u8; 4], r: [u8; 4]) -> Self {
        Self {
            translation_x: BezierCurve::from_parameters(x),
            translation_y: BezierCurve::from_parameters(y),
            translation_z: BezierCurve::from_parameters(z),
            orientation: BezierCurve::from_parameters(r),
        }
    }

    /// 三个平移分量的混合系数
    pub fn translation_amounts(&self, coef: f32) -> Vec3 {
        Vec3::new(
            self.translation_x.value(coef),
            self.translation_y.value(coef),
            self.translation_z.value(coef),
        )
    }

    /// 旋转混合系数
    #[inline]
    pub fn orientation_amount(&self, coef: f32) -> f32 {
        self.orientation.value(coef)
    }
}

/// 计算插值系数：t 在 [prev, next] 区间中的归一化位置
#[inline]
pub fn coefficient(prev_frame_index: u32, next_frame_index: u32, t: f32) -> f32 {
    let interval = next_frame_index.saturating_sub(prev_frame_index);
    if interval == 0 {
        return 1.0;
    }
    ((t - prev_frame_index as f32) / interval as f32).clamp(0.0, 1.0)
}

/// 逐分量线性插值
#[inline]
pub fn lerp_element_wise(a: Vec3, b: Vec3, amounts: Vec3) -> Vec3 {
    a + (b - a) * amounts
}

#[inline]
pub fn lerp_f32(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
