//! 贝塞尔曲线
//!
//! 用于关键帧的非线性插值。端点固定为 (0,0) 与 (1,1)，
//! 求值时先以二分法反解 X 得到曲线参数，再取对应的 Y。

use glam::Vec2;

/// 曲线 trait
pub trait Curve {
    fn value(&self, v: f32) -> f32;
}

/// X 反解的容差
const FIND_X_TOLERANCE: f32 = 1.0e-5;
/// 二分上限（f32 精度下 32 次已足够）
const FIND_X_MAX_ITERATIONS: u32 = 32;

/// 三次贝塞尔曲线
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BezierCurve {
    /// 控制点1
    c0: Vec2,
    /// 控制点2
    c1: Vec2,
}

impl BezierCurve {
    /// 线性曲线（控制点位于对角线上）
    pub const LINEAR: Self = Self {
        c0: Vec2::new(20.0 / 127.0, 20.0 / 127.0),
        c1: Vec2::new(107.0 / 127.0, 107.0 / 127.0),
    };

    /// 创建新的贝塞尔曲线
    ///
    /// # 参数
    /// - `c0`: 控制点1 (归一化到 0-1 范围)
    /// - `c1`: 控制点2 (归一化到 0-1 范围)
    pub fn new(c0: Vec2, c1: Vec2) -> Self {
        Self { c0, c1 }
    }

    /// 从 [0, 127] 范围的控制点参数创建
    pub fn from_parameters(parameters: [u8; 4]) -> Self {
        Self::new(
            Vec2::new(parameters[0] as f32 / 127.0, parameters[1] as f32 / 127.0),
            Vec2::new(parameters[2] as f32 / 127.0, parameters[3] as f32 / 127.0),
        )
    }

    /// 导出为 [0, 127] 参数格式
    pub fn to_parameters(&self) -> [u8; 4] {
        [
            (self.c0.x * 127.0).round() as u8,
            (self.c0.y * 127.0).round() as u8,
            (self.c1.x * 127.0).round() as u8,
            (self.c1.y * 127.0).round() as u8,
        ]
    }

    /// B(t) = 3(1-t)²t·P₁ + 3(1-t)t²·P₂ + t³
    #[inline]
    fn eval(p1: f32, p2: f32, t: f32) -> f32 {
        let it = 1.0 - t;
        3.0 * it * it * t * p1 + 3.0 * it * t * t * p2 + t * t * t
    }

    #[inline]
    pub fn eval_x(&self, t: f32) -> f32 {
        Self::eval(self.c0.x, self.c1.x, t)
    }

    #[inline]
    pub fn eval_y(&self, t: f32) -> f32 {
        Self::eval(self.c0.y, self.c1.y, t)
    }

    /// 二分法求 BezierX(t) ≈ x 的参数 t
    pub fn find_bezier_x(&self, x: f32) -> f32 {
        let mut start = 0.0_f32;
        let mut stop = 1.0_f32;
        let mut t = 0.5_f32;
        let mut current = self.eval_x(t);
        for _ in 0..FIND_X_MAX_ITERATIONS {
            if (x - current).abs() <= FIND_X_TOLERANCE {
                break;
            }
            if x < current {
                stop = t;
            } else {
                start = t;
            }
            t = (start + stop) * 0.5;
            current = self.eval_x(t);
        }
        t
    }
}

impl Default for BezierCurve {
    fn default() -> Self {
        Self::LINEAR
    }
}

impl Curve for BezierCurve {
    /// 根据输入值（归一化时间）计算曲线输出值（混合系数）
    fn value(&self, v: f32) -> f32 {
        if v <= 0.0 {
            return 0.0;
        }
        if v >= 1.0 {
            return 1.0;
        }
        self.eval_y(self.find_bezier_x(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_curve() {
        let curve = BezierCurve::LINEAR;
        for i in 0..=10 {
            let x = i as f32 / 10.0;
            assert!((curve.value(x) - x).abs() < 1e-4, "x={x}");
        }
    }

    #[test]
    fn test_ease_in_curve() {
        // Ease-in 在开始时较慢
        let curve = BezierCurve::new(Vec2::new(0.42, 0.0), Vec2::new(1.0, 1.0));
        assert!(curve.value(0.25) < 0.25);
    }

    #[test]
    fn test_endpoints_exact() {
        let curve = BezierCurve::from_parameters([127, 0, 0, 127]);
        assert_eq!(curve.value(0.0), 0.0);
        assert_eq!(curve.value(1.0), 1.0);
    }

    #[test]
    fn test_monotonic_curve_stays_in_unit_range() {
        let curve = BezierCurve::from_parameters([10, 7, 117, 120]);
        let mut prev = 0.0;
        for i in 0..=100 {
            let y = curve.value(i as f32 / 100.0);
            assert!((0.0..=1.0).contains(&y));
            assert!(y + 1e-4 >= prev);
            prev = y;
        }
    }

    #[test]
    fn test_find_x_inverts_eval() {
        let curve = BezierCurve::from_parameters([64, 0, 64, 127]);
        let t = curve.find_bezier_x(0.3);
        assert!((curve.eval_x(t) - 0.3).abs() <= 1e-5);
    }

    #[test]
    fn test_parameters_round_trip() {
        let params = [20, 20, 107, 107];
        assert_eq!(BezierCurve::from_parameters(params).to_parameters(), params);
        assert_eq!(BezierCurve::from_parameters(params), BezierCurve::LINEAR);
    }
}
