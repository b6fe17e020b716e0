//! MMD 物理配置
//!
//! 所有参数扁平化，由调用方在构建模型时显式传入。

/// 物理配置（扁平化，不嵌套）
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsConfig {
    // ========== 重力 ==========
    /// 重力 Y 分量（负数向下），默认 -98.0（MMD 标准）
    pub gravity_y: f32,

    // ========== 模拟参数 ==========
    /// 物理 FPS，默认 60.0
    pub physics_fps: f32,
    /// 每帧最大子步数，默认 5
    pub max_substep_count: u32,
    /// 求解器迭代次数，默认 8
    pub solver_iterations: usize,

    // ========== 刚体阻尼 ==========
    /// 线性阻尼缩放（乘以模型原值），默认 1.0
    pub linear_damping_scale: f32,
    /// 角速度阻尼缩放（乘以模型原值），默认 1.0
    pub angular_damping_scale: f32,

    // ========== 质量 ==========
    /// 质量缩放（乘以模型原值），默认 1.0
    pub mass_scale: f32,

    // ========== 关节弹簧 ==========
    /// 弹簧刚度缩放因子（乘以模型原值），默认 1.0
    pub spring_stiffness_scale: f32,

    // ========== 速度限制 ==========
    /// 最大线速度，默认 100.0
    pub max_linear_velocity: f32,
    /// 最大角速度 (rad/s)，默认 50.0
    pub max_angular_velocity: f32,

    // ========== 调试 ==========
    /// 是否启用关节，默认 true
    pub joints_enabled: bool,
    /// 是否输出调试日志，默认 false
    pub debug_log: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            // ====== 重力 ======
            // 模型的弹簧/质量/阻尼参数都是为此重力设计的
            gravity_y: -98.0,

            // ====== 模拟参数 ======
            physics_fps: 60.0,
            max_substep_count: 5,
            solver_iterations: 8,

            // ====== 刚体阻尼 / 质量 / 弹簧 ======
            linear_damping_scale: 1.0,
            angular_damping_scale: 1.0,
            mass_scale: 1.0,
            spring_stiffness_scale: 1.0,

            // ====== 速度限制（适配 -98 重力）======
            max_linear_velocity: 100.0,
            max_angular_velocity: 50.0,

            // ====== 调试 ======
            joints_enabled: true,
            debug_log: false,
        }
    }
}

impl PhysicsConfig {
    /// 固定步长
    #[inline]
    pub fn fixed_time_step(&self) -> f32 {
        1.0 / self.physics_fps.max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PhysicsConfig::default();
        assert_eq!(config.gravity_y, -98.0);
        assert_eq!(config.max_substep_count, 5);
        assert!((config.fixed_time_step() - 1.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_step_guards_zero_fps() {
        let config = PhysicsConfig {
            physics_fps: 0.0,
            ..PhysicsConfig::default()
        };
        assert_eq!(config.fixed_time_step(), 1.0);
    }
}
