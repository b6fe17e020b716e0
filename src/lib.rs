//! MMD 角色运行时
//!
//! 每帧流程：
//! 动画求值 → Morph → 骨骼变换（变形层级顺序 + 附加变换 + IK）
//! → 物理步进并回写骨骼 → 物理后骨骼 → 蒙皮
//!
//! 文件解析不在本 crate 内，模型由 [`model::ModelDesc`] 描述的已解码数据构建。

pub mod animation;
pub mod model;
pub mod morph;
pub mod physics;
pub mod skeleton;
pub mod skinning;

pub use animation::Motion;
pub use model::{MmdModel, ModelConfig, ModelDesc};
pub use physics::PhysicsConfig;
pub use skinning::{SkinningBackend, SkinningBackendKind, SkinningConfig};

use thiserror::Error;

/// 引擎错误
#[derive(Debug, Error)]
pub enum MmdError {
    /// 刚体缺少可用的碰撞形状，模型构建失败
    #[error("rigid body #{index} '{name}' has no usable collision shape: {reason}")]
    InvalidShape {
        index: usize,
        name: String,
        reason: String,
    },

    /// 蒙皮缓冲区长度与顶点数不一致
    #[error("{what} buffer has {actual} elements, expected {expected}")]
    BufferSize {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// 外部蒙皮后端失败
    #[error("skinning backend failed: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, MmdError>;
