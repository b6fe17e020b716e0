//! 模型：输入数据与每帧运行时

pub mod desc;
pub mod runtime;

pub use desc::ModelDesc;
pub use runtime::{MmdModel, ModelConfig};
