//! 骨骼系统
//!
//! - BoneLink: 单个骨骼节点（姿势、动画状态、标志位）
//! - BoneSet: 以索引数组管理层次结构，全局变换集中存放
//! - IkSolver: CCD IK 求解器，支持单轴铰链限制

mod bone_link;
mod bone_set;
mod ik_solver;

pub use bone_link::{AppendConfig, BoneFlags, BoneLink};
pub use bone_set::BoneSet;
pub use ik_solver::{IkLink, IkSolver};

