//! Morph 系统
//!
//! 顶点 / UV Morph 累加到每顶点缓冲区，材质 Morph 累加到每材质的
//! 乘算与加算累加器，骨骼 Morph 直接叠加到骨骼姿势层。

mod manager;
mod material;
mod morph;

pub use manager::MorphManager;
pub use material::{MaterialFactor, MmdMaterial, MATERIAL_FACTOR_FLOATS};
pub use morph::{
    BoneMorphOffset, GroupMorphOffset, MaterialMorphOffset, Morph, MorphData, UvMorphOffset, VertexMorphOffset,
};
