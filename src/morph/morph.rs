//! Morph 定义

use glam::{Quat, Vec3, Vec4};

use super::material::MaterialFactor;
use crate::model::desc::MaterialMorphOperation;

/// 顶点 Morph 偏移
#[derive(Clone, Debug)]
pub struct VertexMorphOffset {
    pub vertex_index: usize,
    pub offset: Vec3,
}

/// UV Morph 偏移
#[derive(Clone, Debug)]
pub struct UvMorphOffset {
    pub vertex_index: usize,
    pub offset: Vec4,
}

/// 骨骼 Morph 偏移
#[derive(Clone, Debug)]
pub struct BoneMorphOffset {
    pub bone_index: usize,
    pub translation: Vec3,
    pub rotation: Quat,
}

/// 材质 Morph 偏移
#[derive(Clone, Debug)]
pub struct MaterialMorphOffset {
    /// None 表示所有材质
    pub material_index: Option<usize>,
    pub operation: MaterialMorphOperation,
    pub factor: MaterialFactor,
}

/// Group Morph 子项
#[derive(Clone, Debug)]
pub struct GroupMorphOffset {
    pub morph_index: usize,
    pub influence: f32,
}

/// Morph 数据
#[derive(Clone, Debug)]
pub enum MorphData {
    Vertex(Vec<VertexMorphOffset>),
    Uv(Vec<UvMorphOffset>),
    Material(Vec<MaterialMorphOffset>),
    Bone(Vec<BoneMorphOffset>),
    Group(Vec<GroupMorphOffset>),
    /// 不支持的类型，应用时为空操作
    None,
}

/// Morph
#[derive(Clone, Debug)]
pub struct Morph {
    pub name: String,
    /// 当前权重（不做钳制）
    pub weight: f32,
    /// 部分权重混合用的基准权重
    pub base_animation_weight: f32,
    pub data: MorphData,
}

impl Morph {
    pub fn new(name: impl Into<String>, data: MorphData) -> Self {
        Self {
            name: name.into(),
            weight: 0.0,
            base_animation_weight: 0.0,
            data,
        }
    }

    #[inline]
    pub fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    #[inline]
    pub fn reset(&mut self) {
        self.weight = 0.0;
    }

    #[inline]
    pub fn save_base_animation(&mut self) {
        self.base_animation_weight = self.weight;
    }

    #[inline]
    pub fn clear_base_animation(&mut self) {
        self.base_animation_weight = 0.0;
    }

    /// Group Morph 的子项（其他类型为空）
    pub fn group_offsets(&self) -> &[GroupMorphOffset] {
        match &self.data {
            MorphData::Group(offsets) => offsets,
            _ => &[],
        }
    }
}
