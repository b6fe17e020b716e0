//! 模型输入数据
//!
//! 由外部解析器生成，已转换到引擎的右手坐标系。
//! 所有索引均为模型内索引，-1 表示无。

use glam::{Vec2, Vec3, Vec4};

use crate::skeleton::BoneFlags;

// ============================================================================
// 顶点
// ============================================================================

/// 顶点蒙皮权重
#[derive(Clone, Debug, PartialEq)]
pub enum VertexWeight {
    /// 单骨骼
    Bdef1 { bone: i32 },
    /// 双骨骼线性混合，第二根骨骼权重为 1 - weight
    Bdef2 { bones: [i32; 2], weight: f32 },
    /// 四骨骼线性混合
    Bdef4 { bones: [i32; 4], weights: [f32; 4] },
    /// 球面变形
    Sdef {
        bones: [i32; 2],
        weight: f32,
        c: Vec3,
        r0: Vec3,
        r1: Vec3,
    },
    /// 对偶四元数（未实现，回退为单骨骼）
    Qdef { bones: [i32; 4], weights: [f32; 4] },
}

/// 顶点
#[derive(Clone, Debug)]
pub struct VertexDesc {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub weight: VertexWeight,
}

// ============================================================================
// 骨骼
// ============================================================================

/// 附加变换
#[derive(Clone, Debug)]
pub struct AppendDesc {
    pub parent: i32,
    pub rate: f32,
}

/// IK 链接
#[derive(Clone, Debug)]
pub struct IkLinkDesc {
    pub bone: i32,
    /// 角度限制 (min, max)，弧度
    pub limits: Option<(Vec3, Vec3)>,
}

/// IK 设置
#[derive(Clone, Debug)]
pub struct IkDesc {
    /// 末端效应器骨骼
    pub target: i32,
    pub iterations: u32,
    /// 单次迭代角度上限（弧度）
    pub limit_angle: f32,
    pub links: Vec<IkLinkDesc>,
}

/// 骨骼
#[derive(Clone, Debug)]
pub struct BoneDesc {
    pub name: String,
    pub parent: i32,
    /// 初始位置（模型空间）
    pub position: Vec3,
    /// 变形层级
    pub transform_level: i32,
    pub flags: BoneFlags,
    pub append: Option<AppendDesc>,
    pub ik: Option<IkDesc>,
}

impl BoneDesc {
    pub fn new(name: impl Into<String>, parent: i32, position: Vec3) -> Self {
        Self {
            name: name.into(),
            parent,
            position,
            transform_level: 0,
            flags: BoneFlags::ROTATABLE,
            append: None,
            ik: None,
        }
    }
}

// ============================================================================
// Morph
// ============================================================================

/// 材质 Morph 运算
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialMorphOperation {
    Multiply,
    Add,
}

/// 材质 Morph 条目
#[derive(Clone, Debug)]
pub struct MaterialMorphDesc {
    /// -1 表示所有材质
    pub material: i32,
    pub operation: MaterialMorphOperation,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_power: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture_factor: Vec4,
    pub sphere_texture_factor: Vec4,
    pub toon_texture_factor: Vec4,
}

impl MaterialMorphDesc {
    /// 乘算的恒等元
    pub fn multiply(material: i32) -> Self {
        Self {
            material,
            operation: MaterialMorphOperation::Multiply,
            diffuse: Vec4::ONE,
            specular: Vec3::ONE,
            specular_power: 1.0,
            ambient: Vec3::ONE,
            edge_color: Vec4::ONE,
            edge_size: 1.0,
            texture_factor: Vec4::ONE,
            sphere_texture_factor: Vec4::ONE,
            toon_texture_factor: Vec4::ONE,
        }
    }

    /// 加算的恒等元
    pub fn add(material: i32) -> Self {
        Self {
            material,
            operation: MaterialMorphOperation::Add,
            diffuse: Vec4::ZERO,
            specular: Vec3::ZERO,
            specular_power: 0.0,
            ambient: Vec3::ZERO,
            edge_color: Vec4::ZERO,
            edge_size: 0.0,
            texture_factor: Vec4::ZERO,
            sphere_texture_factor: Vec4::ZERO,
            toon_texture_factor: Vec4::ZERO,
        }
    }
}

/// Morph 数据
#[derive(Clone, Debug)]
pub enum MorphKind {
    /// (顶点索引, 位移)
    Vertex(Vec<(u32, Vec3)>),
    /// (顶点索引, UV 偏移)
    Uv(Vec<(u32, Vec4)>),
    Material(Vec<MaterialMorphDesc>),
    /// (骨骼索引, 平移, 旋转)
    Bone(Vec<(i32, Vec3, glam::Quat)>),
    /// (子 Morph 索引, 权重)
    Group(Vec<(i32, f32)>),
    /// 解析器识别但运行时不支持的类型
    Unsupported(String),
}

#[derive(Clone, Debug)]
pub struct MorphDesc {
    pub name: String,
    pub kind: MorphKind,
}

// ============================================================================
// 材质
// ============================================================================

#[derive(Clone, Debug)]
pub struct MaterialDesc {
    pub name: String,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_power: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_size: f32,
}

impl MaterialDesc {
    pub fn new(name: impl Into<String>, diffuse: Vec4) -> Self {
        Self {
            name: name.into(),
            diffuse,
            specular: Vec3::ZERO,
            specular_power: 5.0,
            ambient: Vec3::splat(0.5),
            edge_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            edge_size: 1.0,
        }
    }
}

// ============================================================================
// 物理
// ============================================================================

/// 碰撞形状
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RigidBodyShape {
    /// size.x = 半径
    Sphere,
    /// size = 半边长
    Box,
    /// size.x = 半径, size.y = 高度
    Capsule,
}

/// 刚体运算模式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RigidBodyMode {
    /// 跟随骨骼
    Static,
    /// 物理驱动骨骼
    Dynamic,
    /// 物理驱动旋转，位置跟随骨骼
    DynamicWithBonePosition,
}

#[derive(Clone, Debug)]
pub struct RigidBodyDesc {
    pub name: String,
    pub bone: i32,
    pub group: u8,
    /// 可碰撞的组位掩码
    pub collision_mask: u16,
    pub shape: Option<RigidBodyShape>,
    pub size: Vec3,
    pub position: Vec3,
    /// 欧拉角（YXZ 顺序，弧度）
    pub rotation: Vec3,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
    pub mode: RigidBodyMode,
}

#[derive(Clone, Debug)]
pub struct JointDesc {
    pub name: String,
    pub rigid_body_a: i32,
    pub rigid_body_b: i32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub linear_min: Vec3,
    pub linear_max: Vec3,
    pub angular_min: Vec3,
    pub angular_max: Vec3,
    pub linear_spring: Vec3,
    pub angular_spring: Vec3,
}

// ============================================================================
// 模型
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct ModelDesc {
    pub name: String,
    pub vertices: Vec<VertexDesc>,
    pub bones: Vec<BoneDesc>,
    pub morphs: Vec<MorphDesc>,
    pub materials: Vec<MaterialDesc>,
    pub rigid_bodies: Vec<RigidBodyDesc>,
    pub joints: Vec<JointDesc>,
}
