//! MMD 模型运行时
//!
//! 持有骨骼、Morph、物理与蒙皮，按固定顺序驱动每帧更新：
//! begin → Morph → 物理前骨骼 → 物理 → 物理后骨骼 → end → 蒙皮

use glam::{Mat4, Vec2, Vec3};

use super::desc::{ModelDesc, VertexWeight};
use crate::animation::Motion;
use crate::morph::MorphManager;
use crate::physics::{MMDPhysics, PhysicsConfig};
use crate::skeleton::BoneSet;
use crate::skinning::{SkinningConfig, SkinningEngine, SkinningInput, SkinningOutput};
use crate::Result;

/// 模型构建配置
#[derive(Debug)]
pub struct ModelConfig {
    /// None 时不创建物理世界
    pub physics: Option<PhysicsConfig>,
    pub skinning: SkinningConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            physics: Some(PhysicsConfig::default()),
            skinning: SkinningConfig::default(),
        }
    }
}

/// SDEF 的 r0 / r1 校正：使两者的加权和落在 c 上
fn correct_sdef(weight: &mut VertexWeight) {
    if let VertexWeight::Sdef { weight: w0, c, r0, r1, .. } = weight {
        let w1 = 1.0 - *w0;
        let rw = *r0 * *w0 + *r1 * w1;
        *r0 = *c + *r0 - rw;
        *r1 = *c + *r1 - rw;
    }
}

/// 统计越界的顶点骨骼引用
fn count_invalid_bone_refs(weights: &[VertexWeight], bone_count: usize) -> usize {
    let invalid = |b: &i32| usize::try_from(*b).map_or(true, |b| b >= bone_count);
    weights
        .iter()
        .map(|w| match w {
            VertexWeight::Bdef1 { bone } => invalid(bone) as usize,
            VertexWeight::Bdef2 { bones, .. } | VertexWeight::Sdef { bones, .. } => {
                bones.iter().filter(|b| invalid(b)).count()
            }
            VertexWeight::Bdef4 { bones, weights } | VertexWeight::Qdef { bones, weights } => bones
                .iter()
                .zip(weights)
                .filter(|(b, w)| **w != 0.0 && invalid(b))
                .count(),
        })
        .sum()
}

/// MMD 模型
#[derive(Debug)]
pub struct MmdModel {
    pub name: String,

    // 静态顶点数据
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    uvs: Vec<Vec2>,
    weights: Vec<VertexWeight>,

    bones: BoneSet,
    morphs: MorphManager,
    physics: Option<MMDPhysics>,
    skinning: SkinningEngine,

    /// 本帧蒙皮矩阵（end_animation 时计算）
    skinning_matrices: Vec<Mat4>,

    // 蒙皮输出
    update_positions: Vec<Vec3>,
    update_normals: Vec<Vec3>,
    update_uvs: Vec<Vec2>,
}

impl MmdModel {
    /// 从已解码的数据构建模型
    ///
    /// 刚体形状非法时返回错误；其余数据问题在各子系统中修正并输出警告。
    pub fn build(desc: &ModelDesc, config: ModelConfig) -> Result<Self> {
        let vertex_count = desc.vertices.len();
        let positions: Vec<Vec3> = desc.vertices.iter().map(|v| v.position).collect();
        let normals: Vec<Vec3> = desc.vertices.iter().map(|v| v.normal).collect();
        let uvs: Vec<Vec2> = desc.vertices.iter().map(|v| v.uv).collect();
        let mut weights: Vec<VertexWeight> = desc.vertices.iter().map(|v| v.weight.clone()).collect();
        weights.iter_mut().for_each(correct_sdef);

        let bones = BoneSet::from_descs(&desc.bones);
        let invalid_refs = count_invalid_bone_refs(&weights, bones.bone_count());
        if invalid_refs > 0 {
            log::warn!("{} 个顶点骨骼引用越界，按单位矩阵处理", invalid_refs);
        }

        let morphs = MorphManager::from_descs(&desc.morphs, &desc.materials, vertex_count, bones.bone_count());

        let physics = match config.physics {
            Some(physics_config) => {
                let mut physics = MMDPhysics::new(physics_config);
                physics.build_physics(&desc.rigid_bodies, &desc.joints, &bones)?;
                Some(physics)
            }
            None => None,
        };

        let skinning = SkinningEngine::new(config.skinning, &weights);

        log::info!(
            "模型 '{}' 构建完成: {} 顶点, {} 骨骼, {} Morph, {} 刚体",
            desc.name,
            vertex_count,
            bones.bone_count(),
            morphs.morph_count(),
            physics.as_ref().map_or(0, |p| p.rigid_body_count())
        );

        let skinning_matrices = bones.skinning_matrices();
        Ok(Self {
            name: desc.name.clone(),
            update_positions: positions.clone(),
            update_normals: normals.clone(),
            update_uvs: uvs.clone(),
            positions,
            normals,
            uvs,
            weights,
            bones,
            morphs,
            physics,
            skinning,
            skinning_matrices,
        })
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn bones(&self) -> &BoneSet {
        &self.bones
    }

    pub fn bones_mut(&mut self) -> &mut BoneSet {
        &mut self.bones
    }

    pub fn morphs(&self) -> &MorphManager {
        &self.morphs
    }

    pub fn morphs_mut(&mut self) -> &mut MorphManager {
        &mut self.morphs
    }

    pub fn physics(&self) -> Option<&MMDPhysics> {
        self.physics.as_ref()
    }

    pub fn physics_mut(&mut self) -> Option<&mut MMDPhysics> {
        self.physics.as_mut()
    }

    pub fn skinning(&self) -> &SkinningEngine {
        &self.skinning
    }

    pub fn skinning_matrices(&self) -> &[Mat4] {
        &self.skinning_matrices
    }

    pub fn update_positions(&self) -> &[Vec3] {
        &self.update_positions
    }

    pub fn update_normals(&self) -> &[Vec3] {
        &self.update_normals
    }

    pub fn update_uvs(&self) -> &[Vec2] {
        &self.update_uvs
    }

    /// Motion 绑定到本模型
    pub fn bind_motion(&self, motion: &mut Motion) -> usize {
        motion.bind(&self.bones, &self.morphs)
    }

    // ========================================
    // 动画流程
    // ========================================

    /// 初始化动画状态并重置物理
    pub fn initialize_animation(&mut self) {
        self.clear_base_animation();
        self.bones.clear_animation();
        self.morphs.reset_all_weights();
        self.bones.enable_all_ik();

        self.begin_animation();
        self.update_morph_animation();
        self.update_node_animation(false);
        self.update_node_animation(true);
        self.reset_physics();
        self.end_animation();
    }

    /// 保存当前动画状态作为部分权重混合的基准
    pub fn save_base_animation(&mut self) {
        self.bones.save_base_animation();
        self.morphs.save_base_animation();
    }

    pub fn clear_base_animation(&mut self) {
        self.bones.clear_base_animation();
        self.morphs.clear_base_animation();
    }

    /// 帧开始：载入初始姿势，清空 Morph 位移
    pub fn begin_animation(&mut self) {
        self.bones.begin_update_transform();
        self.morphs.reset_deltas();
    }

    pub fn update_morph_animation(&mut self) {
        self.morphs.apply_all(&mut self.bones);
    }

    pub fn update_node_animation(&mut self, after_physics: bool) {
        self.bones.update_transforms(after_physics);
    }

    /// 物理步进并回写骨骼
    pub fn update_physics_animation(&mut self, elapsed: f32) {
        let Some(physics) = self.physics.as_mut() else {
            return;
        };
        physics.set_activation(false);
        physics.update(elapsed, &self.bones);
        physics.reflect_global_transforms(&mut self.bones);
        physics.calc_local_transforms(&mut self.bones);
        self.bones.update_root_global_transforms();
    }

    pub fn reset_physics(&mut self) {
        if let Some(physics) = self.physics.as_mut() {
            physics.reset(&mut self.bones);
        }
    }

    /// 帧结束：计算蒙皮矩阵
    pub fn end_animation(&mut self) {
        self.bones.skinning_matrices_into(&mut self.skinning_matrices);
    }

    /// 蒙皮
    pub fn update(&mut self) -> Result<()> {
        let input = SkinningInput {
            positions: &self.positions,
            normals: &self.normals,
            uvs: &self.uvs,
            weights: &self.weights,
            morph_positions: self.morphs.position_deltas(),
            morph_uvs: self.morphs.uv_deltas(),
            skinning_matrices: &self.skinning_matrices,
            global_transforms: self.bones.global_transforms(),
        };
        let mut output = SkinningOutput {
            positions: &mut self.update_positions,
            normals: &mut self.update_normals,
            uvs: &mut self.update_uvs,
        };
        self.skinning.skin(&input, &mut output)
    }

    /// 完整的一帧
    ///
    /// `frame` 为 Motion 时间（帧单位），`elapsed` 为物理推进时间（秒）。
    pub fn update_all_animation(&mut self, motion: Option<&mut Motion>, frame: f32, elapsed: f32) -> Result<()> {
        self.begin_animation();
        if let Some(motion) = motion {
            motion.evaluate(frame, 1.0, &mut self.bones, &mut self.morphs);
        }
        self.update_morph_animation();
        self.update_node_animation(false);
        self.update_physics_animation(elapsed);
        self.update_node_animation(true);
        self.end_animation();
        self.update()
    }
}
