//! Morph 管理器
//!
//! 每帧流程：
//! `reset_deltas` → `begin_morph_material` → `apply_morph`（逐个） → `end_morph_material`

use std::collections::HashMap;

use glam::{Quat, Vec3, Vec4};

use super::material::{MaterialFactor, MmdMaterial, MATERIAL_FACTOR_FLOATS};
use super::morph::{
    BoneMorphOffset, GroupMorphOffset, MaterialMorphOffset, Morph, MorphData, UvMorphOffset, VertexMorphOffset,
};
use crate::model::desc::{MaterialDesc, MaterialMorphOperation, MorphDesc, MorphKind};
use crate::skeleton::BoneSet;

/// Morph 写入目标（与 Morph 列表分开保存，便于 Group 递归时拆分借用）
#[derive(Clone, Debug, Default)]
struct MorphTargets {
    /// 顶点位移（每顶点）
    position_deltas: Vec<Vec3>,
    /// UV 偏移（每顶点）
    uv_deltas: Vec<Vec4>,
    /// 乘算累加器（每材质）
    mul_factors: Vec<MaterialFactor>,
    /// 加算累加器（每材质）
    add_factors: Vec<MaterialFactor>,
}

/// Morph 管理器
#[derive(Clone, Debug, Default)]
pub struct MorphManager {
    morphs: Vec<Morph>,
    name_to_index: HashMap<String, usize>,
    materials: Vec<MmdMaterial>,
    targets: MorphTargets,
    /// 材质 Morph 结果平坦化缓存
    material_results_flat_cache: Vec<f32>,
}

impl MorphManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从输入数据构建
    ///
    /// 越界的顶点 / 骨骼 / 材质 / 子 Morph 引用被丢弃，
    /// Group 之间的环在此处断开，运行时不再检查。
    pub fn from_descs(
        descs: &[MorphDesc],
        materials: &[MaterialDesc],
        vertex_count: usize,
        bone_count: usize,
    ) -> Self {
        let morph_count = descs.len();
        let mut morphs: Vec<Morph> = descs
            .iter()
            .map(|desc| {
                let data = convert_morph_data(desc, vertex_count, bone_count, materials.len(), morph_count);
                Morph::new(desc.name.clone(), data)
            })
            .collect();

        break_group_cycles(&mut morphs);

        let name_to_index = morphs
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), i))
            .collect();

        let materials: Vec<MmdMaterial> = materials.iter().map(MmdMaterial::from_desc).collect();
        let targets = MorphTargets {
            position_deltas: vec![Vec3::ZERO; vertex_count],
            uv_deltas: vec![Vec4::ZERO; vertex_count],
            mul_factors: materials.iter().map(|m| MaterialFactor::from_material(m.base())).collect(),
            add_factors: vec![MaterialFactor::ZERO; materials.len()],
        };

        log::info!("Morph 构建完成: {} Morph, {} 材质", morphs.len(), materials.len());

        Self {
            morphs,
            name_to_index,
            materials,
            targets,
            material_results_flat_cache: Vec::new(),
        }
    }

    // ========================================
    // 访问器
    // ========================================

    /// 通过名称查找 Morph
    pub fn find_morph_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn morph_count(&self) -> usize {
        self.morphs.len()
    }

    pub fn morphs(&self) -> &[Morph] {
        &self.morphs
    }

    pub fn get_morph(&self, index: usize) -> Option<&Morph> {
        self.morphs.get(index)
    }

    pub fn get_morph_mut(&mut self, index: usize) -> Option<&mut Morph> {
        self.morphs.get_mut(index)
    }

    /// 设置 Morph 权重
    pub fn set_morph_weight(&mut self, index: usize, weight: f32) {
        if let Some(morph) = self.morphs.get_mut(index) {
            morph.set_weight(weight);
        }
    }

    /// 获取 Morph 权重
    pub fn get_morph_weight(&self, index: usize) -> f32 {
        self.morphs.get(index).map(|m| m.weight).unwrap_or(0.0)
    }

    /// 重置所有 Morph 权重
    pub fn reset_all_weights(&mut self) {
        for morph in &mut self.morphs {
            morph.reset();
        }
    }

    pub fn save_base_animation(&mut self) {
        for morph in &mut self.morphs {
            morph.save_base_animation();
        }
    }

    pub fn clear_base_animation(&mut self) {
        for morph in &mut self.morphs {
            morph.clear_base_animation();
        }
    }

    #[inline]
    pub fn position_deltas(&self) -> &[Vec3] {
        &self.targets.position_deltas
    }

    #[inline]
    pub fn uv_deltas(&self) -> &[Vec4] {
        &self.targets.uv_deltas
    }

    #[inline]
    pub fn materials(&self) -> &[MmdMaterial] {
        &self.materials
    }

    /// 材质结果展平（每材质 28 float，乘算与加算合并后的最终系数）
    pub fn material_morph_results_flat(&mut self) -> &[f32] {
        let MorphTargets { mul_factors, add_factors, .. } = &self.targets;
        self.material_results_flat_cache.clear();
        self.material_results_flat_cache
            .reserve(mul_factors.len() * MATERIAL_FACTOR_FLOATS);
        for (mul, add) in mul_factors.iter().zip(add_factors) {
            let mut combined = *mul;
            combined.add(add, 1.0);
            self.material_results_flat_cache
                .extend_from_slice(&combined.to_flat_floats());
        }
        &self.material_results_flat_cache
    }

    // ========================================
    // 每帧流程
    // ========================================

    /// 清零顶点位移与 UV 偏移（动画帧开始时调用）
    pub fn reset_deltas(&mut self) {
        self.targets.position_deltas.fill(Vec3::ZERO);
        self.targets.uv_deltas.fill(Vec4::ZERO);
    }

    /// 材质累加器复位：乘算为材质基础值，加算为零
    pub fn begin_morph_material(&mut self) {
        for (acc, material) in self.targets.mul_factors.iter_mut().zip(&self.materials) {
            *acc = MaterialFactor::from_material(material.base());
        }
        self.targets.add_factors.fill(MaterialFactor::ZERO);
    }

    /// 将累加结果写回材质
    pub fn end_morph_material(&mut self) {
        let MorphTargets { mul_factors, add_factors, .. } = &self.targets;
        for ((material, mul), add) in self.materials.iter_mut().zip(mul_factors).zip(add_factors) {
            material.apply_factors(mul, add);
        }
    }

    /// 以指定权重应用一个 Morph
    pub fn apply_morph(&mut self, index: usize, weight: f32, bones: &mut BoneSet) {
        if index >= self.morphs.len() {
            return;
        }
        apply_morph_recursive(&self.morphs, index, weight, &mut self.targets, bones);
    }

    /// 按当前权重应用全部 Morph（包含材质两阶段处理）
    pub fn apply_all(&mut self, bones: &mut BoneSet) {
        self.begin_morph_material();
        for index in 0..self.morphs.len() {
            let weight = self.morphs[index].weight;
            apply_morph_recursive(&self.morphs, index, weight, &mut self.targets, bones);
        }
        self.end_morph_material();
    }
}

// ============================================================================
// Morph 应用
// ============================================================================

fn apply_morph_recursive(
    morphs: &[Morph],
    index: usize,
    weight: f32,
    targets: &mut MorphTargets,
    bones: &mut BoneSet,
) {
    if weight == 0.0 {
        return;
    }
    match &morphs[index].data {
        MorphData::Vertex(offsets) => {
            for offset in offsets {
                targets.position_deltas[offset.vertex_index] += offset.offset * weight;
            }
        }
        MorphData::Uv(offsets) => {
            for offset in offsets {
                targets.uv_deltas[offset.vertex_index] += offset.offset * weight;
            }
        }
        MorphData::Material(offsets) => {
            for offset in offsets {
                apply_material_offset(offset, weight, targets);
            }
        }
        MorphData::Bone(offsets) => {
            for offset in offsets {
                if let Some(bone) = bones.get_bone_mut(offset.bone_index) {
                    let translation = Vec3::ZERO.lerp(offset.translation, weight);
                    let rotation = Quat::IDENTITY.slerp(offset.rotation, weight);
                    bone.translate += translation;
                    bone.rotate = rotation * bone.rotate;
                }
            }
        }
        MorphData::Group(offsets) => {
            for sub in offsets {
                apply_morph_recursive(morphs, sub.morph_index, sub.influence * weight, targets, bones);
            }
        }
        MorphData::None => {}
    }
}

fn apply_material_offset(offset: &MaterialMorphOffset, weight: f32, targets: &mut MorphTargets) {
    let accumulators = match offset.operation {
        MaterialMorphOperation::Multiply => &mut targets.mul_factors,
        MaterialMorphOperation::Add => &mut targets.add_factors,
    };
    let range = match offset.material_index {
        Some(index) => index..index + 1,
        None => 0..accumulators.len(),
    };
    for acc in &mut accumulators[range] {
        match offset.operation {
            MaterialMorphOperation::Multiply => acc.mul(&offset.factor, weight),
            MaterialMorphOperation::Add => acc.add(&offset.factor, weight),
        }
    }
}

// ============================================================================
// 加载时校验
// ============================================================================

fn convert_morph_data(
    desc: &MorphDesc,
    vertex_count: usize,
    bone_count: usize,
    material_count: usize,
    morph_count: usize,
) -> MorphData {
    let mut dropped = 0usize;
    let data = match &desc.kind {
        MorphKind::Vertex(items) => MorphData::Vertex(
            items
                .iter()
                .filter_map(|&(vertex, offset)| {
                    let vertex_index = vertex as usize;
                    if vertex_index < vertex_count {
                        Some(VertexMorphOffset { vertex_index, offset })
                    } else {
                        dropped += 1;
                        None
                    }
                })
                .collect(),
        ),
        MorphKind::Uv(items) => MorphData::Uv(
            items
                .iter()
                .filter_map(|&(vertex, offset)| {
                    let vertex_index = vertex as usize;
                    if vertex_index < vertex_count {
                        Some(UvMorphOffset { vertex_index, offset })
                    } else {
                        dropped += 1;
                        None
                    }
                })
                .collect(),
        ),
        MorphKind::Material(items) => MorphData::Material(
            items
                .iter()
                .filter_map(|item| {
                    let material_index = match item.material {
                        -1 => None,
                        i if i >= 0 && (i as usize) < material_count => Some(i as usize),
                        _ => {
                            dropped += 1;
                            return None;
                        }
                    };
                    Some(MaterialMorphOffset {
                        material_index,
                        operation: item.operation,
                        factor: MaterialFactor::from_morph_desc(item),
                    })
                })
                .collect(),
        ),
        MorphKind::Bone(items) => MorphData::Bone(
            items
                .iter()
                .filter_map(|&(bone, translation, rotation)| {
                    if bone >= 0 && (bone as usize) < bone_count {
                        Some(BoneMorphOffset {
                            bone_index: bone as usize,
                            translation,
                            rotation,
                        })
                    } else {
                        dropped += 1;
                        None
                    }
                })
                .collect(),
        ),
        MorphKind::Group(items) => MorphData::Group(
            items
                .iter()
                .filter_map(|&(morph, influence)| {
                    if morph >= 0 && (morph as usize) < morph_count {
                        Some(GroupMorphOffset {
                            morph_index: morph as usize,
                            influence,
                        })
                    } else {
                        dropped += 1;
                        None
                    }
                })
                .collect(),
        ),
        MorphKind::Unsupported(kind) => {
            log::warn!("Morph '{}' 类型 {} 不支持，忽略", desc.name, kind);
            MorphData::None
        }
    };
    if dropped > 0 {
        log::warn!("Morph '{}' 有 {} 个越界引用，已丢弃", desc.name, dropped);
    }
    data
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

/// 深度优先遍历 Group 引用，丢弃指回当前路径的边
fn break_group_cycles(morphs: &mut [Morph]) {
    let mut state = vec![VisitState::Unvisited; morphs.len()];
    for start in 0..morphs.len() {
        if state[start] == VisitState::Unvisited {
            visit_group(morphs, start, &mut state);
        }
    }
}

fn visit_group(morphs: &mut [Morph], index: usize, state: &mut [VisitState]) {
    state[index] = VisitState::InProgress;
    let subs: Vec<usize> = morphs[index].group_offsets().iter().map(|o| o.morph_index).collect();

    let mut cyclic = Vec::new();
    for sub in subs {
        match state[sub] {
            VisitState::InProgress => cyclic.push(sub),
            VisitState::Unvisited => visit_group(morphs, sub, state),
            VisitState::Done => {}
        }
    }

    if !cyclic.is_empty() {
        log::warn!("Group Morph '{}' 引用形成环，断开 {:?}", morphs[index].name, cyclic);
        if let MorphData::Group(offsets) = &mut morphs[index].data {
            offsets.retain(|o| !cyclic.contains(&o.morph_index));
        }
    }
    state[index] = VisitState::Done;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::desc::{BoneDesc, MaterialMorphDesc};

    fn manager(descs: Vec<MorphDesc>) -> (MorphManager, BoneSet) {
        let bones = BoneSet::from_descs(&[
            BoneDesc::new("root", -1, Vec3::ZERO),
            BoneDesc::new("head", 0, Vec3::new(0.0, 1.0, 0.0)),
        ]);
        let materials = vec![
            MaterialDesc::new("a", Vec4::new(0.5, 0.5, 0.5, 1.0)),
            MaterialDesc::new("b", Vec4::new(0.2, 0.4, 0.6, 1.0)),
        ];
        (MorphManager::from_descs(&descs, &materials, 4, 2), bones)
    }

    fn vertex_morph(name: &str, vertex: u32, offset: Vec3) -> MorphDesc {
        MorphDesc {
            name: name.into(),
            kind: MorphKind::Vertex(vec![(vertex, offset)]),
        }
    }

    #[test]
    fn test_position_morphs_accumulate() {
        let (mut mgr, mut bones) = manager(vec![
            vertex_morph("a", 1, Vec3::X),
            vertex_morph("b", 1, Vec3::Y),
        ]);
        mgr.set_morph_weight(0, 0.5);
        mgr.set_morph_weight(1, 1.0);
        mgr.reset_deltas();
        mgr.apply_all(&mut bones);
        assert_eq!(mgr.position_deltas()[1], Vec3::new(0.5, 1.0, 0.0));
        assert_eq!(mgr.position_deltas()[0], Vec3::ZERO);
    }

    #[test]
    fn test_zero_weight_is_noop() {
        let mut add = MaterialMorphDesc::add(-1);
        add.diffuse = Vec4::new(0.3, 0.0, 0.0, 0.0);
        let (mut mgr, mut bones) = manager(vec![
            vertex_morph("v", 0, Vec3::ONE),
            MorphDesc {
                name: "uv".into(),
                kind: MorphKind::Uv(vec![(2, Vec4::ONE)]),
            },
            MorphDesc {
                name: "mat".into(),
                kind: MorphKind::Material(vec![add]),
            },
        ]);
        let before: Vec<Vec4> = mgr.materials().iter().map(|m| m.diffuse).collect();
        mgr.reset_deltas();
        mgr.apply_all(&mut bones);
        assert!(mgr.position_deltas().iter().all(|d| *d == Vec3::ZERO));
        assert!(mgr.uv_deltas().iter().all(|d| *d == Vec4::ZERO));
        let after: Vec<Vec4> = mgr.materials().iter().map(|m| m.diffuse).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_group_equals_scaled_child() {
        let descs = vec![
            vertex_morph("child", 3, Vec3::new(2.0, 0.0, -1.0)),
            MorphDesc {
                name: "group".into(),
                kind: MorphKind::Group(vec![(0, 0.4)]),
            },
        ];
        let (mut direct, mut bones) = manager(descs.clone());
        direct.reset_deltas();
        direct.begin_morph_material();
        direct.apply_morph(0, 0.4 * 0.75, &mut bones);
        direct.end_morph_material();

        let (mut grouped, mut bones) = manager(descs);
        grouped.reset_deltas();
        grouped.begin_morph_material();
        grouped.apply_morph(1, 0.75, &mut bones);
        grouped.end_morph_material();

        assert_eq!(direct.position_deltas(), grouped.position_deltas());
    }

    #[test]
    fn test_material_add_all() {
        let mut add = MaterialMorphDesc::add(-1);
        add.diffuse = Vec4::new(0.1, 0.0, 0.0, 0.0);
        let (mut mgr, mut bones) = manager(vec![MorphDesc {
            name: "red".into(),
            kind: MorphKind::Material(vec![add]),
        }]);
        mgr.set_morph_weight(0, 1.0);
        mgr.apply_all(&mut bones);
        for material in mgr.materials() {
            assert!((material.diffuse.x - (material.base().diffuse.x + 0.1)).abs() < 1e-6);
            assert_eq!(material.diffuse.y, material.base().diffuse.y);
        }
        let flat = mgr.material_morph_results_flat().to_vec();
        assert_eq!(flat.len(), 2 * MATERIAL_FACTOR_FLOATS);
        assert!((flat[MATERIAL_FACTOR_FLOATS] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_material_multiply_single_target() {
        let mut mul = MaterialMorphDesc::multiply(1);
        mul.diffuse = Vec4::new(0.0, 0.0, 0.0, 1.0);
        let (mut mgr, mut bones) = manager(vec![MorphDesc {
            name: "dark".into(),
            kind: MorphKind::Material(vec![mul]),
        }]);
        mgr.set_morph_weight(0, 0.5);
        mgr.apply_all(&mut bones);
        assert_eq!(mgr.materials()[0].diffuse, mgr.materials()[0].base().diffuse);
        assert!((mgr.materials()[1].diffuse.z - 0.3).abs() < 1e-6);

        // 下一帧从基础值重新开始
        mgr.set_morph_weight(0, 0.0);
        mgr.apply_all(&mut bones);
        assert_eq!(mgr.materials()[1].diffuse, mgr.materials()[1].base().diffuse);
    }

    #[test]
    fn test_bone_morph_full_weight() {
        let rotation = Quat::from_rotation_y(0.8);
        let (mut mgr, mut bones) = manager(vec![MorphDesc {
            name: "nod".into(),
            kind: MorphKind::Bone(vec![(1, Vec3::new(0.0, 0.2, 0.0), rotation), (9, Vec3::ONE, Quat::IDENTITY)]),
        }]);
        bones.begin_update_transform();
        mgr.set_morph_weight(0, 1.0);
        mgr.apply_all(&mut bones);

        let bone = &bones.bones()[1];
        assert!((bone.translate - bone.init_translate - Vec3::new(0.0, 0.2, 0.0)).length() < 1e-6);
        assert!(bone.rotate.angle_between(rotation) < 1e-5);
    }

    #[test]
    fn test_out_of_range_references_dropped() {
        let (mgr, _) = manager(vec![MorphDesc {
            name: "bad".into(),
            kind: MorphKind::Vertex(vec![(0, Vec3::X), (100, Vec3::Y)]),
        }]);
        match &mgr.morphs()[0].data {
            MorphData::Vertex(offsets) => assert_eq!(offsets.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_group_cycles_are_broken() {
        let (mut mgr, mut bones) = manager(vec![
            MorphDesc {
                name: "self".into(),
                kind: MorphKind::Group(vec![(0, 1.0)]),
            },
            MorphDesc {
                name: "a".into(),
                kind: MorphKind::Group(vec![(2, 1.0), (3, 1.0)]),
            },
            MorphDesc {
                name: "b".into(),
                kind: MorphKind::Group(vec![(1, 1.0)]),
            },
            vertex_morph("leaf", 0, Vec3::Z),
        ]);
        assert!(mgr.morphs()[0].group_offsets().is_empty());
        assert_eq!(mgr.morphs()[1].group_offsets().len(), 2);
        assert!(mgr.morphs()[2].group_offsets().is_empty());

        mgr.set_morph_weight(1, 1.0);
        mgr.apply_all(&mut bones);
        assert_eq!(mgr.position_deltas()[0], Vec3::Z);
    }

    #[test]
    fn test_unsupported_kind_is_noop() {
        let (mut mgr, mut bones) = manager(vec![MorphDesc {
            name: "flip".into(),
            kind: MorphKind::Unsupported("flip".into()),
        }]);
        mgr.set_morph_weight(0, 1.0);
        mgr.apply_all(&mut bones);
        assert!(matches!(mgr.morphs()[0].data, MorphData::None));
        assert_eq!(mgr.find_morph_by_name("flip"), Some(0));
    }
}
