//! CPU 蒙皮（rayon 并行）
//!
//! 输出缓冲区按连续顶点区间切块，各任务只写自己的区间。

use glam::{Mat4, Quat, Vec2, Vec3};
use rayon::prelude::*;

use super::{SkinningInput, SkinningOutput};
use crate::model::desc::VertexWeight;

#[inline]
fn matrix(matrices: &[Mat4], bone: i32) -> Mat4 {
    usize::try_from(bone)
        .ok()
        .and_then(|i| matrices.get(i))
        .copied()
        .unwrap_or(Mat4::IDENTITY)
}

#[inline]
fn rotation(globals: &[Mat4], bone: i32) -> Quat {
    let (_, rotation, _) = matrix(globals, bone).to_scale_rotation_translation();
    rotation
}

/// 线性混合蒙皮
fn blend<const N: usize>(
    position: Vec3,
    normal: Vec3,
    bones: &[i32; N],
    weights: &[f32; N],
    matrices: &[Mat4],
) -> (Vec3, Vec3) {
    let mut blended = Mat4::ZERO;
    for (&bone, &w) in bones.iter().zip(weights) {
        blended += matrix(matrices, bone) * w;
    }
    (
        blended.transform_point3(position),
        blended.transform_vector3(normal).normalize_or_zero(),
    )
}

/// 单个顶点蒙皮，返回 (位置, 法线)
///
/// `position` 已包含 Morph 位移。SDEF 的 r0 / r1 需已在加载时校正。
pub fn skin_vertex(
    position: Vec3,
    normal: Vec3,
    weight: &VertexWeight,
    matrices: &[Mat4],
    globals: &[Mat4],
) -> (Vec3, Vec3) {
    match weight {
        VertexWeight::Bdef1 { bone } => blend(position, normal, &[*bone], &[1.0], matrices),
        VertexWeight::Bdef2 { bones, weight } => {
            blend(position, normal, bones, &[*weight, 1.0 - *weight], matrices)
        }
        VertexWeight::Bdef4 { bones, weights } => blend(position, normal, bones, weights, matrices),
        VertexWeight::Sdef { bones, weight, c, r0, r1 } => {
            let w0 = *weight;
            let w1 = 1.0 - w0;
            let m0 = matrix(matrices, bones[0]);
            let m1 = matrix(matrices, bones[1]);

            // pos = rot * (p - c) + m0 * ((c + r0) / 2) * w0 + m1 * ((c + r1) / 2) * w1
            let rot = rotation(globals, bones[0]).slerp(rotation(globals, bones[1]), w1);
            let cr0 = (*c + *r0) * 0.5;
            let cr1 = (*c + *r1) * 0.5;

            let skinned = rot * (position - *c)
                + m0.transform_point3(cr0) * w0
                + m1.transform_point3(cr1) * w1;
            (skinned, rot * normal)
        }
        // 对偶四元数未实现，按第一根骨骼处理
        VertexWeight::Qdef { bones, .. } => blend(position, normal, &[bones[0]], &[1.0], matrices),
    }
}

/// 串行处理区间 [start, start + positions.len())
///
/// 也作为外部后端的数值参照。
pub fn skin_range(
    input: &SkinningInput<'_>,
    start: usize,
    positions: &mut [Vec3],
    normals: &mut [Vec3],
    uvs: &mut [Vec2],
) {
    for (offset, ((out_position, out_normal), out_uv)) in positions
        .iter_mut()
        .zip(normals.iter_mut())
        .zip(uvs.iter_mut())
        .enumerate()
    {
        let i = start + offset;
        let (position, normal) = skin_vertex(
            input.positions[i] + input.morph_positions[i],
            input.normals[i],
            &input.weights[i],
            input.skinning_matrices,
            input.global_transforms,
        );
        *out_position = position;
        *out_normal = normal;
        let delta = input.morph_uvs[i];
        *out_uv = input.uvs[i] + Vec2::new(delta.x, delta.y);
    }
}

/// 并行蒙皮，缓冲区长度需已校验
pub(crate) fn skin_parallel(input: &SkinningInput<'_>, output: &mut SkinningOutput<'_>, chunk: usize) {
    let chunk = chunk.max(1);
    output
        .positions
        .par_chunks_mut(chunk)
        .zip(output.normals.par_chunks_mut(chunk))
        .zip(output.uvs.par_chunks_mut(chunk))
        .enumerate()
        .for_each(|(n, ((positions, normals), uvs))| {
            skin_range(input, n * chunk, positions, normals, uvs);
        });
}
