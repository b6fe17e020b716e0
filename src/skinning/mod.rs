//! 蒙皮
//!
//! 输入为静态顶点数据、Morph 位移、每骨骼蒙皮矩阵与全局变换，
//! 输出最终顶点位置 / 法线 / UV。CPU 后端与外部后端使用同一组缓冲区。

pub mod cpu;

use std::fmt;

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::model::desc::VertexWeight;
use crate::{MmdError, Result};

/// 蒙皮输入（只读）
#[derive(Clone, Copy, Debug)]
pub struct SkinningInput<'a> {
    pub positions: &'a [Vec3],
    pub normals: &'a [Vec3],
    pub uvs: &'a [Vec2],
    pub weights: &'a [VertexWeight],
    /// Morph 顶点位移
    pub morph_positions: &'a [Vec3],
    /// Morph UV 偏移（只使用 xy）
    pub morph_uvs: &'a [Vec4],
    /// 全局变换 * 逆绑定矩阵
    pub skinning_matrices: &'a [Mat4],
    /// 骨骼全局变换（SDEF 取旋转用）
    pub global_transforms: &'a [Mat4],
}

/// 蒙皮输出
#[derive(Debug)]
pub struct SkinningOutput<'a> {
    pub positions: &'a mut [Vec3],
    pub normals: &'a mut [Vec3],
    pub uvs: &'a mut [Vec2],
}

impl SkinningInput<'_> {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// 检查所有缓冲区与顶点数 / 骨骼数一致
    pub fn validate(&self, output: &SkinningOutput<'_>) -> Result<()> {
        let expected = self.vertex_count();
        let per_vertex = [
            ("normal", self.normals.len()),
            ("uv", self.uvs.len()),
            ("vertex weight", self.weights.len()),
            ("morph position", self.morph_positions.len()),
            ("morph uv", self.morph_uvs.len()),
            ("output position", output.positions.len()),
            ("output normal", output.normals.len()),
            ("output uv", output.uvs.len()),
        ];
        for (what, actual) in per_vertex {
            check_len(what, expected, actual)?;
        }
        check_len(
            "global transform",
            self.skinning_matrices.len(),
            self.global_transforms.len(),
        )
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(MmdError::BufferSize { what, expected, actual })
    }
}

/// 外部蒙皮后端（如 GPU 计算）
///
/// 必须产生与 CPU 路径相同的结果；`skin` 返回前输出缓冲区必须已写完。
pub trait SkinningBackend: Send {
    fn name(&self) -> &str;

    fn skin(&mut self, input: &SkinningInput<'_>, output: &mut SkinningOutput<'_>) -> Result<()>;
}

/// 后端选择，在模型构建时确定
#[derive(Default)]
pub enum SkinningBackendKind {
    #[default]
    Cpu,
    External(Box<dyn SkinningBackend>),
}

impl fmt::Debug for SkinningBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("Cpu"),
            Self::External(backend) => f.debug_tuple("External").field(&backend.name()).finish(),
        }
    }
}

/// 蒙皮配置
#[derive(Debug)]
pub struct SkinningConfig {
    pub backend: SkinningBackendKind,
    /// CPU 并行时每个任务的最少顶点数
    pub min_vertices_per_task: usize,
}

impl Default for SkinningConfig {
    fn default() -> Self {
        Self {
            backend: SkinningBackendKind::Cpu,
            min_vertices_per_task: 1024,
        }
    }
}

/// 蒙皮引擎
#[derive(Debug)]
pub struct SkinningEngine {
    backend: SkinningBackendKind,
    min_vertices_per_task: usize,
    /// 回退为单骨骼的 QDEF 顶点数
    unsupported_vertices: usize,
}

impl SkinningEngine {
    pub fn new(config: SkinningConfig, weights: &[VertexWeight]) -> Self {
        let unsupported_vertices = weights
            .iter()
            .filter(|w| matches!(w, VertexWeight::Qdef { .. }))
            .count();
        if unsupported_vertices > 0 {
            log::warn!("{} 个 QDEF 顶点不受支持，按单骨骼蒙皮", unsupported_vertices);
        }

        let engine = Self {
            backend: config.backend,
            min_vertices_per_task: config.min_vertices_per_task.max(1),
            unsupported_vertices,
        };
        log::debug!("蒙皮后端: {}", engine.backend_name());
        engine
    }

    pub fn backend_name(&self) -> &str {
        match &self.backend {
            SkinningBackendKind::Cpu => "cpu",
            SkinningBackendKind::External(backend) => backend.name(),
        }
    }

    #[inline]
    pub fn unsupported_vertex_count(&self) -> usize {
        self.unsupported_vertices
    }

    /// 执行蒙皮
    pub fn skin(&mut self, input: &SkinningInput<'_>, output: &mut SkinningOutput<'_>) -> Result<()> {
        input.validate(output)?;
        match &mut self.backend {
            SkinningBackendKind::Cpu => {
                cpu::skin_parallel(input, output, self.min_vertices_per_task);
                Ok(())
            }
            SkinningBackendKind::External(backend) => backend.skin(input, output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl SkinningBackend for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn skin(&mut self, _: &SkinningInput<'_>, _: &mut SkinningOutput<'_>) -> Result<()> {
            Err(MmdError::Backend("device lost".into()))
        }
    }

    fn weights() -> Vec<VertexWeight> {
        vec![
            VertexWeight::Bdef1 { bone: 0 },
            VertexWeight::Qdef { bones: [0, 0, 0, 0], weights: [1.0, 0.0, 0.0, 0.0] },
        ]
    }

    #[test]
    fn test_buffer_size_mismatch() {
        let weights = weights();
        let positions = [Vec3::ZERO; 2];
        let normals = [Vec3::Y; 2];
        let uvs = [Vec2::ZERO; 2];
        let morph_positions = [Vec3::ZERO; 2];
        let morph_uvs = [Vec4::ZERO; 1];
        let matrices = [Mat4::IDENTITY];
        let input = SkinningInput {
            positions: &positions,
            normals: &normals,
            uvs: &uvs,
            weights: &weights,
            morph_positions: &morph_positions,
            morph_uvs: &morph_uvs,
            skinning_matrices: &matrices,
            global_transforms: &matrices,
        };
        let mut out_p = [Vec3::ZERO; 2];
        let mut out_n = [Vec3::ZERO; 2];
        let mut out_uv = [Vec2::ZERO; 2];
        let mut output = SkinningOutput {
            positions: &mut out_p,
            normals: &mut out_n,
            uvs: &mut out_uv,
        };

        let mut engine = SkinningEngine::new(SkinningConfig::default(), &weights);
        assert_eq!(engine.unsupported_vertex_count(), 1);
        let err = engine.skin(&input, &mut output).unwrap_err();
        assert!(matches!(
            err,
            MmdError::BufferSize { what: "morph uv", expected: 2, actual: 1 }
        ));
    }

    #[test]
    fn test_external_error_propagates() {
        let mut engine = SkinningEngine::new(
            SkinningConfig {
                backend: SkinningBackendKind::External(Box::new(Failing)),
                min_vertices_per_task: 16,
            },
            &[],
        );
        assert_eq!(engine.backend_name(), "failing");
        let input = SkinningInput {
            positions: &[],
            normals: &[],
            uvs: &[],
            weights: &[],
            morph_positions: &[],
            morph_uvs: &[],
            skinning_matrices: &[],
            global_transforms: &[],
        };
        let mut output = SkinningOutput {
            positions: &mut [],
            normals: &mut [],
            uvs: &mut [],
        };
        assert!(matches!(engine.skin(&input, &mut output), Err(MmdError::Backend(_))));
    }
}
