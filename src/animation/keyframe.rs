//! 关键帧定义

use glam::{Quat, Vec3};

use super::interpolation::BoneKeyframeInterpolation;

/// 关键帧公共接口
pub trait Keyframe {
    /// 关键帧所在帧
    fn frame_index(&self) -> u32;
}

/// 骨骼关键帧
#[derive(Debug, Clone, Copy)]
pub struct BoneKeyframe {
    pub frame_index: u32,
    pub translation: Vec3,
    pub orientation: Quat,
    /// 从本帧到下一帧的缓动曲线
    pub interpolation: BoneKeyframeInterpolation,
}

impl BoneKeyframe {
    pub fn new(frame_index: u32, translation: Vec3, orientation: Quat) -> Self {
        Self {
            frame_index,
            translation,
            orientation,
            interpolation: BoneKeyframeInterpolation::default(),
        }
    }

    pub fn with_interpolation(mut self, interpolation: BoneKeyframeInterpolation) -> Self {
        self.interpolation = interpolation;
        self
    }
}

impl Keyframe for BoneKeyframe {
    #[inline]
    fn frame_index(&self) -> u32 {
        self.frame_index
    }
}

/// Morph 关键帧（线性插值）
#[derive(Debug, Clone, Copy)]
pub struct MorphKeyframe {
    pub frame_index: u32,
    pub weight: f32,
}

impl MorphKeyframe {
    pub fn new(frame_index: u32, weight: f32) -> Self {
        Self { frame_index, weight }
    }
}

impl Keyframe for MorphKeyframe {
    #[inline]
    fn frame_index(&self) -> u32 {
        self.frame_index
    }
}

/// IK 启用关键帧（不插值，取前一帧的值）
#[derive(Debug, Clone, Copy)]
pub struct IkKeyframe {
    pub frame_index: u32,
    pub enabled: bool,
}

impl IkKeyframe {
    pub fn new(frame_index: u32, enabled: bool) -> Self {
        Self { frame_index, enabled }
    }
}

impl Keyframe for IkKeyframe {
    #[inline]
    fn frame_index(&self) -> u32 {
        self.frame_index
    }
}
