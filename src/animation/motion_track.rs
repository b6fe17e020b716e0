//! 动画轨道
//!
//! 存储单个骨骼 / Morph / IK 通道的所有关键帧（按帧排序），并提供求值功能。
//!
//! `evaluate` 使用单调游标加速查找，前提是查询时间不递减；
//! 时间倒退时游标回到起点重新扫描。任意跳转请先调用 `seek`（二分查找）。

use glam::{Quat, Vec3};

use super::interpolation::{coefficient, lerp_element_wise, lerp_f32};
use super::keyframe::{BoneKeyframe, IkKeyframe, Keyframe, MorphKeyframe};

/// 骨骼帧变换结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneFrameTransform {
    /// 平移
    pub translation: Vec3,
    /// 旋转
    pub orientation: Quat,
}

impl Default for BoneFrameTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

impl BoneFrameTransform {
    fn from_keyframe(keyframe: &BoneKeyframe) -> Self {
        Self {
            translation: keyframe.translation,
            orientation: keyframe.orientation,
        }
    }

    /// 与基准姿势按权重混合（平移 lerp，旋转 slerp）
    pub fn blend_from(&self, base_translation: Vec3, base_orientation: Quat, weight: f32) -> Self {
        Self {
            translation: base_translation.lerp(self.translation, weight),
            orientation: base_orientation.slerp(self.orientation, weight),
        }
    }
}

/// 动画轨道 trait
pub trait MotionTrack {
    type Frame;

    /// 求值指定时间（帧单位，可含小数）
    fn evaluate(&mut self, t: f32) -> Self::Frame;

    /// 以二分查找重新定位游标
    fn seek(&mut self, t: f32);

    /// 获取轨道长度
    fn len(&self) -> usize;

    /// 是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 获取最大帧索引
    fn max_frame_index(&self) -> u32;
}

/// 关键帧轨道
#[derive(Debug, Clone)]
pub struct KeyframeTrack<K> {
    /// 按帧升序排列的关键帧
    keyframes: Vec<K>,
    /// 上一次查找得到的边界关键帧索引
    cursor: usize,
}

pub type BoneMotionTrack = KeyframeTrack<BoneKeyframe>;
pub type MorphMotionTrack = KeyframeTrack<MorphKeyframe>;
pub type IkMotionTrack = KeyframeTrack<IkKeyframe>;

impl<K> Default for KeyframeTrack<K> {
    fn default() -> Self {
        Self {
            keyframes: Vec::new(),
            cursor: 0,
        }
    }
}

impl<K: Keyframe> KeyframeTrack<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入关键帧，同一帧已存在时替换并返回旧值
    pub fn insert_keyframe(&mut self, keyframe: K) -> Option<K> {
        self.cursor = 0;
        match self
            .keyframes
            .binary_search_by_key(&keyframe.frame_index(), |k| k.frame_index())
        {
            Ok(i) => Some(std::mem::replace(&mut self.keyframes[i], keyframe)),
            Err(i) => {
                self.keyframes.insert(i, keyframe);
                None
            }
        }
    }

    /// 移除关键帧
    pub fn remove_keyframe(&mut self, frame_index: u32) -> Option<K> {
        self.cursor = 0;
        let i = self
            .keyframes
            .binary_search_by_key(&frame_index, |k| k.frame_index())
            .ok()?;
        Some(self.keyframes.remove(i))
    }

    #[inline]
    pub fn keyframes(&self) -> &[K] {
        &self.keyframes
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 查找第一个帧大于 t 的关键帧索引（无则返回长度），从游标处向后线性扫描
    fn find_bound_key(&mut self, t: f32) -> usize {
        let mut index = self.cursor.min(self.keyframes.len());
        if index > 0 && self.keyframes[index - 1].frame_index() as f32 > t {
            // 时间倒退
            index = 0;
        }
        while index < self.keyframes.len() && self.keyframes[index].frame_index() as f32 <= t {
            index += 1;
        }
        self.cursor = index;
        index
    }

    fn seek_cursor(&mut self, t: f32) {
        self.cursor = self.keyframes.partition_point(|k| k.frame_index() as f32 <= t);
    }

    fn last_frame_index(&self) -> u32 {
        self.keyframes.last().map(|k| k.frame_index()).unwrap_or(0)
    }
}

impl MotionTrack for BoneMotionTrack {
    type Frame = BoneFrameTransform;

    fn evaluate(&mut self, t: f32) -> Self::Frame {
        if self.keyframes.is_empty() {
            return BoneFrameTransform::default();
        }
        let bound = self.find_bound_key(t);
        if bound == self.keyframes.len() {
            return BoneFrameTransform::from_keyframe(&self.keyframes[bound - 1]);
        }
        if bound == 0 {
            return BoneFrameTransform::from_keyframe(&self.keyframes[0]);
        }

        let prev = &self.keyframes[bound - 1];
        let next = &self.keyframes[bound];
        let coef = coefficient(prev.frame_index, next.frame_index, t);
        if coef <= 0.0 {
            return BoneFrameTransform::from_keyframe(prev);
        }

        // 缓动曲线取自区间起点的关键帧
        let amounts = prev.interpolation.translation_amounts(coef);
        let translation = lerp_element_wise(prev.translation, next.translation, amounts);
        let amount = prev.interpolation.orientation_amount(coef);
        let orientation = prev.orientation.slerp(next.orientation, amount);

        BoneFrameTransform {
            translation,
            orientation,
        }
    }

    fn seek(&mut self, t: f32) {
        self.seek_cursor(t);
    }

    fn len(&self) -> usize {
        self.keyframes.len()
    }

    fn max_frame_index(&self) -> u32 {
        self.last_frame_index()
    }
}

impl MotionTrack for MorphMotionTrack {
    /// 无关键帧时为 None（不修改 Morph 权重）
    type Frame = Option<f32>;

    fn evaluate(&mut self, t: f32) -> Self::Frame {
        if self.keyframes.is_empty() {
            return None;
        }
        let bound = self.find_bound_key(t);
        if bound == self.keyframes.len() {
            return Some(self.keyframes[bound - 1].weight);
        }
        if bound == 0 {
            return Some(self.keyframes[0].weight);
        }

        // Morph 使用线性插值
        let prev = &self.keyframes[bound - 1];
        let next = &self.keyframes[bound];
        let coef = coefficient(prev.frame_index, next.frame_index, t);
        if coef <= 0.0 {
            return Some(prev.weight);
        }
        Some(lerp_f32(prev.weight, next.weight, coef))
    }

    fn seek(&mut self, t: f32) {
        self.seek_cursor(t);
    }

    fn len(&self) -> usize {
        self.keyframes.len()
    }

    fn max_frame_index(&self) -> u32 {
        self.last_frame_index()
    }
}

impl MotionTrack for IkMotionTrack {
    type Frame = bool;

    fn evaluate(&mut self, t: f32) -> Self::Frame {
        if self.keyframes.is_empty() {
            return true;
        }
        let bound = self.find_bound_key(t);
        if bound == 0 {
            return self.keyframes[0].enabled;
        }
        self.keyframes[bound - 1].enabled
    }

    fn seek(&mut self, t: f32) {
        self.seek_cursor(t);
    }

    fn len(&self) -> usize {
        self.keyframes.len()
    }

    fn max_frame_index(&self) -> u32 {
        self.last_frame_index()
    }
}
