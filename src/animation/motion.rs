//! Motion - 一组按名称组织的动画通道
//!
//! 通道以名称存储，`bind` 之后才解析为模型中的骨骼 / Morph / IK 索引，
//! 同一个 Motion 可以重新绑定到其他模型。

use std::collections::HashMap;

use super::keyframe::{BoneKeyframe, IkKeyframe, MorphKeyframe};
use super::motion_track::{BoneMotionTrack, IkMotionTrack, MorphMotionTrack, MotionTrack};
use crate::morph::MorphManager;
use crate::skeleton::BoneSet;

/// 单个通道：名称 + 绑定目标 + 轨道
#[derive(Debug, Clone)]
struct Channel<T> {
    name: String,
    target: Option<usize>,
    track: T,
}

/// 按名称查找或创建通道
fn channel_mut<'a, T: Default>(
    channels: &'a mut Vec<Channel<T>>,
    index: &mut HashMap<String, usize>,
    name: &str,
) -> &'a mut T {
    let i = *index.entry(name.to_string()).or_insert_with(|| {
        channels.push(Channel {
            name: name.to_string(),
            target: None,
            track: T::default(),
        });
        channels.len() - 1
    });
    &mut channels[i].track
}

/// Motion 数据
#[derive(Debug, Clone, Default)]
pub struct Motion {
    bone_channels: Vec<Channel<BoneMotionTrack>>,
    morph_channels: Vec<Channel<MorphMotionTrack>>,
    ik_channels: Vec<Channel<IkMotionTrack>>,
    bone_index: HashMap<String, usize>,
    morph_index: HashMap<String, usize>,
    ik_index: HashMap<String, usize>,
}

impl Motion {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================
    // 关键帧编辑
    // ========================================

    pub fn insert_bone_keyframe(&mut self, name: &str, keyframe: BoneKeyframe) {
        channel_mut(&mut self.bone_channels, &mut self.bone_index, name).insert_keyframe(keyframe);
    }

    pub fn insert_morph_keyframe(&mut self, name: &str, keyframe: MorphKeyframe) {
        channel_mut(&mut self.morph_channels, &mut self.morph_index, name).insert_keyframe(keyframe);
    }

    /// IK 通道以 IK 骨骼名称标识
    pub fn insert_ik_keyframe(&mut self, name: &str, keyframe: IkKeyframe) {
        channel_mut(&mut self.ik_channels, &mut self.ik_index, name).insert_keyframe(keyframe);
    }

    pub fn bone_track(&self, name: &str) -> Option<&BoneMotionTrack> {
        self.bone_index.get(name).map(|&i| &self.bone_channels[i].track)
    }

    pub fn morph_track(&self, name: &str) -> Option<&MorphMotionTrack> {
        self.morph_index.get(name).map(|&i| &self.morph_channels[i].track)
    }

    pub fn ik_track(&self, name: &str) -> Option<&IkMotionTrack> {
        self.ik_index.get(name).map(|&i| &self.ik_channels[i].track)
    }

    /// 最大帧索引（所有通道）
    pub fn max_frame(&self) -> u32 {
        let bones = self.bone_channels.iter().map(|c| c.track.max_frame_index());
        let morphs = self.morph_channels.iter().map(|c| c.track.max_frame_index());
        let iks = self.ik_channels.iter().map(|c| c.track.max_frame_index());
        bones.chain(morphs).chain(iks).max().unwrap_or(0)
    }

    // ========================================
    // 绑定与求值
    // ========================================

    /// 按名称解析通道目标，返回成功绑定的通道数
    ///
    /// 模型中不存在的名称被忽略，求值时跳过对应通道。
    pub fn bind(&mut self, bones: &BoneSet, morphs: &MorphManager) -> usize {
        let mut bound = 0;
        for channel in &mut self.bone_channels {
            channel.target = bones.find_bone_by_name(&channel.name);
            if channel.target.is_none() {
                log::debug!("动画骨骼 '{}' 在模型中不存在", channel.name);
            }
            bound += channel.target.is_some() as usize;
        }
        for channel in &mut self.morph_channels {
            channel.target = morphs.find_morph_by_name(&channel.name);
            if channel.target.is_none() {
                log::debug!("动画 Morph '{}' 在模型中不存在", channel.name);
            }
            bound += channel.target.is_some() as usize;
        }
        for channel in &mut self.ik_channels {
            channel.target = bones
                .find_bone_by_name(&channel.name)
                .and_then(|bone| bones.find_ik_solver_by_bone(bone));
            if channel.target.is_none() {
                log::debug!("动画 IK '{}' 在模型中不存在", channel.name);
            }
            bound += channel.target.is_some() as usize;
        }
        self.seek(0.0);
        bound
    }

    /// 所有通道以二分查找重新定位（任意跳转时使用）
    pub fn seek(&mut self, t: f32) {
        for channel in &mut self.bone_channels {
            channel.track.seek(t);
        }
        for channel in &mut self.morph_channels {
            channel.track.seek(t);
        }
        for channel in &mut self.ik_channels {
            channel.track.seek(t);
        }
    }

    /// 求值并写入模型
    ///
    /// `t` 为帧单位时间，连续调用时应不递减。
    /// `weight` 钳制到 [0, 1]，小于 1 时与 `save_base_animation` 保存的基准状态混合。
    pub fn evaluate(&mut self, t: f32, weight: f32, bones: &mut BoneSet, morphs: &mut MorphManager) {
        let weight = weight.clamp(0.0, 1.0);
        for channel in &mut self.bone_channels {
            let Some(index) = channel.target else { continue };
            let frame = channel.track.evaluate(t);
            let Some(bone) = bones.get_bone_mut(index) else { continue };
            let frame = if weight < 1.0 {
                frame.blend_from(bone.base_animation_translate, bone.base_animation_rotate, weight)
            } else {
                frame
            };
            bone.animation_translate = frame.translation;
            bone.animation_rotate = frame.orientation;
        }

        for channel in &mut self.morph_channels {
            let Some(index) = channel.target else { continue };
            let Some(value) = channel.track.evaluate(t) else { continue };
            let Some(morph) = morphs.get_morph_mut(index) else { continue };
            morph.weight = if weight < 1.0 {
                morph.base_animation_weight + (value - morph.base_animation_weight) * weight
            } else {
                value
            };
        }

        for channel in &mut self.ik_channels {
            let Some(index) = channel.target else { continue };
            let enabled = channel.track.evaluate(t);
            let Some(solver) = bones.ik_solver_mut(index) else { continue };
            if weight < 1.0 {
                solver.set_enabled(solver.base_anim_enabled());
            } else {
                solver.set_enabled(enabled);
            }
        }
    }
}
