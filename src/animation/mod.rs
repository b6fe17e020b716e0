//! 动画系统
//!
//! 骨骼通道使用贝塞尔缓动插值，Morph 通道线性插值，IK 通道取前一帧的开关值。

pub mod bezier_curve;
pub mod interpolation;
pub mod keyframe;
pub mod motion;
pub mod motion_track;

pub use bezier_curve::{BezierCurve, Curve};
pub use interpolation::BoneKeyframeInterpolation;
pub use keyframe::{BoneKeyframe, IkKeyframe, Keyframe, MorphKeyframe};
pub use motion::Motion;
pub use motion_track::{
    BoneFrameTransform, BoneMotionTrack, IkMotionTrack, KeyframeTrack, MorphMotionTrack, MotionTrack,
};
