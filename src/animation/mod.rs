//! 动画系统
//!
//! 骨骼动画按挂钟时间播放，帧号以 50ms 为一个单位。

mod clock;
mod playback;

pub use clock::{AnimationClock, ManualClock};
pub use playback::{AnimBlend, AnimPlayback, EndBehavior, FrameSample, PlaybackStatus};

/// 每个动画帧单位对应的毫秒数
pub const FRAME_TIME_MS: f32 = 50.0;
