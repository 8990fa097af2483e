//! 骨骼动画播放 - 时间模型
//!
//! 以挂钟时间驱动帧号：帧号 = 起始帧 + (当前时间 - 起始时间) / 50ms * 速度。
//! 播放到末尾时按结束策略处理：循环、冻结在最后一帧、或停止并释放覆盖。
//! 所有求值函数都是只读的；只有 `advance` 会修改播放状态。

use super::FRAME_TIME_MS;

// ============================================================================
// 播放参数
// ============================================================================

/// 动画播放到末尾后的处理方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EndBehavior {
    /// 停止播放并释放骨骼覆盖
    #[default]
    Stop,
    /// 回绕到起始帧
    Loop,
    /// 冻结在最后一帧
    Freeze,
}

/// 交叉淡入窗口：记录切换前所处的帧，在窗口内从旧帧插值到新动画
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimBlend {
    /// 旧动画所在帧（可带小数）
    pub from_frame: f32,
    /// 旧动画下一帧
    pub lerp_frame: f32,
    /// 淡入开始时间 (ms)
    pub start_time: i32,
    /// 淡入时长 (ms)
    pub duration: i32,
}

/// 单帧采样结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameSample {
    /// 当前帧
    pub current: usize,
    /// 插值目标帧
    pub next: usize,
    /// current -> next 的插值系数
    pub lerp: f32,
}

impl FrameSample {
    /// 静止在某一帧
    #[inline]
    pub fn hold(frame: usize) -> Self {
        Self { current: frame, next: frame, lerp: 0.0 }
    }

    /// 以小数帧号表示
    #[inline]
    pub fn as_frame(&self) -> f32 {
        self.current as f32 + self.lerp
    }
}

/// `advance` 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// 仍在播放（包括循环回绕和冻结保持）
    Playing,
    /// 已经播完且策略为停止
    Finished,
}

/// 骨骼动画播放状态
#[derive(Clone, Debug, PartialEq)]
pub struct AnimPlayback {
    /// 起始帧
    pub start_frame: i32,
    /// 结束帧（不包含；倒放时为下界）
    pub end_frame: i32,
    /// 播放速度，负数为倒放
    pub speed: f32,
    /// 播放起始时间 (ms)
    pub start_time: i32,
    /// 暂停时刻
    pub pause_time: Option<i32>,
    /// 结束策略
    pub end: EndBehavior,
    /// 交叉淡入
    pub blend: Option<AnimBlend>,
}

impl AnimPlayback {
    /// 创建播放状态
    ///
    /// `set_frame` 指定时，反推起始时间，使得 `now` 时刻正好位于该帧。
    pub fn new(
        start_frame: i32,
        end_frame: i32,
        speed: f32,
        end: EndBehavior,
        now: i32,
        set_frame: Option<f32>,
    ) -> Self {
        let start_time = match set_frame {
            Some(frame) if speed != 0.0 => {
                now - ((frame - start_frame as f32) * FRAME_TIME_MS / speed) as i32
            }
            _ => now,
        };
        Self {
            start_frame,
            end_frame,
            speed,
            start_time,
            pause_time: None,
            end,
            blend: None,
        }
    }

    /// 帧区间长度（倒放时为负）
    #[inline]
    pub fn anim_size(&self) -> i32 {
        self.end_frame - self.start_frame
    }

    /// 是否处于暂停
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.pause_time.is_some()
    }

    /// 未经回绕处理的原始帧号
    pub fn raw_frame(&self, now: i32) -> f32 {
        let reference = self.pause_time.unwrap_or(now);
        let time = ((reference - self.start_time) as f32 / FRAME_TIME_MS).max(0.0);
        self.start_frame as f32 + time * self.speed
    }

    /// 帧号是否已经跑出区间
    #[inline]
    fn ran_off_end(&self, frame: f32) -> bool {
        let end = self.end_frame as f32;
        (self.speed > 0.0 && frame > end - 1.0) || (self.speed < 0.0 && frame < end + 1.0)
    }

    /// 把越界帧号绕回区间
    #[inline]
    fn wrap(&self, frame: f32) -> f32 {
        let end = self.end_frame as f32;
        let size = self.anim_size() as f32;
        end + (frame - end) % size - size
    }

    /// 计算某一时刻的当前帧、下一帧和插值系数
    pub fn sample(&self, now: i32, num_frames: usize) -> FrameSample {
        let start = self.start_frame;
        let end = self.end_frame;
        let endf = end as f32;
        let looping = self.end == EndBehavior::Loop;
        let mut g = self.raw_frame(now);

        let (current, next, lerp) = if self.anim_size() == 0 {
            let frame = if self.speed < 0.0 { end + 1 } else { end - 1 };
            (frame.max(0), frame.max(0), 0.0)
        } else if self.ran_off_end(g) {
            if looping {
                if self.speed < 0.0 {
                    if g < endf + 1.0 && g >= endf {
                        (end, start, endf + 1.0 - g)
                    } else {
                        if g <= endf + 1.0 {
                            g = self.wrap(g);
                        }
                        let current = g.ceil() as i32;
                        let next = if current <= end + 1 { start } else { current - 1 };
                        (current, next, g.ceil() - g)
                    }
                } else if g > endf - 1.0 && g < endf {
                    (g as i32, start, g.fract())
                } else {
                    if g >= endf {
                        g = self.wrap(g);
                    }
                    let next = if g >= endf - 1.0 { start } else { g as i32 + 1 };
                    (g as i32, next, g.fract())
                }
            } else {
                // 冻结与停止都保持在最后一帧，停止由 advance 负责释放
                let frame = if self.speed > 0.0 { end - 1 } else { end + 1 };
                (frame, frame, 0.0)
            }
        } else if self.speed > 0.0 {
            let current = g as i32;
            let mut next = current + 1;
            if next >= end {
                next = if looping { start } else { end - 1 };
            }
            (current, next, g - current as f32)
        } else {
            let current = g.ceil() as i32;
            if current > start {
                (start, start, 0.0)
            } else {
                let mut next = current - 1;
                if next < end + 1 {
                    next = if looping { start } else { end + 1 };
                }
                (current, next, g.ceil() - g)
            }
        };

        let last = num_frames.saturating_sub(1) as i32;
        FrameSample {
            current: current.clamp(0, last) as usize,
            next: next.clamp(0, last) as usize,
            lerp,
        }
    }

    /// 当前小数帧号
    #[inline]
    pub fn current_frame(&self, now: i32, num_frames: usize) -> f32 {
        self.sample(now, num_frames).as_frame()
    }

    /// 交叉淡入的权重（0 = 完全旧帧，1 = 完全新动画）；窗口外返回 None
    pub fn blend_weight(&self, now: i32) -> Option<(AnimBlend, f32)> {
        let blend = self.blend?;
        let elapsed = now - blend.start_time;
        if blend.duration <= 0 || elapsed >= blend.duration {
            return None;
        }
        let weight = (elapsed.max(0) as f32) / blend.duration as f32;
        Some((blend, weight))
    }

    /// 由即将被替换的旧动画生成交叉淡入窗口
    pub fn blend_from(previous: &AnimPlayback, now: i32, duration: i32, num_frames: usize) -> AnimBlend {
        if let Some(pending) = previous.blend {
            if pending.start_time == now {
                // 替换一个尚未开始的淡入，只更新时长
                return AnimBlend { duration, ..pending };
            }
        }

        let current = previous.current_frame(now, num_frames);
        let (mut from_frame, mut lerp_frame) = if previous.speed < 0.0 {
            (current.floor(), current.floor())
        } else {
            (current, current + 1.0)
        };

        if previous.speed >= 0.0 {
            let end = previous.end_frame as f32;
            let looping = previous.end == EndBehavior::Loop;
            if from_frame >= end {
                if looping {
                    from_frame = previous.start_frame as f32;
                } else if previous.end_frame <= 0 {
                    lerp_frame = 0.0;
                } else {
                    from_frame = end - 1.0;
                }
            }
            if lerp_frame >= end {
                if looping {
                    lerp_frame = previous.start_frame as f32;
                } else if previous.end_frame <= 0 {
                    lerp_frame = 0.0;
                } else {
                    lerp_frame = end - 1.0;
                }
            }
        }

        AnimBlend {
            from_frame,
            lerp_frame,
            start_time: now,
            duration,
        }
    }

    /// 每帧推进：处理循环回绕与停止
    ///
    /// 循环时重新锚定起始时间，使帧号回到区间内。
    pub fn advance(&mut self, now: i32) -> PlaybackStatus {
        if self.anim_size() == 0 {
            return PlaybackStatus::Playing;
        }
        let mut g = self.raw_frame(now);
        if !self.ran_off_end(g) {
            return PlaybackStatus::Playing;
        }

        match self.end {
            EndBehavior::Loop => {
                let end = self.end_frame as f32;
                if (self.speed < 0.0 && g <= end + 1.0) || (self.speed > 0.0 && g >= end) {
                    g = self.wrap(g);
                }
                let frame_time = g - self.start_frame as f32;
                let start_time = now - (frame_time / self.speed * FRAME_TIME_MS) as i32;
                self.start_time = start_time.min(now);
                PlaybackStatus::Playing
            }
            EndBehavior::Freeze => PlaybackStatus::Playing,
            EndBehavior::Stop => PlaybackStatus::Finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_playback_frames() {
        // 0..10 帧，速度 1，100ms 后应在第 2 帧
        let anim = AnimPlayback::new(0, 10, 1.0, EndBehavior::Stop, 1000, None);
        let s = anim.sample(1100, 20);
        assert_eq!(s.current, 2);
        assert_eq!(s.next, 3);
        assert!(s.lerp.abs() < 1e-5);

        // 半帧
        let s = anim.sample(1125, 20);
        assert_eq!(s.current, 2);
        assert!((s.lerp - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_set_frame_reanchors_start_time() {
        let anim = AnimPlayback::new(0, 10, 1.0, EndBehavior::Stop, 1000, Some(4.0));
        assert_eq!(anim.start_time, 800);
        assert!((anim.current_frame(1000, 20) - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_freeze_holds_last_frame() {
        let mut anim = AnimPlayback::new(0, 10, 1.0, EndBehavior::Freeze, 0, None);
        let s = anim.sample(5000, 20);
        assert_eq!(s, FrameSample::hold(9));
        assert_eq!(anim.advance(5000), PlaybackStatus::Playing);
    }

    #[test]
    fn test_stop_finishes() {
        let mut anim = AnimPlayback::new(0, 10, 1.0, EndBehavior::Stop, 0, None);
        assert_eq!(anim.advance(200), PlaybackStatus::Playing);
        assert_eq!(anim.advance(5000), PlaybackStatus::Finished);
    }

    #[test]
    fn test_loop_wraps_into_range() {
        // 12 帧处回绕为第 2 帧
        let mut anim = AnimPlayback::new(0, 10, 1.0, EndBehavior::Loop, 0, None);
        let s = anim.sample(600, 20);
        assert_eq!(s.current, 2);
        assert_eq!(s.next, 3);

        assert_eq!(anim.advance(600), PlaybackStatus::Playing);
        // 重新锚定后原始帧号回到区间内
        let g = anim.raw_frame(600);
        assert!((0.0..10.0).contains(&g));
        assert!((g - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_loop_last_frame_lerps_to_start() {
        let anim = AnimPlayback::new(0, 10, 1.0, EndBehavior::Loop, 0, None);
        // 9.5 帧：在最后一帧和第一帧之间插值
        let s = anim.sample(475, 20);
        assert_eq!(s.current, 9);
        assert_eq!(s.next, 0);
        assert!((s.lerp - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_pause_freezes_time() {
        let mut anim = AnimPlayback::new(0, 10, 1.0, EndBehavior::Stop, 0, None);
        anim.pause_time = Some(100);
        assert!((anim.current_frame(400, 20) - 2.0).abs() < 1e-5);
        assert!(anim.is_paused());
    }

    #[test]
    fn test_reverse_playback() {
        // 从第 9 帧倒放到第 0 帧
        let anim = AnimPlayback::new(9, -1, -1.0, EndBehavior::Freeze, 0, None);
        let s = anim.sample(100, 20);
        assert_eq!(s.current, 7);
        assert_eq!(s.next, 6);
    }

    #[test]
    fn test_frames_clamped_to_skeleton() {
        let anim = AnimPlayback::new(0, 10, 1.0, EndBehavior::Stop, 0, None);
        let s = anim.sample(400, 5);
        assert_eq!(s.current, 4);
        assert_eq!(s.next, 4);
    }

    #[test]
    fn test_blend_window() {
        let previous = AnimPlayback::new(0, 10, 1.0, EndBehavior::Loop, 0, None);
        let blend = AnimPlayback::blend_from(&previous, 100, 200, 20);
        assert!((blend.from_frame - 2.0).abs() < 1e-5);
        assert!((blend.lerp_frame - 3.0).abs() < 1e-5);

        let mut next = AnimPlayback::new(10, 20, 1.0, EndBehavior::Stop, 100, None);
        next.blend = Some(blend);
        let (_, w) = next.blend_weight(200).unwrap();
        assert!((w - 0.5).abs() < 1e-5);
        assert!(next.blend_weight(300).is_none());
    }
}
