//! 动画时钟

use std::sync::atomic::{AtomicI32, Ordering};

/// 动画时间来源（毫秒）
pub trait AnimationClock: Send + Sync {
    fn current_time_ms(&self) -> i32;
}

/// 手动推进的时钟，用于测试和离线模拟
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI32,
}

impl ManualClock {
    pub fn new(start_ms: i32) -> Self {
        Self {
            now: AtomicI32::new(start_ms),
        }
    }

    pub fn set(&self, ms: i32) {
        self.now.store(ms, Ordering::Relaxed);
    }

    /// 前进 ms 毫秒，返回新时间
    pub fn advance(&self, ms: i32) -> i32 {
        self.now.fetch_add(ms, Ordering::Relaxed) + ms
    }
}

impl AnimationClock for ManualClock {
    fn current_time_ms(&self) -> i32 {
        self.now.load(Ordering::Relaxed)
    }
}
