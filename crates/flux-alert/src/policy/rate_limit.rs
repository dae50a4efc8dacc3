use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::debug;

/// 滑动窗口限流器（每个接收人一个）
///
/// 记录窗口内每次非严重告警的发送时间，按到达顺序计数。
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    window: Duration,
    events: VecDeque<DateTime<Utc>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            events: VecDeque::new(),
        }
    }

    /// 一小时窗口
    pub fn hourly() -> Self {
        Self::new(Duration::hours(1))
    }

    /// 移出窗口外的记录
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while self.events.front().is_some_and(|t| *t <= cutoff) {
            self.events.pop_front();
        }
    }

    /// 窗口内的发送次数
    pub fn count(&mut self, now: DateTime<Utc>) -> usize {
        self.prune(now);
        self.events.len()
    }

    /// 是否已达上限
    pub fn is_capped(&mut self, now: DateTime<Utc>, max_per_window: u32) -> bool {
        let count = self.count(now);
        let capped = count >= max_per_window as usize;
        if capped {
            debug!(count = count, max = max_per_window, "Rate window exhausted");
        }
        capped
    }

    /// 最早腾出额度的时间
    pub fn next_free(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.prune(now);
        self.events
            .front()
            .map(|oldest| *oldest + self.window)
            .unwrap_or(now)
    }

    /// 记录一次发送
    pub fn record(&mut self, at: DateTime<Utc>) {
        self.events.push_back(at);
    }

    /// 撤销一次预留（发送未成功），返回是否找到对应记录
    pub fn release(&mut self, at: DateTime<Utc>) -> bool {
        match self.events.iter().rposition(|t| *t == at) {
            Some(index) => {
                self.events.remove(index);
                true
            }
            None => false,
        }
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::hourly()
    }
}
