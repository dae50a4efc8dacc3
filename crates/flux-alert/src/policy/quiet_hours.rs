use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};

/// 免打扰时段 `[start, end)`，按租户本地时间计算，`end < start` 表示跨午夜
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietWindow {
    start: NaiveTime,
    end: NaiveTime,
    offset: FixedOffset,
}

impl QuietWindow {
    /// `start == end` 没有意义，返回 None
    pub fn new(start: NaiveTime, end: NaiveTime, offset: FixedOffset) -> Option<Self> {
        (start != end).then_some(Self { start, end, offset })
    }

    fn local_time(&self, now: DateTime<Utc>) -> NaiveTime {
        now.with_timezone(&self.offset).time()
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let t = self.local_time(now);
        if self.start < self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }

    /// 下一个时段结束时刻（严格晚于 now）
    pub fn next_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let t = self.local_time(now);
        let mut until = self.end.signed_duration_since(t);
        if until <= Duration::zero() {
            until += Duration::days(1);
        }
        now + until
    }
}
