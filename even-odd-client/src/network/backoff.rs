//! 重连退避策略
//!
//! 第 n 次重连（从 1 开始）的延迟为 `jitter(clamp(base·2^(n−1), base, max))`，
//! 抖动系数在 [0.8, 1.2] 内均匀分布，避免服务端重启后大量客户端同时重连。

use std::time::Duration;

use rand::Rng;

/// 抖动下限
pub const JITTER_MIN: f64 = 0.8;

/// 抖动上限
pub const JITTER_MAX: f64 = 1.2;

/// 计算第 `attempt` 次重连的原始延迟（未抖动）
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let raw = base.saturating_mul(1u32 << exponent);
    raw.max(base).min(max)
}

/// 对延迟施加 ±20% 随机抖动，结果取整到毫秒
pub fn jitter<R: Rng + ?Sized>(delay: Duration, rng: &mut R) -> Duration {
    let factor = rng.gen_range(JITTER_MIN..=JITTER_MAX);
    let millis = (delay.as_millis() as f64 * factor).round();
    Duration::from_millis(millis as u64)
}

/// 重连状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// 已进行的重连次数，成功打开后归零
    pub attempts: u32,
    /// 是否主动断开（主动断开后不再自动重连）
    pub manually_closed: bool,
}

impl RetryState {
    /// 下一次重连的序号，超过上限返回 None
    pub fn next_attempt(&self, max_retries: u32) -> Option<u32> {
        let next = self.attempts.saturating_add(1);
        (next <= max_retries).then_some(next)
    }

    /// 连接成功打开
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// 显式重新连接：清除主动断开标记并重置计数
    pub fn rearm(&mut self) {
        self.attempts = 0;
        self.manually_closed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(500);
    const MAX: Duration = Duration::from_millis(10_000);

    #[test]
    fn test_backoff_sequence_is_exponential() {
        assert_eq!(backoff_delay(1, BASE, MAX), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, BASE, MAX), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3, BASE, MAX), Duration::from_millis(2000));
        assert_eq!(backoff_delay(5, BASE, MAX), Duration::from_millis(8000));
    }

    #[test]
    fn test_max_backoff_is_capped() {
        assert_eq!(backoff_delay(6, BASE, MAX), MAX);
        assert_eq!(backoff_delay(40, BASE, MAX), MAX);
        assert_eq!(backoff_delay(u32::MAX, BASE, MAX), MAX);
    }

    #[test]
    fn test_attempt_zero_is_clamped_to_base() {
        assert_eq!(backoff_delay(0, BASE, MAX), BASE);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut rng = rand::thread_rng();
        let raw = backoff_delay(5, BASE, MAX);
        for _ in 0..1000 {
            let delay = jitter(raw, &mut rng);
            assert!(delay >= Duration::from_millis(6400), "{:?}", delay);
            assert!(delay <= Duration::from_millis(9600), "{:?}", delay);
        }
    }

    #[test]
    fn test_jitter_varies_delay() {
        let mut rng = rand::thread_rng();
        let delays: Vec<_> = (0..20).map(|_| jitter(MAX, &mut rng)).collect();
        let all_same = delays.windows(2).all(|w| w[0] == w[1]);
        assert!(!all_same, "Jitter should cause variation: {:?}", delays);
    }

    #[test]
    fn test_retry_state_limits_attempts() {
        let mut state = RetryState::default();
        assert_eq!(state.next_attempt(3), Some(1));
        state.attempts = 3;
        assert_eq!(state.next_attempt(3), None);

        state.on_open();
        assert_eq!(state.attempts, 0);
        assert_eq!(state.next_attempt(3), Some(1));
    }

    #[test]
    fn test_rearm_clears_manual_close() {
        let mut state = RetryState {
            attempts: 5,
            manually_closed: true,
        };
        state.rearm();
        assert_eq!(state, RetryState::default());
    }
}
