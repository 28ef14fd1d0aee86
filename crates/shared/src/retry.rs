//! 重试策略与重连退避
//!
//! - `RetryPolicy`：消息级重试的指数退避 + 抖动，决定一条失败消息是重新入队还是进入死信队列。
//! - `ReconnectBackoff`：连接级重连的封顶指数退避，首次等待基础间隔，每次失败翻倍直到上限。

use std::time::Duration;

use rand::Rng;

// ---------------------------------------------------------------------------
// RetryPolicy：消息重试策略
// ---------------------------------------------------------------------------

/// 消息重试策略配置
///
/// 延迟公式：`min(max_delay, initial_delay * multiplier^retry_count)`，
/// 再乘以 `[1 - jitter_factor, 1 + jitter_factor]` 内的均匀随机因子，最后再次封顶。
/// 抖动用于打散同一时刻大量失败消息的重试时间点，避免重试风暴。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数；`retry_count + 1 >= max_retries` 时进入死信队列
    pub max_retries: u32,
    /// 首次重试前的等待时间
    pub initial_delay: Duration,
    /// 退避时间上限，必须能放入 32 位毫秒
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
    /// 抖动幅度，取值 [0, 1)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    /// 默认策略：最多 3 次，初始 5 秒，最大 60 秒，倍数 2.0，抖动 ±20%
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// 计算第 N 次重试的基础等待时间（不含抖动，retry_count 从 0 开始）
    ///
    /// 使用 f64 运算后再转回 Duration，接受微秒级精度损失。
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let delay_ms = base_ms * self.multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms.round() as u64)
    }

    /// 按给定的抖动因子计算等待时间
    ///
    /// `factor` 应位于 `[1 - jitter_factor, 1 + jitter_factor]`，结果会再次封顶到 `max_delay`。
    pub fn delay_with_factor(&self, retry_count: u32, factor: f64) -> Duration {
        let base_ms = self.delay_for_attempt(retry_count).as_millis() as f64;
        let jittered_ms = (base_ms * factor).max(0.0);
        let capped_ms = jittered_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms.round() as u64)
    }

    /// 计算带随机抖动的等待时间
    pub fn jittered_delay(&self, retry_count: u32) -> Duration {
        let factor = if self.jitter_factor > 0.0 {
            rand::rng().random_range((1.0 - self.jitter_factor)..=(1.0 + self.jitter_factor))
        } else {
            1.0
        };
        self.delay_with_factor(retry_count, factor)
    }

    /// 失败后是否还能重新入队
    ///
    /// 下一次的 retry_count 达到 max_retries 时不再重试。
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count.saturating_add(1) < self.max_retries
    }
}

// ---------------------------------------------------------------------------
// ReconnectBackoff：连接重连退避
// ---------------------------------------------------------------------------

/// 连接重连的封顶指数退避
///
/// 不加抖动：单进程只有一条连接，不存在重连风暴。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }

    /// 第 N 次重连尝试前的等待时间（attempt 从 0 开始）
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// 依次产出每次重连前的等待时间，单调不减，达到上限后保持不变
    pub fn delays(self) -> impl Iterator<Item = Duration> {
        (0u32..).map(move |attempt| self.delay_for_attempt(attempt))
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(5));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
        assert!((policy.jitter_factor - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delay_for_attempt_exponential_backoff() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(40));
        // 80s -> 受限于 max_delay
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_with_factor_bounds() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_with_factor(0, 0.8), Duration::from_secs(4));
        assert_eq!(policy.delay_with_factor(0, 1.2), Duration::from_secs(6));
        // 抖动后再次封顶：60s * 1.2 仍然是 60s
        assert_eq!(policy.delay_with_factor(10, 1.2), Duration::from_secs(60));
        assert_eq!(policy.delay_with_factor(10, 0.8), Duration::from_secs(48));
    }

    #[test]
    fn test_jittered_delay_within_range() {
        let policy = RetryPolicy::default();
        let lower = policy.initial_delay.mul_f64(1.0 - policy.jitter_factor);

        for retry_count in 0..policy.max_retries + 3 {
            for _ in 0..200 {
                let delay = policy.jittered_delay(retry_count);
                assert!(delay >= lower, "retry_count={retry_count} delay={delay:?}");
                assert!(delay <= policy.max_delay, "retry_count={retry_count} delay={delay:?}");
            }
        }
    }

    #[test]
    fn test_jittered_delay_first_attempt_window() {
        let policy = RetryPolicy::default();
        for _ in 0..500 {
            let delay = policy.jittered_delay(0);
            assert!(delay >= Duration::from_secs(4) && delay <= Duration::from_secs(6));
        }
    }

    #[test]
    fn test_jittered_delay_increases_in_expectation() {
        let policy = RetryPolicy::default();
        let mean = |retry_count: u32| -> f64 {
            let total: f64 = (0..400)
                .map(|_| policy.jittered_delay(retry_count).as_secs_f64())
                .sum();
            total / 400.0
        };

        let means: Vec<f64> = (0..3).map(mean).collect();
        assert!(means[0] < means[1]);
        assert!(means[1] < means[2]);
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.jittered_delay(1), Duration::from_secs(10));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        // retry_count + 1 >= 3 时不再重试
        assert!(!policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(u32::MAX));
    }

    #[test]
    fn test_reconnect_backoff_doubles_until_capped() {
        let backoff = ReconnectBackoff::default();
        let delays: Vec<Duration> = backoff.delays().take(8).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
                Duration::from_secs(30),
                Duration::from_secs(30),
                Duration::from_secs(30),
            ]
        );
    }

    #[test]
    fn test_reconnect_backoff_is_non_decreasing() {
        let backoff = ReconnectBackoff::new(Duration::from_millis(3), Duration::from_millis(1000));
        let delays: Vec<Duration> = backoff.delays().take(64).collect();

        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays.last().copied(), Some(Duration::from_millis(1000)));
    }
}
