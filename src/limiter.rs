//! 请求节流模块
//!
//! 在请求发出前按每分钟请求数上限进行节流，并附加随机抖动，
//! 避免递归拆分出的并发子批次同时发起请求。

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;

/// 请求速率限制器
///
/// 所有并发调用方共享同一个"上次派发时间戳"。每个调用方基于该时间戳
/// 各自计算等待时间，等待期间不持有锁，因此并发调用方相互独立地节流，
/// 但共享时间戳可以避免突发请求。时间戳是简单的后写覆盖语义，
/// 不要求跨字段原子性。
pub struct RateLimiter {
    /// 每分钟最大请求数，0 表示不限流
    max_requests_per_minute: u32,
    /// 上次派发请求的时间戳
    last_dispatch: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// 创建新的速率限制器
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self {
            max_requests_per_minute,
            last_dispatch: Mutex::new(None),
        }
    }

    /// 在请求前节流
    ///
    /// 若配置了速率上限，则等待至距上次派发至少
    /// `60 / 上限 + 抖动(0.1..0.5s)` 秒后返回，并更新派发时间戳；
    /// 上限为 0 时直接返回。
    pub async fn throttle(&self) {
        if self.max_requests_per_minute == 0 {
            return;
        }

        let interval = Duration::from_secs_f64(60.0 / f64::from(self.max_requests_per_minute));
        // 为并发请求附加随机抖动，避免同时发起请求
        let jitter = Duration::from_secs_f64(rand::thread_rng().gen_range(0.1..0.5));
        let total_delay = interval + jitter;

        let elapsed = {
            let last = self.last_dispatch.lock().await;
            last.map(|t| t.elapsed())
        };

        match elapsed {
            Some(elapsed) if elapsed < total_delay => {
                tokio::time::sleep(total_delay - elapsed).await;
            }
            Some(_) => {}
            None => {}
        }

        let mut last = self.last_dispatch.lock().await;
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_ceiling_is_noop() {
        let limiter = RateLimiter::new(0);
        let started = Instant::now();
        for _ in 0..100 {
            limiter.throttle().await;
        }
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn first_call_does_not_wait_for_interval() {
        // 尚无派发记录时只更新时间戳，不等待完整间隔
        let limiter = RateLimiter::new(6); // 间隔 10s
        let started = Instant::now();
        limiter.throttle().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn second_call_is_paced() {
        let limiter = RateLimiter::new(600); // 间隔 100ms + 抖动 100..500ms
        limiter.throttle().await;
        let started = Instant::now();
        limiter.throttle().await;
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
