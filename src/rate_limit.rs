use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::wallet::WalletError;

/// Which bucket a request is charged to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlTarget<'a> {
    /// One wallet of the caller; counted together with the caller's global points
    Active(&'a str),
    /// Every wallet of the caller
    All,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    points: u32,
    started: Instant,
}

impl Bucket {
    fn new(now: Instant) -> Self {
        Self { points: 0, started: now }
    }

    fn expired(&self, now: Instant, window: Duration) -> bool {
        now.duration_since(self.started) > window
    }

    fn roll(&mut self, now: Instant, window: Duration) {
        if self.expired(now, window) {
            self.started = now;
            self.points = 0;
        }
    }
}

#[derive(Default)]
struct Buckets {
    global: HashMap<String, Bucket>,
    active: HashMap<(String, String), Bucket>,
}

/// Fixed window points counter per caller and per caller wallet
pub struct RateLimiter {
    window: Duration,
    max_points: u32,
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_points: u32) -> Self {
        Self {
            window,
            max_points,
            buckets: Mutex::new(Buckets::default()),
        }
    }

    pub async fn consume(&self, caller: &str, target: RlTarget<'_>, points: u32) -> Result<(), WalletError> {
        self.consume_at(caller, target, points, Instant::now()).await
    }

    pub async fn consume_at(
        &self,
        caller: &str,
        target: RlTarget<'_>,
        points: u32,
        now: Instant,
    ) -> Result<(), WalletError> {
        debug!(
            "Rl: caller {}, target {:?}, pts+={}, window={:?}, max={}",
            caller, target, points, self.window, self.max_points
        );
        let mut buckets = self.buckets.lock().await;
        let Buckets { global, active } = &mut *buckets;
        // Keys come from callers, so buckets of elapsed windows are dropped
        global.retain(|_, bucket| !bucket.expired(now, self.window));
        active.retain(|_, bucket| !bucket.expired(now, self.window));

        let global = global
            .entry(caller.to_string())
            .or_insert_with(|| Bucket::new(now));
        global.roll(now, self.window);
        if global.points + points > self.max_points {
            return Err(WalletError::RateLimited);
        }

        match target {
            RlTarget::All => global.points += points,
            RlTarget::Active(wallet_id) => {
                let local = active
                    .entry((caller.to_string(), wallet_id.to_string()))
                    .or_insert_with(|| Bucket::new(now));
                local.roll(now, self.window);
                if local.points + global.points + points > self.max_points {
                    return Err(WalletError::RateLimited);
                }
                local.points += points;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    async fn bucket_count(&self) -> usize {
        let buckets = self.buckets.lock().await;
        buckets.global.len() + buckets.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_within_window() {
        let rl = RateLimiter::new(Duration::from_secs(60), 10);
        let now = Instant::now();

        rl.consume_at("u1", RlTarget::Active("w1"), 6, now).await.unwrap();
        rl.consume_at("u1", RlTarget::Active("w1"), 4, now).await.unwrap();
        let err = rl.consume_at("u1", RlTarget::Active("w1"), 1, now).await.unwrap_err();
        assert_eq!(err, WalletError::RateLimited);

        // Other wallets and callers have their own buckets
        rl.consume_at("u1", RlTarget::Active("w2"), 10, now).await.unwrap();
        rl.consume_at("u2", RlTarget::Active("w1"), 10, now).await.unwrap();
    }

    #[tokio::test]
    async fn test_global_points_count_for_every_wallet() {
        let rl = RateLimiter::new(Duration::from_secs(60), 10);
        let now = Instant::now();

        rl.consume_at("u1", RlTarget::All, 7, now).await.unwrap();
        rl.consume_at("u1", RlTarget::Active("w1"), 3, now).await.unwrap();
        assert!(rl.consume_at("u1", RlTarget::Active("w2"), 4, now).await.is_err());
        assert!(rl.consume_at("u1", RlTarget::All, 4, now).await.is_err());
    }

    #[tokio::test]
    async fn test_window_resets() {
        let rl = RateLimiter::new(Duration::from_secs(60), 5);
        let start = Instant::now();

        rl.consume_at("u1", RlTarget::Active("w1"), 5, start).await.unwrap();
        assert!(rl.consume_at("u1", RlTarget::Active("w1"), 1, start).await.is_err());

        let later = start + Duration::from_secs(61);
        rl.consume_at("u1", RlTarget::Active("w1"), 5, later).await.unwrap();
    }

    #[tokio::test]
    async fn test_elapsed_buckets_are_dropped() {
        let rl = RateLimiter::new(Duration::from_secs(60), 5);
        let start = Instant::now();

        for i in 0..500 {
            let id = format!("inv{}", i);
            rl.consume_at("public", RlTarget::Active(&id), 0, start).await.unwrap();
        }
        assert_eq!(rl.bucket_count().await, 501);

        let later = start + Duration::from_secs(3600);
        rl.consume_at("public", RlTarget::Active("fresh"), 1, later).await.unwrap();
        assert_eq!(rl.bucket_count().await, 2);
    }
}
