//! 会话轮次锁表
//!
//! 每个会话一把异步互斥锁，不同会话互不阻塞；持锁期间登记一个 CancellationToken 供 `cancel` 使用。
//! 锁随 `TurnGuard` 释放（包括 future 被中途丢弃的情况）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 锁表项：(锁, 最近访问时间)
type LockStorage = DashMap<String, (Arc<Mutex<()>>, Instant)>;

/// 活动轮次：session_id -> (持锁者编号, token)
type ActiveTurns = DashMap<String, (u64, CancellationToken)>;

#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<LockStorage>,
    active: Arc<ActiveTurns>,
    next_guard: Arc<AtomicU64>,
}

/// 持有期间该会话的轮次独占
pub struct TurnGuard {
    session_id: String,
    guard_id: u64,
    token: CancellationToken,
    active: Arc<ActiveTurns>,
    _guard: OwnedMutexGuard<()>,
}

impl TurnGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        // 只注销自己登记的 token（锁表项可能已被删除并由新轮次重新登记），字段析构时再释放互斥锁
        let guard_id = self.guard_id;
        self.active
            .remove_if(&self.session_id, |_, (owner, _)| *owner == guard_id);
    }
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, session_id: &str) -> Arc<Mutex<()>> {
        let now = Instant::now();
        self.locks
            .entry(session_id.to_string())
            .and_modify(|(_, last_access)| *last_access = now)
            .or_insert_with(|| (Arc::new(Mutex::new(())), now))
            .0
            .clone()
    }

    fn guard(&self, session_id: &str, guard: OwnedMutexGuard<()>) -> TurnGuard {
        let token = CancellationToken::new();
        let guard_id = self.next_guard.fetch_add(1, Ordering::Relaxed);
        self.active
            .insert(session_id.to_string(), (guard_id, token.clone()));
        TurnGuard {
            session_id: session_id.to_string(),
            guard_id,
            token,
            active: self.active.clone(),
            _guard: guard,
        }
    }

    /// 不等待；已有轮次在进行时返回 None
    pub fn try_acquire(&self, session_id: &str) -> Option<TurnGuard> {
        let guard = self.get(session_id).try_lock_owned().ok()?;
        Some(self.guard(session_id, guard))
    }

    /// 等待当前轮次结束后取得锁
    pub async fn acquire(&self, session_id: &str) -> TurnGuard {
        let guard = self.get(session_id).lock_owned().await;
        self.guard(session_id, guard)
    }

    /// 取消进行中的轮次；没有活动轮次时返回 false
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.active.get(session_id) {
            Some(entry) => {
                entry.value().1.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }

    /// 删除会话时移除锁表项
    pub fn remove(&self, session_id: &str) {
        self.locks.remove(session_id);
    }

    /// 清理长时间未访问且无人持有的锁表项，返回清理数量
    pub fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<String> = self
            .locks
            .iter()
            .filter(|entry| {
                let (lock, last_access) = entry.value();
                Arc::strong_count(lock) == 1 && now.duration_since(*last_access) > max_idle
            })
            .map(|entry| entry.key().clone())
            .collect();
        let count = stale.len();
        for key in stale {
            self.locks.remove(&key);
        }
        if count > 0 {
            tracing::debug!(removed = count, remaining = self.locks.len(), "Cleaned up idle session locks");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_fails_while_held() {
        let locks = SessionLocks::new();
        let guard = locks.try_acquire("s1").unwrap();
        assert!(locks.try_acquire("s1").is_none());
        assert!(locks.try_acquire("s2").is_some());
        assert!(locks.is_active("s1"));
        drop(guard);
        assert!(!locks.is_active("s1"));
        assert!(locks.try_acquire("s1").is_some());
    }

    #[tokio::test]
    async fn test_cancel_fires_token() {
        let locks = SessionLocks::new();
        assert!(!locks.cancel("s1"));
        let guard = locks.try_acquire("s1").unwrap();
        let token = guard.token();
        assert!(locks.cancel("s1"));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let locks = SessionLocks::new();
        let guard = locks.try_acquire("s1").unwrap();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("s1").await.session_id().to_string() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        assert_eq!(waiter.await.unwrap(), "s1");
    }

    #[tokio::test]
    async fn test_cleanup_idle_skips_held_locks() {
        let locks = SessionLocks::new();
        let held = locks.try_acquire("busy").unwrap();
        drop(locks.try_acquire("idle"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(locks.cleanup_idle(Duration::from_millis(1)), 1);
        assert_eq!(locks.len(), 1);
        drop(held);
    }

    #[tokio::test]
    async fn test_stale_guard_keeps_newer_turn_registered() {
        let locks = SessionLocks::new();
        let old = locks.try_acquire("s1").unwrap();
        locks.remove("s1");
        let new = locks.try_acquire("s1").unwrap();
        drop(old);

        assert!(locks.is_active("s1"));
        assert!(locks.cancel("s1"));
        assert!(new.token().is_cancelled());
        drop(new);
        assert!(!locks.is_active("s1"));
    }
}
