//! 排空循环的活跃标志。

#[cfg(not(spark_loom))]
use std::sync::atomic::{AtomicU8, Ordering, fence};

#[cfg(spark_loom)]
use loom::sync::atomic::{AtomicU8, Ordering, fence};

const IDLE: u8 = 0;
const ACTIVE: u8 = 1;

/// Idle/Active 两态令牌。
///
/// # 教案式注释
///
/// ## 契约 (What)
/// - [`ActivityFlag::try_activate`]：生产者在入队之后调用，CAS `Idle -> Active`，
///   成功者获得启动排空循环的唯一资格；
/// - [`ActivityFlag::publish_idle`]：排空循环发现队列为空后以 `swap` 发布 `Idle`，
///   随后是一次全屏障，保证后续的队列判空不会被重排到发布之前；
///   发布必须是读改写操作，不能退化为普通 `store`；
/// - [`ActivityFlag::reclaim`]：排空循环在复查到新工作时以 `swap` 夺回活跃权；
///   若返回 `false`，说明某个生产者已经抢先置为 `Active` 并负责启动新循环。
///
/// ## 注意事项 (Trade-offs)
/// - 所有操作都使用 `SeqCst`：该标志与队列位于两块独立内存，
///   只有全序才能排除“生产者看到 Active、循环看到空队列”同时成立的交错。
#[derive(Debug)]
pub struct ActivityFlag {
    state: AtomicU8,
}

impl ActivityFlag {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn try_activate(&self) -> bool {
        self.state
            .compare_exchange(IDLE, ACTIVE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn publish_idle(&self) {
        self.state.swap(IDLE, Ordering::SeqCst);
        fence(Ordering::SeqCst);
    }

    pub fn reclaim(&self) -> bool {
        self.state.swap(ACTIVE, Ordering::SeqCst) == IDLE
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ACTIVE
    }
}

impl Default for ActivityFlag {
    fn default() -> Self {
        Self::new()
    }
}
