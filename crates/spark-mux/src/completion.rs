//! 可复用的逐消息完成句柄。
//!
//! # 设计动机（Why）
//! - 每次写都需要一个“等待写结果”的通道；高并发下逐次分配 oneshot 会对分配器造成压力，
//!   因此以固定容量的空闲槽位队列缓存句柄，热路径上只做一次无锁弹出；
//! - 一个槽位被拆成两半：[`CompletionSender`] 随工作项进入写队列，由排空循环结算；
//!   [`Completion`] 交给生产者等待。两半都释放后槽位自动归还池中。
//!
//! # 状态机（What）
//! ```text
//! Idle ──rent──▶ Pending ──complete──▶ Completed ──poll──▶ Observed
//!                   │                                         ▲
//!                   └──fault / sender dropped──▶ Faulted ──poll┘
//! ```
//! - `Pending` 之后的迁移只发生一次（CAS 保证），因此结果要么是成功要么是失败；
//! - 结果只能被观察一次，再次轮询得到 [`MuxError::AlreadyObserved`]。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::task::{Context, Poll};

use crossbeam_queue::ArrayQueue;
use futures::task::AtomicWaker;
use tracing::warn;

use crate::error::{MuxError, Result};
use crate::id::MessageId;

const IDLE: u8 = 0;
const PENDING: u8 = 1;
const COMPLETED: u8 = 2;
const FAULTED: u8 = 3;
const OBSERVED: u8 = 4;

struct Slot {
    state: AtomicU8,
    id: AtomicU32,
    fault: spin::Mutex<Option<MuxError>>,
    waker: AtomicWaker,
    holders: AtomicU8,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            id: AtomicU32::new(0),
            fault: spin::Mutex::new(None),
            waker: AtomicWaker::new(),
            holders: AtomicU8::new(0),
        }
    }

    fn arm(&self) {
        self.holders.store(2, Ordering::Relaxed);
        self.state.store(PENDING, Ordering::Release);
    }

    fn reset(&self) {
        self.fault.lock().take();
        self.waker.take();
        self.id.store(0, Ordering::Relaxed);
        self.state.store(IDLE, Ordering::Release);
    }

    /// 唯一的 `Pending -> 终态` 迁移点，成功后唤醒等待者。
    fn settle(&self, terminal: u8) -> bool {
        let settled = self
            .state
            .compare_exchange(PENDING, terminal, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if settled {
            self.waker.wake();
        }
        settled
    }

    fn try_observe(&self) -> Option<Result<MessageId>> {
        let observed = self.state.load(Ordering::Acquire);
        match observed {
            COMPLETED | FAULTED => {
                if self
                    .state
                    .compare_exchange(observed, OBSERVED, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return Some(Err(MuxError::AlreadyObserved));
                }
                if observed == COMPLETED {
                    Some(Ok(MessageId::new(self.id.load(Ordering::Relaxed))))
                } else {
                    Some(Err(self.fault.lock().take().unwrap_or(MuxError::Abandoned)))
                }
            }
            OBSERVED => Some(Err(MuxError::AlreadyObserved)),
            _ => None,
        }
    }
}

struct PoolShared {
    idle: ArrayQueue<Arc<Slot>>,
    allocated: AtomicU64,
    reused: AtomicU64,
}

/// 池的运行统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 因池内无空闲槽位而新分配的句柄数。
    pub allocated: u64,
    /// 从池中复用的句柄数。
    pub reused: u64,
    /// 当前空闲的槽位数。
    pub idle: usize,
}

/// 完成句柄池。
///
/// # 教案式注释
///
/// ## 契约 (What)
/// - `capacity` 为空闲槽位上限（至少为 1）；
/// - [`CompletionPool::rent`] 永不阻塞：池空时直接分配新槽位；
/// - 槽位在两半都释放后归还；池已满时多出的槽位直接丢弃。
///
/// ## 注意事项 (Trade-offs)
/// - 归还发生在最后一个持有者的 `Drop` 中，调用方无需显式释放，
///   也就不存在“忘记归还”或“归还后继续使用”的误用路径。
#[derive(Clone)]
pub struct CompletionPool {
    shared: Arc<PoolShared>,
}

impl CompletionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                idle: ArrayQueue::new(capacity.max(1)),
                allocated: AtomicU64::new(0),
                reused: AtomicU64::new(0),
            }),
        }
    }

    /// 租用一个处于 `Pending` 状态的句柄，返回结算端与等待端。
    pub fn rent(&self) -> (CompletionSender, Completion) {
        let slot = match self.shared.idle.pop() {
            Some(slot) => {
                self.shared.reused.fetch_add(1, Ordering::Relaxed);
                slot
            }
            None => {
                self.shared.allocated.fetch_add(1, Ordering::Relaxed);
                Arc::new(Slot::new())
            }
        };
        slot.arm();

        let sender = CompletionSender {
            lease: Lease {
                slot: Arc::clone(&slot),
                pool: Arc::clone(&self.shared),
            },
        };
        let completion = Completion {
            lease: Lease {
                slot,
                pool: Arc::clone(&self.shared),
            },
        };
        (sender, completion)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.shared.allocated.load(Ordering::Relaxed),
            reused: self.shared.reused.load(Ordering::Relaxed),
            idle: self.shared.idle.len(),
        }
    }
}

struct Lease {
    slot: Arc<Slot>,
    pool: Arc<PoolShared>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.slot.holders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.slot.reset();
            let _ = self.pool.idle.push(Arc::clone(&self.slot));
        }
    }
}

/// 完成句柄的结算端，由写执行器持有。
pub struct CompletionSender {
    lease: Lease,
}

impl CompletionSender {
    /// 以成功结果结算，携带实际写出的标识。
    pub fn complete(self, id: MessageId) {
        let slot = &self.lease.slot;
        slot.id.store(id.get(), Ordering::Relaxed);
        slot.settle(COMPLETED);
    }

    /// 以失败结果结算。
    pub fn fault(self, error: MuxError) {
        self.fault_in_place(error);
    }

    fn fault_in_place(&self, error: MuxError) -> bool {
        let slot = &self.lease.slot;
        if slot.state.load(Ordering::Acquire) != PENDING {
            return false;
        }
        *slot.fault.lock() = Some(error);
        slot.settle(FAULTED)
    }
}

impl Drop for CompletionSender {
    fn drop(&mut self) {
        if self.lease.slot.state.load(Ordering::Acquire) == PENDING
            && self.fault_in_place(MuxError::Abandoned)
        {
            warn!("completion handle dropped before the write was executed");
        }
    }
}

/// 完成句柄的等待端。
///
/// 轮询得到 `Ok(id)` 表示该消息已写出并刷新；`Err` 为该消息自己的故障。
/// 丢弃等待端不会撤回已入队的写。
#[must_use = "dropping a Completion discards the outcome of the write"]
pub struct Completion {
    lease: Lease,
}

impl Completion {
    /// 结果是否已经可取（不消费结果）。
    pub fn is_settled(&self) -> bool {
        matches!(
            self.lease.slot.state.load(Ordering::Acquire),
            COMPLETED | FAULTED
        )
    }
}

impl Future for Completion {
    type Output = Result<MessageId>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let slot = &self.lease.slot;
        if let Some(outcome) = slot.try_observe() {
            return Poll::Ready(outcome);
        }
        slot.waker.register(cx.waker());
        // 注册与结算可能交错，注册后必须再检查一次。
        match slot.try_observe() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn completed_handle_yields_the_written_id_once() {
        let pool = CompletionPool::new(4);
        let (sender, mut completion) = pool.rent();
        assert!((&mut completion).now_or_never().is_none(), "结算前必须保持挂起");

        sender.complete(MessageId::new(42));
        assert!(completion.is_settled());
        let first = (&mut completion).now_or_never().expect("ready");
        assert_eq!(first.expect("ok").get(), 42);

        let second = (&mut completion).now_or_never().expect("ready");
        assert!(matches!(second, Err(MuxError::AlreadyObserved)));
    }

    #[test]
    fn faulted_handle_carries_its_own_error() {
        let pool = CompletionPool::new(4);
        let (sender, completion) = pool.rent();
        sender.fault(MuxError::FrameTooLarge { len: 9, max: 8 });
        let outcome = completion.now_or_never().expect("ready");
        assert!(matches!(outcome, Err(MuxError::FrameTooLarge { len: 9, max: 8 })));
    }

    #[test]
    fn dropping_the_sender_abandons_the_write() {
        let pool = CompletionPool::new(4);
        let (sender, completion) = pool.rent();
        drop(sender);
        let outcome = completion.now_or_never().expect("ready");
        assert_eq!(outcome.expect_err("abandoned").code(), "spark.mux.write.abandoned");
    }

    #[test]
    fn slots_return_to_the_pool_after_both_halves_drop() {
        let pool = CompletionPool::new(2);
        let (sender, completion) = pool.rent();
        sender.complete(MessageId::new(1));
        assert_eq!(pool.stats().idle, 0, "等待端仍持有槽位");
        drop(completion);
        assert_eq!(pool.stats().idle, 1);

        let (sender, completion) = pool.rent();
        assert!(!completion.is_settled(), "复用的槽位必须重新回到 Pending");
        let stats = pool.stats();
        assert_eq!((stats.allocated, stats.reused), (1, 1));
        sender.complete(MessageId::new(2));
        assert_eq!(completion.now_or_never().expect("ready").expect("ok").get(), 2);
    }

    #[test]
    fn exhausted_pool_allocates_and_overflow_is_dropped() {
        let pool = CompletionPool::new(1);
        let rented: Vec<_> = (0..3).map(|_| pool.rent()).collect();
        assert_eq!(pool.stats().allocated, 3);
        drop(rented);
        assert_eq!(pool.stats().idle, 1, "超出容量的槽位不进入空闲队列");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiter_is_woken_from_another_thread() {
        let pool = CompletionPool::new(1);
        let (sender, completion) = pool.rent();
        let settle = std::thread::spawn(move || sender.complete(MessageId::new(7)));
        let id = completion.await.expect("completed");
        settle.join().expect("settling thread");
        assert_eq!(id.get(), 7);
    }
}
