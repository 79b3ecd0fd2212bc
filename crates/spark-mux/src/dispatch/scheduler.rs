use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tracing::{debug, error, trace, warn};

use super::flag::ActivityFlag;
use super::queue::WorkQueue;

/// 排空循环在队列见底后的下一步。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainStep {
    /// 已发布 Idle，本循环结束。
    Exit,
    /// 复查到新工作并夺回了活跃权，原地继续排空。
    Resume,
}

/// 调度器的无运行时状态机：队列 + 活跃标志。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把“入队后抢占标志”与“发布 Idle、屏障、复查、夺回”两段协议集中在一个类型里，
///   使其可以脱离 Tokio 被 loom 穷举验证；
///
/// ## 契约 (What)
/// - [`DispatchState::enqueue`] 先入队再 CAS，返回 `true` 时调用方必须启动一个排空循环；
/// - 排空循环只能由拿到 `true` 的一方（或 [`DrainStep::Resume`] 的一方）驱动，
///   反复调用 [`DispatchState::next_item`] 直到 `None`，再调用 [`DispatchState::settle_idle`]；
/// - 遵守上述协议时，任意时刻至多一个循环在取队，且每个入队项恰好被取出一次。
///
/// ## 逻辑 (How)
/// 1. 生产者：`push` 发生在 CAS 之前，CAS 失败意味着某个循环尚未发布 Idle，
///    而该循环发布 Idle 之后的复查必然看到这次 `push`；
/// 2. 循环：`publish_idle` 含全屏障，复查为空则退出；
///    复查非空时 `swap` 夺回，若标志已被生产者置为 Active，则由那位生产者启动的新循环接手。
pub struct DispatchState<T> {
    queue: WorkQueue<T>,
    flag: ActivityFlag,
}

impl<T> DispatchState<T> {
    pub fn new() -> Self {
        Self {
            queue: WorkQueue::new(),
            flag: ActivityFlag::new(),
        }
    }

    /// 入队并尝试激活；返回 `true` 表示调用方需要启动排空循环。
    pub fn enqueue(&self, item: T) -> bool {
        self.queue.push(item);
        self.flag.try_activate()
    }

    pub fn next_item(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn settle_idle(&self) -> DrainStep {
        self.flag.publish_idle();
        if self.queue.is_empty() {
            return DrainStep::Exit;
        }
        if !self.flag.reclaim() {
            return DrainStep::Exit;
        }
        DrainStep::Resume
    }

    pub fn is_active(&self) -> bool {
        self.flag.is_active()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// 丢弃队列中剩余的全部工作项并把标志交还为 Idle，返回丢弃的项数。
    ///
    /// 只能由持有活跃权却无法继续执行的一方调用；与 [`DispatchState::settle_idle`]
    /// 走同一段复查协议，发布 Idle 之前入队的项同样会被丢弃。
    pub fn abandon(&self) -> usize {
        let mut abandoned = 0;
        loop {
            while self.queue.pop().is_some() {
                abandoned += 1;
            }
            if self.settle_idle() == DrainStep::Exit {
                return abandoned;
            }
        }
    }
}

impl<T> Default for DispatchState<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 排空循环对每个工作项执行的动作。
///
/// 返回的 future 会被完整等待后才取下一项；实现方需自行把失败路由给工作项自带的
/// 完成句柄，而不是向循环报告。
pub trait DrainExecutor: Send + Sync + 'static {
    type Item: Send + 'static;

    fn execute(&self, item: Self::Item) -> impl Future<Output = ()> + Send;
}

struct Shared<E: DrainExecutor> {
    state: DispatchState<E::Item>,
    executor: E,
}

/// 排空任务持有的活跃权。
///
/// 在 `spawn` 之前构造并随 future 一起移交：运行时已关闭而拒绝任务、
/// 或任务在中途被取消时，future 被丢弃，`Drop` 负责放弃剩余工作项并交还活跃权。
struct DrainGuard<E: DrainExecutor> {
    shared: Arc<Shared<E>>,
    finished: bool,
}

impl<E: DrainExecutor> DrainGuard<E> {
    fn new(shared: Arc<Shared<E>>) -> Self {
        Self {
            shared,
            finished: false,
        }
    }
}

impl<E: DrainExecutor> Drop for DrainGuard<E> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let abandoned = self.shared.state.abandon();
        warn!(abandoned, "drain loop stopped before finishing; queued work abandoned");
    }
}

/// 单活跃消费者的写调度器。
///
/// `schedule` 从不在调用方的上下文中执行工作项：需要启动循环时，
/// 通过构造时捕获的运行时句柄 `spawn` 一个独立任务。
/// 运行时已经关闭时任务会被拒绝，此时已入队的工作项被丢弃，其完成句柄以 Abandoned 结算。
pub struct DispatchScheduler<E: DrainExecutor> {
    shared: Arc<Shared<E>>,
    runtime: Handle,
}

impl<E: DrainExecutor> DispatchScheduler<E> {
    pub fn new(executor: E, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: DispatchState::new(),
                executor,
            }),
            runtime,
        }
    }

    /// 提交一个工作项，可从任意数量的线程并发调用。
    pub fn schedule(&self, item: E::Item) {
        if self.shared.state.enqueue(item) {
            self.runtime.spawn(drain(DrainGuard::new(Arc::clone(&self.shared))));
        }
    }

    pub fn is_draining(&self) -> bool {
        self.shared.state.is_active()
    }

    pub fn pending(&self) -> usize {
        self.shared.state.pending()
    }
}

async fn drain<E: DrainExecutor>(mut guard: DrainGuard<E>) {
    let shared = Arc::clone(&guard.shared);
    debug!("drain loop started");
    let mut executed: u64 = 0;
    loop {
        while let Some(item) = shared.state.next_item() {
            // 执行器 panic 时工作项随栈展开被丢弃，其完成句柄以 Abandoned 结算。
            if AssertUnwindSafe(shared.executor.execute(item))
                .catch_unwind()
                .await
                .is_err()
            {
                error!(executed, "drain executor panicked; continuing with the next item");
            }
            executed += 1;
            trace!(executed, "work item executed");
        }
        match shared.state.settle_idle() {
            DrainStep::Exit => {
                guard.finished = true;
                debug!(executed, "drain loop idle");
                return;
            }
            DrainStep::Resume => debug!(executed, "drain loop resumed in place"),
        }
    }
}

#[cfg(all(test, not(spark_loom)))]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;
    use tokio::sync::oneshot::error::TryRecvError;

    struct Collect {
        seen: Arc<Mutex<Vec<u32>>>,
    }

    impl DrainExecutor for Collect {
        type Item = (u32, oneshot::Sender<()>);

        async fn execute(&self, (value, done): Self::Item) {
            if value == 2 {
                panic!("boom");
            }
            self.seen.lock().expect("seen").push(value);
            let _ = done.send(());
        }
    }

    #[test]
    fn settle_idle_resumes_only_when_work_remains() {
        let state = DispatchState::new();
        assert!(state.enqueue(1));
        assert!(!state.enqueue(2), "循环已激活，第二个生产者不得再启动循环");
        assert_eq!(state.next_item(), Some(1));
        assert_eq!(state.next_item(), Some(2));
        assert_eq!(state.settle_idle(), DrainStep::Exit);
        assert!(!state.is_active());

        assert!(state.enqueue(3));
        assert_eq!(state.next_item(), Some(3));
        state.queue.push(4);
        assert_eq!(state.settle_idle(), DrainStep::Resume, "复查到新项时应原地继续");
        assert!(state.is_active());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_item_does_not_stop_the_loop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let scheduler = DispatchScheduler::new(
            Collect {
                seen: Arc::clone(&seen),
            },
            Handle::current(),
        );

        let mut receivers = Vec::new();
        for value in 1..=3 {
            let (tx, rx) = oneshot::channel();
            scheduler.schedule((value, tx));
            receivers.push(rx);
        }
        let outcomes: Vec<bool> = futures::future::join_all(receivers)
            .await
            .into_iter()
            .map(|outcome| outcome.is_ok())
            .collect();

        assert_eq!(outcomes, vec![true, false, true], "第 2 项的发送端随 panic 丢弃");
        assert_eq!(*seen.lock().expect("seen"), vec![1, 3]);
    }

    #[test]
    fn abandon_drops_remaining_items_and_returns_idle() {
        let state = DispatchState::new();
        assert!(state.enqueue(1));
        assert!(!state.enqueue(2));
        assert_eq!(state.abandon(), 2);
        assert_eq!(state.pending(), 0);
        assert!(!state.is_active(), "放弃后标志必须回到 Idle");
        assert!(state.enqueue(3), "放弃后新的入队必须重新获得激活权");
    }

    #[test]
    fn rejected_spawn_abandons_queued_work_and_returns_idle() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .expect("runtime");
        let handle = runtime.handle().clone();
        drop(runtime);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let scheduler = DispatchScheduler::new(
            Collect {
                seen: Arc::clone(&seen),
            },
            handle,
        );

        for value in [1, 3] {
            let (tx, mut rx) = oneshot::channel();
            scheduler.schedule((value, tx));
            assert_eq!(
                rx.try_recv(),
                Err(TryRecvError::Closed),
                "运行时已关闭，第 {value} 项必须被丢弃而不是滞留在队列中"
            );
            assert!(!scheduler.is_draining(), "被拒绝的循环必须交还活跃权");
            assert_eq!(scheduler.pending(), 0);
        }
        assert!(seen.lock().expect("seen").is_empty());
    }
}
