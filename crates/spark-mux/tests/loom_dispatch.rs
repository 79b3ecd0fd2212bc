#![cfg(spark_loom)]
//! 以 loom 穷举“发布 Idle → 屏障 → 复查 → 夺回”与并发入队之间的交错。
//!
//! 运行方式：`RUSTFLAGS="--cfg spark_loom" cargo test -p spark-mux --features loom-model --test loom_dispatch`

use loom::{
    model::Builder,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};
use spark_mux::dispatch::{DispatchState, DrainStep};

struct Harness {
    state: DispatchState<usize>,
    executed: [AtomicUsize; 2],
    running: AtomicUsize,
}

impl Harness {
    fn new() -> Self {
        Self {
            state: DispatchState::new(),
            executed: [AtomicUsize::new(0), AtomicUsize::new(0)],
            running: AtomicUsize::new(0),
        }
    }
}

fn drain(harness: &Harness) {
    loop {
        while let Some(item) = harness.state.next_item() {
            let concurrent = harness.running.fetch_add(1, Ordering::SeqCst);
            assert_eq!(concurrent, 0, "同一时刻只能有一个排空循环执行工作项");
            harness.executed[item].fetch_add(1, Ordering::SeqCst);
            harness.running.fetch_sub(1, Ordering::SeqCst);
        }
        if harness.state.settle_idle() == DrainStep::Exit {
            return;
        }
    }
}

fn produce(harness: &Arc<Harness>, item: usize) -> Option<thread::JoinHandle<()>> {
    if harness.state.enqueue(item) {
        let harness = Arc::clone(harness);
        Some(thread::spawn(move || drain(&harness)))
    } else {
        None
    }
}

#[test]
fn racing_producers_are_each_drained_exactly_once() {
    //
    // 教案级说明：
    // - **Why**：生产者的入队可能恰好落在排空循环判定“队列已空”与发布 Idle 之间；
    // - **How**：主线程与一个生产线程各入队一项，抢到激活权的一方派生排空线程；
    //   loom 枚举所有交错（抢占上限 3）；
    // - **What**：两项都恰好执行一次，从未并发执行，结束时标志回到 Idle 且队列为空。
    let mut builder = Builder::new();
    builder.preemption_bound = Some(3);
    builder.check(|| {
        let harness = Arc::new(Harness::new());

        let producer = {
            let harness = Arc::clone(&harness);
            thread::spawn(move || produce(&harness, 1))
        };
        let local_worker = produce(&harness, 0);
        let remote_worker = producer.join().expect("生产线程不应 panic");

        for worker in [local_worker, remote_worker].into_iter().flatten() {
            worker.join().expect("排空线程不应 panic");
        }

        assert_eq!(harness.executed[0].load(Ordering::SeqCst), 1, "第 0 项必须恰好执行一次");
        assert_eq!(harness.executed[1].load(Ordering::SeqCst), 1, "第 1 项必须恰好执行一次");
        assert_eq!(harness.state.pending(), 0);
        assert!(!harness.state.is_active(), "所有循环退出后标志必须回到 Idle");
    });
}

#[test]
fn late_producer_is_picked_up_by_the_running_or_a_new_loop() {
    //
    // 教案级说明：排空循环已经在运行时，后到的生产者要么 CAS 失败、由现有循环复查时接手，
    // 要么在现有循环发布 Idle 后自己启动新循环；两种情况下工作项都恰好执行一次。
    let mut builder = Builder::new();
    builder.preemption_bound = Some(3);
    builder.check(|| {
        let harness = Arc::new(Harness::new());
        let worker = produce(&harness, 0).expect("首个入队必须获得激活权");

        let late = {
            let harness = Arc::clone(&harness);
            thread::spawn(move || produce(&harness, 1))
        };
        let late_worker = late.join().expect("生产线程不应 panic");

        worker.join().expect("排空线程不应 panic");
        if let Some(late_worker) = late_worker {
            late_worker.join().expect("排空线程不应 panic");
        }

        assert_eq!(harness.executed[0].load(Ordering::SeqCst), 1);
        assert_eq!(harness.executed[1].load(Ordering::SeqCst), 1);
        assert!(!harness.state.is_active());
    });
}
