//! 多生产者、单消费者的无界 FIFO。
//!
//! 常规构建使用 `crossbeam_queue::SegQueue`，入队与出队均为无锁操作；
//! 在 `spark_loom` 模型检查下换成 loom 的互斥队列，使入队/出队成为 loom 可调度的同步点。

#[cfg(not(spark_loom))]
use crossbeam_queue::SegQueue;

#[cfg(spark_loom)]
use loom::sync::Mutex;
#[cfg(spark_loom)]
use std::collections::VecDeque;

/// 待写工作项队列。
pub struct WorkQueue<T> {
    #[cfg(not(spark_loom))]
    inner: SegQueue<T>,
    #[cfg(spark_loom)]
    inner: Mutex<VecDeque<T>>,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            #[cfg(not(spark_loom))]
            inner: SegQueue::new(),
            #[cfg(spark_loom)]
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// 追加到队尾，任意线程可并发调用。
    pub fn push(&self, item: T) {
        #[cfg(not(spark_loom))]
        self.inner.push(item);
        #[cfg(spark_loom)]
        self.lock().push_back(item);
    }

    /// 从队头取出一项；只允许当前活跃的排空循环调用。
    pub fn pop(&self) -> Option<T> {
        #[cfg(not(spark_loom))]
        return self.inner.pop();
        #[cfg(spark_loom)]
        return self.lock().pop_front();
    }

    pub fn is_empty(&self) -> bool {
        #[cfg(not(spark_loom))]
        return self.inner.is_empty();
        #[cfg(spark_loom)]
        return self.lock().is_empty();
    }

    pub fn len(&self) -> usize {
        #[cfg(not(spark_loom))]
        return self.inner.len();
        #[cfg(spark_loom)]
        return self.lock().len();
    }

    #[cfg(spark_loom)]
    fn lock(&self) -> loom::sync::MutexGuard<'_, VecDeque<T>> {
        // loom 的互斥锁在模型中不会中毒，除非另一个模型线程已经 panic。
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(spark_loom)))]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn preserves_fifo_order_across_producers() {
        let queue = Arc::new(WorkQueue::new());
        let handles: Vec<_> = (0..4u32)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for seq in 0..250u32 {
                        queue.push((producer, seq));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("producer thread");
        }

        assert_eq!(queue.len(), 1000);
        let mut last = [None::<u32>; 4];
        while let Some((producer, seq)) = queue.pop() {
            let slot = &mut last[producer as usize];
            assert!(slot.is_none_or(|prev| prev < seq), "同一生产者的项必须保持入队顺序");
            *slot = Some(seq);
        }
        assert!(queue.is_empty());
    }
}
