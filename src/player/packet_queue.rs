use crossbeam::queue::SegQueue;

/// 解码单元的输入包队列
///
/// 无界、无锁的 FIFO：解封装线程写入，解码线程读取，出队顺序与入队顺序一致。
pub struct PacketQueue<P> {
    inner: SegQueue<P>,
}

impl<P> PacketQueue<P> {
    pub fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    /// 入队，从不阻塞
    pub fn push(&self, packet: P) {
        self.inner.push(packet);
    }

    pub fn pop(&self) -> Option<P> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// 清空队列，返回丢弃的包数量
    pub fn clear(&self) -> usize {
        let mut count = 0;
        while self.inner.pop().is_some() {
            count += 1;
        }
        count
    }
}

impl<P> Default for PacketQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn preserves_arrival_order_across_threads() {
        let queue = Arc::new(PacketQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for pts in 0..10_000u32 {
                    queue.push(pts);
                }
            })
        };

        let mut received = Vec::with_capacity(10_000);
        while received.len() < 10_000 {
            match queue.pop() {
                Some(pts) => received.push(pts),
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();

        assert!(received.windows(2).all(|w| w[0] < w[1]));
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_reports_dropped_count() {
        let queue = PacketQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.pop(), None);
    }
}
