//! # Blocking Work Queue
//!
//! A mutex-and-condvar queue whose items are an explicit enum: a unit of
//! work or a termination marker. Termination is data, not a magic sentinel
//! object compared by identity, so the two protocols built on top read
//! directly from the item type:
//!
//! - the **sort queue** carries one `Done` per participating thread, each
//!   consumed exactly once;
//! - the **outer-access queue** carries a single `Done` that every observer
//!   pushes back before reporting end-of-stream to its caller.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Item<T> {
    Task(T),
    Done,
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<Item<T>>>,
    available: Condvar,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub fn push(&self, item: Item<T>) {
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    pub fn extend(&self, items: impl IntoIterator<Item = Item<T>>) {
        let mut queue = self.items.lock();
        queue.extend(items);
        self.available.notify_all();
    }

    /// Blocks until an item is available and removes it.
    pub fn pop(&self) -> Item<T> {
        let mut queue = self.items.lock();
        loop {
            if let Some(item) = queue.pop_front() {
                return item;
            }
            self.available.wait(&mut queue);
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order() {
        let queue = WorkQueue::new();
        queue.push(Item::Task(1));
        queue.push(Item::Task(2));
        queue.push(Item::Done);

        assert_eq!(queue.pop(), Item::Task(1));
        assert_eq!(queue.pop(), Item::Task(2));
        assert_eq!(queue.pop(), Item::Done);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = Arc::new(WorkQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(std::time::Duration::from_millis(20));
        queue.push(Item::Task(7u32));
        assert_eq!(consumer.join().unwrap(), Item::Task(7));
    }

    #[test]
    fn one_done_per_worker_drains_cleanly() {
        let queue = Arc::new(WorkQueue::new());
        queue.extend((0..100).map(Item::Task));
        queue.extend((0..4).map(|_| Item::Done));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = 0usize;
                    loop {
                        match queue.pop() {
                            Item::Task(_) => seen += 1,
                            Item::Done => return seen,
                        }
                    }
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
        assert!(queue.is_empty());
    }

    #[test]
    fn reenqueued_done_reaches_every_observer() {
        let queue = Arc::new(WorkQueue::new());
        queue.push(Item::Task(1u32));
        queue.push(Item::Done);

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || loop {
                    match queue.pop() {
                        Item::Task(_) => {}
                        Item::Done => {
                            queue.push(Item::Done);
                            return true;
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(queue.pop(), Item::Done);
    }
}
