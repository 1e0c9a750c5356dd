// FIFO buffer of tasks waiting for a free worker.

use std::collections::VecDeque;

use super::worker::{Payload, Resolver};

/// A submitted task that has not been dispatched yet.
pub struct Task<T> {
    pub id: u64,
    pub payload: Payload<T>,
    pub resolver: Resolver<T>,
}

impl<T> Task<T> {
    pub fn new(id: u64, payload: Payload<T>, resolver: Resolver<T>) -> Self {
        Self {
            id,
            payload,
            resolver,
        }
    }
}

/// Strict FIFO queue. No priorities, no bypass.
pub struct TaskQueue<T> {
    tasks: VecDeque<Task<T>>,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
        }
    }

    pub fn push(&mut self, task: Task<T>) {
        self.tasks.push_back(task);
    }

    /// Returns a task to the head, used when a dispatch could not be delivered.
    pub fn requeue_front(&mut self, task: Task<T>) {
        self.tasks.push_front(task);
    }

    pub fn pop(&mut self) -> Option<Task<T>> {
        self.tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Removes every task in submission order.
    pub fn drain(&mut self) -> impl Iterator<Item = Task<T>> + '_ {
        self.tasks.drain(..)
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn task(id: u64) -> Task<u64> {
        let (tx, _rx) = oneshot::channel();
        Task::new(id, Box::new(move || Ok(id)), tx)
    }

    #[test]
    fn test_fifo_order() {
        let mut q = TaskQueue::new();
        for id in 1..=3 {
            q.push(task(id));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop().map(|t| t.id), Some(1));

        let head = q.pop().unwrap();
        q.requeue_front(head);
        assert_eq!(q.pop().map(|t| t.id), Some(2));
        assert_eq!(q.pop().map(|t| t.id), Some(3));
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_drain_empties_in_order() {
        let mut q = TaskQueue::new();
        q.push(task(5));
        q.push(task(6));
        let ids: Vec<u64> = q.drain().map(|t| t.id).collect();
        assert_eq!(ids, vec![5, 6]);
        assert!(q.is_empty());
    }
}
