//! Bounded ring of the most recent decisions, for the admin surface.

use gatehouse_core::Transaction;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct RecentTransactions {
    capacity: usize,
    ring: Mutex<VecDeque<Transaction>>,
}

impl RecentTransactions {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append, dropping the oldest entry when full.
    pub fn push(&self, transaction: Transaction) {
        let mut ring = self.ring.lock();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(transaction);
    }

    /// Newest first.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.ring.lock().iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }
}
