//! Pending queries, in submission order.

use std::collections::VecDeque;

use crate::query::Query;

/// FIFO of queries waiting for the connection to become free.
#[derive(Debug, Default)]
pub struct QueryQueue {
    queries: VecDeque<Query>,
}

impl QueryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, query: Query) {
        self.queries.push_back(query);
    }

    pub fn dequeue_next(&mut self) -> Option<Query> {
        self.queries.pop_front()
    }

    /// Remove every pending query, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Query> + '_ {
        self.queries.drain(..)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
