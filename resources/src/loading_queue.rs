//! Priority-ordered list of resources waiting for their data to be loaded.
//!
//! The queue is never fully sorted. Once per frame a bounded window of
//! entries is rescored, then one backward bubble pass moves every entry at
//! most one slot closer to its place. The most urgent entry reaches the front
//! within one pass, and a queue of `n` entries with fixed scores is sorted
//! after `n` passes. Loaders always take the front entry.

use std::collections::VecDeque;

use redlilium_core::profiling::profile_scope;

use crate::handle::ResourceId;

/// One queued resource. Does not keep the resource alive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadingQueueEntry {
    pub resource: ResourceId,
    /// Lower loads first.
    pub priority: f32,
}

#[derive(Debug, Default)]
pub struct LoadingQueue {
    entries: VecDeque<LoadingQueueEntry>,
    /// Next entry to rescore.
    cursor: usize,
}

impl LoadingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push_back(&mut self, resource: ResourceId, priority: f32) {
        self.entries.push_back(LoadingQueueEntry { resource, priority });
    }

    pub fn push_front(&mut self, resource: ResourceId, priority: f32) {
        self.entries.push_front(LoadingQueueEntry { resource, priority });
    }

    pub fn pop_front(&mut self) -> Option<LoadingQueueEntry> {
        self.entries.pop_front()
    }

    pub fn contains(&self, resource: ResourceId) -> bool {
        self.position(resource).is_some()
    }

    pub fn position(&self, resource: ResourceId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.resource == resource)
    }

    /// Removes the entry of `resource`. Returns `false` if it is not queued.
    pub fn remove(&mut self, resource: ResourceId) -> bool {
        match self.position(resource) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadingQueueEntry> {
        self.entries.iter()
    }

    /// Rescores up to `window` entries starting at the rolling cursor, then
    /// runs one [`LoadingQueue::reverse_bubble_sort_step`].
    ///
    /// `score` returns `None` for resources that no longer exist; their
    /// entries keep the old score. The cursor wraps to the front once it
    /// reached the end of the queue.
    pub fn update_priorities(
        &mut self,
        window: usize,
        mut score: impl FnMut(ResourceId) -> Option<f32>,
    ) {
        if self.entries.is_empty() {
            return;
        }
        profile_scope!("update_loading_deadlines");

        let count = self.entries.len();
        self.cursor = self.cursor.min(count);
        let mut update = window.min(count - self.cursor);
        if update == 0 {
            self.cursor = 0;
            update = window.min(count);
        }

        for entry in self.entries.range_mut(self.cursor..self.cursor + update) {
            if let Some(priority) = score(entry.resource) {
                entry.priority = priority;
            }
        }
        self.cursor += update;

        self.reverse_bubble_sort_step();
    }

    /// One backward bubble pass: walks from the back to the front and swaps
    /// every adjacent pair that is out of order.
    pub fn reverse_bubble_sort_step(&mut self) {
        for i in (1..self.entries.len()).rev() {
            if self.entries[i - 1].priority > self.entries[i].priority {
                self.entries.swap(i - 1, i);
            }
        }
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redlilium_core::ArenaHandle;

    fn ids(count: usize) -> Vec<ResourceId> {
        let mut arena = redlilium_core::Arena::new();
        (0..count)
            .map(|i| ResourceId::from_handle(arena.insert(i)))
            .collect()
    }

    fn priorities(queue: &LoadingQueue) -> Vec<f32> {
        queue.iter().map(|entry| entry.priority).collect()
    }

    fn is_sorted(values: &[f32]) -> bool {
        values.windows(2).all(|pair| pair[0] <= pair[1])
    }

    #[test]
    fn single_pass_moves_minimum_to_front() {
        let resources = ids(5);
        let mut queue = LoadingQueue::new();
        for (resource, priority) in resources.iter().zip([4.0, 3.0, 5.0, 1.0, 2.0]) {
            queue.push_back(*resource, priority);
        }

        queue.reverse_bubble_sort_step();
        assert_eq!(priorities(&queue)[0], 1.0);
        assert_eq!(queue.pop_front().map(|e| e.resource), Some(resources[3]));
    }

    #[test]
    fn converges_after_n_passes_and_stays_sorted() {
        let count = 40;
        let resources = ids(count);
        let mut queue = LoadingQueue::new();
        // Deterministic shuffle of 0..count.
        for (i, resource) in resources.iter().enumerate() {
            queue.push_back(*resource, ((i * 17 + 5) % count) as f32);
        }
        assert!(!is_sorted(&priorities(&queue)));

        for _ in 0..count {
            queue.reverse_bubble_sort_step();
        }
        let sorted = priorities(&queue);
        assert!(is_sorted(&sorted));

        queue.reverse_bubble_sort_step();
        assert_eq!(priorities(&queue), sorted);
    }

    #[test]
    fn update_window_rolls_and_wraps() {
        let resources = ids(7);
        let mut queue = LoadingQueue::new();
        for resource in &resources {
            queue.push_back(*resource, 100.0);
        }

        let mut scored = Vec::new();
        queue.update_priorities(3, |id| {
            scored.push(id);
            Some(1.0)
        });
        assert_eq!(scored.len(), 3);
        assert_eq!(queue.cursor(), 3);

        queue.update_priorities(3, |_| Some(1.0));
        assert_eq!(queue.cursor(), 6);

        queue.update_priorities(3, |_| Some(1.0));
        assert_eq!(queue.cursor(), 7);

        // At the end: wraps to the front.
        queue.update_priorities(3, |_| Some(1.0));
        assert_eq!(queue.cursor(), 3);
    }

    #[test]
    fn cursor_clamps_after_queue_shrinks() {
        let resources = ids(6);
        let mut queue = LoadingQueue::new();
        for resource in &resources {
            queue.push_back(*resource, 1.0);
        }
        queue.update_priorities(5, |_| None);
        assert_eq!(queue.cursor(), 5);

        for _ in 0..4 {
            queue.pop_front();
        }
        queue.update_priorities(5, |_| None);
        assert_eq!(queue.cursor(), 2);
    }

    #[test]
    fn stale_resources_keep_their_score() {
        let resources = ids(2);
        let mut queue = LoadingQueue::new();
        queue.push_back(resources[0], 7.0);
        queue.push_back(resources[1], 3.0);

        queue.update_priorities(50, |id| (id == resources[1]).then_some(9.0));
        assert_eq!(priorities(&queue), vec![7.0, 9.0]);
    }

    #[test]
    fn remove_and_contains() {
        let resources = ids(3);
        let mut queue = LoadingQueue::new();
        for resource in &resources {
            queue.push_back(*resource, 1.0);
        }
        assert!(queue.remove(resources[1]));
        assert!(!queue.contains(resources[1]));
        assert!(!queue.remove(resources[1]));
        assert!(!queue.remove(ResourceId::from_handle(ArenaHandle::INVALID)));
        assert_eq!(queue.len(), 2);
    }
}
