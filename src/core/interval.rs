//! Augmented AVL tree over half-open intervals.
//!
//! Nodes are ordered by `(start, seq)`, where `seq` is a caller-assigned
//! tie-breaker, and each node records the maximum end of its subtree.
//! Overlap queries prune every subtree whose maximum end does not reach the
//! query start, giving O(log n + k) in the common case; inserts and removals
//! are O(log n).

use std::cmp::Ordering;

/// Tree key: interval start plus a unique tie-breaker.
pub type Key = (u64, u64);

#[derive(Debug, Clone)]
struct Node<V> {
    key: Key,
    end: u64,
    max_end: u64,
    height: u8,
    value: V,
    left: Link<V>,
    right: Link<V>,
}

type Link<V> = Option<Box<Node<V>>>;

/// Interval index storing one value per interval.
#[derive(Debug, Clone)]
pub struct IntervalTree<V> {
    root: Link<V>,
    len: usize,
}

impl<V> Default for IntervalTree<V> {
    fn default() -> Self {
        Self { root: None, len: 0 }
    }
}

impl<V> IntervalTree<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert an interval. The key must not already be present.
    pub fn insert(&mut self, key: Key, end: u64, value: V) {
        debug_assert!(end > key.0, "empty interval");
        self.root = Some(insert(self.root.take(), key, end, value));
        self.len += 1;
    }

    /// Remove by key, returning the stored value.
    pub fn remove(&mut self, key: Key) -> Option<V> {
        let (root, removed) = remove(self.root.take(), key);
        self.root = root;
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    pub fn get(&self, key: Key) -> Option<&V> {
        let mut link = self.root.as_deref();
        while let Some(node) = link {
            link = match key.cmp(&node.key) {
                Ordering::Less => node.left.as_deref(),
                Ordering::Greater => node.right.as_deref(),
                Ordering::Equal => return Some(&node.value),
            };
        }
        None
    }

    /// Mutable access to a value. The interval itself cannot change through this.
    pub fn get_mut(&mut self, key: Key) -> Option<&mut V> {
        let mut link = self.root.as_deref_mut();
        while let Some(node) = link {
            link = match key.cmp(&node.key) {
                Ordering::Less => node.left.as_deref_mut(),
                Ordering::Greater => node.right.as_deref_mut(),
                Ordering::Equal => return Some(&mut node.value),
            };
        }
        None
    }

    /// Intervals `[s, e)` with `s < end && e > start`, in key order.
    pub fn overlapping(&self, start: u64, end: u64) -> Overlaps<'_, V> {
        let mut iter = Overlaps {
            stack: Vec::new(),
            start,
            end,
        };
        if start < end {
            iter.push_left(self.root.as_deref());
        }
        iter
    }

    /// All intervals in key order.
    pub fn iter(&self) -> Overlaps<'_, V> {
        self.overlapping(0, u64::MAX)
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        fn walk<V>(link: &Link<V>, lo: Option<Key>, hi: Option<Key>) -> (u8, u64, usize) {
            let Some(node) = link else {
                return (0, 0, 0);
            };
            if let Some(lo) = lo {
                assert!(node.key > lo);
            }
            if let Some(hi) = hi {
                assert!(node.key < hi);
            }
            let (lh, lm, lc) = walk(&node.left, lo, Some(node.key));
            let (rh, rm, rc) = walk(&node.right, Some(node.key), hi);
            assert!((lh as i16 - rh as i16).abs() <= 1, "unbalanced");
            assert_eq!(node.height, 1 + lh.max(rh));
            assert_eq!(node.max_end, node.end.max(lm).max(rm));
            (node.height, node.max_end, lc + rc + 1)
        }
        let (_, _, count) = walk(&self.root, None, None);
        assert_eq!(count, self.len);
    }
}

/// Lazy in-order overlap query.
pub struct Overlaps<'a, V> {
    stack: Vec<&'a Node<V>>,
    start: u64,
    end: u64,
}

impl<'a, V> Overlaps<'a, V> {
    fn push_left(&mut self, mut link: Option<&'a Node<V>>) {
        while let Some(node) = link {
            if node.max_end <= self.start {
                break;
            }
            self.stack.push(node);
            link = node.left.as_deref();
        }
    }
}

impl<'a, V> Iterator for Overlaps<'a, V> {
    type Item = (Key, u64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.stack.pop()?;
            if node.key.0 >= self.end {
                // Everything still pending starts even later
                self.stack.clear();
                return None;
            }
            self.push_left(node.right.as_deref());
            if node.end > self.start {
                return Some((node.key, node.end, &node.value));
            }
        }
    }
}

fn height<V>(link: &Link<V>) -> u8 {
    link.as_ref().map_or(0, |n| n.height)
}

fn max_end<V>(link: &Link<V>) -> u64 {
    link.as_ref().map_or(0, |n| n.max_end)
}

fn update<V>(node: &mut Node<V>) {
    node.height = 1 + height(&node.left).max(height(&node.right));
    node.max_end = node.end.max(max_end(&node.left)).max(max_end(&node.right));
}

fn rotate_right<V>(mut node: Box<Node<V>>) -> Box<Node<V>> {
    let Some(mut pivot) = node.left.take() else {
        return node;
    };
    node.left = pivot.right.take();
    update(&mut node);
    pivot.right = Some(node);
    update(&mut pivot);
    pivot
}

fn rotate_left<V>(mut node: Box<Node<V>>) -> Box<Node<V>> {
    let Some(mut pivot) = node.right.take() else {
        return node;
    };
    node.right = pivot.left.take();
    update(&mut node);
    pivot.left = Some(node);
    update(&mut pivot);
    pivot
}

fn balance<V>(mut node: Box<Node<V>>) -> Box<Node<V>> {
    update(&mut node);
    let factor = height(&node.left) as i16 - height(&node.right) as i16;
    if factor > 1 {
        if let Some(left) = node.left.take() {
            node.left = Some(if height(&left.left) < height(&left.right) {
                rotate_left(left)
            } else {
                left
            });
        }
        return rotate_right(node);
    }
    if factor < -1 {
        if let Some(right) = node.right.take() {
            node.right = Some(if height(&right.right) < height(&right.left) {
                rotate_right(right)
            } else {
                right
            });
        }
        return rotate_left(node);
    }
    node
}

fn insert<V>(link: Link<V>, key: Key, end: u64, value: V) -> Box<Node<V>> {
    match link {
        None => Box::new(Node {
            key,
            end,
            max_end: end,
            height: 1,
            value,
            left: None,
            right: None,
        }),
        Some(mut node) => {
            if key < node.key {
                node.left = Some(insert(node.left.take(), key, end, value));
            } else {
                node.right = Some(insert(node.right.take(), key, end, value));
            }
            balance(node)
        }
    }
}

fn remove<V>(link: Link<V>, key: Key) -> (Link<V>, Option<V>) {
    let Some(mut node) = link else {
        return (None, None);
    };
    match key.cmp(&node.key) {
        Ordering::Less => {
            let (left, removed) = remove(node.left.take(), key);
            node.left = left;
            (Some(balance(node)), removed)
        }
        Ordering::Greater => {
            let (right, removed) = remove(node.right.take(), key);
            node.right = right;
            (Some(balance(node)), removed)
        }
        Ordering::Equal => {
            let Node {
                left, right, value, ..
            } = *node;
            let replacement = match (left, right) {
                (None, right) => right,
                (left, None) => left,
                (Some(left), Some(right)) => {
                    let (rest, mut successor) = remove_min(right);
                    successor.left = Some(left);
                    successor.right = rest;
                    Some(balance(successor))
                }
            };
            (replacement, Some(value))
        }
    }
}

fn remove_min<V>(mut node: Box<Node<V>>) -> (Link<V>, Box<Node<V>>) {
    match node.left.take() {
        None => {
            let rest = node.right.take();
            (rest, node)
        }
        Some(left) => {
            let (rest, min) = remove_min(left);
            node.left = rest;
            (Some(balance(node)), min)
        }
    }
}
