//! An ordered byte-key index.
//!
//! Classic skip list with a fixed tower height of 18 and per-node levels
//! drawn from a geometric distribution with p = 1/e, precomputed into a
//! probability table. Nodes live in an arena (`Vec`) and link to each other
//! by index, with a free list recycling removed slots; this keeps the
//! pointer-chasing algorithm in safe Rust.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MAX_LEVEL: usize = 18;
const PROBABILITY: f64 = 1.0 / std::f64::consts::E;

struct Node<V> {
    key: Vec<u8>,
    value: V,
    /// Forward links, one per level this node participates in.
    next: Vec<Option<usize>>,
}

/// A link preceding some position, at any level: either the list head or a
/// node in the arena.
#[derive(Debug, Clone, Copy)]
enum Prev {
    Head,
    Node(usize),
}

pub struct SkipList<V> {
    head: [Option<usize>; MAX_LEVEL],
    nodes: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    len: usize,
    prob_table: [f64; MAX_LEVEL],
    rng: StdRng,
}

impl<V> Default for SkipList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SkipList<V> {
    pub fn new() -> SkipList<V> {
        let mut prob_table = [0.0; MAX_LEVEL];
        for (i, p) in prob_table.iter_mut().enumerate() {
            *p = PROBABILITY.powi(i as i32);
        }
        SkipList {
            head: [None; MAX_LEVEL],
            nodes: Vec::new(),
            free: Vec::new(),
            len: 0,
            prob_table,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, id: usize) -> &Node<V> {
        self.nodes[id].as_ref().expect("skiplist: dangling node id")
    }

    fn node_mut(&mut self, id: usize) -> &mut Node<V> {
        self.nodes[id].as_mut().expect("skiplist: dangling node id")
    }

    fn next_at(&self, prev: Prev, level: usize) -> Option<usize> {
        match prev {
            Prev::Head => self.head[level],
            Prev::Node(id) => self.node(id).next[level],
        }
    }

    fn set_next(&mut self, prev: Prev, level: usize, target: Option<usize>) {
        match prev {
            Prev::Head => self.head[level] = target,
            Prev::Node(id) => self.node_mut(id).next[level] = target,
        }
    }

    fn random_level(&mut self) -> usize {
        let r: f64 = self.rng.gen();
        let mut level = 1;
        while level < MAX_LEVEL && r < self.prob_table[level] {
            level += 1;
        }
        level
    }

    /// The predecessor link of `key` at every level.
    fn prev_links(&self, key: &[u8]) -> [Prev; MAX_LEVEL] {
        let mut prevs = [Prev::Head; MAX_LEVEL];
        let mut prev = Prev::Head;
        for level in (0..MAX_LEVEL).rev() {
            while let Some(id) = self.next_at(prev, level) {
                if self.node(id).key.as_slice() < key {
                    prev = Prev::Node(id);
                } else {
                    break;
                }
            }
            prevs[level] = prev;
        }
        prevs
    }

    fn alloc(&mut self, node: Node<V>) -> usize {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    /// Insert or replace. Returns the previous value when the key existed.
    pub fn put(&mut self, key: Vec<u8>, value: V) -> Option<V> {
        let prevs = self.prev_links(&key);
        if let Some(id) = self.next_at(prevs[0], 0) {
            if self.node(id).key == key {
                return Some(std::mem::replace(&mut self.node_mut(id).value, value));
            }
        }

        let level = self.random_level();
        let mut next = vec![None; level];
        for (l, slot) in next.iter_mut().enumerate() {
            *slot = self.next_at(prevs[l], l);
        }
        let id = self.alloc(Node { key, value, next });
        for (l, &prev) in prevs.iter().enumerate().take(level) {
            self.set_next(prev, l, Some(id));
        }
        self.len += 1;
        None
    }

    /// Remove the key, returning its value.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let prevs = self.prev_links(key);
        let id = self.next_at(prevs[0], 0)?;
        if self.node(id).key != key {
            return None;
        }
        for level in 0..self.node(id).next.len() {
            let next = self.node(id).next[level];
            self.set_next(prevs[level], level, next);
        }
        let node = self.nodes[id].take().expect("skiplist: dangling node id");
        self.free.push(id);
        self.len -= 1;
        Some(node.value)
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        let id = self.seek_id(key)?;
        if self.node(id).key == key {
            Some(id)
        } else {
            None
        }
    }

    /// The first node whose key is >= the given key, if any.
    fn seek_id(&self, key: &[u8]) -> Option<usize> {
        let mut prev = Prev::Head;
        let mut candidate = None;
        for level in (0..MAX_LEVEL).rev() {
            while let Some(id) = self.next_at(prev, level) {
                if self.node(id).key.as_slice() < key {
                    prev = Prev::Node(id);
                } else {
                    candidate = Some(id);
                    break;
                }
            }
        }
        candidate
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        self.find(key).map(|id| &self.node(id).value)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        self.find(key).map(|id| &mut self.node_mut(id).value)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.find(key).is_some()
    }

    /// The smallest key and its value.
    pub fn first(&self) -> Option<(&[u8], &V)> {
        self.head[0]
            .map(|id| (self.node(id).key.as_slice(), &self.node(id).value))
    }

    /// In-order iteration over the whole list.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            list: self,
            cur: self.head[0],
        }
    }

    /// In-order iteration starting at the first key >= `start`.
    pub fn iter_from(&self, start: &[u8]) -> Iter<'_, V> {
        Iter {
            list: self,
            cur: self.seek_id(start),
        }
    }
}

pub struct Iter<'a, V> {
    list: &'a SkipList<V>,
    cur: Option<usize>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a [u8], &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let node = self.list.node(id);
        self.cur = node.next[0];
        Some((node.key.as_slice(), &node.value))
    }
}
