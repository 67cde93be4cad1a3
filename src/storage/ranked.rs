//! Sorted-Set Entries
//!
//! A `RankedSet` pairs a member -> score map with an order-statistics skip
//! list, giving O(log n) upsert, rank lookup and rank-range seeks.
//!
//! ## Ordering
//!
//! The skip list is kept in leaderboard order: highest score first, and
//! members with equal scores ordered by their bytes ascending. The order is
//! total, so repeated range queries are stable. Ascending order is the exact
//! mirror of it:
//!
//! ```text
//! descending: alice(90) carol(90) bob(75)     rank 0..=2
//! ascending:  bob(75)   carol(90) alice(90)   rank 0..=2
//! ```
//!
//! ## Layout
//!
//! Nodes live in an arena (`Vec<Node>`) and link to each other by index.
//! Every forward link records its span: how many level-0 steps it skips.
//! Summing spans along a search path yields a node's rank.

use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::HashMap;

const MAX_LEVEL: usize = 32;

/// Arena slot of the sentinel head node.
const HEAD: usize = 0;

/// Direction in which ranks are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankOrder {
    /// Rank 0 is the highest score.
    #[default]
    Descending,
    /// Rank 0 is the lowest score.
    Ascending,
}

/// Compares two (score, member) pairs in leaderboard order.
#[inline]
fn compare(a_score: f64, a_member: &[u8], b_score: f64, b_member: &[u8]) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| a_member.cmp(b_member))
}

/// Converts a Redis-style inclusive index range (negative = from the end)
/// into clamped positions, or `None` if the range selects nothing.
fn clamp_range(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }

    let mut start = if start < 0 { len + start } else { start };
    let mut end = if end < 0 { len + end } else { end };

    if start < 0 {
        start = 0;
    }
    if end >= len {
        end = len - 1;
    }
    if start > end || start >= len {
        return None;
    }

    Some((start as usize, end as usize))
}

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    forward: Option<usize>,
    span: usize,
}

#[derive(Debug)]
struct Node {
    member: Bytes,
    score: f64,
    backward: Option<usize>,
    links: Vec<Link>,
}

#[derive(Debug)]
struct SkipList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    level: usize,
    len: usize,
    tail: Option<usize>,
}

impl SkipList {
    fn new() -> Self {
        let head = Node {
            member: Bytes::new(),
            score: 0.0,
            backward: None,
            links: vec![Link::default(); MAX_LEVEL],
        };
        Self {
            nodes: vec![head],
            free: Vec::new(),
            level: 1,
            len: 0,
            tail: None,
        }
    }

    fn random_level() -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && fastrand::u32(..) < u32::MAX / 4 {
            level += 1;
        }
        level
    }

    #[inline]
    fn cmp_node(&self, index: usize, score: f64, member: &[u8]) -> Ordering {
        let node = &self.nodes[index];
        compare(node.score, &node.member, score, member)
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = node;
                index
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, index: usize) {
        let node = &mut self.nodes[index];
        node.member = Bytes::new();
        node.links = Vec::new();
        node.backward = None;
        self.free.push(index);
    }

    /// Inserts a pair that is not already present.
    fn insert(&mut self, score: f64, member: Bytes) {
        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];
        let mut x = HEAD;

        for i in (0..self.level).rev() {
            rank[i] = if i + 1 == self.level { 0 } else { rank[i + 1] };
            while let Some(next) = self.nodes[x].links[i].forward {
                if self.cmp_node(next, score, &member) == Ordering::Less {
                    rank[i] += self.nodes[x].links[i].span;
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let level = Self::random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = HEAD;
                self.nodes[HEAD].links[i] = Link {
                    forward: None,
                    span: self.len,
                };
            }
            self.level = level;
        }

        let node = self.alloc(Node {
            member,
            score,
            backward: None,
            links: vec![Link::default(); level],
        });

        for i in 0..level {
            let prev = update[i];
            let prev_link = self.nodes[prev].links[i];
            let offset = rank[0] - rank[i];
            self.nodes[node].links[i] = Link {
                forward: prev_link.forward,
                span: prev_link.span - offset,
            };
            self.nodes[prev].links[i] = Link {
                forward: Some(node),
                span: offset + 1,
            };
        }
        for i in level..self.level {
            self.nodes[update[i]].links[i].span += 1;
        }

        self.nodes[node].backward = if update[0] == HEAD {
            None
        } else {
            Some(update[0])
        };
        match self.nodes[node].links[0].forward {
            Some(next) => self.nodes[next].backward = Some(node),
            None => self.tail = Some(node),
        }
        self.len += 1;
    }

    /// Removes the exact pair. Returns `false` if it was not present.
    fn remove(&mut self, score: f64, member: &[u8]) -> bool {
        let mut update = [HEAD; MAX_LEVEL];
        let mut x = HEAD;

        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].links[i].forward {
                if self.cmp_node(next, score, member) == Ordering::Less {
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let target = match self.nodes[x].links[0].forward {
            Some(next) if self.cmp_node(next, score, member) == Ordering::Equal => next,
            _ => return false,
        };

        for i in 0..self.level {
            let prev = update[i];
            if self.nodes[prev].links[i].forward == Some(target) {
                let removed = self.nodes[target].links[i];
                let link = &mut self.nodes[prev].links[i];
                link.span = link.span + removed.span - 1;
                link.forward = removed.forward;
            } else {
                self.nodes[prev].links[i].span -= 1;
            }
        }

        let backward = self.nodes[target].backward;
        match self.nodes[target].links[0].forward {
            Some(next) => self.nodes[next].backward = backward,
            None => self.tail = backward,
        }

        while self.level > 1 && self.nodes[HEAD].links[self.level - 1].forward.is_none() {
            self.level -= 1;
        }

        self.release(target);
        self.len -= 1;
        true
    }

    /// 0-based rank of the pair in leaderboard order.
    fn rank(&self, score: f64, member: &[u8]) -> Option<usize> {
        let mut traversed = 0;
        let mut x = HEAD;

        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].links[i].forward {
                if self.cmp_node(next, score, member) != Ordering::Greater {
                    traversed += self.nodes[x].links[i].span;
                    x = next;
                } else {
                    break;
                }
            }
            if x != HEAD && self.cmp_node(x, score, member) == Ordering::Equal {
                return Some(traversed - 1);
            }
        }

        None
    }

    /// Arena index of the node at the 0-based rank.
    fn node_at(&self, index: usize) -> Option<usize> {
        if index >= self.len {
            return None;
        }
        if index + 1 == self.len {
            return self.tail;
        }

        let target = index + 1;
        let mut traversed = 0;
        let mut x = HEAD;

        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].links[i].forward {
                let span = self.nodes[x].links[i].span;
                if traversed + span <= target {
                    traversed += span;
                    x = next;
                } else {
                    break;
                }
            }
            if traversed == target {
                return Some(x);
            }
        }

        None
    }
}

/// A sorted-set value: unique members, each with a score.
#[derive(Debug)]
pub struct RankedSet {
    scores: HashMap<Bytes, f64>,
    list: SkipList,
}

impl Default for RankedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RankedSet {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            list: SkipList::new(),
        }
    }

    /// Inserts `member` or moves it to `score`.
    ///
    /// Returns `true` if the member was not present before. Membership never
    /// duplicates: an existing member is repositioned in place.
    pub fn upsert(&mut self, member: Bytes, score: f64) -> bool {
        match self.scores.get(&member).copied() {
            Some(old) if old.total_cmp(&score) == Ordering::Equal => false,
            Some(old) => {
                self.list.remove(old, &member);
                self.list.insert(score, member.clone());
                self.scores.insert(member, score);
                false
            }
            None => {
                self.list.insert(score, member.clone());
                self.scores.insert(member, score);
                true
            }
        }
    }

    /// Removes `member`. Returns `true` if it was present.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => self.list.remove(score, member),
            None => false,
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// 0-based rank of `member` in the requested order.
    pub fn rank(&self, member: &[u8], order: RankOrder) -> Option<usize> {
        let score = self.score(member)?;
        let rank = self.list.rank(score, member)?;
        Some(match order {
            RankOrder::Descending => rank,
            RankOrder::Ascending => self.list.len - 1 - rank,
        })
    }

    /// Members between ranks `start` and `end` inclusive.
    ///
    /// Negative indices count from the end; out-of-range bounds clamp.
    pub fn range(&self, start: i64, end: i64, order: RankOrder) -> Vec<(Bytes, f64)> {
        let Some((start, end)) = clamp_range(start, end, self.list.len) else {
            return Vec::new();
        };
        let count = end - start + 1;

        let first = match order {
            RankOrder::Descending => start,
            RankOrder::Ascending => self.list.len - 1 - start,
        };

        let mut out = Vec::with_capacity(count);
        let mut cursor = self.list.node_at(first);
        while let Some(index) = cursor {
            if out.len() == count {
                break;
            }
            let node = &self.list.nodes[index];
            out.push((node.member.clone(), node.score));
            cursor = match order {
                RankOrder::Descending => node.links[0].forward,
                RankOrder::Ascending => node.backward,
            };
        }
        out
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
