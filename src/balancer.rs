//! Load balancer (§4.D): selects an index in `0..capacity` for the
//! TUNNEL ingress's fixed destination set.

use std::collections::{BTreeMap, HashMap};

use crate::model::BalanceType;

pub enum Balancer {
    Random { capacity: usize },
    RoundRobin { capacity: usize, current: usize },
    LeastConn(LeastConn),
}

impl Balancer {
    pub fn new(balance: BalanceType, capacity: usize) -> Self {
        match balance {
            BalanceType::Random => Self::Random { capacity },
            BalanceType::RoundRobin => Self::RoundRobin {
                capacity,
                current: 0,
            },
            BalanceType::LeastConn => Self::LeastConn(LeastConn::new(capacity)),
        }
    }

    pub fn select(&mut self) -> usize {
        match self {
            Self::Random { capacity } => fastrand::usize(0..*capacity),
            Self::RoundRobin { capacity, current } => {
                let i = *current;
                *current = (*current + 1) % *capacity;
                i
            }
            Self::LeastConn(lc) => lc.select(),
        }
    }

    pub fn release(&mut self, index: usize) {
        if let Self::LeastConn(lc) = self {
            lc.release(index);
        }
    }
}

/// Maintains `conn_count -> set<index>` (ascending) plus the reverse map
/// `index -> its current bucket`, so `select`/`release` are O(log n).
pub struct LeastConn {
    buckets: BTreeMap<usize, Vec<usize>>,
    bucket_of: HashMap<usize, usize>,
}

impl LeastConn {
    fn new(capacity: usize) -> Self {
        let mut buckets = BTreeMap::new();
        buckets.insert(0, (0..capacity).collect());
        let bucket_of = (0..capacity).map(|i| (i, 0)).collect();
        Self { buckets, bucket_of }
    }

    fn select(&mut self) -> usize {
        let (&count, indices) = self
            .buckets
            .iter_mut()
            .next()
            .expect("every index lives in exactly one bucket");
        let index = *indices.iter().min().expect("bucket non-empty by invariant");
        indices.retain(|&i| i != index);
        if indices.is_empty() {
            self.buckets.remove(&count);
        }

        self.buckets.entry(count + 1).or_default().push(index);
        self.bucket_of.insert(index, count + 1);
        index
    }

    fn release(&mut self, index: usize) {
        let Some(&count) = self.bucket_of.get(&index) else {
            return;
        };
        if count == 0 {
            // releasing an index already at zero connections would
            // underflow the bucket key; ignore rather than panic.
            return;
        }

        if let Some(indices) = self.buckets.get_mut(&count) {
            indices.retain(|&i| i != index);
            if indices.is_empty() {
                self.buckets.remove(&count);
            }
        }

        self.buckets.entry(count - 1).or_default().push(index);
        self.bucket_of.insert(index, count - 1);
    }

    #[cfg(test)]
    fn total_connections(&self) -> usize {
        self.buckets
            .iter()
            .map(|(&count, indices)| count * indices.len())
            .sum()
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles() {
        let mut b = Balancer::new(BalanceType::RoundRobin, 2);
        let picks: Vec<_> = (0..5).map(|_| b.select()).collect();
        assert_eq!(picks, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn least_conn_prefers_idle_index() {
        let mut lc = LeastConn::new(3);
        let a = lc.select();
        let b = lc.select();
        assert_ne!(a, b);
        lc.release(a);
        // a is back to 0 connections, so it (or another 0-bucket index)
        // is selected again before anything in a higher bucket.
        let c = lc.select();
        assert_eq!(lc.bucket_of[&c], 1);
    }

    #[test]
    fn capacity_and_weighted_sum_invariants_hold() {
        let mut lc = LeastConn::new(5);
        assert_eq!(lc.capacity(), 5);

        let mut selected = Vec::new();
        for _ in 0..7 {
            selected.push(lc.select());
        }
        assert_eq!(lc.capacity(), 5);
        assert_eq!(lc.total_connections(), 7);

        let released = selected.pop().unwrap();
        let bucket_before = lc.bucket_of[&released];
        lc.release(released);
        assert_eq!(lc.bucket_of[&released], bucket_before - 1);
        assert_eq!(lc.capacity(), 5);
        assert_eq!(lc.total_connections(), 6);
    }
}
