//! Bounded set of retired match addresses
//!
//! Once a match concludes and is evicted its address is retired, so a late
//! or re-delivered discovery notification cannot bring it back. The set is
//! bounded; when full, the oldest retired address is forgotten first.
//! Discovery re-reads the ledger before tracking, and a terminal read keeps
//! a forgotten address out.

use common::MatchAddress;
use std::collections::{HashSet, VecDeque};

/// Insertion-ordered set with a fixed capacity
#[derive(Debug)]
pub struct RetiredSet {
    members: HashSet<MatchAddress>,
    order: VecDeque<MatchAddress>,
    capacity: usize,
}

impl RetiredSet {
    /// Create a set holding at most `capacity` addresses (minimum one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            members: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Retire an address; returns `false` if it was already retired
    pub fn retire(&mut self, address: MatchAddress) -> bool {
        if self.members.contains(&address) {
            return false;
        }

        if self.members.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }

        self.members.insert(address.clone());
        self.order.push_back(address);
        true
    }

    pub fn contains(&self, address: &MatchAddress) -> bool {
        self.members.contains(address)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u32) -> MatchAddress {
        MatchAddress::parse(format!("0x{n:04x}")).unwrap()
    }

    #[test]
    fn test_retire_once() {
        let mut set = RetiredSet::new(10);
        assert!(set.retire(addr(1)));
        assert!(!set.retire(addr(1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_oldest_forgotten_first() {
        let mut set = RetiredSet::new(3);
        for n in 1..=4 {
            set.retire(addr(n));
        }
        assert_eq!(set.len(), 3);
        assert!(!set.contains(&addr(1)));
        assert!(set.contains(&addr(2)));
        assert!(set.contains(&addr(4)));
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let mut set = RetiredSet::new(0);
        set.retire(addr(1));
        assert!(set.contains(&addr(1)));
    }
}
