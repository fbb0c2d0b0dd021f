//! K-way merge of sorted sequences.
//!
//! One heap entry per source holds that source's smallest unconsumed element. Sources are not
//! touched before the first element is requested, so merging can start on sources that are
//! still being filled over the network.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::Comparator;

struct Head<T> {
    item: T,
    source: usize,
    cmp: Comparator<T>,
}

// BinaryHeap is a max-heap; reversed so the smallest element is on top. Equal elements come
// out in source order.
impl<T> Ord for Head<T> {
    fn cmp(&self, other: &Head<T>) -> Ordering {
        (self.cmp)(&other.item, &self.item).then_with(|| other.source.cmp(&self.source))
    }
}

impl<T> PartialOrd for Head<T> {
    fn partial_cmp(&self, other: &Head<T>) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Head<T> {
    fn eq(&self, other: &Head<T>) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Head<T> {}

pub struct KWayMerge<T, I> {
    sources: Vec<I>,
    heap: BinaryHeap<Head<T>>,
    cmp: Comparator<T>,
    primed: bool,
}

impl<T, I: Iterator<Item = T>> KWayMerge<T, I> {
    /// Every source must be sorted according to `cmp`.
    pub fn new(sources: Vec<I>, cmp: Comparator<T>) -> KWayMerge<T, I> {
        KWayMerge {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources: sources,
            cmp: cmp,
            primed: false,
        }
    }

    pub fn ways(&self) -> usize {
        self.sources.len()
    }

    fn prime(&mut self) {
        for (i, src) in self.sources.iter_mut().enumerate() {
            if let Some(e) = src.next() {
                self.heap.push(Head {
                    item: e,
                    source: i,
                    cmp: self.cmp.clone(),
                });
            }
        }
        self.primed = true;
    }
}

impl<T, I: Iterator<Item = T>> Iterator for KWayMerge<T, I> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if !self.primed {
            self.prime();
        }
        let Head { item, source, cmp } = self.heap.pop()?;
        if let Some(next) = self.sources[source].next() {
            self.heap.push(Head {
                item: next,
                source: source,
                cmp: cmp,
            });
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::compare::natural;
    use std::sync::Arc;
    use std::vec;

    fn get_collection_1() -> vec::IntoIter<i32> {
        vec![1, 4, 5, 5, 6, 9, 11, 15, 15, 17, 18, 20].into_iter()
    }
    fn get_collection_2() -> vec::IntoIter<i32> {
        vec![2, 2, 2, 3, 4, 5, 7, 8, 9, 10, 45, 46, 47].into_iter()
    }
    fn get_collection_3() -> vec::IntoIter<i32> {
        vec![5, 8, 9, 10, 22, 25, 30, 37, 41, 46, 71].into_iter()
    }
    fn get_collection_4() -> vec::IntoIter<i32> {
        vec![111, 112, 113, 155].into_iter()
    }
    fn get_collection_5() -> vec::IntoIter<i32> {
        vec![13, 45, 98, 105, 145].into_iter()
    }
    fn get_collection_6() -> vec::IntoIter<i32> {
        vec![14, 67, 99, 111, 222, 566, 643].into_iter()
    }

    #[test]
    fn test_merge_iterator() {
        let sources = vec![get_collection_1(),
                           get_collection_2(),
                           get_collection_3(),
                           get_collection_4(),
                           get_collection_5(),
                           get_collection_6()];
        let total: usize = sources.iter().map(|s| s.len()).sum();
        let it = KWayMerge::new(sources, natural());
        assert_eq!(it.ways(), 6);

        let mut cmp = 0;
        let mut cnt = 0;
        for i in it {
            assert!(i >= cmp);
            cmp = i;
            cnt += 1;
        }
        assert_eq!(cnt, total);
    }

    #[test]
    fn test_custom_order_and_empty_sources() {
        let desc: Comparator<i32> = Arc::new(|a: &i32, b: &i32| b.cmp(a));
        let sources = vec![vec![9, 3].into_iter(), vec![].into_iter(), vec![8, 7, 1].into_iter()];
        let merged: Vec<i32> = KWayMerge::new(sources, desc).collect();
        assert_eq!(merged, vec![9, 8, 7, 3, 1]);

        let none: Vec<vec::IntoIter<i32>> = Vec::new();
        assert_eq!(KWayMerge::new(none, natural()).count(), 0);
    }

    #[test]
    fn test_lazy_priming() {
        let mut touched = false;
        {
            let src = std::iter::once(1).inspect(|_| touched = true);
            let _m = KWayMerge::new(vec![src], natural());
        }
        assert!(!touched);
    }
}
