//! The programming surface: a lazy local sequence paired with the group that owns it.
//!
//! Operations prefixed with `local_` (and the plain element-wise ones like `map()`) only ever
//! look at this process's partition. Everything else is global: it computes a local result and
//! then runs exactly one collective over the pipeline's group, so every member of the group
//! has to call it.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;
use std::iter;
use std::sync::Arc;

use crate::cluster::{Cluster, Node};
use crate::collective::{self, hash_partition};
use crate::error::Result;
use crate::group::Group;
use crate::parameters::SortStrategy;
use crate::sort::{self, Comparator};
use crate::transport::Data;

pub type LocalSource<T> = Box<dyn Iterator<Item = T> + Send>;

pub struct Pipeline<T> {
    cluster: Arc<Cluster>,
    group: Group,
    source: LocalSource<T>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// A pipeline over the whole cluster.
    pub fn new<I>(cluster: &Arc<Cluster>, local: I) -> Pipeline<T>
        where I: IntoIterator<Item = T>,
              I::IntoIter: Send + 'static
    {
        Pipeline::on_group(cluster, cluster.group(), local)
    }

    pub fn on_group<I>(cluster: &Arc<Cluster>, group: Group, local: I) -> Pipeline<T>
        where I: IntoIterator<Item = T>,
              I::IntoIter: Send + 'static
    {
        Pipeline {
            cluster: cluster.clone(),
            group: group,
            source: Box::new(local.into_iter()),
        }
    }

    pub fn empty(cluster: &Arc<Cluster>) -> Pipeline<T> {
        Pipeline::new(cluster, iter::empty())
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    /// Moves the pipeline to another group. Later global operations run over `group`, which
    /// this process must be a member of.
    pub fn with_group(self, group: Group) -> Pipeline<T> {
        Pipeline { group: group, ..self }
    }

    pub fn filter<P>(self, predicate: P) -> Pipeline<T>
        where P: FnMut(&T) -> bool + Send + 'static
    {
        let src = self.source;
        Pipeline { source: Box::new(src.filter(predicate)), ..self }
    }

    pub fn map<U, F>(self, f: F) -> Pipeline<U>
        where U: Send + 'static,
              F: FnMut(T) -> U + Send + 'static
    {
        let src = self.source;
        Pipeline {
            cluster: self.cluster,
            group: self.group,
            source: Box::new(src.map(f)),
        }
    }

    pub fn flat_map<U, It, F>(self, f: F) -> Pipeline<U>
        where U: Send + 'static,
              It: IntoIterator<Item = U>,
              It::IntoIter: Send + 'static,
              F: FnMut(T) -> It + Send + 'static
    {
        let mut f = f;
        let src = self.source;
        Pipeline {
            cluster: self.cluster,
            group: self.group,
            source: Box::new(src.flat_map(move |e| f(e).into_iter())),
        }
    }

    pub fn inspect<F>(self, f: F) -> Pipeline<T>
        where F: FnMut(&T) + Send + 'static
    {
        let src = self.source;
        Pipeline { source: Box::new(src.inspect(f)), ..self }
    }

    pub fn local_distinct(self) -> Pipeline<T>
        where T: Eq + Hash + Clone
    {
        let mut seen = HashSet::new();
        self.filter(move |e| seen.insert(e.clone()))
    }

    pub fn local_limit(self, n: usize) -> Pipeline<T> {
        let src = self.source;
        Pipeline { source: Box::new(src.take(n)), ..self }
    }

    pub fn local_skip(self, n: usize) -> Pipeline<T> {
        let src = self.source;
        Pipeline { source: Box::new(src.skip(n)), ..self }
    }

    /// Sorts this process's partition. Nothing is read before the first element is pulled.
    pub fn local_sorted(self) -> Pipeline<T>
        where T: Ord
    {
        self.local_sorted_by(|a: &T, b: &T| a.cmp(b))
    }

    pub fn local_sorted_by<C>(self, cmp: C) -> Pipeline<T>
        where C: Fn(&T, &T) -> Ordering + Send + 'static
    {
        let mut pending = Some(self.source);
        let sorted = iter::once(()).flat_map(move |_| {
            let mut v: Vec<T> = pending.take().map(|s| s.collect()).unwrap_or_default();
            v.sort_by(&cmp);
            v
        });
        Pipeline {
            cluster: self.cluster,
            group: self.group,
            source: Box::new(sorted),
        }
    }

    pub fn local_count(self) -> usize {
        self.source.count()
    }

    pub fn local_reduce<F>(self, f: F) -> Option<T>
        where F: FnMut(T, T) -> T
    {
        self.source.reduce(f)
    }

    pub fn local_fold<U, F>(self, init: U, f: F) -> U
        where F: FnMut(U, T) -> U
    {
        self.source.fold(init, f)
    }

    pub fn local_collect<C: FromIterator<T>>(self) -> C {
        self.source.collect()
    }

    pub fn local_to_vec(self) -> Vec<T> {
        self.source.collect()
    }

    pub fn local_for_each<F: FnMut(T)>(self, f: F) {
        self.source.for_each(f)
    }

    pub fn local_min_by<C>(self, cmp: C) -> Option<T>
        where C: Fn(&T, &T) -> Ordering
    {
        self.source.min_by(cmp)
    }

    pub fn local_max_by<C>(self, cmp: C) -> Option<T>
        where C: Fn(&T, &T) -> Ordering
    {
        self.source.max_by(cmp)
    }

    /// Folds the local partition on the worker pool, `split_batch` elements per task.
    pub fn par_local_fold<U, Id, Acc, Comb>(self, identity: Id, acc: Acc, combiner: Comb) -> U
        where U: Send,
              Id: Fn() -> U + Sync,
              Acc: Fn(U, T) -> U + Sync,
              Comb: Fn(U, U) -> U
    {
        let mut src = self.source;
        let batch = self.cluster.params().split_batch;
        self.cluster.pool().fold(&mut src, batch, identity, acc, combiner)
    }

    /// Runs `f` for every local element on the worker pool, in no particular order.
    pub fn par_local_for_each<F>(self, f: F)
        where F: Fn(T) + Sync
    {
        self.par_local_fold(|| (), |(), e| f(e), |(), ()| ())
    }
}

impl<T: Data> Pipeline<T> {
    /// Hash-partitions the data over the pipeline's own group.
    pub fn distribute(self) -> Result<Pipeline<T>>
        where T: Hash
    {
        self.distribute_with(|e: &T| hash_partition(e))
    }

    pub fn distribute_with<P>(self, partition: P) -> Result<Pipeline<T>>
        where P: Fn(&T) -> i64 + Send + 'static
    {
        let dest = self.group.clone();
        self.distribute_to_with(&dest, partition)
    }

    pub fn distribute_to(self, dest: &Group) -> Result<Pipeline<T>>
        where T: Hash
    {
        self.distribute_to_with(dest, |e: &T| hash_partition(e))
    }

    /// Sends element `e` to `dest[|partition(e)| mod |dest|]`. Collective over the union of
    /// both groups; the result belongs to `dest`.
    pub fn distribute_to_with<P>(self, dest: &Group, partition: P) -> Result<Pipeline<T>>
        where P: Fn(&T) -> i64 + Send + 'static
    {
        let src = collective::distribute(&self.cluster, &self.group, self.source, dest, partition)?;
        Ok(Pipeline {
            cluster: self.cluster,
            group: dest.clone(),
            source: Box::new(src),
        })
    }

    /// Gathers everything on one node.
    pub fn distribute_to_node(self, node: &Arc<Node>) -> Result<Pipeline<T>> {
        let dest = Group::single(node.clone());
        self.distribute_to_with(&dest, |_| 0)
    }

    /// Every member ends up with every element of the whole dataset.
    pub fn broadcast(self) -> Result<Pipeline<T>> {
        let src = collective::broadcast(&self.cluster, &self.group, self.source)?;
        Ok(Pipeline {
            cluster: self.cluster,
            group: self.group,
            source: Box::new(src),
        })
    }

    /// Removes duplicates across the whole dataset. Equal elements meet on one node.
    pub fn distinct(self) -> Result<Pipeline<T>>
        where T: Eq + Hash + Clone
    {
        Ok(self.local_distinct().distribute()?.local_distinct())
    }

    pub fn count(self) -> Result<usize> {
        let (cluster, group) = (self.cluster.clone(), self.group.clone());
        collective::reduce(&cluster, &group, self.local_count(), |a, b| a + b)
    }

    pub fn reduce<F>(self, f: F) -> Result<Option<T>>
        where F: Fn(T, T) -> T
    {
        let (cluster, group) = (self.cluster.clone(), self.group.clone());
        let partial = self.source.reduce(&f);
        collective::reduce(&cluster, &group, partial, |a, b| match (a, b) {
            (Some(a), Some(b)) => Some(f(a, b)),
            (a, None) => a,
            (None, b) => b,
        })
    }

    /// Folds every partition from its own `identity`, then combines the partial results.
    pub fn fold<U, Acc, Comb>(self, identity: U, acc: Acc, combiner: Comb) -> Result<U>
        where U: Data,
              Acc: FnMut(U, T) -> U,
              Comb: Fn(U, U) -> U
    {
        let (cluster, group) = (self.cluster.clone(), self.group.clone());
        let partial = self.source.fold(identity, acc);
        collective::reduce(&cluster, &group, partial, combiner)
    }

    /// Collects into a mutable container per process, then merges the containers.
    pub fn combine<C, Sup, Acc, Comb>(self, supplier: Sup, acc: Acc, combiner: Comb) -> Result<C>
        where C: Data,
              Sup: FnOnce() -> C,
              Acc: Fn(&mut C, T),
              Comb: Fn(&mut C, C)
    {
        let mut container = supplier();
        for e in self.source {
            acc(&mut container, e);
        }
        collective::reduce(&self.cluster, &self.group, container, |mut a, b| {
            combiner(&mut a, b);
            a
        })
    }

    pub fn min_by<C>(self, cmp: C) -> Result<Option<T>>
        where C: Fn(&T, &T) -> Ordering
    {
        self.reduce(move |a, b| if cmp(&a, &b) == Ordering::Greater { b } else { a })
    }

    pub fn max_by<C>(self, cmp: C) -> Result<Option<T>>
        where C: Fn(&T, &T) -> Ordering
    {
        self.reduce(move |a, b| if cmp(&a, &b) == Ordering::Less { b } else { a })
    }

    pub fn min(self) -> Result<Option<T>>
        where T: Ord
    {
        self.min_by(T::cmp)
    }

    pub fn max(self) -> Result<Option<T>>
        where T: Ord
    {
        self.max_by(T::cmp)
    }

    /// The first element of the member with the lowest group index that has any.
    pub fn find_first(self) -> Result<Option<T>> {
        let (cluster, mut src) = (self.cluster.clone(), self.source);
        let index = self.group.index_of(cluster.me()).unwrap_or(usize::MAX);
        let partial = src.next().map(|e| (index, e));
        drop(src);
        let first = collective::reduce(&cluster, &self.group, partial, |a, b| match (a, b) {
            (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
            (a, None) => a,
            (None, b) => b,
        })?;
        Ok(first.map(|(_, e)| e))
    }

    /// Some element of the dataset; which one depends on message arrival order.
    pub fn find_any(self) -> Result<Option<T>> {
        let (cluster, mut src) = (self.cluster.clone(), self.source);
        let partial = src.next();
        drop(src);
        collective::reduce(&cluster, &self.group, partial, |a, b| a.or(b))
    }

    pub fn all_match<P>(self, predicate: P) -> Result<bool>
        where P: FnMut(T) -> bool
    {
        let (cluster, mut src) = (self.cluster.clone(), self.source);
        let partial = src.all(predicate);
        drop(src);
        collective::reduce(&cluster, &self.group, partial, |a, b| a && b)
    }

    pub fn any_match<P>(self, predicate: P) -> Result<bool>
        where P: FnMut(T) -> bool
    {
        let (cluster, mut src) = (self.cluster.clone(), self.source);
        let partial = src.any(predicate);
        drop(src);
        collective::reduce(&cluster, &self.group, partial, |a, b| a || b)
    }

    pub fn none_match<P>(self, predicate: P) -> Result<bool>
        where P: FnMut(T) -> bool
    {
        let mut predicate = predicate;
        self.all_match(move |e| !predicate(e))
    }

    /// Runs `f` on every member for every element of the whole dataset.
    pub fn for_each<F: FnMut(T)>(self, f: F) -> Result<()> {
        self.broadcast()?.local_for_each(f);
        Ok(())
    }

    /// The whole dataset, on every member.
    pub fn to_vec(self) -> Result<Vec<T>> {
        Ok(self.broadcast()?.local_to_vec())
    }

    /// Sorts the whole dataset: afterwards member i of the group holds a sorted range, and all
    /// of it is less or equal to what member i+1 holds.
    pub fn sorted(self) -> Result<Pipeline<T>>
        where T: Ord + Clone
    {
        self.sorted_by(|a: &T, b: &T| a.cmp(b))
    }

    pub fn sorted_by<C>(self, cmp: C) -> Result<Pipeline<T>>
        where T: Clone,
              C: Fn(&T, &T) -> Ordering + Send + Sync + 'static
    {
        let strategy = self.cluster.params().sort_strategy;
        self.sorted_with(strategy, Arc::new(cmp))
    }

    pub fn sorted_with(self, strategy: SortStrategy, cmp: Comparator<T>) -> Result<Pipeline<T>>
        where T: Clone
    {
        let Pipeline { cluster, group, source } = self;
        let sorted = sort::sorted(&cluster, &group, source, cmp, strategy)?;
        Ok(Pipeline {
            cluster: cluster,
            group: group,
            source: sorted,
        })
    }
}

impl<T> IntoIterator for Pipeline<T> {
    type Item = T;
    type IntoIter = LocalSource<T>;

    fn into_iter(self) -> LocalSource<T> {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Parameters;
    use crate::transport::local::run_local;

    fn params() -> Parameters {
        Parameters::new().set_workers(2)
    }

    #[test]
    fn test_local_ops() {
        run_local(1, params(), |c| {
            let v = Pipeline::new(&c, vec![5, 3, 8, 3, 1, 9, 5])
                .filter(|e| *e != 9)
                .map(|e| e * 10)
                .local_distinct()
                .local_sorted()
                .local_skip(1)
                .local_limit(3)
                .local_to_vec();
            assert_eq!(v, vec![30, 50, 80]);

            let words = Pipeline::new(&c, vec!["a b", "c"])
                .flat_map(|l: &str| l.split(' ').map(String::from).collect::<Vec<_>>())
                .local_sorted_by(|a: &String, b: &String| b.cmp(a))
                .local_to_vec();
            assert_eq!(words, vec!["c", "b", "a"]);

            assert_eq!(Pipeline::new(&c, 1..=4).local_reduce(|a, b| a * b), Some(24));
            assert_eq!(Pipeline::new(&c, 1..=4).local_fold(0, |a, b| a + b), 10);
            assert_eq!(Pipeline::new(&c, vec![2, 7, 1]).local_max_by(|a, b| a.cmp(b)), Some(7));
            assert_eq!(Pipeline::<u8>::empty(&c).local_count(), 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_local_sort_is_lazy() {
        run_local(1, params(), |c| {
            let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
            let s = seen.clone();
            let p = Pipeline::new(&c, vec![3, 2, 1])
                .inspect(move |_| {
                    s.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                })
                .local_sorted();
            assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 0);
            assert_eq!(p.local_to_vec(), vec![1, 2, 3]);
            assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 3);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_par_local_fold() {
        let sums = run_local(2, params().set_split_batch(10), |c| {
            let p = Pipeline::new(&c, 0..1000u64);
            Ok(p.par_local_fold(|| 0u64, |a, b| a + b, |a, b| a + b))
        })
        .unwrap();
        assert_eq!(sums, vec![499500, 499500]);
    }

    #[test]
    fn test_global_aggregates() {
        let got = run_local(3, params(), |c| {
            let rank = c.rank();
            let local = move || (0..4).map(move |i| (rank * 4 + i) as u32).collect::<Vec<_>>();
            let p = |v: Vec<u32>| Pipeline::new(&c, v);

            let count = p(local()).count()?;
            let sum = p(local()).reduce(|a, b| a + b)?;
            let folded = p(local()).fold(0u64, |a, e| a + e as u64, |a, b| a + b)?;
            let min = p(local()).min()?;
            let max = p(local()).max()?;
            let all = p(local()).all_match(|e| e < 12)?;
            let any = p(local()).any_match(|e| e == 11)?;
            let none = p(local()).none_match(|e| e > 100)?;
            let first = p(local()).filter(|e| *e >= 5).find_first()?;
            let any_el = p(local()).find_any()?;
            Ok((count, sum, folded, min, max, all, any, none, first, any_el.is_some()))
        })
        .unwrap();

        for r in got {
            assert_eq!(r, (12, Some(66), 66, Some(0), Some(11), true, true, true, Some(5), true));
        }
    }

    #[test]
    fn test_empty_reductions() {
        let got = run_local(2, params(), |c| {
            let r = Pipeline::<u32>::empty(&c).reduce(|a, b| a + b)?;
            let f = Pipeline::<u32>::empty(&c).find_first()?;
            let a = Pipeline::<u32>::empty(&c).all_match(|_| false)?;
            Ok((r, f, a))
        })
        .unwrap();
        assert_eq!(got, vec![(None, None, true), (None, None, true)]);
    }

    #[test]
    fn test_combine() {
        let got = run_local(2, params(), |c| {
            let local = if c.rank() == 0 { vec!["x", "y"] } else { vec!["y"] };
            let p = Pipeline::new(&c, local.into_iter().map(String::from));
            p.combine(HashSet::new,
                      |s: &mut HashSet<String>, e| {
                          s.insert(e);
                      },
                      |a, b| a.extend(b))
        })
        .unwrap();
        for s in got {
            assert_eq!(s.len(), 2);
        }
    }

    #[test]
    fn test_distinct_and_to_vec() {
        let got = run_local(3, params(), |c| {
            let local = vec![1u16, 2, 2, 3, c.rank() as u16 + 10];
            let d = Pipeline::new(&c, local).distinct()?;
            let mut all = d.to_vec()?;
            all.sort();
            Ok(all)
        })
        .unwrap();
        for v in got {
            assert_eq!(v, vec![1, 2, 3, 10, 11, 12]);
        }
    }

    #[test]
    fn test_for_each_sees_everything() {
        let got = run_local(2, params(), |c| {
            let mut n = 0;
            Pipeline::new(&c, vec![c.rank(); 3]).for_each(|_| n += 1)?;
            Ok(n)
        })
        .unwrap();
        assert_eq!(got, vec![6, 6]);
    }

    #[test]
    fn test_distribute_to_node_and_subgroup() {
        let got = run_local(3, params(), |c| {
            let target = c.node(2).unwrap().clone();
            let gathered = Pipeline::new(&c, vec![c.rank() as u8; 2]).distribute_to_node(&target)?;
            assert_eq!(gathered.group().ranks(), vec![2]);
            let n = gathered.local_count();

            // Re-spread node2's data over nodes 0 and 1 only.
            let pair = Group::from_nodes(c.nodes()[0..2].to_vec());
            let from = Group::single(target.clone());
            let local: Vec<u8> = if c.rank() == 2 { (0..6).collect() } else { Vec::new() };
            let spread = Pipeline::on_group(&c, from, local).distribute_to_with(&pair, |e| *e as i64)?;
            Ok((n, spread.local_count()))
        })
        .unwrap();
        assert_eq!(got, vec![(0, 3), (0, 3), (6, 0)]);
    }
}
