//! Analytics jobs written against the pipeline API.
//!
//! Each job is called by every rank with that rank's pipeline of input lines and returns the
//! rank's share of the result. Malformed input lines are skipped with a warning.

use std::collections::{BTreeSet, HashMap};
use std::fs::OpenOptions;
use std::hash::Hash;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::cluster::Cluster;
use crate::collective::{self, hash_partition};
use crate::error::{Error, Result};
use crate::group::Group;
use crate::pipeline::Pipeline;
use crate::sort::compare;

/// Share of a page's rank that is passed on along its links.
pub const DAMPING: f64 = 0.85;

fn merge_counts<K: Eq + Hash>(mut a: HashMap<K, u64>, b: HashMap<K, u64>) -> HashMap<K, u64> {
    for (k, n) in b {
        *a.entry(k).or_insert(0) += n;
    }
    a
}

/// Shuffles local counts so that every key ends up on one member, and adds them up there.
/// The result is sorted by key.
fn total_counts(cluster: &Arc<Cluster>, group: Group, local: HashMap<String, u64>) -> Result<Vec<(String, u64)>> {
    let totals = Pipeline::on_group(cluster, group, local)
        .distribute_with(|e: &(String, u64)| hash_partition(&e.0))?
        .local_fold(HashMap::new(), |mut m: HashMap<String, u64>, (k, n)| {
            *m.entry(k).or_insert(0) += n;
            m
        });
    let mut totals: Vec<(String, u64)> = totals.into_iter().collect();
    totals.sort();
    Ok(totals)
}

/// Counts whitespace-separated words.
pub fn word_count(lines: Pipeline<String>) -> Result<Vec<(String, u64)>> {
    let (cluster, group) = (lines.cluster().clone(), lines.group().clone());
    let local = lines.par_local_fold(HashMap::new,
                                     |mut m: HashMap<String, u64>, line: String| {
                                         for w in line.split_whitespace() {
                                             *m.entry(w.to_string()).or_insert(0) += 1;
                                         }
                                         m
                                     },
                                     merge_counts);
    debug!(node = cluster.me().name(), words = local.len(), "counted local words");
    total_counts(&cluster, group, local)
}

/// Counts every match of `pattern`, keyed by the matched text.
pub fn grep(lines: Pipeline<String>, pattern: &Regex) -> Result<Vec<(String, u64)>> {
    let (cluster, group) = (lines.cluster().clone(), lines.group().clone());
    let re = pattern.clone();
    let local = lines.par_local_fold(HashMap::new,
                                     |mut m: HashMap<String, u64>, line: String| {
                                         for found in re.find_iter(&line) {
                                             *m.entry(found.as_str().to_string()).or_insert(0) += 1;
                                         }
                                         m
                                     },
                                     merge_counts);
    total_counts(&cluster, group, local)
}

/// Sorts all lines, by byte order or case-insensitively.
pub fn sort_lines(lines: Pipeline<String>, dictionary: bool) -> Result<Pipeline<String>> {
    if dictionary {
        let strategy = lines.cluster().params().sort_strategy;
        lines.sorted_with(strategy, compare::dictionary())
    } else {
        lines.sorted()
    }
}

/// `from<TAB>to`
fn parse_link(line: &str) -> Option<(String, String)> {
    let mut parts = line.split('\t');
    match (parts.next(), parts.next()) {
        (Some(from), Some(to)) => Some((from.to_string(), to.to_string())),
        _ => {
            warn!(line = line, "not a link");
            None
        }
    }
}

/// Ranks the pages of a link graph given as `from<TAB>to` lines.
///
/// All ranks start at 1.0. In each iteration every page splits its rank evenly over its
/// outgoing links, and a page's new rank is `0.15 + 0.85 * (sum of incoming shares)`. Pages
/// without incoming links drop out after the first iteration. Links and ranks are partitioned
/// by page, so each member only ever looks up ranks it holds itself.
pub fn page_rank(lines: Pipeline<String>, iterations: usize) -> Result<Vec<(String, f64)>> {
    let (cluster, group) = (lines.cluster().clone(), lines.group().clone());
    let node = cluster.me().name().to_string();

    info!(node = %node, "Loading links");
    let mut links: HashMap<String, Vec<String>> = HashMap::new();
    lines
        .flat_map(|l| parse_link(&l))
        .distribute_with(|e: &(String, String)| hash_partition(&e.0))?
        .local_distinct()
        .local_for_each(|(from, to)| links.entry(from).or_default().push(to));
    let loaded = collective::reduce(&cluster, &group, links.len(), |a, b| a + b)?;
    info!(node = %node, "{} links loaded.", loaded);

    let mut ranks: HashMap<String, f64> = links.keys().map(|k| (k.clone(), 1.0)).collect();
    for it in 0..iterations {
        info!(node = %node, "Iteration {}", it + 1);
        let contribs: Vec<(String, f64)> = links
            .iter()
            .flat_map(|(from, tos)| {
                let share = ranks.get(from).copied().unwrap_or(0.0) / tos.len() as f64;
                tos.iter().map(move |to| (to.clone(), share))
            })
            .collect();
        let sums = Pipeline::on_group(&cluster, group.clone(), contribs)
            .distribute_with(|e: &(String, f64)| hash_partition(&e.0))?
            .local_fold(HashMap::new(), |mut m: HashMap<String, f64>, (page, c)| {
                *m.entry(page).or_insert(0.0) += c;
                m
            });
        ranks = sums
            .into_iter()
            .map(|(page, s)| (page, s * DAMPING + (1.0 - DAMPING)))
            .collect();
    }

    let mut ranks: Vec<(String, f64)> = ranks.into_iter().collect();
    ranks.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(ranks)
}

/// Disjoint sets of vertices. The representative of a set is its smallest vertex.
#[derive(Default)]
struct UnionFind {
    parent: HashMap<u64, u64>,
}

impl UnionFind {
    fn find(&mut self, v: u64) -> u64 {
        let mut v = v;
        loop {
            let p = *self.parent.entry(v).or_insert(v);
            if p == v {
                return v;
            }
            let gp = *self.parent.entry(p).or_insert(p);
            self.parent.insert(v, gp);
            v = p;
        }
    }

    fn union(&mut self, a: u64, b: u64) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra < rb {
            self.parent.insert(rb, ra);
        } else if rb < ra {
            self.parent.insert(ra, rb);
        }
    }

    /// All sets, each sorted, ordered by representative.
    fn components(mut self) -> Vec<Vec<u64>> {
        let vertices: Vec<u64> = self.parent.keys().copied().collect();
        let mut sets: HashMap<u64, Vec<u64>> = HashMap::new();
        for v in vertices {
            let root = self.find(v);
            sets.entry(root).or_default().push(v);
        }
        let mut sets: Vec<Vec<u64>> = sets.into_values().collect();
        for s in sets.iter_mut() {
            s.sort();
        }
        sets.sort();
        sets
    }
}

/// `a<TAB>b` with numeric vertex ids, as `(min, max)`. Self loops carry no connectivity and
/// are dropped.
fn parse_edge(line: &str) -> Option<(u64, u64)> {
    let mut parts = line.split('\t');
    let parsed = match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) => a.trim().parse::<u64>().ok().zip(b.trim().parse::<u64>().ok()),
        _ => None,
    };
    match parsed {
        None => {
            warn!(line = line, "Invalid line format");
            None
        }
        Some((a, b)) if a < b => Some((a, b)),
        Some((a, b)) if b < a => Some((b, a)),
        Some(_) => None,
    }
}

/// Result of `connected_components()` on one rank.
#[derive(Debug, Default, PartialEq)]
pub struct Components {
    /// Number of components in the whole graph; known on every rank.
    pub count: usize,
    /// `(vertex, component id)`; the component id is its smallest vertex.
    pub vertices: Vec<(u64, u64)>,
    /// `(component id, number of vertices)`
    pub summary: Vec<(u64, usize)>,
}

/// Connected components of an undirected graph given as `a<TAB>b` lines.
///
/// Edges are partitioned by their smaller vertex and merged into local components first. The
/// local components are then gathered on the first member of the group, which merges them into
/// the final ones; the other members end up with an empty share.
pub fn connected_components(lines: Pipeline<String>) -> Result<Components> {
    let (cluster, group) = (lines.cluster().clone(), lines.group().clone());
    let root = group.root().cloned().ok_or(Error::EmptyGroup)?;

    let mut local = UnionFind::default();
    lines
        .flat_map(|l| parse_edge(&l))
        .distribute_with(|e: &(u64, u64)| e.0 as i64)?
        .local_for_each(|(a, b)| local.union(a, b));
    let local = local.components();
    debug!(node = cluster.me().name(), components = local.len(), "merged local components");

    let mut all = UnionFind::default();
    Pipeline::on_group(&cluster, group.clone(), local)
        .distribute_to_node(&root)?
        .local_for_each(|set| {
            for v in set.iter().skip(1) {
                all.union(set[0], *v);
            }
        });
    let sets = all.components();
    let count = collective::reduce(&cluster, &group, sets.len(), |a, b| a + b)?;
    info!(node = cluster.me().name(), "There are {} components", count);

    let mut result = Components { count: count, ..Components::default() };
    for set in sets {
        let id = set[0];
        result.summary.push((id, set.len()));
        result.vertices.extend(set.into_iter().map(|v| (v, id)));
    }
    Ok(result)
}

/// Naive Bayes models: for each category, the share of its training lines containing a word.
pub type BayesModels = HashMap<String, HashMap<String, f64>>;

/// Probability used for a word that a model has never seen.
pub const UNSEEN_WORD: f64 = 0.0001;

/// Per category: lines containing each word, and the number of lines.
type Tally = HashMap<String, (HashMap<String, u64>, u64)>;

fn add_tally(t: &mut Tally, category: String, words: HashMap<String, u64>, lines: u64) {
    let entry = t.entry(category).or_insert_with(|| (HashMap::new(), 0));
    for (w, n) in words {
        *entry.0.entry(w).or_insert(0) += n;
    }
    entry.1 += lines;
}

fn merge_tallies(mut a: Tally, b: Tally) -> Tally {
    for (category, (words, lines)) in b {
        add_tally(&mut a, category, words, lines);
    }
    a
}

/// Trains one model per category from lines whose first word is the category.
///
/// Each line counts once for every distinct word in it, the category itself included. The
/// counts are gathered on the first member of the group, which turns them into probabilities;
/// the other members return no models.
pub fn bayes_train(lines: Pipeline<String>) -> Result<BayesModels> {
    let (cluster, group) = (lines.cluster().clone(), lines.group().clone());
    let root = group.root().cloned().ok_or(Error::EmptyGroup)?;

    let local = lines.par_local_fold(HashMap::new,
                                     |mut t: Tally, line: String| {
                                         let words: BTreeSet<&str> = line.split_whitespace().collect();
                                         match line.split_whitespace().next() {
                                             Some(category) => {
                                                 let words = words.into_iter().map(|w| (w.to_string(), 1)).collect();
                                                 add_tally(&mut t, category.to_string(), words, 1);
                                             }
                                             None => warn!("empty training line"),
                                         }
                                         t
                                     },
                                     merge_tallies);
    debug!(node = cluster.me().name(), categories = local.len(), "trained local counts");

    let merged = Pipeline::on_group(&cluster, group, local)
        .distribute_to_node(&root)?
        .local_fold(Tally::new(), |mut t: Tally, (category, (words, lines))| {
            add_tally(&mut t, category, words, lines);
            t
        });
    let models: BayesModels = merged
        .into_iter()
        .map(|(category, (words, lines))| {
            let probs = words.into_iter().map(|(w, n)| (w, n as f64 / lines as f64)).collect();
            (category, probs)
        })
        .collect();
    if cluster.me() == &root {
        info!(node = cluster.me().name(), "Trained {} models", models.len());
    }
    Ok(models)
}

/// The most probable category for `line`: the model with the highest product of word
/// probabilities over the distinct words of the line. Ties go to the model listed first.
fn classify_line<'a>(models: &'a [(String, HashMap<String, f64>)], line: &str) -> &'a str {
    let words: BTreeSet<&str> = line.split_whitespace().collect();
    let mut best = (-1.0, "default");
    for (category, model) in models {
        let p: f64 = words.iter().map(|w| model.get(*w).copied().unwrap_or(UNSEEN_WORD)).product();
        if p > best.0 {
            best = (p, category.as_str());
        }
    }
    best.1
}

/// Prefixes every line with its most probable category and a space. Every member needs the
/// full set of models; without any, lines are classified as `default`.
pub fn bayes_classify(lines: Pipeline<String>, models: &BayesModels) -> Pipeline<String> {
    let mut models: Vec<(String, HashMap<String, f64>)> = models.iter().map(|(c, m)| (c.clone(), m.clone())).collect();
    models.sort_by(|a, b| a.0.cmp(&b.0));
    lines.map(move |line| format!("{} {}", classify_line(&models, &line), line))
}

/// Writes models to a new file; an existing file is an error.
pub fn save_models(path: &Path, models: &BayesModels) -> Result<()> {
    let f = OpenOptions::new().write(true).create_new(true).open(path)?;
    let mut w = BufWriter::new(f);
    bincode::serialize_into(&mut w, models)?;
    w.flush()?;
    Ok(())
}

pub fn load_models(path: &Path) -> Result<BayesModels> {
    let f = OpenOptions::new().read(true).open(path)?;
    Ok(bincode::deserialize_from(BufReader::new(f))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Parameters;
    use crate::transport::local::run_local;

    fn text(rank: usize) -> Vec<String> {
        let v: &[&str] = match rank {
            0 => &["the quick brown fox", "jumps over", ""],
            1 => &["the lazy dog", "  the end  "],
            _ => &["fox and dog"],
        };
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_word_count() {
        let out = run_local(3, Parameters::new().set_workers(2).set_split_batch(1), |c| {
            word_count(Pipeline::new(&c, text(c.rank())))
        })
        .unwrap();

        let mut expected: HashMap<String, u64> = HashMap::new();
        for w in (0..3).flat_map(text).flat_map(|l| l.split_whitespace().map(String::from).collect::<Vec<_>>()) {
            *expected.entry(w).or_insert(0) += 1;
        }
        let mut got: HashMap<String, u64> = HashMap::new();
        for (w, n) in out.into_iter().flatten() {
            assert!(got.insert(w, n).is_none());
        }
        assert_eq!(got, expected);
        assert_eq!(got["the"], 3);
    }

    #[test]
    fn test_grep() {
        let re = Regex::new("[a-z]*o[a-z]").unwrap();
        let re = &re;
        let out = run_local(2, Parameters::new().set_workers(1), move |c| {
            grep(Pipeline::new(&c, text(c.rank())), re)
        })
        .unwrap();
        let mut all: Vec<(String, u64)> = out.into_iter().flatten().collect();
        all.sort();
        assert_eq!(all,
                   vec![(String::from("brow"), 1), (String::from("dog"), 1), (String::from("fox"), 1), (String::from("ov"), 1)]);
    }

    #[test]
    fn test_sort_lines_dictionary() {
        let out = run_local(2, Parameters::new().set_workers(1), |c| {
            let local: Vec<String> = if c.rank() == 0 {
                vec!["banana".into(), "Apple".into(), "cherry".into()]
            } else {
                vec!["apple".into(), "Banana".into()]
            };
            Ok(sort_lines(Pipeline::new(&c, local), true)?.local_to_vec())
        })
        .unwrap();
        let all: Vec<String> = out.into_iter().flatten().collect();
        let lower: Vec<String> = all.iter().map(|s| s.to_lowercase()).collect();
        assert_eq!(lower, vec!["apple", "apple", "banana", "banana", "cherry"]);
    }

    fn sequential_page_rank(edges: &[(&str, &str)], iterations: usize) -> HashMap<String, f64> {
        let mut links: HashMap<String, Vec<String>> = HashMap::new();
        for (a, b) in edges {
            let tos = links.entry(a.to_string()).or_default();
            if !tos.contains(&b.to_string()) {
                tos.push(b.to_string());
            }
        }
        let mut ranks: HashMap<String, f64> = links.keys().map(|k| (k.clone(), 1.0)).collect();
        for _ in 0..iterations {
            let mut sums: HashMap<String, f64> = HashMap::new();
            for (from, tos) in links.iter() {
                let share = ranks.get(from).copied().unwrap_or(0.0) / tos.len() as f64;
                for to in tos {
                    *sums.entry(to.clone()).or_insert(0.0) += share;
                }
            }
            ranks = sums.into_iter().map(|(k, s)| (k, 0.85 * s + 0.15)).collect();
        }
        ranks
    }

    #[test]
    fn test_page_rank() {
        let edges = [("a", "b"), ("b", "c"), ("c", "a"), ("a", "c"), ("d", "c"), ("a", "b")];
        let e = &edges;
        let out = run_local(3, Parameters::new().set_workers(1), move |c| {
            let mine: Vec<String> = e
                .iter()
                .enumerate()
                .filter(|(i, _)| i % 3 == c.rank())
                .map(|(_, (a, b))| format!("{}\t{}", a, b))
                .chain(Some(String::from("garbage")))
                .collect();
            page_rank(Pipeline::new(&c, mine), 5)
        })
        .unwrap();

        let expected = sequential_page_rank(&edges, 5);
        let got: HashMap<String, f64> = out.into_iter().flatten().collect();
        assert_eq!(got.len(), expected.len());
        for (page, r) in expected {
            assert!((got[&page] - r).abs() < 1e-9, "{}: {} != {}", page, got[&page], r);
        }
        assert!(!got.contains_key("d"));
    }

    #[test]
    fn test_union_find() {
        let mut uf = UnionFind::default();
        uf.union(5, 3);
        uf.union(9, 7);
        uf.union(3, 9);
        uf.union(1, 2);
        assert_eq!(uf.components(), vec![vec![1, 2], vec![3, 5, 7, 9]]);
        assert_eq!(parse_edge("4\t2"), Some((2, 4)));
        assert_eq!(parse_edge("4\t4"), None);
        assert_eq!(parse_edge("x\t4"), None);
    }

    #[test]
    fn test_connected_components() {
        let out = run_local(3, Parameters::new().set_workers(1), |c| {
            let lines: Vec<String> = match c.rank() {
                0 => vec!["1\t2".into(), "10\t11".into()],
                1 => vec!["3\t2".into(), "12\t11".into(), "7\t7".into()],
                _ => vec!["4\t3".into(), "20\t21".into()],
            };
            connected_components(Pipeline::new(&c, lines))
        })
        .unwrap();

        assert!(out.iter().all(|r| r.count == 3));
        assert!(out[1].vertices.is_empty() && out[2].summary.is_empty());
        assert_eq!(out[0].summary, vec![(1, 4), (10, 3), (20, 2)]);
        assert_eq!(out[0].vertices[..4], [(1, 1), (2, 1), (3, 1), (4, 1)]);
        assert_eq!(out[0].vertices.len(), 9);
    }

    fn training(rank: usize) -> Vec<String> {
        let v: &[&str] = match rank {
            0 => &["spam buy cheap pills now", "ham meeting at noon", ""],
            1 => &["spam cheap cheap watches buy", "ham lunch at noon"],
            _ => &["spam win money now", "ham see you at lunch", "ham notes from the meeting"],
        };
        v.iter().map(|s| s.to_string()).collect()
    }

    fn sequential_bayes(lines: &[String]) -> BayesModels {
        let mut counts: HashMap<String, (HashMap<String, u64>, u64)> = HashMap::new();
        for line in lines {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            let entry = counts.entry(tokens[0].to_string()).or_default();
            let mut seen: Vec<&str> = Vec::new();
            for t in tokens {
                if !seen.contains(&t) {
                    seen.push(t);
                    *entry.0.entry(t.to_string()).or_insert(0) += 1;
                }
            }
            entry.1 += 1;
        }
        counts
            .into_iter()
            .map(|(c, (words, n))| (c, words.into_iter().map(|(w, k)| (w, k as f64 / n as f64)).collect()))
            .collect()
    }

    #[test]
    fn test_bayes() {
        let queries = ["cheap pills", "lunch at noon", "zzz", "meeting notes now"];
        let q = &queries;
        let out = run_local(3, Parameters::new().set_workers(2).set_split_batch(1), move |c| {
            let trained = bayes_train(Pipeline::new(&c, training(c.rank())))?;
            let on_rank = trained.len();
            let models: BayesModels = Pipeline::new(&c, trained).broadcast()?.local_collect();
            let mine: Vec<String> = q.iter().skip(c.rank()).step_by(3).map(|s| s.to_string()).collect();
            let classified = bayes_classify(Pipeline::new(&c, mine), &models).local_to_vec();
            Ok((on_rank, models, classified))
        })
        .unwrap();

        let expected = sequential_bayes(&(0..3).flat_map(training).collect::<Vec<_>>());
        assert_eq!(out.iter().map(|r| r.0).collect::<Vec<_>>(), vec![2, 0, 0]);
        for (_, models, _) in out.iter() {
            assert_eq!(models.len(), expected.len());
            for (category, probs) in expected.iter() {
                let got = &models[category];
                assert_eq!(got.len(), probs.len());
                for (w, p) in probs {
                    assert!((got[w] - p).abs() < 1e-12, "{} {}: {} != {}", category, w, got[w], p);
                }
            }
        }
        assert_eq!(expected["spam"]["cheap"], 2.0 / 3.0);

        let mut classified: Vec<String> = out.into_iter().flat_map(|r| r.2).collect();
        classified.sort();
        assert_eq!(classified,
                   vec!["ham lunch at noon", "ham meeting notes now", "ham zzz", "spam cheap pills"]);
    }

    #[test]
    fn test_classify_line() {
        let mut spam = HashMap::new();
        spam.insert(String::from("cheap"), 0.5);
        let models = vec![(String::from("ham"), HashMap::new()), (String::from("spam"), spam)];
        assert_eq!(classify_line(&models, "cheap cheap"), "spam");
        assert_eq!(classify_line(&models, "hello"), "ham");
        assert_eq!(classify_line(&[], "cheap"), "default");
    }

    #[test]
    fn test_models_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models");
        let mut models = BayesModels::new();
        models.entry(String::from("ham")).or_default().insert(String::from("noon"), 0.25);
        save_models(&path, &models).unwrap();
        assert_eq!(load_models(&path).unwrap(), models);
        assert!(matches!(save_models(&path, &models), Err(Error::Io(_))));
    }
}
