//! Runs one of the bundled jobs on a number of in-process ranks.
//!
//! Every rank reads its share of the `.txt` files (by default) in the input directory and
//! writes its share of the result to `part-<rank>` in the output directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use regex::Regex;
use tracing::info;

use distmr::formats::lines::{read_dir, ShardWriter};
use distmr::{jobs, logging, run_local, Cluster, Error, Parameters, Pipeline, Result, SortStrategy};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    /// Sample-based external sort
    Sampling,
    /// In-memory sort of pre-sorted partitions
    Presorted,
}

#[derive(Parser)]
#[clap(version, about = "Data-parallel jobs over in-process ranks")]
struct Args {
    /// Number of ranks
    #[clap(long, default_value_t = 4)]
    ranks: usize,

    /// Worker threads per rank; defaults to the number of CPUs
    #[clap(long)]
    workers: Option<usize>,

    /// Distributed sort variant
    #[clap(long, value_enum, default_value_t = Strategy::Sampling)]
    strategy: Strategy,

    /// Directory for sort spill files; defaults to the system temp dir
    #[clap(long)]
    spill_dir: Option<PathBuf>,

    /// Only read input files with this suffix
    #[clap(long, default_value = ".txt")]
    suffix: String,

    #[clap(subcommand)]
    job: Job,
}

#[derive(Subcommand)]
enum Job {
    /// Counts words; writes `(word,count)` lines
    Wordcount { input: PathBuf, output: PathBuf },
    /// Counts matches of a regular expression; writes `count<TAB>match` lines
    Grep { pattern: String, input: PathBuf, output: PathBuf },
    /// Sorts lines
    Sort {
        input: PathBuf,
        output: PathBuf,
        /// Compare case-insensitively
        #[clap(long)]
        dictionary: bool,
    },
    /// Ranks pages of a `from<TAB>to` link graph; writes `page<TAB>rank` lines
    Pagerank {
        input: PathBuf,
        output: PathBuf,
        #[clap(long, default_value_t = 10)]
        iterations: usize,
    },
    /// Connected components of an `a<TAB>b` graph; writes `vertices/` and `summary/`
    Components { input: PathBuf, output: PathBuf },
    /// Naive Bayes text classifier; the first word of a training line is its category
    Bayes {
        #[clap(subcommand)]
        mode: Bayes,
    },
}

#[derive(Subcommand)]
enum Bayes {
    /// Trains models and writes them to a new `model` file
    Train { input: PathBuf, model: PathBuf },
    /// Writes `category line` for every input line
    Classify { input: PathBuf, output: PathBuf, model: PathBuf },
}

fn parameters(args: &Args) -> Parameters {
    let strategy = match args.strategy {
        Strategy::Sampling => SortStrategy::Sampling,
        Strategy::Presorted => SortStrategy::Presorted,
    };
    let mut p = Parameters::new()
        .set_sort_strategy(strategy)
        .set_spill(args.spill_dir.clone(), true);
    if let Some(w) = args.workers {
        p = p.set_workers(w);
    }
    p
}

fn write_shard<T: ToString, I: IntoIterator<Item = T>>(dir: &Path, rank: usize, records: I) -> Result<u64> {
    let mut w = ShardWriter::create(dir, rank)?;
    w.write_all(records)?;
    Ok(w.finish()?)
}

fn run_job(c: Arc<Cluster>, job: &Job, suffix: &str, re: Option<&Regex>) -> Result<u64> {
    let rank = c.rank();
    let input = |dir: &Path| -> Result<Pipeline<String>> { read_dir(&c, dir, suffix) };
    match job {
        Job::Wordcount { input: i, output } => {
            let counts = jobs::word_count(input(i)?)?;
            write_shard(output, rank, counts.iter().map(|(w, n)| format!("({},{})", w, n)))
        }
        Job::Grep { input: i, output, .. } => {
            let re = re.ok_or_else(|| Error::Contract(String::from("grep without a pattern")))?;
            let found = jobs::grep(input(i)?, re)?;
            write_shard(output, rank, found.iter().map(|(m, n)| format!("{}\t{}", n, m)))
        }
        Job::Sort { input: i, output, dictionary } => {
            let sorted = jobs::sort_lines(input(i)?, *dictionary)?;
            write_shard(output, rank, sorted)
        }
        Job::Pagerank { input: i, output, iterations } => {
            let ranks = jobs::page_rank(input(i)?, *iterations)?;
            write_shard(output, rank, ranks.iter().map(|(p, r)| format!("{}\t{}", p, r)))
        }
        Job::Components { input: i, output } => {
            let cc = jobs::connected_components(input(i)?)?;
            let vertices = cc.vertices.iter().map(|(v, id)| format!("{}\t{}", v, id));
            let n = write_shard(&output.join("vertices"), rank, vertices)?;
            write_shard(&output.join("summary"), rank, cc.summary.iter().map(|(id, k)| format!("{}\t{}", id, k)))?;
            Ok(n)
        }
        Job::Bayes { mode: Bayes::Train { input: i, model } } => {
            let models = jobs::bayes_train(input(i)?)?;
            if rank == 0 {
                jobs::save_models(model, &models)?;
                info!("Saved {} models to {}", models.len(), model.display());
            }
            Ok(models.len() as u64)
        }
        Job::Bayes { mode: Bayes::Classify { input: i, output, model } } => {
            let models = jobs::load_models(model)?;
            write_shard(output, rank, jobs::bayes_classify(input(i)?, &models))
        }
    }
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let re = match args.job {
        Job::Grep { ref pattern, .. } => {
            Some(Regex::new(pattern).map_err(|e| Error::Contract(format!("bad pattern: {}", e)))?)
        }
        _ => None,
    };
    let params = parameters(&args);
    let (job, suffix) = (&args.job, args.suffix.as_str());

    let written = run_local(args.ranks, params, |c| run_job(c, job, suffix, re.as_ref()))?;
    info!("Wrote {} records in {} shards", written.iter().sum::<u64>(), written.len());
    Ok(())
}
