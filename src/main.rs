use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::process::exit;

mod indexing;
mod kernel;
mod parsing;

use indexing::{Indexer, KernelIndex};
use kernel::ptk::PartialTreeKernel;
use kernel::sptk::{LexicalSimilarity, SmoothedPartialTreeKernel};
use kernel::KernelParams;
use parsing::LabelDict;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum KernelMode {
    /// Partial tree kernel, exact label matching
    Ptk,
    /// Smoothed partial tree kernel, label similarity matching
    Sptk,
}

/// Tree kernel utility, computes pairwise partial tree kernel values
/// over a collection of trees in bracket notation
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Dataset file of trees in bracket notation, one tree per line
    #[arg(short, long, value_name = "FILE")]
    dataset_path: PathBuf,

    /// Kernel variant to evaluate
    #[arg(short, long, value_enum, default_value_t = KernelMode::Ptk)]
    mode: KernelMode,

    /// Horizontal decay factor, must be in (0, 1]
    #[arg(long, default_value_t = 0.4)]
    lambda: f32,

    /// Vertical decay factor, must be in (0, 1]
    #[arg(long, default_value_t = 0.4)]
    mu: f32,

    /// Scaling factor applied to matching leaves
    #[arg(long, default_value_t = 1.0)]
    terminal_factor: f32,

    /// Cutoff on aligned child subsequence length, unbounded when omitted
    #[arg(long)]
    max_subsequence_length: Option<usize>,

    /// CSV file of "word,word,score" rows with similarity scores in [0, 1],
    /// required for sptk mode
    #[arg(long, value_name = "FILE")]
    similarity_file: Option<PathBuf>,

    /// Node pairs scoring below this similarity are non-matching (sptk only)
    #[arg(long, default_value_t = 0.01)]
    similarity_threshold: f32,

    /// Output CSV file, stdout when omitted
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Evaluate only this many randomly sampled tree pairs
    #[arg(long)]
    sample: Option<usize>,

    /// Seed for pair sampling
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Report K(T1,T2) / sqrt(K(T1,T1) * K(T2,T2)) instead of raw values
    #[arg(short, long, default_value_t = false)]
    normalize: bool,
}

#[derive(Debug, Serialize)]
struct KernelRecord {
    t1: usize,
    t2: usize,
    kernel: f32,
}

enum AnyEvaluator {
    Ptk(PartialTreeKernel),
    Sptk(Box<SmoothedPartialTreeKernel<LexicalSimilarity>>),
}

impl AnyEvaluator {
    fn evaluate(&mut self, t1: &KernelIndex, t2: &KernelIndex) -> f32 {
        match self {
            AnyEvaluator::Ptk(ev) => ev.evaluate(t1, t2),
            AnyEvaluator::Sptk(ev) => ev.evaluate(t1, t2),
        }
    }
}

fn load_similarity_file(
    path: &PathBuf,
    label_dict: &LabelDict,
) -> Result<LexicalSimilarity, anyhow::Error> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(BufReader::new(f));

    let mut similarity = LexicalSimilarity::default();
    for record in reader.records() {
        let record = record?;
        let score: f32 = record[2].parse()?;
        // words never seen in the dataset cannot pair with any node
        let (Some(l1), Some(l2)) = (label_dict.get(&record[0]), label_dict.get(&record[1]))
        else {
            continue;
        };
        similarity.insert(*l1, *l2, score)?;
    }
    Ok(similarity)
}

fn make_evaluator(
    cli: &Cli,
    params: KernelParams,
    similarity: &Option<LexicalSimilarity>,
) -> AnyEvaluator {
    match cli.mode {
        KernelMode::Ptk => AnyEvaluator::Ptk(PartialTreeKernel::new(params)),
        KernelMode::Sptk => AnyEvaluator::Sptk(Box::new(
            SmoothedPartialTreeKernel::new(
                params,
                similarity.clone().unwrap_or_default(),
                cli.similarity_threshold,
            )
            .expect("similarity threshold validated before workers start"),
        )),
    }
}

fn sample_pairs(pairs: Vec<(usize, usize)>, amount: usize, seed: u64) -> Vec<(usize, usize)> {
    use rand_xoshiro::rand_core::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    if amount >= pairs.len() {
        return pairs;
    }
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    rand::seq::index::sample(&mut rng, pairs.len(), amount)
        .iter()
        .map(|i| pairs[i])
        .collect_vec()
}

fn run(cli: Cli) -> Result<(), anyhow::Error> {
    // validate the numeric configuration up front so workers can assume it
    let mut params = KernelParams::new(cli.lambda, cli.mu)?
        .with_terminal_factor(cli.terminal_factor)?;
    if let Some(cutoff) = cli.max_subsequence_length {
        params = params.with_max_subsequence_length(cutoff)?;
    }

    let mut label_dict = LabelDict::new();
    let trees = parsing::parse_dataset(&cli.dataset_path, &mut label_dict)?;
    if trees.is_empty() {
        bail!("dataset {} holds no trees", cli.dataset_path.display());
    }

    let similarity = match cli.mode {
        KernelMode::Sptk => {
            if !(0.0..=1.0).contains(&cli.similarity_threshold) {
                bail!(
                    "similarity threshold must be in [0, 1], got {}",
                    cli.similarity_threshold
                );
            }
            let Some(path) = &cli.similarity_file else {
                bail!("sptk mode needs --similarity-file");
            };
            let similarity = load_similarity_file(path, &label_dict)?;
            if similarity.is_empty() {
                eprintln!("Similarity file matched no dataset labels, only equal labels will pair");
            }
            Some(similarity)
        }
        KernelMode::Ptk => None,
    };

    let indexes = trees
        .par_iter()
        .map(|t| KernelIndex::index_tree(t, &label_dict))
        .collect::<Vec<_>>();

    let mut pairs: Vec<(usize, usize)> = (0..indexes.len()).tuple_combinations().collect_vec();
    if let Some(amount) = cli.sample {
        pairs = sample_pairs(pairs, amount, cli.seed);
    }

    // evaluators are single threaded by contract, one instance per worker
    let self_kernels = if cli.normalize {
        indexes
            .par_iter()
            .map_init(
                || make_evaluator(&cli, params, &similarity),
                |evaluator, idx| evaluator.evaluate(idx, idx),
            )
            .collect::<Vec<_>>()
    } else {
        vec![]
    };

    let out: Box<dyn Write + Send> = match &cli.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(std::io::stdout()),
    };
    let (sender, receiver) = crossbeam_channel::unbounded::<KernelRecord>();
    let writer_handle = std::thread::spawn(move || -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(out);
        for record in receiver {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    });

    pairs.par_iter().for_each_init(
        || (make_evaluator(&cli, params, &similarity), sender.clone()),
        |(evaluator, sender), &(t1, t2)| {
            let mut kernel = evaluator.evaluate(&indexes[t1], &indexes[t2]);
            if cli.normalize {
                let denominator = (self_kernels[t1] * self_kernels[t2]).sqrt();
                kernel = if denominator > 0.0 {
                    kernel / denominator
                } else {
                    0.0
                };
            }
            sender
                .send(KernelRecord { t1, t2, kernel })
                .expect("result writer hung up");
        },
    );
    drop(sender);

    writer_handle
        .join()
        .expect("result writer panicked")?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if !cli.dataset_path.exists() || !cli.dataset_path.is_file() {
        eprintln!("This file does not exists or is not a valid file!");
        exit(1);
    }

    if let Err(e) = run(cli) {
        eprintln!("Got unexpected error: {}", e);
        exit(1);
    }
}
