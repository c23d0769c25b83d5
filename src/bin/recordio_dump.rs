use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use imgrecord::{
    build_pipeline, DataIter, FixtureCodec, IterConfig, NullAugmenterFactory, ParserConfig,
    PipelineConfig,
};

/// Streams a record-I/O archive through the full pipeline and reports
/// throughput, mirroring the demo driver the original source ships next to
/// `ImageRecordIter` for sanity-checking an archive from the command line.
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the .rec archive.
    path_imgrec: PathBuf,

    /// Optional image-list side-table (index + label columns).
    #[arg(long)]
    path_imglist: Option<PathBuf>,

    /// Floats per label when no image list is given.
    #[arg(long, default_value_t = 1)]
    label_width: usize,

    /// Target `C,H,W` shape, comma-separated.
    #[arg(long, default_value = "3,1,1")]
    data_shape: String,

    /// Worker threads for decode/augment.
    #[arg(long, default_value_t = 4)]
    preprocess_threads: usize,

    /// Instances per batch.
    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Shuffle instances within each prefetched chunk.
    #[arg(long)]
    shuffle: bool,

    /// Shuffle/iterator seed.
    #[arg(long, default_value_t = 0)]
    seed: i32,

    /// Shard count for distributed reading.
    #[arg(long, default_value_t = 1)]
    num_parts: usize,

    /// This shard's index, in `0..num_parts`.
    #[arg(long, default_value_t = 0)]
    part_index: usize,

    /// Suppress per-chunk progress logging.
    #[arg(long)]
    quiet: bool,
}

fn parse_data_shape(s: &str) -> Result<(usize, usize, usize)> {
    let parts: Vec<usize> = s
        .split(',')
        .map(|p| p.trim().parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .context("data_shape must be three comma-separated integers")?;
    match parts[..] {
        [c, h, w] => Ok((c, h, w)),
        _ => anyhow::bail!("data_shape must be three comma-separated integers"),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let data_shape = parse_data_shape(&args.data_shape)?;

    let config = PipelineConfig {
        parser: ParserConfig {
            path_imglist: args.path_imglist,
            path_imgrec: args.path_imgrec,
            label_width: args.label_width,
            data_shape,
            preprocess_threads: args.preprocess_threads,
            verbose: !args.quiet,
            num_parts: args.num_parts,
            part_index: args.part_index,
            ..ParserConfig::default()
        },
        iter: IterConfig {
            shuffle: args.shuffle,
            seed: args.seed,
            verbose: !args.quiet,
        },
        batch_size: args.batch_size,
        ..PipelineConfig::default()
    };

    let mut pipeline = build_pipeline(config, Arc::new(FixtureCodec), &NullAugmenterFactory)
        .context("failed to build pipeline")?;

    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap(),
    );

    let mut instances = 0u64;
    let mut batches = 0u64;
    while pipeline.next()? {
        let batch = pipeline.value();
        instances += batch.size as u64;
        batches += 1;
        if !args.quiet {
            pb.set_message(format!("{batches} batches, {instances} instances"));
            pb.tick();
        }
    }
    pb.finish_and_clear();

    println!("read {instances} instances across {batches} batches");
    Ok(())
}
