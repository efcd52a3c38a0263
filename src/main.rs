//! AFNO Nowcast CLI
//!
//! Command-line interface for inspecting and exercising AFNO filter blocks.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ndarray::Array5;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::StandardNormal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use afno_nowcast::prelude::*;

#[derive(Parser)]
#[command(name = "afno")]
#[command(about = "Adaptive Fourier Neural Operator filter blocks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum BlockKind {
    /// Residual filter block
    Block,
    /// Two-source cross-attention filter block
    Cross,
}

#[derive(Subcommand)]
enum Commands {
    /// List the learnable tensors of a block
    Inspect {
        /// Path to a JSON block config
        #[arg(short, long)]
        config: String,

        /// Which block the config describes
        #[arg(short, long, value_enum, default_value = "block")]
        kind: BlockKind,
    },

    /// Run a forward pass on random input
    Run {
        /// Path to a JSON block config
        #[arg(short, long)]
        config: String,

        #[arg(short, long, value_enum, default_value = "block")]
        kind: BlockKind,

        /// Batch size
        #[arg(short, long, default_value = "2")]
        batch: usize,

        /// Depth (time) steps
        #[arg(long, default_value = "4")]
        depth: usize,

        #[arg(long, default_value = "32")]
        height: usize,

        #[arg(long, default_value = "32")]
        width: usize,

        /// Number of timed repetitions
        #[arg(short, long, default_value = "3")]
        repeats: usize,

        /// Seed for weights and input
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },

    /// Report spectral sparsity of the core filter on random input
    Spectrum {
        /// Channel count
        #[arg(long, default_value = "64")]
        hidden_size: usize,

        #[arg(long, default_value = "8")]
        num_blocks: usize,

        #[arg(long, default_value = "0.01")]
        sparsity_threshold: f64,

        #[arg(long, default_value = "1.0")]
        fraction: f64,

        #[arg(long, default_value = "32")]
        size: usize,

        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Inspect { config, kind } => inspect(&config, kind),
        Commands::Run {
            config,
            kind,
            batch,
            depth,
            height,
            width,
            repeats,
            seed,
        } => run(&config, kind, (batch, depth, height, width), repeats, seed),
        Commands::Spectrum {
            hidden_size,
            num_blocks,
            sparsity_threshold,
            fraction,
            size,
            seed,
        } => spectrum(hidden_size, num_blocks, sparsity_threshold, fraction, size, seed),
    }
}

fn inspect(path: &str, kind: BlockKind) -> Result<()> {
    let params: Vec<(String, Vec<usize>)> = match kind {
        BlockKind::Block => {
            let block = AfnoBlock3d::new(FilterBlockConfig::from_json_file(path)?)?;
            shapes(&block)
        }
        BlockKind::Cross => {
            let block = AfnoCrossAttentionBlock3d::new(CrossFilterBlockConfig::from_json_file(path)?)?;
            shapes(&block)
        }
    };

    let mut total = 0;
    for (name, shape) in &params {
        let count: usize = shape.iter().product();
        total += count;
        println!("{:<20} {:>16} {:>10}", name, format!("{:?}", shape), count);
    }
    println!("{:<20} {:>16} {:>10}", "total", "", total);

    Ok(())
}

fn shapes<P: Parameters>(layer: &P) -> Vec<(String, Vec<usize>)> {
    layer
        .named_parameters()
        .into_iter()
        .map(|(name, p)| (name, p.shape().to_vec()))
        .collect()
}

fn run(
    path: &str,
    kind: BlockKind,
    (batch, depth, height, width): (usize, usize, usize, usize),
    repeats: usize,
    seed: u64,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);

    let forward: Box<dyn Fn() -> afno_nowcast::Result<Array5<f64>>> = match kind {
        BlockKind::Block => {
            let config = FilterBlockConfig::from_json_file(path)
                .with_context(|| format!("loading block config from {}", path))?;
            let shape = volume_shape(config.data_format, batch, config.dim, depth, height, width);
            let block = AfnoBlock3d::with_rng(config, &mut rng)?;
            info!("Block parameters: {}", block.num_parameters());
            let x: Array5<f64> = Array5::random_using(shape, StandardNormal, &mut rng);
            info!("Input shape: {:?}", x.dim());
            Box::new(move || block.forward(&x, false))
        }
        BlockKind::Cross => {
            let config = CrossFilterBlockConfig::from_json_file(path)
                .with_context(|| format!("loading cross block config from {}", path))?;
            let x_shape = volume_shape(config.data_format, batch, config.dim, depth, height, width);
            let y_shape =
                volume_shape(config.data_format, batch, config.context_dim, depth, height, width);
            let block = AfnoCrossAttentionBlock3d::with_rng(config, &mut rng)?;
            info!("Block parameters: {}", block.num_parameters());
            let x: Array5<f64> = Array5::random_using(x_shape, StandardNormal, &mut rng);
            let y: Array5<f64> = Array5::random_using(y_shape, StandardNormal, &mut rng);
            info!("Input shapes: {:?} + {:?}", x.dim(), y.dim());
            Box::new(move || block.forward(&x, &y, false))
        }
    };

    for i in 0..repeats.max(1) {
        let start = Instant::now();
        let out = forward()?;
        let elapsed = start.elapsed();

        let n = out.len() as f64;
        let mean = out.sum() / n;
        let std = (out.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        info!(
            "Run {}: output {:?}, mean {:.4}, std {:.4}, {:.2?}",
            i + 1,
            out.dim(),
            mean,
            std,
            elapsed
        );
    }

    Ok(())
}

fn volume_shape(
    format: DataFormat,
    batch: usize,
    channels: usize,
    depth: usize,
    height: usize,
    width: usize,
) -> (usize, usize, usize, usize, usize) {
    match format {
        DataFormat::ChannelsLast => (batch, depth, height, width, channels),
        DataFormat::ChannelsFirst => (batch, channels, depth, height, width),
    }
}

fn spectrum(
    hidden_size: usize,
    num_blocks: usize,
    sparsity_threshold: f64,
    fraction: f64,
    size: usize,
    seed: u64,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let config = AfnoConfig::new(hidden_size)
        .with_num_blocks(num_blocks)
        .with_sparsity_threshold(sparsity_threshold)
        .with_hard_thresholding_fraction(fraction);
    let core = SpectralMixingCore::with_rng(config, &mut rng)?;

    let x: Array5<f64> = Array5::random_using((1, 4, size, size, hidden_size), StandardNormal, &mut rng);
    let spectrum = core.spectrum(&x)?;
    let window = core.kept_window(size, size);

    let total = spectrum.real.len();
    let nonzero = spectrum.count_nonzero();
    println!("Kept window: rows {:?}, cols {:?}", window.rows, window.cols);
    println!(
        "Non-zero coefficients: {} / {} ({:.1}%)",
        nonzero,
        total,
        100.0 * nonzero as f64 / total.max(1) as f64
    );
    for block in 0..spectrum.num_blocks() {
        println!("  block {:>2}: max |z| = {:.5}", block, spectrum.block_max_norm(block));
    }

    Ok(())
}
