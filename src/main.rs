//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Tabpress.
//! The Tabpress project belongs to the Dunimd Team.
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! You may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//!     http://www.apache.org/licenses/LICENSE-2.0
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

//! tabpress: compress delimited text files into framed columnar artifacts and back.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use tabpress::{FileReport, MalformedRowPolicy, Pipeline, PipelineConfig, StatsAggregator};

#[derive(Parser)]
#[command(name = "tabpress")]
#[command(about = "Chunked columnar compression for large delimited text files")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    options: Options,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Options {
    /// Pipeline configuration file (.json, .yaml or .yml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    /// Worker threads for frame compression
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// zstd compression level (1-22)
    #[arg(short, long, global = true)]
    level: Option<i32>,

    /// Rows per chunk
    #[arg(long, global = true)]
    chunk_rows: Option<usize>,

    /// Stream blocks to a journal and patch them at the end instead of buffering in memory
    #[arg(long, global = true)]
    stream: bool,

    /// Skip rows with the wrong number of fields instead of failing the file
    #[arg(long, global = true)]
    skip_malformed: bool,

    /// Files processed concurrently in directory mode
    #[arg(short, long, global = true)]
    jobs: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file or every matching file in a directory
    Compress {
        /// Input file or directory
        input: PathBuf,

        /// Directory for .tpz artifacts
        #[arg(short, long, default_value = "compressed")]
        output: PathBuf,
    },
    /// Reconstruct text from an artifact or a directory of artifacts
    Decompress {
        /// Artifact or directory of artifacts
        input: PathBuf,

        /// Directory for reconstructed files
        #[arg(short, long, default_value = "decompressed")]
        output: PathBuf,
    },
    /// Compress a directory, then decompress the result
    Roundtrip {
        /// Input directory
        input: PathBuf,

        #[arg(long, default_value = "compressed")]
        compressed: PathBuf,

        #[arg(long, default_value = "decompressed")]
        output: PathBuf,
    },
}

fn init_logging(level: Option<LevelFilter>) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.filter_level(level);
    }
    let _ = builder.try_init();
}

fn load_config(options: &Options) -> Result<PipelineConfig> {
    let mut config = match &options.config {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(workers) = options.workers {
        config.worker_count = workers;
    }
    if let Some(level) = options.level {
        config.compression_level = level;
    }
    if let Some(rows) = options.chunk_rows {
        config.chunk_row_count = rows;
    }
    if let Some(jobs) = options.jobs {
        config.files_in_parallel = jobs;
    }
    if options.stream {
        config.buffer_all_for_finalization = false;
    }
    if options.skip_malformed {
        config.on_malformed_row = MalformedRowPolicy::Skip;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn compress(pipeline: &Pipeline<'_>, input: &Path, output: &Path) -> Result<Vec<FileReport>> {
    if input.is_dir() {
        Ok(pipeline.compress_directory(input, output)?)
    } else if input.is_file() {
        Ok(vec![pipeline.compress_file(input, output)])
    } else {
        bail!("input not found: {}", input.display());
    }
}

fn decompress(pipeline: &Pipeline<'_>, input: &Path, output: &Path) -> Result<Vec<FileReport>> {
    if input.is_dir() {
        Ok(pipeline.decompress_directory(input, output)?)
    } else if input.is_file() {
        Ok(vec![pipeline.decompress_file(input, output)])
    } else {
        bail!("input not found: {}", input.display());
    }
}

fn run(cli: Cli, stats: &StatsAggregator) -> Result<()> {
    let config = load_config(&cli.options)?;
    let pipeline = Pipeline::new(config, stats)?;

    let reports = match cli.command {
        Commands::Compress { input, output } => compress(&pipeline, &input, &output)?,
        Commands::Decompress { input, output } => decompress(&pipeline, &input, &output)?,
        Commands::Roundtrip {
            input,
            compressed,
            output,
        } => {
            if !input.is_dir() {
                bail!("roundtrip expects a directory: {}", input.display());
            }
            let mut reports = pipeline.compress_directory(&input, &compressed)?;
            reports.extend(pipeline.decompress_directory(&compressed, &output)?);
            reports
        }
    };

    if reports.is_empty() {
        log::warn!("no input files matched");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.options.log_level);

    let stats = StatsAggregator::new();
    if let Err(err) = run(cli, &stats) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }

    let snapshot = stats.snapshot();
    print!("{}", snapshot.render_summary());
    if snapshot.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
