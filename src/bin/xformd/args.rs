use std::path::PathBuf;

use clap::Parser;

/// A daemon that schedules and executes file-transformation pipelines
/// against bounded per-transformation worker pools.
#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Path to the transformation catalog configuration file.
    pub config: PathBuf,
    /// Directory containing one executable per transformation name.
    pub bin_path: PathBuf,
    /// Overrides the default rendezvous FIFO path clients submit requests to.
    #[arg(long, default_value = "/tmp/sdstore")]
    pub rendezvous: PathBuf,
    /// Caps the number of simultaneously spawned manager tasks. Unset means
    /// uncapped beyond the bounds the sorter's queue capacities already
    /// impose.
    #[arg(long)]
    pub max_concurrent_jobs: Option<usize>,
    /// Enables human-friendly, non-JSON logging.
    #[arg(short, long, default_value_t)]
    pub debug: bool,
}
