//! Command-line argument parsing

use clap::Parser;

/// Hybrid particle-field molecular dynamics with YAML configuration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config_file: String,

    /// Override output file: (default stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Number of cooperating ranks
    #[arg(short, long, default_value_t = 1)]
    pub ranks: usize,

    /// Run one rank per MPI process instead of threads; `--ranks` is ignored
    #[cfg(feature = "mpi")]
    #[arg(long)]
    pub mpi: bool,

    /// Energy log written on rank 0
    #[arg(long, default_value = "E.dat")]
    pub energy_file: String,

    /// Optional XYZ trajectory written at the output cadence
    #[arg(long)]
    pub trajectory_file: Option<String>,

    /// Override the number of steps
    #[arg(long)]
    pub n_steps: Option<usize>,
}
