//! Command-line entry point for particle-field MD runs.

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use hpf_md::config::Args;
use hpf_md::io::{setup_output, EnergyLog, TrajectorySink, XyzTrajectory};
use hpf_md::particles::InitialState;
use hpf_md::{Communicator, ProcessGroup, SimConfig, Simulation};
use tracing::info;

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    setup_output(args.output.as_deref());

    info!("Reading configuration from: {}", args.config_file);
    let mut config = SimConfig::from_file(&args.config_file)
        .wrap_err_with(|| format!("Unable to load configuration file: {}", args.config_file))?;
    if let Some(n_steps) = args.n_steps {
        config.simulation.n_steps = n_steps;
    }
    info!("Configuration loaded:\n{:?}", config);

    let initial = config
        .initial_state()
        .wrap_err("Failed to build the initial state")?;

    #[cfg(feature = "mpi")]
    if args.mpi {
        return run_mpi(&args, &config, &initial);
    }

    ProcessGroup::run(args.ranks, |comm| run_rank(comm, &args, &config, &initial))
        .wrap_err("Simulation failed")?;

    info!("Energy log written to: {}", args.energy_file);
    Ok(())
}

#[cfg(feature = "mpi")]
fn run_mpi(args: &Args, config: &SimConfig, initial: &InitialState) -> Result<()> {
    use color_eyre::eyre::eyre;
    use hpf_md::MpiComm;

    let universe = mpi::initialize().ok_or_else(|| eyre!("MPI was already initialised"))?;
    let comm = MpiComm::new(universe.world());
    if let Err(err) = run_rank(&comm, args, config, initial) {
        // the other processes may be blocked in a collective
        tracing::error!("rank {} failed: {err}", comm.rank());
        comm.abort(1);
    }
    if comm.is_root() {
        info!("Energy log written to: {}", args.energy_file);
    }
    Ok(())
}

/// One rank's share of the run; only the root writes output files.
fn run_rank<C: Communicator>(
    comm: &C,
    args: &Args,
    config: &SimConfig,
    initial: &InitialState,
) -> hpf_md::Result<()> {
    let mut simulation = Simulation::with_state(config, comm, initial)?;
    if !comm.is_root() {
        return simulation.run(None);
    }
    let mut energy = EnergyLog::create(&args.energy_file)?;
    match &args.trajectory_file {
        Some(path) => {
            let mut sinks = Fanout {
                energy: &mut energy,
                trajectory: XyzTrajectory::create(path, initial.names.clone())?,
            };
            simulation.run(Some(&mut sinks))
        }
        None => simulation.run(Some(&mut energy)),
    }
}

/// Writes each frame to the energy log and the trajectory.
struct Fanout<'a, E: TrajectorySink, T: TrajectorySink> {
    energy: &'a mut E,
    trajectory: T,
}

impl<E: TrajectorySink, T: TrajectorySink> TrajectorySink for Fanout<'_, E, T> {
    fn write_frame(&mut self, frame: &hpf_md::Frame) -> hpf_md::Result<()> {
        self.energy.write_frame(frame)?;
        self.trajectory.write_frame(frame)
    }

    fn finish(&mut self) -> hpf_md::Result<()> {
        self.energy.finish()?;
        self.trajectory.finish()
    }
}
