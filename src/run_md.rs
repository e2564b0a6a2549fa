//! The per-rank simulation driver.
//!
//! One step: advance positions, rebuild layouts, refresh the fields on the
//! quasi-static cadence, interpolate forces, advance velocities, thermostat.
//! Frames are assembled at the start of every `output_interval`-th step and
//! once more after the last step.

use crate::comm::Communicator;
use crate::config::SimConfig;
use crate::diagnostics::{self, Frame};
use crate::error::{HpfError, Result};
use crate::field::FieldEngine;
use crate::forces::FieldUpdater;
use crate::integrator::VelocityVerlet;
use crate::io::TrajectorySink;
use crate::layout::{Layout, LayoutManager};
use crate::particles::{InitialState, ParticleSet};
use crate::potential::ExternalPotential;
use crate::thermostat::CsvrThermostat;
use std::time::Instant;
use tracing::{debug, info};

pub struct Simulation<'c, C: Communicator> {
    comm: &'c C,
    engine: FieldEngine,
    layout_manager: LayoutManager,
    layouts: Vec<Layout>,
    fields: FieldUpdater,
    functional: Box<dyn ExternalPotential>,
    integrator: VelocityVerlet,
    thermostat: Option<CsvrThermostat>,
    particles: ParticleSet,
    masses: Vec<f64>,
    n_particles: usize,
    n_steps: usize,
    output_interval: usize,
    quasi_interval: usize,
    k_boltzmann: f64,
    current_step: usize,
}

impl<'c, C: Communicator> Simulation<'c, C> {
    pub fn new(config: &SimConfig, comm: &'c C) -> Result<Self> {
        let initial = config.initial_state()?;
        Self::with_state(config, comm, &initial)
    }

    /// Set up from an explicit global initial state. Every rank must pass the
    /// same state.
    pub fn with_state(config: &SimConfig, comm: &'c C, initial: &InitialState) -> Result<Self> {
        let n_types = config.system.n_types;
        let engine = FieldEngine::new(config.grid(comm.rank(), comm.size())?);
        let mut particles = ParticleSet::partition(initial, n_types, comm.rank(), comm.size())?;
        let functional = config.build_potential();
        let sim = &config.simulation;

        let layout_manager = LayoutManager::new(n_types);
        let by_type = particles.positions_by_type();
        let layouts = layout_manager.decompose_types(&engine, &by_type)?;
        let mut fields = FieldUpdater::new(&engine, n_types, config.filter());
        fields.refresh_fields(comm, &engine, &layouts, &by_type, functional.as_ref(), true)?;
        fields.interpolate_forces(comm, &engine, &layouts, &by_type, &mut particles)?;

        let thermostat = sim.thermostat.as_ref().map(|t| {
            CsvrThermostat::new(
                t.target_temperature,
                sim.k_boltzmann,
                t.relaxation_time,
                initial.len(),
                t.seed,
            )
        });

        if comm.is_root() {
            let grid = engine.grid();
            info!(
                "{} particles of {} types on {} ranks, grid {}^3, box {:?}",
                initial.len(),
                n_types,
                comm.size(),
                grid.nv,
                grid.lengths.as_slice()
            );
        }

        Ok(Simulation {
            comm,
            engine,
            layout_manager,
            layouts,
            fields,
            functional,
            integrator: VelocityVerlet::new(sim.time_step),
            thermostat,
            particles,
            masses: config.system.masses.clone(),
            n_particles: initial.len(),
            n_steps: sim.n_steps,
            output_interval: sim.output_interval,
            quasi_interval: sim.quasi_interval,
            k_boltzmann: sim.k_boltzmann,
            current_step: 0,
        })
    }

    pub fn particles(&self) -> &ParticleSet {
        &self.particles
    }

    pub fn fields(&self) -> &FieldUpdater {
        &self.fields
    }

    pub fn engine(&self) -> &FieldEngine {
        &self.engine
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn time(&self) -> f64 {
        self.current_step as f64 * self.integrator.dt
    }

    /// Advance by one time step.
    pub fn step(&mut self) -> Result<()> {
        let step = self.current_step;
        self.advance(step)
            .map_err(|err| err.at_step(self.comm.rank(), step))?;
        self.current_step += 1;
        Ok(())
    }

    fn advance(&mut self, step: usize) -> Result<()> {
        let lengths = self.engine.grid().lengths;
        self.integrator
            .step_position(&mut self.particles, &self.masses, &lengths);
        if !self.particles.is_finite() {
            return Err(HpfError::NumericalDivergence {
                rank: self.comm.rank(),
                step,
            });
        }

        let by_type = self.particles.positions_by_type();
        self.layouts = self.layout_manager.decompose_types(&self.engine, &by_type)?;
        if (step + 1) % self.quasi_interval == 0 {
            let compute_potential = self.is_output_step(step + 1);
            self.fields.refresh_fields(
                self.comm,
                &self.engine,
                &self.layouts,
                &by_type,
                self.functional.as_ref(),
                compute_potential,
            )?;
        }
        self.fields.interpolate_forces(
            self.comm,
            &self.engine,
            &self.layouts,
            &by_type,
            &mut self.particles,
        )?;
        self.integrator.step_velocity(&mut self.particles, &self.masses);

        if let Some(thermostat) = &mut self.thermostat {
            let alpha = thermostat.apply(
                self.comm,
                &mut self.particles,
                &self.masses,
                self.integrator.dt,
                step,
            )?;
            if self.comm.is_root() {
                debug!(step, alpha, "velocities rescaled");
            }
        }
        Ok(())
    }

    fn is_output_step(&self, step: usize) -> bool {
        step % self.output_interval == 0 || step == self.n_steps
    }

    /// Refresh every field from the current positions with the potential kept.
    pub fn refresh(&mut self) -> Result<()> {
        let by_type = self.particles.positions_by_type();
        self.layouts = self.layout_manager.decompose_types(&self.engine, &by_type)?;
        self.fields.refresh_fields(
            self.comm,
            &self.engine,
            &self.layouts,
            &by_type,
            self.functional.as_ref(),
            true,
        )
    }

    /// Assemble the diagnostics of the current state. Collective; only rank 0
    /// gets a frame back.
    pub fn frame(&self) -> Result<Option<Frame>> {
        let comm = self.comm;
        diagnostics::check_finite(comm, &self.particles, self.current_step)?;

        let kinetic_energy = diagnostics::kinetic_energy(comm, &self.particles, &self.masses)?;
        let potential_energy = diagnostics::potential_energy(
            comm,
            &self.engine,
            &self.fields,
            self.functional.as_ref(),
        )?;
        let momentum = diagnostics::center_of_mass_momentum(comm, &self.particles, &self.masses)?;
        let field_pressure =
            diagnostics::pressure(comm, &self.engine, &self.fields, self.functional.as_ref())?;
        let kinetic_pressure = diagnostics::kinetic_pressure(
            comm,
            &self.particles,
            &self.masses,
            self.engine.grid().volume,
        )?;
        let gathered = diagnostics::gather_state(comm, &self.particles, self.n_particles)?;

        Ok(gathered.map(|(positions, velocities)| Frame {
            step: self.current_step,
            time: self.time(),
            positions,
            velocities,
            kinetic_energy,
            potential_energy,
            temperature: diagnostics::temperature(
                kinetic_energy,
                self.k_boltzmann,
                self.n_particles,
            ),
            momentum,
            field_pressure,
            kinetic_pressure,
        }))
    }

    fn emit(&self, sink: &mut Option<&mut dyn TrajectorySink>) -> Result<()> {
        let Some(frame) = self.frame()? else {
            return Ok(());
        };
        info!(
            "step {:>8}  t = {:.4}  E = {:.6e}  U = {:.6e}  K = {:.6e}  T = {:.3}",
            frame.step,
            frame.time,
            frame.total_energy(),
            frame.potential_energy,
            frame.kinetic_energy,
            frame.temperature
        );
        if let Some(sink) = sink.as_mut() {
            sink.write_frame(&frame)?;
        }
        Ok(())
    }

    /// Run the remaining steps. Frames go to `sink` on rank 0 only; other
    /// ranks may pass `None`.
    pub fn run(&mut self, mut sink: Option<&mut dyn TrajectorySink>) -> Result<()> {
        let start = Instant::now();
        while self.current_step < self.n_steps {
            if self.current_step % self.output_interval == 0 {
                self.emit(&mut sink)
                    .map_err(|err| err.at_step(self.comm.rank(), self.current_step))?;
            }
            self.step()?;
        }

        let closing = self.current_step;
        self.refresh()
            .and_then(|_| self.emit(&mut sink))
            .map_err(|err| err.at_step(self.comm.rank(), closing))?;
        if self.comm.is_root() {
            if let Some(sink) = sink.as_mut() {
                sink.finish()?;
            }
            info!(
                "{} steps finished in {:.3} s",
                self.n_steps,
                start.elapsed().as_secs_f64()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcess;
    use crate::io::MemoryTrajectory;

    const CONFIG: &str = r#"
system:
  n_particles: 8
  n_types: 2
  masses: [1.0, 1.0]
  box_lengths: [4.0, 4.0, 4.0]
  grid_points: 4
  positions:
    type: lattice
  velocities:
    type: maxwell_boltzmann
    temperature: 1.0
    seed: 5
  types:
    type: blocks
    counts: [4, 4]
simulation:
  time_step: 0.01
  n_steps: 10
  output_interval: 4
  k_boltzmann: 1.0
field:
  sigma: 0.5
  potential:
    type: incompressible
    kappa: 1.0
"#;

    #[test]
    fn frames_follow_output_cadence_plus_closing_frame() {
        let config = SimConfig::from_yaml_str(CONFIG).unwrap();
        let comm = SingleProcess;
        let mut sim = Simulation::new(&config, &comm).unwrap();
        let mut sink = MemoryTrajectory::default();
        sim.run(Some(&mut sink)).unwrap();

        let steps: Vec<_> = sink.frames.iter().map(|f| f.step).collect();
        assert_eq!(steps, vec![0, 4, 8, 10]);
        assert_eq!(sim.current_step(), 10);
        assert!(sink.frames.iter().all(|f| f.positions.len() == 8));
    }

    #[test]
    fn output_steps_include_the_last_one() {
        let config = SimConfig::from_yaml_str(CONFIG).unwrap();
        let comm = SingleProcess;
        let sim = Simulation::new(&config, &comm).unwrap();
        assert!(sim.is_output_step(4));
        assert!(sim.is_output_step(10));
        assert!(!sim.is_output_step(9));
    }

    #[test]
    fn runaway_velocities_abort_with_step() {
        let config = SimConfig::from_yaml_str(CONFIG).unwrap();
        let mut initial = config.initial_state().unwrap();
        initial.velocities[2].x = f64::INFINITY;
        let comm = SingleProcess;
        let mut sim = Simulation::with_state(&config, &comm, &initial).unwrap();
        let err = sim.step().unwrap_err();
        assert!(matches!(err, HpfError::NumericalDivergence { step: 0, .. }));
    }
}
