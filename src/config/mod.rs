//! Run configuration
//!
//! The YAML file has three sections: `system` (particles, box and grid),
//! `simulation` (time stepping, cadences, thermostat) and `field`
//! (smoothing width and external-potential functional). Everything is
//! validated before any stepping begins.

mod args;

pub use args::Args;

use crate::error::{HpfError, Result};
use crate::field::{GaussianFilter, Grid};
use crate::particles::{maxwell_boltzmann, random_positions, uniform_lattice, wrap_position, InitialState};
use crate::potential::{ExternalPotential, FloryHuggins, Ideal, Incompressible};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SimConfig {
    pub system: SystemConfig,
    pub simulation: SimulationConfig,
    pub field: FieldConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    pub n_particles: usize,
    pub n_types: usize,
    /// Mass per particle type
    pub masses: Vec<f64>,
    /// Display label per type, at most five characters
    #[serde(default)]
    pub type_names: Vec<String>,
    pub box_lengths: [f64; 3],
    /// Grid points per axis
    pub grid_points: usize,
    pub positions: PositionConfig,
    #[serde(default)]
    pub velocities: VelocityConfig,
    pub types: TypeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type")]
pub enum PositionConfig {
    /// Cubic lattice at half-spacing offsets, topped up at random
    #[serde(rename = "lattice")]
    Lattice {
        #[serde(default)]
        seed: u64,
    },
    #[serde(rename = "random")]
    Random {
        #[serde(default)]
        seed: u64,
    },
    #[serde(rename = "explicit")]
    Explicit { coords: Vec<[f64; 3]> },
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(tag = "type")]
pub enum VelocityConfig {
    #[default]
    #[serde(rename = "zero")]
    Zero,
    #[serde(rename = "maxwell_boltzmann")]
    MaxwellBoltzmann {
        temperature: f64,
        #[serde(default)]
        seed: u64,
    },
    #[serde(rename = "explicit")]
    Explicit { velocities: Vec<[f64; 3]> },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type")]
pub enum TypeConfig {
    /// Consecutive blocks: the first `counts[0]` particles are type 0, and so on
    #[serde(rename = "blocks")]
    Blocks { counts: Vec<usize> },
    #[serde(rename = "explicit")]
    Explicit { types: Vec<usize> },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SimulationConfig {
    pub time_step: f64,
    pub n_steps: usize,
    /// Frame cadence
    pub output_interval: usize,
    /// Field refresh cadence
    #[serde(default = "default_quasi_interval")]
    pub quasi_interval: usize,
    #[serde(default = "default_kb")]
    pub k_boltzmann: f64,
    pub thermostat: Option<ThermostatConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ThermostatConfig {
    pub target_temperature: f64,
    pub relaxation_time: f64,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FieldConfig {
    /// Gaussian smoothing width
    pub sigma: f64,
    /// Reference density, `Np / V` when absent
    pub phi0: Option<f64>,
    pub potential: PotentialConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type")]
pub enum PotentialConfig {
    #[serde(rename = "ideal")]
    Ideal,
    #[serde(rename = "incompressible")]
    Incompressible { kappa: f64 },
    #[serde(rename = "flory_huggins")]
    FloryHuggins { kappa: f64, chi: Vec<Vec<f64>> },
}

fn default_quasi_interval() -> usize {
    1
}

/// kJ/mol/K, so that `kB·T` at 298 K is 2.479 kJ/mol.
fn default_kb() -> f64 {
    2.479 / 298.0
}

fn positive(value: f64, what: &str) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(HpfError::config(format!("{what} must be positive, got {value}")))
    }
}

fn sized<T>(items: &[T], n: usize, what: &str) -> Result<()> {
    if items.len() == n {
        Ok(())
    } else {
        Err(HpfError::config(format!(
            "{what} has {} entries, expected {n}",
            items.len()
        )))
    }
}

impl SimConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: SimConfig = serde_yml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_yml::to_string(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let system = &self.system;
        let sim = &self.simulation;
        let n = system.n_particles;

        if n == 0 {
            return Err(HpfError::config("n_particles must be at least 1"));
        }
        if system.n_types == 0 {
            return Err(HpfError::config("n_types must be at least 1"));
        }
        sized(&system.masses, system.n_types, "masses")?;
        for &m in &system.masses {
            positive(m, "particle mass")?;
        }
        if !system.type_names.is_empty() {
            sized(&system.type_names, system.n_types, "type_names")?;
            if let Some(name) = system.type_names.iter().find(|s| s.chars().count() > 5) {
                return Err(HpfError::config(format!(
                    "type name {name:?} is longer than 5 characters"
                )));
            }
        }
        for &l in &system.box_lengths {
            positive(l, "box length")?;
        }
        if system.grid_points < 2 {
            return Err(HpfError::config("grid_points must be at least 2"));
        }

        match &system.positions {
            PositionConfig::Explicit { coords } => sized(coords, n, "positions")?,
            PositionConfig::Lattice { .. } | PositionConfig::Random { .. } => {}
        }
        match &system.velocities {
            VelocityConfig::Explicit { velocities } => sized(velocities, n, "velocities")?,
            VelocityConfig::MaxwellBoltzmann { temperature, .. } => {
                if !(*temperature >= 0.0) {
                    return Err(HpfError::config("initial temperature must be non-negative"));
                }
            }
            VelocityConfig::Zero => {}
        }
        match &system.types {
            TypeConfig::Blocks { counts } => {
                sized(counts, system.n_types, "type counts")?;
                let total: usize = counts.iter().sum();
                if total != n {
                    return Err(HpfError::config(format!(
                        "type counts sum to {total}, expected {n}"
                    )));
                }
            }
            TypeConfig::Explicit { types } => {
                sized(types, n, "types")?;
                if let Some(&t) = types.iter().find(|&&t| t >= system.n_types) {
                    return Err(HpfError::config(format!(
                        "particle type {t} outside [0, {})",
                        system.n_types
                    )));
                }
            }
        }

        positive(sim.time_step, "time_step")?;
        positive(sim.k_boltzmann, "k_boltzmann")?;
        if sim.output_interval == 0 {
            return Err(HpfError::config("output_interval must be at least 1"));
        }
        if sim.quasi_interval == 0 {
            return Err(HpfError::config("quasi_interval must be at least 1"));
        }
        if let Some(thermostat) = &sim.thermostat {
            positive(thermostat.target_temperature, "thermostat target_temperature")?;
            positive(thermostat.relaxation_time, "thermostat relaxation_time")?;
        }

        positive(self.field.sigma, "sigma")?;
        if let Some(phi0) = self.field.phi0 {
            positive(phi0, "phi0")?;
        }
        match &self.field.potential {
            PotentialConfig::Ideal => {}
            PotentialConfig::Incompressible { kappa } => positive(*kappa, "kappa")?,
            PotentialConfig::FloryHuggins { kappa, chi } => {
                positive(*kappa, "kappa")?;
                sized(chi, system.n_types, "chi")?;
                for (t, row) in chi.iter().enumerate() {
                    sized(row, system.n_types, "chi row")?;
                    for (s, &value) in row.iter().enumerate() {
                        if value != chi[s][t] {
                            return Err(HpfError::config(format!(
                                "chi is not symmetric at ({t}, {s})"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn box_lengths(&self) -> Vector3<f64> {
        Vector3::from(self.system.box_lengths)
    }

    pub fn volume(&self) -> f64 {
        self.system.box_lengths.iter().product()
    }

    pub fn phi0(&self) -> f64 {
        self.field
            .phi0
            .unwrap_or(self.system.n_particles as f64 / self.volume())
    }

    pub fn grid(&self, rank: usize, size: usize) -> Result<Grid> {
        Grid::new(self.system.grid_points, self.box_lengths(), rank, size)
    }

    pub fn filter(&self) -> GaussianFilter {
        GaussianFilter::new(self.field.sigma)
    }

    pub fn type_name(&self, t: usize) -> String {
        self.system
            .type_names
            .get(t)
            .cloned()
            .unwrap_or_else(|| format!("T{t}"))
    }

    pub fn build_potential(&self) -> Box<dyn ExternalPotential> {
        let n_types = self.system.n_types;
        match &self.field.potential {
            PotentialConfig::Ideal => Box::new(Ideal { n_types }),
            PotentialConfig::Incompressible { kappa } => Box::new(Incompressible {
                n_types,
                kappa: *kappa,
                phi0: self.phi0(),
            }),
            PotentialConfig::FloryHuggins { kappa, chi } => Box::new(FloryHuggins {
                compressibility: Incompressible {
                    n_types,
                    kappa: *kappa,
                    phi0: self.phi0(),
                },
                chi: chi.clone(),
            }),
        }
    }

    /// Global initial condition. Deterministic for a given configuration, so
    /// every rank builds the same state and keeps its own share.
    pub fn initial_state(&self) -> Result<InitialState> {
        let system = &self.system;
        let n = system.n_particles;
        let lengths = self.box_lengths();

        let types: Vec<usize> = match &system.types {
            TypeConfig::Blocks { counts } => counts
                .iter()
                .enumerate()
                .flat_map(|(t, &count)| std::iter::repeat(t).take(count))
                .collect(),
            TypeConfig::Explicit { types } => types.clone(),
        };

        let mut positions = match &system.positions {
            PositionConfig::Lattice { seed } => uniform_lattice(n, &lengths, *seed),
            PositionConfig::Random { seed } => random_positions(n, &lengths, *seed),
            PositionConfig::Explicit { coords } => coords.iter().map(|&c| Vector3::from(c)).collect(),
        };
        for p in &mut positions {
            wrap_position(p, &lengths);
        }

        let velocities = match &system.velocities {
            VelocityConfig::Zero => vec![Vector3::zeros(); n],
            VelocityConfig::MaxwellBoltzmann { temperature, seed } => {
                let masses: Vec<f64> = types.iter().map(|&t| system.masses[t]).collect();
                maxwell_boltzmann(&masses, self.simulation.k_boltzmann * temperature, *seed)
            }
            VelocityConfig::Explicit { velocities } => {
                velocities.iter().map(|&v| Vector3::from(v)).collect()
            }
        };

        let names = types.iter().map(|&t| self.type_name(t)).collect();
        let state = InitialState {
            positions,
            velocities,
            types,
            names,
        };
        if state.len() != n {
            return Err(HpfError::config(format!(
                "generated {} particles, expected {n}",
                state.len()
            )));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const CONFIG: &str = r#"
system:
  n_particles: 8
  n_types: 2
  masses: [1.0, 2.0]
  type_names: [A, B]
  box_lengths: [4.0, 4.0, 4.0]
  grid_points: 4
  positions:
    type: lattice
  velocities:
    type: maxwell_boltzmann
    temperature: 300.0
    seed: 3
  types:
    type: blocks
    counts: [5, 3]
simulation:
  time_step: 0.01
  n_steps: 100
  output_interval: 10
  thermostat:
    target_temperature: 300.0
    relaxation_time: 0.1
field:
  sigma: 0.5
  potential:
    type: flory_huggins
    kappa: 0.05
    chi: [[0.0, 5.0], [5.0, 0.0]]
"#;

    #[test]
    fn parses_with_defaults() {
        let config = SimConfig::from_yaml_str(CONFIG).unwrap();
        assert_eq!(config.simulation.quasi_interval, 1);
        assert_relative_eq!(config.simulation.k_boltzmann, 2.479 / 298.0);
        assert_relative_eq!(config.phi0(), 8.0 / 64.0);
        assert_eq!(config.simulation.thermostat.as_ref().unwrap().seed, 0);

        let state = config.initial_state().unwrap();
        assert_eq!(state.types, vec![0, 0, 0, 0, 0, 1, 1, 1]);
        assert_eq!(state.names[7], "B");
        assert_eq!(config.build_potential().n_types(), 2);
    }

    #[test]
    fn rejects_inconsistent_parameters() {
        let cases = [
            ("counts: [5, 3]", "counts: [5, 2]"),
            ("time_step: 0.01", "time_step: -0.01"),
            ("grid_points: 4", "grid_points: 1"),
            ("chi: [[0.0, 5.0], [5.0, 0.0]]", "chi: [[0.0, 5.0], [4.0, 0.0]]"),
            ("masses: [1.0, 2.0]", "masses: [1.0]"),
            ("type_names: [A, B]", "type_names: [A, LONGNAME]"),
            ("output_interval: 10", "output_interval: 0"),
        ];
        for (from, to) in cases {
            let yaml = CONFIG.replace(from, to);
            let err = SimConfig::from_yaml_str(&yaml).unwrap_err();
            assert!(matches!(err, HpfError::Config(_)), "{to}: {err}");
        }
    }

    #[test]
    fn missing_section_is_a_parse_error() {
        let yaml = CONFIG.replace("field:", "fields:");
        assert!(matches!(
            SimConfig::from_yaml_str(&yaml),
            Err(HpfError::Yaml(_))
        ));
    }

    #[test]
    fn file_round_trip() {
        let config = SimConfig::from_yaml_str(CONFIG).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        config.to_file(&path).unwrap();
        let reloaded = SimConfig::from_file(&path).unwrap();
        assert_eq!(reloaded.system.n_particles, 8);
        assert!(matches!(
            reloaded.field.potential,
            PotentialConfig::FloryHuggins { .. }
        ));
    }
}
