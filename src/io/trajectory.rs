//! Consumers of output frames. Sinks are only ever driven from rank 0.

use crate::diagnostics::Frame;
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub trait TrajectorySink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Called once after the closing frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps every frame in memory.
#[derive(Debug, Default)]
pub struct MemoryTrajectory {
    pub frames: Vec<Frame>,
}

impl TrajectorySink for MemoryTrajectory {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }
}

/// Tab-separated energy log, one line per frame:
/// `time total potential kinetic temperature px py pz`.
pub struct EnergyLog<W: Write> {
    writer: W,
}

impl EnergyLog<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(EnergyLog::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> EnergyLog<W> {
    pub fn new(writer: W) -> Self {
        EnergyLog { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TrajectorySink for EnergyLog<W> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let p = frame.momentum;
        writeln!(
            self.writer,
            "{:.6}\t{:.10e}\t{:.10e}\t{:.10e}\t{:.6}\t{:.10e}\t{:.10e}\t{:.10e}",
            frame.time,
            frame.total_energy(),
            frame.potential_energy,
            frame.kinetic_energy,
            frame.temperature,
            p.x,
            p.y,
            p.z
        )?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Extended-XYZ trajectory labelled with the particle display names.
pub struct XyzTrajectory<W: Write> {
    writer: W,
    names: Vec<String>,
}

impl XyzTrajectory<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P, names: Vec<String>) -> Result<Self> {
        Ok(XyzTrajectory::new(BufWriter::new(File::create(path)?), names))
    }
}

impl<W: Write> XyzTrajectory<W> {
    pub fn new(writer: W, names: Vec<String>) -> Self {
        XyzTrajectory { writer, names }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TrajectorySink for XyzTrajectory<W> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        writeln!(self.writer, "{}", frame.positions.len())?;
        writeln!(
            self.writer,
            "step={} time={:.6} energy={:.10e}",
            frame.step,
            frame.time,
            frame.total_energy()
        )?;
        for (i, (x, v)) in frame.positions.iter().zip(&frame.velocities).enumerate() {
            let name = self.names.get(i).map_or("X", String::as_str);
            writeln!(
                self.writer,
                "{:<5} {:12.6} {:12.6} {:12.6} {:12.6} {:12.6} {:12.6}",
                name, x.x, x.y, x.z, v.x, v.y, v.z
            )?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use std::fs;

    fn frame(step: usize) -> Frame {
        Frame {
            step,
            time: step as f64 * 0.5,
            positions: vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(0.5, 0.5, 0.5)],
            velocities: vec![Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0)],
            kinetic_energy: 0.5,
            potential_energy: 1.5,
            temperature: 300.0,
            momentum: Vector3::new(1.0, 0.0, -1.0),
            field_pressure: Vector3::zeros(),
            kinetic_pressure: Vector3::zeros(),
        }
    }

    #[test]
    fn energy_log_writes_one_line_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("E.dat");
        let mut log = EnergyLog::create(&path).unwrap();
        log.write_frame(&frame(0)).unwrap();
        log.write_frame(&frame(4)).unwrap();
        log.finish().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let fields: Vec<f64> = lines[1].split('\t').map(|s| s.parse().unwrap()).collect();
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[0], 2.0);
        assert_eq!(fields[1], 2.0);
        assert_eq!(fields[4], 300.0);
        assert_eq!(fields[7], -1.0);
    }

    #[test]
    fn xyz_frame_has_count_comment_and_rows() {
        let mut xyz = XyzTrajectory::new(Vec::new(), vec!["A".into(), "B".into()]);
        xyz.write_frame(&frame(2)).unwrap();
        let text = String::from_utf8(xyz.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "2");
        assert!(lines[1].starts_with("step=2"));
        assert!(lines[3].starts_with("B "));
    }
}
