//! Logging configuration

use std::fmt;
use std::fs::File;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{
    fmt::format::Writer, fmt::layer, fmt::time::FormatTime, fmt::writer::BoxMakeWriter,
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Stamps each event with the wall time elapsed since logging started.
struct RunClock {
    start: Instant,
}

impl FormatTime for RunClock {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write_elapsed(w, self.start.elapsed())
    }
}

/// `+HH:MM:SS`; hours keep counting past a day.
fn write_elapsed(w: &mut impl fmt::Write, elapsed: Duration) -> fmt::Result {
    let secs = elapsed.as_secs();
    write!(w, "+{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// Route log output to `output_path`, or stdout when none is given.
///
/// The level defaults to `info` and follows `RUST_LOG` when set.
pub fn setup_output(output_path: Option<&str>) {
    let (writer, ansi) = match output_path {
        Some(path) => match File::create(path) {
            Ok(log) => (BoxMakeWriter::new(log), false),
            Err(err) => {
                eprintln!("Could not create output file {}: {}", path, err);
                return;
            }
        },
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = layer()
        .with_writer(writer)
        .with_timer(RunClock {
            start: Instant::now(),
        })
        .with_ansi(ansi);
    Registry::default().with(filter).with(fmt_layer).init();
    if let Some(path) = output_path {
        info!("Output will be written to: {}", path);
    }
}
