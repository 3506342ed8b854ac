//! Sinks for normalized events.

use std::io::Write;

use crate::config::OutputFormat;
use crate::csv;
use crate::error::Result;
use crate::event::NormalizedEvent;

/// Receives normalized events in order.
pub trait EventSink {
    /// Accept one event.
    fn emit(&mut self, event: NormalizedEvent) -> Result<()>;
}

impl EventSink for Vec<NormalizedEvent> {
    fn emit(&mut self, event: NormalizedEvent) -> Result<()> {
        self.push(event);
        Ok(())
    }
}

/// Writes one line per event and flushes after each, so downstream
/// consumers in a pipe see changes immediately.
pub struct OutputWriter<W: Write> {
    writer: W,
    format: OutputFormat,
    lines: u64,
}

impl<W: Write> OutputWriter<W> {
    /// Create a writer in the given format.
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self {
            writer,
            format,
            lines: 0,
        }
    }

    /// Number of lines written so far.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for OutputWriter<W> {
    fn emit(&mut self, event: NormalizedEvent) -> Result<()> {
        match self.format {
            OutputFormat::Csv => {
                let line = csv::format(&event.path.to_string_lossy(), &event.kind);
                writeln!(self.writer, "{line}")?;
            }
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.writer, &event)?;
                self.writer.write_all(b"\n")?;
            }
        }
        self.writer.flush()?;
        self.lines += 1;
        Ok(())
    }
}
