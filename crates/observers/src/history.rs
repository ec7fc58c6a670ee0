use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use fado_core::Observer;
use fado_drivers::{Action, Event, Header, HistoryRecord};
use tracing::warn;

/// Writes one line per function pass: the pass index followed by the raw
/// value of every function.
///
/// The first line names the columns: `ITER` and then the functions in
/// canonical order. Lines are flushed as they are written so the file can be
/// followed while the optimization runs.
#[derive(Debug)]
pub struct HistoryWriter<W: Write> {
    out: W,
    delimiter: String,
}

impl HistoryWriter<BufWriter<File>> {
    /// Creates (or truncates) the history file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> HistoryWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            delimiter: ", ".into(),
        }
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_header(&mut self, header: &Header) -> io::Result<()> {
        let mut line = String::from("ITER");
        for name in header.functions() {
            line.push_str(&self.delimiter);
            line.push_str(name);
        }
        self.write_line(&line)
    }

    fn write_record(&mut self, record: &HistoryRecord) -> io::Result<()> {
        let mut line = record.index.to_string();
        for value in &record.values {
            line.push_str(&self.delimiter);
            line.push_str(&value.to_string());
        }
        self.write_line(&line)
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }
}

impl<W: Write> Observer<Event, Action> for HistoryWriter<W> {
    fn observe(&mut self, event: &Event) -> Option<Action> {
        let result = match event {
            Event::Initialized { header } => self.write_header(header),
            Event::FunctionsEvaluated { record } => self.write_record(record),
            Event::GradientEvaluated { .. } | Event::PenaltiesUpdated { .. } => Ok(()),
        };
        if let Err(err) = result {
            warn!(%err, "failed to write history");
        }
        None
    }
}
