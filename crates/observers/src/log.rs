use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use fado_core::Observer;
use fado_drivers::{Action, Event, Header, LogRow};
use tracing::warn;

const MIN_WIDTH: usize = 8;

/// Writes a fixed-width table of optimization progress.
///
/// One row per gradient pass and per penalty update, with columns
/// `FUN_EVAL`, `GRAD_EVAL`, `FUN_TIME`, `GRAD_TIME`, `FEASIBLE`, the scaled
/// objective and constraint values, and for penalty drivers one `PEN_<name>`
/// column per constraint. Names longer than the column width are truncated.
#[derive(Debug)]
pub struct LogWriter<W: Write> {
    out: W,
    width: usize,
}

impl LogWriter<BufWriter<File>> {
    /// Creates (or truncates) the log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> LogWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, width: 13 }
    }

    /// Sets the column width, which is at least 8.
    #[must_use]
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(MIN_WIDTH);
        self
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_header(&mut self, header: &Header) -> io::Result<()> {
        let fixed = ["FUN_EVAL", "GRAD_EVAL", "FUN_TIME", "GRAD_TIME", "FEASIBLE"];
        let functions = header
            .objectives
            .iter()
            .chain(&header.equalities)
            .chain(&header.inequalities)
            .map(String::as_str);
        let penalties: Vec<String> = if header.penalties {
            header
                .equalities
                .iter()
                .chain(&header.inequalities)
                .map(|name| format!("PEN_{name}"))
                .collect()
        } else {
            Vec::new()
        };

        let line: String = fixed
            .into_iter()
            .chain(functions)
            .chain(penalties.iter().map(String::as_str))
            .map(|name| self.text_cell(&name.chars().take(self.width).collect::<String>()))
            .collect();
        self.write_line(&line)
    }

    fn write_row(&mut self, row: &LogRow) -> io::Result<()> {
        let values = row
            .objectives
            .iter()
            .chain(&row.equalities)
            .chain(&row.inequalities)
            .chain(&row.equality_penalties)
            .chain(&row.inequality_penalties);

        let line: String = [
            self.text_cell(&row.fun_evals.to_string()),
            self.text_cell(&row.grad_evals.to_string()),
            self.number_cell(row.fun_time.as_secs_f64()),
            self.number_cell(row.grad_time.as_secs_f64()),
            self.text_cell(if row.feasible { "YES" } else { "NO" }),
        ]
        .into_iter()
        .chain(values.map(|&value| self.number_cell(value)))
        .collect();
        self.write_line(&line)
    }

    /// Right-aligned in one column.
    fn text_cell(&self, text: &str) -> String {
        format!("{text:>w$}", w = self.width)
    }

    /// Scientific notation, with as many digits as the column leaves room
    /// for after the sign, point and exponent.
    fn number_cell(&self, value: f64) -> String {
        format!("{value:>w$.p$e}", w = self.width, p = self.width - 7)
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }
}

impl<W: Write> Observer<Event, Action> for LogWriter<W> {
    fn observe(&mut self, event: &Event) -> Option<Action> {
        let result = match event {
            Event::Initialized { header } => self.write_header(header),
            Event::GradientEvaluated { row } | Event::PenaltiesUpdated { row } => self.write_row(row),
            Event::FunctionsEvaluated { .. } => Ok(()),
        };
        if let Err(err) = result {
            warn!(%err, "failed to write log");
        }
        None
    }
}
