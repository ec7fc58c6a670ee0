//! Readers that turn solver output into numbers.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// Errors that can occur while reading function values or gradients.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}:{line}: cannot parse `{token}` as a number", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        token: String,
    },

    #[error("no values selected from {}", .path.display())]
    Empty { path: PathBuf },

    #[error("{0}")]
    Message(String),
}

/// Produces the numbers a function needs after its chain has run.
pub trait Reader {
    /// # Errors
    ///
    /// Returns an error if the values cannot be obtained.
    fn read(&self) -> Result<Vec<f64>, ReadError>;
}

/// A [`Reader`] backed by a closure.
pub struct FnReader<F>(F);

/// Wraps a closure as a [`Reader`].
pub fn from_fn<F>(f: F) -> FnReader<F>
where
    F: Fn() -> Result<Vec<f64>, ReadError>,
{
    FnReader(f)
}

impl<F> Reader for FnReader<F>
where
    F: Fn() -> Result<Vec<f64>, ReadError>,
{
    fn read(&self) -> Result<Vec<f64>, ReadError> {
        (self.0)()
    }
}

/// Which rows of a table to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rows {
    All,
    Index(usize),
    Last,
}

/// Reads numbers from a delimited text table.
///
/// By default every field of every non-empty line is read, split on
/// whitespace. Selecting a row and/or column narrows the result, and leading
/// header lines can be skipped. Selected values are returned row by row.
#[derive(Debug, Clone)]
pub struct TableReader {
    path: PathBuf,
    skip: usize,
    rows: Rows,
    column: Option<usize>,
    delimiter: Option<char>,
}

impl TableReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            skip: 0,
            rows: Rows::All,
            column: None,
            delimiter: None,
        }
    }

    /// Skips `lines` leading lines (e.g. headers).
    #[must_use]
    pub fn skip_lines(mut self, lines: usize) -> Self {
        self.skip = lines;
        self
    }

    /// Keeps only the data row at `index` (after skipped lines).
    #[must_use]
    pub fn row(mut self, index: usize) -> Self {
        self.rows = Rows::Index(index);
        self
    }

    /// Keeps only the last data row, the usual place for converged values.
    #[must_use]
    pub fn last_row(mut self) -> Self {
        self.rows = Rows::Last;
        self
    }

    #[must_use]
    pub fn column(mut self, index: usize) -> Self {
        self.column = Some(index);
        self
    }

    /// Splits fields on `delimiter` instead of whitespace.
    #[must_use]
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, text: &str) -> Result<Vec<f64>, ReadError> {
        let lines: Vec<(usize, &str)> = text
            .lines()
            .enumerate()
            .skip(self.skip)
            .filter(|(_, line)| !line.trim().is_empty())
            .collect();

        let selected: &[(usize, &str)] = match self.rows {
            Rows::All => &lines,
            Rows::Index(index) => lines.get(index..=index).unwrap_or(&[]),
            Rows::Last => lines.last().map_or(&[][..], std::slice::from_ref),
        };

        let mut values = Vec::new();
        for &(number, line) in selected {
            let fields: Vec<&str> = match self.delimiter {
                Some(delimiter) => line.split(delimiter).map(str::trim).collect(),
                None => line.split_whitespace().collect(),
            };
            let fields = match self.column {
                Some(column) => fields.get(column..=column).unwrap_or(&[]).to_vec(),
                None => fields,
            };
            for token in fields {
                let token = token.trim_matches('"');
                let value = token.parse::<f64>().map_err(|_| ReadError::Parse {
                    path: self.path.clone(),
                    line: number + 1,
                    token: token.to_owned(),
                })?;
                values.push(value);
            }
        }

        if values.is_empty() {
            return Err(ReadError::Empty {
                path: self.path.clone(),
            });
        }
        Ok(values)
    }
}

impl Reader for TableReader {
    fn read(&self) -> Result<Vec<f64>, ReadError> {
        let text = fs::read_to_string(&self.path).map_err(|source| ReadError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.parse(&text)
    }
}
