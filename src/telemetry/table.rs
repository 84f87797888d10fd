use std::fmt;
use std::io;

use serde_json::Value;

/// The type a telemetry column holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Float,
    Bool,
}

/// One value in an [`EpisodeTable`]
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Padding in a non-numeric column
    Missing,
}

impl Cell {
    /// Read a JSON info value as a cell of the given kind, if it has a compatible type
    pub fn from_json(value: &Value, kind: ColumnKind) -> Option<Self> {
        match kind {
            ColumnKind::Int => value
                .as_i64()
                .or_else(|| value.as_f64().filter(|x| x.fract() == 0.0).map(|x| x as i64))
                .map(Cell::Int),
            ColumnKind::Float => value.as_f64().map(Cell::Float),
            ColumnKind::Bool => value.as_bool().map(Cell::Bool),
        }
    }

    /// The value used to pad a column that came up short
    pub fn padding(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Int => Cell::Int(0),
            ColumnKind::Float => Cell::Float(0.0),
            ColumnKind::Bool => Cell::Missing,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Cell::Int(i) => Some(i as f64),
            Cell::Float(x) => Some(x),
            Cell::Bool(_) | Cell::Missing => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(x) => write!(f, "{x}"),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Missing => Ok(()),
        }
    }
}

/// One row per step of a finished episode, with a fixed set of columns
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EpisodeTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl EpisodeTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of the named column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let ix = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[ix]).collect())
    }

    /// Write the table as CSV with a header row
    pub fn write_csv<W: io::Write>(&self, writer: W) -> csv::Result<()> {
        let mut w = csv::Writer::from_writer(writer);
        w.write_record(&self.columns)?;
        for row in &self.rows {
            w.write_record(row.iter().map(Cell::to_string))?;
        }
        w.flush()?;
        Ok(())
    }
}
