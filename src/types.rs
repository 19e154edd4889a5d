//! Engine-neutral representation of query output

use std::cmp::Ordering;
use std::fmt;

/// A single output value, normalized across engines
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Numeric view of the cell. Booleans count as 0/1 since ClickHouse returns them as UInt8.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Null | Cell::Text(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    /// Total order used to canonicalize unordered result sets:
    /// numbers by value, then text, then nulls.
    pub fn canonical_cmp(&self, other: &Cell) -> Ordering {
        fn rank(cell: &Cell) -> u8 {
            match cell {
                Cell::Bool(_) | Cell::Int(_) | Cell::Float(_) => 0,
                Cell::Text(_) => 1,
                Cell::Null => 2,
            }
        }

        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            _ => match (self, other) {
                (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
                _ => rank(self).cmp(&rank(other)),
            },
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("NULL"),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

pub type Row = Vec<Cell>;

/// Collected output of one query execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows sorted with [`Cell::canonical_cmp`], column by column.
    pub fn canonical_rows(&self) -> Vec<&Row> {
        let mut rows: Vec<&Row> = self.rows.iter().collect();
        rows.sort_by(|a, b| {
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| x.canonical_cmp(y))
                .find(|ord| ord.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len()))
        });
        rows
    }
}
