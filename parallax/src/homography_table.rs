//! Per-tile local alignment transforms.

use std::fmt::Write as _;
use std::path::Path;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::math::DMat3;

/// Grid of right-image transforms, one per output tile.
///
/// Cells are locked independently so concurrent tiles never contend; the
/// grid itself is never resized once built.
#[derive(Debug)]
pub struct LocalHomographyTable {
    rows: usize,
    cols: usize,
    cells: Vec<Mutex<DMat3>>,
}

impl LocalHomographyTable {
    pub fn new_identity(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: (0..rows * cols).map(|_| Mutex::new(DMat3::identity())).collect(),
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    fn cell(&self, row: usize, col: usize) -> &Mutex<DMat3> {
        assert!(
            row < self.rows && col < self.cols,
            "tile ({row}, {col}) outside {}x{} table",
            self.rows,
            self.cols
        );
        &self.cells[row * self.cols + col]
    }

    pub fn get(&self, row: usize, col: usize) -> DMat3 {
        *self.cell(row, col).lock()
    }

    pub fn set(&self, row: usize, col: usize, matrix: DMat3) {
        *self.cell(row, col).lock() = matrix;
    }

    /// Writes `rows cols`, then `row col m0 .. m8` per cell.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut text = format!("{} {}\n", self.rows, self.cols);
        for row in 0..self.rows {
            for col in 0..self.cols {
                let m = self.get(row, col);
                let _ = write!(text, "{row} {col}");
                for v in m.as_array() {
                    let _ = write!(text, " {v}");
                }
                text.push('\n');
            }
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        std::fs::write(path, text).map_err(|e| Error::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let bad = |reason: String| Error::format(path, reason);
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());

        let header = lines.next().ok_or_else(|| bad("empty file".into()))?;
        let dims: Vec<usize> = header
            .split_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| bad(format!("bad header {header:?}: {e}")))?;
        let [rows, cols] = dims[..] else {
            return Err(bad(format!("bad header {header:?}")));
        };

        let table = Self::new_identity(rows, cols);
        let mut seen = vec![false; rows * cols];
        for line in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 11 {
                return Err(bad(format!("expected 11 fields, got {}: {line:?}", fields.len())));
            }
            let index = |s: &str| s.parse::<usize>().map_err(|e| bad(format!("{s:?}: {e}")));
            let (row, col) = (index(fields[0])?, index(fields[1])?);
            if row >= rows || col >= cols {
                return Err(bad(format!("cell ({row}, {col}) outside {rows}x{cols}")));
            }
            let mut m = [0.0; 9];
            for (slot, s) in m.iter_mut().zip(&fields[2..]) {
                *slot = s.parse().map_err(|e| bad(format!("{s:?}: {e}")))?;
            }
            table.set(row, col, DMat3::from_array(m));
            seen[row * cols + col] = true;
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(bad(format!(
                "no entry for cell ({}, {})",
                missing / cols,
                missing % cols
            )));
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::test_output_path;
    use rayon::prelude::*;

    #[test]
    fn test_starts_as_identity() {
        let table = LocalHomographyTable::new_identity(2, 3);
        assert_eq!((table.rows(), table.cols()), (2, 3));
        assert_eq!(table.get(1, 2), DMat3::identity());
    }

    #[test]
    fn test_concurrent_writes_to_distinct_cells() {
        let table = LocalHomographyTable::new_identity(8, 8);
        (0..64usize).into_par_iter().for_each(|i| {
            let m = DMat3::translation(glam::DVec2::new(i as f64, 0.0));
            table.set(i / 8, i % 8, m);
        });
        for i in 0..64 {
            assert_eq!(table.get(i / 8, i % 8)[2], i as f64);
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let table = LocalHomographyTable::new_identity(2, 2);
        table.set(
            0,
            1,
            DMat3::from_array([1.01, 0.002, -3.5, -0.001, 0.99, 0.25, 1e-6, -2e-7, 1.0]),
        );
        let path = test_output_path("local_hom_round_trip.txt");
        table.save(&path).unwrap();

        let loaded = LocalHomographyTable::load(&path).unwrap();
        for (r, c) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            assert_eq!(loaded.get(r, c), table.get(r, c));
        }
    }

    #[test]
    fn test_incomplete_file_is_rejected() {
        let path = test_output_path("local_hom_incomplete.txt");
        std::fs::write(&path, "1 2\n0 0 1 0 0 0 1 0 0 0 1\n").unwrap();
        assert!(matches!(
            LocalHomographyTable::load(&path),
            Err(Error::Format { .. })
        ));

        std::fs::write(&path, "1 1\n0 0 1 0 0\n").unwrap();
        assert!(matches!(
            LocalHomographyTable::load(&path),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let path = test_output_path("local_hom_does_not_exist.txt");
        assert!(matches!(
            LocalHomographyTable::load(&path),
            Err(Error::Io { .. })
        ));
    }
}
