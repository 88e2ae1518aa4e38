//! # Grid
//!
//! The run mask selects which cells of the input grid are simulated.
//! Enabled cells are split statically across workers by striding: cell `i`
//! of the row-major enabled list goes to worker `i % workers`.

use crate::{CohortId, TundraError};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMask {
    rows: Vec<Vec<bool>>,
}

impl RunMask {
    /// A 1x1 grid with its only cell enabled.
    #[must_use]
    pub fn single_cell() -> Self {
        Self {
            rows: vec![vec![true]],
        }
    }

    /// Build from integer rows (non-zero = enabled). Rows must be the same
    /// length.
    pub fn from_rows(rows: Vec<Vec<i64>>) -> Result<Self, TundraError> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || width == 0 {
            return Err(TundraError::Configuration("run mask is empty".to_string()));
        }
        if let Some(bad) = rows.iter().position(|r| r.len() != width) {
            return Err(TundraError::Configuration(format!(
                "run mask row {} has {} columns, expected {}",
                bad,
                rows[bad].len(),
                width
            )));
        }
        Ok(Self {
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(|v| v != 0).collect())
                .collect(),
        })
    }

    /// (rows, cols)
    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        (self.rows.len(), self.rows.first().map(Vec::len).unwrap_or(0))
    }

    #[must_use]
    pub fn is_enabled(&self, cell: CohortId) -> bool {
        self.rows
            .get(cell.row as usize)
            .and_then(|r| r.get(cell.col as usize))
            .copied()
            .unwrap_or(false)
    }

    fn cells(&self, enabled: bool) -> Vec<CohortId> {
        let mut out = Vec::new();
        for (r, row) in self.rows.iter().enumerate() {
            for (c, &on) in row.iter().enumerate() {
                if on == enabled {
                    out.push(CohortId::new(r as u32, c as u32));
                }
            }
        }
        out
    }

    /// Enabled cells in row-major order.
    #[must_use]
    pub fn enabled_cells(&self) -> Vec<CohortId> {
        self.cells(true)
    }

    #[must_use]
    pub fn disabled_cells(&self) -> Vec<CohortId> {
        self.cells(false)
    }

    /// Keep only the listed cells enabled. Listed cells outside the mask, or
    /// disabled in it, stay disabled.
    #[must_use]
    pub fn restrict(&self, cells: &[CohortId]) -> Self {
        let wanted: BTreeSet<CohortId> = cells.iter().copied().collect();
        for cell in &wanted {
            if !self.is_enabled(*cell) {
                tracing::warn!("Cell {} is not enabled in the run mask; ignoring", cell);
            }
        }
        let rows = self
            .rows
            .iter()
            .enumerate()
            .map(|(r, row)| {
                row.iter()
                    .enumerate()
                    .map(|(c, &on)| on && wanted.contains(&CohortId::new(r as u32, c as u32)))
                    .collect()
            })
            .collect();
        Self { rows }
    }
}

/// Split cells across `workers` by striding. Never returns empty partitions.
#[must_use]
pub fn partition(cells: &[CohortId], workers: usize) -> Vec<Vec<CohortId>> {
    let workers = workers.clamp(1, cells.len().max(1));
    let mut parts = vec![Vec::new(); workers];
    for (i, cell) in cells.iter().enumerate() {
        parts[i % workers].push(*cell);
    }
    parts.retain(|p| !p.is_empty());
    parts
}
