//! Sequence-level duration quantization
//!
//! Assigns every note a value from [`NoteDuration::GRID`] with a dynamic
//! program over the position inside the measure, so that rounding errors do
//! not pile up and notes keep landing on beats.
//!
//! State is the measure position on a 16th-note grid. Choosing duration `d`
//! at position `p` moves to `(p + cells(d)) % cells_per_measure` and costs
//! `|actual - d| + 0.05` when the new position is off a quarter-note beat.

use crate::models::music::NoteDuration;

/// Beats per grid cell (one 16th note)
const GRID_UNIT: f64 = 0.25;
/// Grid cells per quarter-note beat
const CELLS_PER_BEAT: usize = 4;
/// Extra cost for landing between beats
const OFF_BEAT_PENALTY: f64 = 0.05;

/// Chosen durations and the total cost of the assignment
#[derive(Debug, Clone, PartialEq)]
pub struct DurationAssignment {
    pub durations: Vec<NoteDuration>,
    pub total_cost: f64,
}

/// Dynamic-programming duration quantizer
#[derive(Debug, Clone, Copy)]
pub struct DurationQuantizer {
    beats_per_measure: f64,
}

impl DurationQuantizer {
    /// Create a quantizer for measures of `beats_per_measure` quarter beats
    pub fn new(beats_per_measure: f64) -> Self {
        Self { beats_per_measure }
    }

    /// Grid cells per measure (at least 1)
    pub fn cells_per_measure(&self) -> usize {
        let cells = (self.beats_per_measure / GRID_UNIT).round_ties_even();
        if cells.is_finite() && cells >= 1.0 {
            cells as usize
        } else {
            1
        }
    }

    /// Quantize durations given in quarter-note beats
    ///
    /// Deterministic: among equal costs the first candidate in evaluation
    /// order (ascending source position, then grid order) is kept, and the
    /// terminal position is the lowest-cost one with ties going to the
    /// smallest position.
    pub fn quantize(&self, durations_beats: &[f64]) -> DurationAssignment {
        let n = durations_beats.len();
        if n == 0 {
            return DurationAssignment {
                durations: Vec::new(),
                total_cost: 0.0,
            };
        }

        let positions = self.cells_per_measure();
        let mut cost = vec![vec![f64::INFINITY; positions]; n + 1];
        // back[i][pos] = (previous position, grid index)
        let mut back: Vec<Vec<Option<(usize, usize)>>> = vec![vec![None; positions]; n + 1];
        cost[0][0] = 0.0;

        for (i, &actual) in durations_beats.iter().enumerate() {
            for pos in 0..positions {
                let here = cost[i][pos];
                if here.is_infinite() {
                    continue;
                }
                for (g, duration) in NoteDuration::GRID.iter().enumerate() {
                    let next_pos = (pos + duration.cells()) % positions;
                    let off_beat = if next_pos % CELLS_PER_BEAT != 0 {
                        OFF_BEAT_PENALTY
                    } else {
                        0.0
                    };
                    let candidate = here + (actual - duration.beats()).abs() + off_beat;
                    if candidate < cost[i + 1][next_pos] {
                        cost[i + 1][next_pos] = candidate;
                        back[i + 1][next_pos] = Some((pos, g));
                    }
                }
            }
        }

        let (mut pos, total_cost) = cost[n]
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::INFINITY), |best, (p, c)| if c < best.1 { (p, c) } else { best });

        let mut durations = vec![NoteDuration::Quarter; n];
        for i in (1..=n).rev() {
            match back[i][pos] {
                Some((prev, g)) => {
                    durations[i - 1] = NoteDuration::GRID[g];
                    pos = prev;
                }
                None => pos = 0,
            }
        }

        DurationAssignment {
            durations,
            total_cost,
        }
    }
}
