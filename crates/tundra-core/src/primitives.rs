//! # Fixed Primitives
//!
//! Hardcoded constants of the controller: snapshot format identifiers,
//! model-state capacities and the default convergence criteria.
//!
//! Capacities match the layer and PFT dimensions the process kernels are
//! built against; a snapshot that exceeds them is structurally invalid.

/// Magic bytes for the restart snapshot format header.
pub const MAGIC_BYTES: &[u8; 4] = b"TSNP";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot layout.
pub const FORMAT_VERSION: u8 = 1;

/// Header length: magic (4) + version (1) + BLAKE3 digest (32).
pub const HEADER_LEN: usize = 37;

/// Maximum accepted size of an encoded snapshot.
///
/// Validated before deserialization so a damaged restart file cannot
/// trigger an unbounded allocation.
pub const MAX_SNAPSHOT_SIZE: usize = 16 * 1024 * 1024; // 16 MB

// =============================================================================
// MODEL-STATE CAPACITIES
// =============================================================================

/// Plant functional types per cohort.
pub const NUM_PFT: usize = 10;

/// Years of phenology history kept per PFT (running 10-year means).
pub const PHENOLOGY_HISTORY_YEARS: usize = 10;

/// Maximum number of fine-root layers.
pub const MAX_ROOT_LAYERS: usize = 10;

/// Maximum number of snow layers.
pub const MAX_SNOW_LAYERS: usize = 6;

/// Maximum number of soil layers (moss + shallow + deep organic + mineral).
pub const MAX_SOIL_LAYERS: usize = 22;

/// Maximum number of rock layers below the soil column.
pub const MAX_ROCK_LAYERS: usize = 5;

/// Maximum number of freeze/thaw fronts in the ground.
pub const MAX_FRONTS: usize = 10;

/// Months in a simulated year.
pub const MONTHS_PER_YEAR: usize = 12;

/// Mineral layer thicknesses of the cold-start column, in metres.
pub const MINERAL_THICKNESSES: [f64; 15] = [
    0.1, 0.1, 0.1, 0.1, 0.2, 0.2, 0.2, 0.3, 0.3, 0.3, 0.3, 0.5, 0.5, 1.0, 1.0,
];

// =============================================================================
// CONVERGENCE DEFAULTS
// =============================================================================

/// Trailing window, in years, over which inter-annual change is examined.
pub const DEFAULT_CONVERGENCE_WINDOW: u32 = 10;

/// Maximum relative inter-annual change still counted as stable.
pub const DEFAULT_CONVERGENCE_TOLERANCE: f64 = 1e-4;

/// Years that must elapse before convergence may be declared.
pub const DEFAULT_CONVERGENCE_MIN_YEARS: u32 = 100;

/// Floor for the denominator of the relative change.
pub const RELATIVE_CHANGE_FLOOR: f64 = 1e-9;
