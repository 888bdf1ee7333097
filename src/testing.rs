//! Testing utilities for rowchain pipelines.
//!
//! - **Fixtures**: the small mixed-type `events` table and larger numeric tables
//!   with exactly representable sums
//! - **Probe**: a pass-through stage that counts how often, and over how many
//!   rows, it was called, for asserting short-circuit behavior
//! - **Assertions**: float comparison and fault-location checks
//! - **Mock I/O**: JSON source documents written to temporary files
//!
//! # Quick Start
//!
//! ```
//! use rowchain::*;
//! use rowchain::testing::*;
//!
//! # fn main() -> rowchain::Result<()> {
//! let source = events_source()?;
//! let summary = Pipeline::new(events_schema())
//!     .count()?
//!     .process(EVENTS_TABLE, &[&source])?;
//! assert_eq!(summary.rows_read, 2);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod probe;

#[cfg(feature = "io-json")]
pub mod mock_io;

pub use assertions::*;
pub use fixtures::*;
pub use probe::*;

#[cfg(feature = "io-json")]
pub use mock_io::*;
