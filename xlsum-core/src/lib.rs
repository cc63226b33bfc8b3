//! xlsum-core: mapping-driven aggregation of workbook cells
//!
//! Loads a `source;destination` mapping table, sums the mapped source cells
//! across a folder of input workbooks, and writes the per-destination totals
//! into an existing output workbook.

pub mod accessor;
pub mod address;
pub mod engine;
pub mod formula;
pub mod mapping;
pub mod reader;
pub mod writer;

pub use accessor::{WorkbookAccessor, XlsxAccessor};
pub use address::{AddressError, CellAddress};
pub use engine::{Calculator, Phase, PhaseError, RunReport};
pub use mapping::{Accumulators, MappingError, MappingTable};
