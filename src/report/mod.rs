//! Report progress tracking and HTML assembly.

mod assembler;
mod progress;
mod prompts;
mod section;
mod stylesheet;

pub use assembler::{planned_fragments, ReportAssembler};
pub use progress::{BranchReport, BranchSnapshot, MarketReport, ReportSnapshot};
pub use section::{compose, place_toc, ComposedDocument, SectionNode, TocEntry, ROOT_ANCHOR};
pub use stylesheet::{compress_css, SharedStyleSheet};
