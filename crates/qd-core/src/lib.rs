//! qd-core: shared vocabulary for quantics-desk.
//!
//! Contains:
//! - workflow (workflow types + the fixed workflow → analysis tool map)
//! - directives (`.inp` directive scanning: `name =`, `opname =`)
//! - tools (analysis tool command specs + interactive parameters)
//! - output (pattern extraction from the simulation's text output)
//! - ticker (cancellable periodic task)
//! - error (shared error types)

pub mod directives;
pub mod error;
pub mod output;
pub mod ticker;
pub mod tools;
pub mod workflow;

pub use directives::{find_directive, read_directive, NAME_DIRECTIVE, OPNAME_DIRECTIVE};
pub use error::{CoreError, CoreResult};
pub use output::{parse_quantics_output, ParsedOutput};
pub use ticker::{TickControl, Ticker};
pub use tools::{output_file_name, AnalysisParams, AnalysisTool};
pub use workflow::WorkflowType;
