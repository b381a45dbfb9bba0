pub mod dialects;
pub mod output;
pub mod parse;
pub mod stats;

pub use dialects::run_dialects;
pub use parse::run_parse;
pub use stats::run_stats;
