pub mod cli;
pub mod config;
pub mod error;
pub mod external;
pub mod network;
pub mod output;
pub mod prompt;
pub mod scanner;
pub mod utils;

pub use config::ScanConfig;
pub use error::{Result, SweepError};
pub use network::CidrRange;
pub use output::ExportFormat;
pub use scanner::{ScanReport, ScanSession, Scanner};
