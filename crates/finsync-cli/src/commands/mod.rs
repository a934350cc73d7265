pub mod auto;
pub mod bulk;
pub mod common;
pub mod completions;
pub mod conflicts;
pub mod decide;
pub mod resolve;
pub mod scenarios;
pub mod strategies;
