//! On-disk formats: text lines for job input and output, WriteLogs for spill runs.

pub mod lines;
pub mod writelog;
