//! Inbound/outbound interfaces. The CSV interface replays wallet operations
//! from a file and renders final wallet state, mainly for tooling and tests.

pub mod csv;
