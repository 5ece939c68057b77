//! Categorized test fixtures shared across this crate's `#[cfg(test)]` unit
//! tests and the crate-level `tests/` integration scenarios, mirroring the
//! teacher's `src/tests/` + `tests/` dual placement: colocated unit tests
//! next to the code they exercise, a categorized fixtures directory for
//! doubles reused across modules, and a top-level `tests/` directory for
//! the testable-property scenarios run against the public `Engine` API.

pub mod fixtures;
