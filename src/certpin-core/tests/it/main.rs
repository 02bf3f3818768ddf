//! Consolidated integration tests for certpin-core.
//!
//! One test binary keeps link time down and lets the modules share the
//! scripted transport in `support`.

mod barrier;
mod pinning;
mod registry;
mod support;
