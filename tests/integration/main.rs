//! End-to-end tests of the scan pipeline against a deterministic source.

mod mock_source;
mod pipeline;
