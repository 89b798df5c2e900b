//! Cart integration tests.

mod support;
mod live;
