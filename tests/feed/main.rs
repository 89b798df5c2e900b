//! Feed integration tests.

mod support;

mod races;
mod reconciler;
