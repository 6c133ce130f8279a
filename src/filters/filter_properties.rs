//! Property-based tests for the copy policy filter.
