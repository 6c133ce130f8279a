//! Property-based tests for candidate extraction and file-count reconciliation.
