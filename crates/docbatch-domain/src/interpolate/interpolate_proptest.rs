//! Property-based tests for interpolation.
