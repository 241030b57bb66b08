//! End-to-end tests for the lumen middle-end live in `tests/`.
