#![allow(dead_code)]

//! Shared constants for end-to-end tests

// ============================================================================
// Resources
// ============================================================================

pub const PROJECT_ID: &str = "test-project";

pub const JOBS_SUBSCRIPTION: &str = "jobs";

pub const JOBS_TOPIC: &str = "jobs-topic";

// ============================================================================
// Auth
// ============================================================================

pub const TEST_TOKEN: &str = "test-token";

pub const METADATA_TOKEN: &str = "metadata-token";

// ============================================================================
// Long-running job settings
// ============================================================================

pub const EXTEND_BY_MS: u64 = 15_000;

pub const PERIOD_MS: u64 = 10_000;

/// base64("hello")
pub const HELLO_B64: &str = "aGVsbG8=";
