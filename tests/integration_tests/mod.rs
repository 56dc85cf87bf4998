//! Integration test modules

mod entry_sync_test;
mod lifecycle_test;
