//! Integration test modules for tactus
//!
//! - context: context tree, isolation and ordering
//! - recall: recall hierarchy and ports
//! - resize: graph resizing
//! - concurrency: worker failures, driver thread, tasks

pub mod concurrency;
pub mod context;
pub mod recall;
pub mod resize;
