//! Integration tests for the query grader.

pub mod audit_test;
pub mod catalog_test;
pub mod postgres_test;
pub mod verify_test;
