//! End-to-end tests for the ledger, the aggregator and the HTTP dispatcher

pub mod aggregation_test;
pub mod fixtures;
pub mod http_test;
pub mod storage_test;
