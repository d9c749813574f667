//! Write-ahead log tests

mod replay_tests;
