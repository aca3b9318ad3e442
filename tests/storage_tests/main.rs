//! On-disk table tests

mod sstable_tests;
