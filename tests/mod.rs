mod common;
mod queue_test;
mod rate_limit_tests;
