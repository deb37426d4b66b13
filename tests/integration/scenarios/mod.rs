pub mod exit_tests;
pub mod leak_tests;
pub mod monitor_tests;
