mod common;
mod plan_tests;
mod up_tests;
