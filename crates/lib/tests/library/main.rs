mod apply_tests;
mod resolve_tests;
mod workflow_tests;
