mod concurrency_tests;
mod helpers;
mod recovery_tests;
