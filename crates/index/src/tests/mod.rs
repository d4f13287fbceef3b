mod arena_tests;
mod table_tests;
