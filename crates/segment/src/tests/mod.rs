mod file_set_tests;
