mod checker_test;
mod fakes;
