mod helpers;
mod tests_run;
