mod helpers;

mod tests_basic;

// Robustness
mod tests_corruption;
