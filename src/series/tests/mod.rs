mod tests_key;
