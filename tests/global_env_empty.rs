use taskbridge::{global, Error};

// Companion to the opt-in test: an empty value must not count, and the
// memoized answer needs an unpolluted process to show it.
#[test]
fn empty_env_value_does_not_opt_in() {
    std::env::set_var(global::ENV_INIT, "");

    assert!(matches!(
        global::run_async(async { 0 }),
        Err(Error::NotInitialized)
    ));
    assert!(!global::is_initialized());
}
