use taskbridge::global;

// TASKBRIDGE_INIT is observed once per process, so the opt-in path gets a
// test binary of its own.
#[test]
fn env_opt_in_installs_on_first_use() {
    std::env::set_var(global::ENV_INIT, "1");

    assert!(!global::is_initialized());
    let handle = global::run_async(async { 5 }).unwrap();
    assert_eq!(handle.result().unwrap(), 5);

    // The first use installed a default executor.
    assert!(global::is_initialized());
    assert_eq!(global::get().unwrap().name(), "taskbridge-global");

    global::reset();
}
