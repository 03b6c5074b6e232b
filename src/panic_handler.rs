use std::panic;

/// Pretty backtraces in debug builds; in every build the log is flushed
/// before the default hook runs so the last records reach the log file.
pub fn initialize_panic_handler() {
    #[cfg(debug_assertions)]
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        log::error!("Panic: {panic_info}");
        log::logger().flush();

        default_hook(panic_info);

        std::process::exit(1);
    }));
}
