//! Logging setup for test binaries.

/// Installs an `env_logger` backend.
///
/// Honours `RUST_LOG` and defaults to `info`. Output is captured by the
/// test harness. Calling it again is a no-op, so every test may call it.
pub fn init() {
    init_with_level("info");
}

/// Like [`init`] with a different default filter.
pub fn init_with_level(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .is_test(true)
        .try_init();
}
