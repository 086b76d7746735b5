use log::LevelFilter;
use std::io::Write;

/// Initialize the logging system
///
/// Console logging follows the `RUST_LOG` environment variable:
/// - `RUST_LOG=error` - Only errors
/// - `RUST_LOG=warn` - Warnings and errors
/// - `RUST_LOG=info` - Info, warnings, and errors (default)
/// - `RUST_LOG=debug` - Debug and above, including every external command line
///
/// Passing `debug=true` on the command line forces the debug level regardless
/// of `RUST_LOG`.
///
/// ```bash
/// # Show the rsync/ssh invocations deployr composes
/// deployr push debug=true
///
/// # Only show errors
/// RUST_LOG=error deployr diff
/// ```
pub fn init_logger(debug: bool) {
    let level = level_for(debug, std::env::var("RUST_LOG").ok().as_deref());

    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:5}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(level)
        .target(env_logger::Target::Stderr)
        .try_init()
        .ok(); // Ignore error if logger is already initialized
}

fn level_for(debug: bool, rust_log: Option<&str>) -> LevelFilter {
    if debug {
        return LevelFilter::Debug;
    }

    rust_log
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}
