use tracing_subscriber::filter::LevelFilter;

/// Debug builds log at DEBUG, release builds at INFO. `log` macro calls
/// from the library crates are picked up through the tracing-log bridge.
pub fn setup(is_debug: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let max_level = if is_debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(max_level)
        .try_init()
}
