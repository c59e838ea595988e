mod logger;
mod sync;
mod widget;

use data::{Period, SyncConfig};
use sync::SyncCommand;
use widget::LogWidget;

#[tokio::main]
async fn main() {
    logger::setup(cfg!(debug_assertions)).expect("Failed to initialize logger");

    std::panic::set_hook(Box::new(|info| {
        let location = info.location().map_or_else(
            || "unknown location".to_string(),
            |loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()),
        );
        let msg = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        log::error!("PANIC at {location}: {msg}");
        eprintln!("PANIC at {location}: {msg}");
        // Also print a backtrace
        let bt = std::backtrace::Backtrace::force_capture();
        eprintln!("Backtrace:\n{bt}");
    }));

    let config = SyncConfig::load(std::env::args().nth(1));
    log::info!("Starting candle sync for {}", config.market);

    let (commands, receiver) = tokio::sync::mpsc::channel(16);
    let session = tokio::spawn(sync::run(config, LogWidget, receiver));

    if let Err(e) = commands.send(SyncCommand::SelectPeriod(Period::H1)).await {
        log::error!("Failed to queue the initial period selection: {e}");
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Shutting down"),
        Err(e) => log::error!("Failed to listen for shutdown signal: {e}"),
    }

    drop(commands);
    let _ = session.await;
}
