//! Logging
//!
//! Log records go to env_logger as usual and are also streamed to the map
//! clients as `log` events, so the browser can show what the feed is doing.

use chrono::Utc;
use log::{Log, Metadata, Record};
use tokio::sync::broadcast;

use crate::view::MapEvent;
use crate::Session;

// Records from the web module itself are not streamed, a lagging client
// would otherwise report on itself forever
const WEB_TARGET: &str = "sondetrack_server::web";

pub struct WebLogger {
    inner: env_logger::Logger,
    events: broadcast::Sender<MapEvent>,
}

impl WebLogger {
    pub fn new(inner: env_logger::Logger, events: broadcast::Sender<MapEvent>) -> Self {
        WebLogger { inner, events }
    }
}

impl Log for WebLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);

        if record.target().starts_with(WEB_TARGET) {
            return;
        }
        // No receivers is fine
        let _ = self.events.send(MapEvent::Log {
            level: record.level().to_string(),
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            msg: record.args().to_string(),
        });
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the logger at the level chosen with `-v`/`-q`
pub fn init(session: &Session) -> Result<(), log::SetLoggerError> {
    let inner = env_logger::Builder::new()
        .filter_level(session.args.verbose.log_level_filter())
        .build();
    let max_level = inner.filter();

    log::set_boxed_logger(Box::new(WebLogger::new(inner, session.event_sender())))?;
    log::set_max_level(max_level);
    Ok(())
}
