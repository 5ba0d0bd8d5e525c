use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::time::Duration;
use tokio::time::interval;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use sondetrack_server::feed::FeedReceiver;
use sondetrack_server::replay::ReplaySource;
use sondetrack_server::web::Web;
use sondetrack_server::{logging, Cli, Session};

// How often stale sondes are looked for when --max-age-minutes is set
const PRUNE_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let session = Session::new(args);

    logging::init(&session).into_diagnostic()?;

    log::info!("{} {} starting", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    log::debug!("{:?}", session.args);

    let replay = if session.args.replay.is_empty() {
        None
    } else {
        Some(ReplaySource::new(session.clone()).into_diagnostic()?)
    };

    Toplevel::new(move |s| async move {
        let web = Web::new(session.clone());
        s.start(SubsystemBuilder::new("web", |s| web.run(s)));

        match replay {
            Some(replay) => {
                s.start(SubsystemBuilder::new("replay", |s| replay.run(s)));
            }
            None => {
                let feed = FeedReceiver::new(session.clone());
                s.start(SubsystemBuilder::new("feed", |s| feed.run(s)));
            }
        }

        if session.args.max_age_minutes.is_some() {
            s.start(SubsystemBuilder::new("prune", |s| prune_stale(session, s)));
        }
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(2000))
    .await
    .map_err(Into::into)
}

async fn prune_stale(session: Session, subsys: SubsystemHandle) -> anyhow::Result<()> {
    let mut ticker = interval(PRUNE_INTERVAL);
    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => {
                return Ok(());
            },
            _ = ticker.tick() => {
                let removed = session.prune();
                if !removed.is_empty() {
                    log::info!("forgot stale sondes {:?}", removed);
                }
            },
        }
    }
}
