//! Live event follower.

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use homeconnect_core::{Appliance, ApplianceEvent, Platform, PlatformEvent, StreamMode};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

/// Watching needs a stream even when the profile turns it off.
pub fn stream_mode(configured: StreamMode) -> StreamMode {
    match configured {
        StreamMode::Off => StreamMode::All,
        other => other,
    }
}

pub async fn handle(platform: &Platform, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(ha_id) = args.ha_id.as_deref() {
        platform.appliance(ha_id)?;
    }
    let wanted = |appliance: &Appliance| {
        args.ha_id
            .as_deref()
            .is_none_or(|ha_id| ha_id == appliance.ha_id())
    };

    let (tx, mut rx) = mpsc::channel::<(String, ApplianceEvent)>(256);
    let mut forwarders = JoinSet::new();
    let mut lifecycle = platform.subscribe();
    for appliance in platform.appliances().into_iter().filter(|a| wanted(a)) {
        forward(&mut forwarders, &appliance, tx.clone());
    }

    let color = output::should_color(&global.color);
    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = lifecycle.recv() => match event {
                Ok(PlatformEvent::Added(appliance)) if wanted(&appliance) => {
                    print_line(global, &appliance.info().ha_id, "added", None);
                    forward(&mut forwarders, &appliance, tx.clone());
                }
                Ok(PlatformEvent::Removed(ha_id)) => print_line(global, &ha_id, "removed", None),
                Ok(PlatformEvent::Added(_)) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some((ha_id, event)) = rx.recv() => {
                match event {
                    ApplianceEvent::Item(item) => {
                        let text = util::display_value(&item);
                        print_line(global, &ha_id, &item.key, Some((&item.value, &text)));
                        seen = seen.saturating_add(1);
                        if args.count.is_some_and(|limit| seen >= limit) {
                            break;
                        }
                    }
                    ApplianceEvent::Connected(up) => {
                        let label = output::connection_label(up, color);
                        print_line(global, &ha_id, &label, None);
                    }
                    ApplianceEvent::Depaired => print_line(global, &ha_id, "depaired", None),
                    ApplianceEvent::Error(e) => tracing::warn!(ha_id = %ha_id, error = %e, "appliance error"),
                }
            }
        }
    }
    forwarders.abort_all();
    Ok(())
}

fn forward(
    forwarders: &mut JoinSet<()>,
    appliance: &Appliance,
    tx: mpsc::Sender<(String, ApplianceEvent)>,
) {
    let ha_id = appliance.ha_id().to_owned();
    let mut events = appliance.subscribe();
    forwarders.spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if tx.send((ha_id.clone(), event)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(ha_id = %ha_id, skipped = n, "watch fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn print_line(global: &GlobalOpts, ha_id: &str, what: &str, value: Option<(&serde_json::Value, &str)>) {
    let line = match global.output {
        OutputFormat::Json | OutputFormat::JsonCompact | OutputFormat::Yaml => {
            let record = match value {
                Some((value, _)) => json!({"haId": ha_id, "key": what, "value": value}),
                None => json!({"haId": ha_id, "event": what}),
            };
            output::render_json(&record, true)
        }
        OutputFormat::Plain => match value {
            Some((_, text)) => format!("{ha_id} {what}={text}"),
            None => format!("{ha_id} {what}"),
        },
        OutputFormat::Table => {
            let now = chrono::Local::now().format("%H:%M:%S");
            match value {
                Some((_, text)) => format!("{now}  {ha_id}  {what} = {text}"),
                None => format!("{now}  {ha_id}  {what}"),
            }
        }
    };
    output::print_output(&line, global.quiet);
}
