use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event::NewsEvent;

/// Read newline-delimited JSON events from stdin into a channel.
///
/// The matcher that turns raw headlines into classified events lives
/// upstream; this boundary only deserializes. Malformed lines are logged
/// and dropped so one bad producer record never stalls the pipeline. The
/// channel closes when stdin reaches EOF.
pub fn start_event_feed() -> mpsc::Receiver<NewsEvent> {
    let (tx, rx) = mpsc::channel(256);

    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<NewsEvent>(line) {
                        Ok(event) => {
                            debug!(
                                "Event received: {:?} {:?} on {}",
                                event.kind, event.polarity, event.market_id
                            );
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Skipping malformed event line: {}", e),
                    }
                }
                Ok(None) => {
                    info!("Event feed reached EOF");
                    return;
                }
                Err(e) => {
                    warn!("Event feed read error: {}", e);
                    return;
                }
            }
        }
    });

    rx
}
