use std::io::Write as _;

use tokenwire_http::{CompletionClient, CompletionState, StreamMode};
use tracing::info;

/// Streams one completion to stdout. Ctrl-C stops it and keeps the partial text.
pub async fn run(endpoint: &str, data: bool, prompt: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mode = if data { StreamMode::Data } else { StreamMode::Text };
    let client = CompletionClient::builder(endpoint)
        .stream_mode(mode)
        .build()?;

    let mut updates = client.subscribe();
    let printer = tokio::spawn(async move {
        let mut printed = 0;
        while updates.changed().await.is_ok() {
            let text = updates.borrow_and_update().text.clone();
            if text.len() < printed {
                printed = 0;
            }
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(&text.as_bytes()[printed..]);
            let _ = stdout.flush();
            printed = text.len();
        }
    });
    let stopper = {
        let client = client.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                client.stop();
            }
        })
    };

    let result = client.complete(prompt).await;
    stopper.abort();
    let received = client.data();
    client.store().remove(client.id());
    printer.await.ok();
    println!();

    let text = result?;
    for value in &received {
        eprintln!("data: {value}");
    }
    info!(chars = text.chars().count(), state = ?client.state(), "completion finished");
    if client.state() == CompletionState::Aborted {
        eprintln!("(stopped)");
    }
    Ok(())
}
