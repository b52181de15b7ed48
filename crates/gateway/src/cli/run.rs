//! `threadline run`: one-shot execution command.
//!
//! Sends a single message, streams the reply to stdout, and exits. Session
//! ids are printed to stderr so a follow-up run can pass `--session`.

use std::io::Write;
use std::sync::Arc;

use futures_util::StreamExt;

use tl_domain::config::Config;
use tl_domain::query::TurnRequest;
use tl_domain::stream::StreamEvent;

use crate::bootstrap;

/// Execute a single turn and print the reply.
pub async fn run(
    config: Arc<Config>,
    message: String,
    session: Option<String>,
    user: String,
    json_output: bool,
) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config).await?;

    let mut request = TurnRequest::new(user, message);
    request.session_id = session;

    if json_output {
        let output = state.runner.run(request).await?;
        let json = serde_json::to_string_pretty(&output)
            .map_err(|e| anyhow::anyhow!("serializing result: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    let (events, pending) = state.runner.run_stream(request);
    let mut events = std::pin::pin!(events);
    while let Some(frame) = events.next().await {
        let Some(event) = parse_frame(&frame) else {
            continue;
        };
        match event {
            StreamEvent::TextDelta { delta, .. } => {
                print!("{delta}");
                std::io::stdout().flush().ok();
            }
            StreamEvent::ReasoningDelta { delta, .. } => {
                // Dim output to stderr so it doesn't pollute stdout.
                eprint!("\x1b[2m{delta}\x1b[0m");
            }
            StreamEvent::ToolInputAvailable { tool_name, .. } => {
                eprintln!("\x1b[2m[tool: {tool_name}]\x1b[0m");
            }
            StreamEvent::Finish { .. } => println!(),
            StreamEvent::Cancelled { message } => eprintln!("{message}"),
            StreamEvent::Error { error_text } => eprintln!("error: {error_text}"),
            _ => {}
        }
    }

    let output = pending.await?;
    eprintln!("session: {}", output.session_id);
    Ok(())
}

/// Decode one `data: <json>` frame. The `[DONE]` marker yields `None`.
fn parse_frame(frame: &str) -> Option<StreamEvent> {
    let data = frame.strip_prefix("data: ")?.trim_end();
    if data == "[DONE]" {
        return None;
    }
    serde_json::from_str(data).ok()
}
