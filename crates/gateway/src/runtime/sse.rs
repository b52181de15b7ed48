//! Wire framing for the event stream: `data: <json>\n\n` per event and a
//! closing `data: [DONE]\n\n`.

use tl_domain::stream::StreamEvent;

pub fn format_sse_event(event: &StreamEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_default();
    format!("data: {json}\n\n")
}

pub fn format_sse_done() -> String {
    "data: [DONE]\n\n".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_framed_as_data_lines() {
        let framed = format_sse_event(&StreamEvent::finish_stop());
        assert_eq!(framed, "data: {\"type\":\"finish\",\"finishReason\":\"stop\"}\n\n");
        assert_eq!(format_sse_done(), "data: [DONE]\n\n");
    }
}
