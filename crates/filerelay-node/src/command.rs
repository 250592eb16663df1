//! Trigger command recognition.

use crate::error::RelayError;
use filerelay::protocol::{HostEvent, MessagePart};

/// Return the target filename that follows `keyword` at the start of `text`.
pub fn parse_trigger(text: &str, keyword: &str) -> Result<String, RelayError> {
    if keyword.is_empty() {
        return Err(RelayError::Parse("empty trigger keyword".to_string()));
    }
    let Some(rest) = text.trim().strip_prefix(keyword) else {
        return Err(RelayError::Parse(format!("expected `{keyword}<filename>`")));
    };
    let filename = rest.trim();
    if filename.is_empty() {
        return Err(RelayError::Parse("missing filename".to_string()));
    }
    Ok(filename.to_string())
}

/// Extract the target filename from a trigger event.
///
/// A trigger is a single text message: its first part must be plain text.
/// Events without parts fall back to the outline.
pub fn parse_trigger_event(event: &HostEvent, keyword: &str) -> Result<String, RelayError> {
    match event.parts.first() {
        Some(MessagePart::Plain { text }) => parse_trigger(text, keyword),
        Some(_) => Err(RelayError::Parse(
            "trigger must start with a text segment".to_string(),
        )),
        None => parse_trigger(&event.outline, keyword),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_filename_after_keyword() {
        assert_eq!(parse_trigger("tgreport.pdf", "tg").unwrap(), "report.pdf");
        assert_eq!(parse_trigger("  tg archive.zip \n", "tg").unwrap(), "archive.zip");
    }

    #[test]
    fn keyword_inside_filename_is_kept() {
        assert_eq!(parse_trigger("tgmy.tgz", "tg").unwrap(), "my.tgz");
    }

    #[test]
    fn rejects_missing_keyword() {
        assert!(matches!(
            parse_trigger("report.pdf", "tg"),
            Err(RelayError::Parse(_))
        ));
        assert!(matches!(
            parse_trigger("send tgreport.pdf", "tg"),
            Err(RelayError::Parse(_))
        ));
    }

    #[test]
    fn rejects_empty_filename() {
        assert!(matches!(parse_trigger("tg", "tg"), Err(RelayError::Parse(_))));
        assert!(matches!(parse_trigger("tg   ", "tg"), Err(RelayError::Parse(_))));
    }

    #[test]
    fn event_shape() {
        let event = HostEvent::text("u1", "tgreport.pdf");
        assert_eq!(parse_trigger_event(&event, "tg").unwrap(), "report.pdf");

        let event = HostEvent::file("u1", Some("http://src/x".into()), None);
        assert!(matches!(
            parse_trigger_event(&event, "tg"),
            Err(RelayError::Parse(_))
        ));

        let event = HostEvent {
            sender_id: "u1".into(),
            outline: "tgnotes.txt".into(),
            parts: vec![],
        };
        assert_eq!(parse_trigger_event(&event, "tg").unwrap(), "notes.txt");
    }
}
