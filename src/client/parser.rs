//! Marker demultiplexing for chat response bodies.
//!
//! [`parse_stream_text`] is a pure function of the accumulated body; callers
//! re-run it on the whole buffer after every chunk instead of keeping
//! incremental state.

use crate::normalized::{TOOL_END_PREFIX, TOOL_START_PREFIX};
use crate::session::{ToolCallInfo, ToolCallStatus};

/// Display text and tool statuses recovered from a raw chat body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedStream {
    pub display_text: String,
    pub tool_calls: Vec<ToolCallInfo>,
}

enum Line<'a> {
    Text(&'a str),
    Start(&'a str),
    End(&'a str),
    /// Unterminated tail that may still grow into a marker.
    Pending,
}

/// Parse a body that may still be growing.
///
/// A final line without its newline that could still become a marker is
/// held back until more data arrives.
pub fn parse_stream_text(raw: &str) -> ParsedStream {
    parse(raw, false)
}

/// Parse a body whose stream has closed; nothing is held back.
pub fn parse_complete_text(raw: &str) -> ParsedStream {
    parse(raw, true)
}

fn parse(raw: &str, complete: bool) -> ParsedStream {
    let pieces: Vec<&str> = raw.split('\n').collect();
    let last = pieces.len() - 1;

    let lines: Vec<Line<'_>> = pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| classify(piece, i == last && !complete))
        .collect();

    let mut tool_calls: Vec<ToolCallInfo> = Vec::new();
    let mut display_text = String::with_capacity(raw.len());
    let mut prev_was_text: Option<bool> = None;

    for line in &lines {
        match line {
            Line::Text(text) => {
                // A marker owns the newlines on both sides of it.
                if prev_was_text == Some(true) {
                    display_text.push('\n');
                }
                display_text.push_str(text);
                prev_was_text = Some(true);
            }
            Line::Start(name) => {
                let already_running = tool_calls
                    .iter()
                    .any(|t| t.tool_name == *name && t.status == ToolCallStatus::Running);
                if !name.is_empty() && !already_running {
                    tool_calls.push(ToolCallInfo {
                        tool_name: (*name).to_string(),
                        status: ToolCallStatus::Running,
                    });
                }
                prev_was_text = Some(false);
            }
            Line::End(name) => {
                if let Some(idx) = tool_calls
                    .iter()
                    .rposition(|t| t.tool_name == *name && t.status == ToolCallStatus::Running)
                {
                    tool_calls[idx].status = ToolCallStatus::Done;
                }
                prev_was_text = Some(false);
            }
            Line::Pending => {}
        }
    }

    ParsedStream {
        display_text,
        tool_calls,
    }
}

fn classify(line: &str, unterminated: bool) -> Line<'_> {
    if let Some(name) = line.strip_prefix(TOOL_START_PREFIX) {
        if unterminated {
            return Line::Pending;
        }
        return Line::Start(name.trim());
    }
    if let Some(name) = line.strip_prefix(TOOL_END_PREFIX) {
        if unterminated {
            return Line::Pending;
        }
        return Line::End(name.trim());
    }
    if unterminated && (TOOL_START_PREFIX.starts_with(line) || TOOL_END_PREFIX.starts_with(line)) {
        return Line::Pending;
    }
    Line::Text(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "Hello \n__TOOL_START__:svc__search\n\n__TOOL_END__:svc__search\ndone";

    fn done(name: &str) -> ToolCallInfo {
        ToolCallInfo {
            tool_name: name.to_string(),
            status: ToolCallStatus::Done,
        }
    }

    fn running(name: &str) -> ToolCallInfo {
        ToolCallInfo {
            tool_name: name.to_string(),
            status: ToolCallStatus::Running,
        }
    }

    #[test]
    fn full_body_decodes_to_text_and_tool_status() {
        let parsed = parse_stream_text(BODY);
        assert_eq!(parsed.display_text, "Hello done");
        assert_eq!(parsed.tool_calls, vec![done("svc__search")]);
    }

    #[test]
    fn every_prefix_parse_converges_to_the_full_parse() {
        let full = parse_complete_text(BODY);
        let mut acc = String::new();
        let mut last = ParsedStream::default();
        for ch in BODY.chars() {
            acc.push(ch);
            last = parse_stream_text(&acc);
            // Tool entries are never duplicated along the way.
            assert!(last.tool_calls.len() <= 1);
        }
        assert_eq!(last, full);
    }

    #[test]
    fn partial_marker_line_is_held_back() {
        let parsed = parse_stream_text("Hello \n__TOOL_ST");
        assert_eq!(parsed.display_text, "Hello ");
        assert!(parsed.tool_calls.is_empty());

        let parsed = parse_stream_text("Hello \n__TOOL_START__:svc__sea");
        assert!(parsed.tool_calls.is_empty());

        let parsed = parse_stream_text("Hello \n__TOOL_START__:svc__search\n");
        assert_eq!(parsed.tool_calls, vec![running("svc__search")]);
    }

    #[test]
    fn ordinary_text_is_not_held_back() {
        let parsed = parse_stream_text("line one\nline tw");
        assert_eq!(parsed.display_text, "line one\nline tw");
    }

    #[test]
    fn complete_parse_keeps_marker_lookalike_tail() {
        assert_eq!(parse_complete_text("costs\n__").display_text, "costs\n__");
        assert_eq!(parse_stream_text("costs\n__").display_text, "costs");
    }

    #[test]
    fn repeated_start_while_running_is_not_duplicated() {
        let raw = "\n__TOOL_START__:a\n\n__TOOL_START__:a\n\n__TOOL_END__:a\n";
        assert_eq!(parse_stream_text(raw).tool_calls, vec![done("a")]);
    }

    #[test]
    fn end_closes_most_recent_running_entry() {
        let raw = "\n__TOOL_START__:a\n\n__TOOL_START__:b\n\n__TOOL_END__:a\n";
        assert_eq!(
            parse_stream_text(raw).tool_calls,
            vec![done("a"), running("b")]
        );

        let raw = "\n__TOOL_START__:a\n\n__TOOL_END__:a\n\n__TOOL_START__:a\n";
        assert_eq!(
            parse_stream_text(raw).tool_calls,
            vec![done("a"), running("a")]
        );
    }

    #[test]
    fn end_without_start_is_ignored() {
        let parsed = parse_stream_text("x\n__TOOL_END__:ghost\ny");
        assert!(parsed.tool_calls.is_empty());
        assert_eq!(parsed.display_text, "xy");
    }

    #[test]
    fn tool_names_are_trimmed() {
        let parsed = parse_stream_text("\n__TOOL_START__:  spaced  \n");
        assert_eq!(parsed.tool_calls, vec![running("spaced")]);
    }

    #[test]
    fn newlines_in_model_text_survive() {
        let raw = "a\n\nb\n__TOOL_START__:t\n\n__TOOL_END__:t\nc\nd";
        assert_eq!(parse_complete_text(raw).display_text, "a\n\nbc\nd");
    }

    #[test]
    fn empty_body_is_empty() {
        assert_eq!(parse_stream_text(""), ParsedStream::default());
    }
}
