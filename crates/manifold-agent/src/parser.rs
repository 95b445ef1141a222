//! Incremental parser for the tag vocabulary the reasoning patterns ask
//! the model to emit: `<THOUGHT>…</THOUGHT>`, `<ACTION>…</ACTION>` and
//! `<FINAL_ANSWER>…</FINAL_ANSWER>`.
//!
//! Deltas arrive in arbitrary chunks, so a tag can straddle a chunk
//! boundary; the parser holds back the longest buffer suffix that could
//! still become a tag and emits everything before it.

const THOUGHT_OPEN: &str = "<THOUGHT>";
const THOUGHT_CLOSE: &str = "</THOUGHT>";
const ACTION_OPEN: &str = "<ACTION>";
const ACTION_CLOSE: &str = "</ACTION>";
const FINAL_OPEN: &str = "<FINAL_ANSWER>";
const FINAL_CLOSE: &str = "</FINAL_ANSWER>";

const OPEN_TAGS: &[&str] = &[THOUGHT_OPEN, ACTION_OPEN, FINAL_OPEN];

/// Events produced while consuming a streamed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// Thought text as it arrives (tag content only).
    ThoughtDelta(String),
    ThoughtEnd,
    /// Final-answer text as it arrives.
    FinalDelta(String),
    FinalAnswerEnd,
    /// A complete `<ACTION>` body (trimmed; may be empty — the
    /// reflective-pause signal).
    ActionParsed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    Thought,
    Action,
    Final,
}

#[derive(Debug)]
pub struct TagStreamParser {
    state: State,
    buf: String,
    action_buf: String,
    thought: String,
    final_text: String,
    action: Option<String>,
    saw_final: bool,
}

impl TagStreamParser {
    pub fn new() -> Self {
        Self {
            state: State::Outside,
            buf: String::new(),
            action_buf: String::new(),
            thought: String::new(),
            final_text: String::new(),
            action: None,
            saw_final: false,
        }
    }

    /// Feed one delta; returns the events it completes.
    pub fn push(&mut self, delta: &str) -> Vec<ParseEvent> {
        self.buf.push_str(delta);
        let mut events = Vec::new();

        loop {
            match self.state {
                State::Outside => {
                    // earliest complete open tag wins
                    let found = OPEN_TAGS
                        .iter()
                        .filter_map(|t| self.buf.find(t).map(|i| (i, *t)))
                        .min_by_key(|(i, _)| *i);

                    if let Some((idx, tag)) = found {
                        self.buf.drain(..idx + tag.len());
                        self.state = match tag {
                            THOUGHT_OPEN => State::Thought,
                            ACTION_OPEN => State::Action,
                            _ => State::Final,
                        };
                        continue;
                    }

                    // keep only a suffix that could still grow into a tag
                    let keep = holdback(&self.buf, OPEN_TAGS);
                    let drop_len = self.buf.len() - keep;
                    self.buf.drain(..drop_len);
                    break;
                }

                State::Thought => {
                    if let Some(idx) = self.buf.find(THOUGHT_CLOSE) {
                        let text: String = self.buf.drain(..idx).collect();
                        self.buf.drain(..THOUGHT_CLOSE.len());
                        if !text.is_empty() {
                            self.thought.push_str(&text);
                            events.push(ParseEvent::ThoughtDelta(text));
                        }
                        events.push(ParseEvent::ThoughtEnd);
                        self.state = State::Outside;
                        continue;
                    }
                    let keep = holdback(&self.buf, &[THOUGHT_CLOSE]);
                    let emit_len = self.buf.len() - keep;
                    if emit_len > 0 {
                        let text: String = self.buf.drain(..emit_len).collect();
                        self.thought.push_str(&text);
                        events.push(ParseEvent::ThoughtDelta(text));
                    }
                    break;
                }

                State::Action => {
                    if let Some(idx) = self.buf.find(ACTION_CLOSE) {
                        let text: String = self.buf.drain(..idx).collect();
                        self.buf.drain(..ACTION_CLOSE.len());
                        self.action_buf.push_str(&text);
                        let body = self.action_buf.trim().to_string();
                        self.action_buf.clear();
                        self.action = Some(body.clone());
                        events.push(ParseEvent::ActionParsed(body));
                        self.state = State::Outside;
                        continue;
                    }
                    let keep = holdback(&self.buf, &[ACTION_CLOSE]);
                    let take_len = self.buf.len() - keep;
                    if take_len > 0 {
                        let text: String = self.buf.drain(..take_len).collect();
                        self.action_buf.push_str(&text);
                    }
                    break;
                }

                State::Final => {
                    if let Some(idx) = self.buf.find(FINAL_CLOSE) {
                        let text: String = self.buf.drain(..idx).collect();
                        self.buf.drain(..FINAL_CLOSE.len());
                        if !text.is_empty() {
                            self.final_text.push_str(&text);
                            events.push(ParseEvent::FinalDelta(text));
                        }
                        self.saw_final = true;
                        events.push(ParseEvent::FinalAnswerEnd);
                        self.state = State::Outside;
                        continue;
                    }
                    let keep = holdback(&self.buf, &[FINAL_CLOSE]);
                    let emit_len = self.buf.len() - keep;
                    if emit_len > 0 {
                        let text: String = self.buf.drain(..emit_len).collect();
                        self.final_text.push_str(&text);
                        events.push(ParseEvent::FinalDelta(text));
                    }
                    break;
                }
            }
        }

        events
    }

    /// All thought content seen so far.
    pub fn thought(&self) -> &str {
        &self.thought
    }

    /// The last complete `<ACTION>` body, if any.
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn saw_final(&self) -> bool {
        self.saw_final
    }

    pub fn final_text(&self) -> &str {
        &self.final_text
    }
}

impl Default for TagStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the longest buffer suffix that is a proper prefix of any
/// pattern (always on a char boundary: the tags are pure ASCII).
fn holdback(buf: &str, patterns: &[&str]) -> usize {
    let mut keep = 0usize;
    for pat in patterns {
        let max = pat.len().saturating_sub(1).min(buf.len());
        for len in (1..=max).rev() {
            let start = buf.len() - len;
            if buf.is_char_boundary(start)
                && pat.as_bytes().starts_with(&buf.as_bytes()[start..])
            {
                keep = keep.max(len);
                break;
            }
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut TagStreamParser, chunks: &[&str]) -> Vec<ParseEvent> {
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.push(chunk));
        }
        events
    }

    fn thought_text(events: &[ParseEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::ThoughtDelta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn parses_thought_then_action_in_one_chunk() {
        let mut p = TagStreamParser::new();
        let events = feed(
            &mut p,
            &[r#"<THOUGHT>I need the weather.</THOUGHT><ACTION>{"tool_name":"get_weather","arguments":{"location":"Paris"}}</ACTION>"#],
        );

        assert_eq!(thought_text(&events), "I need the weather.");
        assert!(events.contains(&ParseEvent::ThoughtEnd));
        assert!(matches!(
            events.last().unwrap(),
            ParseEvent::ActionParsed(body) if body.contains("get_weather")
        ));
        assert!(!p.saw_final());
    }

    #[test]
    fn tags_split_across_chunk_boundaries() {
        let mut p = TagStreamParser::new();
        let events = feed(
            &mut p,
            &["<THO", "UGHT>pie", "ces</THOU", "GHT><FINAL_ANS", "WER>done</FINAL_ANSWER>"],
        );

        assert_eq!(thought_text(&events), "pieces");
        assert!(p.saw_final());
        assert_eq!(p.final_text(), "done");
        assert!(events.contains(&ParseEvent::FinalAnswerEnd));
    }

    #[test]
    fn single_character_deltas() {
        let mut p = TagStreamParser::new();
        let text = "<THOUGHT>ok</THOUGHT><ACTION></ACTION>";
        let chunks: Vec<String> = text.chars().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = chunks.iter().map(|s| s.as_str()).collect();
        let events = feed(&mut p, &refs);

        assert_eq!(thought_text(&events), "ok");
        assert_eq!(p.action(), Some(""));
    }

    #[test]
    fn empty_action_is_a_pause_not_an_error() {
        let mut p = TagStreamParser::new();
        let events = feed(&mut p, &["<THOUGHT>reflecting</THOUGHT><ACTION>  \n </ACTION>"]);
        assert!(matches!(
            events.last().unwrap(),
            ParseEvent::ActionParsed(body) if body.is_empty()
        ));
        assert_eq!(p.action(), Some(""));
        assert!(!p.saw_final());
    }

    #[test]
    fn text_outside_tags_is_ignored() {
        let mut p = TagStreamParser::new();
        let events = feed(
            &mut p,
            &["preamble <THOUGHT>real</THOUGHT> interlude <FINAL_ANSWER>x</FINAL_ANSWER> tail"],
        );
        assert_eq!(thought_text(&events), "real");
        assert_eq!(p.final_text(), "x");
    }

    #[test]
    fn no_tags_yields_no_events() {
        let mut p = TagStreamParser::new();
        let events = feed(&mut p, &["the model ignored every instruction"]);
        assert!(events.is_empty());
        assert!(!p.saw_final());
        assert!(p.action().is_none());
        assert!(p.thought().is_empty());
    }

    #[test]
    fn angle_brackets_in_thought_content_survive() {
        let mut p = TagStreamParser::new();
        let events = feed(&mut p, &["<THOUGHT>compare a < b and c > d</THOUGHT>"]);
        assert_eq!(thought_text(&events), "compare a < b and c > d");
    }

    #[test]
    fn non_ascii_thought_content_streams_through() {
        let mut p = TagStreamParser::new();
        let events = feed(&mut p, &["<THOUGHT>Столица Франции — Париж</THOUGHT>"]);
        assert_eq!(thought_text(&events), "Столица Франции — Париж");
    }

    #[test]
    fn multiple_thought_blocks_accumulate() {
        let mut p = TagStreamParser::new();
        feed(
            &mut p,
            &["<THOUGHT>first</THOUGHT><THOUGHT>second</THOUGHT><ACTION>x</ACTION>"],
        );
        assert_eq!(p.thought(), "firstsecond");
        assert_eq!(p.action(), Some("x"));
    }
}
