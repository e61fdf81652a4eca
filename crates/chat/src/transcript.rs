use chrono::{DateTime, Local};
use llemmy_storage::{ChatTurn, TurnRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Plain,
    User,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub style: LineStyle,
    pub text: String,
}

/// Orders turns oldest first, the order a conversation is replayed in.
pub fn chronological(mut turns: Vec<ChatTurn>) -> Vec<ChatTurn> {
    turns.sort_by(|left, right| {
        left.created_at_unix_millis
            .cmp(&right.created_at_unix_millis)
            .then_with(|| left.id.as_uuid().cmp(&right.id.as_uuid()))
    });
    turns
}

/// Renders turns oldest first as `HH:MM:SS @ AUTHOR: MESSAGE`, whatever
/// order they were listed in.
pub fn render_transcript(turns: &[ChatTurn]) -> Vec<TranscriptLine> {
    chronological(turns.to_vec()).iter().map(render_turn).collect()
}

pub fn render_turn(turn: &ChatTurn) -> TranscriptLine {
    let style = match turn.role {
        TurnRole::User => LineStyle::User,
        TurnRole::SystemError => LineStyle::Error,
        TurnRole::Assistant => LineStyle::Plain,
    };

    TranscriptLine {
        style,
        text: format!(
            "{} @ {}: {}",
            local_time(turn.created_at_unix_millis),
            turn.author,
            turn.message
        ),
    }
}

fn local_time(unix_millis: u64) -> String {
    i64::try_from(unix_millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|timestamp| timestamp.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

#[cfg(test)]
mod tests {
    use llemmy_storage::{SessionId, TurnId};

    use super::*;

    fn turn(role: TurnRole, author: &str, message: &str, created_at_unix_millis: u64) -> ChatTurn {
        ChatTurn {
            id: TurnId::new_v7(),
            session_id: SessionId::new_random(),
            role,
            author: author.to_string(),
            created_at_unix_millis,
            message: message.to_string(),
            payload_json: None,
            stack_trace: None,
            response_time_ms: None,
            token_usage: None,
            deleted: false,
        }
    }

    #[test]
    fn lines_are_chronological_and_styled_by_role() {
        let newest_first = vec![
            turn(TurnRole::SystemError, "System", "boom", 3_000),
            turn(TurnRole::Assistant, "Echo", "hi there", 2_000),
            turn(TurnRole::User, "alice", "hello", 1_000),
        ];

        let lines = render_transcript(&newest_first);

        assert_eq!(
            lines.iter().map(|line| line.style).collect::<Vec<_>>(),
            vec![LineStyle::User, LineStyle::Plain, LineStyle::Error]
        );
        assert!(lines[0].text.ends_with(" @ alice: hello"));
        assert!(lines[2].text.ends_with(" @ System: boom"));
    }

    #[test]
    fn time_prefix_is_hours_minutes_seconds() {
        let line = render_turn(&turn(TurnRole::User, "alice", "hello", 1_700_000_000_000));
        let (time, _) = line.text.split_once(" @ ").expect("time separator");
        assert_eq!(time.len(), 8);
        assert_eq!(time.matches(':').count(), 2);
    }
}
