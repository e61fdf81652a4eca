use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use llemmy_chat::{ChatWorkflow, LineStyle, TranscriptLine, WorkflowEvent, chronological, render_turn};
use llemmy_storage::ChatTurn;
use snafu::{OptionExt, ResultExt};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{AppResult, ReadInputSnafu, UsageSnafu};

const MIME_TOP_LEVEL_TYPES: [&str; 9] = [
    "application",
    "audio",
    "font",
    "image",
    "message",
    "model",
    "multipart",
    "text",
    "video",
];

const HELP: &str = "\
Type a message and press enter to send it.
  /attach <path> [mime]   attach a file (png, jpeg, pdf or plain text)
  /detach <n>             drop pending attachment n
  /attachments            list pending attachments
  /send                   send the pending prompt and attachments
  /models                 list chat models
  /model <name|n>         select a chat model
  /history                list the turns of this session
  /recall [n]             copy user turn n into the prompt, or clear it
  /delete <n>             delete turn n from the session
  /help                   show this help
  /quit                   exit
Start a line with // to send text beginning with a slash.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelChoice {
    Index(usize),
    Name(String),
}

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Prompt(String),
    Send,
    Attach {
        path: PathBuf,
        mime_type: Option<String>,
    },
    Detach(usize),
    Attachments,
    Models,
    Model(ModelChoice),
    History,
    Recall(Option<usize>),
    Delete(usize),
    Help,
    Quit,
}

impl Command {
    /// Blank lines parse to `None`. Indexes are one-based as displayed.
    pub fn parse(line: &str) -> AppResult<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if let Some(escaped) = line.strip_prefix("//") {
            return Ok(Some(Self::Prompt(format!("/{escaped}"))));
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Prompt(line.to_string())));
        };

        let (name, argument) = rest
            .split_once(char::is_whitespace)
            .map(|(name, argument)| (name, argument.trim()))
            .unwrap_or((rest, ""));

        let command = match name {
            "send" => Self::Send,
            "attach" => parse_attach(argument)?,
            "detach" => Self::Detach(parse_index(argument, "/detach <n>")?),
            "attachments" => Self::Attachments,
            "models" => Self::Models,
            "model" => Self::Model(parse_model_choice(argument)?),
            "history" => Self::History,
            "recall" if argument.is_empty() => Self::Recall(None),
            "recall" => Self::Recall(Some(parse_index(argument, "/recall [n]")?)),
            "delete" => Self::Delete(parse_index(argument, "/delete <n>")?),
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => {
                return UsageSnafu {
                    stage: "parse-command",
                    message: format!("unknown command /{name}, try /help"),
                }
                .fail();
            }
        };
        Ok(Some(command))
    }
}

fn parse_index(argument: &str, usage: &str) -> AppResult<usize> {
    argument
        .parse::<usize>()
        .ok()
        .filter(|index| *index > 0)
        .context(UsageSnafu {
            stage: "parse-index",
            message: format!("usage: {usage}"),
        })
}

fn parse_model_choice(argument: &str) -> AppResult<ModelChoice> {
    if argument.is_empty() {
        return UsageSnafu {
            stage: "parse-model-choice",
            message: "usage: /model <name|n>",
        }
        .fail();
    }
    Ok(match argument.parse::<usize>() {
        Ok(index) if index > 0 => ModelChoice::Index(index),
        _ => ModelChoice::Name(argument.to_string()),
    })
}

fn parse_attach(argument: &str) -> AppResult<Command> {
    if argument.is_empty() {
        return UsageSnafu {
            stage: "parse-attach",
            message: "usage: /attach <path> [mime]",
        }
        .fail();
    }

    let command = match argument.rsplit_once(char::is_whitespace) {
        Some((path, mime_type)) if looks_like_mime_type(mime_type) => Command::Attach {
            path: PathBuf::from(path.trim()),
            mime_type: Some(mime_type.to_string()),
        },
        _ => Command::Attach {
            path: PathBuf::from(argument),
            mime_type: None,
        },
    };
    Ok(command)
}

fn looks_like_mime_type(token: &str) -> bool {
    token.split_once('/').is_some_and(|(top_level, subtype)| {
        MIME_TOP_LEVEL_TYPES.contains(&top_level.to_ascii_lowercase().as_str())
            && !subtype.is_empty()
            && subtype
                .chars()
                .all(|character| character.is_ascii_alphanumeric() || "+-.".contains(character))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Terminal front end over one chat workflow.
pub struct Console {
    workflow: ChatWorkflow,
    /// Session turns, oldest first, as numbered on screen.
    history: Vec<ChatTurn>,
    waiting_line: bool,
}

impl Console {
    pub fn new(workflow: ChatWorkflow) -> Self {
        Self {
            workflow,
            history: Vec::new(),
            waiting_line: false,
        }
    }

    pub async fn run(mut self) -> AppResult<()> {
        println!(
            "llemmy: chatting as {} with {} (/help for commands)",
            self.workflow.user_name(),
            self.workflow.selected_model_name()
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut elapsed = self.workflow.elapsed().subscribe();
        let mut input_closed = false;

        loop {
            tokio::select! {
                line = lines.next_line(), if !input_closed => {
                    let line = line.context(ReadInputSnafu {
                        stage: "read-console-line",
                    })?;
                    let Some(line) = line else {
                        input_closed = true;
                        if !self.workflow.processing().get() {
                            break;
                        }
                        continue;
                    };
                    match Command::parse(&line) {
                        Ok(Some(command)) => {
                            if self.execute(command).await == Flow::Quit {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(error) => self.report(&error.to_string()),
                    }
                }
                event = self.workflow.next_event() => {
                    self.show_event(event);
                    if input_closed && !self.workflow.processing().get() {
                        break;
                    }
                }
                changed = elapsed.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let value = *elapsed.borrow_and_update();
                    self.show_elapsed(value);
                }
            }
        }

        tracing::info!(session_id = %self.workflow.session_id(), "console closed");
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> Flow {
        match command {
            Command::Prompt(text) => {
                self.workflow.set_prompt(text);
                self.send();
            }
            Command::Send => self.send(),
            Command::Attach { path, mime_type } => {
                let added = match mime_type {
                    Some(mime_type) => self.workflow.add_attachment(&path, &mime_type),
                    None => self.workflow.add_attachment_from_path(&path),
                };
                match added {
                    Ok(attachment) => {
                        println!("attached {} ({})", attachment, attachment.mime_type());
                    }
                    Err(error) => self.report(&error.to_string()),
                }
            }
            Command::Detach(index) => {
                let attachments = self.workflow.attachments().get();
                match attachments.get(index - 1) {
                    Some(attachment) => {
                        self.workflow.remove_attachment(attachment);
                        println!("detached {attachment}");
                    }
                    None => self.report(&format!("no pending attachment {index}")),
                }
            }
            Command::Attachments => {
                let attachments = self.workflow.attachments().get();
                if attachments.is_empty() {
                    println!("no pending attachments");
                }
                for (position, attachment) in attachments.iter().enumerate() {
                    println!("{:>3}. {} ({})", position + 1, attachment, attachment.mime_type());
                }
            }
            Command::Models => {
                let selected = self.workflow.selected_model().get();
                for (position, name) in self.workflow.model_names().iter().enumerate() {
                    let marker = if position == selected { '*' } else { ' ' };
                    println!("{marker}{:>2}. {name}", position + 1);
                }
            }
            Command::Model(choice) => {
                let selected = match choice {
                    ModelChoice::Index(index) => self.workflow.select_model(index - 1),
                    ModelChoice::Name(name) => self.workflow.select_model_by_name(&name),
                };
                match selected {
                    Ok(()) => println!("using {}", self.workflow.selected_model_name()),
                    Err(error) => self.report(&error.to_string()),
                }
            }
            Command::History => {
                if self.refresh_history().await {
                    self.print_history();
                }
            }
            Command::Recall(None) => self.workflow.recall(None),
            Command::Recall(Some(index)) => match self.history.get(index - 1) {
                Some(turn) => {
                    self.workflow.recall(Some(turn));
                    println!("prompt: {}", self.workflow.prompt().get());
                }
                None => self.report(&format!("no turn {index}, try /history")),
            },
            Command::Delete(index) => {
                let Some(turn_id) = self.history.get(index - 1).map(|turn| turn.id) else {
                    self.report(&format!("no turn {index}, try /history"));
                    return Flow::Continue;
                };
                match self.workflow.delete_turns(&[turn_id]).await {
                    Ok(count) => {
                        println!("deleted {count} turn(s)");
                        self.refresh_history().await;
                    }
                    Err(error) => self.report(&error.to_string()),
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn send(&mut self) {
        match self.workflow.send() {
            Ok(()) => println!("sending to {}...", self.workflow.selected_model_name()),
            Err(error) => self.report(&error.to_string()),
        }
    }

    async fn refresh_history(&mut self) -> bool {
        match self.workflow.session_turns().await {
            Ok(turns) => {
                self.history = chronological(turns);
                true
            }
            Err(error) => {
                self.report(&error.to_string());
                false
            }
        }
    }

    fn print_history(&self) {
        if self.history.is_empty() {
            println!("no turns yet");
        }
        for (position, turn) in self.history.iter().enumerate() {
            println!("{:>3}. {}", position + 1, paint(&render_turn(turn)));
        }
    }

    fn show_event(&mut self, event: WorkflowEvent) {
        self.clear_waiting_line();
        match event {
            WorkflowEvent::TurnAdded(turn) => {
                println!("{}", paint(&render_turn(&turn)));
                self.history.push(turn);
            }
            WorkflowEvent::SendFailed { message } => self.report(&format!("send failed: {message}")),
        }
    }

    fn show_elapsed(&mut self, elapsed: Duration) {
        if !self.workflow.processing().get() || elapsed.is_zero() {
            return;
        }
        let mut stderr = std::io::stderr();
        let _ = write!(
            stderr,
            "\rwaiting for {}... {}s",
            self.workflow.selected_model_name(),
            elapsed.as_secs()
        );
        let _ = stderr.flush();
        self.waiting_line = true;
    }

    fn clear_waiting_line(&mut self) {
        if std::mem::take(&mut self.waiting_line) {
            eprintln!();
        }
    }

    fn report(&mut self, message: &str) {
        self.clear_waiting_line();
        eprintln!("{}", paint_error(message));
    }
}

fn paint(line: &TranscriptLine) -> String {
    match line.style {
        LineStyle::Plain => line.text.clone(),
        LineStyle::User => format!("\x1b[1m{}\x1b[0m", line.text),
        LineStyle::Error => paint_error(&line.text),
    }
}

fn paint_error(text: &str) -> String {
    format!("\x1b[31m{text}\x1b[0m")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn parse(line: &str) -> Command {
        Command::parse(line)
            .expect("valid command")
            .expect("non-blank line")
    }

    #[test]
    fn plain_lines_are_prompts() {
        assert_eq!(parse("  hello there "), Command::Prompt("hello there".to_string()));
        assert_eq!(parse("//etc/hosts"), Command::Prompt("/etc/hosts".to_string()));
        assert!(Command::parse("   ").expect("blank").is_none());
    }

    #[test]
    fn attach_takes_an_optional_mime_type() {
        assert_eq!(
            parse("/attach photos/cat.png"),
            Command::Attach {
                path: PathBuf::from("photos/cat.png"),
                mime_type: None,
            }
        );
        assert_eq!(
            parse("/attach my scan.bin application/pdf"),
            Command::Attach {
                path: PathBuf::from("my scan.bin"),
                mime_type: Some("application/pdf".to_string()),
            }
        );
        assert_eq!(
            parse("/attach archive.bin application/zip"),
            Command::Attach {
                path: PathBuf::from("archive.bin"),
                mime_type: Some("application/zip".to_string()),
            }
        );
        assert_eq!(
            parse("/attach my dir/file.png"),
            Command::Attach {
                path: PathBuf::from("my dir/file.png"),
                mime_type: None,
            }
        );
    }

    #[test]
    fn indexes_are_one_based() {
        assert_eq!(parse("/detach 2"), Command::Detach(2));
        assert_eq!(parse("/recall"), Command::Recall(None));
        assert_eq!(parse("/recall 3"), Command::Recall(Some(3)));
        assert!(matches!(
            Command::parse("/delete 0"),
            Err(AppError::Usage { .. })
        ));
        assert!(matches!(
            Command::parse("/detach two"),
            Err(AppError::Usage { .. })
        ));
    }

    #[test]
    fn model_choice_accepts_index_or_name() {
        assert_eq!(parse("/model 2"), Command::Model(ModelChoice::Index(2)));
        assert_eq!(
            parse("/model Ollama orca-mini"),
            Command::Model(ModelChoice::Name("Ollama orca-mini".to_string()))
        );
        assert!(Command::parse("/model").is_err());
    }

    #[test]
    fn unknown_commands_are_rejected() {
        let error = Command::parse("/frobnicate").expect_err("unknown");
        assert_eq!(error.to_string(), "unknown command /frobnicate, try /help");
        assert_eq!(parse("/exit"), Command::Quit);
    }

    #[test]
    fn styles_map_to_terminal_attributes() {
        let error = TranscriptLine {
            style: LineStyle::Error,
            text: "boom".to_string(),
        };
        assert_eq!(paint(&error), "\x1b[31mboom\x1b[0m");

        let plain = TranscriptLine {
            style: LineStyle::Plain,
            text: "hi".to_string(),
        };
        assert_eq!(paint(&plain), "hi");
    }
}
