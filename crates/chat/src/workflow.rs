use std::backtrace::Backtrace;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use llemmy_llm::{ChatModel, ChatResponse, ContentBlock, ProviderError, UserMessage};
use llemmy_storage::{ChatTurn, NewChatTurn, SessionId, TokenCounts, TurnId, TurnRole, TurnStore};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::attachment::{Attachment, AttachmentId, MimeType};
use crate::error::{
    BackgroundTaskSnafu, ChatResult, NoChatModelsSnafu, NothingToSendSnafu, ProcessingSnafu,
    StorageSnafu, UnknownModelSnafu,
};
use crate::observable::{Observable, ObservableView};
use crate::ticker::{DEFAULT_TICK_PERIOD, ElapsedTicker};

const TURN_BROADCAST_CAPACITY: usize = 64;

/// Where the in-flight send currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    PersistingPrompt,
    AwaitingModel,
    PersistingReply,
}

/// Outcome of one background stage, applied by the owner in `next_event`.
#[derive(Debug)]
enum StageCompletion {
    PromptPersisted {
        message: UserMessage,
        result: ChatResult<ChatTurn>,
    },
    ModelFinished(NewChatTurn),
    ReplyPersisted(ChatResult<ChatTurn>),
}

/// Pending content captured by `send`, cleared once the user turn is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SentContent {
    prompt: String,
    attachment_ids: Vec<AttachmentId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    TurnAdded(ChatTurn),
    /// A turn could not be persisted; the send was abandoned.
    SendFailed { message: String },
}

/// Sends prompts to the selected model and records every exchange as turns
/// of one session.
///
/// Background stages never touch workflow state. Each one reports back over
/// a channel and the owner applies the result by awaiting [`next_event`].
///
/// [`next_event`]: ChatWorkflow::next_event
pub struct ChatWorkflow {
    session_id: SessionId,
    user_name: String,
    store: Arc<dyn TurnStore>,
    models: Vec<Arc<dyn ChatModel>>,

    prompt: Observable<String>,
    attachments: Observable<Vec<Attachment>>,
    prompt_empty: Observable<bool>,
    attachments_empty: Observable<bool>,
    processing: Observable<bool>,
    ready: Observable<bool>,
    error: Observable<bool>,
    elapsed: Observable<Duration>,
    selected_model: Observable<usize>,

    phase: Phase,
    in_flight: Option<SentContent>,
    started: Option<Instant>,
    ticker: Option<ElapsedTicker>,
    tick_period: Duration,
    next_attachment_id: u64,
    completion_tx: mpsc::UnboundedSender<StageCompletion>,
    completion_rx: mpsc::UnboundedReceiver<StageCompletion>,
    turns: broadcast::Sender<ChatTurn>,
}

impl std::fmt::Debug for ChatWorkflow {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ChatWorkflow")
            .field("session_id", &self.session_id)
            .field("user_name", &self.user_name)
            .field("models", &self.model_names())
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl ChatWorkflow {
    pub fn new(
        models: Vec<Arc<dyn ChatModel>>,
        store: Arc<dyn TurnStore>,
        user_name: impl Into<String>,
    ) -> ChatResult<Self> {
        ensure!(
            !models.is_empty(),
            NoChatModelsSnafu {
                stage: "workflow-new",
            }
        );

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (turns, _) = broadcast::channel(TURN_BROADCAST_CAPACITY);
        let session_id = SessionId::new_random();
        let user_name = user_name.into();
        tracing::info!(session_id = %session_id, user = %user_name, "chat session started");

        Ok(Self {
            session_id,
            user_name,
            store,
            models,
            prompt: Observable::new(String::new()),
            attachments: Observable::new(Vec::new()),
            prompt_empty: Observable::new(true),
            attachments_empty: Observable::new(true),
            processing: Observable::new(false),
            ready: Observable::new(false),
            error: Observable::new(false),
            elapsed: Observable::new(Duration::ZERO),
            selected_model: Observable::new(0),
            phase: Phase::Idle,
            in_flight: None,
            started: None,
            ticker: None,
            tick_period: DEFAULT_TICK_PERIOD,
            next_attachment_id: 0,
            completion_tx,
            completion_rx,
            turns,
        })
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// When the in-flight send began.
    pub fn started(&self) -> Option<Instant> {
        self.started
    }

    pub fn prompt(&self) -> ObservableView<String> {
        self.prompt.view()
    }

    pub fn attachments(&self) -> ObservableView<Vec<Attachment>> {
        self.attachments.view()
    }

    pub fn prompt_empty(&self) -> ObservableView<bool> {
        self.prompt_empty.view()
    }

    pub fn attachments_empty(&self) -> ObservableView<bool> {
        self.attachments_empty.view()
    }

    pub fn processing(&self) -> ObservableView<bool> {
        self.processing.view()
    }

    pub fn ready(&self) -> ObservableView<bool> {
        self.ready.view()
    }

    pub fn error(&self) -> ObservableView<bool> {
        self.error.view()
    }

    pub fn elapsed(&self) -> ObservableView<Duration> {
        self.elapsed.view()
    }

    pub fn selected_model(&self) -> ObservableView<usize> {
        self.selected_model.view()
    }

    /// Receives every turn the workflow adds to the session.
    pub fn subscribe_turns(&self) -> broadcast::Receiver<ChatTurn> {
        self.turns.subscribe()
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models
            .iter()
            .map(|model| model.name().to_string())
            .collect()
    }

    pub fn selected_model_name(&self) -> &str {
        self.active_model().name()
    }

    pub fn set_prompt(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.prompt_empty.set(text.trim().is_empty());
        self.prompt.set(text);
        self.refresh_ready();
    }

    pub fn add_attachment(&mut self, path: impl AsRef<Path>, mime_type: &str) -> ChatResult<Attachment> {
        let mime_type = MimeType::parse(mime_type)?;
        self.push_attachment(path.as_ref(), mime_type)
    }

    pub fn add_attachment_from_path(&mut self, path: impl AsRef<Path>) -> ChatResult<Attachment> {
        let path = path.as_ref();
        let mime_type = MimeType::from_path(path)?;
        self.push_attachment(path, mime_type)
    }

    /// Removes the attachment with the same identity; returns false when it
    /// was not pending.
    pub fn remove_attachment(&mut self, attachment: &Attachment) -> bool {
        let id = attachment.id();
        let removed = self.attachments.update(|pending| {
            let before = pending.len();
            pending.retain(|candidate| candidate.id() != id);
            pending.len() != before
        });
        if removed {
            self.attachments_empty.set(self.attachments.get().is_empty());
            self.refresh_ready();
        }
        removed
    }

    pub fn select_model(&mut self, index: usize) -> ChatResult<()> {
        ensure!(
            !self.processing.get(),
            ProcessingSnafu {
                stage: "select-model",
            }
        );
        ensure!(
            index < self.models.len(),
            UnknownModelSnafu {
                stage: "select-model",
                name: index.to_string(),
            }
        );

        self.selected_model.set(index);
        tracing::debug!(model = %self.models[index].name(), "chat model selected");
        Ok(())
    }

    pub fn select_model_by_name(&mut self, name: &str) -> ChatResult<()> {
        let index = self
            .models
            .iter()
            .position(|model| model.name().eq_ignore_ascii_case(name.trim()))
            .context(UnknownModelSnafu {
                stage: "select-model-by-name",
                name: name.to_string(),
            })?;
        self.select_model(index)
    }

    /// Selecting a user turn puts its text back into the prompt; clearing
    /// the selection clears the prompt.
    pub fn recall(&mut self, turn: Option<&ChatTurn>) {
        match turn {
            Some(turn) if turn.role == TurnRole::User => self.set_prompt(turn.message.clone()),
            Some(_) => {}
            None => self.set_prompt(String::new()),
        }
    }

    /// Starts sending the pending prompt and attachments. Returns as soon as
    /// the user turn insert is scheduled; progress arrives via `next_event`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// Prompt edits and attachments added while the send is in flight stay
    /// pending for the next send.
    pub fn send(&mut self) -> ChatResult<()> {
        ensure!(!self.processing.get(), ProcessingSnafu { stage: "send" });
        ensure!(self.ready.get(), NothingToSendSnafu { stage: "send" });

        let message = self.build_message();
        self.in_flight = Some(SentContent {
            prompt: self.prompt.get(),
            attachment_ids: self
                .attachments
                .get()
                .iter()
                .map(Attachment::id)
                .collect(),
        });
        let started = Instant::now();
        self.processing.set(true);
        self.refresh_ready();
        self.started = Some(started);
        self.elapsed.set(Duration::ZERO);
        self.ticker = Some(ElapsedTicker::start(
            started,
            self.tick_period,
            self.elapsed.clone(),
        ));
        self.phase = Phase::PersistingPrompt;

        let payload_json = message
            .to_json()
            .inspect_err(|error| tracing::warn!(error = %error, "failed to serialize user message"))
            .ok();
        let input = NewChatTurn::user(
            self.session_id,
            self.user_name.clone(),
            message.text(),
            payload_json,
        );
        let store = Arc::clone(&self.store);
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = insert_turn(store, input, "persist-prompt").await;
            let _ = completions.send(StageCompletion::PromptPersisted { message, result });
        });

        tracing::debug!(
            session_id = %self.session_id,
            model = %self.selected_model_name(),
            "send started"
        );
        Ok(())
    }

    /// Waits for the next background stage and applies it. Stages that
    /// produce no visible change are applied silently.
    ///
    /// Pending forever while the workflow is idle.
    pub async fn next_event(&mut self) -> WorkflowEvent {
        loop {
            // The workflow keeps a sender alive, so the channel never closes.
            let Some(completion) = self.completion_rx.recv().await else {
                return std::future::pending().await;
            };

            if let Some(event) = self.apply(completion) {
                return event;
            }
        }
    }

    /// Visible turns of the current session, newest first.
    pub async fn session_turns(&self) -> ChatResult<Vec<ChatTurn>> {
        let store = Arc::clone(&self.store);
        let session_id = self.session_id;
        tokio::task::spawn_blocking(move || store.list_session_turns(session_id))
            .await
            .context(BackgroundTaskSnafu {
                stage: "list-session-turns",
            })?
            .context(StorageSnafu {
                stage: "list-session-turns",
            })
    }

    /// Soft deletes the given turns of the current session.
    pub async fn delete_turns(&self, turn_ids: &[TurnId]) -> ChatResult<usize> {
        let store = Arc::clone(&self.store);
        let session_id = self.session_id;
        let turn_ids = turn_ids.to_vec();
        tokio::task::spawn_blocking(move || store.soft_delete_turns(session_id, &turn_ids))
            .await
            .context(BackgroundTaskSnafu {
                stage: "delete-turns",
            })?
            .context(StorageSnafu {
                stage: "delete-turns",
            })
    }

    fn apply(&mut self, completion: StageCompletion) -> Option<WorkflowEvent> {
        match completion {
            StageCompletion::PromptPersisted {
                message,
                result: Ok(turn),
            } => {
                if let Some(sent) = self.in_flight.take() {
                    self.clear_sent(sent);
                }

                self.phase = Phase::AwaitingModel;
                self.call_model(message);
                Some(self.publish(turn))
            }
            StageCompletion::PromptPersisted {
                result: Err(error), ..
            } => {
                tracing::warn!(session_id = %self.session_id, error = %error, "failed to persist prompt");
                self.reset_send();
                Some(WorkflowEvent::SendFailed {
                    message: error.to_string(),
                })
            }
            StageCompletion::ModelFinished(input) => {
                self.phase = Phase::PersistingReply;
                let store = Arc::clone(&self.store);
                let completions = self.completion_tx.clone();
                tokio::spawn(async move {
                    let result = insert_turn(store, input, "persist-reply").await;
                    let _ = completions.send(StageCompletion::ReplyPersisted(result));
                });
                None
            }
            StageCompletion::ReplyPersisted(Ok(turn)) => {
                self.reset_send();
                self.error.set(turn.role == TurnRole::SystemError);
                Some(self.publish(turn))
            }
            StageCompletion::ReplyPersisted(Err(error)) => {
                tracing::warn!(session_id = %self.session_id, error = %error, "failed to persist reply");
                self.reset_send();
                self.error.set(true);
                Some(WorkflowEvent::SendFailed {
                    message: error.to_string(),
                })
            }
        }
    }

    fn call_model(&self, message: UserMessage) {
        let model = Arc::clone(self.active_model());
        let session_id = self.session_id;
        let completions = self.completion_tx.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = model.chat(&message).await;
            let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let input = match outcome {
                Ok(response) => reply_turn(session_id, model.name(), response, response_time_ms),
                Err(error) => {
                    tracing::warn!(
                        session_id = %session_id,
                        model = %model.name(),
                        error = %error,
                        "chat model failed"
                    );
                    NewChatTurn::system_error(session_id, error.to_string(), stack_trace(&error))
                }
            };
            let _ = completions.send(StageCompletion::ModelFinished(input));
        });
    }

    fn publish(&self, turn: ChatTurn) -> WorkflowEvent {
        tracing::debug!(
            session_id = %self.session_id,
            turn_id = %turn.id,
            role = turn.role.as_str(),
            "turn added"
        );
        // No subscribers is fine.
        let _ = self.turns.send(turn.clone());
        WorkflowEvent::TurnAdded(turn)
    }

    fn clear_sent(&mut self, sent: SentContent) {
        if self.prompt.get() == sent.prompt {
            self.set_prompt(String::new());
        }
        self.attachments.update(|pending| {
            let before = pending.len();
            pending.retain(|attachment| !sent.attachment_ids.contains(&attachment.id()));
            pending.len() != before
        });
        self.attachments_empty.set(self.attachments.get().is_empty());
        self.refresh_ready();
    }

    fn reset_send(&mut self) {
        self.in_flight = None;
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
        self.started = None;
        self.elapsed.set(Duration::ZERO);
        self.phase = Phase::Idle;
        self.processing.set(false);
        self.refresh_ready();
    }

    fn push_attachment(&mut self, path: &Path, mime_type: MimeType) -> ChatResult<Attachment> {
        self.next_attachment_id += 1;
        let attachment = Attachment::load(AttachmentId(self.next_attachment_id), path, mime_type)?;

        self.attachments.update(|pending| {
            pending.push(attachment.clone());
            true
        });
        self.attachments_empty.set(false);
        self.refresh_ready();
        Ok(attachment)
    }

    fn build_message(&self) -> UserMessage {
        let mut message = UserMessage::new(self.user_name.clone());
        let prompt = self.prompt.get();
        let prompt = prompt.trim();
        if !prompt.is_empty() {
            message = message.with_content(ContentBlock::text(prompt));
        }
        for attachment in self.attachments.get() {
            message = message.with_content(attachment.content().clone());
        }
        message
    }

    fn refresh_ready(&self) {
        let has_content = !self.prompt_empty.get() || !self.attachments_empty.get();
        self.ready.set(!self.processing.get() && has_content);
    }

    fn active_model(&self) -> &Arc<dyn ChatModel> {
        let index = self.selected_model.get().min(self.models.len() - 1);
        &self.models[index]
    }
}

async fn insert_turn(
    store: Arc<dyn TurnStore>,
    input: NewChatTurn,
    stage: &'static str,
) -> ChatResult<ChatTurn> {
    tokio::task::spawn_blocking(move || store.insert_turn(input))
        .await
        .context(BackgroundTaskSnafu { stage })?
        .context(StorageSnafu { stage })
}

fn reply_turn(
    session_id: SessionId,
    author: &str,
    response: ChatResponse,
    response_time_ms: u64,
) -> NewChatTurn {
    let payload_json = response
        .reply
        .to_json()
        .inspect_err(|error| tracing::warn!(error = %error, "failed to serialize reply"))
        .ok();
    NewChatTurn::assistant(
        session_id,
        author,
        response.reply.text,
        payload_json,
        response_time_ms,
        TokenCounts {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            total_tokens: response.usage.total_tokens,
        },
    )
}

/// Error message, its cause chain and the backtrace of the reporting task.
fn stack_trace(error: &ProviderError) -> String {
    use std::error::Error as _;

    let mut trace = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        trace.push_str("\nCaused by: ");
        trace.push_str(&cause.to_string());
        source = cause.source();
    }
    trace.push_str("\n\n");
    trace.push_str(&Backtrace::force_capture().to_string());
    trace
}
