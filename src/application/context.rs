//! # Command Context
//!
//! What a running command sees: its process, the chat handle of the shred that owns the room,
//! and blocking-style helpers (`ask`, `confirm`) built on the event waiter.

use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;

use crate::application::process::Process;
use crate::application::services::Services;
use crate::application::waiter::{Liveness, PendingWait, WaitRequest};
use crate::domain::errors::{CommandError, WaitError};
use crate::domain::traits::ChatProvider;
use crate::domain::types::{EventKind, InboundEvent, Origin};
use crate::strings::messages;

/// A subscription registered ahead of its wait, with the request's deadline and liveness check.
struct Registered {
    pending: PendingWait,
    timeout: Option<Duration>,
    liveness: Option<Liveness>,
}

pub struct CommandContext {
    services: Arc<Services>,
    process: Arc<Process>,
    invocation: InboundEvent,
    chat: Arc<dyn ChatProvider>,
}

impl CommandContext {
    pub fn new(
        services: Arc<Services>,
        process: Arc<Process>,
        invocation: InboundEvent,
        chat: Arc<dyn ChatProvider>,
    ) -> Self {
        Self {
            services,
            process,
            invocation,
            chat,
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn origin(&self) -> &Origin {
        self.process.origin()
    }

    pub fn is_admin(&self) -> bool {
        self.services.config.system.is_admin(&self.origin().actor)
    }

    /// Attach an opaque value to this process, visible to `ps`.
    pub fn set_payload<T: std::any::Any + Send + Sync>(&self, value: T) {
        self.process.set_payload(value);
    }

    /// Send a message to the command's room, returning its id.
    pub async fn reply(&self, content: &str) -> Result<String, CommandError> {
        self.chat.send_message(content).await.map_err(CommandError::chat)
    }

    pub async fn notify(&self, content: &str) -> Result<(), CommandError> {
        self.chat
            .send_notification(content)
            .await
            .map_err(CommandError::chat)
    }

    /// Show or clear the typing indicator. Failures are only logged.
    pub async fn typing(&self, active: bool) {
        if let Err(e) = self.chat.typing(active).await {
            tracing::debug!(room = %self.origin().room, error = %e, "Typing indicator failed");
        }
    }

    /// Stop quietly.
    pub fn exit<T>(&self) -> Result<T, CommandError> {
        Err(CommandError::Exit)
    }

    /// Stop and tell the user the command was cancelled.
    pub fn cancel<T>(&self) -> Result<T, CommandError> {
        Err(CommandError::Cancelled)
    }

    /// Suspend until an event satisfies `request`. The process shows as waiting meanwhile.
    ///
    /// # Errors
    ///
    /// Any [`WaitError`]; `Interrupted` must be propagated, not handled.
    pub async fn wait_for(&self, request: WaitRequest) -> Result<InboundEvent, WaitError> {
        self.wait_on(self.register(request)).await
    }

    fn register(&self, request: WaitRequest) -> Registered {
        Registered {
            pending: self.services.waiter.subscribe(request.kind, request.predicate),
            timeout: request.timeout,
            liveness: request.liveness,
        }
    }

    /// The deadline can be lifted through the process while this runs.
    async fn wait_on(&self, registered: Registered) -> Result<InboundEvent, WaitError> {
        let Registered {
            pending,
            timeout,
            liveness,
        } = registered;
        let _waiting = self.process.enter_wait(Some(pending.deadline_handle()));
        let mut interrupt = self.process.interrupt_signal();
        pending.wait(timeout, liveness, &mut interrupt).await
    }

    /// Matches later messages from the invoking actor in the invoking channel.
    fn reply_predicate(&self) -> impl Fn(&InboundEvent) -> bool + Send + Sync + 'static {
        let origin = self.origin().clone();
        let invocation_id = self.invocation.message_id().map(str::to_string);
        move |event| {
            event.actor == origin.actor
                && event.channel == origin.channel
                && event.message_id().map(str::to_string) != invocation_id
        }
    }

    fn liveness_of(&self, message_id: &str) -> Liveness {
        let chat = self.chat.clone();
        let message_id = message_id.to_string();
        Liveness::new(
            Arc::new(move || {
                let chat = chat.clone();
                let message_id = message_id.clone();
                async move { chat.message_exists(&message_id).await }.boxed()
            }),
            self.services.config.commands.liveness_poll(),
        )
    }

    /// Ask a question and return the whole reply event.
    ///
    /// # Errors
    ///
    /// `Timeout` when nobody answers within the configured ask timeout, `Interrupted` on kill.
    pub async fn ask_raw(&self, prompt: &str) -> Result<InboundEvent, CommandError> {
        self.ask_raw_within(prompt, self.services.config.commands.ask_timeout())
            .await
    }

    pub async fn ask_raw_within(
        &self,
        prompt: &str,
        timeout: Option<Duration>,
    ) -> Result<InboundEvent, CommandError> {
        // subscribe before prompting so a fast reply cannot slip through
        let reply = self.register(
            WaitRequest::new(EventKind::MessageReceived, self.reply_predicate()).timeout(timeout),
        );
        self.reply(prompt).await?;
        Ok(self.wait_on(reply).await?)
    }

    /// Ask a question and return the reply text.
    ///
    /// # Errors
    ///
    /// See [`CommandContext::ask_raw`].
    pub async fn ask(&self, prompt: &str) -> Result<String, CommandError> {
        let event = self.ask_raw(prompt).await?;
        Ok(event.body().unwrap_or_default().trim().to_string())
    }

    /// Yes/no question answered with a reaction, or with text where reacting is not permitted.
    ///
    /// # Errors
    ///
    /// `Timeout` when unanswered, `ResourceGone` when the prompt is deleted, `Interrupted` on kill.
    pub async fn confirm(&self, prompt: &str) -> Result<bool, CommandError> {
        let timeout = self.services.config.commands.confirm_timeout();
        let prompt_id = self.reply(prompt).await?;

        let deleted = prompt_id.clone();
        let deletion_wait = self.services.waiter.subscribe(
            EventKind::MessageDeleted,
            Box::new(move |event| event.deleted_message() == Some(deleted.as_str())),
        );
        let actor = self.origin().actor.clone();
        let target = prompt_id.clone();
        let reaction_wait = self.register(
            WaitRequest::new(EventKind::ReactionAdded, move |event| {
                event.actor == actor
                    && event.reaction().is_some_and(|(on, key)| {
                        on == target && (key == messages::CONFIRM_YES || key == messages::CONFIRM_NO)
                    })
            })
            .timeout(timeout)
            .liveness(self.liveness_of(&prompt_id)),
        );

        let reactions_ok = match self.chat.add_reaction(&prompt_id, messages::CONFIRM_YES).await {
            Ok(()) => self.chat.add_reaction(&prompt_id, messages::CONFIRM_NO).await,
            Err(e) => Err(e),
        };

        match reactions_ok {
            Ok(()) => {
                let mut on_delete = self.process.interrupt_signal();
                tokio::select! {
                    answer = self.wait_on(reaction_wait) => {
                        let event = answer?;
                        Ok(event.reaction().is_some_and(|(_, key)| key == messages::CONFIRM_YES))
                    }
                    deleted = deletion_wait.wait(None, None, &mut on_delete) => {
                        deleted?;
                        Err(CommandError::ResourceGone)
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Reactions unavailable, falling back to text confirmation");
                drop(reaction_wait);
                drop(deletion_wait);
                loop {
                    let answer = self
                        .ask_raw_within(messages::CONFIRM_TEXT_FALLBACK, timeout)
                        .await?;
                    match parse_yes_no(answer.body().unwrap_or_default()) {
                        Some(yes) => return Ok(yes),
                        None => continue,
                    }
                }
            }
        }
    }
}

fn parse_yes_no(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "y" | "yes" | "ok" | messages::CONFIRM_YES => Some(true),
        "n" | "no" | messages::CONFIRM_NO => Some(false),
        _ => None,
    }
}
