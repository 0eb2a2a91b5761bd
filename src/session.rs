//! Interactive chat session
//!
//! Two states, `Running` and `Terminated`. Each input line is either the
//! `exit` sentinel, which ends the session, or a prompt, which is remembered,
//! sent, and answered. A failed completion is reported in place of the reply
//! and the session carries on.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::Instrument;
use uuid::Uuid;

use crate::llm::PromptAssembler;
use crate::memory::ConversationMemory;

/// Written before each read
pub const USER_PROMPT: &str = "User > ";
/// Prefix of every reply line
pub const AGENT_LABEL: &str = "Agent >";

const EXIT_COMMAND: &str = "exit";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// One input line, terminator removed
    Line(String),
    /// Input stream closed
    EndOfInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Remember the prompt and ask for a reply
    Ask(String),
}

/// Result of a state transition
#[derive(Debug, PartialEq, Eq)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effect: Option<Effect>,
}

impl TransitionResult {
    fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effect: None,
        }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }
}

pub fn is_exit_command(line: &str) -> bool {
    line.eq_ignore_ascii_case(EXIT_COMMAND)
}

/// Pure transition function
pub fn transition(state: SessionState, event: SessionEvent) -> TransitionResult {
    match (state, event) {
        (SessionState::Terminated, _) | (SessionState::Running, SessionEvent::EndOfInput) => {
            TransitionResult::new(SessionState::Terminated)
        }
        (SessionState::Running, SessionEvent::Line(line)) if is_exit_command(&line) => {
            TransitionResult::new(SessionState::Terminated)
        }
        (SessionState::Running, SessionEvent::Line(line)) => {
            TransitionResult::new(SessionState::Running).with_effect(Effect::Ask(line))
        }
    }
}

/// One conversation, from the first prompt to `exit`
pub struct Session {
    id: Uuid,
    assembler: PromptAssembler,
    memory: ConversationMemory,
    state: SessionState,
}

impl Session {
    pub fn new(assembler: PromptAssembler) -> Self {
        Self {
            id: Uuid::new_v4(),
            assembler,
            memory: ConversationMemory::new(),
            state: SessionState::Running,
        }
    }

    #[allow(dead_code)] // Inspected by tests
    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    #[allow(dead_code)] // Inspected by tests
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until `exit` or end of input
    pub async fn run<R, W>(&mut self, input: R, output: W) -> Result<(), SessionError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let span = tracing::info_span!("session", id = %self.id);
        self.run_loop(input, output).instrument(span).await
    }

    async fn run_loop<R, W>(&mut self, input: R, mut output: W) -> Result<(), SessionError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!("Session started");
        let mut lines = input.lines();

        while self.state == SessionState::Running {
            output.write_all(USER_PROMPT.as_bytes()).await?;
            output.flush().await?;

            let event = match lines.next_line().await? {
                Some(line) => SessionEvent::Line(line),
                None => {
                    // Keep the shell prompt off the dangling "User > "
                    output.write_all(b"\n").await?;
                    SessionEvent::EndOfInput
                }
            };

            let result = transition(self.state, event);
            self.state = result.new_state;

            if let Some(Effect::Ask(prompt)) = result.effect {
                let reply = self.turn(prompt).await;
                output.write_all(reply.as_bytes()).await?;
                output.flush().await?;
            }
        }

        tracing::info!(turns = self.memory.len(), "Session ended");
        Ok(())
    }

    /// Remember the prompt, ask, and format the line to print.
    ///
    /// The prompt is appended before assembly; the entries before it are the
    /// history and the prompt itself goes last, so it is sent exactly once.
    async fn turn(&mut self, prompt: String) -> String {
        self.memory.add(prompt);

        let Some((current, history)) = self.memory.get().split_last() else {
            return format!("{AGENT_LABEL} [error] conversation memory is empty\n");
        };

        match self.assembler.ask(current, history).await {
            Ok(text) => format!("{AGENT_LABEL} {text}\n"),
            Err(e) => {
                tracing::warn!(kind = e.kind.as_str(), error = %e, "Turn failed");
                format!("{AGENT_LABEL} [error] {e}\n")
            }
        }
    }
}
