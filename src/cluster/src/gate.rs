//! Human confirmation gates and SIGINT pass-through.
//!
//! Some setup steps need the operator to do something in another session
//! (register a user, switch identity) before the engine continues. The gate is a
//! trait so the interactive source can be replaced by a scripted one in tests.
use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use nix::sys::signal::{signal, SigHandler, Signal};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;

#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// Block until the operator confirms. Declining yields [`ClusterError::UserAbort`].
    async fn confirm(&self, prompt: &str) -> Result<()>;

    /// Ask a yes/no question.
    async fn ask(&self, question: &str) -> Result<bool>;
}

fn is_refusal(reply: &str) -> bool {
    matches!(
        reply.trim().to_ascii_lowercase().as_str(),
        "n" | "no" | "abort"
    )
}

/// Reads answers from the process's stdin. Blocks without a timeout.
#[derive(Debug, Default)]
pub struct StdinGate;

impl StdinGate {
    async fn read_reply(prompt: String) -> Result<String> {
        tokio::task::spawn_blocking(move || {
            print!("{} ", prompt);
            std::io::stdout().flush()?;
            let mut line = String::new();
            let read = std::io::stdin().read_line(&mut line)?;
            if read == 0 {
                return Err(ClusterError::UserAbort("stdin closed".to_string()));
            }
            Ok(line)
        })
        .await
        .map_err(|e| ClusterError::Io(std::io::Error::other(e)))?
    }
}

#[async_trait]
impl ConfirmationGate for StdinGate {
    async fn confirm(&self, prompt: &str) -> Result<()> {
        let reply = Self::read_reply(prompt.to_string()).await?;
        println!();
        if is_refusal(&reply) {
            return Err(ClusterError::UserAbort(prompt.to_string()));
        }
        Ok(())
    }

    async fn ask(&self, question: &str) -> Result<bool> {
        let reply = Self::read_reply(question.to_string()).await?;
        Ok(!is_refusal(&reply))
    }
}

/// Answers from a pre-recorded script, recording every prompt it was shown.
#[derive(Debug, Default)]
pub struct ScriptedGate {
    answers: Mutex<VecDeque<bool>>,
    fallback: Option<bool>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGate {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Gate that gives the same answer every time.
    pub fn always(answer: bool) -> Self {
        Self {
            fallback: Some(answer),
            ..Self::default()
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn next(&self, prompt: &str) -> Result<bool> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let scripted = self.answers.lock().ok().and_then(|mut a| a.pop_front());
        scripted
            .or(self.fallback)
            .ok_or_else(|| ClusterError::UserAbort(format!("no scripted answer for '{}'", prompt)))
    }
}

#[async_trait]
impl ConfirmationGate for ScriptedGate {
    async fn confirm(&self, prompt: &str) -> Result<()> {
        if self.next(prompt)? {
            Ok(())
        } else {
            Err(ClusterError::UserAbort(prompt.to_string()))
        }
    }

    async fn ask(&self, question: &str) -> Result<bool> {
        self.next(question)
    }
}

/// Ignores SIGINT in this process while alive so Ctrl-C only reaches the
/// interactive child. The previous disposition is restored on drop.
pub struct InterruptPassthrough {
    previous: Option<SigHandler>,
}

impl InterruptPassthrough {
    pub fn engage() -> Self {
        // SAFETY: installs SIG_IGN, no handler code runs in signal context.
        let previous = match unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) } {
            Ok(prev) => Some(prev),
            Err(e) => {
                tracing::warn!("[InterruptPassthrough] Cannot ignore SIGINT: {}", e);
                None
            }
        };
        Self { previous }
    }
}

impl Drop for InterruptPassthrough {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            // SAFETY: restores the disposition that was active before engage().
            if let Err(e) = unsafe { signal(Signal::SIGINT, previous) } {
                tracing::warn!("[InterruptPassthrough] Cannot restore SIGINT: {}", e);
            }
        }
    }
}
