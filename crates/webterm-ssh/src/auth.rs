// Keyboard-interactive relay
//
// Server challenges are shown in the browser and answered there, except the
// first plain password prompt, which is answered with the request password.

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use russh::client;
use webterm_handlers::{FrontendChannel, HandlerError};
use zeroize::Zeroizing;

/// Empty challenge rounds tolerated before giving up.
pub const MAX_EMPTY_ROUNDS: u32 = 50;

/// Prompts answered automatically, compared trimmed and lowercased.
const PASSWORD_PROMPTS: &[&str] = &["password:", "password as"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub prompt: String,
    pub echo: bool,
}

/// Server answer to a keyboard-interactive request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    Success,
    Failure,
    Challenge { instructions: String, prompts: Vec<Challenge> },
}

/// Server side of a keyboard-interactive exchange.
#[async_trait]
pub trait KeyboardInteractive: Send {
    async fn start(&mut self, user: &str) -> Result<AuthStep, HandlerError>;
    async fn respond(&mut self, answers: Vec<String>) -> Result<AuthStep, HandlerError>;
}

#[async_trait]
impl<H: client::Handler> KeyboardInteractive for client::Handle<H> {
    async fn start(&mut self, user: &str) -> Result<AuthStep, HandlerError> {
        let response = self
            .authenticate_keyboard_interactive_start(user, None::<String>)
            .await
            .map_err(|e| HandlerError::AuthenticationFailed(e.to_string()))?;
        Ok(response.into())
    }

    async fn respond(&mut self, answers: Vec<String>) -> Result<AuthStep, HandlerError> {
        let response = self
            .authenticate_keyboard_interactive_respond(answers)
            .await
            .map_err(|e| HandlerError::AuthenticationFailed(e.to_string()))?;
        Ok(response.into())
    }
}

impl From<client::KeyboardInteractiveAuthResponse> for AuthStep {
    fn from(response: client::KeyboardInteractiveAuthResponse) -> Self {
        match response {
            client::KeyboardInteractiveAuthResponse::Success => AuthStep::Success,
            client::KeyboardInteractiveAuthResponse::Failure => AuthStep::Failure,
            client::KeyboardInteractiveAuthResponse::InfoRequest {
                instructions,
                prompts,
                ..
            } => AuthStep::Challenge {
                instructions,
                prompts: prompts
                    .into_iter()
                    .map(|p| Challenge {
                        prompt: p.prompt,
                        echo: p.echo,
                    })
                    .collect(),
            },
        }
    }
}

/// Answers keyboard-interactive challenges for one session.
pub struct InteractiveAuthRelay {
    password: Zeroizing<String>,
    password_prompts: u32,
    empty_rounds: u32,
}

impl InteractiveAuthRelay {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
            password_prompts: 0,
            empty_rounds: 0,
        }
    }

    pub fn empty_rounds(&self) -> u32 {
        self.empty_rounds
    }

    /// Run the exchange to completion. `Ok(false)` means the server refused.
    pub async fn run<K: KeyboardInteractive>(
        &mut self,
        server: &mut K,
        user: &str,
        frontend: &mut FrontendChannel,
    ) -> Result<bool, HandlerError> {
        let mut step = server.start(user).await?;
        loop {
            match step {
                AuthStep::Success => return Ok(true),
                AuthStep::Failure => return Ok(false),
                AuthStep::Challenge { prompts, .. } if prompts.is_empty() => {
                    self.empty_rounds += 1;
                    if self.empty_rounds > MAX_EMPTY_ROUNDS {
                        warn!("SSH: giving up after {} empty challenge rounds", self.empty_rounds);
                        return Err(HandlerError::AuthenticationFailed(
                            "too many interactive rounds".to_string(),
                        ));
                    }
                    step = server.respond(Vec::new()).await?;
                }
                AuthStep::Challenge { prompts, .. } => {
                    let answers = self.answer_round(&prompts, frontend).await?;
                    step = server.respond(answers).await?;
                }
            }
        }
    }

    async fn answer_round(
        &mut self,
        prompts: &[Challenge],
        frontend: &mut FrontendChannel,
    ) -> Result<Vec<String>, HandlerError> {
        let mut answers = Vec::with_capacity(prompts.len());
        for challenge in prompts {
            frontend
                .send(Bytes::from(challenge.prompt.clone()))
                .await?;

            if let Some(password) = self.auto_answer(&challenge.prompt) {
                debug!("SSH: answering password prompt from request");
                answers.push(password);
                continue;
            }
            answers.push(frontend.read_line().await?);
        }
        Ok(answers)
    }

    /// The request password for the first password prompt only; a repeated
    /// prompt means the password was wrong and goes to the user.
    fn auto_answer(&mut self, prompt: &str) -> Option<String> {
        let normalized = prompt.trim().to_lowercase();
        if !PASSWORD_PROMPTS.contains(&normalized.as_str()) {
            return None;
        }
        self.password_prompts += 1;
        (self.password_prompts == 1).then(|| self.password.to_string())
    }
}
