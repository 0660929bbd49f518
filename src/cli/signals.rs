//! Signal handling for graceful shutdown
//!
//! The first Ctrl-C cancels the pending items of the running job; items
//! already running are left to finish and their results are kept.

use crate::job::{JobId, JobService, ServiceError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cancellation token for async operations
#[derive(Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until cancelled
    pub async fn cancelled(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for SIGINT or SIGTERM (Ctrl-C elsewhere), then cancel `token`
pub async fn setup_signal_handlers(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(error = %e, "failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigint.recv() => {
                eprintln!("\nReceived SIGINT, cancelling pending items...");
            }
            _ = sigterm.recv() => {
                eprintln!("\nReceived SIGTERM, cancelling pending items...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            return;
        }
        eprintln!("\nReceived Ctrl+C, cancelling pending items...");
    }

    token.cancel();
}

/// Cancel `job_id` on `service` once `token` fires
///
/// Resolves to the number of items cancelled. Abort the task once the job
/// has finished on its own.
pub fn cancel_job_on_shutdown(
    mut token: CancellationToken,
    service: Arc<JobService>,
    job_id: JobId,
) -> JoinHandle<Result<usize, ServiceError>> {
    tokio::spawn(async move {
        token.cancelled().await;
        service.cancel(job_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PromptDefinition, Step, WorkflowDefinition};
    use crate::engine::Interpreter;
    use crate::job::{ItemInput, JobStatus};
    use crate::parser::StructuredParser;
    use crate::provider::{PromptExecutor, PromptRequest, PromptResponse, ProviderError};
    use crate::template::TemplateEngine;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::{Semaphore, mpsc};

    #[test]
    fn test_cancellation_token_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();
        assert!(!token2.is_cancelled());

        token1.cancel();
        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        let mut waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        token.cancel();
        task.await.unwrap();
    }

    struct Held {
        started: mpsc::UnboundedSender<()>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl PromptExecutor for Held {
        async fn execute(&self, request: &PromptRequest) -> Result<PromptResponse, ProviderError> {
            let _ = self.started.send(());
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| ProviderError::unknown(e.to_string()))?;
            Ok(PromptResponse {
                raw_text: request.text.clone(),
                turnaround_ms: 0,
            })
        }

        fn name(&self) -> &str {
            "held"
        }
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_items() {
        let (started_tx, mut started) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let service = Arc::new(JobService::new(Interpreter::new(
            Arc::new(TemplateEngine::new()),
            Arc::new(Held {
                started: started_tx,
                gate: Arc::clone(&gate),
            }),
            Arc::new(StructuredParser),
        )));

        let mut prompts = HashMap::new();
        prompts.insert(
            "ask".to_string(),
            PromptDefinition {
                template: "{{ iteration }}".into(),
                ..Default::default()
            },
        );
        let workflow = WorkflowDefinition {
            name: "slow".into(),
            prompts,
            steps: vec![Step::Prompt {
                prompt: "ask".into(),
            }],
            ..Default::default()
        };
        let inputs = (0..4).map(|iteration| ItemInput::Repeat { iteration }).collect();
        let job = service.create_run(&workflow, inputs, 1).unwrap();

        let token = CancellationToken::new();
        let canceller = cancel_job_on_shutdown(token.clone(), Arc::clone(&service), job);

        started.recv().await.unwrap();
        token.cancel();
        assert_eq!(canceller.await.unwrap().unwrap(), 3);

        gate.add_permits(1);
        let progress = service.wait(job).await.unwrap();
        assert_eq!((progress.done, progress.cancelled), (1, 3));
        assert_eq!(service.job_status(job).unwrap(), JobStatus::Done);
    }
}
