//! Attach session handle.

use std::future::Future;
use std::pin::Pin;

use tokio::io::AsyncWrite;

/// Resolves once the remote side of an attach session has finished.
pub type SessionCompletion = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// A live attach session bound to a pod's stdin.
///
/// Bytes written to [`AttachSession::stdin`] reach the remote process in
/// order. After the writer is shut down, [`AttachSession::finish`] waits for
/// the remote end to close the session.
pub struct AttachSession {
    stdin: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    completion: SessionCompletion,
}

impl AttachSession {
    pub fn new(stdin: Option<Box<dyn AsyncWrite + Send + Unpin>>, completion: SessionCompletion) -> Self {
        Self { stdin, completion }
    }

    /// A session whose remote side finishes as soon as stdin is closed.
    pub fn detached(stdin: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self::new(Some(Box::new(stdin)), Box::pin(async { Ok(()) }))
    }

    /// Take the stdin writer. Returns `None` if the session has none or it
    /// was already taken.
    pub fn take_stdin(&mut self) -> Option<Box<dyn AsyncWrite + Send + Unpin>> {
        self.stdin.take()
    }

    pub fn has_stdin(&self) -> bool {
        self.stdin.is_some()
    }

    /// Wait for the remote side to finish.
    pub async fn finish(self) -> Result<(), String> {
        drop(self.stdin);
        self.completion.await
    }
}

impl std::fmt::Debug for AttachSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachSession")
            .field("stdin", &self.stdin.is_some())
            .finish_non_exhaustive()
    }
}
