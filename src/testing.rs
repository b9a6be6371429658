//! Test doubles for the control plane and the attach stdin sink.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use tokio::io::AsyncWrite;

use crate::cluster::{AttachOptions, AttachSession, ControlPlane, UnitPhase, UnitRef};
use crate::error::ControlPlaneError;

/// An `AsyncWrite` that records everything written to it.
///
/// Clones share the same buffer, so a test can keep one handle while the
/// other is moved into an attach session.
#[derive(Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Mutex<SinkState>>,
}

#[derive(Default)]
struct SinkState {
    bytes: Vec<u8>,
    shut_down: bool,
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept at most `limit` bytes, then fail every write with
    /// `BrokenPipe`.
    pub fn failing_after(limit: usize) -> Self {
        let sink = Self::default();
        sink.lock().fail_after = Some(limit);
        sink
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contents(&self) -> Vec<u8> {
        self.lock().bytes.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }
}

impl AsyncWrite for RecordingSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.lock();
        if state.shut_down {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after shutdown",
            )));
        }
        let accepted = match state.fail_after {
            Some(limit) if state.bytes.len() >= limit => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "remote stdin closed",
                )));
            }
            Some(limit) => buf.len().min(limit - state.bytes.len()),
            None => buf.len(),
        };
        state.bytes.extend_from_slice(&buf[..accepted]);
        Poll::Ready(Ok(accepted))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.lock().shut_down = true;
        Poll::Ready(Ok(()))
    }
}

/// Scriptable in-memory control plane.
///
/// Phase queries first drain any scripted errors, then scripted phases, then
/// keep returning the steady phase.
pub struct StubControlPlane {
    state: Mutex<StubState>,
    sink: RecordingSink,
}

struct StubState {
    steady: UnitPhase,
    phases: VecDeque<UnitPhase>,
    phase_errors: usize,
    phase_calls: usize,
    create_error: Option<String>,
    attach_error: Option<String>,
    attach_without_stdin: bool,
    finish_error: Option<String>,
    created: Vec<Pod>,
    deleted: Vec<UnitRef>,
    attached: Vec<(UnitRef, AttachOptions)>,
}

impl StubControlPlane {
    /// Pods report `phase` on every poll.
    pub fn with_steady_phase(phase: UnitPhase) -> Self {
        Self {
            state: Mutex::new(StubState {
                steady: phase,
                phases: VecDeque::new(),
                phase_errors: 0,
                phase_calls: 0,
                create_error: None,
                attach_error: None,
                attach_without_stdin: false,
                finish_error: None,
                created: Vec::new(),
                deleted: Vec::new(),
                attached: Vec::new(),
            }),
            sink: RecordingSink::new(),
        }
    }

    /// Pods are running on the first poll.
    pub fn running() -> Self {
        Self::with_steady_phase(UnitPhase::Running)
    }

    /// Pods stay pending forever.
    pub fn never_running() -> Self {
        Self::with_steady_phase(UnitPhase::Pending)
    }

    /// Report these phases, in order, before the steady phase.
    pub fn with_phases(self, phases: impl IntoIterator<Item = UnitPhase>) -> Self {
        self.lock().phases.extend(phases);
        self
    }

    /// Fail the first `count` status fetches.
    pub fn with_phase_errors(self, count: usize) -> Self {
        self.lock().phase_errors = count;
        self
    }

    pub fn fail_create(self, reason: &str) -> Self {
        self.lock().create_error = Some(reason.to_string());
        self
    }

    pub fn fail_attach(self, reason: &str) -> Self {
        self.lock().attach_error = Some(reason.to_string());
        self
    }

    pub fn attach_without_stdin(self) -> Self {
        self.lock().attach_without_stdin = true;
        self
    }

    /// Make the session's completion future report an error.
    pub fn fail_finish(self, reason: &str) -> Self {
        self.lock().finish_error = Some(reason.to_string());
        self
    }

    /// Use `sink` as the stdin of every attach session.
    pub fn with_sink(mut self, sink: RecordingSink) -> Self {
        self.sink = sink;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Shared handle to the stdin sink handed out by `attach`.
    pub fn sink(&self) -> RecordingSink {
        self.sink.clone()
    }

    pub fn created(&self) -> Vec<Pod> {
        self.lock().created.clone()
    }

    pub fn deleted(&self) -> Vec<UnitRef> {
        self.lock().deleted.clone()
    }

    pub fn attached(&self) -> Vec<(UnitRef, AttachOptions)> {
        self.lock().attached.clone()
    }

    pub fn phase_calls(&self) -> usize {
        self.lock().phase_calls
    }
}

#[async_trait]
impl ControlPlane for StubControlPlane {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn create_unit(&self, namespace: &str, pod: &Pod) -> Result<UnitRef, ControlPlaneError> {
        let mut state = self.lock();
        if let Some(ref reason) = state.create_error {
            return Err(ControlPlaneError::Api {
                operation: "create pod",
                reason: reason.clone(),
            });
        }
        let name = pod.metadata.name.clone().ok_or_else(|| ControlPlaneError::Api {
            operation: "create pod",
            reason: "pod has no name".to_string(),
        })?;
        state.created.push(pod.clone());
        Ok(UnitRef::new(namespace, name))
    }

    async fn unit_phase(&self, _unit: &UnitRef) -> Result<UnitPhase, ControlPlaneError> {
        let mut state = self.lock();
        state.phase_calls += 1;
        if state.phase_errors > 0 {
            state.phase_errors -= 1;
            return Err(ControlPlaneError::Api {
                operation: "get pod",
                reason: "stub status failure".to_string(),
            });
        }
        Ok(state.phases.pop_front().unwrap_or(state.steady))
    }

    async fn delete_unit(&self, unit: &UnitRef) -> Result<(), ControlPlaneError> {
        self.lock().deleted.push(unit.clone());
        Ok(())
    }

    async fn attach(
        &self,
        unit: &UnitRef,
        options: &AttachOptions,
    ) -> Result<AttachSession, ControlPlaneError> {
        let mut state = self.lock();
        state.attached.push((unit.clone(), options.clone()));
        if let Some(ref reason) = state.attach_error {
            return Err(ControlPlaneError::Attach(reason.clone()));
        }

        let stdin: Option<Box<dyn AsyncWrite + Send + Unpin>> = if state.attach_without_stdin {
            None
        } else {
            Some(Box::new(self.sink.clone()))
        };
        let finish = state.finish_error.clone();
        Ok(AttachSession::new(
            stdin,
            Box::pin(async move {
                match finish {
                    Some(reason) => Err(reason),
                    None => Ok(()),
                }
            }),
        ))
    }
}
