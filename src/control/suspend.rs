//! Cooperative suspension primitive.
//!
//! A [`Computation`] wraps a future and drives it on the caller's task. Code
//! running inside that future may call [`suspend`] with a
//! [`ControlRequest`]; the request surfaces from [`Computation::start`] or
//! [`Computation::resume`] as [`Driven::Suspended`] and the future stays
//! parked until the driver resumes it with the matching response.
//!
//! ```text
//!  driver                         computation body
//!  ──────                         ────────────────
//!  start() ─────────────────────► runs until suspend(req)
//!          ◄───── Suspended(req) ─┘  (parked on a oneshot)
//!  resume(resp) ────────────────► suspend() returns resp
//!          ◄───── Completed(out) ─┘
//! ```
//!
//! The driven context is a task-local installed around the body, so nested
//! computations each see their own driver. [`detached`] masks the context for
//! a sub-future; requests raised there resolve to their defaults through
//! [`request_or_default`].
//!
//! There is no timeout and no cancellation. Dropping a suspended
//! `Computation` abandons the body.

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::message::{ControlRequest, ControlResponse};
use crate::{Error, Result};

tokio::task_local! {
    static DRIVEN: Option<Yielder>;
}

/// Handle the body uses to reach its driver.
#[derive(Clone)]
struct Yielder {
    tx: mpsc::UnboundedSender<Suspension>,
}

/// A parked suspension point: the request plus the channel that resumes it.
struct Suspension {
    request: ControlRequest,
    reply: oneshot::Sender<ControlResponse>,
}

/// Check that the caller runs inside a driven computation.
///
/// Returns [`Error::OutsideDrivenContext`] otherwise. This is a usage error,
/// not a runtime failure, and is never retried.
pub fn ensure_context() -> Result<()> {
    current().map(|_| ())
}

/// Whether the caller runs inside a driven (and not detached) computation.
pub fn in_driven_context() -> bool {
    current().is_ok()
}

fn current() -> Result<Yielder> {
    DRIVEN
        .try_with(|driven| driven.clone())
        .ok()
        .flatten()
        .ok_or(Error::OutsideDrivenContext)
}

/// Hand `request` to the driver and wait for its response.
///
/// Fails with [`Error::OutsideDrivenContext`] when no driver exists and with
/// [`Error::Abandoned`] when the driver goes away before answering.
pub async fn suspend(request: ControlRequest) -> Result<ControlResponse> {
    let yielder = current()?;
    let (reply, answer) = oneshot::channel();
    let id = request.id();
    trace!(request_id = %id, "suspending");
    yielder
        .tx
        .send(Suspension { request, reply })
        .map_err(|_| Error::Abandoned)?;
    let response = answer.await.map_err(|_| Error::Abandoned)?;
    trace!(request_id = %id, "resumed");
    Ok(response)
}

/// Suspend when driven; otherwise answer with the request's default.
pub async fn request_or_default(request: ControlRequest) -> Result<ControlResponse> {
    if in_driven_context() {
        return suspend(request).await;
    }
    let response = request.default_response();
    debug!(
        request_id = %request.id(),
        answer = %response.render(),
        "no driver, using default response"
    );
    Ok(response)
}

/// Run `future` with the driven context masked.
pub async fn detached<F: Future>(future: F) -> F::Output {
    DRIVEN.scope(None, future).await
}

/// What a driver sees after advancing a computation.
#[derive(Debug)]
pub enum Driven<T> {
    /// The body is parked on this request.
    Suspended(ControlRequest),
    /// The body finished.
    Completed(T),
}

enum Advance<T> {
    Suspended(Suspension),
    Finished(Result<T>),
}

/// A suspendable computation driven explicitly by its owner.
pub struct Computation<T> {
    body: Option<BoxFuture<'static, Result<T>>>,
    suspensions: mpsc::UnboundedReceiver<Suspension>,
    outstanding: Option<Suspension>,
}

impl<T: Send + 'static> Computation<T> {
    /// Wrap `body` without polling it.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, suspensions) = mpsc::unbounded_channel();
        let body = DRIVEN.scope(Some(Yielder { tx }), body).boxed();
        Self {
            body: Some(body),
            suspensions,
            outstanding: None,
        }
    }

    /// Run the body until its first suspension point or completion.
    pub async fn start(&mut self) -> Result<Driven<T>> {
        if let Some(parked) = &self.outstanding {
            return Err(Error::ProtocolViolation(format!(
                "start called while request {} is outstanding",
                parked.request.id()
            )));
        }
        self.advance().await
    }

    /// Answer the outstanding request and run to the next suspension point.
    ///
    /// A response whose id does not match, or a resume with nothing
    /// outstanding, is a protocol violation: the computation is dropped and
    /// cannot be advanced again.
    pub async fn resume(&mut self, response: ControlResponse) -> Result<Driven<T>> {
        if self.body.is_none() {
            return Err(Error::ComputationFinished);
        }
        let Some(parked) = self.outstanding.take() else {
            self.poison();
            return Err(Error::ProtocolViolation(format!(
                "response {} arrived with no outstanding request",
                response.request_id()
            )));
        };
        let expected = parked.request.id();
        if response.request_id() != expected {
            warn!(%expected, got = %response.request_id(), "mismatched control response");
            self.poison();
            return Err(Error::MismatchedResponse {
                expected,
                got: response.request_id(),
            });
        }
        if parked.reply.send(response).is_err() {
            self.poison();
            return Err(Error::Abandoned);
        }
        self.advance().await
    }

    /// The request the body is parked on, if any.
    pub fn pending(&self) -> Option<&ControlRequest> {
        self.outstanding.as_ref().map(|parked| &parked.request)
    }

    /// Whether the body has completed (or was dropped after a violation).
    pub fn is_finished(&self) -> bool {
        self.body.is_none()
    }

    /// Drive to completion, answering every request with `responder`.
    pub async fn drive_with<R>(mut self, responder: &R) -> Result<T>
    where
        R: Responder + ?Sized,
    {
        let mut state = self.start().await?;
        loop {
            match state {
                Driven::Completed(output) => return Ok(output),
                Driven::Suspended(request) => {
                    let response = responder.respond(&request).await?;
                    state = self.resume(response).await?;
                }
            }
        }
    }

    async fn advance(&mut self) -> Result<Driven<T>> {
        let body = self.body.as_mut().ok_or(Error::ComputationFinished)?;
        let next = tokio::select! {
            biased;
            Some(parked) = self.suspensions.recv() => Advance::Suspended(parked),
            output = body => Advance::Finished(output),
        };
        match next {
            Advance::Suspended(parked) => {
                let request = parked.request.clone();
                self.outstanding = Some(parked);
                Ok(Driven::Suspended(request))
            }
            Advance::Finished(output) => {
                self.body = None;
                output.map(Driven::Completed)
            }
        }
    }

    fn poison(&mut self) {
        self.body = None;
        self.outstanding = None;
    }
}

/// Anything that can answer control requests on behalf of a driver.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, request: &ControlRequest) -> Result<ControlResponse>;
}

/// Answers every request with its default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResponder;

#[async_trait]
impl Responder for DefaultResponder {
    async fn respond(&self, request: &ControlRequest) -> Result<ControlResponse> {
        Ok(request.default_response())
    }
}

#[async_trait]
impl<F> Responder for F
where
    F: Fn(&ControlRequest) -> ControlResponse + Send + Sync,
{
    async fn respond(&self, request: &ControlRequest) -> Result<ControlResponse> {
        Ok(self(request))
    }
}
