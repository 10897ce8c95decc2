use std::{future::Future, time::Duration};

use tokio::sync::{mpsc, oneshot};

use crate::error::{ErrorKind, Result};

/// Spawn a task in the background to run a future.
pub(crate) fn execute<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(fut);
}

/// Await on a future for a maximum amount of time before returning an error.
pub(crate) async fn timeout<F: Future>(duration: Duration, future: F) -> Result<F::Output> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ErrorKind::from(std::io::ErrorKind::TimedOut).into())
}

pub(crate) async fn delay_for(delay: Duration) {
    tokio::time::sleep(delay).await
}

/// A message paired with a one-shot acknowledgement channel. The worker that receives the
/// message reports the outcome through [`Acknowledgment::acknowledge`]; dropping the message
/// unacknowledged wakes the sender with `None`.
pub(crate) struct AcknowledgedMessage<M, R = ()> {
    message: M,
    acknowledgment: Acknowledgment<R>,
}

impl<M: std::fmt::Debug, R> std::fmt::Debug for AcknowledgedMessage<M, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcknowledgedMessage")
            .field("message", &self.message)
            .finish()
    }
}

pub(crate) struct Acknowledgment<R> {
    sender: oneshot::Sender<R>,
}

impl<M, R> AcknowledgedMessage<M, R> {
    /// Create a new message and return it along with the receiver that will be notified when
    /// the message is acknowledged or dropped.
    pub(crate) fn package(message: M) -> (Self, AcknowledgmentReceiver<R>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                message,
                acknowledgment: Acknowledgment { sender },
            },
            AcknowledgmentReceiver { receiver },
        )
    }

    pub(crate) fn into_parts(self) -> (M, Acknowledgment<R>) {
        (self.message, self.acknowledgment)
    }
}

impl<R> Acknowledgment<R> {
    pub(crate) fn acknowledge(self, result: R) {
        // the other end may have hung up, e.g. due to a caller-side timeout
        let _: std::result::Result<_, _> = self.sender.send(result);
    }
}

pub(crate) struct AcknowledgmentReceiver<R> {
    receiver: oneshot::Receiver<R>,
}

impl<R> AcknowledgmentReceiver<R> {
    /// Wait for the message to be acknowledged. Returns `None` when the message was dropped
    /// without the receiving end sending anything back.
    pub(crate) async fn wait_for_acknowledgment(self) -> Option<R> {
        self.receiver.await.ok()
    }
}

/// Handle to a worker. Once all handles have been dropped, the worker will stop waiting for new
/// requests.
#[derive(Debug, Clone)]
pub(crate) struct WorkerHandle {
    _sender: mpsc::Sender<()>,
}

/// Listener used to determine when all handles have been dropped.
#[derive(Debug)]
pub(crate) struct WorkerHandleListener {
    receiver: mpsc::Receiver<()>,
}

impl WorkerHandleListener {
    /// Constructs a new channel for monitoring whether this worker still has references to it.
    pub(crate) fn channel() -> (WorkerHandle, WorkerHandleListener) {
        let (sender, receiver) = mpsc::channel(1);
        (
            WorkerHandle { _sender: sender },
            WorkerHandleListener { receiver },
        )
    }

    /// Listen until all handles are dropped.
    /// This will not return until all handles are dropped, so make sure to only poll this via
    /// select or with a timeout.
    pub(crate) async fn wait_for_all_handle_drops(&mut self) {
        self.receiver.recv().await;
    }
}
