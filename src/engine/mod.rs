//! Task supervisor.
//!
//! Spawns the two receivers and one sender per destination, then waits:
//! - a receiver ending is always fatal
//! - a sender ending on socket setup only stops that destination
//! - any other sender error is fatal
//! - once every sender has stopped, the run fails with
//!   [`PingError::AllSendersStopped`]
//!
//! There is no success exit: a healthy run never returns.

mod receiver;
mod sender;

pub use receiver::{Match, Receiver, match_reply};
pub use sender::{Sender, SenderSockets};

use std::convert::Infallible;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::core::{PingError, PingResult, RecordSink};
use crate::session::SessionRegistry;
use crate::transport::{IcmpSocket, IpFamily};

/// Run all receivers and senders until the process must exit.
pub async fn run(registry: Arc<SessionRegistry>, sink: Arc<dyn RecordSink>) -> PingResult<Infallible> {
    let mut receivers = JoinSet::new();
    for family in [IpFamily::V4, IpFamily::V6] {
        let socket =
            IcmpSocket::listen(family).map_err(|source| PingError::Listen { family, source })?;
        let receiver = Receiver::new(family, Arc::clone(&registry), Arc::clone(&sink));
        receivers.spawn(receiver.run(socket));
    }

    let mut senders = JoinSet::new();
    for index in 0..registry.len() {
        if let Some(sender) = Sender::new(Arc::clone(&registry), index, Arc::clone(&sink)) {
            senders.spawn(sender.run());
        }
    }
    tracing::info!(destinations = registry.len(), "probing started");

    supervise(receivers, senders).await
}

type Tasks = JoinSet<PingResult<Infallible>>;

/// Wait on the running tasks until one of them ends the process.
async fn supervise(mut receivers: Tasks, mut senders: Tasks) -> PingResult<Infallible> {
    loop {
        tokio::select! {
            Some(joined) = receivers.join_next() => {
                return Err(task_error(joined));
            }
            joined = senders.join_next() => {
                let Some(joined) = joined else {
                    return Err(PingError::AllSendersStopped);
                };
                let error = task_error(joined);
                if error.is_fatal() {
                    return Err(error);
                }
                tracing::error!(error = %error, "destination stopped");
            }
        }
    }
}

fn task_error(joined: Result<PingResult<Infallible>, tokio::task::JoinError>) -> PingError {
    match joined {
        Ok(Ok(never)) => match never {},
        Ok(Err(error)) => error,
        Err(join_error) => PingError::Task(join_error),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::output::StdoutSink;

    async fn explode() -> PingResult<Infallible> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panicked_task_is_task_error() {
        let mut set = JoinSet::new();
        set.spawn(explode());
        let joined = set.join_next().await.unwrap();
        assert!(matches!(task_error(joined), PingError::Task(_)));
    }

    #[tokio::test]
    async fn test_task_error_passes_error_through() {
        let mut set = JoinSet::new();
        set.spawn(async { Err::<Infallible, _>(PingError::AllSendersStopped) });
        let joined = set.join_next().await.unwrap();
        assert!(matches!(task_error(joined), PingError::AllSendersStopped));
    }

    fn entropy_error() -> crate::core::RandomError {
        rand::Error::new(std::io::Error::other("entropy unavailable")).into()
    }

    fn setup_error() -> PingError {
        PingError::SocketSetup {
            family: IpFamily::V4,
            destination: "a.example".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        }
    }

    fn tasks(results: impl IntoIterator<Item = Option<PingError>>) -> Tasks {
        let mut set = JoinSet::new();
        for result in results {
            match result {
                Some(error) => set.spawn(async move { Err(error) }),
                None => set.spawn(std::future::pending()),
            };
        }
        set
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_stops_one_destination() {
        let receivers = tasks([None, None]);
        let senders = tasks([Some(setup_error()), None]);
        let supervised = tokio::time::timeout(Duration::from_secs(3600), supervise(receivers, senders));
        assert!(supervised.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_sender_error_ends_run() {
        let receivers = tasks([None, None]);
        let senders = tasks([
            Some(PingError::KeyRotation {
                destination: "a.example".into(),
                source: entropy_error(),
            }),
            None,
        ]);
        let result = tokio::time::timeout(Duration::from_secs(1), supervise(receivers, senders)).await;
        assert!(matches!(result, Ok(Err(PingError::KeyRotation { .. }))));
    }

    #[tokio::test]
    async fn test_all_senders_stopped() {
        let receivers = tasks([None, None]);
        let senders = tasks([Some(setup_error()), Some(setup_error())]);
        assert!(matches!(
            supervise(receivers, senders).await,
            Err(PingError::AllSendersStopped)
        ));
    }

    #[tokio::test]
    async fn test_receiver_end_is_fatal() {
        let receivers = tasks([
            Some(PingError::ReceiveFailed {
                family: IpFamily::V6,
                source: std::io::Error::other("boom"),
            }),
            None,
        ]);
        let senders = tasks([None]);
        assert!(matches!(
            supervise(receivers, senders).await,
            Err(PingError::ReceiveFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_never_succeeds() {
        let registry = Arc::new(SessionRegistry::build(Vec::new()).unwrap());
        // Without CAP_NET_RAW the listeners fail; with it there is no sender.
        let result = run(registry, Arc::new(StdoutSink)).await;
        assert!(matches!(
            result,
            Err(PingError::AllSendersStopped | PingError::Listen { .. })
        ));
    }
}
