//! Command lifecycle: start, wait, status, stop, running
//!
//! The server is transport-agnostic. It resolves names through the
//! [`SecurityPolicy`], keeps started commands in a [`CommandRegistry`] and
//! derives every [`Status`] fresh from the execution snapshot.

use std::future::Future;
use std::sync::Arc;

use rce_shared::state_machine::is_terminal;
use rce_shared::Status;
use tracing::{debug, info, warn, Instrument, Span};

use crate::command::{CommandHandle, CommandRegistry};
use crate::error::AgentError;
use crate::policy::SecurityPolicy;

pub struct Server {
    policy: SecurityPolicy,
    registry: CommandRegistry,
    span: Span,
}

impl Server {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self::with_span(policy, tracing::info_span!("rce_server"))
    }

    /// Emit every event of this server inside `span`
    pub fn with_span(policy: SecurityPolicy, span: Span) -> Self {
        Self {
            policy,
            registry: CommandRegistry::new(),
            span,
        }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Start a command and return its id without waiting for the process
    ///
    /// The effective argv is the resolved path, then the fixed arguments from
    /// the whitelist, then `args`. Nothing is registered when the name is
    /// rejected or when there is no tokio runtime to launch on.
    pub fn start(&self, name: &str, args: Vec<String>) -> Result<String, AgentError> {
        let _enter = self.span.enter();

        let resolved = self.policy.resolve(name).inspect_err(|e| {
            warn!(name, error = %e, "start rejected");
        })?;

        let mut effective = resolved.fixed_args;
        effective.extend(args);

        let handle = Arc::new(CommandHandle::new(resolved.name, resolved.path, effective));
        let id = handle.id().to_string();

        // Registered before the process exists, so the id is visible to
        // every other call as soon as we return.
        self.registry.add(handle.clone())?;
        if let Err(e) = handle.execution().start() {
            self.registry.remove(&id);
            warn!(id = %id, name, error = %e, "start failed");
            return Err(e.into());
        }

        info!(id = %id, name, args = ?handle.args(), "command started");
        Ok(id)
    }

    /// Block until the command finishes, then reap it
    pub async fn wait(&self, id: &str) -> Result<Status, AgentError> {
        self.wait_or_cancel(id, std::future::pending::<()>()).await
    }

    /// Like [`wait`](Self::wait) but gives up when `cancel` resolves
    ///
    /// On either outcome the command is removed from the registry. A
    /// cancelled wait returns [`AgentError::Cancelled`] carrying the last
    /// status; the process itself is left alone.
    pub async fn wait_or_cancel<F>(&self, id: &str, cancel: F) -> Result<Status, AgentError>
    where
        F: Future<Output = ()>,
    {
        let span = self.span.clone();
        async move {
            let handle = self.get(id)?;
            debug!(id, "waiting for command");

            let finished = tokio::select! {
                biased;
                _ = handle.execution().done() => true,
                _ = cancel => false,
            };

            let status = handle.status();
            self.registry.remove(id);

            if finished {
                info!(
                    id,
                    state = ?status.lifecycle_state(),
                    exit_code = status.exit_code,
                    "command reaped"
                );
                Ok(status)
            } else {
                info!(id, "wait cancelled, command reaped");
                Err(AgentError::Cancelled(Box::new(status)))
            }
        }
        .instrument(span)
        .await
    }

    /// Current status without reaping
    pub fn get_status(&self, id: &str) -> Result<Status, AgentError> {
        let _enter = self.span.enter();
        Ok(self.get(id)?.status())
    }

    /// Send SIGTERM to the command. The command stays registered until waited.
    pub fn stop(&self, id: &str) -> Result<(), AgentError> {
        let _enter = self.span.enter();
        let handle = self.get(id)?;
        let state = handle.execution().state();
        if is_terminal(state) {
            debug!(id, ?state, "stop ignored, command already finished");
            return Ok(());
        }
        handle.execution().terminate();
        info!(id, "stop requested");
        Ok(())
    }

    /// Ids of every registered command, finished-but-unreaped included
    pub fn running(&self) -> Vec<String> {
        self.registry.all()
    }

    fn get(&self, id: &str) -> Result<Arc<CommandHandle>, AgentError> {
        self.registry
            .get(id)
            .ok_or_else(|| AgentError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandSpec, Whitelist};
    use rce_shared::State;
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_server() -> Server {
        let whitelist = Whitelist::new(vec![
            CommandSpec::new("exit.zero", vec!["/bin/true".into()]),
            CommandSpec::new("exit.one", vec!["/bin/false".into()]),
            CommandSpec::new("echo", vec!["/bin/echo".into()]),
            CommandSpec::new("sleep", vec!["/bin/sleep".into()]),
            CommandSpec::new("missing", vec!["/nonexistent/binary".into()]),
        ])
        .expect("valid whitelist");
        Server::new(SecurityPolicy::Whitelist(whitelist))
    }

    #[tokio::test]
    async fn test_exit_zero_completes() {
        let server = test_server();
        let id = server.start("exit.zero", Vec::new()).expect("start");

        let status = server.wait(&id).await.expect("wait");
        assert_eq!(status.id, id);
        assert_eq!(status.name, "exit.zero");
        assert_eq!(status.lifecycle_state(), State::Complete);
        assert_eq!(status.exit_code, 0);
        assert!(status.pid > 0);
        assert!(status.start_time > 0);
        assert!(status.stop_time > 0);
    }

    #[tokio::test]
    async fn test_echo_output() {
        let server = test_server();
        let id = server.start("echo", vec!["hello".into()]).expect("start");

        let status = server.wait(&id).await.expect("wait");
        assert_eq!(status.stdout, vec!["hello".to_string()]);
        assert!(status.stderr.is_empty());
        assert_eq!(status.args, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let server = test_server();
        let id = server.start("exit.one", Vec::new()).expect("start");
        let status = server.wait(&id).await.expect("wait");
        assert_eq!(status.lifecycle_state(), State::Fail);
        assert_eq!(status.exit_code, 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_status_not_error() {
        let server = test_server();
        let id = server.start("missing", Vec::new()).expect("start");
        let status = server.wait(&id).await.expect("wait");
        assert_eq!(status.lifecycle_state(), State::Fail);
        assert_eq!(status.exit_code, -1);
        assert!(!status.error.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_allocates_nothing() {
        let server = test_server();
        let err = server.start("rm", Vec::new()).unwrap_err();
        assert!(matches!(err, AgentError::UnknownCommand(name) if name == "rm"));
        assert!(server.running().is_empty());
    }

    #[tokio::test]
    async fn test_reaped_after_wait() {
        let server = test_server();
        let id = server.start("exit.zero", Vec::new()).expect("start");
        assert_eq!(server.running(), vec![id.clone()]);

        server.wait(&id).await.expect("wait");
        assert!(server.running().is_empty());
        assert!(matches!(server.get_status(&id), Err(AgentError::NotFound(_))));
        assert!(matches!(server.stop(&id), Err(AgentError::NotFound(_))));
        assert!(matches!(server.wait(&id).await, Err(AgentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_stop_long_running_command() {
        let server = test_server();
        let id = server.start("sleep", vec!["60".into()]).expect("start");

        timeout(Duration::from_secs(5), async {
            while server.get_status(&id).expect("status").lifecycle_state() != State::Running {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("sleep is running");

        server.stop(&id).expect("stop");
        // stop does not reap
        assert!(server.running().contains(&id));

        let status = timeout(Duration::from_secs(5), server.wait(&id))
            .await
            .expect("wait returns")
            .expect("wait");
        assert_eq!(status.lifecycle_state(), State::Fail);
        assert_eq!(status.exit_code, -1);
    }

    #[tokio::test]
    async fn test_cancelled_wait_reaps() {
        let server = test_server();
        let id = server.start("sleep", vec!["2".into()]).expect("start");

        let err = server
            .wait_or_cancel(&id, tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap_err();
        match err {
            AgentError::Cancelled(status) => {
                assert_eq!(status.id, id);
                assert_ne!(status.lifecycle_state(), State::Complete);
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert!(server.running().is_empty());
    }

    #[tokio::test]
    async fn test_double_wait_is_tolerated() {
        let server = Arc::new(test_server());
        let id = server.start("echo", vec!["twice".into()]).expect("start");

        let (a, b) = tokio::join!(server.wait(&id), server.wait(&id));
        let a = a.expect("first wait");
        let b = b.expect("second wait");
        assert_eq!(a.stdout, b.stdout);
        assert!(server.running().is_empty());
    }

    #[tokio::test]
    async fn test_get_status_does_not_reap() {
        let server = test_server();
        let id = server.start("exit.zero", Vec::new()).expect("start");
        server.get_status(&id).expect("status");
        server.get_status(&id).expect("status again");
        assert!(server.running().contains(&id));
        server.wait(&id).await.expect("wait");
    }

    #[tokio::test]
    async fn test_stop_after_exit_is_ignored() {
        let server = test_server();
        let id = server.start("exit.zero", Vec::new()).expect("start");
        timeout(Duration::from_secs(5), async {
            while server.get_status(&id).expect("status").lifecycle_state() != State::Complete {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("command finishes");

        server.stop(&id).expect("stop");
        let status = server.get_status(&id).expect("status");
        assert_eq!(status.lifecycle_state(), State::Complete);
        assert_eq!(status.exit_code, 0);
        assert!(server.running().contains(&id));
        server.wait(&id).await.expect("wait");
    }

    #[test]
    fn test_start_without_runtime_registers_nothing() {
        let server = test_server();
        let err = server.start("exit.zero", Vec::new()).unwrap_err();
        assert!(matches!(err, AgentError::NoRuntime(_)));
        assert_eq!(err.kind(), rce_shared::ErrorKind::Internal);
        assert!(server.running().is_empty());
    }
}
