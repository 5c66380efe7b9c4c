//! A registered command: identity plus its execution

use rce_shared::state_machine::derive_state;
use rce_shared::Status;
use uuid::Uuid;

use super::exec::Execution;

/// One accepted command, addressed by a unique id
pub struct CommandHandle {
    id: String,
    name: String,
    args: Vec<String>,
    execution: Execution,
}

impl CommandHandle {
    /// Create a handle with a fresh random id
    ///
    /// `args` is the effective argument list (fixed args followed by caller args).
    pub fn new(name: impl Into<String>, path: impl Into<String>, args: Vec<String>) -> Self {
        Self::with_id(new_id(), name, path, args)
    }

    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        let execution = Execution::new(path, args.clone());
        Self {
            id: id.into(),
            name: name.into(),
            args,
            execution,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    /// Build a status from a fresh snapshot. The state is derived, never stored.
    pub fn status(&self) -> Status {
        let snap = self.execution.snapshot();
        let state = derive_state(snap.start_time, snap.stop_time, snap.exit_code);
        Status {
            id: self.id.clone(),
            name: self.name.clone(),
            state: state.into(),
            pid: snap.pid,
            start_time: snap.start_time,
            stop_time: snap.stop_time,
            exit_code: snap.exit_code,
            args: self.args.clone(),
            stdout: snap.stdout,
            stderr: snap.stderr,
            error: snap.error,
        }
    }
}

impl std::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("path", &self.execution.path())
            .field("args", &self.args)
            .finish()
    }
}

/// 32 lowercase hex characters
fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rce_shared::State;

    #[test]
    fn test_ids_are_unique_and_dashless() {
        let a = CommandHandle::new("exit.zero", "/bin/true", Vec::new());
        let b = CommandHandle::new("exit.zero", "/bin/true", Vec::new());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().len(), 32);
        assert!(!a.id().contains('-'));
    }

    #[tokio::test]
    async fn test_pending_status() {
        let handle = CommandHandle::with_id("abc", "echo", "/bin/echo", vec!["hi".into()]);
        let status = handle.status();
        assert_eq!(status.id, "abc");
        assert_eq!(status.name, "echo");
        assert_eq!(status.lifecycle_state(), State::Pending);
        assert_eq!(status.exit_code, -1);
        assert_eq!(status.args, vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_complete_status() {
        let handle = CommandHandle::new("echo", "/bin/echo", vec!["hi".into()]);
        handle.execution().start().expect("runtime");
        handle.execution().done().await;

        let status = handle.status();
        assert_eq!(status.lifecycle_state(), State::Complete);
        assert_eq!(status.exit_code, 0);
        assert_eq!(status.stdout, vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_status() {
        let handle = CommandHandle::new("exit.one", "/bin/false", Vec::new());
        handle.execution().start().expect("runtime");
        handle.execution().done().await;
        assert_eq!(handle.status().lifecycle_state(), State::Fail);
    }
}
