//! Maps wire requests onto [`Server`] operations

use rce_shared::envelope::Payload;
use rce_shared::{Empty, ErrorKind, Id, IdList, RpcError};
use tokio::sync::watch;
use tracing::warn;

use crate::error::AgentError;
use crate::server::Server;

/// Handle one request payload and produce the reply payload
///
/// `closed` flips to `true` when the connection the request arrived on goes
/// away; an outstanding Wait treats that as cancellation.
pub async fn handle_request(
    server: &Server,
    payload: Option<Payload>,
    mut closed: watch::Receiver<bool>,
) -> Payload {
    let result = match payload {
        Some(Payload::Start(command)) => server
            .start(&command.name, command.arguments)
            .map(|id| Payload::CommandId(Id { id })),
        Some(Payload::Wait(Id { id })) => {
            let cancel = async move {
                let _ = closed.wait_for(|closed| *closed).await;
            };
            server
                .wait_or_cancel(&id, cancel)
                .await
                .map(Payload::Status)
        }
        Some(Payload::GetStatus(Id { id })) => server.get_status(&id).map(Payload::Status),
        Some(Payload::Stop(Id { id })) => server.stop(&id).map(|()| Payload::Ack(Empty {})),
        Some(Payload::Running(Empty {})) => Ok(Payload::Ids(IdList {
            ids: server.running(),
        })),
        Some(other) => {
            warn!(payload = other.name(), "unexpected payload");
            return Payload::Error(RpcError::new(
                ErrorKind::InvalidArgument,
                format!("{} is not a request", other.name()),
            ));
        }
        None => {
            return Payload::Error(RpcError::new(
                ErrorKind::InvalidArgument,
                "request has no payload",
            ));
        }
    };

    result.unwrap_or_else(|e: AgentError| Payload::Error(e.to_rpc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandSpec, Whitelist};
    use crate::policy::SecurityPolicy;
    use rce_shared::{Command, State, Status};

    fn test_server() -> Server {
        let whitelist = Whitelist::new(vec![
            CommandSpec::new("echo", vec!["/bin/echo".into()]),
            CommandSpec::new("sleep", vec!["/bin/sleep".into()]),
        ])
        .expect("valid whitelist");
        Server::new(SecurityPolicy::Whitelist(whitelist))
    }

    /// Stands in for a live connection; dropping it counts as a close
    struct Connection {
        closed: watch::Sender<bool>,
    }

    impl Connection {
        fn new() -> Self {
            Self {
                closed: watch::channel(false).0,
            }
        }

        async fn request(&self, server: &Server, payload: Payload) -> Payload {
            handle_request(server, Some(payload), self.closed.subscribe()).await
        }
    }

    async fn start(server: &Server, conn: &Connection, name: &str, args: &[&str]) -> Payload {
        let command = Command {
            name: name.to_string(),
            arguments: args.iter().map(|s| s.to_string()).collect(),
        };
        conn.request(server, Payload::Start(command)).await
    }

    #[tokio::test]
    async fn test_start_then_wait() {
        let server = test_server();
        let conn = Connection::new();
        let Payload::CommandId(Id { id }) = start(&server, &conn, "echo", &["hi"]).await else {
            panic!("expected a command id");
        };

        let reply = conn.request(&server, Payload::Wait(Id { id })).await;
        let Payload::Status(status) = reply else {
            panic!("expected a status");
        };
        assert_eq!(status.lifecycle_state(), State::Complete);
        assert_eq!(status.stdout, vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_command_is_invalid_argument() {
        let server = test_server();
        let conn = Connection::new();
        let Payload::Error(err) = start(&server, &conn, "rm", &[]).await else {
            panic!("expected an error");
        };
        assert_eq!(err.error_kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let server = test_server();
        let reply = Connection::new()
            .request(&server, Payload::GetStatus(Id { id: "nope".into() }))
            .await;
        let Payload::Error(err) = reply else {
            panic!("expected an error");
        };
        assert_eq!(err.error_kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_reply_payload_is_rejected() {
        let server = test_server();
        let conn = Connection::new();
        let reply = conn.request(&server, Payload::Status(Status::default())).await;
        assert!(matches!(
            reply,
            Payload::Error(err) if err.error_kind() == ErrorKind::InvalidArgument
        ));

        let reply = handle_request(&server, None, conn.closed.subscribe()).await;
        assert!(matches!(reply, Payload::Error(_)));
    }

    #[tokio::test]
    async fn test_connection_close_cancels_wait() {
        let server = test_server();
        let conn = Connection::new();
        let Payload::CommandId(Id { id }) = start(&server, &conn, "sleep", &["2"]).await else {
            panic!("expected a command id");
        };

        let (closed_tx, closed_rx) = watch::channel(false);
        let wait = handle_request(&server, Some(Payload::Wait(Id { id: id.clone() })), closed_rx);
        let close = async {
            tokio::task::yield_now().await;
            closed_tx.send_replace(true);
        };
        let (reply, ()) = tokio::join!(wait, close);

        assert!(matches!(
            reply,
            Payload::Error(err) if err.error_kind() == ErrorKind::Cancelled
        ));
        let Payload::Ids(IdList { ids }) = conn.request(&server, Payload::Running(Empty {})).await
        else {
            panic!("expected ids");
        };
        assert!(!ids.contains(&id));
    }
}
