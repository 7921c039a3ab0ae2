use crate::config::WsConfig;
use crate::error::{AppError, ErrorKind};
use crate::services::identity::AuthenticatedIdentity;
use crate::websocket::events::InboundCommand;
use crate::websocket::gateway::FanoutGateway;
use crate::websocket::registry::ConnectionId;
use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, StreamHandler, WrapFuture};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Connection lifecycle. There is no separate `Authenticated` phase: it is
/// merged into `Joined` because `FanoutGateway::on_connect` registers the
/// connection and joins its groups atomically with authentication, so a
/// session goes straight from `Connecting` to `Joined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Joined,
    Closed,
}

/// One realtime connection.
///
/// Inbound commands run through `ctx.wait`, which holds back the next socket
/// message until the current command has finished its ledger write and
/// broadcasts. That keeps per-connection commands in order.
pub struct WsSession {
    connection_id: ConnectionId,
    gateway: Arc<FanoutGateway>,
    credential: Option<String>,
    identity: Option<AuthenticatedIdentity>,
    phase: SessionPhase,
    hb: Instant,
    config: WsConfig,
}

impl WsSession {
    pub fn new(gateway: Arc<FanoutGateway>, credential: Option<String>, config: WsConfig) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            gateway,
            credential,
            identity: None,
            phase: SessionPhase::Connecting,
            hb: Instant::now(),
            config,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.config.client_timeout;
        ctx.run_interval(self.config.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(connection_id = %act.connection_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn authenticate(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let (tx, rx) = unbounded_channel::<String>();
        ctx.add_stream(UnboundedReceiverStream::new(rx));

        let gateway = self.gateway.clone();
        let connection_id = self.connection_id;
        let credential = self.credential.take();

        ctx.wait(
            async move { gateway.on_connect(connection_id, tx, credential.as_deref()).await }
                .into_actor(self)
                .map(|result, act, ctx| match result {
                    Ok(identity) => {
                        act.identity = Some(identity);
                        act.phase = SessionPhase::Joined;
                    }
                    Err(e) => {
                        tracing::info!(connection_id = %act.connection_id, error = %e, "WebSocket authentication rejected");
                        ctx.text(e.to_event().to_frame());
                        ctx.close(Some(ws::CloseReason {
                            code: ws::CloseCode::Policy,
                            description: Some(e.error_code().to_string()),
                        }));
                        act.phase = SessionPhase::Closed;
                        ctx.stop();
                    }
                }),
        );
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(identity) = self.identity.clone() else {
            ctx.text(AppError::Unauthorized.to_event().to_frame());
            return;
        };

        let command = match InboundCommand::parse(text) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!(connection_id = %self.connection_id, error = %e, "unparseable command");
                ctx.text(
                    AppError::BadRequest(e.to_string())
                        .to_event()
                        .to_frame(),
                );
                return;
            }
        };

        let gateway = self.gateway.clone();
        let name = command.name();
        ctx.wait(
            async move { gateway.handle_command(&identity, command).await }
                .into_actor(self)
                .map(move |result, act, ctx| {
                    if let Err(e) = result {
                        if e.kind() == ErrorKind::Transient {
                            tracing::error!(connection_id = %act.connection_id, command = name, error = %e, "command failed");
                        } else {
                            tracing::debug!(connection_id = %act.connection_id, command = name, error = %e, "command rejected");
                        }
                        ctx.text(e.to_event().to_frame());
                    }
                }),
        );
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(connection_id = %self.connection_id, "WebSocket session started");
        self.hb(ctx);
        self.authenticate(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if self.phase == SessionPhase::Joined {
            self.gateway.on_disconnect(self.connection_id);
        }
        self.phase = SessionPhase::Closed;
        tracing::debug!(connection_id = %self.connection_id, "WebSocket session stopped");
    }
}

/// Frames pushed through the presence registry
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        ctx.text(frame);
    }

    // The registry drops the sender on deregistration; nothing to do here.
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                ctx.text(
                    AppError::BadRequest("binary frames are not supported".into())
                        .to_event()
                        .to_frame(),
                );
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}
