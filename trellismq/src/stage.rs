use slog::{debug, info, warn};

use trellismq_codec::types::Publish;
use trellismq_codec::{Connect, ConnectAck, ConnectAckReason, Packet, QoS, SubscribeReturnCode};

use crate::acl::{self, Ability, Action};
use crate::fitter::Fitter;
use crate::router::RouterError;
use crate::session::SessionState;
use crate::topic::Topic;
use crate::types::{Credentials, Id, Status};
use crate::Result;

#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("protocol violation: {0}")]
    Violation(&'static str),
    #[error("not authorized")]
    NotAuthorized,
    #[error("connect refused: {}", .0.reason())]
    Refused(ConnectAckReason),
}

/// Per-connection protocol stage. A connection is born in `Genesis`,
/// where only CONNECT is legal, and moves to `Online` after a successful
/// acknowledgement. Any illegal packet for the current stage collapses
/// the connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Stage {
    Genesis,
    Online,
}

impl Stage {
    pub async fn handle(self, state: &mut SessionState, packet: Packet) -> Result<Stage> {
        match self {
            Stage::Genesis => match packet {
                Packet::Connect(connect) => handle_connect(state, *connect).await,
                _ => Err(StageError::Violation("expected CONNECT").into()),
            },
            Stage::Online => match packet {
                Packet::Connect(_) => Err(StageError::Violation("duplicate CONNECT").into()),
                Packet::Publish(publish) => {
                    handle_publish(state, publish).await?;
                    Ok(Stage::Online)
                }
                Packet::Queue(publish) => {
                    handle_queue(state, publish).await?;
                    Ok(Stage::Online)
                }
                Packet::Subscribe { packet_id, topic, qos } => {
                    handle_subscribe(state, packet_id, topic, qos).await?;
                    Ok(Stage::Online)
                }
                Packet::PublishAck { packet_id } => {
                    state.on_publish_ack(packet_id).await?;
                    Ok(Stage::Online)
                }
                Packet::PingRequest => {
                    state.sink.priority(Packet::PingResponse)?;
                    Ok(Stage::Online)
                }
                Packet::Disconnect => {
                    debug!(state.scx.logger, "disconnect"; "id" => ?state.id);
                    state.status.set(Status::GoingDown);
                    Ok(Stage::Online)
                }
                Packet::ConnectAck { .. } | Packet::SubscribeAck { .. } | Packet::PingResponse => {
                    Err(StageError::Violation("server-bound ack").into())
                }
            },
        }
    }
}

fn refuse(state: &SessionState, reason: ConnectAckReason) -> Result<Stage> {
    state.sink.priority(Packet::ConnectAck(ConnectAck { reason, session_present: false }))?;
    Err(StageError::Refused(reason).into())
}

async fn handle_connect(state: &mut SessionState, connect: Connect) -> Result<Stage> {
    if connect.client_id.len() > state.cfg.max_clientid_len {
        return refuse(state, ConnectAckReason::IdentifierRejected);
    }
    // The codec only lets an empty client id through alongside clean
    // start; such clients get a generated identity.
    let client_id = if connect.client_id.is_empty() {
        format!("tmq-{}", uuid::Uuid::new_v4().simple()).into()
    } else {
        connect.client_id.clone()
    };
    let username = if connect.username.is_empty() { None } else { Some(connect.username.clone()) };

    let credentials =
        Credentials { client_id: client_id.clone(), username: username.clone(), password: connect.password.clone() };
    let authenticated = state.scx.extends.auth().await.can_authenticate(&credentials).await?;
    if !authenticated {
        info!(state.scx.logger, "authentication refused";
            "client_id" => %client_id, "user_type" => credentials.user_type());
        return refuse(state, ConnectAckReason::BadCredentials);
    }

    let fitter = Fitter::new(state.cfg.as_ref());
    let keep_alive = match fitter.keep_alive(connect.keep_alive) {
        Ok(ka) => ka,
        Err(e) => {
            warn!(state.scx.logger, "keepalive rejected"; "client_id" => %client_id, "error" => %e);
            return refuse(state, ConnectAckReason::ServiceUnavailable);
        }
    };

    let id = Id::new(state.id.local_addr, state.id.remote_addr, client_id, username);
    let mut entry = state.scx.extends.shared().await.entry(id.clone());
    if state.scx.extends.shared().await.exists(id.client_id.as_ref()) {
        info!(state.scx.logger, "kicking existing session"; "id" => ?id);
        entry.kick(id.clone(), connect.clean_start).await?;
    }

    let session_present = if connect.clean_start {
        let storage = state.scx.extends.storage().await;
        storage.clear(id.client_id.as_ref()).await;
        state.scx.extends.router().await.remove_all(id.clone()).await?;
        false
    } else {
        let pending = !state.scx.extends.storage().await.get_all_outbound(id.client_id.as_ref()).await.is_empty();
        let subscribed =
            !state.scx.extends.router().await.client_topics(id.client_id.as_ref()).is_empty();
        pending || subscribed
    };

    state.id = id.clone();
    state.keep_alive = keep_alive;
    entry.set(id.clone(), state.msg_tx.clone(), state.status.clone());

    state
        .sink
        .priority(Packet::ConnectAck(ConnectAck { reason: ConnectAckReason::Accepted, session_present }))?;
    state.status.set(Status::Online);
    state.scx.sessions.inc();

    info!(state.scx.logger, "connected";
        "id" => ?id, "clean_start" => connect.clean_start,
        "keep_alive" => keep_alive, "session_present" => session_present);

    if !connect.clean_start {
        state.redeliver_pending().await?;
    }
    Ok(Stage::Online)
}

/// QoS 1 inbound acknowledgement bracket: remember the packet id while the
/// ack is written, so a retried delivery arriving in between is visible.
async fn ack_inbound(state: &SessionState, publish: &Publish) -> Result<()> {
    let Some(packet_id) = publish.packet_id else {
        return Err(StageError::Violation("QoS 1 publish without packet id").into());
    };
    let storage = state.scx.extends.storage().await;
    storage.add_inbound(&state.id.client_id, publish.clone()).await;
    state.sink.priority(Packet::PublishAck { packet_id })?;
    storage.delete_inbound(state.id.client_id.as_ref(), packet_id).await;
    Ok(())
}

fn check_perm(state: &SessionState, auth: &dyn acl::Auth, action: Action, resource: &str) -> Result<()> {
    let allowed = acl::has_perm(auth, state.id.user_type(), Ability::Write, action, resource);
    if allowed {
        Ok(())
    } else {
        warn!(state.scx.logger, "permission denied";
            "id" => ?state.id, "action" => ?action, "resource" => resource);
        Err(StageError::NotAuthorized.into())
    }
}

async fn handle_publish(state: &mut SessionState, publish: Publish) -> Result<()> {
    {
        let auth = state.scx.extends.auth().await;
        check_perm(state, &*auth, Action::Publish, publish.topic.as_ref())?;
    }
    if publish.qos == QoS::AtLeastOnce {
        ack_inbound(state, &publish).await?;
    }

    let topic = publish.topic.clone();
    match state.scx.extends.router().await.find(&topic).await {
        Ok(map) => {
            let n = state
                .scx
                .extends
                .shared()
                .await
                .forwards(state.id.clone(), publish, map)
                .await?;
            debug!(state.scx.logger, "published"; "id" => ?state.id, "topic" => %topic, "receivers" => n);
        }
        Err(e) if e.downcast_ref::<RouterError>() == Some(&RouterError::NoSubs) => {
            debug!(state.scx.logger, "publish without subscribers"; "id" => ?state.id, "topic" => %topic);
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn handle_queue(state: &mut SessionState, publish: Publish) -> Result<()> {
    {
        let auth = state.scx.extends.auth().await;
        check_perm(state, &*auth, Action::Queue, publish.topic.as_ref())?;
    }
    if publish.qos == QoS::AtLeastOnce {
        ack_inbound(state, &publish).await?;
    }

    let topic = publish.topic.clone();
    match state.scx.extends.router().await.find(&topic).await {
        Ok(map) => {
            let receiver = state
                .scx
                .extends
                .shared()
                .await
                .forward_queue(state.id.clone(), publish, map)
                .await;
            match receiver {
                Some(to) => {
                    debug!(state.scx.logger, "queued"; "id" => ?state.id, "topic" => %topic, "to" => %to)
                }
                None => {
                    debug!(state.scx.logger, "queue without receiver"; "id" => ?state.id, "topic" => %topic)
                }
            }
        }
        Err(e) if e.downcast_ref::<RouterError>() == Some(&RouterError::NoSubs) => {
            debug!(state.scx.logger, "queue without subscribers"; "id" => ?state.id, "topic" => %topic);
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn handle_subscribe(
    state: &mut SessionState,
    packet_id: Option<std::num::NonZeroU16>,
    topic: bytestring::ByteString,
    qos: QoS,
) -> Result<()> {
    if topic.parse::<Topic>().is_err() {
        warn!(state.scx.logger, "invalid topic filter"; "id" => ?state.id, "topic" => %topic);
        if let Some(packet_id) = packet_id {
            state.sink.priority(Packet::SubscribeAck { packet_id, status: SubscribeReturnCode::Failure })?;
        }
        return Ok(());
    }
    {
        let auth = state.scx.extends.auth().await;
        let allowed =
            acl::has_perm(&*auth, state.id.user_type(), Ability::Read, Action::Subscribe, topic.as_ref());
        if !allowed {
            warn!(state.scx.logger, "subscribe denied"; "id" => ?state.id, "topic" => %topic);
            return Err(StageError::NotAuthorized.into());
        }
    }

    state.scx.extends.router().await.add(topic.as_ref(), state.id.clone(), qos).await?;
    debug!(state.scx.logger, "subscribed"; "id" => ?state.id, "topic" => %topic, "qos" => qos.value());
    if let Some(packet_id) = packet_id {
        state
            .sink
            .priority(Packet::SubscribeAck { packet_id, status: SubscribeReturnCode::Success(qos) })?;
    }
    Ok(())
}
