//! The Matrix bot: login, sync loop, invite handling and per-message pipeline runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use matrix_sdk::config::{RequestConfig, SyncSettings};
use matrix_sdk::ruma::UserId;
use matrix_sdk::ruma::api::client::session::logout_all;
use matrix_sdk::ruma::events::room::encrypted::OriginalSyncRoomEncryptedEvent;
use matrix_sdk::ruma::events::room::member::StrippedRoomMemberEvent;
use matrix_sdk::ruma::events::room::message::{MessageType, OriginalSyncRoomMessageEvent};
use matrix_sdk::{Client, Room, RoomState};
use secrecy::ExposeSecret;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use wayback_core::ServiceContext;
use wayback_shared::{Result, WaybackError, require_secret};

use crate::reply::MatrixReply;

/// How long the homeserver may hold a sync request open.
const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause before retrying a failed sync.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Serves one Matrix account until the context is cancelled.
#[derive(Clone)]
pub struct MatrixBot {
    client: Client,
    ctx: ServiceContext,
}

impl MatrixBot {
    /// Log in with the configured account.
    ///
    /// Missing homeserver, user id or password, and a rejected login, are
    /// startup errors.
    #[instrument(skip_all)]
    pub async fn connect(ctx: ServiceContext) -> Result<Self> {
        let config = &ctx.config.matrix;
        if config.homeserver.trim().is_empty() {
            return Err(WaybackError::startup("matrix homeserver is not configured"));
        }
        if config.user_id.trim().is_empty() {
            return Err(WaybackError::startup("matrix user id is not configured"));
        }
        let password = require_secret(&config.password_env, "Matrix password")?;

        let client = Client::builder()
            .homeserver_url(&config.homeserver)
            .request_config(RequestConfig::short_retry())
            .build()
            .await
            .map_err(|e| WaybackError::startup(format!("matrix client: {e}")))?;
        client
            .matrix_auth()
            .login_username(&config.user_id, password.expose_secret())
            .initial_device_display_name("wayback")
            .await
            .map_err(|e| WaybackError::startup(format!("matrix login failed: {e}")))?;
        info!(user_id = %config.user_id, "logged in to matrix");

        Ok(Self { client, ctx })
    }

    /// Run the sync loop until cancelled, then wait for in-flight messages
    /// and log out every session of the account.
    #[instrument(skip_all, fields(user_id = ?self.client.user_id()))]
    pub async fn serve(self) -> Result<()> {
        info!("matrix bot serving");
        self.listen().await;

        info!("stopping sync and logging out all sessions");
        let client = self.client.clone();
        let logout = async move {
            client
                .send(logout_all::v3::Request::new())
                .await
                .map(|_| ())
                .map_err(|e| WaybackError::Transport(format!("logout failed: {e}")))
        };
        if let Err(e) = after_drain(&self.ctx.tracker, logout).await {
            warn!(error = %e, "logout failed");
        }
        Ok(())
    }

    async fn listen(&self) {
        let cancel = self.ctx.cancel.clone();

        // The first sync only accepts invitations so old history is not replayed.
        let initial = loop {
            let synced = tokio::select! {
                () = cancel.cancelled() => return,
                synced = self.client.sync_once(SyncSettings::default()) => synced,
            };
            match synced {
                Ok(response) => break response,
                Err(e) => {
                    warn!(error = %e, "initial sync failed, retrying");
                    if !self.pause().await {
                        return;
                    }
                }
            }
        };
        debug!(next_batch = %initial.next_batch, "skipping history from initial sync");
        for room in self.client.invited_rooms() {
            self.accept(room);
        }
        self.register_handlers();

        let settings = SyncSettings::default().timeout(SYNC_TIMEOUT);
        loop {
            let synced = tokio::select! {
                () = cancel.cancelled() => return,
                synced = self.client.sync(settings.clone()) => synced,
            };
            if let Err(e) = synced {
                warn!(error = %e, "sync failed, retrying");
                if !self.pause().await {
                    return;
                }
            }
        }
    }

    /// Wait before a retry; `false` when cancelled meanwhile.
    async fn pause(&self) -> bool {
        tokio::select! {
            () = self.ctx.cancel.cancelled() => false,
            () = tokio::time::sleep(RETRY_DELAY) => true,
        }
    }

    fn register_handlers(&self) {
        let bot = self.clone();
        self.client
            .add_event_handler(move |event: OriginalSyncRoomMessageEvent, room: Room| {
                let bot = bot.clone();
                async move { bot.on_message(event, room) }
            });

        let bot = self.clone();
        self.client
            .add_event_handler(move |event: StrippedRoomMemberEvent, room: Room| {
                let bot = bot.clone();
                async move { bot.on_member(&event, room) }
            });

        self.client.add_event_handler(
            |event: OriginalSyncRoomEncryptedEvent, room: Room| async move {
                error!(
                    room_id = %room.room_id(),
                    event_id = %event.event_id,
                    "encrypted messages are not supported"
                );
            },
        );
    }

    fn on_member(&self, event: &StrippedRoomMemberEvent, room: Room) {
        if self.client.user_id() != Some(&*event.state_key) || room.state() != RoomState::Invited {
            return;
        }
        self.accept(room);
    }

    fn accept(&self, room: Room) {
        self.ctx.tracker.spawn(async move {
            let room_id = room.room_id().to_owned();
            match room.join().await {
                Ok(()) => info!(%room_id, "accepted invitation"),
                Err(e) => error!(%room_id, error = %e, "accepting invitation failed"),
            }
        });
    }

    fn on_message(&self, event: OriginalSyncRoomMessageEvent, room: Room) {
        if room.state() != RoomState::Joined {
            return;
        }
        let Some(text) = message_text(&event, self.client.user_id()) else {
            return;
        };
        debug!(
            room_id = %room.room_id(),
            event_id = %event.event_id,
            sender = %event.sender,
            "message received"
        );
        spawn_run(
            &self.ctx,
            MatrixReply::new(Arc::new(room), event.event_id, text),
        );
    }
}

/// The body of a message the bot should answer: plain text from someone
/// other than the bot itself.
fn message_text(event: &OriginalSyncRoomMessageEvent, own: Option<&UserId>) -> Option<String> {
    if own == Some(&*event.sender) {
        return None;
    }
    match &event.content.msgtype {
        MessageType::Text(text) => Some(text.body.clone()),
        other => {
            info!(
                event_id = %event.event_id,
                msgtype = other.msgtype(),
                "only text messages are supported"
            );
            None
        }
    }
}

/// Run the pipeline for one message without blocking the sync loop.
fn spawn_run(ctx: &ServiceContext, reply: MatrixReply) {
    let pipeline = ctx.pipeline.clone();
    ctx.tracker.spawn(async move {
        let outcome = pipeline.run(reply.text(), &reply).await;
        debug!(state = ?outcome.state(), "message processed");
    });
}

/// Wait for every task on `tracker`, then run `finish`.
async fn after_drain<F>(tracker: &TaskTracker, finish: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tracker.close();
    tracker.wait().await;
    finish.await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use wayback_archiver::Broker;
    use wayback_core::Policy;
    use wayback_shared::{AppConfig, Mapping, Slot, SlotRegistry};

    use super::*;
    use crate::reply::tests::{FakeRoom, event_id};

    /// Archives with the Internet Archive after `delay`.
    struct SlowBroker {
        delay: Duration,
    }

    #[async_trait]
    impl Broker for SlowBroker {
        async fn ia(&self, urls: &[String]) -> Result<Mapping> {
            tokio::time::sleep(self.delay).await;
            Ok(urls
                .iter()
                .map(|u| (u.clone(), format!("https://web.archive.org/web/{u}")))
                .collect())
        }
        async fn is(&self, _urls: &[String]) -> Result<Mapping> {
            Ok(Mapping::new())
        }
        async fn ip(&self, _urls: &[String]) -> Result<Mapping> {
            Ok(Mapping::new())
        }
        async fn ph(&self, _urls: &[String]) -> Result<Mapping> {
            Ok(Mapping::new())
        }
    }

    fn context(config: AppConfig, delay: Duration) -> ServiceContext {
        let mut registry = SlotRegistry::from(&config);
        registry.restrict_to(&[Slot::Ia]);
        ServiceContext::with_broker(
            config,
            registry,
            Policy::Tolerant,
            Arc::new(SlowBroker { delay }),
        )
        .unwrap()
    }

    fn message(sender: &str, content: serde_json::Value) -> OriginalSyncRoomMessageEvent {
        serde_json::from_value(json!({
            "type": "m.room.message",
            "event_id": "$msg:example.org",
            "sender": sender,
            "origin_server_ts": 1_700_000_000_000_u64,
            "content": content,
        }))
        .unwrap()
    }

    async fn drain(ctx: &ServiceContext) {
        ctx.tracker.close();
        ctx.tracker.wait().await;
    }

    #[tokio::test]
    async fn connect_without_homeserver_is_a_startup_error() {
        let err = MatrixBot::connect(context(AppConfig::default(), Duration::ZERO))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WaybackError::Startup { .. }));
    }

    #[tokio::test]
    async fn connect_without_user_is_a_startup_error() {
        let mut config = AppConfig::default();
        config.matrix.homeserver = "https://matrix.example.org".into();

        let err = MatrixBot::connect(context(config, Duration::ZERO))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("user id"));
    }

    #[tokio::test]
    async fn connect_without_password_is_a_startup_error() {
        let mut config = AppConfig::default();
        config.matrix.homeserver = "https://matrix.example.org".into();
        config.matrix.user_id = "@wayback:example.org".into();
        config.matrix.password_env = "WAYBACK_TEST_MATRIX_UNSET_PASSWORD".into();

        let err = MatrixBot::connect(context(config, Duration::ZERO))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WaybackError::Startup { .. }));
        assert!(err.to_string().contains("WAYBACK_TEST_MATRIX_UNSET_PASSWORD"));
    }

    #[test]
    fn only_text_from_others_is_answered() {
        let own = UserId::parse("@wayback:example.org").unwrap();
        let own = Some(&*own);
        let text = json!({ "msgtype": "m.text", "body": "see http://a.example" });

        assert_eq!(
            message_text(&message("@alice:example.org", text.clone()), own).as_deref(),
            Some("see http://a.example")
        );
        assert_eq!(message_text(&message("@wayback:example.org", text), own), None);
        assert_eq!(
            message_text(
                &message(
                    "@alice:example.org",
                    json!({ "msgtype": "m.notice", "body": "http://b.example" })
                ),
                own
            ),
            None
        );
    }

    #[tokio::test]
    async fn text_message_is_archived_redacted_and_read() {
        let ctx = context(AppConfig::default(), Duration::ZERO);
        let room = Arc::new(FakeRoom::default());

        spawn_run(
            &ctx,
            MatrixReply::new(room.clone(), event_id("$msg:example.org"), "see http://a.example"),
        );
        drain(&ctx).await;

        assert_eq!(
            room.ops(),
            vec![
                "send".to_string(),
                "redact $msg:example.org: Wayback completed. Original message: see http://a.example"
                    .to_string(),
                "read $msg:example.org".to_string(),
            ]
        );
        let sent = room.sent.lock().unwrap();
        assert_eq!(sent[0]["format"], "org.matrix.custom.html");
        assert!(
            sent[0]["body"]
                .as_str()
                .unwrap()
                .contains("http://a.example => https://web.archive.org/web/http://a.example")
        );
        assert_eq!(
            sent[0]["m.relates_to"]["m.in_reply_to"]["event_id"],
            "$msg:example.org"
        );
    }

    #[tokio::test]
    async fn message_without_url_is_only_redacted_and_read() {
        let ctx = context(AppConfig::default(), Duration::ZERO);
        let room = Arc::new(FakeRoom::default());

        spawn_run(
            &ctx,
            MatrixReply::new(room.clone(), event_id("$msg:example.org"), "hello"),
        );
        drain(&ctx).await;

        assert_eq!(
            room.ops(),
            vec![
                "redact $msg:example.org: URL no found. Original message: hello".to_string(),
                "read $msg:example.org".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn logout_waits_for_in_flight_replies() {
        let ctx = context(AppConfig::default(), Duration::from_millis(300));
        let ops = Arc::new(Mutex::new(Vec::new()));
        let room = Arc::new(FakeRoom::sharing(Arc::clone(&ops)));

        spawn_run(
            &ctx,
            MatrixReply::new(room, event_id("$msg:example.org"), "see http://a.example"),
        );
        ctx.cancel.cancel();

        let logout_ops = Arc::clone(&ops);
        after_drain(&ctx.tracker, async move {
            logout_ops.lock().unwrap().push("logout".into());
            Ok(())
        })
        .await
        .unwrap();

        let ops = ops.lock().unwrap().clone();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[0], "send");
        assert!(ops[1].starts_with("redact $msg:example.org"));
        assert_eq!(ops[2], "read $msg:example.org");
        assert_eq!(ops[3], "logout");
    }
}
