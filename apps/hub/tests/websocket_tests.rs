use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;
use vigil::crypto::{reply_message, signup_message};
use vigil::{
    CheckStatus, HubMessage, SignupRequest, ValidateReply, ValidatorMessage, generate_keypair, sign_message,
};
use vigil_hub::database::models::{MonitoredTarget, Owner};
use vigil_hub::database::{LibsqlStore, Store, initialize_database};
use vigil_hub::hub::SchedulerSettings;
use vigil_hub::notify::LogNotifier;
use vigil_hub::pool::open_pool;
use vigil_hub::{Hub, HubSettings};

type Socket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn open_store() -> Result<(Arc<LibsqlStore>, TempDir)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("hub.db");
    let pool = open_pool(&path.to_string_lossy(), 4).await?;
    let conn = pool.get().await.map_err(|e| anyhow!("{e}"))?;
    initialize_database(&conn).await?;
    drop(conn);
    Ok((Arc::new(LibsqlStore::new_from_pool(pool)), dir))
}

async fn next_message(socket: &mut Socket) -> Result<HubMessage> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await?
            .ok_or_else(|| anyhow!("socket closed"))??;
        if let Message::Text(text) = frame {
            return Ok(vigil::decode_hub_message(&text)?);
        }
    }
}

async fn send(socket: &mut Socket, message: &ValidatorMessage) -> Result<()> {
    socket.send(Message::Text(vigil::encode(message)?)).await?;
    Ok(())
}

#[tokio::test]
async fn test_validator_round_trip_over_websocket() -> Result<()> {
    let (store, _dir) = open_store().await?;
    let owner = Owner { uuid: Uuid::new_v4(), email: "ops@example.com".into() };
    store.save_owner(&owner).await?;
    let target = MonitoredTarget::new("https://example.com/health", owner.uuid);
    store.save_target(&target).await?;

    let settings = HubSettings {
        scheduler: SchedulerSettings { tick: Duration::from_millis(50), ..SchedulerSettings::default() },
        ..HubSettings::default()
    };
    let hub = Hub::new(settings, store.clone(), Arc::new(LogNotifier)).await?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(hub.clone().run(listener, shutdown_rx));

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await?;

    let keypair = generate_keypair();
    let public_key = keypair.public_key_hex();
    send(
        &mut socket,
        &ValidatorMessage::Signup(SignupRequest {
            callback_id: "hello".into(),
            ip: "127.0.0.1".into(),
            signed_message: sign_message(&signup_message("hello", &public_key), &keypair),
            public_key,
        }),
    )
    .await?;

    // a tick may queue a request between registration and the signup reply
    let (mut validator_id, mut request) = (None, None);
    while validator_id.is_none() || request.is_none() {
        match next_message(&mut socket).await? {
            HubMessage::Signup(reply) => {
                assert_eq!(reply.callback_id, "hello");
                validator_id = Some(reply.validator_id);
            }
            HubMessage::Validate(check) if request.is_none() => request = Some(check),
            HubMessage::Validate(_) => {}
        }
    }
    let (validator_id, request) = validator_id.zip(request).ok_or_else(|| anyhow!("handshake incomplete"))?;
    assert_eq!(request.url, target.url);

    send(
        &mut socket,
        &ValidatorMessage::Validate(ValidateReply {
            validator_id: validator_id.clone(),
            callback_id: request.callback_id.clone(),
            status: CheckStatus::Good,
            latency: 42.0,
            location: Some("Amsterdam".into()),
            signed_message: sign_message(&reply_message(&request.callback_id), &keypair),
        }),
    )
    .await?;

    let validator = validator_id.parse::<Uuid>()?;
    let mut credited = 0;
    for _ in 0..100 {
        credited = hub.credit_snapshot().await.get(&validator).copied().unwrap_or(0);
        if credited > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(credited >= 1);
    assert!(!store.recent_health_samples(target.uuid, 10).await?.is_empty());

    socket.close(None).await?;
    for _ in 0..100 {
        if hub.active_validators().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(hub.active_validators().await.is_empty());

    shutdown_tx.send(true)?;
    tokio::time::timeout(Duration::from_secs(5), server).await???;
    Ok(())
}
