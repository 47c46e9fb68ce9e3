//! STOMP client against a scripted broker on a loopback socket.

use anyhow::{Context, Result, ensure};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use quakefeed::transport::stomp::{StompCodec, StompConnector, StompFrame};
use quakefeed::wire::encode::encode_trigger;
use quakefeed::{
    AlertPublisher, BinaryHeader, BrokerConfig, BrokerSession, DecodedRecord, Dispatcher,
    EventAlert, FeedError, SessionState, StationId, TriggerRecord,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

const TOPIC: &str = "/topic/eew.sys.dm.data";

type Server = Framed<TcpStream, StompCodec>;

async fn listener() -> Result<(TcpListener, BrokerConfig)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let config = BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: listener.local_addr()?.port(),
        timeout_ms: 2_000,
        ..BrokerConfig::default()
    };
    Ok((listener, config))
}

async fn accept(listener: &TcpListener) -> Result<Server> {
    let (socket, _) = listener.accept().await?;
    Ok(Framed::new(socket, StompCodec::default()))
}

async fn expect(server: &mut Server, command: &str) -> Result<StompFrame> {
    let frame = tokio::time::timeout(Duration::from_secs(2), server.next())
        .await
        .with_context(|| format!("waiting for {command}"))?
        .with_context(|| format!("client closed before {command}"))??;
    ensure!(frame.command == command, "expected {command}, got {}", frame.command);
    Ok(frame)
}

async fn handshake(server: &mut Server) -> Result<StompFrame> {
    let connect = expect(server, "CONNECT").await?;
    server.send(StompFrame::new("CONNECTED").header("version", "1.2").header("server", "scripted")).await?;
    Ok(connect)
}

fn trigger() -> TriggerRecord {
    TriggerRecord {
        header: BinaryHeader { version: 1, source: "onsite".to_string(), id: 21, packet_count: 1 },
        station: StationId::new("IS", "EIL", "--", "HHZ"),
        latitude: 29.6,
        longitude: 34.95,
        seconds: 1_552_378_500,
        millis: 125,
        timestamp: 1_552_378_500.125,
    }
}

fn session(config: BrokerConfig, seen: &Arc<Mutex<Vec<Arc<DecodedRecord>>>>) -> BrokerSession {
    let sink = Arc::clone(seen);
    let dispatcher = Arc::new(
        Dispatcher::new(50, None).with_handler(move |record: Arc<DecodedRecord>| sink.lock().push(record)),
    );
    BrokerSession::new(config, Arc::new(StompConnector), dispatcher)
}

async fn finish(server: JoinHandle<Result<()>>) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(5), server).await.context("server task hung")???;
    Ok(())
}

#[tokio::test]
async fn binary_frames_survive_the_socket() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (listener, config) = listener().await?;
    let body = encode_trigger(&trigger())?;
    let expected = body.clone();

    let server: JoinHandle<Result<()>> = tokio::spawn(async move {
        let mut server = accept(&listener).await?;
        let connect = handshake(&mut server).await?;
        ensure!(connect.headers.get("login") == Some("monitor"));

        let subscribe = expect(&mut server, "SUBSCRIBE").await?;
        ensure!(subscribe.headers.destination() == Some(TOPIC));
        let id = subscribe.headers.get("id").unwrap_or_default().to_string();
        server
            .send(
                StompFrame::new("MESSAGE")
                    .header("destination", TOPIC)
                    .header("subscription", id.as_str())
                    .header("message-id", "m-1")
                    .body(body),
            )
            .await?;

        // topic echo of whatever the client sends
        let send = expect(&mut server, "SEND").await?;
        server
            .send(
                StompFrame::new("MESSAGE")
                    .header("destination", TOPIC)
                    .header("subscription", id.as_str())
                    .header("message-id", "m-2")
                    .body(send.body),
            )
            .await?;

        expect(&mut server, "DISCONNECT").await?;
        Ok(())
    });

    let seen = Arc::new(Mutex::new(Vec::new()));
    let session = Arc::new(session(config, &seen));
    session.connect().await?;
    session.subscribe(TOPIC, "1").await?;

    for _ in 0..200 {
        if !seen.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    {
        let seen = seen.lock();
        ensure!(seen.len() == 1, "records: {}", seen.len());
        match seen[0].as_ref() {
            DecodedRecord::Trigger(record) => ensure!(*record == trigger()),
            other => anyhow::bail!("unexpected record {other:?}"),
        }
    }
    let history = session.dispatcher().history();
    ensure!(history[0].body.as_ref() == expected.as_slice());
    ensure!(history[0].headers.get("message-id") == Some("m-1"));

    let alert = EventAlert::new("5150", 4.8, 29.5, 35.0, 15.0, chrono::Utc::now());
    AlertPublisher::new(Arc::clone(&session), TOPIC).publish(&alert).await?;
    for _ in 0..200 {
        if seen.lock().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    ensure!(seen.lock().len() == 2);
    ensure!(seen.lock()[1].kind() == quakefeed::MessageKind::EventAlert);

    session.disconnect().await?;
    ensure!(session.state() == SessionState::Disconnected);
    finish(server).await
}

#[tokio::test]
async fn error_frame_rejects_connection() -> Result<()> {
    let (listener, config) = listener().await?;
    let server: JoinHandle<Result<()>> = tokio::spawn(async move {
        let mut server = accept(&listener).await?;
        expect(&mut server, "CONNECT").await?;
        server
            .send(StompFrame::new("ERROR").header("message", "Authentication failed").body("bad passcode"))
            .await?;
        Ok(())
    });

    let seen = Arc::new(Mutex::new(Vec::new()));
    let session = session(config, &seen);
    match session.connect().await {
        Err(FeedError::Connection { reason, .. }) => {
            ensure!(reason.contains("Authentication failed"), "reason: {reason}");
        }
        other => anyhow::bail!("expected connection error, got {other:?}"),
    }
    ensure!(session.state() == SessionState::Disconnected);
    finish(server).await
}

#[tokio::test]
async fn unreachable_broker_is_retryable() -> Result<()> {
    let (listener, config) = listener().await?;
    drop(listener);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let session = session(config, &seen);
    let err = session.connect().await.err().context("connected to a closed port")?;
    ensure!(err.is_retryable(), "error: {err}");
    ensure!(session.state() == SessionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn broker_close_reports_status() -> Result<()> {
    let (listener, config) = listener().await?;
    let server: JoinHandle<Result<()>> = tokio::spawn(async move {
        let mut server = accept(&listener).await?;
        handshake(&mut server).await?;
        expect(&mut server, "SUBSCRIBE").await?;
        // dropping the socket closes the connection
        Ok(())
    });

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let session = session(config, &seen)
        .with_status_handler(move |connected: bool, detail: &str| sink.lock().push((connected, detail.to_string())));
    session.connect().await?;
    session.subscribe(TOPIC, "1").await?;
    finish(server).await?;

    for _ in 0..200 {
        if session.state() == SessionState::Disconnected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    ensure!(session.state() == SessionState::Disconnected);
    ensure!(session.subscriptions().is_empty());
    ensure!(session.known_topics().len() == 1);

    for _ in 0..200 {
        if events.lock().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let events = events.lock();
    ensure!(events.len() == 2);
    ensure!(events[0].0 && !events[1].0);
    Ok(())
}
