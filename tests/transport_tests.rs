// Integration tests for the session transport manager
//
// Each test runs an in-process WebSocket server on a loopback port and
// drives the manager against it: offline queueing, reconnect backoff,
// and disconnect semantics.

use futures::{SinkExt, StreamExt};
use interview_client::{
    ConnectionState, SessionCallbacks, TransportConfig, TransportError, TransportManager,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("ws://{}", listener.local_addr().unwrap());
    (listener, origin)
}

fn manager(origin: &str, step_ms: u64) -> TransportManager {
    TransportManager::new(TransportConfig {
        ws_origin: origin.to_string(),
        max_reconnect_attempts: 3,
        reconnect_step: Duration::from_millis(step_ms),
        participant_id: None,
        token: None,
    })
}

#[tokio::test]
async fn frames_queued_offline_flush_in_order_on_open() {
    let (listener, origin) = bind().await;
    let manager = manager(&origin, 50);

    // Send before any connection exists
    for i in 0..3 {
        manager
            .send_text("s1", format!("{{\"seq\":{}}}", i))
            .await;
    }
    assert_eq!(manager.queued_len("s1").await, 3);
    assert_eq!(
        manager.connection_state("s1").await,
        ConnectionState::NotConnected
    );

    // Server records every text frame it receives
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let _ = frame_tx.send(text);
            }
        }
    });

    let (open_tx, mut open_rx) = mpsc::unbounded_channel::<()>();
    manager
        .connect(
            "s1",
            SessionCallbacks::new().on_open(move || {
                let _ = open_tx.send(());
            }),
        )
        .await;

    timeout(Duration::from_secs(2), open_rx.recv())
        .await
        .expect("socket should open")
        .unwrap();

    // The queue drains in FIFO order before anything else goes out
    for i in 0..3 {
        let text = timeout(Duration::from_secs(2), frame_rx.recv())
            .await
            .expect("queued frame should arrive")
            .unwrap();
        assert_eq!(text, format!("{{\"seq\":{}}}", i));
    }

    assert_eq!(manager.queued_len("s1").await, 0);
    assert_eq!(manager.connection_state("s1").await, ConnectionState::Open);

    manager.disconnect("s1").await;
}

#[tokio::test]
async fn second_connect_reuses_the_live_socket() {
    let (listener, origin) = bind().await;
    let manager = manager(&origin, 50);

    let accepted = Arc::new(AtomicUsize::new(0));
    let server_accepted = Arc::clone(&accepted);
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            server_accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    let (open_tx, mut open_rx) = mpsc::unbounded_channel::<()>();
    let first_open = open_tx.clone();
    manager
        .connect(
            "s1",
            SessionCallbacks::new().on_open(move || {
                let _ = first_open.send(());
            }),
        )
        .await;

    timeout(Duration::from_secs(2), open_rx.recv())
        .await
        .expect("socket should open")
        .unwrap();

    // Second connect must not open another socket
    manager.connect("s1", SessionCallbacks::new()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(manager.connection_state("s1").await, ConnectionState::Open);

    manager.disconnect("s1").await;
}

#[tokio::test]
async fn double_connect_while_connecting_opens_one_socket() {
    let (listener, origin) = bind().await;
    let manager = manager(&origin, 50);

    let accepted = Arc::new(AtomicUsize::new(0));
    let server_accepted = Arc::clone(&accepted);
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            server_accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                // Hold the handshake open so the client stays in Connecting
                tokio::time::sleep(Duration::from_millis(200)).await;
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    let (first_tx, mut first_rx) = mpsc::unbounded_channel::<()>();
    manager
        .connect(
            "s1",
            SessionCallbacks::new().on_open(move || {
                let _ = first_tx.send(());
            }),
        )
        .await;
    assert_eq!(
        manager.connection_state("s1").await,
        ConnectionState::Connecting
    );

    // Second connect during the handshake replaces the callback set
    let (second_tx, mut second_rx) = mpsc::unbounded_channel::<()>();
    manager
        .connect(
            "s1",
            SessionCallbacks::new().on_open(move || {
                let _ = second_tx.send(());
            }),
        )
        .await;

    timeout(Duration::from_secs(2), second_rx.recv())
        .await
        .expect("replacement callbacks should observe the open")
        .unwrap();
    assert!(
        first_rx.try_recv().is_err(),
        "replaced callbacks must not fire"
    );
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(manager.connection_state("s1").await, ConnectionState::Open);

    manager.disconnect("s1").await;
}

#[tokio::test]
async fn disconnect_sends_normal_close_and_is_idempotent() {
    let (listener, origin) = bind().await;
    let manager = manager(&origin, 50);

    let (close_tx, mut close_rx) = mpsc::unbounded_channel::<u16>();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Close(Some(frame)) = message {
                let _ = close_tx.send(u16::from(frame.code));
                break;
            }
        }
    });

    let (open_tx, mut open_rx) = mpsc::unbounded_channel::<()>();
    manager
        .connect(
            "s1",
            SessionCallbacks::new().on_open(move || {
                let _ = open_tx.send(());
            }),
        )
        .await;
    timeout(Duration::from_secs(2), open_rx.recv())
        .await
        .expect("socket should open")
        .unwrap();

    manager.disconnect("s1").await;
    manager.disconnect("s1").await; // second call is a no-op
    manager.disconnect("unknown-session").await; // unknown ids too

    let code = timeout(Duration::from_secs(2), close_rx.recv())
        .await
        .expect("server should see a close frame")
        .unwrap();
    assert_eq!(code, 1000);

    assert_eq!(
        manager.connection_state("s1").await,
        ConnectionState::NotConnected
    );
}

#[tokio::test]
async fn abnormal_close_reconnects_then_gives_up() {
    let (listener, origin) = bind().await;
    let manager = manager(&origin, 50);

    // Accept exactly one connection and drop it without a close handshake,
    // then stop listening so every reconnect attempt is refused.
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(ws);
        drop(listener);
    });

    let errors = Arc::new(AtomicUsize::new(0));
    let (close_tx, mut close_rx) = mpsc::unbounded_channel();

    let seen_errors = Arc::clone(&errors);
    manager
        .connect(
            "s1",
            SessionCallbacks::new()
                .on_error(move |_| {
                    seen_errors.fetch_add(1, Ordering::SeqCst);
                })
                .on_close(move |info| {
                    let _ = close_tx.send(info);
                }),
        )
        .await;

    // Backoff is 50 + 100 + 150ms; the close must arrive exactly once after
    // the third failed attempt.
    let info = timeout(Duration::from_secs(5), close_rx.recv())
        .await
        .expect("on_close should fire after retries are exhausted")
        .unwrap();
    assert!(!info.was_clean);
    assert!(
        errors.load(Ordering::SeqCst) >= 3,
        "each refused reconnect should surface an error"
    );

    // Entry removed; no second close can arrive
    assert_eq!(
        manager.connection_state("s1").await,
        ConnectionState::NotConnected
    );
    // The callback set is dropped with the entry, so the channel closes;
    // only a second CloseInfo would mean a duplicate event.
    match timeout(Duration::from_millis(300), close_rx.recv()).await {
        Ok(Some(info)) => panic!("on_close fired twice: {:?}", info),
        Ok(None) | Err(_) => {}
    }
}

#[tokio::test]
async fn disconnect_cancels_a_pending_reconnect() {
    let (listener, origin) = bind().await;
    let manager = manager(&origin, 200);

    let accepted = Arc::new(AtomicUsize::new(0));
    let server_accepted = Arc::clone(&accepted);
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            server_accepted.fetch_add(1, Ordering::SeqCst);
            // Drop each connection abruptly right after the handshake
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(ws);
        }
    });

    let (error_tx, mut error_rx) = mpsc::unbounded_channel::<()>();
    manager
        .connect(
            "s1",
            SessionCallbacks::new().on_error(move |_| {
                let _ = error_tx.send(());
            }),
        )
        .await;

    // Wait for the abrupt drop, then disconnect inside the backoff window
    timeout(Duration::from_secs(2), error_rx.recv())
        .await
        .expect("the dropped socket should surface an error")
        .unwrap();
    manager.disconnect("s1").await;

    // Well past the 200ms first-retry delay: no new connection may appear
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(
        accepted.load(Ordering::SeqCst),
        1,
        "disconnect must cancel the scheduled reconnect"
    );
    assert_eq!(
        manager.connection_state("s1").await,
        ConnectionState::NotConnected
    );
}

#[tokio::test]
async fn malformed_frame_surfaces_an_error_without_closing() {
    let (listener, origin) = bind().await;
    let manager = manager(&origin, 50);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text("not json".to_string())).await.unwrap();
        ws.send(Message::Text("{\"type\":\"status\",\"status\":\"ok\"}".to_string()))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (error_tx, mut error_rx) = mpsc::unbounded_channel();
    let (message_tx, mut message_rx) = mpsc::unbounded_channel();
    manager
        .connect(
            "s1",
            SessionCallbacks::new()
                .on_error(move |err| {
                    let _ = error_tx.send(err);
                })
                .on_message(move |value| {
                    let _ = message_tx.send(value);
                }),
        )
        .await;

    let err = timeout(Duration::from_secs(2), error_rx.recv())
        .await
        .expect("malformed frame should surface an error")
        .unwrap();
    assert!(matches!(err, TransportError::Decode(_)), "got {:?}", err);

    // The connection survives and later frames still arrive
    let value = timeout(Duration::from_secs(2), message_rx.recv())
        .await
        .expect("well-formed frame should still be delivered")
        .unwrap();
    assert_eq!(value["type"], "status");
    assert_eq!(manager.connection_state("s1").await, ConnectionState::Open);

    manager.disconnect("s1").await;
}

#[tokio::test]
async fn disconnect_all_tears_down_every_session() {
    let (listener, origin) = bind().await;
    let manager = manager(&origin, 50);

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    let (open_tx, mut open_rx) = mpsc::unbounded_channel::<()>();
    for id in ["s1", "s2"] {
        let opens = open_tx.clone();
        manager
            .connect(
                id,
                SessionCallbacks::new().on_open(move || {
                    let _ = opens.send(());
                }),
            )
            .await;
    }
    for _ in 0..2 {
        timeout(Duration::from_secs(2), open_rx.recv())
            .await
            .expect("both sockets should open")
            .unwrap();
    }

    manager.disconnect_all().await;

    for id in ["s1", "s2"] {
        assert_eq!(
            manager.connection_state(id).await,
            ConnectionState::NotConnected
        );
    }
}
