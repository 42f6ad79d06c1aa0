// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the reconnecting socket against local TCP listeners.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{ConnectionEvent, RecordingListener, next_event, wait_until};
use svcmon_core::reconnecting_socket::ReconnectingSocket;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

const RECONNECT: Duration = Duration::from_millis(300);
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_connects_once_listener_reopens() {
    let port = unused_port().await;
    let (events, mut rx) = RecordingListener::new();
    let socket = ReconnectingSocket::with_listener("127.0.0.1", port, events.clone()).unwrap();
    socket.set_reconnect_periodicity(RECONNECT).unwrap();
    socket.start().unwrap();

    assert_eq!(
        next_event(&mut rx, EVENT_TIMEOUT).await,
        ConnectionEvent::ConnectFail
    );
    assert!(!socket.is_connected());
    assert!(socket.is_connecting());

    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let accept = tokio::spawn(async move { listener.accept().await });

    assert_eq!(
        next_event(&mut rx, EVENT_TIMEOUT).await,
        ConnectionEvent::Connected
    );
    assert!(socket.is_connected());
    assert!(!socket.is_connecting());
    assert_eq!(events.connect_failed.load(Ordering::SeqCst), 1);
    assert_eq!(events.connected.load(Ordering::SeqCst), 1);

    let (mut peer, _) = accept.await.unwrap().unwrap();
    socket.write(b"hello\n");
    let mut buf = [0u8; 6];
    tokio::time::timeout(EVENT_TIMEOUT, peer.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"hello\n");

    socket.stop().await;
    assert!(!socket.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_peer_close_disconnects_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (events, mut rx) = RecordingListener::new();
    let socket = ReconnectingSocket::with_listener("127.0.0.1", port, events.clone()).unwrap();
    socket.set_reconnect_periodicity(RECONNECT).unwrap();
    socket.start().unwrap();

    let (peer, _) = tokio::time::timeout(EVENT_TIMEOUT, listener.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        next_event(&mut rx, EVENT_TIMEOUT).await,
        ConnectionEvent::Connected
    );
    drop(peer);

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let socket = socket.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    socket.write(b"metric 1 0\n");
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        })
        .collect();

    assert_eq!(
        next_event(&mut rx, EVENT_TIMEOUT).await,
        ConnectionEvent::Disconnected
    );
    for writer in writers {
        writer.await.unwrap();
    }
    assert_eq!(events.disconnected.load(Ordering::SeqCst), 1);

    // Exactly one reconnect attempt was scheduled and it succeeds.
    let (_peer, _) = tokio::time::timeout(EVENT_TIMEOUT, listener.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        next_event(&mut rx, EVENT_TIMEOUT).await,
        ConnectionEvent::Connected
    );
    assert_eq!(events.connected.load(Ordering::SeqCst), 2);
    assert_eq!(events.disconnected.load(Ordering::SeqCst), 1);
    assert!(
        tokio::time::timeout(RECONNECT * 2, listener.accept())
            .await
            .is_err(),
        "no further connection expected"
    );

    socket.stop().await;
}

#[tokio::test]
async fn test_stop_cancels_pending_attempt() {
    let port = unused_port().await;
    let (events, mut rx) = RecordingListener::new();
    let socket = ReconnectingSocket::with_listener("127.0.0.1", port, events.clone()).unwrap();
    socket.set_reconnect_periodicity(Duration::from_secs(60)).unwrap();
    socket.start().unwrap();

    assert_eq!(
        next_event(&mut rx, EVENT_TIMEOUT).await,
        ConnectionEvent::ConnectFail
    );
    assert!(socket.is_connecting());

    tokio::time::timeout(Duration::from_secs(2), socket.stop())
        .await
        .expect("stop should not wait for the reconnect delay");
    assert!(!socket.is_connecting());
    assert!(!socket.is_connected());

    socket.stop().await;
}

#[tokio::test]
async fn test_start_twice_keeps_single_attempt() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (events, _rx) = RecordingListener::new();
    let socket = ReconnectingSocket::with_listener("127.0.0.1", port, events.clone()).unwrap();

    socket.start().unwrap();
    socket.start().unwrap();

    let (_peer, _) = tokio::time::timeout(EVENT_TIMEOUT, listener.accept())
        .await
        .unwrap()
        .unwrap();
    wait_until(|| socket.is_connected(), EVENT_TIMEOUT).await;
    assert!(
        tokio::time::timeout(Duration::from_millis(200), listener.accept())
            .await
            .is_err()
    );
    assert_eq!(events.connected.load(Ordering::SeqCst), 1);

    socket.stop().await;
}
