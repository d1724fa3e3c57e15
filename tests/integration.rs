//! Integration tests for chunkwire.
//!
//! These tests run real loopback TCP servers and check that the filter
//! chain, groups, dispatcher and manager work together.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chunkwire::filter::{
    Base64DecodeFilter, FilterPipeline, FrameExtractor, MessageSink, XorFilter,
};
use chunkwire::handler::handler_fn;
use chunkwire::lifecycle::LifecycleState;
use chunkwire::manager::AllInOnePolicy;
use chunkwire::protocol::{build_frame, Frame};
use chunkwire::{ConnectionGroup, ConnectionManager, Dispatcher, Result, ServerConfig};

fn obfuscated_pipeline() -> FilterPipeline {
    FilterPipeline::new()
        .with(Base64DecodeFilter::new())
        .with(XorFilter::new([0xFF]).unwrap())
        .with(FrameExtractor::new())
}

/// Encode frames the way the obfuscated pipeline expects: xor 0xFF, then base64.
fn obfuscate(frames: &[Vec<u8>]) -> Vec<u8> {
    let raw: Vec<u8> = frames.concat().into_iter().map(|b| b ^ 0xFF).collect();
    STANDARD.encode(raw).into_bytes()
}

async fn serve(manager: Arc<ConnectionManager>) -> (SocketAddr, JoinHandle<Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move { manager.start(listener).await });
    (addr, task)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Frames written through base64 and xor in ragged pieces arrive intact,
/// and the dispatcher never exceeds its ceiling.
#[tokio::test]
async fn test_obfuscated_stream_through_dispatcher() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Frame>();

    let dispatcher = {
        let current = current.clone();
        let peak = peak.clone();
        Dispatcher::new(
            "workers",
            3,
            handler_fn(move |frame: Frame| {
                let current = current.clone();
                let peak = peak.clone();
                let seen_tx = seen_tx.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    let _ = seen_tx.send(frame);
                    Ok(())
                }
            }),
        )
    };
    dispatcher.start().unwrap();

    let policy = AllInOnePolicy::default();
    policy.group().set_handler(Arc::new(dispatcher.clone()));
    let manager = Arc::new(
        ConnectionManager::new(ServerConfig::default().with_read_buffer_size(16))
            .with_policy(policy)
            .with_pipeline_factory(obfuscated_pipeline),
    );
    let (addr, server) = serve(manager.clone()).await;

    let frames: Vec<Vec<u8>> = (0..12u16)
        .map(|i| {
            let payload = vec![i as u8; i as usize * 13];
            build_frame(i, i + 100, 1, &payload).unwrap().to_vec()
        })
        .collect();
    let stream = obfuscate(&frames);

    let mut client = TcpStream::connect(addr).await.unwrap();
    let sizes = [1usize, 7, 3, 64, 2, 31, 5];
    let mut offset = 0;
    for size in sizes.iter().cycle() {
        if offset >= stream.len() {
            break;
        }
        let end = (offset + size).min(stream.len());
        client.write_all(&stream[offset..end]).await.unwrap();
        offset = end;
    }

    let mut received = Vec::new();
    for _ in 0..frames.len() {
        received.push(seen_rx.recv().await.unwrap());
    }
    received.sort_by_key(|f| f.main_command_id());
    for (i, frame) in received.iter().enumerate() {
        assert_eq!(frame.main_command_id(), i as u16);
        assert_eq!(frame.sub_command_id(), i as u16 + 100);
        assert_eq!(frame.payload().len(), i * 13);
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);

    manager.stop().unwrap();
    server.await.unwrap().unwrap();
    dispatcher.shutdown().await.unwrap();
    assert_eq!(dispatcher.state(), LifecycleState::Idle);
}

/// A corrupt header drops only the chunk it arrived in.
#[tokio::test]
async fn test_connection_survives_corrupt_header() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Frame>();
    let policy = AllInOnePolicy::default();
    policy.group().set_handler(Arc::new(handler_fn(move |frame| {
        let seen_tx = seen_tx.clone();
        async move {
            let _ = seen_tx.send(frame);
            Ok(())
        }
    })));
    let manager = Arc::new(ConnectionManager::new(ServerConfig::default()).with_policy(policy));
    let (addr, server) = serve(manager.clone()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_until(|| manager.connection_count() == 1).await;

    // chunk size 10 disagrees with declared size 0 (expects 16)
    client
        .write_all(&[10, 0, 0, 0, 1, 0, 2, 0, 0, 0, 0, 0, 1, 0])
        .await
        .unwrap();

    // A good frame may share a read with the bad header and be dropped along
    // with it, so keep sending until one gets through.
    let good = build_frame(1, 2, 1, b"still here").unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            client.write_all(&good).await.unwrap();
            tokio::select! {
                frame = seen_rx.recv() => break frame.unwrap(),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }
    })
    .await
    .expect("no frame after the corrupt header");
    assert_eq!(frame.payload(), b"still here");
    assert_eq!(manager.connection_count(), 1);

    manager.stop().unwrap();
    server.await.unwrap().unwrap();
}

/// Separately encoded messages sent back to back decode the same however
/// the stream is split.
#[test]
fn test_back_to_back_padded_messages() {
    // 20-byte frames encode to base64 ending in "=="
    let messages: Vec<Vec<u8>> = [&b"hi"[..], b"yo"]
        .iter()
        .enumerate()
        .map(|(i, payload)| obfuscate(&[build_frame(i as u16, 0, 1, payload).unwrap().to_vec()]))
        .collect();
    assert!(messages.iter().all(|m| m.ends_with(b"==")));
    let stream = messages.concat();

    for split in 0..=stream.len() {
        let (sink, mut rx) = MessageSink::channel();
        let mut pipeline = obfuscated_pipeline();
        pipeline.set_message_sink(Some(sink));
        pipeline.write(&stream[..split]).unwrap();
        pipeline.write(&stream[split..]).unwrap();

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 2, "split at {split}");
        assert_eq!(frames[0].payload(), b"hi");
        assert_eq!(frames[1].payload(), b"yo");
    }
}

/// Padded messages repeated on one connection all reach the handler.
#[tokio::test]
async fn test_repeated_padded_messages_over_tcp() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Frame>();
    let policy = AllInOnePolicy::default();
    policy.group().set_handler(Arc::new(handler_fn(move |frame| {
        let seen_tx = seen_tx.clone();
        async move {
            let _ = seen_tx.send(frame);
            Ok(())
        }
    })));
    let manager = Arc::new(
        ConnectionManager::new(ServerConfig::default().with_read_buffer_size(16))
            .with_policy(policy)
            .with_pipeline_factory(obfuscated_pipeline),
    );
    let (addr, server) = serve(manager.clone()).await;

    let message = obfuscate(&[build_frame(3, 4, 1, b"hi").unwrap().to_vec()]);
    let stream = message.repeat(5);

    let mut client = TcpStream::connect(addr).await.unwrap();
    for piece in stream.chunks(9) {
        client.write_all(piece).await.unwrap();
    }

    for _ in 0..5 {
        let frame = seen_rx.recv().await.unwrap();
        assert_eq!(frame.main_command_id(), 3);
        assert_eq!(frame.payload(), b"hi");
    }

    manager.stop().unwrap();
    server.await.unwrap().unwrap();
}

/// A handler that broadcasts each frame back to the whole group.
#[tokio::test]
async fn test_group_echo_broadcast() {
    let group = ConnectionGroup::new("chat");
    let echo_group = group.clone();
    group.set_handler(Arc::new(handler_fn(move |frame: Frame| {
        let group = echo_group.clone();
        async move {
            group.broadcast(frame.encode()).await;
            Ok(())
        }
    })));

    let manager = Arc::new(
        ConnectionManager::new(ServerConfig::default()).with_policy(AllInOnePolicy::new(group.clone())),
    );
    let (addr, server) = serve(manager.clone()).await;

    let mut alice = TcpStream::connect(addr).await.unwrap();
    let mut bob = TcpStream::connect(addr).await.unwrap();
    wait_until(|| group.len() == 2).await;

    let wire = build_frame(7, 1, 2, b"hello everyone").unwrap();
    alice.write_all(&wire).await.unwrap();

    for peer in [&mut alice, &mut bob] {
        let mut buf = vec![0u8; wire.len()];
        peer.read_exact(&mut buf).await.unwrap();
        let frames = FrameExtractor::new().push(&buf).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].main_command_id(), 7);
        assert_eq!(frames[0].payload(), b"hello everyone");
    }

    manager.stop().unwrap();
    server.await.unwrap().unwrap();
    assert!(group.is_empty());
    assert_eq!(group.state(), LifecycleState::Idle);
}

/// Restarting a manager reuses its groups.
#[tokio::test]
async fn test_manager_restart() {
    let manager = Arc::new(ConnectionManager::new(ServerConfig::default()));

    for _ in 0..2 {
        let (addr, server) = serve(manager.clone()).await;
        let _client = TcpStream::connect(addr).await.unwrap();
        wait_until(|| manager.connection_count() == 1).await;

        manager.stop().unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(manager.state(), LifecycleState::Idle);
        assert_eq!(manager.connection_count(), 0);
    }
    assert_eq!(manager.groups().len(), 1);
}
