//! The TCP camera channel under watchdog supervision, against a local
//! stand-in for the camera server.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use cloudcam::device::{CameraDevice, ShutterDevice, ShutterState, TcpCameraChannel, TcpShutterChannel};
use cloudcam::watchdog::Watchdog;
use cloudcam::Outcome;

/// Serve one connection: answer `etime`/`gain` queries and send `frame` for `image`.
async fn serve_frame(listener: TcpListener, frame: Vec<u8>) -> Vec<String> {
    let (socket, _) = listener.accept().await.unwrap();
    let mut reader = BufReader::new(socket);
    let mut commands = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap() == 0 {
            break;
        }
        let command = line.trim().to_string();
        let reply: Vec<u8> = match command.as_str() {
            "etime" => b"etime 2.5\n".to_vec(),
            "gain" => b"gain 120\n".to_vec(),
            "image" => {
                let mut reply = format!(". {}\n", frame.len()).into_bytes();
                reply.extend_from_slice(&frame);
                reply
            }
            _ => b"?\n".to_vec(),
        };
        commands.push(command.clone());
        reader.get_mut().write_all(&reply).await.unwrap();
        if command == "image" {
            break;
        }
    }
    commands
}

#[tokio::test]
async fn test_capture_over_tcp_succeeds_within_budget() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let frame = support::png_frame(8, 6, 40);
    let server = tokio::spawn(serve_frame(listener, frame.clone()));

    let camera = Arc::new(TcpCameraChannel::new(address));
    let watchdog = Watchdog::new("Image Capture", Duration::from_secs(5));
    let outcome = watchdog
        .run({
            let camera = Arc::clone(&camera);
            async move { camera.capture().await }
        })
        .await;

    let captured = match outcome {
        Outcome::Success(frame) => frame,
        other => panic!("expected success, got {:?}", other),
    };
    assert_eq!(captured.bytes, frame);
    assert_eq!(captured.reported.exposure_secs, 2.5);
    assert_eq!(captured.reported.gain, 120.0);
    assert_eq!(server.await.unwrap(), vec!["etime", "gain", "image"]);
}

#[tokio::test]
async fn test_silent_server_times_out_promptly() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    // accept and never answer
    let _server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    let camera = Arc::new(TcpCameraChannel::new(address));
    let budget = Duration::from_millis(300);
    let started = Instant::now();
    let outcome = Watchdog::new("Image Capture", budget)
        .run(async move { camera.capture().await })
        .await;

    assert!(matches!(outcome, Outcome::TimedOut { .. }));
    assert!(started.elapsed() < budget + Duration::from_secs(1));
}

#[tokio::test]
async fn test_truncated_image_is_failure_not_panic() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let _server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(socket);
        for reply in [&b"etime 1\n"[..], b"gain 0\n", b". 100\nshort"] {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.get_mut().write_all(reply).await.unwrap();
        }
        // closing the socket ends the transfer early
    });

    let camera = TcpCameraChannel::new(address);
    let outcome = Watchdog::new("Image Capture", Duration::from_secs(5))
        .run(async move { camera.capture().await })
        .await;

    match outcome {
        Outcome::Failed(err) => assert_eq!(err.kind(), "transport"),
        other => panic!("expected transport failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_refused_connection_is_retryable() {
    // bind then drop to get a port nothing listens on
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let camera = TcpCameraChannel::new(address);
    let err = camera.capture().await.unwrap_err();
    assert_eq!(err.kind(), "transport");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_shutter_without_reply_is_tolerated() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(socket);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        // hold the connection open without answering
        tokio::time::sleep(Duration::from_millis(500)).await;
        line
    });

    let shutter = TcpShutterChannel::new(address, Duration::from_millis(100));
    shutter.set_shutter(ShutterState::Open).await.unwrap();
    assert_eq!(server.await.unwrap(), "shutter OPEN\n");
}
