//! Loopback run through both listeners: an RTMP publisher pushes FLV tags,
//! an RTSP client describes the resulting mount.

use bytes::{BufMut, Bytes, BytesMut};
use rtspgate_core::config::Config;
use rtspgate_core::health::StaticProbe;
use rtspgate_core::models::{
    CreateSessionRequest, HistoryFilter, HistoryStatus, SessionId, SessionOptions, SessionState,
};
use rtspgate_livestream::{Gateway, GatewayHandle};
use rtspgate_media::rtmp::session::client_session::ClientSession;
use rtspgate_media::MediaFrame;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const SPS: [u8; 4] = [0x67, 0x64, 0x00, 0x1F];
const PPS: [u8; 2] = [0x68, 0xEE];

fn video_header(timestamp: u32) -> MediaFrame {
    let mut data = BytesMut::new();
    data.put_slice(&[0x17, 0x00, 0x00, 0x00, 0x00]);
    data.put_slice(&[0x01, SPS[1], SPS[2], SPS[3], 0xFF, 0xE1]);
    data.put_u16(SPS.len() as u16);
    data.put_slice(&SPS);
    data.put_u8(0x01);
    data.put_u16(PPS.len() as u16);
    data.put_slice(&PPS);
    MediaFrame::Video {
        timestamp,
        data: data.freeze(),
    }
}

fn video_nalu(key: bool, timestamp: u32) -> MediaFrame {
    let (first, nalu): (u8, &[u8]) = if key {
        (0x17, &[0x65, 0x88, 0x84, 0x00])
    } else {
        (0x27, &[0x41, 0x9A, 0x02])
    };
    let mut data = BytesMut::new();
    data.put_slice(&[first, 0x01, 0x00, 0x00, 0x00]);
    data.put_u32(nalu.len() as u32);
    data.put_slice(nalu);
    MediaFrame::Video {
        timestamp,
        data: data.freeze(),
    }
}

fn audio_header(timestamp: u32) -> MediaFrame {
    MediaFrame::Audio {
        timestamp,
        data: Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]),
    }
}

async fn start_gateway() -> GatewayHandle {
    let mut config = Config::default();
    config.ingest.host = "127.0.0.1".to_string();
    config.ingest.port = 0;
    config.egress.host = "127.0.0.1".to_string();
    config.egress.port = 0;
    Gateway::start(&config, Arc::new(StaticProbe::new(5.0, 5.0)))
        .await
        .unwrap()
}

async fn create_camera(handle: &GatewayHandle) -> SessionId {
    let session = handle
        .registry
        .create(CreateSessionRequest {
            name: "Camera".to_string(),
            ingest_url: "rtmp://127.0.0.1/live/cam".to_string(),
            preset: Some("balanced".to_string()),
            options: SessionOptions {
                enable_audio: true,
                auto_restart: false,
            },
            ..CreateSessionRequest::default()
        })
        .await
        .unwrap();
    handle.registry.start(&session.id).await.unwrap();
    session.id
}

/// The pipeline registers its ingest route asynchronously after start.
async fn publish_when_ready(addr: SocketAddr) -> ClientSession<TcpStream> {
    for _ in 0..100 {
        let stream = TcpStream::connect(addr).await.unwrap();
        match ClientSession::publish(stream, "live", "cam").await {
            Ok(client) => return client,
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    panic!("publish never accepted");
}

async fn rtsp_request(addr: SocketAddr, request: String, until: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let mut buf = [0u8; 4096];
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
            if String::from_utf8_lossy(&response).contains(until) {
                break;
            }
        }
    })
    .await
    .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

async fn wait_for_state(handle: &GatewayHandle, id: &SessionId, state: SessionState) {
    for _ in 0..250 {
        if handle.registry.get(id).await.unwrap().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session never reached {state}");
}

#[tokio::test]
async fn test_rtmp_publish_is_described_over_rtsp() {
    let mut handle = start_gateway().await;
    let id = create_camera(&handle).await;

    let mut client = publish_when_ready(handle.rtmp_addr).await;
    client.send_frame(&video_header(0)).await.unwrap();
    client.send_frame(&audio_header(0)).await.unwrap();
    client.send_frame(&video_nalu(true, 0)).await.unwrap();
    for i in 1..5 {
        client.send_frame(&video_nalu(false, i * 40)).await.unwrap();
    }
    wait_for_state(&handle, &id, SessionState::Active).await;
    // both sequence headers are in once the keyframe has been counted
    for _ in 0..250 {
        if handle.registry.get(&id).await.unwrap().metrics.frames_in >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let url = format!("rtsp://{}/camera", handle.rtsp_addr);
    let response = rtsp_request(
        handle.rtsp_addr,
        format!("DESCRIBE {url} RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n"),
        "a=control:trackID=1",
    )
    .await;
    assert!(response.starts_with("RTSP/1.0 200 OK"), "{response}");
    assert!(response.contains("CSeq: 2"));
    assert!(response.contains("m=video 0 RTP/AVP 96"));
    assert!(response.contains("m=audio"));

    let session = handle.registry.get(&id).await.unwrap();
    assert!(session.metrics.bytes_in > 0);

    handle.registry.stop(&id).await.unwrap();
    drop(client);
    let records = handle.registry.history().list(&HistoryFilter::default());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, HistoryStatus::Completed);

    assert!(handle.shutdown_graceful(5).await);
}

#[tokio::test]
async fn test_unknown_mount_is_not_found() {
    let mut handle = start_gateway().await;
    let url = format!("rtsp://{}/nobody", handle.rtsp_addr);
    let response = rtsp_request(
        handle.rtsp_addr,
        format!("DESCRIBE {url} RTSP/1.0\r\nCSeq: 1\r\n\r\n"),
        "\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("RTSP/1.0 404"), "{response}");
    handle.shutdown_graceful(5).await;
}

#[tokio::test]
async fn test_mount_without_publisher_is_unavailable() {
    let mut handle = start_gateway().await;
    let _id = create_camera(&handle).await;

    let url = format!("rtsp://{}/camera", handle.rtsp_addr);
    let mut response = String::new();
    for _ in 0..100 {
        response = rtsp_request(
            handle.rtsp_addr,
            format!("DESCRIBE {url} RTSP/1.0\r\nCSeq: 1\r\n\r\n"),
            "\r\n\r\n",
        )
        .await;
        if !response.starts_with("RTSP/1.0 404") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(response.starts_with("RTSP/1.0 503"), "{response}");
    handle.shutdown_graceful(5).await;
}
