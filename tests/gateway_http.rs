use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use ped_sentinel::{
    DetectionBox, DetectionData, FrameImage, Gateway, GatewayConfig, GatewayHandle, Label,
    MessageLog, SharedState,
};

fn spawn_gateway(index_path: &std::path::Path) -> (GatewayHandle, SharedState, MessageLog) {
    let state = SharedState::new();
    let messages = MessageLog::new();
    let gateway = Gateway::new(
        GatewayConfig {
            addr: "127.0.0.1:0".to_string(),
            index_path: index_path.to_path_buf(),
        },
        state.clone(),
        messages.clone(),
    );
    let handle = gateway.spawn().expect("spawn gateway");
    (handle, state, messages)
}

fn get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect");
    write!(stream, "GET {} HTTP/1.1\r\nHost: sentinel\r\n\r\n", path).expect("send request");
    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read response");
    response
}

fn body_of(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or("")
}

fn publish_sample(state: &SharedState) {
    state.publish(DetectionData {
        timestamp_ms: 42,
        image: Some(Arc::new(FrameImage {
            jpeg: vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9],
            width: 640,
            height: 480,
        })),
        boxes: vec![DetectionBox {
            x1: 5.7,
            y1: 6.2,
            x2: 105.9,
            y2: 206.1,
            score: 0.88,
            label: Label::new("person").unwrap(),
        }],
    });
}

#[test]
fn stream_before_first_cycle_returns_placeholder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (handle, _state, _messages) = spawn_gateway(&dir.path().join("missing.html"));

    let response = get(handle.addr, "/stream");
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("Content-Type: text/plain"));
    assert!(response.contains("Cache-Control: no-store, must-revalidate"));
    assert!(response.contains("Pragma: no-cache"));
    assert!(body_of(&response).contains("No detection image available yet"));

    handle.stop().expect("stop gateway");
}

#[test]
fn stream_after_publish_returns_jpeg_bytes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (handle, state, _messages) = spawn_gateway(&dir.path().join("missing.html"));
    publish_sample(&state);

    let mut stream = TcpStream::connect(handle.addr).expect("connect");
    write!(stream, "GET /stream HTTP/1.1\r\nHost: sentinel\r\n\r\n").expect("send");
    let mut response = Vec::new();
    stream.read_to_end(&mut response).expect("read");

    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("Content-Type: image/jpeg"));
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header end");
    assert_eq!(&response[split + 4..], &[0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);

    handle.stop().expect("stop gateway");
}

#[test]
fn detection_data_reports_published_result() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (handle, state, _messages) = spawn_gateway(&dir.path().join("missing.html"));
    publish_sample(&state);

    let response = get(handle.addr, "/detection-data");
    assert!(response.contains("Access-Control-Allow-Origin: *"));

    let value: serde_json::Value = serde_json::from_str(body_of(&response)).expect("json body");
    assert_eq!(value["timestamp"], 42);
    assert_eq!(value["image"]["width"], 640);
    assert_eq!(value["detections"][0]["class"], "person");
    assert_eq!(
        value["detections"][0]["bbox_absolute"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect::<Vec<_>>(),
        vec![5, 6, 105, 206]
    );

    handle.stop().expect("stop gateway");
}

#[test]
fn system_messages_renders_log_and_placeholder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (handle, _state, messages) = spawn_gateway(&dir.path().join("missing.html"));

    let response = get(handle.addr, "/system-messages");
    assert!(response.contains("Access-Control-Allow-Origin: *"));
    let value: serde_json::Value = serde_json::from_str(body_of(&response)).expect("json body");
    assert_eq!(value.as_array().unwrap().len(), 1);
    assert_eq!(value[0], "[System] No messages yet.");

    messages.append("System initialized successfully");
    messages.append("line with \"quotes\" and \\slashes\\ and\ttabs");

    let response = get(handle.addr, "/system-messages");
    let value: serde_json::Value = serde_json::from_str(body_of(&response)).expect("json body");
    let entries = value.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[0]
        .as_str()
        .unwrap()
        .ends_with("System initialized successfully"));
    assert!(entries[1]
        .as_str()
        .unwrap()
        .ends_with("line with \"quotes\" and \\slashes\\ and\ttabs"));

    handle.stop().expect("stop gateway");
}

#[test]
fn index_streams_asset_with_fallback() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index_path = dir.path().join("index.html");
    std::fs::write(&index_path, "<html><body>sentinel ui</body></html>").expect("write asset");

    let (handle, _state, _messages) = spawn_gateway(&index_path);

    let response = get(handle.addr, "/");
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("Transfer-Encoding: chunked"));
    assert!(response.contains("sentinel ui"));
    handle.stop().expect("stop gateway");

    // Missing asset degrades to the fixed fallback fragment.
    let (handle, _state, _messages) = spawn_gateway(&dir.path().join("missing.html"));
    let response = get(handle.addr, "/");
    assert!(response.contains("Could not load index.html"));
    handle.stop().expect("stop gateway");
}

#[test]
fn unknown_path_and_bad_method_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (handle, _state, _messages) = spawn_gateway(&dir.path().join("missing.html"));

    let response = get(handle.addr, "/nope");
    assert!(response.starts_with("HTTP/1.1 404 Not Found"));

    let mut stream = TcpStream::connect(handle.addr).expect("connect");
    write!(
        stream,
        "POST /stream HTTP/1.1\r\nHost: sentinel\r\nContent-Length: 0\r\n\r\n"
    )
    .expect("send");
    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read");
    assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed"));

    handle.stop().expect("stop gateway");
}

#[test]
fn concurrent_requests_see_whole_publishes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (handle, state, _messages) = spawn_gateway(&dir.path().join("missing.html"));
    publish_sample(&state);

    let writer = {
        let state = state.clone();
        std::thread::spawn(move || {
            for tag in 1..=50u64 {
                state.publish(DetectionData {
                    timestamp_ms: tag,
                    image: Some(Arc::new(FrameImage {
                        jpeg: tag.to_le_bytes().to_vec(),
                        width: tag as u32,
                        height: tag as u32,
                    })),
                    boxes: Vec::new(),
                });
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let addr = handle.addr;
            std::thread::spawn(move || {
                for _ in 0..25 {
                    let response = get(addr, "/detection-data");
                    let value: serde_json::Value =
                        serde_json::from_str(body_of(&response)).expect("json body");
                    // width always equals the publish tag; a torn read
                    // would pair a width with a foreign timestamp.
                    if value["image"].is_null() {
                        continue;
                    }
                    let ts = value["timestamp"].as_u64().unwrap();
                    if ts == 42 {
                        assert_eq!(value["image"]["width"], 640);
                    } else {
                        assert_eq!(value["image"]["width"].as_u64().unwrap(), ts);
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    handle.stop().expect("stop gateway");
}
