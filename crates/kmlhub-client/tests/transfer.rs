use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use kmlhub_client::{TransferAgent, TransferError};
use kmlhub_core::models::{TransferProgress, UploadCredentials, UploadRequest};
use mockito::Matcher;
use reqwest::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn credentials(transfer_url: String) -> UploadCredentials {
    UploadCredentials {
        transfer_url,
        file_key: "input_kml_files/parcel.kml".to_string(),
        expires_in_seconds: 3600,
        extra_fields: BTreeMap::new(),
    }
}

fn assert_monotonic(progress: &[TransferProgress]) {
    assert!(progress
        .windows(2)
        .all(|w| w[0].percentage <= w[1].percentage && w[0].bytes_sent <= w[1].bytes_sent));
    assert!(progress.iter().all(|p| p.percentage <= 100));
}

#[tokio::test]
async fn test_transfer_reports_monotonic_progress_and_derives_key() {
    let mut server = mockito::Server::new_async().await;
    let put = server
        .mock("PUT", "/bucket/input_kml_files/parcel.kml")
        .match_query(Matcher::UrlEncoded("sig".into(), "abc".into()))
        .match_header("content-type", "application/vnd.google-earth.kml")
        .with_status(200)
        .create_async()
        .await;

    let data = Bytes::from(vec![b'k'; 300_000]);
    let request = UploadRequest::new(
        "parcel.kml",
        "application/vnd.google-earth.kml",
        data.len() as u64,
    );
    let creds = credentials(format!(
        "{}/bucket/input_kml_files/parcel.kml?sig=abc",
        server.url()
    ));

    let mut progress = Vec::new();
    let file_key = TransferAgent::default()
        .transfer(&request, data, &creds, |p| progress.push(p))
        .await
        .unwrap();

    assert_eq!(file_key, "input_kml_files/parcel.kml");
    assert!(progress.len() >= 2);
    assert_monotonic(&progress);
    let (last, earlier) = progress.split_last().unwrap();
    assert_eq!(*last, TransferProgress::complete(300_000));
    assert!(earlier.iter().all(|p| p.percentage < 100));
    put.assert_async().await;
}

#[tokio::test]
async fn test_transfer_synthesizes_key_when_url_has_no_path() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("PUT", "/")
        .match_query(Matcher::Any)
        .with_status(201)
        .create_async()
        .await;

    let request = UploadRequest::new("parcel.kml", "text/xml", 4);
    let creds = credentials(format!("{}/?token=t", server.url()));
    let file_key = TransferAgent::default()
        .transfer(&request, Bytes::from_static(b"<kml"), &creds, |_| {})
        .await
        .unwrap();

    let rest = file_key.strip_prefix("input_kml_files/").unwrap();
    let (timestamp, name) = rest.split_once('-').unwrap();
    assert!(timestamp.parse::<i64>().is_ok());
    assert_eq!(name, "parcel.kml");
}

#[tokio::test]
async fn test_transfer_store_rejection_never_reports_100() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("PUT", "/bucket/input_kml_files/parcel.kml")
        .with_status(403)
        .with_body("<Error><Code>SignatureDoesNotMatch</Code></Error>")
        .create_async()
        .await;

    let data = Bytes::from(vec![b'k'; 100_000]);
    let request = UploadRequest::new("parcel.kml", "application/xml", data.len() as u64);
    let creds = credentials(format!("{}/bucket/input_kml_files/parcel.kml", server.url()));

    let mut progress = Vec::new();
    let err = TransferAgent::default()
        .transfer(&request, data, &creds, |p| progress.push(p))
        .await
        .unwrap_err();

    match err {
        TransferError::UpstreamError { status_code, .. } => assert_eq!(status_code, 403),
        other => panic!("expected UpstreamError, got {:?}", other),
    }
    assert_monotonic(&progress);
    assert!(progress.iter().all(|p| p.percentage < 100));
}

#[tokio::test]
async fn test_transfer_times_out_when_store_never_answers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 16 * 1024];
        while let Ok(n) = socket.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    });

    let data = Bytes::from(vec![b'k'; 8 * 1024]);
    let request = UploadRequest::new("slow.kml", "application/xml", data.len() as u64);
    let creds = credentials(format!("http://{}/bucket/input_kml_files/slow.kml", addr));
    let agent = TransferAgent::new(Client::new(), Duration::from_millis(300));

    let mut progress = Vec::new();
    let err = agent
        .transfer(&request, data, &creds, |p| progress.push(p))
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Timeout(d) if d == Duration::from_millis(300)));
    let seen = progress.len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(progress.len(), seen);
    assert!(progress.iter().all(|p| p.percentage < 100));
}

/// Accepts one connection, waits for `min_bytes` of request, sends `head`
/// and then holds the socket open without sending the promised body.
async fn stalling_server(head: &'static str, min_bytes: usize) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 16 * 1024];
        let mut received = 0;
        while received < min_bytes {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => received += n,
            }
        }
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });
    addr
}

#[tokio::test]
async fn test_transfer_times_out_when_error_body_stalls() {
    let data = Bytes::from(vec![b'k'; 8 * 1024]);
    let addr = stalling_server(
        "HTTP/1.1 500 Internal Server Error\r\nContent-Type: text/plain\r\nContent-Length: 100\r\n\r\n",
        data.len(),
    )
    .await;

    let request = UploadRequest::new("slow.kml", "application/xml", data.len() as u64);
    let creds = credentials(format!("http://{}/bucket/input_kml_files/slow.kml", addr));
    let agent = TransferAgent::new(Client::new(), Duration::from_millis(300));

    let mut progress = Vec::new();
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        agent.transfer(&request, data, &creds, |p| progress.push(p)),
    )
    .await
    .expect("transfer should give up at its own deadline");

    assert!(matches!(result, Err(TransferError::Timeout(_))));
    assert!(progress.iter().all(|p| p.percentage < 100));
}

#[tokio::test]
async fn test_relay_times_out_when_success_body_stalls() {
    let data = Bytes::from(vec![b'k'; 8 * 1024]);
    let addr = stalling_server(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n",
        data.len(),
    )
    .await;

    let request = UploadRequest::new("slow.kml", "application/xml", data.len() as u64);
    let creds = credentials("https://store.example/input_kml_files/slow.kml?sig=1".to_string());
    let agent = TransferAgent::new(Client::new(), Duration::from_millis(300));

    let mut progress = Vec::new();
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        agent.transfer_via_relay(&format!("http://{}", addr), &request, data, &creds, |p| {
            progress.push(p)
        }),
    )
    .await
    .expect("relay should give up at its own deadline");

    assert!(matches!(result, Err(TransferError::Timeout(_))));
    assert_monotonic(&progress);
    assert!(progress.iter().all(|p| p.percentage < 100));
}

#[tokio::test]
async fn test_transfer_network_failure() {
    // Bind then drop so the port is closed.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let request = UploadRequest::new("parcel.kml", "application/xml", 3);
    let creds = credentials(format!("http://{}/bucket/input_kml_files/parcel.kml", addr));
    let err = TransferAgent::default()
        .transfer(&request, Bytes::from_static(b"kml"), &creds, |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Network(_)));
}

#[tokio::test]
async fn test_relay_transfer_returns_proxy_key() {
    let mut server = mockito::Server::new_async().await;
    let relay = server
        .mock("POST", "/api/upload-proxy")
        .match_header(
            "content-type",
            Matcher::Regex("^multipart/form-data".to_string()),
        )
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="presignedUrl""#.to_string()),
            Matcher::Regex(r#"name="file"; filename="parcel.kml""#.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"success":true,"fileKey":"input_kml_files/parcel.kml","message":"File uploaded successfully"}"#,
        )
        .create_async()
        .await;

    let data = Bytes::from(vec![b'k'; 70_000]);
    let request = UploadRequest::new("parcel.kml", "application/xml", data.len() as u64);
    let creds = credentials("https://store.example/bucket/input_kml_files/parcel.kml?sig=1".to_string());

    let mut progress = Vec::new();
    let file_key = TransferAgent::default()
        .transfer_via_relay(&server.url(), &request, data, &creds, |p| progress.push(p))
        .await
        .unwrap();

    assert_eq!(file_key, "input_kml_files/parcel.kml");
    assert_eq!(progress.last().map(|p| p.percentage), Some(100));
    assert_monotonic(&progress);
    relay.assert_async().await;
}
