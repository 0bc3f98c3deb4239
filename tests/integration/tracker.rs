use crate::*;

use chunkmesh_services::{TrackerClient, TrackerError};

fn client(url: &str) -> TrackerClient {
    TrackerClient::new(url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_peer_registration_lifecycle() {
    let mock = MockTracker::start().await.unwrap();
    let tracker = client(&mock.url);
    let peer = PeerLocation::new("10.0.0.7".parse().unwrap(), 5007);

    assert!(tracker.peers().await.unwrap().is_empty());

    let reply = tracker.add_peer(peer).await.unwrap();
    assert_eq!(reply.status, "success");
    assert_eq!(tracker.peers().await.unwrap(), vec![peer]);

    tracker.remove_peer(peer).await.unwrap();
    assert!(tracker.peers().await.unwrap().is_empty());
}

/// Non-2xx replies surface as typed status errors carrying the body.
#[tokio::test]
async fn test_error_statuses_are_surfaced() {
    let mock = MockTracker::start().await.unwrap();
    let tracker = client(&mock.url);
    let peer = PeerLocation::new("10.0.0.7".parse().unwrap(), 5007);

    tracker.add_peer(peer).await.unwrap();
    match tracker.add_peer(peer).await {
        Err(TrackerError::Status { status, body }) => {
            assert_eq!(status.as_u16(), 409);
            assert!(body.contains("already exists"), "{body}");
        }
        other => panic!("expected 409, got {other:?}"),
    }

    let other = PeerLocation::new("10.0.0.8".parse().unwrap(), 5008);
    assert!(matches!(
        tracker.remove_peer(other).await,
        Err(TrackerError::Status { status, .. }) if status.as_u16() == 404
    ));

    assert!(matches!(
        tracker.file(99).await,
        Err(TrackerError::Status { status, .. }) if status.as_u16() == 404
    ));
}

#[tokio::test]
async fn test_publish_and_list_files() {
    let mock = MockTracker::start().await.unwrap();
    let tracker = client(&mock.url);

    let data = b"tiny file";
    let desc = FileDescriptor {
        id: None,
        name: "tiny.txt".into(),
        hash: chunkmesh_core::ContentHash::of(data),
        size: data.len() as u64,
        encrypted: false,
        chunks: vec![chunkmesh_core::ChunkDescriptor {
            id: None,
            index: 0,
            hash: chunkmesh_core::ContentHash::of(data),
            size: data.len() as u64,
            peers: vec![PeerLocation::new("10.0.0.2".parse().unwrap(), 5002)],
        }],
    };

    let receipt = tracker.publish(&desc).await.unwrap();
    assert_eq!(receipt.file_id, 1);
    assert_eq!(receipt.file_hash, desc.hash.to_hex());

    let files = tracker.files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name, "tiny.txt");
    assert_eq!(files[0].file_size, 9);

    let fetched = tracker.file(receipt.file_id).await.unwrap();
    assert_eq!(fetched.id, Some(1));
    assert_eq!(fetched.chunks[0].peers, desc.chunks[0].peers);
    assert!(fetched.chunks[0].id.is_some());
}
