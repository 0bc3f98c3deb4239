use crate::*;

use chunkmesh_core::manifest::chunk_count;
use chunkmesh_core::ContentHash;
use chunkmesh_services::{Swarm, TransferError};

async fn three_nodes(mock: &MockTracker) -> Vec<Node> {
    let mut nodes = Vec::new();
    for _ in 0..3 {
        let node = Node::spawn().await;
        mock.register(node.location());
        nodes.push(node);
    }
    nodes
}

fn write_source(data: &[u8], name: &str) -> PathBuf {
    let path = temp_dir("src").join(name);
    std::fs::write(&path, data).unwrap();
    path
}

async fn stop_all(nodes: Vec<Node>) {
    for node in nodes {
        node.stop().await;
    }
}

/// Publish a file across three nodes, fetch it back, compare byte for byte.
#[tokio::test(flavor = "multi_thread")]
async fn test_round_trip_across_three_nodes() {
    let mock = MockTracker::start().await.unwrap();
    let nodes = three_nodes(&mock).await;
    let config = test_config(&mock.url);
    let swarm = Swarm::from_config(&config).unwrap();

    let data = sample_bytes(50_000);
    let src = write_source(&data, "report.pdf");

    let outcome = swarm.publish(&src).await.unwrap();
    let desc = &outcome.descriptor;
    assert_eq!(desc.name, "report.pdf");
    assert_eq!(desc.hash, ContentHash::of(&data));
    assert_eq!(desc.chunks.len() as u64, chunk_count(50_000, 4096));
    assert!(!desc.encrypted);
    for chunk in &desc.chunks {
        assert_eq!(chunk.peers.len(), 1);
        let holders = nodes.iter().filter(|n| n.store.has(&chunk.hash)).count();
        assert_eq!(holders, 1);
    }
    assert_eq!(mock.file_count(), 1);

    let out_dir = temp_dir("out");
    let report = swarm.fetch(outcome.receipt.file_id, &out_dir).await.unwrap();
    assert_eq!(report.path, out_dir.join("report.pdf"));
    assert_eq!(report.bytes, 50_000);
    assert_eq!(std::fs::read(&report.path).unwrap(), data);
    let leftover = std::fs::read_dir(&config.storage.staging_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);

    stop_all(nodes).await;
}

/// A file smaller than one chunk and a file of exactly one chunk.
#[tokio::test(flavor = "multi_thread")]
async fn test_single_chunk_files() {
    let mock = MockTracker::start().await.unwrap();
    let nodes = three_nodes(&mock).await;
    let swarm = Swarm::from_config(&test_config(&mock.url)).unwrap();

    for len in [1usize, 4096] {
        let data = sample_bytes(len);
        let src = write_source(&data, "one.bin");
        let outcome = swarm.publish(&src).await.unwrap();
        assert_eq!(outcome.descriptor.chunks.len(), 1);
        assert_eq!(outcome.descriptor.chunks[0].size, len as u64);

        let report = swarm.fetch(outcome.receipt.file_id, &temp_dir("out")).await.unwrap();
        assert_eq!(std::fs::read(&report.path).unwrap(), data);
    }

    stop_all(nodes).await;
}

/// The publishing node never sends chunks to itself.
#[tokio::test(flavor = "multi_thread")]
async fn test_publish_skips_own_listener() {
    let mock = MockTracker::start().await.unwrap();
    let nodes = three_nodes(&mock).await;
    let me = nodes[0].location();
    let swarm = Swarm::from_config(&test_config(&mock.url)).unwrap().with_local(me);

    let src = write_source(&sample_bytes(30_000), "a.bin");
    let outcome = swarm.publish(&src).await.unwrap();

    assert_eq!(nodes[0].store.count(), 0);
    for chunk in &outcome.descriptor.chunks {
        assert!(!chunk.peers.contains(&me));
    }

    stop_all(nodes).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_publish_with_only_self_has_no_peers() {
    let mock = MockTracker::start().await.unwrap();
    let node = Node::spawn().await;
    mock.register(node.location());
    let swarm = Swarm::from_config(&test_config(&mock.url))
        .unwrap()
        .with_local(node.location());

    let src = write_source(b"lonely", "lonely.txt");
    assert!(matches!(swarm.publish(&src).await, Err(TransferError::NoPeers)));
    assert_eq!(mock.file_count(), 0);

    node.stop().await;
}

/// Every listed peer is down: nothing placed, nothing published.
#[tokio::test(flavor = "multi_thread")]
async fn test_exhausted_swarm_publishes_nothing() {
    let mock = MockTracker::start().await.unwrap();
    mock.register(dead_peer().await);
    mock.register(dead_peer().await);
    let swarm = Swarm::from_config(&test_config(&mock.url)).unwrap();

    let src = write_source(&sample_bytes(10_000), "b.bin");
    match swarm.publish(&src).await {
        Err(TransferError::UploadIncomplete { failed, total }) => {
            assert_eq!(total, 3);
            assert_eq!(failed, vec![0, 1, 2]);
        }
        other => panic!("expected UploadIncomplete, got {other:?}"),
    }
    assert_eq!(mock.file_count(), 0);
}

/// Dead peers in the list are rotated past; every chunk lands on the live one.
#[tokio::test(flavor = "multi_thread")]
async fn test_rotation_skips_dead_peers() {
    let mock = MockTracker::start().await.unwrap();
    let live = Node::spawn().await;
    mock.register(dead_peer().await);
    mock.register(live.location());
    mock.register(dead_peer().await);
    let swarm = Swarm::from_config(&test_config(&mock.url)).unwrap();

    let src = write_source(&sample_bytes(20_000), "c.bin");
    let outcome = swarm.publish(&src).await.unwrap();
    for chunk in &outcome.descriptor.chunks {
        assert_eq!(chunk.peers, vec![live.location()]);
    }
    assert_eq!(live.store.count(), outcome.descriptor.chunks.len());

    live.stop().await;
}

/// With two replicas, losing one holder does not lose the file.
#[tokio::test(flavor = "multi_thread")]
async fn test_replication_survives_a_lost_node() {
    let mock = MockTracker::start().await.unwrap();
    let mut nodes = three_nodes(&mock).await;
    let mut config = test_config(&mock.url);
    config.transfer.replication_factor = 2;
    let swarm = Swarm::from_config(&config).unwrap();

    let data = sample_bytes(40_000);
    let src = write_source(&data, "d.bin");
    let outcome = swarm.publish(&src).await.unwrap();
    for chunk in &outcome.descriptor.chunks {
        assert_eq!(chunk.peers.len(), 2);
    }

    nodes.remove(0).stop().await;

    let report = swarm.fetch(outcome.receipt.file_id, &temp_dir("out")).await.unwrap();
    assert_eq!(std::fs::read(&report.path).unwrap(), data);

    stop_all(nodes).await;
}

/// A chunk altered on disk at its only holder fails the download.
#[tokio::test(flavor = "multi_thread")]
async fn test_corrupt_chunk_is_detected() {
    let mock = MockTracker::start().await.unwrap();
    let nodes = three_nodes(&mock).await;
    let swarm = Swarm::from_config(&test_config(&mock.url)).unwrap();

    let src = write_source(&sample_bytes(12_000), "e.bin");
    let outcome = swarm.publish(&src).await.unwrap();

    let victim = &outcome.descriptor.chunks[1];
    let holder = nodes.iter().find(|n| n.store.has(&victim.hash)).unwrap();
    let on_disk = holder.store.root().join(victim.hash.to_hex());
    std::fs::write(&on_disk, vec![0u8; victim.size as usize]).unwrap();

    let out_dir = temp_dir("out");
    match swarm.fetch(outcome.receipt.file_id, &out_dir).await {
        Err(TransferError::ChunkCorrupt { index, expected, .. }) => {
            assert_eq!(index, 1);
            assert_eq!(expected, victim.hash);
        }
        other => panic!("expected ChunkCorrupt, got {other:?}"),
    }
    assert!(!out_dir.join("e.bin").exists());

    stop_all(nodes).await;
}

/// Holders gone: the fetch reports exactly the missing indices.
#[tokio::test(flavor = "multi_thread")]
async fn test_fetch_with_holders_gone_is_incomplete() {
    let mock = MockTracker::start().await.unwrap();
    let node = Node::spawn().await;
    mock.register(node.location());
    let swarm = Swarm::from_config(&test_config(&mock.url)).unwrap();

    let src = write_source(&sample_bytes(9_000), "f.bin");
    let outcome = swarm.publish(&src).await.unwrap();
    node.stop().await;

    match swarm.fetch(outcome.receipt.file_id, &temp_dir("out")).await {
        Err(TransferError::DownloadIncomplete { missing }) => assert_eq!(missing, vec![0, 1, 2]),
        other => panic!("expected DownloadIncomplete, got {other:?}"),
    }
}

/// A hostile published name cannot escape the download directory.
#[tokio::test(flavor = "multi_thread")]
async fn test_fetch_sanitises_published_name() {
    let mock = MockTracker::start().await.unwrap();
    let node = Node::spawn().await;

    let data = b"payload".to_vec();
    let hash = ContentHash::of(&data);
    node.store.put(&hash, &data).await.unwrap();
    mock.state.lock().unwrap().files.push(FileDescriptor {
        id: Some(7),
        name: "../../escape.txt".into(),
        hash,
        size: data.len() as u64,
        encrypted: true,
        chunks: vec![chunkmesh_core::ChunkDescriptor {
            id: Some(1),
            index: 0,
            hash,
            size: data.len() as u64,
            peers: vec![node.location()],
        }],
    });

    let swarm = Swarm::from_config(&test_config(&mock.url)).unwrap();
    let out_dir = temp_dir("out");
    let report = swarm.fetch(7, &out_dir).await.unwrap();
    assert_eq!(report.path, out_dir.join("escape.txt"));
    assert_eq!(std::fs::read(&report.path).unwrap(), data);

    node.stop().await;
}
