//! End-to-end room behavior over real tasks and the file backer

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use webstream::{Backer, FileBacker, MemoryBacker, StreamError, StreamSystem, SystemConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> SystemConfig {
    SystemConfig::default()
        .room_regex("^[a-zA-Z0-9-]{3,256}$")
        .total_room_limit(10)
        .single_data_limit(500)
        .stream_data_limit(1000)
        .active_room_limit(10)
}

async fn wait_for_listeners(system: &StreamSystem, room: &str, count: usize) {
    for _ in 0..500 {
        if system.room_info(room).await.unwrap().listener_count == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("room {} never reached {} listeners", room, count);
}

async fn readers_released_by_one_append(system: Arc<StreamSystem>, room: &str, count: usize, offset: usize) {
    let token = CancellationToken::new();
    let send = b"Yes indeed!";

    let readers: Vec<_> = (0..count)
        .map(|_| {
            let system = Arc::clone(&system);
            let token = token.clone();
            let room = room.to_string();
            tokio::spawn(async move { system.read_data(&room, offset, None, Some(&token)).await })
        })
        .collect();

    wait_for_listeners(&system, room, count).await;
    for reader in &readers {
        assert!(!reader.is_finished(), "reader did not block at the end of {}", room);
    }

    system.append_data(room, send).await.unwrap();
    assert_eq!(system.room_info(room).await.unwrap().listener_count, 0);

    for reader in readers {
        let data = reader.await.unwrap().unwrap();
        assert_eq!(data, &send[..]);
    }
    let info = system.room_info(room).await.unwrap();
    assert_eq!(info.listener_count, 0);
    assert_eq!(info.last_write_listener_count, count);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_on_empty_room() {
    init_tracing();
    let system = Arc::new(
        StreamSystem::new(test_config(), Arc::new(MemoryBacker::new()))
            .await
            .unwrap(),
    );

    for count in [1, 2, 3, 10] {
        let room = format!("junk{}", count);
        readers_released_by_one_append(Arc::clone(&system), &room, count, 0).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_on_filled_room() {
    init_tracing();
    let system = Arc::new(
        StreamSystem::new(test_config(), Arc::new(MemoryBacker::new()))
            .await
            .unwrap(),
    );

    for count in [1, 2, 5] {
        let room = format!("junk{}", count);
        system.append_data(&room, &[0u8; 55]).await.unwrap();
        readers_released_by_one_append(Arc::clone(&system), &room, count, 55).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_serialize() {
    init_tracing();
    let system = Arc::new(
        StreamSystem::new(test_config(), Arc::new(MemoryBacker::new()))
            .await
            .unwrap(),
    );

    let writers: Vec<_> = (0..8u8)
        .map(|i| {
            let system = Arc::clone(&system);
            tokio::spawn(async move {
                for _ in 0..10 {
                    system.append_data("shared", &[i; 10]).await.unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    let data = system.read_data("shared", 0, None, None).await.unwrap();
    assert_eq!(data.len(), 800);
    // Every append landed whole
    for chunk in data.chunks(10) {
        assert!(chunk.iter().all(|b| *b == chunk[0]));
    }
}

#[tokio::test]
async fn test_file_backer_round_trip() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config().stream_folder(dir.path().join("streams"));

    let backer = Arc::new(FileBacker::open(&config.stream_folder).await.unwrap());
    let system = StreamSystem::new(config.clone(), backer.clone()).await.unwrap();

    system.append_data("simfile", b"Yes indeed!").await.unwrap();
    assert!(!webstream::backer::exists(backer.as_ref(), "simfile").await.unwrap());

    assert_eq!(system.dump_streams(true).await, vec!["simfile".to_string()]);
    let info = system.room_info("simfile").await.unwrap();
    assert_eq!(info.length, 11);
    assert_eq!(info.capacity, 0);

    let backing = backer.read("simfile", 1000).await.unwrap();
    assert!(backing.existed);
    assert_eq!(backing.data, b"Yes indeed!");

    // A new system over the same folder sees the room
    let backer = Arc::new(FileBacker::open(&config.stream_folder).await.unwrap());
    let restarted = StreamSystem::new(config, backer).await.unwrap();
    assert_eq!(restarted.total_room_count().await, 1);
    assert_eq!(restarted.room_info("simfile").await.unwrap().length, 11);
    assert_eq!(
        restarted.read_data("simfile", 4, None, None).await.unwrap(),
        &b"indeed!"[..]
    );
}

#[tokio::test]
async fn test_limits_scenario() {
    init_tracing();
    let system = StreamSystem::new(test_config(), Arc::new(MemoryBacker::new()))
        .await
        .unwrap();
    let payload = b"this payload is 27 bytes ok";
    assert_eq!(payload.len(), 27);

    for i in 0..10 {
        for _ in 0..5 {
            system.append_data(&format!("room-{}", i), payload).await.unwrap();
        }
    }
    for i in 0..10 {
        assert_eq!(system.room_info(&format!("room-{}", i)).await.unwrap().length, 135);
    }

    let result = system.append_data("room-10", payload).await;
    assert!(matches!(result, Err(StreamError::RoomLimit { limit: 10 })));
}

struct FailingBacker;

#[async_trait::async_trait]
impl Backer for FailingBacker {
    async fn write(&self, _name: &str, _data: &[u8]) -> std::io::Result<()> {
        Err(std::io::Error::other("disk on fire"))
    }

    async fn read(&self, _name: &str, _capacity: usize) -> std::io::Result<webstream::Backing> {
        Err(std::io::Error::other("disk on fire"))
    }

    async fn for_each_backing(
        &self,
        _visit: &mut (dyn for<'n, 's> FnMut(&'n str, &'s dyn Fn() -> std::io::Result<usize>) -> bool + Send),
    ) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_dump_keeps_room_loaded() {
    init_tracing();
    let system = StreamSystem::new(test_config(), Arc::new(FailingBacker))
        .await
        .unwrap();

    system.append_data("stuck", b"unsaved").await.unwrap();

    assert!(system.dump_streams(true).await.is_empty());
    assert_eq!(system.room_count(), 1);
    let info = system.room_info("stuck").await.unwrap();
    assert_eq!(info.capacity, 1000);
    assert!(info.dirty);
    assert_eq!(
        system.read_data("stuck", 0, None, None).await.unwrap(),
        &b"unsaved"[..]
    );
}
