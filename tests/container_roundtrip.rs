//! Stream round trips through memory and file backed containers

use vmgs_rs::{
    Container, ContainerConfig, FileStorage, MemoryStorage, StreamFlags, VmgsBuilder, VmgsError,
};

fn config(block_size: u32, initial_blocks: u64) -> ContainerConfig {
    ContainerConfig {
        block_size,
        initial_blocks,
        auto_grow: false,
        max_blocks: initial_blocks * 4,
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[test]
fn test_sizes_around_block_boundaries() {
    let block = 4096usize;
    let sizes = [0, 1, block - 1, block, block + 1, 3 * block + 17];

    let mut container = Container::format(MemoryStorage::new(), config(4096, 64)).unwrap();
    for (i, &size) in sizes.iter().enumerate() {
        container
            .write_stream(&format!("stream{}", i), &pattern(size, i as u8))
            .unwrap();
    }

    let storage = container.close().unwrap();
    let mut container = Container::open(storage).unwrap();

    for (i, &size) in sizes.iter().enumerate() {
        let name = format!("stream{}", i);
        let data = container.read_stream(&name).unwrap();
        assert_eq!(data.len(), size, "length of {}", name);
        assert_eq!(data, pattern(size, i as u8), "content of {}", name);

        let info = container.stream_info(&name).unwrap();
        assert_eq!(info.extent.count, (size as u64).div_ceil(block as u64));
    }
}

#[test]
fn test_final_block_is_zero_padded() {
    let mut container = Container::format(MemoryStorage::new(), config(512, 16)).unwrap();
    container.write_stream("a", &[0xFF; 700]).unwrap();
    let extent = container.stream_info("a").unwrap().extent;

    let image = container.close().unwrap().into_inner();
    let start = (extent.start * 512) as usize;
    let block = &image[start..start + 1024];
    assert!(block[..700].iter().all(|&b| b == 0xFF));
    assert!(block[700..].iter().all(|&b| b == 0));
}

#[test]
fn test_replace_and_delete_survive_reopen() {
    let mut container = Container::format(MemoryStorage::new(), config(512, 32)).unwrap();
    container.write_stream("keep", b"first").unwrap();
    container.write_stream("replace", &pattern(2000, 1)).unwrap();
    container.write_stream("drop", b"gone soon").unwrap();

    container.write_stream("replace", b"short now").unwrap();
    container.delete_stream("drop").unwrap();
    assert!(matches!(
        container.delete_stream("drop"),
        Err(VmgsError::StreamNotFound(_))
    ));

    let mut container = Container::open(container.close().unwrap()).unwrap();
    let names: Vec<_> = container.streams().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["keep", "replace"]);
    assert_eq!(container.read_stream("keep").unwrap(), b"first");
    assert_eq!(container.read_stream("replace").unwrap(), b"short now");
    assert!(container.verify().unwrap().is_clean());
}

#[test]
fn test_file_backed_reopen() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("roundtrip.vmgs");

    let nvram = pattern(10_000, 7);
    let mut vmgs = VmgsBuilder::new()
        .path(&path)
        .initial_blocks(32)
        .build_file()
        .unwrap();
    vmgs.write_stream_with_flags("bios_nvram", &nvram, StreamFlags::AUTHENTICATED)
        .unwrap();
    vmgs.write_stream("empty", b"").unwrap();
    vmgs.close().unwrap();

    let mut vmgs = Container::open(FileStorage::open(&path).unwrap()).unwrap();
    assert_eq!(vmgs.read_stream("bios_nvram").unwrap(), nvram);
    assert_eq!(vmgs.read_stream("empty").unwrap(), Vec::<u8>::new());
    assert_eq!(
        vmgs.stream_info("bios_nvram").unwrap().flags,
        StreamFlags::AUTHENTICATED
    );
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        vmgs.header().container_bytes()
    );
}

#[test]
fn test_resize_grow_and_shrink() {
    let mut container = Container::format(MemoryStorage::new(), config(512, 16)).unwrap();
    container.write_stream("a", &pattern(1500, 3)).unwrap();

    container.resize(64).unwrap();
    assert_eq!(container.header().total_blocks, 64);
    assert_eq!(container.storage().as_bytes().len(), 64 * 512);
    container.write_stream("b", &pattern(30 * 512, 4)).unwrap();

    // "b" lives past block 16
    let b_end = container.stream_info("b").unwrap().extent.end();
    assert!(matches!(
        container.resize(16),
        Err(VmgsError::ShrinkBelowAllocated { requested: 16, .. })
    ));
    assert_eq!(container.header().total_blocks, 64);

    container.delete_stream("b").unwrap();
    container.resize(16).unwrap();
    assert!(b_end > 16);
    assert_eq!(container.header().total_blocks, 16);
    assert_eq!(container.storage().as_bytes().len(), 16 * 512);

    let mut container = Container::open(container.close().unwrap()).unwrap();
    assert_eq!(container.read_stream("a").unwrap(), pattern(1500, 3));
    assert!(matches!(
        container.resize(1),
        Err(VmgsError::InvalidConfig(_))
    ));
}

#[test]
fn test_shrink_moves_table_down() {
    let mut cfg = config(512, 8);
    cfg.auto_grow = true;
    let mut container = Container::format(MemoryStorage::new(), cfg).unwrap();

    // Data would need blocks 3..9, so the write grows the container to 16 blocks
    container.write_stream("a", &pattern(6 * 512, 1)).unwrap();
    assert_eq!(container.header().total_blocks, 16);

    // Shrinking the stream leaves the table alone above block 8
    container.write_stream("a", b"x").unwrap();
    assert!(container.header().file_table.start >= 8);

    container.resize(8).unwrap();
    assert!(container.header().file_table.end() <= 8);
    assert_eq!(container.header().total_blocks, 8);

    let mut container = Container::open(container.close().unwrap()).unwrap();
    assert_eq!(container.read_stream("a").unwrap(), b"x");
    assert!(container.verify().unwrap().is_clean());
}

#[test]
fn test_trailing_bytes_ignored() {
    let mut container = Container::format(MemoryStorage::new(), config(512, 8)).unwrap();
    container.write_stream("a", b"payload").unwrap();

    let mut image = container.close().unwrap().into_inner();
    image.extend_from_slice(&[0xAB; 1000]);

    let mut container = Container::open(MemoryStorage::from_bytes(image)).unwrap();
    assert_eq!(container.read_stream("a").unwrap(), b"payload");
}

#[test]
fn test_stats() {
    let mut container = Container::format(MemoryStorage::new(), config(1024, 20)).unwrap();
    container.write_stream("a", &[1; 3000]).unwrap();

    let stats = container.stats();
    assert_eq!(stats.block_size, 1024);
    assert_eq!(stats.total_blocks, 20);
    assert_eq!(stats.stream_count, 1);
    // header + table + 3 data blocks
    assert_eq!(stats.used_blocks, 5);
    assert_eq!(stats.free_blocks, 15);
    assert_eq!(stats.generation, 2);
}
