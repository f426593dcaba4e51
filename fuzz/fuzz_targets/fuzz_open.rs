#![no_main]
use libfuzzer_sys::fuzz_target;
use vmgs_rs::{Container, MemoryStorage};

// Arbitrary images must be rejected cleanly or open into a usable container
fuzz_target!(|data: &[u8]| {
    let mut container = match Container::open(MemoryStorage::from_bytes(data.to_vec())) {
        Ok(c) => c,
        Err(_) => return,
    };

    for info in container.streams() {
        let bytes = container
            .read_stream(&info.name)
            .expect("listed stream must be readable");
        assert_eq!(bytes.len() as u64, info.byte_length);
    }
    let report = container.verify().expect("freshly opened image must verify");
    assert!(report.is_clean());
});
