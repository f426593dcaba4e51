#![no_main]
use libfuzzer_sys::{fuzz_target, arbitrary::{Arbitrary, Unstructured}};
use std::collections::HashMap;
use vmgs_rs::{Container, ContainerConfig, MemoryStorage};

#[derive(Debug, Arbitrary)]
enum StreamOp {
    Write { name_idx: u8, data: Vec<u8> },
    Delete { name_idx: u8 },
    Reopen,
}

fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);

    let ops: Vec<StreamOp> = match u.arbitrary() {
        Ok(ops) => ops,
        Err(_) => return,
    };

    let config = ContainerConfig {
        block_size: 512,
        initial_blocks: 8,
        auto_grow: true,
        max_blocks: 4096,
    };
    let mut container = match Container::format(MemoryStorage::new(), config.clone()) {
        Ok(c) => c,
        Err(_) => return,
    };
    let mut model: HashMap<String, Vec<u8>> = HashMap::new();

    for op in ops.into_iter().take(32) {
        match op {
            StreamOp::Write { name_idx, data } => {
                let name = format!("stream{}", name_idx % 8);
                if container.write_stream(&name, &data).is_ok() {
                    model.insert(name, data);
                }
            }
            StreamOp::Delete { name_idx } => {
                let name = format!("stream{}", name_idx % 8);
                let deleted = container.delete_stream(&name).is_ok();
                assert_eq!(deleted, model.remove(&name).is_some());
            }
            StreamOp::Reopen => {
                let storage = container.close().expect("close");
                container = Container::open_with(storage, config.clone()).expect("reopen");
            }
        }
    }

    for (name, data) in &model {
        assert_eq!(&container.read_stream(name).expect("read"), data);
    }
    assert!(container.verify().expect("verify").is_clean());
});
