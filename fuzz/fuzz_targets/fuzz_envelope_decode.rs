#![no_main]
use libfuzzer_sys::fuzz_target;
use vmgs_rs::core::envelope;

fuzz_target!(|data: &[u8]| {
    if let Ok(map) = envelope::decode(data) {
        // Anything that decodes must survive a re-encode
        let bytes = envelope::encode(&map).expect("decoded envelope must encode");
        assert_eq!(envelope::decode(&bytes).expect("re-decode"), map);
    }
});
