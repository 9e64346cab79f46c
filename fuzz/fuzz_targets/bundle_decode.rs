#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let input = Bytes::copy_from_slice(data);
    let header = vari_client::read_header(data);

    if let Ok(files) = vari_client::decode(input.clone()) {
        assert!(header.is_ok());
        assert!(!files.is_empty());
        assert!(files.total_bytes() <= input.len());
        let _ = vari_client::extract_named_parts(files);
    }
});
