#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(id) = minidump_dumper::FileId::from_elf(data) {
        let _ = id.to_guid_string();
    }
});
