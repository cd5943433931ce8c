#![no_main]
use libfuzzer_sys::fuzz_target;

use minidump_dumper::auxv::AuxvInfo;
use minidump_dumper::maps::parse_maps;

fuzz_target!(|data: &[u8]| {
    let auxv = AuxvInfo {
        linux_gate_address: Some(0x7fff_0000_0000),
        entry_point: Some(0x40_1000),
    };
    for mapping in parse_maps(data, &auxv) {
        assert!(mapping.size > 0);
    }
});
