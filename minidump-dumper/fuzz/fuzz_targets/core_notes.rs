#![no_main]
use libfuzzer_sys::fuzz_target;

use minidump_dumper::{enumerate_core_threads, CoreFile, Cpu};

fuzz_target!(|data: &[u8]| {
    // Whole core files.
    if let Ok(core) = CoreFile::from_data(data) {
        if let Ok(notes) = core.notes() {
            let _ = enumerate_core_threads(notes, core.cpu(), core.endian());
        }
        let _ = core.copy_data(0x1000, 16);
    }
    // Bare note segments.
    for cpu in [Cpu::X86, Cpu::X86_64, Cpu::Arm64] {
        let _ = enumerate_core_threads(data, cpu, scroll::LE);
    }
});
