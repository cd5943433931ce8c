// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Reading the auxiliary vector.

use scroll::Endian;

use crate::elf::ElfClass;

pub const AT_NULL: u64 = 0;
pub const AT_ENTRY: u64 = 9;
pub const AT_SYSINFO_EHDR: u64 = 33;

/// The auxiliary vector entries the dumper cares about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuxvInfo {
    /// Where the kernel mapped the vDSO (`AT_SYSINFO_EHDR`).
    pub linux_gate_address: Option<u64>,
    /// The program entry point (`AT_ENTRY`).
    pub entry_point: Option<u64>,
}

/// An iterator over `(type, value)` pairs of an auxiliary vector.
///
/// Stops at `AT_NULL` or when the data runs out.
pub struct AuxvIter<'a> {
    data: &'a [u8],
    offset: usize,
    class: ElfClass,
    endian: Endian,
}

impl<'a> AuxvIter<'a> {
    pub fn new(data: &'a [u8], class: ElfClass, endian: Endian) -> AuxvIter<'a> {
        AuxvIter {
            data,
            offset: 0,
            class,
            endian,
        }
    }
}

impl Iterator for AuxvIter<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<(u64, u64)> {
        let a_type = self.class.read_word(self.data, &mut self.offset, self.endian)?;
        let value = self.class.read_word(self.data, &mut self.offset, self.endian)?;
        if a_type == AT_NULL {
            self.offset = self.data.len();
            return None;
        }
        Some((a_type, value))
    }
}

/// Find the vDSO address and the entry point in `data`.
///
/// Missing entries are `None`. The first occurrence of each wins.
pub fn read_auxv(data: &[u8], class: ElfClass, endian: Endian) -> AuxvInfo {
    let mut info = AuxvInfo::default();
    for (a_type, value) in AuxvIter::new(data, class, endian) {
        match a_type {
            AT_SYSINFO_EHDR if info.linux_gate_address.is_none() => {
                info.linux_gate_address = Some(value)
            }
            AT_ENTRY if info.entry_point.is_none() => info.entry_point = Some(value),
            _ => {}
        }
    }
    info
}
