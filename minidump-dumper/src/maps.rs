// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! The memory mappings of a process, as listed in `/proc/<pid>/maps`.

use std::io::{self, Write};

use tracing::{trace, warn};

use crate::auxv::AuxvInfo;

/// The name given to the vDSO mapping.
pub const LINUX_GATE_LIBRARY_NAME: &str = "linux-gate.so";
/// What the kernel appends to the path of a mapped file that was deleted.
pub const DELETED_SUFFIX: &str = " (deleted)";
/// Names this long or longer are dropped, as they would overflow a
/// `NAME_MAX` sized buffer.
pub const NAME_MAX: usize = 255;

/// A single memory mapping of the target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start_address: u64,
    pub size: u64,
    /// Offset into the backing file.
    pub file_offset: u64,
    pub executable: bool,
    /// Path of the backing file, `linux-gate.so` for the vDSO, or empty.
    pub name: String,
}

impl MemoryMapping {
    pub fn end(&self) -> u64 {
        self.start_address.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start_address && address < self.end()
    }

    pub fn is_named(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn name_is_path(&self) -> bool {
        self.name.starts_with('/')
    }

    pub fn is_linux_gate(&self) -> bool {
        self.name == LINUX_GATE_LIBRARY_NAME
    }

    /// Device nodes are never opened, whatever they contain.
    pub fn is_unsafe_to_open(&self) -> bool {
        self.name.starts_with("/dev/")
    }

    /// The name without the `" (deleted)"` suffix, if it has one.
    ///
    /// The name must be at least as long as `"/x (deleted)"`.
    pub fn deleted_path(&self) -> Option<&str> {
        if self.name.len() < DELETED_SUFFIX.len() + 2 {
            return None;
        }
        self.name.strip_suffix(DELETED_SUFFIX)
    }

    /// Drop a `" (deleted)"` suffix from the name.
    pub fn strip_deleted_suffix(&mut self) -> bool {
        match self.deleted_path() {
            Some(path) => {
                let len = path.len();
                self.name.truncate(len);
                true
            }
            None => false,
        }
    }

    /// Write a human-readable description of this mapping to `f`.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        write!(
            f,
            "MemoryMapping
  start_address = {:#x}
  size          = {:#x}
  file_offset   = {:#x}
  executable    = {}
  name          = \"{}\"
",
            self.start_address, self.size, self.file_offset, self.executable, self.name,
        )
    }
}

/// Parse a hex number at the start of `bytes`, returning it and the rest.
fn read_hex(bytes: &[u8]) -> Option<(u64, &[u8])> {
    let digits = bytes.iter().take_while(|b| b.is_ascii_hexdigit()).count();
    if digits == 0 {
        return None;
    }
    let mut value: u64 = 0;
    for &b in &bytes[..digits] {
        let digit = (b as char).to_digit(16)?;
        value = value.checked_mul(16)?.checked_add(digit.into())?;
    }
    Some((value, &bytes[digits..]))
}

struct MapLine<'a> {
    start: u64,
    end: u64,
    offset: u64,
    executable: bool,
    path: Option<&'a [u8]>,
}

/// Parse `start-end perms offset ...`. The path is everything from the first
/// `/` on.
fn parse_line(line: &[u8]) -> Option<MapLine<'_>> {
    let (start, rest) = read_hex(line)?;
    let rest = rest.strip_prefix(b"-")?;
    let (end, rest) = read_hex(rest)?;
    // " rwxp "
    let perms = rest.get(..6)?;
    if perms[0] != b' ' || perms[5] != b' ' {
        return None;
    }
    let (offset, rest) = read_hex(&rest[6..])?;
    if rest.first() != Some(&b' ') {
        return None;
    }
    let path = line.iter().position(|&b| b == b'/').map(|i| &line[i..]);
    Some(MapLine {
        start,
        end,
        offset,
        executable: perms[3] == b'x',
        path,
    })
}

/// Build the mapping list from the contents of a `maps` file.
///
/// Lines that don't parse (or describe an empty range) are skipped. A named
/// mapping that directly follows the last appended mapping of the same name
/// is merged into it. The mapping containing the entry point is moved
/// to the front.
pub fn parse_maps(data: &[u8], auxv: &AuxvInfo) -> Vec<MemoryMapping> {
    let lines = data.split(|&b| b == b'\n').filter(|line| !line.is_empty());
    let mut mappings: Vec<MemoryMapping> = Vec::with_capacity(lines.clone().count());

    for line in lines {
        let parsed = match parse_line(line) {
            Some(parsed) if parsed.end > parsed.start => parsed,
            _ => {
                trace!("skipping maps line {:?}", String::from_utf8_lossy(line));
                continue;
            }
        };
        let mut offset = parsed.offset;
        let name = match parsed.path {
            Some(path) => Some(String::from_utf8_lossy(path).into_owned()),
            None if auxv.linux_gate_address == Some(parsed.start) => {
                offset = 0;
                Some(LINUX_GATE_LIBRARY_NAME.to_owned())
            }
            None => None,
        };

        // Only the last appended mapping is a merge candidate, never the entry
        // point mapping moved to the front.
        if let (Some(name), Some(prev)) = (&name, mappings.last_mut()) {
            if parsed.start == prev.end() && prev.name == *name {
                trace!("merging {:#x}-{:#x} into {}", parsed.start, parsed.end, name);
                prev.size = parsed.end - prev.start_address;
                continue;
            }
        }

        let name = match name {
            Some(name) if name.len() >= NAME_MAX => {
                warn!("mapping name too long ({} bytes), dropping it", name.len());
                String::new()
            }
            Some(name) => name,
            None => String::new(),
        };
        let mapping = MemoryMapping {
            start_address: parsed.start,
            size: parsed.end - parsed.start,
            file_offset: offset,
            executable: parsed.executable,
            name,
        };

        let has_entry = auxv
            .entry_point
            .map_or(false, |entry| mapping.contains(entry));
        if has_entry && !mappings.is_empty() {
            trace!("moving entry point mapping {:#x} to the front", mapping.start_address);
            mappings.insert(0, mapping);
        } else {
            mappings.push(mapping);
        }
    }
    mappings
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(maps: &str) -> Vec<MemoryMapping> {
        parse_maps(maps.as_bytes(), &AuxvInfo::default())
    }

    #[test]
    fn test_merge_same_file() {
        let mappings = parse(
            "00400000-00401000 r-xp 00000000 08:01 123456 /bin/true\n\
             00401000-00402000 r-xp 00001000 08:01 123456 /bin/true\n",
        );
        assert_eq!(
            mappings,
            vec![MemoryMapping {
                start_address: 0x400000,
                size: 0x2000,
                file_offset: 0,
                executable: true,
                name: "/bin/true".to_owned(),
            }]
        );
        // The already merged equivalent gives the same result.
        assert_eq!(
            parse("00400000-00402000 r-xp 00000000 08:01 123456 /bin/true\n"),
            mappings
        );
    }

    #[test]
    fn test_no_merge() {
        let mappings = parse(
            "00400000-00401000 r-xp 00000000 08:01 1 /bin/true\n\
             00401000-00402000 rw-p 00001000 08:01 2 /bin/false\n\
             00403000-00404000 rw-p 00002000 08:01 2 /bin/false\n\
             00404000-00405000 rw-p 00000000 00:00 0\n\
             00405000-00406000 rw-p 00000000 00:00 0\n\
             7ffd0000-7ffd1000 rw-p 00000000 00:00 0 [stack]\n",
        );
        assert_eq!(mappings.len(), 6);
        assert_eq!(mappings[1].name, "/bin/false");
        assert_eq!(mappings[2].name, "/bin/false");
        // Anonymous mappings are never merged.
        assert!(!mappings[3].is_named());
        assert!(!mappings[4].is_named());
        // Only paths are names.
        assert!(!mappings[5].is_named());
        assert!(!mappings[1].executable);
    }

    #[test]
    fn test_entry_point_promotion() {
        let auxv = AuxvInfo {
            linux_gate_address: None,
            entry_point: Some(0x400123),
        };
        let mappings = parse_maps(
            b"00010000-00011000 r--p 00000000 08:01 1 /lib/ld.so\n\
              00011000-00012000 rw-p 00000000 00:00 0\n\
              00400000-00401000 r-xp 00000000 08:01 2 /bin/prog\n\
              00401000-00402000 r--p 00001000 08:01 2 /bin/prog\n\
              00500000-00501000 rw-p 00000000 00:00 0\n",
            &auxv,
        );
        let starts: Vec<u64> = mappings.iter().map(|m| m.start_address).collect();
        assert_eq!(starts, vec![0x400000, 0x10000, 0x11000, 0x401000, 0x500000]);
        // The promoted mapping was inserted, not appended, so the executable's
        // next segment isn't merged into it.
        assert_eq!(mappings[0].size, 0x1000);
        assert_eq!(mappings[0].name, "/bin/prog");
        assert_eq!(mappings[3].name, "/bin/prog");
    }

    #[test]
    fn test_merge_across_promoted_mapping() {
        let auxv = AuxvInfo {
            linux_gate_address: None,
            entry_point: Some(0x400000),
        };
        let mappings = parse_maps(
            b"00001000-00002000 r-xp 00000000 08:01 1 /lib/a.so
              00400000-00401000 r-xp 00000000 08:01 2 /bin/p
              00002000-00003000 r--p 00001000 08:01 1 /lib/a.so
",
            &auxv,
        );
        assert_eq!(
            mappings,
            vec![
                MemoryMapping {
                    start_address: 0x400000,
                    size: 0x1000,
                    file_offset: 0,
                    executable: true,
                    name: "/bin/p".to_owned(),
                },
                MemoryMapping {
                    start_address: 0x1000,
                    size: 0x2000,
                    file_offset: 0,
                    executable: true,
                    name: "/lib/a.so".to_owned(),
                },
            ]
        );
    }

    #[test]
    fn test_executable_segments_merge_when_first() {
        let auxv = AuxvInfo {
            linux_gate_address: None,
            entry_point: Some(0x400123),
        };
        let mappings = parse_maps(
            b"00400000-00401000 r-xp 00000000 08:01 2 /bin/prog
              00401000-00402000 r--p 00001000 08:01 2 /bin/prog
              00010000-00011000 r--p 00000000 08:01 1 /lib/ld.so
",
            &auxv,
        );
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].start_address, 0x400000);
        assert_eq!(mappings[0].size, 0x2000);
    }

    #[test]
    fn test_entry_point_first_already() {
        let auxv = AuxvInfo {
            linux_gate_address: None,
            entry_point: Some(0x400000),
        };
        let mappings = parse_maps(
            b"00400000-00401000 r-xp 00000000 08:01 2 /bin/prog\n\
              00500000-00501000 rw-p 00000000 00:00 0\n",
            &auxv,
        );
        assert_eq!(mappings[0].start_address, 0x400000);
        assert_eq!(mappings.len(), 2);
    }

    #[test]
    fn test_linux_gate() {
        let auxv = AuxvInfo {
            linux_gate_address: Some(0x7fff_f7ff_d000),
            entry_point: None,
        };
        let mappings = parse_maps(
            b"7ffff7ffa000-7ffff7ffd000 r--p 00000000 00:00 0 [vvar]\n\
              7ffff7ffd000-7ffff7fff000 r-xp 00001000 00:00 0 [vdso]\n",
            &auxv,
        );
        assert_eq!(mappings.len(), 2);
        assert!(!mappings[0].is_named());
        assert_eq!(mappings[1].name, LINUX_GATE_LIBRARY_NAME);
        assert_eq!(mappings[1].file_offset, 0);
        assert!(mappings[1].is_linux_gate());
        assert!(!mappings[1].name_is_path());
    }

    #[test]
    fn test_malformed_lines() {
        let mappings = parse(
            "garbage\n\
             00400000 r-xp 00000000 08:01 1 /bin/a\n\
             00400000-00401000\n\
             00400000-00401000 r-xp\n\
             00400000-00401000 r-xp zz 08:01 1 /bin/b\n\
             00402000-00401000 r-xp 00000000 08:01 1 /bin/backwards\n\
             00402000-00402000 r-xp 00000000 08:01 1 /bin/empty\n\
             fffffffffffffffff-0 r-xp 00000000 08:01 1 /bin/overflow\n\
             \n\
             00600000-00601000 r-xp 00000000 08:01 1 /bin/good\n",
        );
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].name, "/bin/good");
        assert!(parse("").is_empty());
    }

    #[test]
    fn test_long_name_dropped() {
        let long = format!("/{}", "a".repeat(NAME_MAX));
        let maps = format!(
            "00400000-00401000 r-xp 00000000 08:01 1 {}\n\
             00401000-00402000 r-xp 00001000 08:01 1 {}\n",
            long, long
        );
        let mappings = parse(&maps);
        assert_eq!(mappings.len(), 2);
        assert!(!mappings[0].is_named());
    }

    #[test]
    fn test_deleted_path() {
        let mut mapping = MemoryMapping {
            name: "/usr/bin/prog (deleted)".to_owned(),
            ..Default::default()
        };
        assert_eq!(mapping.deleted_path(), Some("/usr/bin/prog"));
        assert!(mapping.strip_deleted_suffix());
        assert_eq!(mapping.name, "/usr/bin/prog");
        assert!(!mapping.strip_deleted_suffix());

        let short = MemoryMapping {
            name: "/ (deleted)".to_owned(),
            ..Default::default()
        };
        assert_eq!(short.deleted_path(), None);
    }

    #[test]
    fn test_mapping_helpers() {
        let mapping = MemoryMapping {
            start_address: 0x1000,
            size: 0x1000,
            name: "/dev/dri/card0".to_owned(),
            ..Default::default()
        };
        assert_eq!(mapping.end(), 0x2000);
        assert!(mapping.contains(0x1000));
        assert!(mapping.contains(0x1fff));
        assert!(!mapping.contains(0x2000));
        assert!(!mapping.contains(0xfff));
        assert!(mapping.is_unsafe_to_open());
        assert!(mapping.name_is_path());

        let mut out = Vec::new();
        mapping.print(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("start_address = 0x1000"));
        assert!(out.contains("\"/dev/dri/card0\""));
    }
}
