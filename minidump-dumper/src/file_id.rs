// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Content-based identifiers for ELF modules.
//!
//! A module is identified by the first 16 bytes of its `NT_GNU_BUILD_ID` note,
//! or, for binaries built without one, by XOR-folding the first page of its
//! `.text` section. The identifier is formatted the way a minidump's CodeView
//! record GUID would be.

use std::fmt;

use debugid::{CodeId, DebugId};
use minidump_common::format as md;
use scroll::{Pread, LE};
use tracing::trace;
use uuid::Uuid;

use crate::elf::{self, NoteIter, NT_GNU_BUILD_ID, PT_NOTE, SHT_NOTE, SHT_PROGBITS};

/// The size of a module identifier in bytes.
pub const FILE_ID_SIZE: usize = 16;

/// How much of `.text` gets hashed when there is no build id.
const TEXT_HASH_SIZE: usize = 4096;

/// A 16-byte module identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FileId([u8; FILE_ID_SIZE]);

impl FileId {
    pub fn new(bytes: [u8; FILE_ID_SIZE]) -> FileId {
        FileId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FILE_ID_SIZE] {
        &self.0
    }

    /// Identify the ELF image in `image`.
    ///
    /// The build id note wins if there is one; the `.text` hash is only
    /// computed when no build id note exists.
    pub fn from_elf(image: &[u8]) -> Option<FileId> {
        if !elf::is_valid_elf(image) {
            return None;
        }
        FileId::from_build_id_note(image).or_else(|| FileId::from_text_section(image))
    }

    /// The identifier held in the image's build id note, if any.
    ///
    /// The first `PT_NOTE` segment is searched; only if there is no such
    /// segment (or it is empty) is the `.note.gnu.build-id` section searched.
    pub fn from_build_id_note(image: &[u8]) -> Option<FileId> {
        let endian = elf::ElfHeader::parse(image)?.endian;
        let notes = elf::segment_data(image, PT_NOTE)
            .or_else(|| elf::section_data(image, ".note.gnu.build-id", SHT_NOTE))?;

        let note = NoteIter::new(notes, endian).find(|note| note.n_type == NT_GNU_BUILD_ID)?;
        if note.desc.is_empty() {
            // Either a zero-length build id or one that runs past the region.
            return None;
        }
        let mut bytes = [0; FILE_ID_SIZE];
        let len = note.desc.len().min(FILE_ID_SIZE);
        bytes[..len].copy_from_slice(&note.desc[..len]);
        trace!("build id note found ({} bytes)", note.desc.len());
        Some(FileId(bytes))
    }

    /// XOR-fold the first page of `.text`, 16 bytes at a time.
    ///
    /// A trailing partial chunk only touches the accumulator bytes it covers.
    pub fn from_text_section(image: &[u8]) -> Option<FileId> {
        let text = elf::section_data(image, ".text", SHT_PROGBITS)?;
        let text = &text[..text.len().min(TEXT_HASH_SIZE)];
        let mut bytes = [0; FILE_ID_SIZE];
        for chunk in text.chunks(FILE_ID_SIZE) {
            for (acc, byte) in bytes.iter_mut().zip(chunk) {
                *acc ^= byte;
            }
        }
        trace!("hashed {} bytes of .text", text.len());
        Some(FileId(bytes))
    }

    /// The identifier as a GUID: the first three fields are little-endian.
    pub fn uuid(&self) -> Uuid {
        match self.0[..].pread_with::<md::GUID>(0, LE) {
            Ok(guid) => Uuid::from_fields(guid.data1, guid.data2, guid.data3, &guid.data4),
            Err(_) => Uuid::nil(),
        }
    }

    /// Format as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`.
    ///
    /// The first eight bytes are byte-swapped as GUID fields, so this is what a
    /// minidump processor shows for a module with this identifier.
    pub fn to_guid_string(&self) -> String {
        self.uuid()
            .hyphenated()
            .encode_upper(&mut Uuid::encode_buffer())
            .to_owned()
    }

    /// The debug identifier a minidump processor derives for this module.
    pub fn debug_id(&self) -> DebugId {
        DebugId::from_uuid(self.uuid())
    }

    /// The raw identifier bytes as a code identifier.
    pub fn code_id(&self) -> CodeId {
        CodeId::from_binary(&self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_guid_string())
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.to_guid_string())
    }
}
