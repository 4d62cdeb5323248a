use x86_64::VirtAddr;

// ══════════════════════════════════════════════════════════════
//  Executable header
// ══════════════════════════════════════════════════════════════
//
// Programs are flat images copied verbatim into the program window. The
// only header fields the kernel reads are the ELF magic and the 32-bit
// entry address stored at byte 24.

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
pub const ENTRY_OFFSET: usize = 24;
pub const HEADER_LEN: usize = ENTRY_OFFSET + 4;

pub fn has_signature(image: &[u8]) -> bool {
    image.len() >= ELF_MAGIC.len() && image[..ELF_MAGIC.len()] == ELF_MAGIC
}

/// Entry address recorded in the image header, if the header is complete.
pub fn entry_point(image: &[u8]) -> Option<VirtAddr> {
    if !has_signature(image) || image.len() < HEADER_LEN {
        return None;
    }
    let raw = u32::from_le_bytes([
        image[ENTRY_OFFSET],
        image[ENTRY_OFFSET + 1],
        image[ENTRY_OFFSET + 2],
        image[ENTRY_OFFSET + 3],
    ]);
    VirtAddr::try_new(raw as u64).ok()
}
