use bytemuck::{Pod, Zeroable};

/// Longest run one header can describe; the count field is 6 bits.
pub const DWORDS_PER_PATCH: u32 = 64;

const SRC_OFFSET_BITS: u32 = 26;
const SRC_OFFSET_MASK: u32 = (1 << SRC_OFFSET_BITS) - 1;
const COUNT_MASK: u32 = 0b11_1111;

/// One contiguous run of dwords to scatter into the scene buffer.
///
/// Word 0: bits [31:26] hold the dword count minus one, bits [25:0] the
/// source dword offset into the frame's payload stream. Word 1: the
/// destination dword offset. The compute program decodes exactly this.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct PatchHeader {
    dword_count_and_src_offset: u32,
    dst_dword_offset: u32,
}

const _: () = assert!(std::mem::size_of::<PatchHeader>() == 8);
const _: () = assert!(std::mem::align_of::<PatchHeader>() == 4);

impl PatchHeader {
    pub fn new(dword_count: u32, src_dword_offset: u32, dst_dword_offset: u32) -> Self {
        assert!(
            (1..=DWORDS_PER_PATCH).contains(&dword_count),
            "patch run of {dword_count} dwords does not fit the 6-bit count"
        );
        assert!(
            src_dword_offset & !SRC_OFFSET_MASK == 0,
            "patch payload offset {src_dword_offset} does not fit in 26 bits"
        );
        Self {
            dword_count_and_src_offset: ((dword_count - 1) << SRC_OFFSET_BITS) | src_dword_offset,
            dst_dword_offset,
        }
    }

    #[inline]
    pub fn dword_count(&self) -> u32 {
        ((self.dword_count_and_src_offset >> SRC_OFFSET_BITS) & COUNT_MASK) + 1
    }

    #[inline]
    pub fn src_dword_offset(&self) -> u32 {
        self.dword_count_and_src_offset & SRC_OFFSET_MASK
    }

    #[inline]
    pub fn dst_dword_offset(&self) -> u32 {
        self.dst_dword_offset
    }
}
