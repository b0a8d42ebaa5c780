use newtos_shared::mem::PAGE_FRAME_SIZE;

/// Size of a block device sector in bytes.
///
/// All IDE disks use this sector size, as do most USB and SCSI disks.
pub const BLOCK_SECTOR_SIZE: usize = 512;

/// Index of a block device sector.
///
/// Good enough for devices up to 2 TB.
pub type BlockSector = u32;

/// Sectors spanned by one page frame.
pub const SECTORS_PER_FRAME: usize = PAGE_FRAME_SIZE / BLOCK_SECTOR_SIZE;

/// Lower-level interface to the device backing the swap area.
///
/// Transfers are synchronous and assumed reliable; a driver that cannot
/// complete an operation should panic rather than return garbage. The swap
/// engine moves whole frames as runs of [`SECTORS_PER_FRAME`] consecutive
/// sector operations.
pub trait BlockDevice {
    /// Read sector `sector` into `buf`.
    fn read(&mut self, sector: BlockSector, buf: &mut [u8; BLOCK_SECTOR_SIZE]);
    /// Write `buf` to sector `sector`.
    fn write(&mut self, sector: BlockSector, buf: &[u8; BLOCK_SECTOR_SIZE]);
}
