//! Lifecycle tracing.
//!
//! When the `tracing` feature is enabled, this module emits structured
//! events for control block transitions and allocator failures. Without the
//! feature every hook compiles to nothing.

#[cfg(feature = "tracing")]
pub mod internal {
    use crate::block::BlockKind;

    /// A control block was allocated and its pointee is live.
    pub fn block_created(block: *const u8, kind: BlockKind, size: usize) {
        tracing::trace!(block = ?block, kind = ?kind, size, "block_created");
    }

    /// The strong count reached zero and the pointee was destroyed.
    pub fn pointee_destroyed(block: *const u8, kind: BlockKind) {
        tracing::trace!(block = ?block, kind = ?kind, "pointee_destroyed");
    }

    /// Both counts reached zero and the block's storage was returned.
    pub fn block_freed(block: *const u8, kind: BlockKind) {
        tracing::trace!(block = ?block, kind = ?kind, "block_freed");
    }

    /// A weak pointer was asked for ownership after the pointee died.
    pub fn lock_failed(block: *const u8) {
        tracing::debug!(block = ?block, "lock_failed");
    }

    /// An allocator refused a request.
    pub fn alloc_failed(size: usize, align: usize, reason: &str) {
        tracing::warn!(size, align, reason, "alloc_failed");
    }

    /// The page pool reserved another region from the OS.
    pub fn region_reserved(len: usize, regions: usize) {
        tracing::debug!(len, regions, "region_reserved");
    }
}

#[cfg(not(feature = "tracing"))]
#[allow(clippy::missing_const_for_fn)]
pub mod internal {
    use crate::block::BlockKind;

    /// Stub when tracing is disabled.
    #[inline(always)]
    pub fn block_created(_block: *const u8, _kind: BlockKind, _size: usize) {}

    /// Stub when tracing is disabled.
    #[inline(always)]
    pub fn pointee_destroyed(_block: *const u8, _kind: BlockKind) {}

    /// Stub when tracing is disabled.
    #[inline(always)]
    pub fn block_freed(_block: *const u8, _kind: BlockKind) {}

    /// Stub when tracing is disabled.
    #[inline(always)]
    pub fn lock_failed(_block: *const u8) {}

    /// Stub when tracing is disabled.
    #[inline(always)]
    pub fn alloc_failed(_size: usize, _align: usize, _reason: &str) {}

    /// Stub when tracing is disabled.
    #[inline(always)]
    pub fn region_reserved(_len: usize, _regions: usize) {}
}
