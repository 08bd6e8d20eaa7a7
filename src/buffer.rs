//! Reference-counted media buffers.
//!
//! A [`Buffer`] is a cheap handle: cloning it takes another reference to the
//! same memory and metadata. Mutation goes through copy-on-write, so a
//! buffer that has been handed to more than one holder is never changed
//! under their feet.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::clock::ClockTime;

/// Sentinel for an unset byte/sample offset.
pub const OFFSET_NONE: u64 = u64::MAX;

/// Flags describing a buffer's position in the stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Data is not contiguous with the previous buffer (after a seek or a drop).
    pub const DISCONT: Self = Self(1 << 0);
    /// Last buffer of the stream.
    pub const EOS: Self = Self(1 << 1);
    /// Buffer cannot be decoded on its own (not a keyframe).
    pub const DELTA_UNIT: Self = Self(1 << 2);
    /// Buffer carries no meaningful data, only a time slot.
    pub const GAP: Self = Self(1 << 3);

    /// Check if a flag is set.
    #[inline]
    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0 && flag.0 != 0
    }

    /// Set a flag.
    #[inline]
    pub const fn insert(self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }

    /// Clear a flag.
    #[inline]
    pub const fn remove(self, flag: Self) -> Self {
        Self(self.0 & !flag.0)
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Backing memory of a buffer.
#[derive(Clone, Debug)]
enum Memory {
    /// Memory allocated and owned by the buffer.
    Owned(BytesMut),
    /// A read-only view into memory owned by someone else.
    External(Bytes),
}

impl Memory {
    fn as_slice(&self) -> &[u8] {
        match self {
            Memory::Owned(b) => b,
            Memory::External(b) => b,
        }
    }

    fn truncate(&mut self, len: usize) {
        match self {
            Memory::Owned(b) => b.truncate(len),
            Memory::External(b) => b.truncate(len),
        }
    }
}

#[derive(Clone, Debug)]
struct BufferInner {
    memory: Memory,
    pts: ClockTime,
    duration: ClockTime,
    offset: u64,
    offset_end: u64,
    flags: BufferFlags,
}

/// A reference-counted chunk of media data plus timing metadata.
///
/// ```rust
/// use trellis::buffer::{Buffer, BufferFlags};
///
/// let mut a = Buffer::from_vec(vec![1, 2, 3]);
/// let b = a.clone();
/// assert_eq!(a.ref_count(), 2);
///
/// // Writing to a shared buffer copies it first.
/// a.data_mut()[0] = 9;
/// a.set_flags(BufferFlags::DISCONT);
/// assert_eq!(a.data(), &[9, 2, 3]);
/// assert_eq!(b.data(), &[1, 2, 3]);
/// assert!(!b.flags().contains(BufferFlags::DISCONT));
/// ```
#[derive(Clone)]
pub struct Buffer(Arc<BufferInner>);

impl Buffer {
    fn with_memory(memory: Memory) -> Self {
        Self(Arc::new(BufferInner {
            memory,
            pts: ClockTime::NONE,
            duration: ClockTime::NONE,
            offset: OFFSET_NONE,
            offset_end: OFFSET_NONE,
            flags: BufferFlags::NONE,
        }))
    }

    /// Allocate a zero-filled buffer of `size` bytes.
    pub fn with_size(size: usize) -> Self {
        Self::with_memory(Memory::Owned(BytesMut::zeroed(size)))
    }

    /// Take ownership of a byte vector without copying it.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::with_memory(Memory::Owned(BytesMut::from(Bytes::from(data))))
    }

    /// Copy a slice into a new buffer.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::with_memory(Memory::Owned(BytesMut::from(data)))
    }

    /// Wrap memory owned by someone else.
    ///
    /// The owner is dropped once the last buffer (and any copy-free slice of
    /// it) referencing it is gone.
    pub fn from_external<T>(owner: T) -> Self
    where
        T: AsRef<[u8]> + Send + 'static,
    {
        Self::with_memory(Memory::External(Bytes::from_owner(owner)))
    }

    /// Wrap an existing [`Bytes`] without copying.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::with_memory(Memory::External(bytes))
    }

    /// Read access to the data.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.0.memory.as_slice()
    }

    /// Size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Whether the buffer holds no data.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live handles to this buffer.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// A buffer is writable when this is its only handle.
    #[inline]
    pub fn is_writable(&self) -> bool {
        Arc::strong_count(&self.0) == 1
    }

    /// Whether two handles refer to the same buffer.
    #[inline]
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Presentation timestamp.
    #[inline]
    pub fn pts(&self) -> ClockTime {
        self.0.pts
    }

    /// Duration.
    #[inline]
    pub fn duration(&self) -> ClockTime {
        self.0.duration
    }

    /// Media offset of the first byte/sample, or [`OFFSET_NONE`].
    #[inline]
    pub fn offset(&self) -> u64 {
        self.0.offset
    }

    /// Media offset one past the last byte/sample, or [`OFFSET_NONE`].
    #[inline]
    pub fn offset_end(&self) -> u64 {
        self.0.offset_end
    }

    /// Stream flags.
    #[inline]
    pub fn flags(&self) -> BufferFlags {
        self.0.flags
    }

    fn inner_mut(&mut self) -> &mut BufferInner {
        Arc::make_mut(&mut self.0)
    }

    /// Set the presentation timestamp (copies the buffer if shared).
    pub fn set_pts(&mut self, pts: ClockTime) {
        self.inner_mut().pts = pts;
    }

    /// Set the duration (copies the buffer if shared).
    pub fn set_duration(&mut self, duration: ClockTime) {
        self.inner_mut().duration = duration;
    }

    /// Set the start and end offsets (copies the buffer if shared).
    pub fn set_offsets(&mut self, offset: u64, offset_end: u64) {
        let inner = self.inner_mut();
        inner.offset = offset;
        inner.offset_end = offset_end;
    }

    /// Add flags (copies the buffer if shared).
    pub fn set_flags(&mut self, flags: BufferFlags) {
        let inner = self.inner_mut();
        inner.flags = inner.flags.insert(flags);
    }

    /// Clear flags (copies the buffer if shared).
    pub fn unset_flags(&mut self, flags: BufferFlags) {
        let inner = self.inner_mut();
        inner.flags = inner.flags.remove(flags);
    }

    /// Mutable access to the data.
    ///
    /// A shared buffer is copied first; external memory is copied into an
    /// owned allocation since it is read-only.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let inner = self.inner_mut();
        if let Memory::External(bytes) = &inner.memory {
            inner.memory = Memory::Owned(BytesMut::from(&bytes[..]));
        }
        match &mut inner.memory {
            Memory::Owned(b) => &mut b[..],
            Memory::External(_) => &mut [],
        }
    }

    /// Shorten the buffer to `len` bytes. No-op when already shorter.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.inner_mut().memory.truncate(len);
        }
    }

    /// Create an independent deep copy.
    pub fn copy_deep(&self) -> Buffer {
        let mut copy = (*self.0).clone();
        copy.memory = Memory::Owned(BytesMut::from(self.data()));
        Buffer(Arc::new(copy))
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("pts", &self.0.pts)
            .field("duration", &self.0.duration)
            .field("offset", &self.0.offset)
            .field("flags", &self.0.flags)
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked {
        data: Vec<u8>,
        drops: Arc<AtomicUsize>,
    }

    impl AsRef<[u8]> for Tracked {
        fn as_ref(&self) -> &[u8] {
            &self.data
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_metadata_defaults() {
        let buf = Buffer::with_size(16);
        assert_eq!(buf.len(), 16);
        assert!(buf.pts().is_none());
        assert_eq!(buf.offset(), OFFSET_NONE);
        assert_eq!(buf.flags(), BufferFlags::NONE);
    }

    #[test]
    fn test_copy_on_write_metadata() {
        let mut a = Buffer::from_slice(b"abc");
        let b = a.clone();
        a.set_pts(ClockTime::from_millis(10));
        assert_eq!(a.pts(), ClockTime::from_millis(10));
        assert!(b.pts().is_none());
        assert!(!a.ptr_eq(&b));
        assert!(a.is_writable());
    }

    #[test]
    fn test_writable_buffer_is_not_copied() {
        let mut a = Buffer::from_slice(b"abc");
        let before = a.data().as_ptr();
        a.data_mut()[1] = b'X';
        assert_eq!(a.data().as_ptr(), before);
        assert_eq!(a.data(), b"aXc");
    }

    #[test]
    fn test_from_vec_keeps_allocation() {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(b"payload");
        let allocation = data.as_ptr();
        let mut buffer = Buffer::from_vec(data);
        assert_eq!(buffer.data().as_ptr(), allocation);
        assert_eq!(buffer.data(), b"payload");
        buffer.data_mut()[0] = b'P';
        assert_eq!(buffer.data().as_ptr(), allocation);

        let exact = vec![7u8; 32];
        let allocation = exact.as_ptr();
        assert_eq!(Buffer::from_vec(exact).data().as_ptr(), allocation);
    }

    #[test]
    fn test_external_memory_released_with_last_ref() {
        let drops = Arc::new(AtomicUsize::new(0));
        let buf = Buffer::from_external(Tracked {
            data: vec![7; 8],
            drops: drops.clone(),
        });
        let other = buf.clone();
        drop(buf);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(other.data(), &[7; 8]);
        drop(other);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_holders_release_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let buf = Buffer::from_external(Tracked {
            data: vec![3; 64],
            drops: drops.clone(),
        });
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let held = buf.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let extra = held.clone();
                        assert_eq!(extra.data()[63], 3);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(buf.ref_count(), 1);
        drop(buf);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_external_memory_write_copies() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut buf = Buffer::from_external(Tracked {
            data: vec![1, 2],
            drops: drops.clone(),
        });
        buf.data_mut()[0] = 5;
        assert_eq!(buf.data(), &[5, 2]);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_truncate_and_flags() {
        let mut buf = Buffer::from_vec(vec![0; 10]);
        buf.truncate(4);
        assert_eq!(buf.len(), 4);
        buf.truncate(8);
        assert_eq!(buf.len(), 4);

        buf.set_flags(BufferFlags::DISCONT.insert(BufferFlags::GAP));
        assert!(buf.flags().contains(BufferFlags::GAP));
        buf.unset_flags(BufferFlags::GAP);
        assert!(!buf.flags().contains(BufferFlags::GAP));
        assert!(buf.flags().contains(BufferFlags::DISCONT));
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let mut a = Buffer::from_slice(b"xy");
        a.set_offsets(0, 2);
        let b = a.copy_deep();
        assert_eq!(b.offset_end(), 2);
        assert_eq!(a.ref_count(), 1);
        assert_eq!(b.data(), b"xy");
    }
}
