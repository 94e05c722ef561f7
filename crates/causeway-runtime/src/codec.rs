//! Streaming wire codec
//!
//! Deterministic big-endian encoding for every value type crossing the
//! boundary, and the composition of the codec with the native allocator:
//! - `BufferReader` / `BufferWriter`: position-tracked streams over a
//!   native buffer's bytes
//! - `WireCodec`: the per-type read/write/allocation-size unit, resolved
//!   statically
//! - `lower_into_buffer` / `lift_from_buffer`: alloc+write and read+free,
//!   with the full-consumption assertion on the lift path
//!
//! Wire format:
//! - Integers: big-endian at declared width; signed is the
//!   two's-complement reinterpretation of unsigned
//! - Floats: IEEE-754 bit pattern through the integer codec of matching
//!   width
//! - Bool: one byte, 0 or 1; anything else is a protocol violation
//! - String: i32 byte-length prefix + UTF-8 bytes
//! - Option<T>: u8 presence tag (0/1) + payload
//! - Vec<T>: i32 count prefix + elements

use crate::abi::NativeBuffer;
use crate::buffer::{BufferAllocator, BufferGuard};
use crate::error::BridgeError;

/// Position-tracked reader over a buffer's valid bytes.
pub struct BufferReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BufferReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Consume exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], BridgeError> {
        if n > self.remaining() {
            return Err(BridgeError::StreamUnderflow {
                requested: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

/// Position-tracked writer into a native buffer's capacity.
///
/// Starts at offset zero and keeps the buffer's `len` field current. An
/// append past `capacity` means the allocation-size estimate
/// under-estimated, which is a correctness bug; it is reported as a
/// protocol violation rather than writing out of bounds.
pub struct BufferWriter<'a> {
    buf: &'a mut NativeBuffer,
}

impl<'a> BufferWriter<'a> {
    pub fn new(buf: &'a mut NativeBuffer) -> Self {
        buf.len = 0;
        Self { buf }
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.buf.len as usize
    }

    /// Append `bytes`, growing the buffer's `len`.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BridgeError> {
        let start = self.buf.len as usize;
        let end = start + bytes.len();
        if end > self.buf.capacity as usize {
            return Err(BridgeError::protocol(format!(
                "encode overflow: {} bytes into a {}-byte buffer (allocation size under-estimated)",
                end, self.buf.capacity
            )));
        }
        self.buf.as_capacity_slice_mut()[start..end].copy_from_slice(bytes);
        self.buf.len = end as i32;
        Ok(())
    }
}

/// The statically resolvable codec unit for one value type.
///
/// Defines the bijection between the type and its streamed byte form,
/// plus the upper-bound size estimate used to allocate a buffer before
/// writing. `allocation_size` must never under-estimate what `write`
/// produces; over-estimation is acceptable.
pub trait WireCodec: Sized {
    /// Upper bound on the bytes `write` will produce for this value.
    fn allocation_size(&self) -> usize;

    /// Append this value's encoded form to the stream.
    fn write(&self, writer: &mut BufferWriter<'_>) -> Result<(), BridgeError>;

    /// Decode one value from the stream, consuming exactly its bytes.
    fn read(reader: &mut BufferReader<'_>) -> Result<Self, BridgeError>;
}

macro_rules! integer_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireCodec for $ty {
                fn allocation_size(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }

                fn write(&self, writer: &mut BufferWriter<'_>) -> Result<(), BridgeError> {
                    writer.write_bytes(&self.to_be_bytes())
                }

                fn read(reader: &mut BufferReader<'_>) -> Result<Self, BridgeError> {
                    let bytes = reader.read_bytes(std::mem::size_of::<$ty>())?;
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    Ok(<$ty>::from_be_bytes(raw))
                }
            }
        )*
    };
}

integer_codec!(u8, i8, u16, i16, u32, i32, u64, i64);

impl WireCodec for f32 {
    fn allocation_size(&self) -> usize {
        4
    }

    fn write(&self, writer: &mut BufferWriter<'_>) -> Result<(), BridgeError> {
        self.to_bits().write(writer)
    }

    fn read(reader: &mut BufferReader<'_>) -> Result<Self, BridgeError> {
        Ok(f32::from_bits(u32::read(reader)?))
    }
}

impl WireCodec for f64 {
    fn allocation_size(&self) -> usize {
        8
    }

    fn write(&self, writer: &mut BufferWriter<'_>) -> Result<(), BridgeError> {
        self.to_bits().write(writer)
    }

    fn read(reader: &mut BufferReader<'_>) -> Result<Self, BridgeError> {
        Ok(f64::from_bits(u64::read(reader)?))
    }
}

impl WireCodec for bool {
    fn allocation_size(&self) -> usize {
        1
    }

    fn write(&self, writer: &mut BufferWriter<'_>) -> Result<(), BridgeError> {
        writer.write_bytes(&[u8::from(*self)])
    }

    fn read(reader: &mut BufferReader<'_>) -> Result<Self, BridgeError> {
        match u8::read(reader)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(BridgeError::protocol(format!(
                "invalid boolean byte {other:#04x}"
            ))),
        }
    }
}

impl WireCodec for String {
    fn allocation_size(&self) -> usize {
        // The byte length is exact in Rust; 4 for the length prefix.
        4 + self.len()
    }

    fn write(&self, writer: &mut BufferWriter<'_>) -> Result<(), BridgeError> {
        let len = i32::try_from(self.len())
            .map_err(|_| BridgeError::protocol(format!("string of {} bytes exceeds i32", self.len())))?;
        len.write(writer)?;
        writer.write_bytes(self.as_bytes())
    }

    fn read(reader: &mut BufferReader<'_>) -> Result<Self, BridgeError> {
        let len = i32::read(reader)?;
        if len < 0 {
            return Err(BridgeError::protocol(format!(
                "negative string length prefix {len}"
            )));
        }
        let bytes = reader.read_bytes(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| BridgeError::protocol(format!("string is not valid UTF-8: {e}")))
    }
}

impl<T: WireCodec> WireCodec for Option<T> {
    fn allocation_size(&self) -> usize {
        match self {
            Some(value) => 1 + value.allocation_size(),
            None => 1,
        }
    }

    fn write(&self, writer: &mut BufferWriter<'_>) -> Result<(), BridgeError> {
        match self {
            Some(value) => {
                writer.write_bytes(&[1])?;
                value.write(writer)
            }
            None => writer.write_bytes(&[0]),
        }
    }

    fn read(reader: &mut BufferReader<'_>) -> Result<Self, BridgeError> {
        match u8::read(reader)? {
            0 => Ok(None),
            1 => Ok(Some(T::read(reader)?)),
            other => Err(BridgeError::protocol(format!(
                "invalid option tag {other:#04x}"
            ))),
        }
    }
}

impl<T: WireCodec> WireCodec for Vec<T> {
    fn allocation_size(&self) -> usize {
        4 + self.iter().map(WireCodec::allocation_size).sum::<usize>()
    }

    fn write(&self, writer: &mut BufferWriter<'_>) -> Result<(), BridgeError> {
        let count = i32::try_from(self.len())
            .map_err(|_| BridgeError::protocol(format!("sequence of {} elements exceeds i32", self.len())))?;
        count.write(writer)?;
        for item in self {
            item.write(writer)?;
        }
        Ok(())
    }

    fn read(reader: &mut BufferReader<'_>) -> Result<Self, BridgeError> {
        let count = i32::read(reader)?;
        if count < 0 {
            return Err(BridgeError::protocol(format!(
                "negative sequence count prefix {count}"
            )));
        }
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(T::read(reader)?);
        }
        Ok(items)
    }
}

/// Allocate a native buffer sized by `allocation_size` and encode `value`
/// into it. On failure the buffer is freed before returning; on success
/// ownership of the buffer transfers to the caller.
pub fn lower_into_buffer<T: WireCodec>(
    value: &T,
    allocator: &BufferAllocator,
) -> Result<NativeBuffer, BridgeError> {
    let size = value.allocation_size();
    let size = i32::try_from(size)
        .map_err(|_| BridgeError::protocol(format!("allocation size {size} exceeds i32")))?;
    let buf = allocator.alloc(size)?;
    let mut guard = BufferGuard::new(buf, allocator);
    let mut writer = BufferWriter::new(guard.buffer_mut());
    value.write(&mut writer)?;
    Ok(guard.into_inner())
}

/// Encode a value's streamed form into managed memory, for staging a
/// result before it is copied into a native buffer (the callback reply
/// path). No native allocation is touched.
pub fn encode_to_vec<T: WireCodec>(value: &T) -> Result<Vec<u8>, BridgeError> {
    let size = value.allocation_size();
    let capacity = i32::try_from(size)
        .map_err(|_| BridgeError::protocol(format!("allocation size {size} exceeds i32")))?;
    let mut backing = vec![0u8; size];
    let mut staged = NativeBuffer {
        capacity,
        len: 0,
        data: backing.as_mut_ptr(),
    };
    let mut writer = BufferWriter::new(&mut staged);
    value.write(&mut writer)?;
    let written = writer.written();
    backing.truncate(written);
    Ok(backing)
}

/// Decode one value from a native buffer, then free the buffer. The
/// buffer is freed on every path; leftover bytes after the decode are an
/// internal contract violation, never silently ignored.
pub fn lift_from_buffer<T: WireCodec>(
    buf: NativeBuffer,
    allocator: &BufferAllocator,
) -> Result<T, BridgeError> {
    let guard = BufferGuard::new(buf, allocator);
    let mut reader = BufferReader::new(guard.as_slice());
    let value = T::read(&mut reader)?;
    if reader.remaining() != 0 {
        return Err(BridgeError::protocol(format!(
            "{} leftover bytes after decode",
            reader.remaining()
        )));
    }
    guard.free()?;
    Ok(value)
}
