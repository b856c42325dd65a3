// SPDX-License-Identifier: Apache-2.0 OR MIT
// Argument codec: typed encode on the producer, descriptor-driven decode on
// the backend. Encode and decode walk identical types in identical order;
// the call-site descriptor is the only schema.

use std::ffi::{CStr, CString};
use std::fmt::{self, Write as _};
use thiserror::Error;

/// Maximum number of arguments a single statement may carry.
pub const MAX_ARGS: usize = 10;

/// Every supported argument encodes with alignment at most 8, which is what
/// lets a record's argument offsets be computed exactly in advance from an
/// 8-aligned region start.
pub const MAX_ARG_ALIGN: usize = 8;

#[inline]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Decode failure. Any of these on the backend means the producer and the
/// descriptor disagree about the byte layout, which would misalign every
/// following record; the backend treats it as fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("encoded record ended before all arguments were read")]
    Truncated,
    #[error("string argument is missing its zero terminator")]
    MissingTerminator,
    #[error("encoded char is not a valid scalar value")]
    InvalidChar,
    #[error("format string does not match the argument tuple")]
    FormatMismatch,
}

/// Scratch array carrying C-string lengths (terminator included) from the
/// size pass to the encode pass, so the bytes are measured exactly once.
/// Indexed by C-string position among the arguments.
pub struct CStrScratch {
    sizes: [usize; MAX_ARGS],
    cursor: usize,
}

impl CStrScratch {
    #[inline]
    pub fn new() -> Self {
        Self {
            sizes: [0; MAX_ARGS],
            cursor: 0,
        }
    }

    /// Size pass: remember the measured length of the next C string.
    #[inline]
    pub fn record(&mut self, len: usize) {
        self.sizes[self.cursor] = len;
        self.cursor += 1;
    }

    /// Switch from the size pass to the encode pass.
    #[inline]
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Encode pass: the length recorded for the next C string.
    #[inline]
    pub fn take(&mut self) -> usize {
        let len = self.sizes[self.cursor];
        self.cursor += 1;
        len
    }
}

impl Default for CStrScratch {
    fn default() -> Self {
        Self::new()
    }
}

/// A single argument read back out of a record.
pub enum DecodedValue<'a> {
    Bool(bool),
    Char(char),
    Int(i128),
    F32(f32),
    F64(f64),
    Str(&'a str),
    Owned(String),
}

impl fmt::Display for DecodedValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Bool(v) => v.fmt(f),
            DecodedValue::Char(v) => v.fmt(f),
            DecodedValue::Int(v) => v.fmt(f),
            DecodedValue::F32(v) => v.fmt(f),
            DecodedValue::F64(v) => v.fmt(f),
            DecodedValue::Str(v) => f.write_str(v),
            DecodedValue::Owned(v) => f.write_str(v),
        }
    }
}

/// Result of decoding one record's arguments: the rendered message and the
/// exact number of argument bytes consumed.
#[derive(Debug)]
pub struct Decoded {
    pub text: String,
    pub consumed: usize,
}

/// The monomorphized decoder stored in every call-site descriptor.
pub type DecodeFn = fn(&'static str, &[u8]) -> Result<Decoded, DecodeError>;

/// A value that can be laid into a record's byte region and read back by
/// the backend.
///
/// `encode` consumes the value: owned arguments move into the buffer and
/// ownership transfers through the byte stream to the backend, which drops
/// them after formatting.
pub trait Loggable {
    /// Required placement alignment of the encoded form (at most
    /// [`MAX_ARG_ALIGN`]).
    const ALIGN: usize;

    /// Exact encoded byte count for this value. C strings record their
    /// measured length in `scratch`; the encode pass reads it back instead
    /// of measuring twice.
    fn encoded_size(&self, scratch: &mut CStrScratch) -> usize;

    /// Write the encoded form and return the bytes written, which must
    /// equal `encoded_size` for the same value.
    ///
    /// # Safety
    /// `out` must point to at least `encoded_size` writable bytes aligned
    /// to `Self::ALIGN`, and `scratch` must hold the sizes recorded by the
    /// size pass over the same values in the same order.
    unsafe fn encode(self, out: *mut u8, scratch: &mut CStrScratch) -> usize;

    /// Read one value back. `bytes` starts at the value's aligned offset.
    /// Returns the value and the bytes consumed.
    fn decode(bytes: &[u8]) -> Result<(DecodedValue<'_>, usize), DecodeError>
    where
        Self: Sized;
}

macro_rules! impl_loggable_int {
    ($($ty:ty),* $(,)?) => {$(
        impl Loggable for $ty {
            const ALIGN: usize = std::mem::align_of::<$ty>();

            #[inline]
            fn encoded_size(&self, _scratch: &mut CStrScratch) -> usize {
                std::mem::size_of::<$ty>()
            }

            #[inline]
            unsafe fn encode(self, out: *mut u8, _scratch: &mut CStrScratch) -> usize {
                std::ptr::write(out.cast::<$ty>(), self);
                std::mem::size_of::<$ty>()
            }

            #[inline]
            fn decode(bytes: &[u8]) -> Result<(DecodedValue<'_>, usize), DecodeError> {
                let size = std::mem::size_of::<$ty>();
                if bytes.len() < size {
                    return Err(DecodeError::Truncated);
                }
                debug_assert_eq!(bytes.as_ptr() as usize % Self::ALIGN, 0);
                // SAFETY: length checked above; the record layout placed
                // this value at an address aligned to Self::ALIGN.
                let value = unsafe { std::ptr::read(bytes.as_ptr().cast::<$ty>()) };
                Ok((DecodedValue::Int(value as i128), size))
            }
        }
    )*};
}

impl_loggable_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_loggable_float {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl Loggable for $ty {
            const ALIGN: usize = std::mem::align_of::<$ty>();

            #[inline]
            fn encoded_size(&self, _scratch: &mut CStrScratch) -> usize {
                std::mem::size_of::<$ty>()
            }

            #[inline]
            unsafe fn encode(self, out: *mut u8, _scratch: &mut CStrScratch) -> usize {
                std::ptr::write(out.cast::<$ty>(), self);
                std::mem::size_of::<$ty>()
            }

            #[inline]
            fn decode(bytes: &[u8]) -> Result<(DecodedValue<'_>, usize), DecodeError> {
                let size = std::mem::size_of::<$ty>();
                if bytes.len() < size {
                    return Err(DecodeError::Truncated);
                }
                debug_assert_eq!(bytes.as_ptr() as usize % Self::ALIGN, 0);
                // SAFETY: length checked above; placement is aligned.
                let value = unsafe { std::ptr::read(bytes.as_ptr().cast::<$ty>()) };
                Ok((DecodedValue::$variant(value), size))
            }
        }
    )*};
}

impl_loggable_float!(f32 => F32, f64 => F64);

impl Loggable for bool {
    const ALIGN: usize = 1;

    #[inline]
    fn encoded_size(&self, _scratch: &mut CStrScratch) -> usize {
        1
    }

    #[inline]
    unsafe fn encode(self, out: *mut u8, _scratch: &mut CStrScratch) -> usize {
        *out = self as u8;
        1
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Result<(DecodedValue<'_>, usize), DecodeError> {
        let byte = *bytes.first().ok_or(DecodeError::Truncated)?;
        Ok((DecodedValue::Bool(byte != 0), 1))
    }
}

impl Loggable for char {
    const ALIGN: usize = std::mem::align_of::<u32>();

    #[inline]
    fn encoded_size(&self, _scratch: &mut CStrScratch) -> usize {
        std::mem::size_of::<u32>()
    }

    #[inline]
    unsafe fn encode(self, out: *mut u8, _scratch: &mut CStrScratch) -> usize {
        std::ptr::write(out.cast::<u32>(), self as u32);
        std::mem::size_of::<u32>()
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Result<(DecodedValue<'_>, usize), DecodeError> {
        let size = std::mem::size_of::<u32>();
        if bytes.len() < size {
            return Err(DecodeError::Truncated);
        }
        debug_assert_eq!(bytes.as_ptr() as usize % Self::ALIGN, 0);
        // SAFETY: length checked above; placement is aligned.
        let raw = unsafe { std::ptr::read(bytes.as_ptr().cast::<u32>()) };
        let value = char::from_u32(raw).ok_or(DecodeError::InvalidChar)?;
        Ok((DecodedValue::Char(value), size))
    }
}

/// Shared decode for every zero-terminated string form. Reads up to the
/// first zero; content that is not UTF-8 (possible through `CStr`) is
/// rendered lossily rather than rejected.
fn decode_zero_terminated(bytes: &[u8]) -> Result<(DecodedValue<'_>, usize), DecodeError> {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::MissingTerminator)?;
    let value = match std::str::from_utf8(&bytes[..end]) {
        Ok(text) => DecodedValue::Str(text),
        Err(_) => DecodedValue::Owned(String::from_utf8_lossy(&bytes[..end]).into_owned()),
    };
    Ok((value, end + 1))
}

impl Loggable for &str {
    const ALIGN: usize = 1;

    #[inline]
    fn encoded_size(&self, _scratch: &mut CStrScratch) -> usize {
        self.len() + 1
    }

    #[inline]
    unsafe fn encode(self, out: *mut u8, _scratch: &mut CStrScratch) -> usize {
        std::ptr::copy_nonoverlapping(self.as_ptr(), out, self.len());
        *out.add(self.len()) = 0;
        self.len() + 1
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Result<(DecodedValue<'_>, usize), DecodeError> {
        decode_zero_terminated(bytes)
    }
}

impl Loggable for String {
    const ALIGN: usize = 1;

    #[inline]
    fn encoded_size(&self, _scratch: &mut CStrScratch) -> usize {
        self.len() + 1
    }

    #[inline]
    unsafe fn encode(self, out: *mut u8, _scratch: &mut CStrScratch) -> usize {
        std::ptr::copy_nonoverlapping(self.as_ptr(), out, self.len());
        *out.add(self.len()) = 0;
        self.len() + 1
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Result<(DecodedValue<'_>, usize), DecodeError> {
        decode_zero_terminated(bytes)
    }
}

impl Loggable for &CStr {
    const ALIGN: usize = 1;

    #[inline]
    fn encoded_size(&self, scratch: &mut CStrScratch) -> usize {
        let len = self.to_bytes_with_nul().len();
        scratch.record(len);
        len
    }

    #[inline]
    unsafe fn encode(self, out: *mut u8, scratch: &mut CStrScratch) -> usize {
        // Length (terminator included) was measured by the size pass.
        let len = scratch.take();
        std::ptr::copy_nonoverlapping(self.as_ptr().cast::<u8>(), out, len);
        len
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Result<(DecodedValue<'_>, usize), DecodeError> {
        decode_zero_terminated(bytes)
    }
}

impl Loggable for CString {
    const ALIGN: usize = 1;

    #[inline]
    fn encoded_size(&self, scratch: &mut CStrScratch) -> usize {
        let len = self.as_bytes_with_nul().len();
        scratch.record(len);
        len
    }

    #[inline]
    unsafe fn encode(self, out: *mut u8, scratch: &mut CStrScratch) -> usize {
        let len = scratch.take();
        std::ptr::copy_nonoverlapping(self.as_ptr().cast::<u8>(), out, len);
        len
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Result<(DecodedValue<'_>, usize), DecodeError> {
        decode_zero_terminated(bytes)
    }
}

/// Wrapper that moves an arbitrary `Display` value into the record instead
/// of rendering it on the hot path. The value is placement-moved into the
/// queue bytes, read back by the backend, rendered, and dropped there —
/// exactly one drop per record, after formatting.
///
/// The value's alignment must not exceed [`MAX_ARG_ALIGN`]; that is checked
/// at compile time per instantiated type.
pub struct Deferred<T>(pub T);

impl<T: fmt::Display + Send + 'static> Loggable for Deferred<T> {
    const ALIGN: usize = {
        assert!(std::mem::align_of::<T>() <= MAX_ARG_ALIGN);
        std::mem::align_of::<T>()
    };

    #[inline]
    fn encoded_size(&self, _scratch: &mut CStrScratch) -> usize {
        std::mem::size_of::<T>()
    }

    #[inline]
    unsafe fn encode(self, out: *mut u8, _scratch: &mut CStrScratch) -> usize {
        std::ptr::write(out.cast::<T>(), self.0);
        std::mem::size_of::<T>()
    }

    fn decode(bytes: &[u8]) -> Result<(DecodedValue<'_>, usize), DecodeError> {
        let size = std::mem::size_of::<T>();
        if bytes.len() < size {
            return Err(DecodeError::Truncated);
        }
        debug_assert_eq!(bytes.as_ptr() as usize % Self::ALIGN, 0);
        // SAFETY: the producer placement-moved a valid `T` here and each
        // record is decoded exactly once, so reading takes ownership back.
        let value = unsafe { std::ptr::read(bytes.as_ptr().cast::<T>()) };
        let text = value.to_string();
        Ok((DecodedValue::Owned(text), size))
    }
}

/// The argument tuple of one logging statement. Implemented for tuples of
/// [`Loggable`] values up to [`MAX_ARGS`] elements; `Self::decode` is the
/// type-specialized decoder whose address goes into the call-site
/// descriptor.
pub trait ArgTuple {
    const COUNT: usize;

    /// Total encoded bytes including inter-argument padding, computed as if
    /// the region starts at an [`MAX_ARG_ALIGN`]-aligned address.
    fn encoded_size(&self, scratch: &mut CStrScratch) -> usize;

    /// Lay all arguments into `out` in declaration order.
    ///
    /// # Safety
    /// `out` must point to at least `encoded_size` writable bytes aligned
    /// to [`MAX_ARG_ALIGN`]; `scratch` must have been filled by
    /// `encoded_size` over the same values and rewound.
    unsafe fn encode(self, out: *mut u8, scratch: &mut CStrScratch) -> usize;

    /// Walk `bytes`, rebuild each argument, and render `format`.
    fn decode(format: &'static str, bytes: &[u8]) -> Result<Decoded, DecodeError>;
}

impl ArgTuple for () {
    const COUNT: usize = 0;

    #[inline]
    fn encoded_size(&self, _scratch: &mut CStrScratch) -> usize {
        0
    }

    #[inline]
    unsafe fn encode(self, _out: *mut u8, _scratch: &mut CStrScratch) -> usize {
        0
    }

    fn decode(format: &'static str, _bytes: &[u8]) -> Result<Decoded, DecodeError> {
        let text = render(format, &[])?;
        Ok(Decoded { text, consumed: 0 })
    }
}

macro_rules! impl_arg_tuple {
    ($(($ty:ident, $var:ident, $idx:tt)),+) => {
        impl<$($ty: Loggable),+> ArgTuple for ($($ty,)+) {
            const COUNT: usize = [$(stringify!($ty)),+].len();

            fn encoded_size(&self, scratch: &mut CStrScratch) -> usize {
                let mut offset = 0usize;
                $(
                    offset = align_up(offset, <$ty as Loggable>::ALIGN);
                    offset += self.$idx.encoded_size(scratch);
                )+
                offset
            }

            unsafe fn encode(self, out: *mut u8, scratch: &mut CStrScratch) -> usize {
                let ($($var,)+) = self;
                let mut offset = 0usize;
                $(
                    offset = align_up(offset, <$ty as Loggable>::ALIGN);
                    offset += $var.encode(out.add(offset), scratch);
                )+
                offset
            }

            fn decode(format: &'static str, bytes: &[u8]) -> Result<Decoded, DecodeError> {
                let mut offset = 0usize;
                let mut values = Vec::with_capacity(Self::COUNT);
                $(
                    offset = align_up(offset, <$ty as Loggable>::ALIGN);
                    let tail = bytes.get(offset..).ok_or(DecodeError::Truncated)?;
                    let (value, used) = <$ty as Loggable>::decode(tail)?;
                    values.push(value);
                    offset += used;
                )+
                let text = render(format, &values)?;
                Ok(Decoded { text, consumed: offset })
            }
        }
    };
}

impl_arg_tuple!((A, a, 0));
impl_arg_tuple!((A, a, 0), (B, b, 1));
impl_arg_tuple!((A, a, 0), (B, b, 1), (C, c, 2));
impl_arg_tuple!((A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3));
impl_arg_tuple!((A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4));
impl_arg_tuple!((A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4), (F, f, 5));
impl_arg_tuple!(
    (A, a, 0),
    (B, b, 1),
    (C, c, 2),
    (D, d, 3),
    (E, e, 4),
    (F, f, 5),
    (G, g, 6)
);
impl_arg_tuple!(
    (A, a, 0),
    (B, b, 1),
    (C, c, 2),
    (D, d, 3),
    (E, e, 4),
    (F, f, 5),
    (G, g, 6),
    (H, h, 7)
);
impl_arg_tuple!(
    (A, a, 0),
    (B, b, 1),
    (C, c, 2),
    (D, d, 3),
    (E, e, 4),
    (F, f, 5),
    (G, g, 6),
    (H, h, 7),
    (I, i, 8)
);
impl_arg_tuple!(
    (A, a, 0),
    (B, b, 1),
    (C, c, 2),
    (D, d, 3),
    (E, e, 4),
    (F, f, 5),
    (G, g, 6),
    (H, h, 7),
    (I, i, 8),
    (J, j, 9)
);

/// Substitute `{}` placeholders with the decoded values. Supports `{{` and
/// `}}` escapes; the statement macros validate the format string at compile
/// time, so a mismatch here means a hand-built descriptor lied.
fn render(format: &str, values: &[DecodedValue<'_>]) -> Result<String, DecodeError> {
    let mut out = String::with_capacity(format.len() + values.len() * 8);
    let mut next = 0usize;
    let mut chars = format.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    out.push('{');
                } else if chars.peek() == Some(&'}') {
                    chars.next();
                    let value = values.get(next).ok_or(DecodeError::FormatMismatch)?;
                    write!(out, "{value}").map_err(|_| DecodeError::FormatMismatch)?;
                    next += 1;
                } else {
                    return Err(DecodeError::FormatMismatch);
                }
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(DecodeError::FormatMismatch);
                }
            }
            other => out.push(other),
        }
    }
    if next != values.len() {
        return Err(DecodeError::FormatMismatch);
    }
    Ok(out)
}

/// Compile-time check: only `{}` placeholders and `{{`/`}}` escapes.
#[doc(hidden)]
pub const fn format_is_valid(format: &str) -> bool {
    let bytes = format.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => {
                if i + 1 < bytes.len() && (bytes[i + 1] == b'{' || bytes[i + 1] == b'}') {
                    i += 2;
                } else {
                    return false;
                }
            }
            b'}' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'}' {
                    i += 2;
                } else {
                    return false;
                }
            }
            _ => i += 1,
        }
    }
    true
}

/// Compile-time count of `{}` placeholders.
#[doc(hidden)]
pub const fn placeholder_count(format: &str) -> usize {
    let bytes = format.as_bytes();
    let mut i = 0;
    let mut count = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && i + 1 < bytes.len() {
            if bytes[i + 1] == b'}' {
                count += 1;
            }
            i += 2;
        } else if bytes[i] == b'}' && i + 1 < bytes.len() && bytes[i + 1] == b'}' {
            i += 2;
        } else {
            i += 1;
        }
    }
    count
}

/// Compile-time check used by the statement macros: the format string is
/// well formed and its placeholder count equals the argument count.
#[doc(hidden)]
pub const fn format_matches(format: &str, args: usize) -> bool {
    format_is_valid(format) && placeholder_count(format) == args
}
