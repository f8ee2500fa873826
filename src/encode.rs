//! The serialize engine.
//!
//! Serialization runs in two passes that visit items in identical order: the
//! size pass (which also captures conversion results in a [ConvQueue]) and
//! the write pass, which walks the layout with a mutable cursor over a
//! pre-sized buffer. The final cursor position must land exactly at the
//! computed size; anything short is an [Error::UnderWrite].

use crate::{
    layout::{
        max_unsigned, BytesCustom, BytesItem, Endianness, Item, Layout, NamedItem, NumCustom,
    },
    num,
    size::{self, ConvQueue},
    util::{check_bytes_equal, check_item_size, check_size, find_id_layout_pair},
    Error, Value,
};
use bytes::{Bytes, BytesMut};
use num_bigint::BigInt;

/// Serializes `data` under `layout` into a freshly allocated buffer of
/// exactly the computed size.
pub fn encode(layout: &Layout, data: &Value) -> Result<Bytes, Error> {
    layout.validate()?;
    let mut queue = ConvQueue::new();
    let total = size::data_layout(layout, data, &mut queue)?;
    let mut buf = BytesMut::zeroed(total);
    let written = write_full(layout, data, &mut buf, &mut queue)?;
    if written != total {
        return Err(Error::UnderWrite {
            expected: total,
            written,
        });
    }
    Ok(buf.freeze())
}

/// Serializes `data` under `layout` into the front of `buf`, returning the
/// number of bytes written. The buffer may be larger than required.
pub fn encode_into(layout: &Layout, data: &Value, buf: &mut [u8]) -> Result<usize, Error> {
    layout.validate()?;
    let mut queue = ConvQueue::new();
    let total = size::data_layout(layout, data, &mut queue)?;
    if buf.len() < total {
        return Err(Error::Truncated);
    }
    let written = write_full(layout, data, &mut buf[..total], &mut queue)?;
    if written != total {
        return Err(Error::UnderWrite {
            expected: total,
            written,
        });
    }
    Ok(total)
}

fn write_full(
    layout: &Layout,
    data: &Value,
    buf: &mut [u8],
    queue: &mut ConvQueue,
) -> Result<usize, Error> {
    let mut cursor = Cursor { buf, offset: 0 };
    write_layout(layout, data, &mut cursor, queue)?;
    Ok(cursor.offset)
}

/// A mutable write position inside a pre-sized buffer.
struct Cursor<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl Cursor<'_> {
    fn put_slice(&mut self, src: &[u8]) -> Result<(), Error> {
        let at = self.reserve(src.len())?;
        self.buf[at..at + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Advances past `len` bytes, returning their start offset so a length
    /// prefix can be patched in after its payload is written.
    fn reserve(&mut self, len: usize) -> Result<usize, Error> {
        let at = self.offset;
        if at + len > self.buf.len() {
            return Err(Error::Truncated);
        }
        self.offset = at + len;
        Ok(at)
    }

    fn put_int(
        &mut self,
        value: &BigInt,
        size: usize,
        endianness: Endianness,
        signed: bool,
    ) -> Result<(), Error> {
        let at = self.reserve(size)?;
        num::write_int(value, size, endianness, signed, &mut self.buf[at..at + size])
    }

    fn patch_uint(
        &mut self,
        at: usize,
        value: u64,
        size: usize,
        endianness: Endianness,
    ) -> Result<(), Error> {
        num::write_uint(value, size, endianness, &mut self.buf[at..at + size])
    }
}

fn write_layout(
    layout: &Layout,
    data: &Value,
    cursor: &mut Cursor<'_>,
    queue: &mut ConvQueue,
) -> Result<(), Error> {
    match layout {
        Layout::Item(item) => {
            let value = if item.is_omitted() { None } else { Some(data) };
            write_item(item, value, cursor, queue)
        }
        Layout::Struct(items) => write_struct(items, data, cursor, queue),
    }
}

fn write_struct(
    items: &[NamedItem],
    data: &Value,
    cursor: &mut Cursor<'_>,
    queue: &mut ConvQueue,
) -> Result<(), Error> {
    let fields = data
        .as_struct()
        .ok_or(Error::IncompleteData("expected a struct value"))?;
    for entry in items {
        let value = if entry.item.is_omitted() {
            None
        } else {
            Some(
                fields
                    .get(&entry.name)
                    .ok_or_else(|| Error::UnknownField(entry.name.clone()))?,
            )
        };
        write_item(&entry.item, value, cursor, queue).map_err(|err| err.named(&entry.name))?;
    }
    Ok(())
}

fn write_item(
    item: &Item,
    value: Option<&Value>,
    cursor: &mut Cursor<'_>,
    queue: &mut ConvQueue,
) -> Result<(), Error> {
    match item {
        Item::Uint(num) | Item::Int(num) => {
            let signed = matches!(item, Item::Int(_));
            let effective = match &num.custom {
                Some(NumCustom::Const(constant)) => {
                    if let Some(value) = value {
                        crate::util::check_num_equals(constant, value)?;
                    }
                    constant.clone()
                }
                Some(NumCustom::Fixed { from, to }) => {
                    if let Some(value) = value {
                        check_label(value, to)?;
                    }
                    from.clone()
                }
                Some(NumCustom::Conv(conv)) => {
                    let input = value.ok_or(Error::IncompleteData("missing value"))?;
                    (conv.from)(input.clone())?.to_bigint()?
                }
                None => value
                    .ok_or(Error::IncompleteData("missing value"))?
                    .to_bigint()?,
            };
            cursor.put_int(&effective, num.size, num.endianness, signed)
        }
        Item::Bytes(bytes) => write_bytes(bytes, value, cursor, queue),
        Item::Array(array) => {
            let elements = value
                .ok_or(Error::IncompleteData("missing value"))?
                .as_list()
                .ok_or(Error::IncompleteData("expected a list value"))?;
            if let Some(length) = array.length {
                check_size(length, elements.len())?;
            }
            if let Some(length_size) = array.length_size {
                if elements.len() as u128 > max_unsigned(length_size) {
                    return Err(Error::OutOfRange(format!(
                        "array length {} exceeds a {length_size}-byte prefix",
                        elements.len()
                    )));
                }
                let at = cursor.reserve(length_size)?;
                cursor.patch_uint(
                    at,
                    elements.len() as u64,
                    length_size,
                    array.length_endianness,
                )?;
            }
            for element in elements {
                write_layout(&array.layout, element, cursor, queue)?;
            }
            Ok(())
        }
        Item::Switch(switch) => {
            let data = value.ok_or(Error::IncompleteData("missing value"))?;
            let (id, branch) = find_id_layout_pair(switch, data)?;
            let at = cursor.reserve(switch.id_size)?;
            cursor.patch_uint(at, id.wire, switch.id_size, switch.id_endianness)?;
            // The discriminant stays a sibling of the branch's fields; the
            // branch is serialized against the same struct.
            write_struct(branch, data, cursor, queue)
        }
    }
}

fn write_bytes(
    bytes: &BytesItem,
    value: Option<&Value>,
    cursor: &mut Cursor<'_>,
    queue: &mut ConvQueue,
) -> Result<(), Error> {
    let prefix_at = match bytes.length_size {
        Some(length_size) => Some((cursor.reserve(length_size)?, length_size)),
        None => None,
    };
    let start = cursor.offset;

    match &bytes.custom {
        Some(BytesCustom::Const(constant)) => {
            if let Some(value) = value {
                let supplied = value
                    .as_bytes()
                    .ok_or(Error::IncompleteData("expected a bytes value"))?;
                check_bytes_equal(constant, None, supplied, None)?;
            }
            check_item_size(bytes.size, constant.len())?;
            cursor.put_slice(constant)?;
        }
        Some(BytesCustom::Fixed { to, .. }) => {
            if let Some(value) = value {
                check_label(value, to)?;
            }
            let wire = fixed_wire(bytes)?;
            check_item_size(bytes.size, wire.len())?;
            cursor.put_slice(&wire)?;
        }
        Some(BytesCustom::Conv(_)) => {
            // Replayed from the size pass; user conversions run exactly once.
            let converted = queue
                .pop_front()
                .ok_or(Error::IncompleteData("conversion cache exhausted"))?;
            match &bytes.layout {
                Some(nested) => {
                    write_layout(nested, &converted, cursor, queue)?;
                    check_item_size(bytes.size, cursor.offset - start)?;
                }
                None => {
                    let wire = converted
                        .as_bytes()
                        .ok_or(Error::IncompleteData("conversion produced a non-bytes value"))?;
                    check_item_size(bytes.size, wire.len())?;
                    cursor.put_slice(wire)?;
                }
            }
        }
        None => {
            let input = value.ok_or(Error::IncompleteData("missing value"))?;
            match &bytes.layout {
                Some(nested) => {
                    write_layout(nested, input, cursor, queue)?;
                    check_item_size(bytes.size, cursor.offset - start)?;
                }
                None => {
                    let wire = input
                        .as_bytes()
                        .ok_or(Error::IncompleteData("expected a bytes value"))?;
                    check_item_size(bytes.size, wire.len())?;
                    cursor.put_slice(wire)?;
                }
            }
        }
    }

    if let Some((at, length_size)) = prefix_at {
        let count = cursor.offset - start;
        if count as u128 > max_unsigned(length_size) {
            return Err(Error::OutOfRange(format!(
                "payload length {count} exceeds a {length_size}-byte prefix"
            )));
        }
        cursor.patch_uint(at, count as u64, length_size, bytes.length_endianness)?;
    }
    Ok(())
}

/// Compares a user-supplied value against a fixed conversion's decoded
/// label. Numbers compare by value, everything else strictly.
fn check_label(observed: &Value, expected: &Value) -> Result<(), Error> {
    let equal = match (observed.to_bigint(), expected.to_bigint()) {
        (Ok(a), Ok(b)) => a == b,
        _ => observed == expected,
    };
    if !equal {
        return Err(Error::ConstantMismatch(format!(
            "expected {expected:?}, got {observed:?}"
        )));
    }
    Ok(())
}

/// The wire bytes of a bytes item's fixed conversion.
///
/// With a nested layout the fixed object is serialized through it once and
/// memoized on the item; concurrent first calls produce identical bytes, so
/// the write-once cache is idempotent.
pub(crate) fn fixed_wire(bytes: &BytesItem) -> Result<Bytes, Error> {
    let Some(BytesCustom::Fixed { from, .. }) = &bytes.custom else {
        return Err(Error::MalformedLayout("not a fixed conversion"));
    };
    match &bytes.layout {
        Some(nested) => {
            if let Some(wire) = bytes.wire_cache.get() {
                return Ok(wire.clone());
            }
            let mut queue = ConvQueue::new();
            let total = size::data_layout(nested, from, &mut queue)?;
            let mut buf = BytesMut::zeroed(total);
            let written = write_full(nested, from, &mut buf, &mut queue)?;
            if written != total {
                return Err(Error::UnderWrite {
                    expected: total,
                    written,
                });
            }
            let wire = buf.freeze();
            let _ = bytes.wire_cache.set(wire.clone());
            Ok(wire)
        }
        None => from
            .as_bytes()
            .cloned()
            .ok_or(Error::MalformedLayout(
                "fixed bytes conversion requires a bytes wire value",
            )),
    }
}
