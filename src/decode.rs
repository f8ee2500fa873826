//! The deserialize engine.
//!
//! Reads are bounded by a chunk over the input buffer; nested layouts with a
//! known region size get an exact sub-chunk carved out and must consume it
//! fully. Untransformed bytes fields decode to zero-copy [Bytes] views over
//! the input.

use crate::{
    encode::fixed_wire,
    layout::{BytesCustom, BytesItem, Item, Layout, NamedItem, NumCustom},
    num,
    util::{check_bytes_equal, check_num_equals},
    Error, Value,
};
use bytes::Bytes;
use std::collections::BTreeMap;

/// Deserializes `bytes` under `layout`, requiring the whole buffer to be
/// consumed.
pub fn decode(layout: &Layout, bytes: Bytes) -> Result<Value, Error> {
    layout.validate()?;
    let mut chunk = Chunk::new(bytes);
    let value = read_layout(layout, &mut chunk)?;
    if chunk.offset < chunk.end {
        return Err(Error::ExcessBytes(chunk.end - chunk.offset));
    }
    Ok(value)
}

/// Deserializes a value from the front of `bytes`, returning it along with
/// the number of bytes read.
pub fn decode_prefix(layout: &Layout, bytes: Bytes) -> Result<(Value, usize), Error> {
    layout.validate()?;
    let mut chunk = Chunk::new(bytes);
    let value = read_layout(layout, &mut chunk)?;
    Ok((value, chunk.offset))
}

/// A bounded read position over the input buffer.
struct Chunk {
    buf: Bytes,
    offset: usize,
    end: usize,
}

impl Chunk {
    fn new(buf: Bytes) -> Self {
        let end = buf.len();
        Self {
            buf,
            offset: 0,
            end,
        }
    }

    fn advance(&mut self, len: usize) -> Result<usize, Error> {
        let at = self.offset;
        if at + len > self.end {
            return Err(Error::Truncated);
        }
        self.offset = at + len;
        Ok(at)
    }

    /// A zero-copy view of the next `len` bytes.
    fn take(&mut self, len: usize) -> Result<Bytes, Error> {
        let at = self.advance(len)?;
        Ok(self.buf.slice(at..at + len))
    }

    fn take_rest(&mut self) -> Bytes {
        let at = self.offset;
        self.offset = self.end;
        self.buf.slice(at..self.end)
    }

    /// Carves an exact sub-region; the outer offset advances past it.
    fn sub(&mut self, len: usize) -> Result<Chunk, Error> {
        let at = self.advance(len)?;
        Ok(Chunk {
            buf: self.buf.clone(),
            offset: at,
            end: at + len,
        })
    }
}

fn read_layout(layout: &Layout, chunk: &mut Chunk) -> Result<Value, Error> {
    match layout {
        Layout::Item(item) => read_item(item, chunk),
        Layout::Struct(items) => Ok(Value::Struct(read_struct(items, chunk)?)),
    }
}

fn read_struct(items: &[NamedItem], chunk: &mut Chunk) -> Result<BTreeMap<String, Value>, Error> {
    let mut fields = BTreeMap::new();
    for entry in items {
        let value = read_item(&entry.item, chunk).map_err(|err| err.named(&entry.name))?;
        if !entry.item.is_omitted() {
            fields.insert(entry.name.clone(), value);
        }
    }
    Ok(fields)
}

fn read_item(item: &Item, chunk: &mut Chunk) -> Result<Value, Error> {
    match item {
        Item::Uint(num) | Item::Int(num) => {
            let signed = matches!(item, Item::Int(_));
            let raw = {
                let wire = chunk.take(num.size)?;
                num::read_int(&wire, num.endianness, signed)
            };
            match &num.custom {
                Some(NumCustom::Const(constant)) => {
                    check_num_equals(constant, &raw)?;
                    Ok(raw)
                }
                Some(NumCustom::Fixed { from, to }) => {
                    check_num_equals(from, &raw)?;
                    Ok(to.clone())
                }
                Some(NumCustom::Conv(conv)) => (conv.to)(raw),
                None => Ok(raw),
            }
        }
        Item::Bytes(bytes) => read_bytes(bytes, chunk),
        Item::Array(array) => {
            let mut elements = Vec::new();
            match (array.length, array.length_size) {
                (Some(length), _) => {
                    for _ in 0..length {
                        elements.push(read_layout(&array.layout, chunk)?);
                    }
                }
                (None, Some(length_size)) => {
                    let prefix = chunk.take(length_size)?;
                    let count = num::read_uint(&prefix, array.length_endianness);
                    for _ in 0..count {
                        elements.push(read_layout(&array.layout, chunk)?);
                    }
                }
                (None, None) => {
                    while chunk.offset < chunk.end {
                        let before = chunk.offset;
                        elements.push(read_layout(&array.layout, chunk)?);
                        if chunk.offset == before {
                            return Err(Error::MalformedLayout(
                                "array element consumes no bytes",
                            ));
                        }
                    }
                }
            }
            Ok(Value::List(elements))
        }
        Item::Switch(switch) => {
            let wire = {
                let id = chunk.take(switch.id_size)?;
                num::read_uint(&id, switch.id_endianness)
            };
            let (id, branch) = switch
                .variants
                .iter()
                .find(|(id, _)| id.wire == wire)
                .ok_or_else(|| Error::UnknownSwitchId(wire.to_string()))?;
            let mut fields = read_struct(branch, chunk)?;
            fields.insert(switch.id_tag.clone(), id.decoded());
            Ok(Value::Struct(fields))
        }
    }
}

fn read_bytes(bytes: &BytesItem, chunk: &mut Chunk) -> Result<Value, Error> {
    let prefix_len = match bytes.length_size {
        Some(length_size) => {
            let prefix = chunk.take(length_size)?;
            Some(num::read_uint(&prefix, bytes.length_endianness) as usize)
        }
        None => None,
    };

    // The region length, when determinable before reading the payload. A
    // constant-like payload pins it even without a declared size.
    let known = match (prefix_len, bytes.size, &bytes.custom) {
        (Some(len), _, _) => Some(len),
        (None, Some(size), _) => Some(size),
        (None, None, Some(BytesCustom::Const(constant))) => Some(constant.len()),
        (None, None, Some(BytesCustom::Fixed { .. })) => Some(fixed_wire(bytes)?.len()),
        _ => None,
    };

    match &bytes.custom {
        Some(BytesCustom::Const(constant)) => {
            let region = match known {
                Some(len) => chunk.take(len)?,
                None => chunk.take_rest(),
            };
            check_bytes_equal(constant, None, &region, None)?;
            Ok(Value::Bytes(region))
        }
        Some(BytesCustom::Fixed { to, .. }) => {
            let wire = fixed_wire(bytes)?;
            let region = match known {
                Some(len) => chunk.take(len)?,
                None => chunk.take_rest(),
            };
            check_bytes_equal(&wire, None, &region, None)?;
            Ok(to.clone())
        }
        Some(BytesCustom::Conv(conv)) => match &bytes.layout {
            Some(nested) => {
                let value = read_region(nested, known, chunk)?;
                (conv.to)(value)
            }
            None => {
                let region = match known {
                    Some(len) => chunk.take(len)?,
                    None => chunk.take_rest(),
                };
                (conv.to)(Value::Bytes(region))
            }
        },
        None => match &bytes.layout {
            Some(nested) => read_region(nested, known, chunk),
            None => {
                let region = match known {
                    Some(len) => chunk.take(len)?,
                    None => chunk.take_rest(),
                };
                Ok(Value::Bytes(region))
            }
        },
    }
}

/// Reads a nested layout from a region of `known` bytes (which it must
/// consume exactly), or from the remainder of the outer chunk when the
/// region size is unknown (boundless context).
fn read_region(nested: &Layout, known: Option<usize>, chunk: &mut Chunk) -> Result<Value, Error> {
    match known {
        Some(len) => {
            let mut sub = chunk.sub(len)?;
            let value = read_layout(nested, &mut sub)?;
            if sub.offset < sub.end {
                return Err(Error::ExcessBytes(sub.end - sub.offset));
            }
            Ok(value)
        }
        None => read_layout(nested, chunk),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{named, Conversion};

    #[test]
    fn test_truncated() {
        let layout = Layout::Item(Item::uint(4));
        assert!(matches!(
            decode(&layout, Bytes::from_static(&[1, 2])),
            Err(Error::Truncated)
        ));
    }

    #[test]
    fn test_excess_bytes() {
        let layout = Layout::Item(Item::uint(1));
        assert!(matches!(
            decode(&layout, Bytes::from_static(&[1, 2])),
            Err(Error::ExcessBytes(1))
        ));
        let (value, read) = decode_prefix(&layout, Bytes::from_static(&[1, 2])).unwrap();
        assert_eq!(value, Value::U64(1));
        assert_eq!(read, 1);
    }

    #[test]
    fn test_sign_extension() {
        let layout = Layout::Item(Item::int(2).little());
        assert_eq!(
            decode(&layout, Bytes::from_static(&[254, 255])).unwrap(),
            Value::I64(-2)
        );
    }

    #[test]
    fn test_zero_copy_view() {
        let layout = Layout::structure([("len", Item::uint(1)), ("rest", Item::bytes_boundless())]);
        let input = Bytes::from_static(&[3, 0xAA, 0xBB, 0xCC]);
        let decoded = decode(&layout, input.clone()).unwrap();
        let rest = decoded.get("rest").unwrap().as_bytes().unwrap();
        assert_eq!(rest.as_ref(), &[0xAA, 0xBB, 0xCC]);
        // The view borrows the input allocation.
        assert_eq!(rest.as_ptr(), unsafe { input.as_ptr().add(1) });
    }

    #[test]
    fn test_length_prefixed_bytes() {
        let layout = Layout::Item(Item::bytes_prefixed(2));
        let decoded = decode(&layout, Bytes::from_static(&[0, 3, 9, 8, 7])).unwrap();
        assert_eq!(decoded, Value::bytes(vec![9u8, 8, 7]));

        // Prefix claiming more than the buffer holds.
        assert!(matches!(
            decode(&layout, Bytes::from_static(&[0, 9, 1])),
            Err(Error::Truncated)
        ));
    }

    #[test]
    fn test_nested_region_must_be_consumed() {
        let inner = Layout::structure([("byte", Item::uint(1))]);
        let layout = Layout::Item(Item::bytes(3).nested(inner));
        assert!(matches!(
            decode(&layout, Bytes::from_static(&[1, 2, 3])),
            Err(Error::ExcessBytes(2))
        ));
    }

    #[test]
    fn test_switch_unknown_id() {
        let layout = Layout::Item(Item::switch(1, [(1u64, vec![]), (2u64, vec![])]));
        assert!(matches!(
            decode(&layout, Bytes::from_static(&[3])),
            Err(Error::UnknownSwitchId(_))
        ));
    }

    #[test]
    fn test_switch_splices_id_tag() {
        let layout = Layout::Item(
            Item::switch(1, [((7u64, "Ping"), vec![named("seq", Item::uint(2))])]).id_tag("kind"),
        );
        let decoded = decode(&layout, Bytes::from_static(&[7, 0, 5])).unwrap();
        assert_eq!(
            decoded,
            Value::structure([("kind", Value::from("Ping")), ("seq", Value::U64(5))])
        );
    }

    #[test]
    fn test_omitted_constant_absent() {
        let layout = Layout::structure([
            ("magic", Item::uint(1).constant(42u64).omit()),
            ("port", Item::uint(2)),
        ]);
        let decoded = decode(&layout, Bytes::from_static(&[42, 0, 80])).unwrap();
        assert_eq!(decoded, Value::structure([("port", Value::U64(80))]));

        // The constant is still checked.
        assert!(matches!(
            decode(&layout, Bytes::from_static(&[41, 0, 80]))
                .unwrap_err()
                .root(),
            Error::ConstantMismatch(_)
        ));
    }

    #[test]
    fn test_boundless_array() {
        let layout = Layout::Item(Item::array_boundless(Item::uint(2)));
        let decoded = decode(&layout, Bytes::from_static(&[0, 1, 0, 2, 0, 3])).unwrap();
        assert_eq!(
            decoded,
            Value::list([Value::U64(1), Value::U64(2), Value::U64(3)])
        );
        // A trailing half-element is truncation, not silence.
        assert!(matches!(
            decode(&layout, Bytes::from_static(&[0, 1, 0])),
            Err(Error::Truncated)
        ));
    }

    #[test]
    fn test_conversion_applied_on_decode() {
        let layout = Layout::Item(Item::bytes_prefixed(1).conversion(Conversion::new(
            |wire| {
                let bytes = wire.as_bytes().cloned().unwrap_or_default();
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|err| Error::Conversion(err.to_string()))?;
                Ok(Value::Str(text))
            },
            |value| {
                let text = value.as_str().unwrap_or_default().to_string();
                Ok(Value::bytes(text.into_bytes()))
            },
        )));
        let decoded = decode(&layout, Bytes::from_static(&[2, b'h', b'i'])).unwrap();
        assert_eq!(decoded, Value::from("hi"));
    }
}
