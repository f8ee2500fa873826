//! Static and data-driven size computation.
//!
//! The static pass answers "is this layout's size determined without data?"
//! and is what the discriminator builds on. The data pass produces the exact
//! byte count for a concrete value and, as a side channel, captures every
//! bytes-item conversion result in an ordered queue so the serializer can
//! replay them without re-invoking user functions. Both passes and the
//! serializer visit items in identical order; the queue depends on it.

use crate::{
    encode::fixed_wire,
    layout::{max_unsigned, BytesCustom, Item, Layout, NamedItem, NumCustom},
    util::find_id_layout_pair,
    Error, Value,
};
use std::collections::VecDeque;

/// Conversion results captured by the size pass, in traversal order.
pub(crate) type ConvQueue = VecDeque<Value>;

/// Returns the layout's size in bytes if it is fully determined without
/// data, `None` otherwise.
pub fn static_size(layout: &Layout) -> Result<Option<usize>, Error> {
    layout.validate()?;
    static_layout(layout)
}

/// Returns the exact serialized size of `data` under `layout`.
pub fn encode_size(layout: &Layout, data: &Value) -> Result<usize, Error> {
    layout.validate()?;
    let mut queue = ConvQueue::new();
    data_layout(layout, data, &mut queue)
}

pub(crate) fn static_layout(layout: &Layout) -> Result<Option<usize>, Error> {
    match layout {
        Layout::Item(item) => static_item(item),
        Layout::Struct(items) => static_struct(items),
    }
}

pub(crate) fn static_struct(items: &[NamedItem]) -> Result<Option<usize>, Error> {
    let mut total = 0;
    for entry in items {
        match static_item(&entry.item).map_err(|err| err.named(&entry.name))? {
            Some(size) => total += size,
            None => return Ok(None),
        }
    }
    Ok(Some(total))
}

fn static_item(item: &Item) -> Result<Option<usize>, Error> {
    match item {
        // The wire width of a numeric item never depends on its value.
        Item::Uint(num) | Item::Int(num) => Ok(Some(num.size)),
        Item::Bytes(bytes) => {
            let prefix = bytes.length_size.unwrap_or(0);
            let payload = match &bytes.custom {
                Some(BytesCustom::Const(constant)) => Some(constant.len()),
                Some(BytesCustom::Fixed { .. }) => Some(fixed_wire(bytes)?.len()),
                _ => match (bytes.size, &bytes.layout) {
                    (Some(size), _) => Some(size),
                    (None, Some(nested)) => static_layout(nested)?,
                    (None, None) => None,
                },
            };
            Ok(payload.map(|payload| prefix + payload))
        }
        Item::Array(array) => match (array.length, array.length_size) {
            (Some(length), None) => {
                Ok(static_layout(&array.layout)?.map(|element| length * element))
            }
            _ => Ok(None),
        },
        Item::Switch(switch) => {
            let mut common = None;
            for (_, branch) in &switch.variants {
                match static_struct(branch)? {
                    Some(size) if common.is_none() || common == Some(size) => {
                        common = Some(size);
                    }
                    _ => return Ok(None),
                }
            }
            Ok(common.map(|size| switch.id_size + size))
        }
    }
}

pub(crate) fn data_layout(
    layout: &Layout,
    data: &Value,
    queue: &mut ConvQueue,
) -> Result<usize, Error> {
    match layout {
        Layout::Item(item) => data_item(item, Some(data), queue),
        Layout::Struct(items) => data_struct(items, data, queue),
    }
}

pub(crate) fn data_struct(
    items: &[NamedItem],
    data: &Value,
    queue: &mut ConvQueue,
) -> Result<usize, Error> {
    let fields = data
        .as_struct()
        .ok_or(Error::IncompleteData("expected a struct value"))?;
    let mut total = 0;
    for entry in items {
        let value = fields.get(&entry.name);
        if value.is_none() && requires_value(&entry.item) {
            return Err(Error::UnknownField(entry.name.clone()));
        }
        total += data_item(&entry.item, value, queue).map_err(|err| err.named(&entry.name))?;
    }
    Ok(total)
}

/// Whether sizing an item needs the item's value. Constant-like items are
/// sized from the layout alone.
fn requires_value(item: &Item) -> bool {
    match item {
        Item::Uint(num) | Item::Int(num) => !matches!(
            num.custom,
            Some(NumCustom::Const(_) | NumCustom::Fixed { .. })
        ),
        Item::Bytes(bytes) => !matches!(
            bytes.custom,
            Some(BytesCustom::Const(_) | BytesCustom::Fixed { .. })
        ),
        Item::Array(_) | Item::Switch(_) => true,
    }
}

fn data_item(item: &Item, value: Option<&Value>, queue: &mut ConvQueue) -> Result<usize, Error> {
    match item {
        Item::Uint(num) | Item::Int(num) => Ok(num.size),
        Item::Bytes(bytes) => {
            let prefix = bytes.length_size.unwrap_or(0);
            match &bytes.custom {
                Some(BytesCustom::Const(constant)) => Ok(prefix + constant.len()),
                Some(BytesCustom::Fixed { .. }) => Ok(prefix + fixed_wire(bytes)?.len()),
                Some(BytesCustom::Conv(conv)) => {
                    let input = value.ok_or(Error::IncompleteData("missing value"))?;
                    let converted = (conv.from)(input.clone())?;
                    // Captured before recursing so the write pass pops this
                    // entry first, then its nested conversions in order.
                    queue.push_back(converted.clone());
                    match &bytes.layout {
                        Some(nested) => Ok(prefix + data_layout(nested, &converted, queue)?),
                        None => {
                            let wire = converted.as_bytes().ok_or(Error::IncompleteData(
                                "conversion produced a non-bytes value",
                            ))?;
                            Ok(prefix + wire.len())
                        }
                    }
                }
                None => {
                    let input = value.ok_or(Error::IncompleteData("missing value"))?;
                    match &bytes.layout {
                        Some(nested) => Ok(prefix + data_layout(nested, input, queue)?),
                        None => {
                            let wire = input
                                .as_bytes()
                                .ok_or(Error::IncompleteData("expected a bytes value"))?;
                            Ok(prefix + wire.len())
                        }
                    }
                }
            }
        }
        Item::Array(array) => {
            let input = value.ok_or(Error::IncompleteData("missing value"))?;
            let elements = input
                .as_list()
                .ok_or(Error::IncompleteData("expected a list value"))?;
            let mut total = array.length_size.unwrap_or(0);
            for element in elements {
                total += data_layout(&array.layout, element, queue)?;
            }
            Ok(total)
        }
        Item::Switch(switch) => {
            let input = value.ok_or(Error::IncompleteData("missing value"))?;
            let (_, branch) = find_id_layout_pair(switch, input)?;
            Ok(switch.id_size + data_struct(branch, input, queue)?)
        }
    }
}

/// Inclusive bounds on the serialized size of any value of `layout`, for
/// the discriminator: `(min, max)` with `None` meaning unbounded.
pub(crate) fn bounds_layout(layout: &Layout) -> Result<(u128, Option<u128>), Error> {
    match layout {
        Layout::Item(item) => bounds_item(item),
        Layout::Struct(items) => bounds_struct(items),
    }
}

fn bounds_struct(items: &[NamedItem]) -> Result<(u128, Option<u128>), Error> {
    let mut min = 0u128;
    let mut max = Some(0u128);
    for entry in items {
        let (item_min, item_max) = bounds_item(&entry.item)?;
        min = min.saturating_add(item_min);
        max = match (max, item_max) {
            (Some(a), Some(b)) => Some(a.saturating_add(b)),
            _ => None,
        };
    }
    Ok((min, max))
}

fn bounds_item(item: &Item) -> Result<(u128, Option<u128>), Error> {
    match item {
        Item::Uint(num) | Item::Int(num) => {
            let size = num.size as u128;
            Ok((size, Some(size)))
        }
        Item::Bytes(bytes) => {
            if let Some(size) = static_item(item)? {
                let size = size as u128;
                return Ok((size, Some(size)));
            }
            let prefix = bytes.length_size.unwrap_or(0) as u128;
            let (payload_min, payload_max) = match &bytes.layout {
                Some(nested) => bounds_layout(nested)?,
                None => (0, None),
            };
            match bytes.length_size {
                Some(length_size) => {
                    // The prefix caps the payload even when the nested
                    // layout is unbounded.
                    let cap = max_unsigned(length_size);
                    let max = payload_max.map_or(cap, |m| m.min(cap));
                    Ok((prefix + payload_min, Some(prefix + max)))
                }
                None => Ok((payload_min, payload_max)),
            }
        }
        Item::Array(array) => {
            if let Some(size) = static_item(item)? {
                let size = size as u128;
                return Ok((size, Some(size)));
            }
            let (element_min, element_max) = bounds_layout(&array.layout)?;
            match (array.length, array.length_size) {
                (Some(length), _) => {
                    let length = length as u128;
                    Ok((
                        length.saturating_mul(element_min),
                        element_max.map(|m| length.saturating_mul(m)),
                    ))
                }
                (None, Some(length_size)) => {
                    let prefix = length_size as u128;
                    let cap = max_unsigned(length_size);
                    Ok((
                        prefix,
                        element_max.map(|m| prefix.saturating_add(cap.saturating_mul(m))),
                    ))
                }
                (None, None) => Ok((0, None)),
            }
        }
        Item::Switch(switch) => {
            let id = switch.id_size as u128;
            let mut min = None;
            let mut max = Some(0u128);
            for (_, branch) in &switch.variants {
                let (branch_min, branch_max) = bounds_struct(branch)?;
                min = Some(min.map_or(branch_min, |m: u128| m.min(branch_min)));
                max = match (max, branch_max) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };
            }
            Ok((
                id + min.unwrap_or(0),
                max.map(|m| id + m),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{named, Conversion};
    use bytes::Bytes;

    #[test]
    fn test_static_known() {
        let layout = Layout::structure([
            ("header", Item::bytes(2)),
            ("port", Item::uint(2)),
            ("flags", Item::uint(1)),
        ]);
        assert_eq!(static_size(&layout).unwrap(), Some(5));
    }

    #[test]
    fn test_static_unknown_bubbles() {
        let layout = Layout::structure([("port", Item::uint(2)), ("rest", Item::bytes_boundless())]);
        assert_eq!(static_size(&layout).unwrap(), None);

        let prefixed = Layout::Item(Item::bytes_prefixed(1));
        assert_eq!(static_size(&prefixed).unwrap(), None);
    }

    #[test]
    fn test_static_constant_bytes() {
        let layout = Layout::Item(Item::bytes_prefixed(1).constant_bytes(vec![0u8, 42]));
        assert_eq!(static_size(&layout).unwrap(), Some(3));
    }

    #[test]
    fn test_static_switch_common_size() {
        let common = Layout::Item(Item::switch(
            1,
            [
                (1u64, vec![named("a", Item::uint(4))]),
                (2u64, vec![named("b", Item::bytes(4))]),
            ],
        ));
        assert_eq!(static_size(&common).unwrap(), Some(5));

        let uneven = Layout::Item(Item::switch(
            1,
            [
                (1u64, vec![named("a", Item::uint(4))]),
                (2u64, vec![named("b", Item::bytes(8))]),
            ],
        ));
        assert_eq!(static_size(&uneven).unwrap(), None);
    }

    #[test]
    fn test_data_size_and_queue_capture() {
        let layout = Layout::structure([(
            "name",
            Item::bytes_prefixed(1).conversion(Conversion::new(
                |wire| Ok(wire),
                |value| {
                    let text = value.as_str().unwrap_or_default().to_string();
                    Ok(Value::Bytes(Bytes::from(text.into_bytes())))
                },
            )),
        )]);
        let data = Value::structure([("name", Value::from("localhost"))]);

        let mut queue = ConvQueue::new();
        let size = data_layout(&layout, &data, &mut queue).unwrap();
        assert_eq!(size, 10);
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.pop_front().unwrap(),
            Value::Bytes(Bytes::from_static(b"localhost"))
        );
    }

    #[test]
    fn test_data_size_missing_field() {
        let layout = Layout::structure([("port", Item::uint(2))]);
        let data = Value::structure([("ttl", Value::from(1u8))]);
        assert!(matches!(
            encode_size(&layout, &data),
            Err(Error::UnknownField(name)) if name == "port"
        ));
    }

    #[test]
    fn test_data_size_boundless_array() {
        let layout = Layout::Item(Item::array_boundless(Item::uint(2)));
        let data = Value::list([Value::U64(1), Value::U64(2), Value::U64(3)]);
        assert_eq!(encode_size(&layout, &data).unwrap(), 6);
    }

    #[test]
    fn test_bounds() {
        let fixed = Layout::Item(Item::array(4, Item::uint(1)));
        assert_eq!(bounds_layout(&fixed).unwrap(), (4, Some(4)));

        let prefixed = Layout::Item(Item::bytes_prefixed(1));
        assert_eq!(bounds_layout(&prefixed).unwrap(), (1, Some(256)));

        let boundless = Layout::structure([
            ("port", Item::uint(2)),
            ("rest", Item::bytes_boundless()),
        ]);
        assert_eq!(bounds_layout(&boundless).unwrap(), (2, None));

        let switch = Layout::Item(Item::switch(
            1,
            [
                (1u64, vec![named("a", Item::uint(4))]),
                (2u64, vec![named("b", Item::bytes(8))]),
            ],
        ));
        assert_eq!(bounds_layout(&switch).unwrap(), (5, Some(9)));
    }
}
