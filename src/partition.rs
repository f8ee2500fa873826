//! Splits a layout into the fields the layout fixes itself versus the
//! fields a user must supply, and rehydrates full values from the dynamic
//! half.

use crate::{
    layout::{ArrayItem, BytesCustom, BytesItem, Item, Layout, NamedItem, NumCustom, SwitchItem},
    num::NATIVE_WIDTH,
    util::find_id_layout_pair,
    Error, Value,
};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// The sub-layout of items whose value is determined by the layout itself:
/// constants, fixed conversions, and containers of such. Returns `None` when
/// nothing is fixed.
pub fn fixed_items(layout: &Layout) -> Option<Layout> {
    match layout {
        Layout::Item(item) => item_fixed_part(item).map(Layout::Item),
        Layout::Struct(items) => {
            let filtered = struct_fixed_part(items);
            if filtered.is_empty() {
                None
            } else {
                Some(Layout::Struct(filtered))
            }
        }
    }
}

/// The complement of [fixed_items]: items with no custom, items with an
/// arbitrary conversion, and containers holding dynamics. Returns `None`
/// when nothing is dynamic.
pub fn dynamic_items(layout: &Layout) -> Option<Layout> {
    match layout {
        Layout::Item(item) => item_dynamic_part(item).map(Layout::Item),
        Layout::Struct(items) => {
            let filtered = struct_dynamic_part(items);
            if filtered.is_empty() {
                None
            } else {
                Some(Layout::Struct(filtered))
            }
        }
    }
}

fn struct_fixed_part(items: &[NamedItem]) -> Vec<NamedItem> {
    items
        .iter()
        .filter_map(|entry| {
            item_fixed_part(&entry.item).map(|item| NamedItem {
                name: entry.name.clone(),
                item,
            })
        })
        .collect()
}

fn item_fixed_part(item: &Item) -> Option<Item> {
    match item {
        Item::Uint(num) | Item::Int(num) => match num.custom {
            Some(NumCustom::Const(_) | NumCustom::Fixed { .. }) => Some(item.clone()),
            _ => None,
        },
        Item::Bytes(bytes) => match &bytes.custom {
            Some(BytesCustom::Const(_) | BytesCustom::Fixed { .. }) => Some(item.clone()),
            Some(BytesCustom::Conv(_)) => None,
            None => {
                let nested = bytes.layout.as_deref()?;
                let fixed = fixed_items(nested)?;
                Some(Item::Bytes(BytesItem {
                    size: bytes.size,
                    length_size: bytes.length_size,
                    length_endianness: bytes.length_endianness,
                    layout: Some(Box::new(fixed)),
                    custom: None,
                    omit: bytes.omit,
                    wire_cache: OnceLock::new(),
                }))
            }
        },
        Item::Array(array) => {
            let fixed = fixed_items(&array.layout)?;
            Some(Item::Array(ArrayItem {
                length: array.length,
                length_size: array.length_size,
                length_endianness: array.length_endianness,
                layout: Box::new(fixed),
            }))
        }
        Item::Switch(switch) => {
            let variants: Vec<_> = switch
                .variants
                .iter()
                .filter_map(|(id, branch)| {
                    let filtered = struct_fixed_part(branch);
                    if filtered.is_empty() {
                        None
                    } else {
                        Some((id.clone(), filtered))
                    }
                })
                .collect();
            if variants.is_empty() {
                return None;
            }
            Some(Item::Switch(SwitchItem {
                id_size: switch.id_size,
                id_endianness: switch.id_endianness,
                id_tag: switch.id_tag.clone(),
                variants,
            }))
        }
    }
}

fn struct_dynamic_part(items: &[NamedItem]) -> Vec<NamedItem> {
    items
        .iter()
        .filter_map(|entry| {
            item_dynamic_part(&entry.item).map(|item| NamedItem {
                name: entry.name.clone(),
                item,
            })
        })
        .collect()
}

fn item_dynamic_part(item: &Item) -> Option<Item> {
    match item {
        Item::Uint(num) | Item::Int(num) => match num.custom {
            Some(NumCustom::Const(_) | NumCustom::Fixed { .. }) => None,
            _ => Some(item.clone()),
        },
        Item::Bytes(bytes) => match &bytes.custom {
            Some(BytesCustom::Const(_) | BytesCustom::Fixed { .. }) => None,
            Some(BytesCustom::Conv(_)) => Some(item.clone()),
            None => match bytes.layout.as_deref() {
                Some(nested) => {
                    let dynamic = dynamic_items(nested)?;
                    Some(Item::Bytes(BytesItem {
                        size: bytes.size,
                        length_size: bytes.length_size,
                        length_endianness: bytes.length_endianness,
                        layout: Some(Box::new(dynamic)),
                        custom: None,
                        omit: bytes.omit,
                        wire_cache: OnceLock::new(),
                    }))
                }
                None => Some(item.clone()),
            },
        },
        Item::Array(array) => {
            let dynamic = dynamic_items(&array.layout)?;
            Some(Item::Array(ArrayItem {
                length: array.length,
                length_size: array.length_size,
                length_endianness: array.length_endianness,
                layout: Box::new(dynamic),
            }))
        }
        // The discriminant is always user-supplied, so a switch keeps a
        // dynamic presence even when every branch is fully fixed; emptied
        // branches stay selectable by the discriminant alone.
        Item::Switch(switch) => Some(Item::Switch(SwitchItem {
            id_size: switch.id_size,
            id_endianness: switch.id_endianness,
            id_tag: switch.id_tag.clone(),
            variants: switch
                .variants
                .iter()
                .map(|(id, branch)| (id.clone(), struct_dynamic_part(branch)))
                .collect(),
        })),
    }
}

/// Rehydrates a full value from the dynamic half: fixed items contribute
/// their layout-determined value, dynamic items are copied from
/// `dynamic` by name, and containers recurse. Omitted fixed items
/// contribute nothing.
pub fn add_fixed_values(layout: &Layout, dynamic: &Value) -> Result<Value, Error> {
    layout.validate()?;
    merge_layout(layout, dynamic)
}

fn merge_layout(layout: &Layout, dynamic: &Value) -> Result<Value, Error> {
    match layout {
        Layout::Item(item) => match item_fixed_value(item)? {
            Some(fixed) => Ok(fixed),
            None => merge_dynamic_item(item, dynamic),
        },
        Layout::Struct(items) => {
            let empty = BTreeMap::new();
            let fields = dynamic.as_struct().unwrap_or(&empty);
            Ok(Value::Struct(merge_struct(items, fields)?))
        }
    }
}

fn merge_struct(
    items: &[NamedItem],
    fields: &BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>, Error> {
    let mut merged = BTreeMap::new();
    for entry in items {
        if entry.item.is_omitted() {
            continue;
        }
        let value = match item_fixed_value(&entry.item).map_err(|err| err.named(&entry.name))? {
            Some(fixed) => fixed,
            None => {
                let supplied = fields
                    .get(&entry.name)
                    .ok_or_else(|| Error::UnknownField(entry.name.clone()))?;
                merge_dynamic_item(&entry.item, supplied).map_err(|err| err.named(&entry.name))?
            }
        };
        merged.insert(entry.name.clone(), value);
    }
    Ok(merged)
}

/// The value an item takes when the layout alone determines it, or `None`
/// for items with any dynamic content.
fn item_fixed_value(item: &Item) -> Result<Option<Value>, Error> {
    match item {
        Item::Uint(num) | Item::Int(num) => match &num.custom {
            Some(NumCustom::Const(constant)) => Ok(Some(const_num_value(
                constant,
                num.size,
                matches!(item, Item::Int(_)),
            ))),
            Some(NumCustom::Fixed { to, .. }) => Ok(Some(to.clone())),
            _ => Ok(None),
        },
        Item::Bytes(bytes) => match &bytes.custom {
            Some(BytesCustom::Const(constant)) => Ok(Some(Value::Bytes(constant.clone()))),
            Some(BytesCustom::Fixed { to, .. }) => Ok(Some(to.clone())),
            Some(BytesCustom::Conv(_)) => Ok(None),
            None => match bytes.layout.as_deref() {
                Some(nested) => layout_fixed_value(nested),
                None => Ok(None),
            },
        },
        Item::Array(array) => match array.length {
            Some(length) => Ok(layout_fixed_value(&array.layout)?
                .map(|element| Value::List(vec![element; length]))),
            None => Ok(None),
        },
        Item::Switch(_) => Ok(None),
    }
}

fn layout_fixed_value(layout: &Layout) -> Result<Option<Value>, Error> {
    match layout {
        Layout::Item(item) => item_fixed_value(item),
        Layout::Struct(items) => {
            let mut fields = BTreeMap::new();
            for entry in items {
                if entry.item.is_omitted() {
                    continue;
                }
                match item_fixed_value(&entry.item)? {
                    Some(value) => {
                        fields.insert(entry.name.clone(), value);
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some(Value::Struct(fields)))
        }
    }
}

fn merge_dynamic_item(item: &Item, dynamic: &Value) -> Result<Value, Error> {
    match item {
        Item::Uint(_) | Item::Int(_) => Ok(dynamic.clone()),
        Item::Bytes(bytes) => match &bytes.custom {
            // Opaque: the conversion's input is whatever the user supplied.
            Some(BytesCustom::Conv(_)) => Ok(dynamic.clone()),
            _ => match bytes.layout.as_deref() {
                Some(nested) => merge_layout(nested, dynamic),
                None => Ok(dynamic.clone()),
            },
        },
        Item::Array(array) => {
            let elements = dynamic
                .as_list()
                .ok_or(Error::IncompleteData("expected a list value"))?;
            let merged = elements
                .iter()
                .map(|element| merge_layout(&array.layout, element))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(merged))
        }
        Item::Switch(switch) => {
            let (_, branch) = find_id_layout_pair(switch, dynamic)?;
            let fields = dynamic
                .as_struct()
                .ok_or(Error::IncompleteData("expected a struct value"))?;
            let mut merged = merge_struct(branch, fields)?;
            let discriminant = fields
                .get(&switch.id_tag)
                .ok_or_else(|| Error::UnknownField(switch.id_tag.clone()))?;
            merged.insert(switch.id_tag.clone(), discriminant.clone());
            Ok(Value::Struct(merged))
        }
    }
}

/// Canonical decoded form of a numeric constant: native up to
/// [NATIVE_WIDTH] bytes, arbitrary precision beyond.
fn const_num_value(constant: &BigInt, size: usize, signed: bool) -> Value {
    if size <= NATIVE_WIDTH {
        if signed {
            if let Some(value) = constant.to_i64() {
                return Value::I64(value);
            }
        } else if let Some(value) = constant.to_u64() {
            return Value::U64(value);
        }
    }
    Value::Big(constant.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::named;

    fn endpoint() -> Layout {
        Layout::structure([
            (
                "header",
                Item::bytes_boundless().constant_bytes(vec![0u8, 42]).omit(),
            ),
            ("version", Item::uint(1).fixed(3u64, "v3")),
            ("port", Item::uint(2)),
        ])
    }

    #[test]
    fn test_partition_filters() {
        let layout = endpoint();
        let fixed = fixed_items(&layout).unwrap();
        let dynamic = dynamic_items(&layout).unwrap();

        let fixed_names: Vec<_> = fixed
            .as_struct()
            .unwrap()
            .iter()
            .map(|entry| entry.name.as_str())
            .collect();
        assert_eq!(fixed_names, ["header", "version"]);

        let dynamic_names: Vec<_> = dynamic
            .as_struct()
            .unwrap()
            .iter()
            .map(|entry| entry.name.as_str())
            .collect();
        assert_eq!(dynamic_names, ["port"]);
    }

    #[test]
    fn test_partition_empty_sides_vanish() {
        let all_dynamic = Layout::structure([("port", Item::uint(2))]);
        assert_eq!(fixed_items(&all_dynamic), None);

        let all_fixed = Layout::structure([("magic", Item::uint(1).constant(7u64))]);
        assert_eq!(dynamic_items(&all_fixed), None);
    }

    #[test]
    fn test_partition_recurses_containers() {
        let layout = Layout::structure([(
            "body",
            Item::bytes_prefixed(1).nested(Layout::structure([
                ("magic", Item::uint(1).constant(9u64)),
                ("seq", Item::uint(2)),
            ])),
        )]);

        let fixed = fixed_items(&layout).unwrap();
        let fixed_body = match &fixed.as_struct().unwrap()[0].item {
            Item::Bytes(bytes) => bytes.layout.as_deref().unwrap().clone(),
            _ => panic!("expected bytes item"),
        };
        assert_eq!(
            fixed_body.as_struct().unwrap()[0].name,
            "magic"
        );

        let dynamic = dynamic_items(&layout).unwrap();
        let dynamic_body = match &dynamic.as_struct().unwrap()[0].item {
            Item::Bytes(bytes) => bytes.layout.as_deref().unwrap().clone(),
            _ => panic!("expected bytes item"),
        };
        assert_eq!(dynamic_body.as_struct().unwrap()[0].name, "seq");
    }

    #[test]
    fn test_add_fixed_values() {
        let layout = endpoint();
        let dynamic = Value::structure([("port", Value::from(80u16))]);
        let full = add_fixed_values(&layout, &dynamic).unwrap();
        assert_eq!(
            full,
            Value::structure([
                ("version", Value::from("v3")),
                ("port", Value::U64(80)),
            ])
        );
    }

    #[test]
    fn test_add_fixed_values_switch() {
        let layout = Layout::structure([(
            "frame",
            Item::switch(
                1,
                [
                    (
                        (1u64, "Ping"),
                        vec![
                            named("magic", Item::uint(1).constant(7u64)),
                            named("seq", Item::uint(2)),
                        ],
                    ),
                    ((2u64, "Pong"), vec![named("echo", Item::uint(2))]),
                ],
            )
            .id_tag("kind"),
        )]);
        let dynamic = Value::structure([(
            "frame",
            Value::structure([("kind", Value::from("Ping")), ("seq", Value::U64(9))]),
        )]);
        let full = add_fixed_values(&layout, &dynamic).unwrap();
        assert_eq!(
            full,
            Value::structure([(
                "frame",
                Value::structure([
                    ("kind", Value::from("Ping")),
                    ("magic", Value::U64(7)),
                    ("seq", Value::U64(9)),
                ]),
            )])
        );
    }

    #[test]
    fn test_add_fixed_values_fixed_length_array() {
        let layout = Layout::Item(Item::array(
            2,
            Layout::structure([("pad", Item::bytes(1).constant_bytes(vec![0u8]))]),
        ));
        let full = add_fixed_values(&layout, &Value::Struct(BTreeMap::new())).unwrap();
        assert_eq!(
            full,
            Value::list([
                Value::structure([("pad", Value::bytes(vec![0u8]))]),
                Value::structure([("pad", Value::bytes(vec![0u8]))]),
            ])
        );
    }

    #[test]
    fn test_missing_dynamic_field() {
        let layout = Layout::structure([("port", Item::uint(2))]);
        let err = add_fixed_values(&layout, &Value::Struct(BTreeMap::new())).unwrap_err();
        assert!(matches!(err, Error::UnknownField(name) if name == "port"));
    }
}
