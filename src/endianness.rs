//! Rewrites a layout to a uniform byte order.

use crate::layout::{ArrayItem, BytesItem, Endianness, Item, Layout, NamedItem, SwitchItem};
use std::sync::OnceLock;

/// Produces a structurally equal copy of `layout` in which every multi-byte
/// numeric, length prefix, and switch id carries `endianness`. Single-byte
/// widths are left untouched (byte order is irrelevant at width 1), and user
/// conversions are opaque: the rewriter never looks inside them. The
/// original layout is not mutated.
pub fn with_endianness(layout: &Layout, endianness: Endianness) -> Layout {
    rewrite_layout(layout, endianness)
}

fn rewrite_layout(layout: &Layout, endianness: Endianness) -> Layout {
    match layout {
        Layout::Item(item) => Layout::Item(rewrite_item(item, endianness)),
        Layout::Struct(items) => Layout::Struct(rewrite_struct(items, endianness)),
    }
}

fn rewrite_struct(items: &[NamedItem], endianness: Endianness) -> Vec<NamedItem> {
    items
        .iter()
        .map(|entry| NamedItem {
            name: entry.name.clone(),
            item: rewrite_item(&entry.item, endianness),
        })
        .collect()
}

fn rewrite_item(item: &Item, endianness: Endianness) -> Item {
    match item {
        Item::Uint(num) | Item::Int(num) => {
            let mut num = num.clone();
            if num.size > 1 {
                num.endianness = endianness;
            }
            match item {
                Item::Uint(_) => Item::Uint(num),
                _ => Item::Int(num),
            }
        }
        Item::Bytes(bytes) => Item::Bytes(BytesItem {
            size: bytes.size,
            length_size: bytes.length_size,
            length_endianness: match bytes.length_size {
                Some(width) if width > 1 => endianness,
                _ => bytes.length_endianness,
            },
            layout: bytes
                .layout
                .as_ref()
                .map(|nested| Box::new(rewrite_layout(nested, endianness))),
            custom: bytes.custom.clone(),
            omit: bytes.omit,
            // The memoized wire bytes depend on the nested layout's byte
            // order, so the copy starts with an empty cache.
            wire_cache: OnceLock::new(),
        }),
        Item::Array(array) => Item::Array(ArrayItem {
            length: array.length,
            length_size: array.length_size,
            length_endianness: match array.length_size {
                Some(width) if width > 1 => endianness,
                _ => array.length_endianness,
            },
            layout: Box::new(rewrite_layout(&array.layout, endianness)),
        }),
        Item::Switch(switch) => Item::Switch(SwitchItem {
            id_size: switch.id_size,
            id_endianness: if switch.id_size > 1 {
                endianness
            } else {
                switch.id_endianness
            },
            id_tag: switch.id_tag.clone(),
            variants: switch
                .variants
                .iter()
                .map(|(id, branch)| (id.clone(), rewrite_struct(branch, endianness)))
                .collect(),
        }),
    }
}
