//! Shared checks used by the engines.

use crate::{
    layout::{NamedItem, SwitchId, SwitchItem},
    Error, Value,
};
use num_bigint::BigInt;
use std::ops::Range;

/// Fails with [Error::SizeMismatch] unless the sizes agree.
#[inline]
pub fn check_size(expected: usize, actual: usize) -> Result<(), Error> {
    if expected != actual {
        return Err(Error::SizeMismatch { expected, actual });
    }
    Ok(())
}

/// Enforces an item's declared size, if it has one.
#[inline]
pub fn check_item_size(declared: Option<usize>, observed: usize) -> Result<(), Error> {
    match declared {
        Some(expected) => check_size(expected, observed),
        None => Ok(()),
    }
}

/// Fails with [Error::ConstantMismatch] unless `observed` equals `constant`.
///
/// Comparison is exact and by value: native integers, [BigInt]s, and
/// integral floats all compare equal when they denote the same number.
pub fn check_num_equals(constant: &BigInt, observed: &Value) -> Result<(), Error> {
    let observed = observed.to_bigint()?;
    if &observed != constant {
        return Err(Error::ConstantMismatch(format!(
            "expected {constant}, got {observed}"
        )));
    }
    Ok(())
}

/// Byte-wise equality check, with an optional sub-range applied to either
/// operand before comparing.
pub fn check_bytes_equal(
    expected: &[u8],
    expected_range: Option<Range<usize>>,
    actual: &[u8],
    actual_range: Option<Range<usize>>,
) -> Result<(), Error> {
    let expected = apply_range(expected, expected_range)?;
    let actual = apply_range(actual, actual_range)?;
    if expected != actual {
        return Err(Error::ConstantMismatch(format!(
            "expected {expected:02x?}, got {actual:02x?}"
        )));
    }
    Ok(())
}

fn apply_range(bytes: &[u8], range: Option<Range<usize>>) -> Result<&[u8], Error> {
    match range {
        None => Ok(bytes),
        Some(range) => bytes.get(range).ok_or(Error::Truncated),
    }
}

/// Locates the switch branch matching the discriminant in `data`.
///
/// The discriminant is read from `data[id_tag]` and compared against the
/// user label of a remapped id, or the plain wire id otherwise.
pub fn find_id_layout_pair<'a>(
    switch: &'a SwitchItem,
    data: &Value,
) -> Result<&'a (SwitchId, Vec<NamedItem>), Error> {
    let discriminant = data
        .get(&switch.id_tag)
        .ok_or_else(|| Error::UnknownField(switch.id_tag.clone()))?;
    for variant in &switch.variants {
        let (id, _) = variant;
        let matched = match &id.label {
            Some(label) => discriminant.as_str() == Some(label.as_str()),
            None => discriminant
                .to_bigint()
                .map(|v| v == BigInt::from(id.wire))
                .unwrap_or(false),
        };
        if matched {
            return Ok(variant);
        }
    }
    Err(Error::UnknownSwitchId(format!("{discriminant:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{named, Item};

    fn switch_item(item: Item) -> SwitchItem {
        match item {
            Item::Switch(switch) => switch,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_check_size() {
        assert!(check_size(4, 4).is_ok());
        assert!(matches!(
            check_size(4, 2),
            Err(Error::SizeMismatch {
                expected: 4,
                actual: 2
            })
        ));
        assert!(check_item_size(None, 99).is_ok());
        assert!(check_item_size(Some(3), 4).is_err());
    }

    #[test]
    fn test_check_num_equals_cross_width() {
        let constant = BigInt::from(258);
        assert!(check_num_equals(&constant, &Value::U64(258)).is_ok());
        assert!(check_num_equals(&constant, &Value::Big(BigInt::from(258))).is_ok());
        assert!(check_num_equals(&constant, &Value::F64(258.0)).is_ok());
        assert!(matches!(
            check_num_equals(&constant, &Value::U64(259)),
            Err(Error::ConstantMismatch(_))
        ));
        assert!(matches!(
            check_num_equals(&constant, &Value::F64(258.5)),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn test_check_bytes_equal_ranges() {
        assert!(check_bytes_equal(&[1, 2, 3], None, &[1, 2, 3], None).is_ok());
        assert!(check_bytes_equal(&[0, 1, 2, 3], Some(1..4), &[9, 9, 1, 2, 3], Some(2..5)).is_ok());
        assert!(matches!(
            check_bytes_equal(&[1, 2], None, &[1, 3], None),
            Err(Error::ConstantMismatch(_))
        ));
        assert!(matches!(
            check_bytes_equal(&[1, 2], Some(0..5), &[1, 2], None),
            Err(Error::Truncated)
        ));
    }

    #[test]
    fn test_find_id_layout_pair_labels() {
        let switch = switch_item(
            Item::switch(
                1,
                [
                    (
                        SwitchId::from((1u64, "Name")),
                        vec![named("value", Item::bytes_prefixed(2))],
                    ),
                    (
                        SwitchId::from((4u64, "IPv4")),
                        vec![named("value", Item::bytes(4))],
                    ),
                ],
            )
            .id_tag("type"),
        );

        let data = Value::structure([("type", Value::from("IPv4"))]);
        let (id, _) = find_id_layout_pair(&switch, &data).unwrap();
        assert_eq!(id.wire, 4);

        let missing = Value::structure([("type", Value::from("IPv6"))]);
        assert!(matches!(
            find_id_layout_pair(&switch, &missing),
            Err(Error::UnknownSwitchId(_))
        ));

        let no_tag = Value::structure([("port", Value::from(80u16))]);
        assert!(matches!(
            find_id_layout_pair(&switch, &no_tag),
            Err(Error::UnknownField(_))
        ));
    }

    #[test]
    fn test_find_id_layout_pair_plain_ids() {
        let switch = switch_item(Item::switch(2, [(7u64, vec![]), (9u64, vec![])]));
        let data = Value::structure([("id", Value::from(9u64))]);
        let (id, _) = find_id_layout_pair(&switch, &data).unwrap();
        assert_eq!(id.wire, 9);
    }
}
