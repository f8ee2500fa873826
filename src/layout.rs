//! The layout algebra: items, proper layouts, and their invariants.
//!
//! A [Layout] is an immutable description of the byte-level shape of a
//! message, either a single unnamed [Item] or an ordered sequence of named
//! items (a *proper layout*). The engines in [crate::size], [crate::encode],
//! [crate::decode], and [crate::discriminator] interpret a layout against a
//! value or a byte buffer; the model itself performs no validation beyond
//! [Layout::validate], which every engine runs on first use.

use crate::{Error, Value};
use bytes::Bytes;
use num_bigint::BigInt;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Byte order of a multi-byte wire field. Defaults to [Endianness::Big]
/// everywhere it is left unspecified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// A user-supplied conversion function between wire and decoded values.
pub type ConvFn = dyn Fn(Value) -> Result<Value, Error> + Send + Sync;

/// A bidirectional transform between the wire representation and the decoded
/// value. The codec treats both directions as black boxes; `to` maps wire to
/// decoded, `from` maps decoded to wire.
#[derive(Clone)]
pub struct Conversion {
    pub to: Arc<ConvFn>,
    pub from: Arc<ConvFn>,
}

impl Conversion {
    pub fn new<T, F>(to: T, from: F) -> Self
    where
        T: Fn(Value) -> Result<Value, Error> + Send + Sync + 'static,
        F: Fn(Value) -> Result<Value, Error> + Send + Sync + 'static,
    {
        Self {
            to: Arc::new(to),
            from: Arc::new(from),
        }
    }
}

impl fmt::Debug for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Conversion(..)")
    }
}

// Conversions compare by function identity: a deep copy of a layout (e.g.
// from the endianness rewriter) shares the same Arcs and stays equal.
impl PartialEq for Conversion {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.to, &other.to) && Arc::ptr_eq(&self.from, &other.from)
    }
}

/// Conversion attached to a numeric item.
#[derive(Clone, Debug, PartialEq)]
pub enum NumCustom {
    /// The wire value is this constant; the user's value is ignored on
    /// encode and checked on decode.
    Const(BigInt),
    /// The wire value is `from`; the decoded value is the label `to`.
    Fixed { from: BigInt, to: Value },
    /// An arbitrary user transform.
    Conv(Conversion),
}

/// Conversion attached to a bytes item.
#[derive(Clone, Debug, PartialEq)]
pub enum BytesCustom {
    /// The wire bytes are this constant.
    Const(Bytes),
    /// The wire value is `from` (raw bytes, or a structured value serialized
    /// through the item's nested layout); the decoded value is `to`.
    Fixed { from: Value, to: Value },
    /// An arbitrary user transform.
    Conv(Conversion),
}

/// A numeric item ([Item::Uint] or [Item::Int]).
#[derive(Clone, Debug, PartialEq)]
pub struct NumItem {
    /// Width in bytes, 1..=32. Widths up to 6 decode as native integers,
    /// wider ones as [Value::Big].
    pub size: usize,
    pub endianness: Endianness,
    pub custom: Option<NumCustom>,
    /// Drop the field from decoded/encoded structs. Legal only with a
    /// constant-like custom.
    pub omit: bool,
}

impl NumItem {
    fn new(size: usize) -> Self {
        Self {
            size,
            endianness: Endianness::Big,
            custom: None,
            omit: false,
        }
    }
}

/// A raw-bytes item, one of four shapes: fixed (`size`), length-prefixed
/// (`length_size`), boundless (neither), each optionally carrying a nested
/// layout whose serialization fills the byte region.
#[derive(Clone, Debug)]
pub struct BytesItem {
    pub size: Option<usize>,
    /// Width of the length prefix in bytes, 1..=6. The prefix counts bytes.
    pub length_size: Option<usize>,
    pub length_endianness: Endianness,
    pub layout: Option<Box<Layout>>,
    pub custom: Option<BytesCustom>,
    pub omit: bool,
    /// Memoized serialization of a fixed-object `from` through the nested
    /// layout. Write-once; concurrent initializers produce identical bytes.
    pub(crate) wire_cache: OnceLock<Bytes>,
}

impl PartialEq for BytesItem {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size
            && self.length_size == other.length_size
            && self.length_endianness == other.length_endianness
            && self.layout == other.layout
            && self.custom == other.custom
            && self.omit == other.omit
    }
}

impl BytesItem {
    fn new(size: Option<usize>, length_size: Option<usize>) -> Self {
        Self {
            size,
            length_size,
            length_endianness: Endianness::Big,
            layout: None,
            custom: None,
            omit: false,
            wire_cache: OnceLock::new(),
        }
    }

    /// Whether this item consumes to the end of its enclosing region.
    pub fn is_boundless(&self) -> bool {
        self.size.is_none() && self.length_size.is_none()
    }
}

/// A repetition of a nested layout: fixed-length (`length`), element-count
/// prefixed (`length_size`), or boundless (loop to end of region).
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayItem {
    pub length: Option<usize>,
    /// Width of the element-count prefix in bytes, 1..=6.
    pub length_size: Option<usize>,
    pub length_endianness: Endianness,
    pub layout: Box<Layout>,
}

impl ArrayItem {
    pub fn is_boundless(&self) -> bool {
        self.length.is_none() && self.length_size.is_none()
    }
}

/// One arm of a switch: the wire discriminant, optionally remapped to a
/// user-facing label in decoded output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchId {
    pub wire: u64,
    pub label: Option<String>,
}

impl SwitchId {
    /// The value the discriminant takes in decoded structs.
    pub fn decoded(&self) -> Value {
        match &self.label {
            Some(label) => Value::Str(label.clone()),
            None => Value::U64(self.wire),
        }
    }
}

impl From<u64> for SwitchId {
    fn from(wire: u64) -> Self {
        Self { wire, label: None }
    }
}

impl From<(u64, &str)> for SwitchId {
    fn from((wire, label): (u64, &str)) -> Self {
        Self {
            wire,
            label: Some(label.to_string()),
        }
    }
}

/// A tagged union over proper layouts, discriminated by a numeric wire id.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchItem {
    /// Width of the wire id in bytes, 1..=6.
    pub id_size: usize,
    pub id_endianness: Endianness,
    /// Name of the discriminant field in decoded structs.
    pub id_tag: String,
    pub variants: Vec<(SwitchId, Vec<NamedItem>)>,
}

/// Default discriminant field name for switch items.
pub const DEFAULT_ID_TAG: &str = "id";

/// One typed field of a layout. The tag set is closed: every item is one of
/// `uint`, `int`, `bytes`, `array`, or `switch`.
#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Uint(NumItem),
    Int(NumItem),
    Bytes(BytesItem),
    Array(ArrayItem),
    Switch(SwitchItem),
}

impl Item {
    /// An unsigned integer of `size` bytes, big-endian.
    pub fn uint(size: usize) -> Self {
        Item::Uint(NumItem::new(size))
    }

    /// A signed (two's complement) integer of `size` bytes, big-endian.
    pub fn int(size: usize) -> Self {
        Item::Int(NumItem::new(size))
    }

    /// A fixed-size run of raw bytes.
    pub fn bytes(size: usize) -> Self {
        Item::Bytes(BytesItem::new(Some(size), None))
    }

    /// Raw bytes preceded by a `length_size`-byte byte-count prefix.
    pub fn bytes_prefixed(length_size: usize) -> Self {
        Item::Bytes(BytesItem::new(None, Some(length_size)))
    }

    /// Raw bytes consuming the remainder of the enclosing region. Legal only
    /// in terminal position.
    pub fn bytes_boundless() -> Self {
        Item::Bytes(BytesItem::new(None, None))
    }

    /// A fixed-length repetition of `layout`.
    pub fn array(length: usize, layout: impl Into<Layout>) -> Self {
        Item::Array(ArrayItem {
            length: Some(length),
            length_size: None,
            length_endianness: Endianness::Big,
            layout: Box::new(layout.into()),
        })
    }

    /// A repetition of `layout` preceded by an element-count prefix.
    pub fn array_prefixed(length_size: usize, layout: impl Into<Layout>) -> Self {
        Item::Array(ArrayItem {
            length: None,
            length_size: Some(length_size),
            length_endianness: Endianness::Big,
            layout: Box::new(layout.into()),
        })
    }

    /// A repetition of `layout` consuming the remainder of the enclosing
    /// region. Legal only in terminal position.
    pub fn array_boundless(layout: impl Into<Layout>) -> Self {
        Item::Array(ArrayItem {
            length: None,
            length_size: None,
            length_endianness: Endianness::Big,
            layout: Box::new(layout.into()),
        })
    }

    /// A tagged union discriminated by an `id_size`-byte wire id. The
    /// discriminant appears in decoded structs under [DEFAULT_ID_TAG]
    /// (override with [Item::id_tag]).
    pub fn switch<I: Into<SwitchId>>(
        id_size: usize,
        variants: impl IntoIterator<Item = (I, Vec<NamedItem>)>,
    ) -> Self {
        Item::Switch(SwitchItem {
            id_size,
            id_endianness: Endianness::Big,
            id_tag: DEFAULT_ID_TAG.to_string(),
            variants: variants
                .into_iter()
                .map(|(id, items)| (id.into(), items))
                .collect(),
        })
    }

    /// Sets the byte order of this item's own width field: the numeric value
    /// for `uint`/`int`, the length prefix for `bytes`/`array`, the wire id
    /// for `switch`.
    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        match &mut self {
            Item::Uint(num) | Item::Int(num) => num.endianness = endianness,
            Item::Bytes(bytes) => bytes.length_endianness = endianness,
            Item::Array(array) => array.length_endianness = endianness,
            Item::Switch(switch) => switch.id_endianness = endianness,
        }
        self
    }

    /// Shorthand for `with_endianness(Endianness::Little)`.
    pub fn little(self) -> Self {
        self.with_endianness(Endianness::Little)
    }

    /// Attaches a constant to a numeric item.
    pub fn constant(mut self, value: impl Into<BigInt>) -> Self {
        match &mut self {
            Item::Uint(num) | Item::Int(num) => num.custom = Some(NumCustom::Const(value.into())),
            _ => panic!("constant() applies to numeric items"),
        }
        self
    }

    /// Attaches a constant to a bytes item.
    pub fn constant_bytes(mut self, value: impl Into<Bytes>) -> Self {
        match &mut self {
            Item::Bytes(bytes) => bytes.custom = Some(BytesCustom::Const(value.into())),
            _ => panic!("constant_bytes() applies to bytes items"),
        }
        self
    }

    /// Attaches a fixed conversion to a numeric item: wire value `from`,
    /// decoded label `to`.
    pub fn fixed(mut self, from: impl Into<BigInt>, to: impl Into<Value>) -> Self {
        match &mut self {
            Item::Uint(num) | Item::Int(num) => {
                num.custom = Some(NumCustom::Fixed {
                    from: from.into(),
                    to: to.into(),
                })
            }
            _ => panic!("fixed() applies to numeric items"),
        }
        self
    }

    /// Attaches a fixed conversion to a bytes item. With a nested layout,
    /// `from` is a structured value serialized through that layout.
    pub fn fixed_bytes(mut self, from: impl Into<Value>, to: impl Into<Value>) -> Self {
        match &mut self {
            Item::Bytes(bytes) => {
                bytes.custom = Some(BytesCustom::Fixed {
                    from: from.into(),
                    to: to.into(),
                })
            }
            _ => panic!("fixed_bytes() applies to bytes items"),
        }
        self
    }

    /// Attaches an arbitrary user conversion to a numeric or bytes item.
    pub fn conversion(mut self, conversion: Conversion) -> Self {
        match &mut self {
            Item::Uint(num) | Item::Int(num) => num.custom = Some(NumCustom::Conv(conversion)),
            Item::Bytes(bytes) => bytes.custom = Some(BytesCustom::Conv(conversion)),
            _ => panic!("conversion() applies to numeric and bytes items"),
        }
        self
    }

    /// Drops this item from decoded/encoded structs. Legal only with a
    /// constant-like custom.
    pub fn omit(mut self) -> Self {
        match &mut self {
            Item::Uint(num) | Item::Int(num) => num.omit = true,
            Item::Bytes(bytes) => bytes.omit = true,
            _ => panic!("omit() applies to numeric and bytes items"),
        }
        self
    }

    /// Attaches a nested layout to a bytes item; the layout's serialization
    /// fills the byte region.
    pub fn nested(mut self, layout: impl Into<Layout>) -> Self {
        match &mut self {
            Item::Bytes(bytes) => bytes.layout = Some(Box::new(layout.into())),
            _ => panic!("nested() applies to bytes items"),
        }
        self
    }

    /// Overrides the discriminant field name of a switch item.
    pub fn id_tag(mut self, tag: impl Into<String>) -> Self {
        match &mut self {
            Item::Switch(switch) => switch.id_tag = tag.into(),
            _ => panic!("id_tag() applies to switch items"),
        }
        self
    }

    /// Whether this item consumes to the end of its enclosing region.
    pub fn is_boundless(&self) -> bool {
        match self {
            Item::Bytes(bytes) => bytes.is_boundless(),
            Item::Array(array) => array.is_boundless(),
            _ => false,
        }
    }

    /// Whether this item is dropped from decoded and encoded structs.
    pub fn is_omitted(&self) -> bool {
        match self {
            Item::Uint(num) | Item::Int(num) => num.omit,
            Item::Bytes(bytes) => bytes.omit,
            _ => false,
        }
    }
}

/// A named field inside a proper layout.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedItem {
    pub name: String,
    pub item: Item,
}

/// Shorthand constructor for a [NamedItem].
pub fn named(name: impl Into<String>, item: Item) -> NamedItem {
    NamedItem {
        name: name.into(),
        item,
    }
}

/// A layout: a single unnamed item, or an ordered sequence of named items.
#[derive(Clone, Debug, PartialEq)]
pub enum Layout {
    Item(Item),
    Struct(Vec<NamedItem>),
}

impl From<Item> for Layout {
    fn from(item: Item) -> Self {
        Layout::Item(item)
    }
}

impl From<Vec<NamedItem>> for Layout {
    fn from(items: Vec<NamedItem>) -> Self {
        Layout::Struct(items)
    }
}

impl Layout {
    /// Builds a proper layout from `(name, item)` pairs.
    pub fn structure<N: Into<String>>(fields: impl IntoIterator<Item = (N, Item)>) -> Self {
        Layout::Struct(
            fields
                .into_iter()
                .map(|(name, item)| named(name, item))
                .collect(),
        )
    }

    /// The named items, if this is a proper layout.
    pub fn as_struct(&self) -> Option<&[NamedItem]> {
        match self {
            Layout::Struct(items) => Some(items),
            Layout::Item(_) => None,
        }
    }

    /// Checks the model invariants, returning [Error::MalformedLayout] on
    /// the first violation. Every engine entry point validates before
    /// interpreting a layout, so a violating layout is rejected no later
    /// than its first use.
    pub fn validate(&self) -> Result<(), Error> {
        validate_layout(self, true)
    }
}

fn validate_layout(layout: &Layout, allow_boundless: bool) -> Result<(), Error> {
    match layout {
        Layout::Item(item) => validate_item(item, allow_boundless),
        Layout::Struct(items) => validate_struct(items, allow_boundless),
    }
}

fn validate_struct(items: &[NamedItem], allow_boundless: bool) -> Result<(), Error> {
    let mut names = BTreeSet::new();
    for (index, entry) in items.iter().enumerate() {
        if !names.insert(entry.name.as_str()) {
            return Err(Error::MalformedLayout("duplicate item name"));
        }
        let terminal = index + 1 == items.len();
        validate_item(&entry.item, allow_boundless && terminal)
            .map_err(|err| err.named(&entry.name))?;
    }
    Ok(())
}

fn validate_item(item: &Item, allow_boundless: bool) -> Result<(), Error> {
    match item {
        Item::Uint(num) | Item::Int(num) => {
            if num.size == 0 || num.size > 32 {
                return Err(Error::MalformedLayout("numeric size outside 1..=32"));
            }
            if num.omit && !matches!(num.custom, Some(NumCustom::Const(_) | NumCustom::Fixed { .. }))
            {
                return Err(Error::MalformedLayout("omit without a constant custom"));
            }
            Ok(())
        }
        Item::Bytes(bytes) => {
            if bytes.size.is_some() && bytes.length_size.is_some() {
                return Err(Error::MalformedLayout("size and lengthSize both set"));
            }
            if let Some(length_size) = bytes.length_size {
                check_width(length_size)?;
            }
            if bytes.is_boundless() && !allow_boundless {
                let has_fixed_payload = matches!(
                    bytes.custom,
                    Some(BytesCustom::Const(_) | BytesCustom::Fixed { .. })
                );
                if !has_fixed_payload {
                    return Err(Error::MalformedLayout(
                        "boundless item in non-terminal position",
                    ));
                }
            }
            if bytes.omit
                && !matches!(
                    bytes.custom,
                    Some(BytesCustom::Const(_) | BytesCustom::Fixed { .. })
                )
            {
                return Err(Error::MalformedLayout("omit without a constant custom"));
            }
            if let Some(nested) = &bytes.layout {
                // A sized or prefixed region bounds the nested layout, so a
                // terminal boundless sub-item is always legal there.
                validate_layout(nested, true)?;
            }
            Ok(())
        }
        Item::Array(array) => {
            if array.length.is_some() && array.length_size.is_some() {
                return Err(Error::MalformedLayout("length and lengthSize both set"));
            }
            if let Some(length_size) = array.length_size {
                check_width(length_size)?;
            }
            if array.is_boundless() && !allow_boundless {
                return Err(Error::MalformedLayout(
                    "boundless item in non-terminal position",
                ));
            }
            // Elements repeat, so nothing inside may consume to end.
            validate_layout(&array.layout, false)
        }
        Item::Switch(switch) => {
            check_width(switch.id_size)?;
            if switch.variants.is_empty() {
                return Err(Error::MalformedLayout("switch with no layouts"));
            }
            let mut ids = BTreeSet::new();
            let id_capacity = max_unsigned(switch.id_size);
            for (id, branch) in &switch.variants {
                if !ids.insert(id.wire) {
                    return Err(Error::MalformedLayout("duplicate switch id"));
                }
                if u128::from(id.wire) > id_capacity {
                    return Err(Error::MalformedLayout("switch id exceeds idSize"));
                }
                if branch.iter().any(|entry| entry.name == switch.id_tag) {
                    return Err(Error::MalformedLayout(
                        "idTag collides with a branch item name",
                    ));
                }
                validate_struct(branch, allow_boundless)?;
            }
            Ok(())
        }
    }
}

fn check_width(width: usize) -> Result<(), Error> {
    if width == 0 || width > 6 {
        return Err(Error::MalformedLayout("width outside 1..=6"));
    }
    Ok(())
}

/// Largest unsigned value representable in `size` bytes.
pub(crate) fn max_unsigned(size: usize) -> u128 {
    (1u128 << (8 * size)) - 1
}
