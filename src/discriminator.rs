//! Compiles a fixed set of layouts into a classifier over byte buffers.
//!
//! Each candidate layout is reduced to a structural summary: inclusive
//! bounds on its serialized size and a *byte oracle* giving, for every
//! position reachable before any dynamically sized region, the set of wire
//! values the candidate accepts there. A greedy divide-and-conquer then
//! compiles the summaries into a decision tree over two primitives, buffer
//! length and byte-at-position, picking at every node whichever split
//! guarantees the largest worst-case reduction of the candidate set.
//!
//! The compiled classifier never deserializes: a positive match only
//! asserts compatibility with a single candidate's structural summary, and
//! inputs compatible with more than one candidate classify as `None`.

use crate::{
    encode::fixed_wire,
    layout::{BytesCustom, Item, Layout, NumCustom},
    num,
    size::{bounds_layout, static_layout, static_struct},
    Error,
};
use std::collections::{BTreeMap, BTreeSet};

/// Byte-oracle enumeration stops after this many positions; discrimination
/// beyond the window falls back to size splits.
const ORACLE_WINDOW: usize = 256;

/// What a candidate accepts at one byte position.
#[derive(Clone, Debug, PartialEq)]
enum Oracle {
    /// Any value: the position holds data bytes.
    Any,
    /// Exactly these values: the position holds a constant, a fixed
    /// conversion's wire bytes, or a switch id.
    Literal(BTreeSet<u8>),
}

impl Oracle {
    fn union(self, other: &Oracle) -> Oracle {
        match (self, other) {
            (Oracle::Literal(mut a), Oracle::Literal(b)) => {
                a.extend(b.iter().copied());
                Oracle::Literal(a)
            }
            _ => Oracle::Any,
        }
    }
}

/// Structural summary of one candidate layout.
struct Summary {
    min: u128,
    max: Option<u128>,
    /// Accepted values for positions `0..oracle.len()`; positions past the
    /// end (but within `max`) accept anything.
    oracle: Vec<Oracle>,
}

/// A compiled layout classifier.
///
/// Built once from an ordered list of candidate layouts; [Self::discriminate]
/// then maps any buffer to the index of the unique compatible candidate, or
/// `None` when no candidate (or more than one) is compatible.
#[derive(Debug)]
pub struct Discriminator {
    root: Node,
}

#[derive(Debug)]
enum Node {
    Leaf(Option<usize>),
    /// Dispatch on buffer length: the arm whose inclusive range contains the
    /// length wins; lengths outside every arm match no candidate.
    Size {
        arms: Vec<(u128, Option<u128>, Node)>,
    },
    /// Dispatch on the byte value at `pos`. Values without an arm fall back
    /// to the candidates that accept anything there. A buffer too short to
    /// have the byte matches no candidate at all (positions are chosen
    /// below every candidate's minimum size).
    Byte {
        pos: usize,
        arms: Vec<(u8, Node)>,
        fallback: Box<Node>,
    },
}

impl Discriminator {
    /// Compiles a classifier for the given candidates.
    pub fn build(layouts: &[Layout]) -> Result<Self, Error> {
        for layout in layouts {
            layout.validate()?;
        }
        let summaries = layouts
            .iter()
            .map(summarize)
            .collect::<Result<Vec<_>, _>>()?;
        let all: Vec<usize> = (0..summaries.len()).collect();
        let root = build_node(
            &all,
            &summaries,
            (0, None),
            &BTreeSet::new(),
        );
        Ok(Self { root })
    }

    /// Classifies a buffer, returning the index of the unique compatible
    /// candidate. Never fails: incompatible and ambiguous inputs are `None`.
    pub fn discriminate(&self, buf: &[u8]) -> Option<usize> {
        let len = buf.len() as u128;
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(result) => return *result,
                Node::Size { arms } => {
                    node = arms
                        .iter()
                        .find(|(lo, hi, _)| *lo <= len && hi.map_or(true, |hi| len <= hi))
                        .map(|(_, _, child)| child)?;
                }
                Node::Byte {
                    pos,
                    arms,
                    fallback,
                } => {
                    let value = *buf.get(*pos)?;
                    node = arms
                        .iter()
                        .find(|(arm, _)| *arm == value)
                        .map(|(_, child)| child)
                        .unwrap_or(fallback);
                }
            }
        }
    }
}

// ---------- Summaries ----------

fn summarize(layout: &Layout) -> Result<Summary, Error> {
    let (min, max) = bounds_layout(layout)?;
    let mut oracle = Vec::new();
    oracle_layout(layout, &mut oracle)?;
    oracle.truncate(ORACLE_WINDOW);
    Ok(Summary { min, max, oracle })
}

/// Appends the layout's byte oracle to `out`. Returns `false` when
/// enumeration stopped at a dynamically sized region; positions after such
/// a region have no fixed offset.
fn oracle_layout(layout: &Layout, out: &mut Vec<Oracle>) -> Result<bool, Error> {
    match layout {
        Layout::Item(item) => oracle_item(item, out),
        Layout::Struct(items) => {
            for entry in items {
                if !oracle_item(&entry.item, out)? || out.len() >= ORACLE_WINDOW {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

fn push_literals(bytes: &[u8], out: &mut Vec<Oracle>) {
    out.extend(
        bytes
            .iter()
            .map(|&byte| Oracle::Literal(BTreeSet::from([byte]))),
    );
}

fn push_any(count: usize, out: &mut Vec<Oracle>) {
    out.extend(std::iter::repeat(Oracle::Any).take(count));
}

fn oracle_item(item: &Item, out: &mut Vec<Oracle>) -> Result<bool, Error> {
    match item {
        Item::Uint(num) | Item::Int(num) => {
            let constant = match &num.custom {
                Some(NumCustom::Const(constant)) => Some(constant),
                Some(NumCustom::Fixed { from, .. }) => Some(from),
                _ => None,
            };
            match constant {
                Some(constant) => {
                    let mut wire = vec![0u8; num.size];
                    num::write_int(
                        constant,
                        num.size,
                        num.endianness,
                        matches!(item, Item::Int(_)),
                        &mut wire,
                    )?;
                    push_literals(&wire, out);
                }
                None => push_any(num.size, out),
            }
            Ok(true)
        }
        Item::Bytes(bytes) => {
            let wire = match &bytes.custom {
                Some(BytesCustom::Const(constant)) => Some(constant.clone()),
                Some(BytesCustom::Fixed { .. }) => Some(fixed_wire(bytes)?),
                _ => None,
            };
            if let Some(wire) = wire {
                if let Some(length_size) = bytes.length_size {
                    push_literals(
                        &num::uint_bytes(wire.len() as u64, length_size, bytes.length_endianness),
                        out,
                    );
                }
                push_literals(&wire, out);
                return Ok(true);
            }
            if let Some(length_size) = bytes.length_size {
                push_any(length_size, out);
                return Ok(false);
            }
            match (bytes.size, &bytes.layout) {
                (Some(size), Some(nested)) => {
                    // Constants inside a fixed-size region are enumerable;
                    // whatever the nested walk left open stays data.
                    let mut inner = Vec::new();
                    oracle_layout(nested, &mut inner)?;
                    inner.truncate(size);
                    inner.resize(size, Oracle::Any);
                    out.extend(inner);
                    Ok(true)
                }
                (Some(size), None) => {
                    push_any(size, out);
                    Ok(true)
                }
                // Boundless region: the nested layout still starts at a
                // fixed offset, so its own oracle applies.
                (None, Some(nested)) => oracle_layout(nested, out),
                (None, None) => Ok(false),
            }
        }
        Item::Array(array) => {
            if let Some(length_size) = array.length_size {
                push_any(length_size, out);
                return Ok(false);
            }
            let Some(length) = array.length else {
                return Ok(false);
            };
            let element_size = static_layout(&array.layout)?;
            for _ in 0..length {
                let mut inner = Vec::new();
                let complete = oracle_layout(&array.layout, &mut inner)?;
                match (complete, element_size) {
                    (true, _) => out.extend(inner),
                    (false, Some(size)) => {
                        inner.truncate(size);
                        inner.resize(size, Oracle::Any);
                        out.extend(inner);
                    }
                    (false, None) => {
                        out.extend(inner);
                        return Ok(false);
                    }
                }
                if out.len() >= ORACLE_WINDOW {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Item::Switch(switch) => {
            let mut id_sets = vec![BTreeSet::new(); switch.id_size];
            for (id, _) in &switch.variants {
                let wire = num::uint_bytes(id.wire, switch.id_size, switch.id_endianness);
                for (position, byte) in wire.iter().enumerate() {
                    id_sets[position].insert(*byte);
                }
            }
            out.extend(id_sets.into_iter().map(Oracle::Literal));

            // Branch content is enumerable only while every branch has the
            // same static size, keeping later offsets unambiguous.
            let mut common = None;
            for (_, branch) in &switch.variants {
                match static_struct(branch)? {
                    Some(size) if common.is_none() || common == Some(size) => {
                        common = Some(size);
                    }
                    _ => return Ok(false),
                }
            }
            let Some(size) = common else {
                return Ok(false);
            };
            let mut union: Vec<Oracle> = Vec::new();
            for (_, branch) in &switch.variants {
                let mut inner = Vec::new();
                oracle_layout(&Layout::Struct(branch.clone()), &mut inner)?;
                inner.truncate(size);
                inner.resize(size, Oracle::Any);
                union = if union.is_empty() {
                    inner
                } else {
                    union
                        .into_iter()
                        .zip(inner.iter())
                        .map(|(a, b)| a.union(b))
                        .collect()
                };
            }
            out.extend(union);
            Ok(true)
        }
    }
}

// ---------- Greedy divide-and-conquer ----------

/// Inclusive buffer-length constraint carried down the tree.
type LenRange = (u128, Option<u128>);

struct SizePlan {
    /// Disjoint inclusive length intervals with their surviving candidates.
    arms: Vec<(LenRange, Vec<usize>)>,
    reduction: usize,
    /// Whether the split refines anything: more than one arm, a shrunken
    /// arm, or lengths in range that match no candidate.
    progress: bool,
}

struct BytePlan {
    pos: usize,
    arms: BTreeMap<u8, Vec<usize>>,
    /// Candidates accepting any value at `pos`.
    fallback: Vec<usize>,
    reduction: usize,
    progress: bool,
}

fn build_node(
    candidates: &[usize],
    summaries: &[Summary],
    range: LenRange,
    used: &BTreeSet<usize>,
) -> Node {
    // Drop candidates whose size bounds no longer intersect the constraint.
    let candidates: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&index| {
            let summary = &summaries[index];
            summary.max.map_or(true, |max| max >= range.0)
                && range.1.map_or(true, |hi| summary.min <= hi)
        })
        .collect();

    match candidates.as_slice() {
        [] => Node::Leaf(None),
        // A single survivor still gets its size bounds asserted; a match
        // must be compatible with the candidate's summary.
        [index] => {
            let summary = &summaries[*index];
            Node::Size {
                arms: vec![(summary.min, summary.max, Node::Leaf(Some(*index)))],
            }
        }
        _ => {
            let size_plan = plan_size(&candidates, summaries, range);
            let byte_plan = plan_byte(&candidates, summaries, used);
            let byte_reduction = byte_plan.as_ref().map_or(0, |plan| plan.reduction);

            // Largest guaranteed worst-case reduction wins; ties prefer the
            // size split (cheaper to test).
            if let Some(plan) = size_plan {
                if plan.progress && plan.reduction >= byte_reduction {
                    return Node::Size {
                        arms: plan
                            .arms
                            .into_iter()
                            .map(|(arm_range, members)| {
                                let child = if members == candidates && arm_range == range {
                                    Node::Leaf(None)
                                } else {
                                    build_node(&members, summaries, arm_range, used)
                                };
                                (arm_range.0, arm_range.1, child)
                            })
                            .collect(),
                    };
                }
            }
            if let Some(plan) = byte_plan {
                if plan.progress {
                    let mut used = used.clone();
                    used.insert(plan.pos);
                    let fallback = build_node(&plan.fallback, summaries, range, &used);
                    return Node::Byte {
                        pos: plan.pos,
                        arms: plan
                            .arms
                            .into_iter()
                            .map(|(value, members)| {
                                (value, build_node(&members, summaries, range, &used))
                            })
                            .collect(),
                        fallback: Box::new(fallback),
                    };
                }
            }
            // No strategy tells the remaining candidates apart: never pick
            // an arbitrary winner.
            Node::Leaf(None)
        }
    }
}

fn plan_size(candidates: &[usize], summaries: &[Summary], range: LenRange) -> Option<SizePlan> {
    let (lo, hi) = range;
    // Interval starts: every candidate min and the point past every
    // candidate max, clipped to the current constraint. Within each
    // resulting interval the surviving set is constant.
    let mut cuts = BTreeSet::from([lo]);
    for &index in candidates {
        let summary = &summaries[index];
        for cut in [Some(summary.min), summary.max.map(|max| max + 1)]
            .into_iter()
            .flatten()
        {
            if cut > lo && hi.map_or(true, |hi| cut <= hi) {
                cuts.insert(cut);
            }
        }
    }
    let cuts: Vec<u128> = cuts.into_iter().collect();

    let mut arms: Vec<(LenRange, Vec<usize>)> = Vec::new();
    let mut covered = true;
    for (position, &arm_lo) in cuts.iter().enumerate() {
        let arm_hi = cuts.get(position + 1).map(|next| next - 1).or(hi);
        let members: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&index| {
                let summary = &summaries[index];
                summary.min <= arm_lo && summary.max.map_or(true, |max| arm_lo <= max)
            })
            .collect();
        if members.is_empty() {
            covered = false;
            continue;
        }
        // Coalesce adjacent intervals with identical survivors.
        if let Some(((_, prev_hi), prev_members)) = arms.last_mut() {
            if *prev_members == members && prev_hi.map(|hi| hi + 1) == Some(arm_lo) {
                *prev_hi = arm_hi;
                continue;
            }
        }
        arms.push(((arm_lo, arm_hi), members));
    }

    let worst = arms.iter().map(|(_, members)| members.len()).max()?;
    let progress = arms.len() > 1
        || !covered
        || arms
            .iter()
            .any(|(_, members)| members.len() < candidates.len());
    Some(SizePlan {
        arms,
        reduction: candidates.len() - worst,
        progress,
    })
}

fn plan_byte(
    candidates: &[usize],
    summaries: &[Summary],
    used: &BTreeSet<usize>,
) -> Option<BytePlan> {
    // Only positions every candidate is guaranteed to have: a buffer too
    // short for the position then matches no candidate at all.
    let group_min = candidates.iter().map(|&index| summaries[index].min).min()?;
    let limit = group_min.min(ORACLE_WINDOW as u128) as usize;

    let mut best: Option<BytePlan> = None;
    for pos in (0..limit).filter(|pos| !used.contains(pos)) {
        let mut fallback = Vec::new();
        let mut literal_values = BTreeSet::new();
        for &index in candidates {
            match summaries[index].oracle.get(pos) {
                Some(Oracle::Literal(set)) => literal_values.extend(set.iter().copied()),
                _ => fallback.push(index),
            }
        }
        if literal_values.is_empty() {
            continue;
        }

        let mut arms: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
        for value in literal_values {
            let members: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|&index| match summaries[index].oracle.get(pos) {
                    Some(Oracle::Literal(set)) => set.contains(&value),
                    _ => true,
                })
                .collect();
            arms.insert(value, members);
        }

        let worst = arms
            .values()
            .map(Vec::len)
            .chain(std::iter::once(fallback.len()))
            .max()
            .unwrap_or(0);
        let reduction = candidates.len() - worst;
        let progress = arms
            .values()
            .map(Vec::len)
            .chain(std::iter::once(fallback.len()))
            .any(|count| count < candidates.len());
        if !progress {
            continue;
        }
        // Strictly-greater keeps the smallest winning position.
        if reduction > best.as_ref().map_or(0, |plan| plan.reduction) || best.is_none() {
            best = Some(BytePlan {
                pos,
                arms,
                fallback,
                reduction,
                progress,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::named;
    use crate::{encode, Value};

    #[test]
    fn test_size_only() {
        let ipv4 = Layout::Item(Item::array(4, Item::uint(1)));
        let ipv6 = Layout::Item(Item::array(8, Item::uint(2)));
        let discriminator = Discriminator::build(&[ipv4, ipv6]).unwrap();
        assert_eq!(discriminator.discriminate(&[0u8; 4]), Some(0));
        assert_eq!(discriminator.discriminate(&[0u8; 16]), Some(1));
        assert_eq!(discriminator.discriminate(&[0u8; 5]), None);
    }

    #[test]
    fn test_byte_and_size() {
        let a = Layout::structure([
            ("magic", Item::uint(2).constant(0u64)),
            ("data", Item::uint(1)),
        ]);
        let b = Layout::structure([
            ("magic", Item::bytes(2).constant_bytes(vec![1u8, 1])),
            ("data", Item::uint(1)),
        ]);
        let c = Layout::structure([("data", Item::uint(2))]);
        let discriminator = Discriminator::build(&[a, b, c]).unwrap();

        assert_eq!(discriminator.discriminate(&[0, 0, 0]), Some(0));
        assert_eq!(discriminator.discriminate(&[1, 1, 0]), Some(1));
        assert_eq!(discriminator.discriminate(&[0, 0]), Some(2));
        assert_eq!(discriminator.discriminate(&[0, 1, 0]), Some(0));
        assert_eq!(discriminator.discriminate(&[1, 0, 0]), Some(1));
        assert_eq!(discriminator.discriminate(&[2, 0, 0]), None);
        assert_eq!(discriminator.discriminate(&[1, 0, 0, 0]), None);
        assert_eq!(discriminator.discriminate(&[0]), None);
    }

    #[test]
    fn test_switch_ids_discriminate() {
        let ping = Layout::Item(Item::switch(1, [(1u64, vec![named("seq", Item::uint(2))])]));
        let pong = Layout::Item(Item::switch(1, [(2u64, vec![named("seq", Item::uint(2))])]));
        let discriminator = Discriminator::build(&[ping, pong]).unwrap();
        assert_eq!(discriminator.discriminate(&[1, 0, 0]), Some(0));
        assert_eq!(discriminator.discriminate(&[2, 0, 0]), Some(1));
        assert_eq!(discriminator.discriminate(&[3, 0, 0]), None);
    }

    #[test]
    fn test_indistinguishable_candidates_never_match() {
        let a = Layout::Item(Item::uint(2));
        let b = Layout::Item(Item::uint(2));
        let discriminator = Discriminator::build(&[a, b]).unwrap();
        assert_eq!(discriminator.discriminate(&[0, 0]), None);
        assert_eq!(discriminator.discriminate(&[1, 2]), None);
        assert_eq!(discriminator.discriminate(&[0]), None);
    }

    #[test]
    fn test_ambiguous_inputs_stay_none() {
        let bounded = Layout::structure([("port", Item::uint(2))]);
        let unbounded = Layout::structure([
            ("tag", Item::uint(1).constant(9u64)),
            ("rest", Item::bytes_boundless()),
        ]);
        let discriminator = Discriminator::build(&[bounded, unbounded]).unwrap();

        assert_eq!(discriminator.discriminate(&[0, 80]), Some(0));
        assert_eq!(discriminator.discriminate(&[9, 1, 2, 3, 4]), Some(1));
        // Length 2 with a 9 tag fits both candidates: ambiguous, so none.
        assert_eq!(discriminator.discriminate(&[9, 5]), None);
        assert_eq!(discriminator.discriminate(&[8, 5]), Some(0));
        assert_eq!(discriminator.discriminate(&[]), None);
    }

    #[test]
    fn test_classifier_agrees_with_decoder() {
        let layouts = [
            Layout::structure([
                ("kind", Item::uint(1).constant(1u64)),
                ("port", Item::uint(2)),
            ]),
            Layout::structure([
                ("kind", Item::uint(1).constant(2u64)),
                ("addr", Item::bytes(4)),
            ]),
        ];
        let discriminator = Discriminator::build(&layouts).unwrap();

        let first = encode(
            &layouts[0],
            &Value::structure([("kind", Value::U64(1)), ("port", Value::U64(80))]),
        )
        .unwrap();
        assert_eq!(discriminator.discriminate(&first), Some(0));

        let second = encode(
            &layouts[1],
            &Value::structure([
                ("kind", Value::U64(2)),
                ("addr", Value::bytes(vec![127u8, 0, 0, 1])),
            ]),
        )
        .unwrap();
        assert_eq!(discriminator.discriminate(&second), Some(1));
    }

    #[test]
    fn test_length_prefixed_strings_by_leading_constant() {
        // Same shape, different leading constants, dynamic tails.
        let a = Layout::structure([
            ("kind", Item::uint(1).constant(10u64)),
            ("name", Item::bytes_prefixed(1)),
        ]);
        let b = Layout::structure([
            ("kind", Item::uint(1).constant(20u64)),
            ("name", Item::bytes_prefixed(1)),
        ]);
        let discriminator = Discriminator::build(&[a, b]).unwrap();
        assert_eq!(discriminator.discriminate(&[10, 2, b'h', b'i']), Some(0));
        assert_eq!(discriminator.discriminate(&[20, 0]), Some(1));
        assert_eq!(discriminator.discriminate(&[30, 0]), None);
    }
}
