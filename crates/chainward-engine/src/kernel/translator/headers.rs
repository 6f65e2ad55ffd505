//! Header merge across policies.
//!
//! Per header name, operations are replayed in chain order and collapsed:
//! - last op Remove: emit one remove.
//! - last op Set: emit that Set only.
//! - last op Append: find the nearest Set/Remove before it. A Set is
//!   emitted followed by every Append after it; a Remove is dropped and only
//!   the Appends after it are emitted; with neither, all Appends are emitted.
//!
//! Names are emitted in order of first appearance so output is stable.

use chainward_core::HeaderOp;

use crate::proto::{header_value_option::HeaderAppendAction, HeaderMutation, HeaderValue, HeaderValueOption};

pub const CONTENT_LENGTH: &str = "content-length";

/// One header instruction after merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergedHeader {
    /// Overwrite-if-exists-or-add.
    Overwrite { name: String, value: String },
    /// Append-if-exists-or-add.
    Append { name: String, value: String },
    Remove { name: String },
}

impl MergedHeader {
    pub fn name(&self) -> &str {
        match self {
            MergedHeader::Overwrite { name, .. }
            | MergedHeader::Append { name, .. }
            | MergedHeader::Remove { name } => name,
        }
    }
}

/// Collapse per-policy header operations into the minimal ordered set.
pub fn merge_header_ops<'a, I>(ops: I) -> Vec<MergedHeader>
where
    I: IntoIterator<Item = &'a HeaderOp>,
{
    let mut by_name: Vec<(String, Vec<&'a HeaderOp>)> = Vec::new();
    for op in ops {
        let name = op.name().to_ascii_lowercase();
        match by_name.iter_mut().find(|(n, _)| *n == name) {
            Some((_, list)) => list.push(op),
            None => by_name.push((name, vec![op])),
        }
    }

    let mut out = Vec::new();
    for (name, list) in by_name {
        merge_one(&name, &list, &mut out);
    }
    out
}

fn merge_one(name: &str, ops: &[&HeaderOp], out: &mut Vec<MergedHeader>) {
    let Some(last) = ops.last() else { return };
    match last {
        HeaderOp::Remove { .. } => out.push(MergedHeader::Remove { name: name.into() }),
        HeaderOp::Set { value, .. } => out.push(MergedHeader::Overwrite {
            name: name.into(),
            value: value.clone(),
        }),
        HeaderOp::Append { .. } => {
            let anchor = ops
                .iter()
                .rposition(|op| !matches!(op, HeaderOp::Append { .. }));
            let start = match anchor {
                Some(i) => {
                    if let HeaderOp::Set { value, .. } = ops[i] {
                        out.push(MergedHeader::Overwrite {
                            name: name.into(),
                            value: value.clone(),
                        });
                    }
                    i + 1
                }
                None => 0,
            };
            for op in &ops[start..] {
                if let HeaderOp::Append { value, .. } = op {
                    out.push(MergedHeader::Append {
                        name: name.into(),
                        value: value.clone(),
                    });
                }
            }
        }
    }
}

/// Drop policy-supplied `content-length` and append the authoritative one.
pub fn with_content_length(mut merged: Vec<MergedHeader>, body_len: usize) -> Vec<MergedHeader> {
    merged.retain(|h| !h.name().eq_ignore_ascii_case(CONTENT_LENGTH));
    merged.push(MergedHeader::Overwrite {
        name: CONTENT_LENGTH.into(),
        value: body_len.to_string(),
    });
    merged
}

/// Build the proxy header mutation. Values go out as `raw_value`.
pub fn to_header_mutation(merged: &[MergedHeader]) -> HeaderMutation {
    let mut mutation = HeaderMutation::default();
    for h in merged {
        match h {
            MergedHeader::Overwrite { name, value } => mutation.set_headers.push(header_value_option(
                name,
                value,
                HeaderAppendAction::OverwriteIfExistsOrAdd,
            )),
            MergedHeader::Append { name, value } => mutation.set_headers.push(header_value_option(
                name,
                value,
                HeaderAppendAction::AppendIfExistsOrAdd,
            )),
            MergedHeader::Remove { name } => mutation.remove_headers.push(name.clone()),
        }
    }
    mutation
}

pub fn header_value_option(name: &str, value: &str, action: HeaderAppendAction) -> HeaderValueOption {
    HeaderValueOption {
        header: Some(HeaderValue {
            key: name.to_string(),
            value: String::new(),
            raw_value: value.as_bytes().to_vec(),
        }),
        append_action: action as i32,
        keep_empty_value: true,
    }
}
