// Copyright 2023 - 2025 The faultline authors

//! The mutation catalog: per-node-kind pure rules mapping an original
//! fragment to candidate replacements.
//!
//! Each rule returns zero or more replacements; a mutant is only recorded
//! when the replacement differs from the original text. The visitor in
//! [crate::visit] decides *where* rules fire; this module decides *what*
//! they produce.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use syn::{BinOp, UnOp};

/// Replacement spliced in for deleted initializers, closure bodies and
/// struct-field values.
pub const DEFAULT_VALUE: &str = "Default::default()";

/// Marker wrapped around the content of mutated string literals.
pub const STRING_SENTINEL: &str = "XX";

/// Call-site names never descended into by default; arguments of calls to
/// these are plain construction, and mutating them is noise.
pub const DEFAULT_SKIP_CALLS: &[&str] = &["with_capacity"];

/// The closed set of mutation kinds.
///
/// `--enable-mutation-types` / `--disable-mutation-types` name these.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    /// Swap a binary or compound-assignment operator, or delete a unary one.
    Operator,
    /// `true`/`false`, `break`/`continue`.
    Keyword,
    /// `&&` and `||`.
    Logical,
    /// Bump a numeric literal by one.
    Number,
    /// Swap a call-site identifier listed in the name-synonym table.
    Name,
    /// Wrap the content of a string literal in sentinel markers.
    #[strum(serialize = "string")]
    #[serde(rename = "string")]
    Str,
    /// Wrap the literal text of a formatting macro's template.
    FormatString,
    /// Replace a named struct-expression field value.
    Argument,
    /// Replace a closure body.
    Closure,
    /// Replace a `let` initializer or assignment right-hand side.
    Assign,
    /// Remove a removable function attribute.
    Attribute,
}

impl MutationKind {
    pub fn all() -> BTreeSet<MutationKind> {
        MutationKind::iter().collect()
    }
}

/// The operator swap table.
///
/// Returns `(original, replacement, kind)`; `&&`/`||` are classified as
/// [MutationKind::Logical] so they can be gated independently.
pub fn binary_op_replacement(op: &BinOp) -> Option<(&'static str, &'static str, MutationKind)> {
    use MutationKind::{Logical, Operator};
    let (old, new, kind) = match op {
        BinOp::Add(_) => ("+", "-", Operator),
        BinOp::Sub(_) => ("-", "+", Operator),
        BinOp::Mul(_) => ("*", "/", Operator),
        BinOp::Div(_) => ("/", "*", Operator),
        BinOp::Rem(_) => ("%", "/", Operator),
        BinOp::Shl(_) => ("<<", ">>", Operator),
        BinOp::Shr(_) => (">>", "<<", Operator),
        BinOp::BitAnd(_) => ("&", "|", Operator),
        BinOp::BitOr(_) => ("|", "&", Operator),
        BinOp::BitXor(_) => ("^", "&", Operator),
        BinOp::Eq(_) => ("==", "!=", Operator),
        BinOp::Ne(_) => ("!=", "==", Operator),
        BinOp::Le(_) => ("<=", "<", Operator),
        BinOp::Lt(_) => ("<", "<=", Operator),
        BinOp::Ge(_) => (">=", ">", Operator),
        BinOp::Gt(_) => (">", ">=", Operator),
        BinOp::AddAssign(_) => ("+=", "-=", Operator),
        BinOp::SubAssign(_) => ("-=", "+=", Operator),
        BinOp::MulAssign(_) => ("*=", "/=", Operator),
        BinOp::DivAssign(_) => ("/=", "*=", Operator),
        BinOp::RemAssign(_) => ("%=", "/=", Operator),
        BinOp::ShlAssign(_) => ("<<=", ">>=", Operator),
        BinOp::ShrAssign(_) => (">>=", "<<=", Operator),
        BinOp::BitAndAssign(_) => ("&=", "|=", Operator),
        BinOp::BitOrAssign(_) => ("|=", "&=", Operator),
        BinOp::BitXorAssign(_) => ("^=", "&=", Operator),
        BinOp::And(_) => ("&&", "||", Logical),
        BinOp::Or(_) => ("||", "&&", Logical),
        _ => return None,
    };
    Some((old, new, kind))
}

/// Unary `-` and `!` are deleted. Deref `*` and raw-ref operators are not
/// touched.
pub fn unary_op_is_deletable(op: &UnOp) -> bool {
    matches!(op, UnOp::Neg(_) | UnOp::Not(_))
}

/// Bump an integer or float literal by one, preserving radix, `_`-free
/// digits aside, and any type suffix.
///
/// `1` → `2`, `0x1f` → `0x20`, `0o7` → `0o10`, `0b1` → `0b10`,
/// `1u32` → `2u32`, `1_000` → `1001`, `1.5` → `2.5`, `1e2` → `2e2`.
pub fn number_replacement(literal: &str) -> Option<String> {
    let cleaned: String = literal.chars().filter(|c| *c != '_').collect();
    if let Some(digits) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        let (digits, suffix) = split_int_suffix(digits, 16);
        let value = u128::from_str_radix(digits, 16).ok()?;
        return Some(format!("0x{:x}{}", value.checked_add(1)?, suffix));
    }
    if let Some(digits) = cleaned
        .strip_prefix("0o")
        .or_else(|| cleaned.strip_prefix("0O"))
    {
        let (digits, suffix) = split_int_suffix(digits, 8);
        let value = u128::from_str_radix(digits, 8).ok()?;
        return Some(format!("0o{:o}{}", value.checked_add(1)?, suffix));
    }
    if let Some(digits) = cleaned
        .strip_prefix("0b")
        .or_else(|| cleaned.strip_prefix("0B"))
    {
        let (digits, suffix) = split_int_suffix(digits, 2);
        let value = u128::from_str_radix(digits, 2).ok()?;
        return Some(format!("0b{:b}{}", value.checked_add(1)?, suffix));
    }
    if cleaned.contains('.') || cleaned.contains(['e', 'E']) && !cleaned.ends_with(['e', 'E']) {
        return float_replacement(&cleaned);
    }
    let (digits, suffix) = split_int_suffix(&cleaned, 10);
    let value: u128 = digits.parse().ok()?;
    Some(format!("{}{}", value.checked_add(1)?, suffix))
}

/// Split trailing type-suffix characters (`u8`, `i64`, `f32`, …) from the
/// digits of an integer literal.
fn split_int_suffix(s: &str, radix: u32) -> (&str, &str) {
    let end = s
        .char_indices()
        .take_while(|(_, c)| c.is_digit(radix))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    (&s[..end], &s[end..])
}

/// Bump the mantissa of a float literal, keeping any exponent and suffix.
fn float_replacement(cleaned: &str) -> Option<String> {
    let (body, suffix) = if let Some(body) = cleaned.strip_suffix("f32") {
        (body, "f32")
    } else if let Some(body) = cleaned.strip_suffix("f64") {
        (body, "f64")
    } else {
        (cleaned, "")
    };
    if let Some(at) = body.find(['e', 'E']) {
        let (mantissa, exponent) = body.split_at(at);
        let value: f64 = mantissa.parse().ok()?;
        Some(format!("{}{}{}", value + 1.0, exponent, suffix))
    } else {
        let value: f64 = body.parse().ok()?;
        let bumped = value + 1.0;
        if bumped.fract() == 0.0 {
            Some(format!("{bumped:.1}{suffix}"))
        } else {
            Some(format!("{bumped}{suffix}"))
        }
    }
}

/// Wrap the inside of a (non-raw) string literal in sentinel markers.
///
/// `"abc"` → `"XXabcXX"`, `b"abc"` → `b"XXabcXX"`. Raw strings are skipped;
/// like the doc-style triple-quoted strings they descend from, mutating
/// them is meaningless often enough that the noise is not worth it.
pub fn string_replacement(literal: &str) -> Option<String> {
    let open = literal.find('"')?;
    let prefix = &literal[..open];
    if prefix.contains(['r', 'R']) {
        return None;
    }
    let body = &literal[open + 1..literal.len() - 1];
    Some(format!(
        "{prefix}\"{STRING_SENTINEL}{body}{STRING_SENTINEL}\""
    ))
}

/// Macros whose first string literal is a format template; the template's
/// literal text is mutated, its `{…}` interpolations are not.
pub const FORMAT_MACROS: &[&str] = &[
    "format",
    "print",
    "println",
    "eprint",
    "eprintln",
    "write",
    "writeln",
    "panic",
    "assert",
    "todo",
    "unimplemented",
];

/// Macros never descended into; their arguments reference the build
/// environment, not program behavior.
pub const OPAQUE_MACROS: &[&str] = &["include", "include_str", "include_bytes", "env", "cfg"];

/// Attributes that may be deleted without changing what the item *is*:
/// hints, not structure.
pub fn attribute_is_removable(path: &syn::Path) -> bool {
    const REMOVABLE: &[&str] = &[
        "inline",
        "must_use",
        "track_caller",
        "cold",
        "instrument",
    ];
    path.segments
        .last()
        .is_some_and(|seg| REMOVABLE.iter().any(|r| seg.ident == r))
}

/// Item-level `const`/`static` names that hold module metadata; mutating
/// them is known useless.
pub fn const_is_metadata(ident: &syn::Ident) -> bool {
    const METADATA: &[&str] = &["VERSION", "AUTHORS", "LICENSE", "COPYRIGHT"];
    METADATA.iter().any(|m| ident == m)
}

/// The default name-synonym table for [MutationKind::Name].
pub fn default_name_synonyms() -> Vec<(String, String)> {
    vec![
        ("min".to_owned(), "max".to_owned()),
        ("max".to_owned(), "min".to_owned()),
    ]
}
