// Copyright 2023 - 2025 The faultline authors

//! Walk the AST of one source file and discover mutation opportunities.
//!
//! The visitor collects raw candidates (span + replacement), then the
//! exclusion filters run (pragma lines, coverage gating, disabled kinds)
//! and per-line indexes are assigned. Candidates are ordered by position
//! before indexing, so a mutant's `(line_text, index)` identity does not
//! depend on the walk order within a line.

use std::collections::BTreeSet;

use anyhow::{Context as _, Result};
use proc_macro2::TokenTree;
use syn::spanned::Spanned;
use syn::visit::Visit;
use syn::{Attribute, Expr, Ident};
use tracing::{debug_span, trace, warn};

use crate::catalog::{
    attribute_is_removable, binary_op_replacement, const_is_metadata, number_replacement,
    string_replacement, unary_op_is_deletable, MutationKind, DEFAULT_VALUE, FORMAT_MACROS,
    OPAQUE_MACROS,
};
use crate::mutant::{Mutant, MutantId};
use crate::options::Options;
use crate::source::SourceFile;
use crate::span::Span;

/// Coverage gate for one file: `None` = gating off; `Some(None)` = gating
/// on but this file has no covered lines (everything excluded);
/// `Some(Some(lines))` = only these 1-based lines are eligible.
pub type CoverageGate<'a> = Option<Option<&'a BTreeSet<usize>>>;

/// Find all mutants in one source file, in stable order.
pub fn walk_file(
    source_file: &SourceFile,
    options: &Options,
    covered: CoverageGate<'_>,
) -> Result<Vec<Mutant>> {
    let _span = debug_span!("walk_file", path = source_file.path_slashes()).entered();
    let syn_file = syn::parse_file(source_file.code())
        .with_context(|| format!("failed to parse {}", source_file.path_slashes()))?;
    let mut visitor = DiscoveryVisitor {
        candidates: Vec::new(),
        options,
    };
    visitor.visit_file(&syn_file);
    let mut candidates = visitor.candidates;

    candidates.retain(|c| {
        let line0 = c.span.start.line - 1;
        if source_file.no_mutate_lines.contains(&line0) {
            trace!(line = line0, "skip: pragma no mutate");
            return false;
        }
        match covered {
            None => true,
            Some(None) => false,
            Some(Some(lines)) => lines.contains(&c.span.start.line),
        }
    });

    // Normalize ordering before numbering: identity must not depend on
    // visitation order within a line.
    candidates.sort_by_key(|c| (c.span.start.line, c.span.start.column, c.seq));

    let mut mutants = Vec::with_capacity(candidates.len());
    let mut current_line = 0;
    let mut index = 0;
    for c in candidates {
        let line0 = c.span.start.line - 1;
        if line0 != current_line {
            current_line = line0;
            index = 0;
        }
        let line_text = source_file
            .line_text(line0)
            .unwrap_or_default()
            .to_owned();
        mutants.push(Mutant {
            source_file: source_file.clone(),
            id: MutantId {
                line_text,
                index,
                line_number: line0,
            },
            span: c.span,
            kind: c.kind,
            replacement: c.replacement,
        });
        index += 1;
    }
    Ok(mutants)
}

/// For testing: mutants from a source string with default-ish options.
#[cfg(test)]
pub fn mutants_from_str(code: &str, options: &Options) -> Result<Vec<Mutant>> {
    let source_file = SourceFile::from_code("src/lib.rs".into(), code);
    walk_file(&source_file, options, None)
}

struct RawCandidate {
    span: Span,
    kind: MutationKind,
    replacement: String,
    /// Discovery order, the sort tiebreaker for same-position candidates.
    seq: usize,
}

struct DiscoveryVisitor<'o> {
    candidates: Vec<RawCandidate>,
    options: &'o Options,
}

impl DiscoveryVisitor<'_> {
    fn collect(&mut self, span: Span, kind: MutationKind, replacement: String) {
        if !self.options.mutation_kinds.contains(&kind) {
            return;
        }
        let seq = self.candidates.len();
        self.candidates.push(RawCandidate {
            span,
            kind,
            replacement,
            seq,
        });
    }

    /// Attribute-removal candidates for a function's outer attributes.
    fn collect_attr_mutants(&mut self, attrs: &[Attribute]) {
        for attr in attrs {
            if attribute_is_removable(attr.path()) {
                let span = Span {
                    start: attr.pound_token.span.start().into(),
                    end: attr.bracket_token.span.close().end().into(),
                };
                self.collect(span, MutationKind::Attribute, String::new());
            }
        }
    }

    fn synonym_for(&self, ident: &Ident) -> Option<String> {
        self.options
            .name_synonyms
            .iter()
            .find(|(old, _)| ident == old.as_str())
            .map(|(_, new)| new.clone())
    }

    fn is_skip_call(&self, ident: &Ident) -> bool {
        self.options.skip_calls.iter().any(|s| ident == s.as_str())
    }

    fn handle_macro(&mut self, mac: &syn::Macro) {
        let Some(name) = mac.path.segments.last().map(|s| s.ident.to_string()) else {
            return;
        };
        if OPAQUE_MACROS.contains(&name.as_str()) {
            return;
        }
        if !FORMAT_MACROS.contains(&name.as_str()) {
            // Other macro bodies are opaque token streams; leave them alone.
            return;
        }
        for token in mac.tokens.clone() {
            if let TokenTree::Literal(lit) = token {
                let text = lit.to_string();
                if text.contains('"') {
                    if let Some(replacement) = string_replacement(&text) {
                        self.collect(lit.span().into(), MutationKind::FormatString, replacement);
                    }
                    return;
                }
            }
        }
    }
}

impl<'ast> Visit<'ast> for DiscoveryVisitor<'_> {
    /// Attributes are not code: doc comments and meta values must not
    /// produce mutants.
    fn visit_attribute(&mut self, _: &'ast Attribute) {}

    fn visit_file(&mut self, i: &'ast syn::File) {
        if attrs_excluded(&i.attrs) {
            trace!("file excluded by attrs");
            return;
        }
        syn::visit::visit_file(self, i);
    }

    fn visit_item_fn(&mut self, i: &'ast syn::ItemFn) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        self.collect_attr_mutants(&i.attrs);
        // Only the body: signatures and annotations are never mutated.
        self.visit_block(&i.block);
    }

    fn visit_impl_item_fn(&mut self, i: &'ast syn::ImplItemFn) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        self.collect_attr_mutants(&i.attrs);
        self.visit_block(&i.block);
    }

    fn visit_trait_item_fn(&mut self, i: &'ast syn::TraitItemFn) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        if let Some(block) = &i.default {
            self.collect_attr_mutants(&i.attrs);
            self.visit_block(block);
        }
    }

    fn visit_item_impl(&mut self, i: &'ast syn::ItemImpl) {
        if !attrs_excluded(&i.attrs) {
            syn::visit::visit_item_impl(self, i);
        }
    }

    fn visit_item_trait(&mut self, i: &'ast syn::ItemTrait) {
        if !attrs_excluded(&i.attrs) {
            syn::visit::visit_item_trait(self, i);
        }
    }

    fn visit_item_mod(&mut self, i: &'ast syn::ItemMod) {
        if !attrs_excluded(&i.attrs) {
            syn::visit::visit_item_mod(self, i);
        }
    }

    /// `use` and `extern crate` items are never mutation sites.
    fn visit_item_use(&mut self, _: &'ast syn::ItemUse) {}
    fn visit_item_extern_crate(&mut self, _: &'ast syn::ItemExternCrate) {}

    /// `macro_rules!` definitions are opaque.
    fn visit_item_macro(&mut self, _: &'ast syn::ItemMacro) {}

    fn visit_item_const(&mut self, i: &'ast syn::ItemConst) {
        if attrs_excluded(&i.attrs) || const_is_metadata(&i.ident) {
            return;
        }
        self.visit_expr(&i.expr);
    }

    fn visit_item_static(&mut self, i: &'ast syn::ItemStatic) {
        if attrs_excluded(&i.attrs) || const_is_metadata(&i.ident) {
            return;
        }
        self.visit_expr(&i.expr);
    }

    fn visit_local(&mut self, i: &'ast syn::Local) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        if let Some(init) = &i.init {
            let original = init.expr.span();
            if !expr_is_default_value(&init.expr) {
                self.collect(
                    original.into(),
                    MutationKind::Assign,
                    DEFAULT_VALUE.to_owned(),
                );
            }
            // The pattern and any type annotation are left alone.
            self.visit_expr(&init.expr);
            if let Some((_, diverge)) = &init.diverge {
                self.visit_expr(diverge);
            }
        }
    }

    fn visit_expr_assign(&mut self, i: &'ast syn::ExprAssign) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        if !expr_is_default_value(&i.right) {
            self.collect(
                i.right.span().into(),
                MutationKind::Assign,
                DEFAULT_VALUE.to_owned(),
            );
        }
        // Only the right-hand side: names on the left are assignment
        // targets, not uses.
        self.visit_expr(&i.right);
    }

    fn visit_expr_binary(&mut self, i: &'ast syn::ExprBinary) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        if let Some((_old, new, kind)) = binary_op_replacement(&i.op) {
            self.collect(i.op.span().into(), kind, new.to_owned());
        }
        syn::visit::visit_expr_binary(self, i);
    }

    fn visit_expr_unary(&mut self, i: &'ast syn::ExprUnary) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        // Deleting `!` from `!!x` would regenerate the operand unchanged
        // one level down, so double negation is never a candidate.
        let double_not = matches!(i.op, syn::UnOp::Not(_))
            && matches!(&*i.expr, Expr::Unary(inner) if matches!(inner.op, syn::UnOp::Not(_)));
        if unary_op_is_deletable(&i.op) && !double_not {
            self.collect(i.op.span().into(), MutationKind::Operator, String::new());
        }
        syn::visit::visit_expr_unary(self, i);
    }

    fn visit_expr_lit(&mut self, i: &'ast syn::ExprLit) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        match &i.lit {
            syn::Lit::Int(lit) => {
                if let Some(replacement) = number_replacement(&lit.token().to_string()) {
                    self.collect(lit.span().into(), MutationKind::Number, replacement);
                }
            }
            syn::Lit::Float(lit) => {
                if let Some(replacement) = number_replacement(&lit.token().to_string()) {
                    self.collect(lit.span().into(), MutationKind::Number, replacement);
                }
            }
            syn::Lit::Bool(lit) => {
                let replacement = if lit.value { "false" } else { "true" };
                self.collect(
                    lit.span().into(),
                    MutationKind::Keyword,
                    replacement.to_owned(),
                );
            }
            syn::Lit::Str(lit) => {
                if let Some(replacement) = string_replacement(&lit.token().to_string()) {
                    self.collect(lit.span().into(), MutationKind::Str, replacement);
                }
            }
            syn::Lit::ByteStr(lit) => {
                if let Some(replacement) = string_replacement(&lit.token().to_string()) {
                    self.collect(lit.span().into(), MutationKind::Str, replacement);
                }
            }
            _ => (),
        }
    }

    fn visit_expr_closure(&mut self, i: &'ast syn::ExprClosure) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        if !expr_is_default_value(&i.body) {
            self.collect(
                i.body.span().into(),
                MutationKind::Closure,
                DEFAULT_VALUE.to_owned(),
            );
        }
        self.visit_expr(&i.body);
    }

    fn visit_expr_struct(&mut self, i: &'ast syn::ExprStruct) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        for field in &i.fields {
            // Shorthand fields have no separate value expression to replace.
            if field.colon_token.is_some() && !expr_is_default_value(&field.expr) {
                self.collect(
                    field.expr.span().into(),
                    MutationKind::Argument,
                    DEFAULT_VALUE.to_owned(),
                );
            }
        }
        syn::visit::visit_expr_struct(self, i);
    }

    fn visit_expr_call(&mut self, i: &'ast syn::ExprCall) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        if let Expr::Path(path_expr) = &*i.func {
            if let Some(seg) = path_expr.path.segments.last() {
                if self.is_skip_call(&seg.ident) {
                    trace!(name = %seg.ident, "skip call");
                    return;
                }
                if let Some(new) = self.synonym_for(&seg.ident) {
                    self.collect(seg.ident.span().into(), MutationKind::Name, new);
                }
            }
        }
        syn::visit::visit_expr_call(self, i);
    }

    fn visit_expr_method_call(&mut self, i: &'ast syn::ExprMethodCall) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        if self.is_skip_call(&i.method) {
            trace!(name = %i.method, "skip method call");
            return;
        }
        if let Some(new) = self.synonym_for(&i.method) {
            self.collect(i.method.span().into(), MutationKind::Name, new);
        }
        syn::visit::visit_expr_method_call(self, i);
    }

    fn visit_expr_break(&mut self, i: &'ast syn::ExprBreak) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        if i.label.is_none() && i.expr.is_none() {
            self.collect(
                i.break_token.span.into(),
                MutationKind::Keyword,
                "continue".to_owned(),
            );
        }
        syn::visit::visit_expr_break(self, i);
    }

    fn visit_expr_continue(&mut self, i: &'ast syn::ExprContinue) {
        if attrs_excluded(&i.attrs) {
            return;
        }
        if i.label.is_none() {
            self.collect(
                i.continue_token.span.into(),
                MutationKind::Keyword,
                "break".to_owned(),
            );
        }
    }

    fn visit_macro(&mut self, i: &'ast syn::Macro) {
        self.handle_macro(i);
    }
}

/// An expression that is already literally `Default::default()`; replacing
/// it would record a mutation that changes nothing.
fn expr_is_default_value(expr: &Expr) -> bool {
    if let Expr::Call(call) = expr {
        if let Expr::Path(p) = &*call.func {
            return call.args.is_empty()
                && p.path.segments.len() == 2
                && p.path.segments[0].ident == "Default"
                && p.path.segments[1].ident == "default";
        }
    }
    false
}

/// True if any attr indicates this node and everything inside it should be
/// skipped: `#[test]`, `#[cfg(test)]`, `#[faults::skip]`, or the
/// `cfg_attr` form of the skip marker.
fn attrs_excluded(attrs: &[Attribute]) -> bool {
    attrs
        .iter()
        .any(|attr| attr_is_cfg_test(attr) || attr_is_test(attr) || attr_is_skip(attr))
}

fn attr_is_cfg_test(attr: &Attribute) -> bool {
    if !path_is(attr.path(), &["cfg"]) {
        return false;
    }
    let mut contains_test = false;
    if let Err(err) = attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("test") {
            contains_test = true;
        }
        Ok(())
    }) {
        warn!(?err, "unrecognized cfg attribute form; not skipping");
        return false;
    }
    contains_test
}

fn attr_is_test(attr: &Attribute) -> bool {
    attr.path().is_ident("test")
}

fn attr_is_skip(attr: &Attribute) -> bool {
    if path_is(attr.path(), &["faults", "skip"]) {
        return true;
    }
    if !path_is(attr.path(), &["cfg_attr"]) {
        return false;
    }
    let mut skip = false;
    if attr
        .parse_nested_meta(|meta| {
            if path_is(&meta.path, &["faults", "skip"]) {
                skip = true;
            }
            Ok(())
        })
        .is_err()
    {
        return false;
    }
    skip
}

fn path_is(path: &syn::Path, idents: &[&str]) -> bool {
    path.segments.iter().map(|ps| &ps.ident).eq(idents.iter())
}
