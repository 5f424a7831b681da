// Copyright 2023 - 2025 The faultline authors

//! Attribute macros to control how faultline mutates code.
//!
//! A function that is hard to test, or disruptive when mutated, can be
//! marked with [macro@skip].

use proc_macro::TokenStream;

/// faultline does not generate mutants inside items marked with this attribute.
///
/// ```
/// #[faults::skip]
/// pub fn some_difficult_function() {
///     // ...
/// }
/// ```
///
/// This is a no-op during compilation, but is seen by faultline as it
/// parses the source.
#[proc_macro_attribute]
pub fn skip(_attr: TokenStream, item: TokenStream) -> TokenStream {
    item
}
