//! Structural expression matching
//!
//! Used by the configured catalog to find user-specified expressions in a
//! function body regardless of formatting or redundant parentheses.

use quote::ToTokens;
use syn::punctuated::Punctuated;
use syn::visit::Visit;
use syn::{Expr, Lit};

/// Compare two expressions structurally, ignoring spans and redundant parens
pub fn same_expr(a: &Expr, b: &Expr) -> bool {
    match (peel(a), peel(b)) {
        (Expr::Binary(a), Expr::Binary(b)) => {
            same_kind(&a.op, &b.op) && same_expr(&a.left, &b.left) && same_expr(&a.right, &b.right)
        }
        (Expr::Unary(a), Expr::Unary(b)) => same_kind(&a.op, &b.op) && same_expr(&a.expr, &b.expr),
        (Expr::Lit(a), Expr::Lit(b)) => same_lit(&a.lit, &b.lit),
        (Expr::Path(a), Expr::Path(b)) => {
            a.path.segments.len() == b.path.segments.len()
                && a.path
                    .segments
                    .iter()
                    .zip(&b.path.segments)
                    .all(|(a, b)| a.ident == b.ident)
        }
        (Expr::Call(a), Expr::Call(b)) => same_expr(&a.func, &b.func) && same_list(&a.args, &b.args),
        (Expr::MethodCall(a), Expr::MethodCall(b)) => {
            a.method == b.method && same_expr(&a.receiver, &b.receiver) && same_list(&a.args, &b.args)
        }
        (Expr::Field(a), Expr::Field(b)) => {
            same_tokens(&a.member, &b.member) && same_expr(&a.base, &b.base)
        }
        (Expr::Index(a), Expr::Index(b)) => same_expr(&a.expr, &b.expr) && same_expr(&a.index, &b.index),
        (Expr::Cast(a), Expr::Cast(b)) => same_expr(&a.expr, &b.expr) && same_tokens(&a.ty, &b.ty),
        (Expr::Reference(a), Expr::Reference(b)) => {
            a.mutability.is_some() == b.mutability.is_some() && same_expr(&a.expr, &b.expr)
        }
        (Expr::Tuple(a), Expr::Tuple(b)) => same_list(&a.elems, &b.elems),
        (Expr::Array(a), Expr::Array(b)) => same_list(&a.elems, &b.elems),
        (Expr::Return(a), Expr::Return(b)) => same_opt(a.expr.as_deref(), b.expr.as_deref()),
        (Expr::Try(a), Expr::Try(b)) => same_expr(&a.expr, &b.expr),
        (Expr::Range(a), Expr::Range(b)) => {
            same_tokens(&a.limits, &b.limits)
                && same_opt(a.start.as_deref(), b.start.as_deref())
                && same_opt(a.end.as_deref(), b.end.as_deref())
        }
        // Remaining shapes (blocks, closures, control flow) compare by tokens
        (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b) && same_tokens(a, b),
    }
}

fn peel(expr: &Expr) -> &Expr {
    match expr {
        Expr::Paren(inner) => peel(&inner.expr),
        Expr::Group(inner) => peel(&inner.expr),
        other => other,
    }
}

fn same_kind<T>(a: &T, b: &T) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn same_list<P>(a: &Punctuated<Expr, P>, b: &Punctuated<Expr, P>) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| same_expr(a, b))
}

fn same_opt(a: Option<&Expr>, b: Option<&Expr>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same_expr(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn same_tokens<T: ToTokens>(a: &T, b: &T) -> bool {
    a.to_token_stream().to_string() == b.to_token_stream().to_string()
}

fn same_lit(a: &Lit, b: &Lit) -> bool {
    match (a, b) {
        (Lit::Str(a), Lit::Str(b)) => a.value() == b.value(),
        (Lit::ByteStr(a), Lit::ByteStr(b)) => a.value() == b.value(),
        (Lit::Byte(a), Lit::Byte(b)) => a.value() == b.value(),
        (Lit::Char(a), Lit::Char(b)) => a.value() == b.value(),
        (Lit::Int(a), Lit::Int(b)) => a.base10_digits() == b.base10_digits(),
        (Lit::Float(a), Lit::Float(b)) => a.base10_digits() == b.base10_digits(),
        (Lit::Bool(a), Lit::Bool(b)) => a.value == b.value,
        (a, b) => same_tokens(a, b),
    }
}

/// Collect all function names in a file
pub fn collect_function_names(ast: &syn::File) -> Vec<String> {
    let mut collector = FunctionNames(Vec::new());
    collector.visit_file(ast);
    collector.0
}

struct FunctionNames(Vec<String>);

impl<'ast> Visit<'ast> for FunctionNames {
    fn visit_signature(&mut self, sig: &'ast syn::Signature) {
        self.0.push(sig.ident.to_string());
    }
}

/// Count occurrences of `target` inside the named function(s)
pub fn count_matches_in_function(ast: &syn::File, function: &str, target: &Expr) -> usize {
    let mut counter = MatchCounter {
        function,
        target,
        inside: false,
        count: 0,
    };
    counter.visit_file(ast);
    counter.count
}

struct MatchCounter<'a> {
    function: &'a str,
    target: &'a Expr,
    inside: bool,
    count: usize,
}

impl MatchCounter<'_> {
    fn enter(&mut self, name: &syn::Ident, visit: impl FnOnce(&mut Self)) {
        let outer = std::mem::replace(&mut self.inside, name == self.function);
        visit(self);
        self.inside = outer;
    }
}

impl<'ast> Visit<'ast> for MatchCounter<'_> {
    fn visit_item_fn(&mut self, func: &'ast syn::ItemFn) {
        self.enter(&func.sig.ident, |this| syn::visit::visit_item_fn(this, func));
    }

    fn visit_impl_item_fn(&mut self, func: &'ast syn::ImplItemFn) {
        self.enter(&func.sig.ident, |this| syn::visit::visit_impl_item_fn(this, func));
    }

    fn visit_trait_item_fn(&mut self, func: &'ast syn::TraitItemFn) {
        self.enter(&func.sig.ident, |this| syn::visit::visit_trait_item_fn(this, func));
    }

    fn visit_expr(&mut self, expr: &'ast Expr) {
        if self.inside && same_expr(expr, self.target) {
            self.count += 1;
        }
        syn::visit::visit_expr(self, expr);
    }
}
