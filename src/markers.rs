//! In-tree markers for every structural rewrite placement makes
//!
//! Each rewrite leaves a tag that describes how to undo it:
//!
//! - guards carry their mutant id in the `is_active(ID)` call
//! - normalized closure and match-arm bodies are labeled blocks,
//!   `'__switchboard_marker_N: { expr; }`
//! - default-initialized locals carry
//!   `#[cfg_attr(any(), switchboard_marker(id = N, engine = "default_init", was_mut = B))]`
//!
//! Because the tags live in the tree, a ledger can always be rebuilt from
//! the source with [`MarkerLedger::scan`].

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use proc_macro2::{Literal, Span};
use syn::punctuated::Punctuated;
use syn::visit::Visit;
use syn::visit_mut::VisitMut;
use syn::{Attribute, Block, Expr, ExprLit, Lit, Local, LocalInit, Meta, MetaNameValue, Pat, PatIdent, Stmt, Token};

use crate::error::{MutationError, Result};
use crate::guards::{self, branch_expr};
use crate::mutant::MutantId;

/// Prefix of the label put on normalized bodies
pub const LABEL_PREFIX: &str = "__switchboard_marker_";

/// Name of the inert attribute tagging default-initialized locals
pub const MARKER_ATTR: &str = "switchboard_marker";

const DEFAULT_INIT_ENGINE: &str = "default_init";

/// Identifies one marker in a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MarkerId {
    /// The guard of a mutant
    Guard(MutantId),
    /// A normalization or default-init rewrite, numbered per engine
    Rewrite(u32),
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerId::Guard(id) => write!(f, "guard#{id}"),
            MarkerId::Rewrite(id) => write!(f, "marker#{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Guard,
    /// Expression body wrapped in a labeled block
    BodyNormalization,
    /// Deferred local given a default value
    DefaultInit { was_mut: bool },
}

/// Index of the markers present in one tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerLedger {
    entries: BTreeMap<MarkerId, MarkerKind>,
}

impl MarkerLedger {
    pub fn record(&mut self, id: MarkerId, kind: MarkerKind) {
        self.entries.insert(id, kind);
    }

    pub fn get(&self, id: MarkerId) -> Option<MarkerKind> {
        self.entries.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MarkerId, MarkerKind)> + '_ {
        self.entries.iter().map(|(id, kind)| (*id, *kind))
    }

    /// Ids of every marker that is not a guard
    pub fn rewrites(&self) -> BTreeSet<MarkerId> {
        self.iter()
            .filter(|(_, kind)| *kind != MarkerKind::Guard)
            .map(|(id, _)| id)
            .collect()
    }

    /// Rebuild the ledger from the tags in `file`
    pub fn scan(file: &syn::File, control_module: &str) -> Self {
        let mut scanner = Scanner {
            control_module,
            ledger: MarkerLedger::default(),
        };
        scanner.visit_file(file);
        scanner.ledger
    }
}

struct Scanner<'a> {
    control_module: &'a str,
    ledger: MarkerLedger,
}

impl<'ast> Visit<'ast> for Scanner<'_> {
    fn visit_expr(&mut self, expr: &'ast Expr) {
        if let Some(id) = guards::guard_id(expr, self.control_module) {
            self.ledger.record(MarkerId::Guard(id), MarkerKind::Guard);
        }
        if let Expr::Block(block) = expr {
            if let Some(id) = block.label.as_ref().and_then(|l| label_marker(&l.name)) {
                self.ledger.record(MarkerId::Rewrite(id), MarkerKind::BodyNormalization);
            }
        }
        syn::visit::visit_expr(self, expr);
    }

    fn visit_local(&mut self, local: &'ast Local) {
        for tag in local.attrs.iter().filter_map(default_init_tag) {
            self.ledger.record(
                MarkerId::Rewrite(tag.id),
                MarkerKind::DefaultInit {
                    was_mut: tag.was_mut,
                },
            );
        }
        syn::visit::visit_local(self, local);
    }
}

/// Wrap a statement-like body as `'__switchboard_marker_N: { expr; }`
pub fn normalize_body(marker: u32, body: Expr) -> Expr {
    let label = syn::Lifetime::new(&format!("'{LABEL_PREFIX}{marker}"), Span::call_site());
    syn::parse_quote!(#label: { #body; })
}

fn label_marker(lifetime: &syn::Lifetime) -> Option<u32> {
    lifetime
        .ident
        .to_string()
        .strip_prefix(LABEL_PREFIX)?
        .parse()
        .ok()
}

/// Give a deferred `let x;` / `let x: T;` a default value
///
/// Returns `None` when the local is not a plain deferred identifier.
pub fn default_init(local: &mut Local, marker: u32) -> Option<bool> {
    if local.init.is_some() {
        return None;
    }
    let ident = plain_ident(&mut local.pat)?;
    let was_mut = ident.mutability.is_some();
    ident.mutability = Some(Default::default());
    local.init = Some(LocalInit {
        eq_token: Default::default(),
        expr: Box::new(syn::parse_quote!(::core::default::Default::default())),
        diverge: None,
    });

    let id = Literal::u32_unsuffixed(marker);
    local.attrs.push(syn::parse_quote! {
        #[cfg_attr(any(), switchboard_marker(id = #id, engine = "default_init", was_mut = #was_mut))]
    });
    Some(was_mut)
}

/// True for `let x;` and `let x: T;`
pub fn is_deferred_local(local: &Local) -> bool {
    let pat = match &local.pat {
        Pat::Type(typed) => &*typed.pat,
        pat => pat,
    };
    local.init.is_none()
        && matches!(pat, Pat::Ident(ident) if ident.by_ref.is_none() && ident.subpat.is_none())
}

fn plain_ident(pat: &mut Pat) -> Option<&mut PatIdent> {
    let pat = match pat {
        Pat::Type(typed) => &mut *typed.pat,
        pat => pat,
    };
    match pat {
        Pat::Ident(ident) if ident.by_ref.is_none() && ident.subpat.is_none() => Some(ident),
        _ => None,
    }
}

struct DefaultInitTag {
    id: u32,
    was_mut: bool,
}

fn default_init_tag(attr: &Attribute) -> Option<DefaultInitTag> {
    if !attr.path().is_ident("cfg_attr") {
        return None;
    }
    let args = attr
        .parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)
        .ok()?;
    let mut args = args.into_iter();
    match args.next()? {
        Meta::List(any) if any.path.is_ident("any") && any.tokens.is_empty() => {}
        _ => return None,
    }
    let Meta::List(marker) = args.next()? else {
        return None;
    };
    if !marker.path.is_ident(MARKER_ATTR) || args.next().is_some() {
        return None;
    }

    let fields = marker
        .parse_args_with(Punctuated::<MetaNameValue, Token![,]>::parse_terminated)
        .ok()?;
    let (mut id, mut engine, mut was_mut) = (None, None, None);
    for field in fields {
        let Expr::Lit(ExprLit { lit, .. }) = &field.value else {
            return None;
        };
        match (field.path.get_ident()?.to_string().as_str(), lit) {
            ("id", Lit::Int(value)) => id = value.base10_parse().ok(),
            ("engine", Lit::Str(value)) => engine = Some(value.value()),
            ("was_mut", Lit::Bool(value)) => was_mut = Some(value.value),
            _ => return None,
        }
    }
    if engine.as_deref() != Some(DEFAULT_INIT_ENGINE) {
        return None;
    }
    Some(DefaultInitTag {
        id: id?,
        was_mut: was_mut?,
    })
}

fn is_default_call(expr: &Expr) -> bool {
    let Expr::Call(call) = expr else {
        return false;
    };
    let Expr::Path(func) = &*call.func else {
        return false;
    };
    let segments: Vec<String> = func.path.segments.iter().map(|s| s.ident.to_string()).collect();
    call.args.is_empty() && segments.ends_with(&["Default".to_string(), "default".to_string()])
}

/// Undo every marker, guards resolving to their original branch
pub fn strip(file: &syn::File, control_module: &str) -> Result<syn::File> {
    Reverter::new(control_module, Selection::All, None).run(file)
}

/// Undo only the selected markers
pub fn revert_markers(
    file: &syn::File,
    control_module: &str,
    markers: &BTreeSet<MarkerId>,
) -> Result<syn::File> {
    Reverter::new(control_module, Selection::Only(markers), None).run(file)
}

/// The program as it behaves while `mutant` is active
///
/// The mutant's guard resolves to its mutated branch, every other guard to
/// its original branch, and every other marker is undone.
pub fn materialize(file: &syn::File, control_module: &str, mutant: MutantId) -> Result<syn::File> {
    let mut reverter = Reverter::new(control_module, Selection::All, Some(mutant));
    let materialized = reverter.run(file)?;
    if !reverter.activated {
        return Err(MutationError::AmbiguousReversal {
            marker: MarkerId::Guard(mutant).to_string(),
            reason: "no guard for this mutant in the tree".to_string(),
        });
    }
    Ok(materialized)
}

enum Selection<'a> {
    All,
    Only(&'a BTreeSet<MarkerId>),
}

impl Selection<'_> {
    fn contains(&self, id: MarkerId) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(ids) => ids.contains(&id),
        }
    }
}

struct Reverter<'a> {
    control_module: &'a str,
    selection: Selection<'a>,
    active: Option<MutantId>,
    activated: bool,
    error: Option<MutationError>,
}

impl<'a> Reverter<'a> {
    fn new(control_module: &'a str, selection: Selection<'a>, active: Option<MutantId>) -> Self {
        Self {
            control_module,
            selection,
            active,
            activated: false,
            error: None,
        }
    }

    fn run(&mut self, file: &syn::File) -> Result<syn::File> {
        let mut file = file.clone();
        self.visit_file_mut(&mut file);
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(file),
        }
    }

    /// A mutated program may legitimately lose the shape a marker expects
    fn lenient(&self) -> bool {
        self.active.is_some()
    }

    fn fail(&mut self, marker: MarkerId, reason: &str) {
        if self.error.is_none() {
            self.error = Some(MutationError::AmbiguousReversal {
                marker: marker.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    fn selected_guard(&self, expr_if: &syn::ExprIf) -> Option<MutantId> {
        guards::guarded_if(expr_if, self.control_module)
            .filter(|id| self.selection.contains(MarkerId::Guard(*id)))
    }

    /// Pick the branch a resolved guard keeps
    fn choose(&mut self, id: MutantId, expr_if: syn::ExprIf) -> Block {
        if self.active == Some(id) {
            self.activated = true;
            return expr_if.then_branch;
        }
        match expr_if.else_branch.map(|(_, e)| *e) {
            Some(Expr::Block(block)) => block.block,
            _ => {
                self.fail(MarkerId::Guard(id), "guard lost its original branch");
                Block {
                    brace_token: Default::default(),
                    stmts: Vec::new(),
                }
            }
        }
    }

    fn splice(&mut self, stmt: Stmt, out: &mut Vec<Stmt>) {
        let guard = match &stmt {
            Stmt::Expr(Expr::If(expr_if), None) => self.selected_guard(expr_if),
            _ => None,
        };
        match (guard, stmt) {
            (Some(id), Stmt::Expr(Expr::If(expr_if), None)) => {
                let branch = self.choose(id, expr_if);
                for inner in branch.stmts {
                    self.splice(inner, out);
                }
            }
            (_, mut stmt) => {
                self.visit_stmt_mut(&mut stmt);
                out.push(stmt);
            }
        }
    }

    /// Resolve a guard found in expression position
    fn resolve_expr_guard(&mut self, expr: &mut Expr) -> bool {
        let (expr_if, paren) = match expr {
            Expr::Paren(paren) => match &*paren.expr {
                Expr::If(expr_if) => (expr_if.clone(), true),
                _ => return false,
            },
            Expr::If(expr_if) => (expr_if.clone(), false),
            _ => return false,
        };
        let Some(id) = self.selected_guard(&expr_if) else {
            return false;
        };
        let branch = self.choose(id, expr_if);

        if paren {
            match branch_expr(&branch) {
                Some(inner) => *expr = inner.clone(),
                None => self.fail(MarkerId::Guard(id), "expression guard branch is not a single expression"),
            }
            return true;
        }

        // a statement guard left behind by an earlier body reversal
        match branch.stmts.as_slice() {
            [Stmt::Expr(inner, _)] => *expr = inner.clone(),
            _ if self.lenient() => {
                *expr = Expr::Block(syn::ExprBlock {
                    attrs: Vec::new(),
                    label: None,
                    block: branch,
                })
            }
            _ => self.fail(MarkerId::Guard(id), "statement guard branch is not a single statement"),
        }
        true
    }

    fn revert_label(&mut self, expr: &mut Expr) {
        let Expr::Block(block) = expr else {
            return;
        };
        let Some(id) = block.label.as_ref().and_then(|l| label_marker(&l.name)) else {
            return;
        };
        let marker = MarkerId::Rewrite(id);
        if !self.selection.contains(marker) {
            return;
        }
        if let [Stmt::Expr(_, _)] = block.block.stmts.as_slice() {
            if let Some(Stmt::Expr(inner, _)) = block.block.stmts.pop() {
                *expr = inner;
            }
        } else if self.lenient() {
            block.label = None;
        } else {
            self.fail(marker, "normalized body no longer holds a single statement");
        }
    }

    fn revert_default_init(&mut self, local: &mut Local) {
        let Some(position) = local.attrs.iter().position(|a| default_init_tag(a).is_some()) else {
            return;
        };
        let Some(tag) = default_init_tag(&local.attrs[position]) else {
            return;
        };
        let marker = MarkerId::Rewrite(tag.id);
        if !self.selection.contains(marker) {
            return;
        }
        let initialized = local
            .init
            .as_ref()
            .is_some_and(|init| init.diverge.is_none() && is_default_call(&init.expr));
        if !initialized {
            self.fail(marker, "local is no longer default-initialized");
            return;
        }
        let Some(ident) = plain_ident(&mut local.pat) else {
            self.fail(marker, "local no longer binds a plain identifier");
            return;
        };
        ident.mutability = tag.was_mut.then(Default::default);
        local.init = None;
        local.attrs.remove(position);
    }
}

impl VisitMut for Reverter<'_> {
    fn visit_block_mut(&mut self, block: &mut Block) {
        let stmts = std::mem::take(&mut block.stmts);
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            self.splice(stmt, &mut out);
        }
        block.stmts = out;
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        if self.resolve_expr_guard(expr) {
            self.visit_expr_mut(expr);
            return;
        }
        syn::visit_mut::visit_expr_mut(self, expr);
        self.revert_label(expr);
    }

    fn visit_local_mut(&mut self, local: &mut Local) {
        syn::visit_mut::visit_local_mut(self, local);
        self.revert_default_init(local);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONTROL: &str = "__switchboard";

    fn parse(source: &str) -> syn::File {
        syn::parse_file(source).unwrap()
    }

    fn print(file: &syn::File) -> String {
        prettyplease::unparse(file)
    }

    #[test]
    fn test_strip_resolves_nested_guards() {
        let instrumented = parse(
            r#"
            fn f(a: i32, b: i32) -> i32 {
                (if crate::__switchboard::is_active(0) { a - b } else {
                    (if crate::__switchboard::is_active(1) { a * b } else { a + b })
                })
            }
            "#,
        );
        let stripped = strip(&instrumented, CONTROL).unwrap();
        assert_eq!(print(&stripped), print(&parse("fn f(a: i32, b: i32) -> i32 { a + b }")));
    }

    #[test]
    fn test_materialize_selects_one_branch() {
        let instrumented = parse(
            r#"
            fn f(a: i32, b: i32) -> i32 {
                (if crate::__switchboard::is_active(0) { a - b } else {
                    (if crate::__switchboard::is_active(1) { a * b } else { a + b })
                })
            }
            "#,
        );
        let second = materialize(&instrumented, CONTROL, 1).unwrap();
        assert_eq!(print(&second), print(&parse("fn f(a: i32, b: i32) -> i32 { a * b }")));

        let missing = materialize(&instrumented, CONTROL, 9);
        assert!(matches!(missing, Err(MutationError::AmbiguousReversal { .. })));
    }

    #[test]
    fn test_statement_guard_splices_statements() {
        let instrumented = parse(
            r#"
            fn f(items: &mut Vec<i32>) {
                if crate::__switchboard::is_active(4) {} else { items.push(1); }
                items.push(2);
            }
            "#,
        );
        let removed = materialize(&instrumented, CONTROL, 4).unwrap();
        assert_eq!(
            print(&removed),
            print(&parse("fn f(items: &mut Vec<i32>) { items.push(2); }"))
        );
        let original = strip(&instrumented, CONTROL).unwrap();
        assert_eq!(
            print(&original),
            print(&parse("fn f(items: &mut Vec<i32>) { items.push(1); items.push(2); }"))
        );
    }

    #[test]
    fn test_body_normalization_round_trip() {
        let original = parse("fn f(x: &mut i32) { let g = || *x += 1; g(); }");
        let mut normalized = original.clone();
        struct Normalize;
        impl VisitMut for Normalize {
            fn visit_expr_closure_mut(&mut self, closure: &mut syn::ExprClosure) {
                let body = std::mem::replace(&mut *closure.body, Expr::Verbatim(Default::default()));
                *closure.body = normalize_body(0, body);
            }
        }
        Normalize.visit_file_mut(&mut normalized);
        assert!(print(&normalized).contains("'__switchboard_marker_0: {"));

        let ledger = MarkerLedger::scan(&normalized, CONTROL);
        assert_eq!(ledger.get(MarkerId::Rewrite(0)), Some(MarkerKind::BodyNormalization));

        let reverted = revert_markers(&normalized, CONTROL, &ledger.rewrites()).unwrap();
        assert_eq!(print(&reverted), print(&original));
    }

    #[test]
    fn test_default_init_round_trip() {
        let original = parse("fn f() -> i32 { let x: i32; x = 5; x }");
        let mut rewritten = original.clone();
        let syn::Item::Fn(func) = &mut rewritten.items[0] else {
            panic!("expected a function");
        };
        let Stmt::Local(local) = &mut func.block.stmts[0] else {
            panic!("expected a local");
        };
        assert!(is_deferred_local(local));
        assert_eq!(default_init(local, 3), Some(false));

        let printed = print(&rewritten);
        assert!(printed.contains("let mut x: i32 = ::core::default::Default::default();"));

        let ledger = MarkerLedger::scan(&rewritten, CONTROL);
        assert_eq!(
            ledger.get(MarkerId::Rewrite(3)),
            Some(MarkerKind::DefaultInit { was_mut: false })
        );
        assert_eq!(print(&strip(&rewritten, CONTROL).unwrap()), print(&original));
    }

    #[test]
    fn test_tampered_default_init_is_ambiguous() {
        let tampered = parse(
            r#"
            fn f() {
                #[cfg_attr(any(), switchboard_marker(id = 2, engine = "default_init", was_mut = false))]
                let mut x: i32 = 7;
                x = 1;
            }
            "#,
        );
        let result = strip(&tampered, CONTROL);
        assert!(matches!(result, Err(MutationError::AmbiguousReversal { .. })));
    }

    #[test]
    fn test_revert_markers_keeps_unselected_guards() {
        let instrumented = parse(
            r#"
            fn f(a: i32, b: i32) -> bool {
                (if crate::__switchboard::is_active(0) { a > b } else { a >= b })
                    && (if crate::__switchboard::is_active(1) { false } else { true })
            }
            "#,
        );
        let selected = BTreeSet::from([MarkerId::Guard(1)]);
        let reverted = revert_markers(&instrumented, CONTROL, &selected).unwrap();
        let ledger = MarkerLedger::scan(&reverted, CONTROL);
        assert_eq!(ledger.get(MarkerId::Guard(0)), Some(MarkerKind::Guard));
        assert_eq!(ledger.get(MarkerId::Guard(1)), None);
    }
}
