//! Guarded mutation placement
//!
//! The engine walks function bodies, asks the catalog for candidates at each
//! eligible expression and expression statement, and wraps the node in a guard
//! per candidate. Mutant ids are handed out in pre-order, but children are
//! instrumented before their parent is wrapped, so an outer guard's original
//! branch holds the inner guards while its mutated branch holds the plain
//! original children.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use proc_macro2::Span;
use quote::ToTokens;
use syn::spanned::Spanned;
use syn::visit::Visit;
use syn::visit_mut::VisitMut;
use syn::{Attribute, Block, Expr, Local, Meta, Pat, Stmt, Type};
use tracing::debug;

use crate::catalog::{is_assign_op, Candidate, CatalogScope, MutatorCatalog, StmtCandidate};
use crate::error::{MutationError, Result};
use crate::guards;
use crate::markers::{self, MarkerId, MarkerKind, MarkerLedger};
use crate::mutant::{Location, Mutant, MutantId, MutantStatus, TestSet};

/// Default name of the module injected into the instrumented crate
pub const DEFAULT_CONTROL_MODULE: &str = "__switchboard";

/// Where guards look for the control module
#[derive(Debug, Clone)]
pub struct PlacementOptions {
    pub control_module: String,
    /// Path guards call through, `crate::<control_module>`
    pub control_path: syn::Path,
}

impl PlacementOptions {
    pub fn new(control_module: &str) -> Result<Self> {
        let control_path = syn::parse_str(&format!("crate::{control_module}")).map_err(|e| {
            MutationError::ConfigError {
                message: format!("invalid control module name '{control_module}': {e}"),
            }
        })?;
        Ok(Self {
            control_module: control_module.to_string(),
            control_path,
        })
    }
}

impl Default for PlacementOptions {
    fn default() -> Self {
        let control_path: syn::Path = syn::parse_quote!(crate::__switchboard);
        Self {
            control_module: DEFAULT_CONTROL_MODULE.to_string(),
            control_path,
        }
    }
}

/// Result of placing mutants in one file
#[derive(Debug, Clone)]
pub struct InstrumentedFile {
    pub path: PathBuf,
    pub file: syn::File,
    pub mutants: Vec<Mutant>,
    pub markers: MarkerLedger,
}

/// How code at the current position executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationContext {
    /// Evaluated at compile time, or not part of a body at all
    Excluded,
    /// Ordinary runtime code
    Runtime,
    /// Runs at most once per process
    StaticInit,
}

/// Places guards for every candidate a catalog offers
pub struct PlacementEngine {
    catalog: Box<dyn MutatorCatalog>,
    options: PlacementOptions,
    next_mutant: MutantId,
    next_marker: u32,
}

impl PlacementEngine {
    pub fn new(catalog: impl MutatorCatalog + 'static, options: PlacementOptions) -> Self {
        Self {
            catalog: Box::new(catalog),
            options,
            next_mutant: 0,
            next_marker: 0,
        }
    }

    pub fn options(&self) -> &PlacementOptions {
        &self.options
    }

    /// Number of mutants placed so far across all files
    pub fn mutant_count(&self) -> usize {
        self.next_mutant as usize
    }

    /// Instrument a copy of `file`
    pub fn place(&mut self, path: &Path, file: &syn::File) -> Result<InstrumentedFile> {
        if let Some(evidence) = instrumentation_evidence(file, &self.options.control_module) {
            return Err(MutationError::AlreadyInstrumented {
                file: path.to_path_buf(),
                evidence,
            });
        }

        let mut tree = file.clone();
        let mut placer = Placer {
            catalog: self.catalog.as_ref(),
            control: &self.options.control_path,
            file: path,
            function: None,
            context: MutationContext::Excluded,
            stmt_guard_placed: false,
            pinned: Vec::new(),
            next_mutant: self.next_mutant,
            next_marker: self.next_marker,
            mutants: Vec::new(),
            markers: MarkerLedger::default(),
        };
        placer.visit_file_mut(&mut tree);

        let Placer {
            next_mutant,
            next_marker,
            mutants,
            markers,
            ..
        } = placer;
        self.next_mutant = next_mutant;
        self.next_marker = next_marker;

        debug!(
            file = %path.display(),
            mutants = mutants.len(),
            markers = markers.len(),
            "placed mutants"
        );
        Ok(InstrumentedFile {
            path: path.to_path_buf(),
            file: tree,
            mutants,
            markers,
        })
    }
}

/// Describe why `file` already looks instrumented, if it does
pub fn instrumentation_evidence(file: &syn::File, control_module: &str) -> Option<String> {
    let has_module = file
        .items
        .iter()
        .any(|item| matches!(item, syn::Item::Mod(m) if m.ident == control_module));
    if has_module {
        return Some(format!("control module `{control_module}` is present"));
    }
    let ledger = MarkerLedger::scan(file, control_module);
    let found = ledger
        .iter()
        .next()
        .map(|(id, _)| format!("found {id} ({} markers total)", ledger.len()));
    found
}

fn is_test_item(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|attr| {
        let is_test = attr.path().segments.last().is_some_and(|s| s.ident == "test");
        let cfg_test = matches!(
            &attr.meta,
            Meta::List(list) if list.path.is_ident("cfg") && list.tokens.to_string() == "test"
        );
        is_test || cfg_test
    })
}

/// `LazyLock::new`, `LazyCell::new` and `Lazy::new`
fn is_lazy_constructor(func: &Expr) -> bool {
    let Expr::Path(path) = func else {
        return false;
    };
    let segments: Vec<_> = path.path.segments.iter().map(|s| s.ident.to_string()).collect();
    match segments.as_slice() {
        [.., ty, new] => new == "new" && matches!(ty.as_str(), "LazyLock" | "LazyCell" | "Lazy"),
        _ => false,
    }
}

fn is_once_method(method: &syn::Ident) -> bool {
    ["get_or_init", "get_or_try_init", "call_once", "call_once_force"]
        .iter()
        .any(|name| method == name)
}

/// Paths, fields, indexes and derefs name storage rather than compute values
fn is_place(expr: &Expr) -> bool {
    match expr {
        Expr::Path(_) | Expr::Field(_) | Expr::Index(_) => true,
        Expr::Unary(unary) => matches!(unary.op, syn::UnOp::Deref(_)),
        Expr::Paren(paren) => is_place(&paren.expr),
        _ => false,
    }
}

fn is_statement_like(expr: &Expr) -> bool {
    match expr {
        Expr::Assign(_) => true,
        Expr::Binary(binary) => is_assign_op(&binary.op),
        _ => false,
    }
}

/// Types whose `Default` impl needs nothing from their parameters
const DEFAULT_TYPES: &[&str] = &[
    "bool", "char", "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64",
    "u128", "usize", "f32", "f64", "String", "Vec", "Option", "VecDeque", "BTreeMap",
    "BTreeSet", "HashMap", "HashSet",
];

fn is_provably_default(ty: &Type) -> bool {
    match ty {
        Type::Path(path) if path.qself.is_none() => path
            .path
            .segments
            .last()
            .is_some_and(|segment| DEFAULT_TYPES.iter().any(|name| segment.ident == name)),
        Type::Tuple(tuple) => tuple.elems.iter().all(is_provably_default),
        Type::Paren(paren) => is_provably_default(&paren.elem),
        Type::Reference(reference) => {
            reference.mutability.is_none()
                && matches!(&*reference.elem, Type::Path(path) if path.path.is_ident("str"))
        }
        _ => false,
    }
}

/// Name of a deferred local that cannot be default-initialized
///
/// Without a type annotation the inferred type is unknown here, so those
/// locals are pinned too.
fn pinned_local(local: &Local) -> Option<String> {
    if !markers::is_deferred_local(local) {
        return None;
    }
    let pat = match &local.pat {
        Pat::Type(typed) if is_provably_default(&typed.ty) => return None,
        Pat::Type(typed) => &*typed.pat,
        pat => pat,
    };
    match pat {
        Pat::Ident(ident) => Some(ident.ident.to_string()),
        _ => None,
    }
}

/// Collects which pinned locals a subtree assigns
struct PinnedAssignments<'p> {
    pinned: &'p [String],
    assigned: BTreeSet<String>,
}

impl<'ast> Visit<'ast> for PinnedAssignments<'_> {
    fn visit_expr_assign(&mut self, assign: &'ast syn::ExprAssign) {
        if let Expr::Path(path) = &*assign.left {
            if let Some(ident) = path.path.get_ident() {
                let name = ident.to_string();
                if self.pinned.contains(&name) {
                    self.assigned.insert(name);
                }
            }
        }
        syn::visit::visit_expr_assign(self, assign);
    }
}

fn pinned_assignments<'a>(stmts: impl IntoIterator<Item = &'a Stmt>, pinned: &[String]) -> BTreeSet<String> {
    let mut finder = PinnedAssignments {
        pinned,
        assigned: BTreeSet::new(),
    };
    for stmt in stmts {
        finder.visit_stmt(stmt);
    }
    finder.assigned
}

fn render<T: ToTokens>(node: &T) -> String {
    node.to_token_stream().to_string()
}

trait Rendered {
    fn rendered(&self) -> String;
}

impl Rendered for Expr {
    fn rendered(&self) -> String {
        render(self)
    }
}

impl Rendered for Vec<Stmt> {
    fn rendered(&self) -> String {
        self.iter().map(render).collect::<Vec<_>>().join(" ")
    }
}

struct Placer<'a> {
    catalog: &'a dyn MutatorCatalog,
    control: &'a syn::Path,
    file: &'a Path,
    function: Option<String>,
    context: MutationContext,
    /// Set once a statement guard lands in the current block or below
    stmt_guard_placed: bool,
    /// Deferred locals in scope that must keep every assignment
    pinned: Vec<String>,
    next_mutant: MutantId,
    next_marker: u32,
    mutants: Vec<Mutant>,
    markers: MarkerLedger,
}

impl Placer<'_> {
    fn scope(&self) -> CatalogScope<'_> {
        CatalogScope {
            file: self.file,
            function: self.function.as_deref(),
        }
    }

    fn with_context(&mut self, context: MutationContext, visit: impl FnOnce(&mut Self)) {
        let outer = std::mem::replace(&mut self.context, context);
        visit(self);
        self.context = outer;
    }

    fn enter_fn(&mut self, sig: &syn::Signature, block: &mut Block) {
        let context = if sig.constness.is_some() {
            MutationContext::Excluded
        } else {
            MutationContext::Runtime
        };
        let outer = std::mem::replace(&mut self.function, Some(sig.ident.to_string()));
        self.with_context(context, |this| this.visit_block_mut(block));
        self.function = outer;
    }

    fn placing(&self) -> bool {
        self.context != MutationContext::Excluded
    }

    /// Statement candidates that leave every pinned local assigned
    fn statement_candidates(&self, stmt: &Stmt) -> Vec<StmtCandidate> {
        let candidates = self.catalog.mutate_stmt(stmt, &self.scope());
        if candidates.is_empty() || self.pinned.is_empty() {
            return candidates;
        }
        let assigned = pinned_assignments([stmt], &self.pinned);
        if assigned.is_empty() {
            return candidates;
        }

        let (kept, dropped): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|candidate| {
            assigned.is_subset(&pinned_assignments(&candidate.replacement, &self.pinned))
        });
        if !dropped.is_empty() {
            debug!(
                file = %self.file.display(),
                statement = %render(stmt),
                locals = ?assigned,
                candidates = dropped.len(),
                "dropping candidates that would leave a local unassigned"
            );
        }
        kept
    }

    /// Allocate ids for `candidates` and record their mutants
    fn register<T: Rendered>(
        &mut self,
        span: Span,
        original: &str,
        candidates: &[Candidate<T>],
    ) -> Vec<MutantId> {
        let mut ids = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let id = self.next_mutant;
            self.next_mutant += 1;
            self.markers.record(MarkerId::Guard(id), MarkerKind::Guard);
            self.mutants.push(Mutant {
                id,
                file: self.file.to_path_buf(),
                function: self.function.clone(),
                location: Location::from_span(span),
                original: original.to_string(),
                replacement: candidate.replacement.rendered(),
                kind: candidate.kind,
                description: candidate.description.clone(),
                must_run_against_all_tests: self.context == MutationContext::StaticInit,
                covering_tests: TestSet::default(),
                killing_tests: Default::default(),
                status: MutantStatus::NotRun,
                status_reason: None,
            });
            ids.push(id);
        }
        ids
    }

    /// Assignment targets and `&mut` operands are never guarded themselves
    fn visit_place_mut(&mut self, expr: &mut Expr) {
        if !is_place(expr) {
            self.visit_expr_mut(expr);
            return;
        }
        match expr {
            Expr::Index(index) => {
                self.visit_place_mut(&mut index.expr);
                self.visit_expr_mut(&mut index.index);
            }
            Expr::Field(field) => self.visit_place_mut(&mut field.base),
            Expr::Unary(unary) => self.visit_place_mut(&mut unary.expr),
            Expr::Paren(paren) => self.visit_place_mut(&mut paren.expr),
            _ => {}
        }
    }

    /// Wrap a statement-like closure or arm body so it can hold statement guards
    fn normalize_body(&mut self, body: &mut Expr) {
        if !self.placing() || !is_statement_like(body) {
            return;
        }
        let as_stmt = Stmt::Expr(body.clone(), Some(Default::default()));
        if self.statement_candidates(&as_stmt).is_empty() {
            return;
        }
        let marker = self.next_marker;
        self.next_marker += 1;
        let inner = std::mem::replace(body, Expr::Verbatim(Default::default()));
        *body = markers::normalize_body(marker, inner);
        self.markers
            .record(MarkerId::Rewrite(marker), MarkerKind::BodyNormalization);
    }

    fn place_stmt(&mut self, stmt: &mut Stmt) {
        if !self.placing() {
            syn::visit_mut::visit_stmt_mut(self, stmt);
            return;
        }

        let candidates = match &*stmt {
            Stmt::Expr(Expr::Macro(_), _) | Stmt::Item(_) | Stmt::Macro(_) => Vec::new(),
            Stmt::Expr(_, Some(_)) => self.statement_candidates(stmt),
            _ => {
                let dropped = self.catalog.mutate_stmt(stmt, &self.scope());
                if !dropped.is_empty() {
                    debug!(
                        file = %self.file.display(),
                        statement = %render(stmt),
                        candidates = dropped.len(),
                        "dropping candidates for unsupported statement"
                    );
                }
                Vec::new()
            }
        };

        let original = render(stmt);
        let ids = self.register(stmt.span(), &original, &candidates);
        syn::visit_mut::visit_stmt_mut(self, stmt);
        if ids.is_empty() {
            return;
        }

        let mut guarded = std::mem::replace(stmt, Stmt::Expr(Expr::Verbatim(Default::default()), None));
        for (id, candidate) in ids.into_iter().zip(candidates).rev() {
            guarded = guards::stmt_guard(self.control, id, candidate.replacement, guarded);
        }
        *stmt = guarded;
        self.stmt_guard_placed = true;
    }

    /// Default-initialize deferred locals so removed assignments still compile
    fn default_init_locals(&mut self, block: &mut Block) {
        for stmt in &mut block.stmts {
            let Stmt::Local(local) = stmt else {
                continue;
            };
            if !markers::is_deferred_local(local) || pinned_local(local).is_some() {
                continue;
            }
            let marker = self.next_marker;
            if let Some(was_mut) = markers::default_init(local, marker) {
                self.next_marker += 1;
                self.markers
                    .record(MarkerId::Rewrite(marker), MarkerKind::DefaultInit { was_mut });
            }
        }
    }
}

impl VisitMut for Placer<'_> {
    fn visit_item_fn_mut(&mut self, func: &mut syn::ItemFn) {
        if is_test_item(&func.attrs) {
            return;
        }
        self.enter_fn(&func.sig, &mut func.block);
    }

    fn visit_impl_item_fn_mut(&mut self, func: &mut syn::ImplItemFn) {
        if is_test_item(&func.attrs) {
            return;
        }
        self.enter_fn(&func.sig, &mut func.block);
    }

    fn visit_trait_item_fn_mut(&mut self, func: &mut syn::TraitItemFn) {
        if let Some(block) = &mut func.default {
            self.enter_fn(&func.sig, block);
        }
    }

    fn visit_item_mod_mut(&mut self, module: &mut syn::ItemMod) {
        if !is_test_item(&module.attrs) {
            syn::visit_mut::visit_item_mod_mut(self, module);
        }
    }

    fn visit_item_impl_mut(&mut self, item: &mut syn::ItemImpl) {
        if !is_test_item(&item.attrs) {
            syn::visit_mut::visit_item_impl_mut(self, item);
        }
    }

    fn visit_item_const_mut(&mut self, item: &mut syn::ItemConst) {
        self.with_context(MutationContext::Excluded, |this| this.visit_expr_mut(&mut item.expr));
    }

    fn visit_item_static_mut(&mut self, item: &mut syn::ItemStatic) {
        self.with_context(MutationContext::Excluded, |this| this.visit_expr_mut(&mut item.expr));
    }

    fn visit_impl_item_const_mut(&mut self, item: &mut syn::ImplItemConst) {
        self.with_context(MutationContext::Excluded, |this| this.visit_expr_mut(&mut item.expr));
    }

    fn visit_trait_item_const_mut(&mut self, item: &mut syn::TraitItemConst) {
        if let Some((_, expr)) = &mut item.default {
            self.with_context(MutationContext::Excluded, |this| this.visit_expr_mut(expr));
        }
    }

    fn visit_expr_const_mut(&mut self, block: &mut syn::ExprConst) {
        self.with_context(MutationContext::Excluded, |this| this.visit_block_mut(&mut block.block));
    }

    fn visit_expr_repeat_mut(&mut self, repeat: &mut syn::ExprRepeat) {
        self.visit_expr_mut(&mut repeat.expr);
        self.with_context(MutationContext::Excluded, |this| this.visit_expr_mut(&mut repeat.len));
    }

    // No values to mutate in these positions
    fn visit_type_mut(&mut self, _ty: &mut syn::Type) {}

    fn visit_pat_mut(&mut self, _pat: &mut syn::Pat) {}

    fn visit_attribute_mut(&mut self, _attr: &mut Attribute) {}

    fn visit_generic_argument_mut(&mut self, _arg: &mut syn::GenericArgument) {}

    fn visit_variant_mut(&mut self, _variant: &mut syn::Variant) {}

    fn visit_macro_mut(&mut self, _mac: &mut syn::Macro) {}

    fn visit_block_mut(&mut self, block: &mut Block) {
        let outer = std::mem::replace(&mut self.stmt_guard_placed, false);
        let pinned_outside = self.pinned.len();
        self.pinned.extend(block.stmts.iter().filter_map(|stmt| match stmt {
            Stmt::Local(local) => pinned_local(local),
            _ => None,
        }));
        for stmt in &mut block.stmts {
            self.place_stmt(stmt);
        }
        self.pinned.truncate(pinned_outside);
        if self.stmt_guard_placed {
            self.default_init_locals(block);
        }
        self.stmt_guard_placed |= outer;
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        let eligible = self.placing() && !matches!(expr, Expr::Paren(_) | Expr::Group(_) | Expr::Macro(_));
        let candidates = if eligible {
            self.catalog.mutate_expr(expr, &self.scope())
        } else {
            Vec::new()
        };
        let ids = if candidates.is_empty() {
            Vec::new()
        } else {
            let original = render(expr);
            self.register(expr.span(), &original, &candidates)
        };

        syn::visit_mut::visit_expr_mut(self, expr);
        if ids.is_empty() {
            return;
        }

        let mut guarded = std::mem::replace(expr, Expr::Verbatim(Default::default()));
        for (id, candidate) in ids.into_iter().zip(candidates).rev() {
            guarded = guards::expr_guard(self.control, id, candidate.replacement, guarded);
        }
        *expr = guarded;
    }

    fn visit_expr_assign_mut(&mut self, assign: &mut syn::ExprAssign) {
        self.visit_place_mut(&mut assign.left);
        self.visit_expr_mut(&mut assign.right);
    }

    fn visit_expr_binary_mut(&mut self, binary: &mut syn::ExprBinary) {
        if is_assign_op(&binary.op) {
            self.visit_place_mut(&mut binary.left);
        } else {
            self.visit_expr_mut(&mut binary.left);
        }
        self.visit_expr_mut(&mut binary.right);
    }

    fn visit_expr_reference_mut(&mut self, reference: &mut syn::ExprReference) {
        if reference.mutability.is_some() {
            self.visit_place_mut(&mut reference.expr);
        } else {
            self.visit_expr_mut(&mut reference.expr);
        }
    }

    fn visit_expr_call_mut(&mut self, call: &mut syn::ExprCall) {
        self.visit_expr_mut(&mut call.func);
        let lazy = is_lazy_constructor(&call.func);
        for arg in call.args.iter_mut() {
            if lazy && matches!(arg, Expr::Closure(_)) {
                self.with_context(MutationContext::StaticInit, |this| this.visit_expr_mut(arg));
            } else {
                self.visit_expr_mut(arg);
            }
        }
    }

    fn visit_expr_method_call_mut(&mut self, call: &mut syn::ExprMethodCall) {
        self.visit_place_mut(&mut call.receiver);
        let once = is_once_method(&call.method);
        for arg in call.args.iter_mut() {
            if once && matches!(arg, Expr::Closure(_)) {
                self.with_context(MutationContext::StaticInit, |this| this.visit_expr_mut(arg));
            } else {
                self.visit_expr_mut(arg);
            }
        }
    }

    fn visit_expr_closure_mut(&mut self, closure: &mut syn::ExprClosure) {
        self.normalize_body(&mut closure.body);
        self.visit_expr_mut(&mut closure.body);
    }

    fn visit_arm_mut(&mut self, arm: &mut syn::Arm) {
        if let Some((_, guard)) = &mut arm.guard {
            self.visit_expr_mut(guard);
        }
        self.normalize_body(&mut arm.body);
        self.visit_expr_mut(&mut arm.body);
    }
}
