//! Mutation catalogs
//!
//! A catalog answers one question: given this node, which replacements should
//! be tried? Placement, ids and guards are handled elsewhere.

use std::path::{Path, PathBuf};

use syn::{BinOp, Expr, Lit, Stmt, UnOp};

use crate::config::MutationConfig;
use crate::error::{MutationError, Result};
use crate::matcher::same_expr;
use crate::mutant::MutatorKind;

/// One candidate replacement for a node
#[derive(Debug, Clone)]
pub struct Candidate<T> {
    pub replacement: T,
    pub kind: MutatorKind,
    pub description: String,
}

pub type ExprCandidate = Candidate<Expr>;

/// Replacement statements for a statement; empty means removal
pub type StmtCandidate = Candidate<Vec<Stmt>>;

/// Where the node being mutated lives
#[derive(Debug, Clone, Copy)]
pub struct CatalogScope<'a> {
    pub file: &'a Path,
    pub function: Option<&'a str>,
}

/// Source of candidate mutations for expression and statement nodes
pub trait MutatorCatalog {
    fn mutate_expr(&self, expr: &Expr, scope: &CatalogScope<'_>) -> Vec<ExprCandidate>;

    fn mutate_stmt(&self, _stmt: &Stmt, _scope: &CatalogScope<'_>) -> Vec<StmtCandidate> {
        Vec::new()
    }
}

/// Several catalogs queried in order
#[derive(Default)]
pub struct CatalogSet {
    catalogs: Vec<Box<dyn MutatorCatalog>>,
}

impl CatalogSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, catalog: impl MutatorCatalog + 'static) -> Self {
        self.catalogs.push(Box::new(catalog));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.catalogs.is_empty()
    }
}

impl MutatorCatalog for CatalogSet {
    fn mutate_expr(&self, expr: &Expr, scope: &CatalogScope<'_>) -> Vec<ExprCandidate> {
        self.catalogs
            .iter()
            .flat_map(|c| c.mutate_expr(expr, scope))
            .collect()
    }

    fn mutate_stmt(&self, stmt: &Stmt, scope: &CatalogScope<'_>) -> Vec<StmtCandidate> {
        self.catalogs
            .iter()
            .flat_map(|c| c.mutate_stmt(stmt, scope))
            .collect()
    }
}

/// Built-in operator tables
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCatalog;

impl DefaultCatalog {
    fn binary_swaps(op: &BinOp) -> Vec<(BinOp, MutatorKind)> {
        use MutatorKind::*;
        match op {
            BinOp::Add(_) => vec![(BinOp::Sub(Default::default()), Arithmetic)],
            BinOp::Sub(_) => vec![(BinOp::Add(Default::default()), Arithmetic)],
            BinOp::Mul(_) => vec![(BinOp::Div(Default::default()), Arithmetic)],
            BinOp::Div(_) => vec![(BinOp::Mul(Default::default()), Arithmetic)],
            BinOp::Rem(_) => vec![(BinOp::Mul(Default::default()), Arithmetic)],
            BinOp::Lt(_) => vec![
                (BinOp::Le(Default::default()), Boundary),
                (BinOp::Ge(Default::default()), Equality),
            ],
            BinOp::Le(_) => vec![
                (BinOp::Lt(Default::default()), Boundary),
                (BinOp::Gt(Default::default()), Equality),
            ],
            BinOp::Gt(_) => vec![
                (BinOp::Ge(Default::default()), Boundary),
                (BinOp::Le(Default::default()), Equality),
            ],
            BinOp::Ge(_) => vec![
                (BinOp::Gt(Default::default()), Boundary),
                (BinOp::Lt(Default::default()), Equality),
            ],
            BinOp::Eq(_) => vec![(BinOp::Ne(Default::default()), Equality)],
            BinOp::Ne(_) => vec![(BinOp::Eq(Default::default()), Equality)],
            BinOp::And(_) => vec![(BinOp::Or(Default::default()), Logical)],
            BinOp::Or(_) => vec![(BinOp::And(Default::default()), Logical)],
            BinOp::BitAnd(_) => vec![(BinOp::BitOr(Default::default()), Bitwise)],
            BinOp::BitOr(_) => vec![(BinOp::BitAnd(Default::default()), Bitwise)],
            BinOp::BitXor(_) => vec![(BinOp::BitAnd(Default::default()), Bitwise)],
            BinOp::Shl(_) => vec![(BinOp::Shr(Default::default()), Bitwise)],
            BinOp::Shr(_) => vec![(BinOp::Shl(Default::default()), Bitwise)],
            BinOp::AddAssign(_) => vec![(BinOp::SubAssign(Default::default()), Assignment)],
            BinOp::SubAssign(_) => vec![(BinOp::AddAssign(Default::default()), Assignment)],
            BinOp::MulAssign(_) => vec![(BinOp::DivAssign(Default::default()), Assignment)],
            BinOp::DivAssign(_) => vec![(BinOp::MulAssign(Default::default()), Assignment)],
            _ => Vec::new(),
        }
    }
}

impl MutatorCatalog for DefaultCatalog {
    fn mutate_expr(&self, expr: &Expr, _scope: &CatalogScope<'_>) -> Vec<ExprCandidate> {
        match expr {
            Expr::Binary(binary) => Self::binary_swaps(&binary.op)
                .into_iter()
                .map(|(op, kind)| {
                    let mut replacement = binary.clone();
                    replacement.op = op;
                    Candidate {
                        description: format!("{} operator mutation", describe_kind(kind)),
                        replacement: Expr::Binary(replacement),
                        kind,
                    }
                })
                .collect(),
            Expr::Unary(unary) if matches!(unary.op, UnOp::Not(_) | UnOp::Neg(_)) => {
                vec![Candidate {
                    replacement: (*unary.expr).clone(),
                    kind: MutatorKind::Negation,
                    description: "Negation removal".to_string(),
                }]
            }
            Expr::Lit(lit) => match &lit.lit {
                Lit::Bool(b) => {
                    let flipped = syn::LitBool::new(!b.value, b.span);
                    vec![Candidate {
                        replacement: syn::parse_quote!(#flipped),
                        kind: MutatorKind::Boolean,
                        description: "Boolean mutation".to_string(),
                    }]
                }
                Lit::Str(s) => {
                    let mutated = if s.value().is_empty() {
                        "Switchboard was here!"
                    } else {
                        ""
                    };
                    let replacement = syn::LitStr::new(mutated, s.span());
                    vec![Candidate {
                        replacement: syn::parse_quote!(#replacement),
                        kind: MutatorKind::String,
                        description: "String mutation".to_string(),
                    }]
                }
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn mutate_stmt(&self, stmt: &Stmt, _scope: &CatalogScope<'_>) -> Vec<StmtCandidate> {
        let removable = match stmt {
            Stmt::Expr(expr, Some(_)) => match expr {
                Expr::Call(_) | Expr::MethodCall(_) | Expr::Assign(_) => true,
                Expr::Binary(binary) => is_assign_op(&binary.op),
                _ => false,
            },
            _ => false,
        };
        if !removable {
            return Vec::new();
        }
        vec![Candidate {
            replacement: Vec::new(),
            kind: MutatorKind::Statement,
            description: "Statement removal".to_string(),
        }]
    }
}

fn describe_kind(kind: MutatorKind) -> &'static str {
    match kind {
        MutatorKind::Arithmetic => "Arithmetic",
        MutatorKind::Boundary => "Boundary",
        MutatorKind::Equality => "Equality",
        MutatorKind::Logical => "Logical",
        MutatorKind::Bitwise => "Bitwise",
        MutatorKind::Assignment => "Assignment",
        MutatorKind::Boolean => "Boolean",
        MutatorKind::Negation => "Negation",
        MutatorKind::String => "String",
        MutatorKind::Statement => "Statement",
        MutatorKind::Configured => "Configured",
    }
}

/// True for `+=`, `-=` and the other compound assignments
pub fn is_assign_op(op: &BinOp) -> bool {
    matches!(
        op,
        BinOp::AddAssign(_)
            | BinOp::SubAssign(_)
            | BinOp::MulAssign(_)
            | BinOp::DivAssign(_)
            | BinOp::RemAssign(_)
            | BinOp::BitXorAssign(_)
            | BinOp::BitAndAssign(_)
            | BinOp::BitOrAssign(_)
            | BinOp::ShlAssign(_)
            | BinOp::ShrAssign(_)
    )
}

struct ConfiguredEntry {
    file: PathBuf,
    function: String,
    original: Expr,
    replacement: Expr,
    description: String,
}

/// Mutations listed in the config file, matched structurally
pub struct ConfiguredCatalog {
    entries: Vec<ConfiguredEntry>,
}

impl ConfiguredCatalog {
    pub fn new(mutations: &[MutationConfig]) -> Result<Self> {
        let entries = mutations
            .iter()
            .map(|mutation| {
                let original = syn::parse_str(&mutation.original).map_err(|e| {
                    MutationError::InvalidOriginal {
                        code: mutation.original.clone(),
                        parse_error: e.to_string(),
                    }
                })?;
                let replacement = syn::parse_str(&mutation.replacement).map_err(|e| {
                    MutationError::InvalidReplacement {
                        code: mutation.replacement.clone(),
                        parse_error: e.to_string(),
                    }
                })?;
                Ok(ConfiguredEntry {
                    file: mutation.file.clone(),
                    function: mutation.function.clone(),
                    original,
                    replacement,
                    description: mutation.description(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MutatorCatalog for ConfiguredCatalog {
    fn mutate_expr(&self, expr: &Expr, scope: &CatalogScope<'_>) -> Vec<ExprCandidate> {
        let Some(function) = scope.function else {
            return Vec::new();
        };
        self.entries
            .iter()
            .filter(|entry| {
                entry.function == function
                    && (scope.file.ends_with(&entry.file) || entry.file.ends_with(scope.file))
                    && same_expr(expr, &entry.original)
            })
            .map(|entry| Candidate {
                replacement: entry.replacement.clone(),
                kind: MutatorKind::Configured,
                description: entry.description.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote::ToTokens;

    fn scope() -> CatalogScope<'static> {
        CatalogScope {
            file: Path::new("src/math.rs"),
            function: Some("add"),
        }
    }

    fn rendered(candidates: &[ExprCandidate]) -> Vec<String> {
        candidates
            .iter()
            .map(|c| c.replacement.to_token_stream().to_string())
            .collect()
    }

    #[test]
    fn test_relational_operators_get_boundary_and_negation() {
        let expr: Expr = syn::parse_str("age >= 18").unwrap();
        let candidates = DefaultCatalog.mutate_expr(&expr, &scope());
        assert_eq!(rendered(&candidates), vec!["age > 18", "age < 18"]);
        assert_eq!(candidates[0].kind, MutatorKind::Boundary);
    }

    #[test]
    fn test_boolean_and_string_literals() {
        let flag: Expr = syn::parse_str("true").unwrap();
        assert_eq!(rendered(&DefaultCatalog.mutate_expr(&flag, &scope())), vec!["false"]);

        let text: Expr = syn::parse_str(r#""name""#).unwrap();
        assert_eq!(rendered(&DefaultCatalog.mutate_expr(&text, &scope())), vec!["\"\""]);
    }

    #[test]
    fn test_negation_removal() {
        let expr: Expr = syn::parse_str("!ready").unwrap();
        assert_eq!(rendered(&DefaultCatalog.mutate_expr(&expr, &scope())), vec!["ready"]);
    }

    #[test]
    fn test_statement_removal_only_for_side_effects() {
        let call: Stmt = syn::parse_str("items.push(1);").unwrap();
        let removal = DefaultCatalog.mutate_stmt(&call, &scope());
        assert_eq!(removal.len(), 1);
        assert!(removal[0].replacement.is_empty());

        let local: Stmt = syn::parse_str("let x = 1;").unwrap();
        assert!(DefaultCatalog.mutate_stmt(&local, &scope()).is_empty());
    }

    #[test]
    fn test_configured_catalog_matches_in_function() {
        let catalog = ConfiguredCatalog::new(&[MutationConfig {
            file: PathBuf::from("src/math.rs"),
            function: "add".to_string(),
            original: "a + b".to_string(),
            replacement: "a * b".to_string(),
            id: "m1".to_string(),
        }])
        .unwrap();

        let expr: Expr = syn::parse_str("(a+b)").unwrap();
        assert_eq!(rendered(&catalog.mutate_expr(&expr, &scope())), vec!["a * b"]);

        let elsewhere = CatalogScope {
            file: Path::new("src/math.rs"),
            function: Some("sub"),
        };
        assert!(catalog.mutate_expr(&expr, &elsewhere).is_empty());
    }

    #[test]
    fn test_configured_catalog_rejects_bad_replacement() {
        let result = ConfiguredCatalog::new(&[MutationConfig {
            file: PathBuf::from("src/math.rs"),
            function: "add".to_string(),
            original: "a + b".to_string(),
            replacement: "a +".to_string(),
            id: "m1".to_string(),
        }]);
        assert!(matches!(result, Err(MutationError::InvalidReplacement { .. })));
    }
}
