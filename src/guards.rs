//! Guard construction and recognition
//!
//! An expression guard is
//!
//! ```text
//! (if crate::__switchboard::is_active(7) { a - b } else { a + b })
//! ```
//!
//! and a statement guard is the same conditional without the parentheses,
//! holding statements in both branches. The `is_active(ID)` call is the tag
//! that later passes use to find, strip or resolve a guard.

use proc_macro2::Literal;
use syn::{Block, Expr, ExprIf, Stmt};

use crate::mutant::MutantId;

/// Entry point called by every guard inside the control module
pub const GUARD_FN: &str = "is_active";

/// Build the guard condition `<control>::is_active(ID)`
fn condition(control: &syn::Path, id: MutantId) -> Expr {
    let id = Literal::u32_unsuffixed(id);
    syn::parse_quote!(#control::is_active(#id))
}

/// Wrap an expression so that mutant `id` selects `mutated`
pub fn expr_guard(control: &syn::Path, id: MutantId, mutated: Expr, original: Expr) -> Expr {
    let cond = condition(control, id);
    syn::parse_quote! {
        (if #cond { #mutated } else { #original })
    }
}

/// Wrap a statement so that mutant `id` runs `mutated` instead
pub fn stmt_guard(control: &syn::Path, id: MutantId, mutated: Vec<Stmt>, original: Stmt) -> Stmt {
    let cond = condition(control, id);
    Stmt::Expr(
        syn::parse_quote! {
            if #cond { #(#mutated)* } else { #original }
        },
        None,
    )
}

/// Which guard form a node is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardForm {
    Expr,
    Stmt,
}

/// A recognized guard, borrowed from the tree
pub struct GuardView<'a> {
    pub id: MutantId,
    pub form: GuardForm,
    pub mutated: &'a Block,
    pub original: &'a Block,
}

/// Recognize a guard emitted for `control_module`
pub fn guard_view<'a>(expr: &'a Expr, control_module: &str) -> Option<GuardView<'a>> {
    let (form, expr_if) = match expr {
        Expr::Paren(paren) => match &*paren.expr {
            Expr::If(expr_if) => (GuardForm::Expr, expr_if),
            _ => return None,
        },
        Expr::If(expr_if) => (GuardForm::Stmt, expr_if),
        _ => return None,
    };
    let id = guarded_if(expr_if, control_module)?;
    Some(GuardView {
        id,
        form,
        mutated: &expr_if.then_branch,
        original: else_block(expr_if)?,
    })
}

/// Id of an `if` whose condition is a guard call and whose else is a plain block
pub fn guarded_if(expr_if: &ExprIf, control_module: &str) -> Option<MutantId> {
    else_block(expr_if)?;
    guard_id(&expr_if.cond, control_module)
}

fn else_block(expr_if: &ExprIf) -> Option<&Block> {
    match expr_if.else_branch.as_ref().map(|(_, e)| &**e) {
        Some(Expr::Block(block)) if block.label.is_none() => Some(&block.block),
        _ => None,
    }
}

/// Parse `<...>::<control_module>::is_active(ID)` and return `ID`
pub fn guard_id(cond: &Expr, control_module: &str) -> Option<MutantId> {
    let Expr::Call(call) = cond else {
        return None;
    };
    let Expr::Path(func) = &*call.func else {
        return None;
    };
    let segments: Vec<_> = func.path.segments.iter().collect();
    let [.., module, name] = segments.as_slice() else {
        return None;
    };
    if name.ident != GUARD_FN || module.ident != control_module || call.args.len() != 1 {
        return None;
    }
    match call.args.first() {
        Some(Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Int(id),
            ..
        })) => id.base10_parse().ok(),
        _ => None,
    }
}

/// The single expression a guard branch holds, if it holds exactly that
pub fn branch_expr(block: &Block) -> Option<&Expr> {
    match block.stmts.as_slice() {
        [Stmt::Expr(expr, None)] => Some(expr),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote::ToTokens;

    fn control() -> syn::Path {
        syn::parse_str("crate::__switchboard").unwrap()
    }

    #[test]
    fn test_expr_guard_round_trip() {
        let original: Expr = syn::parse_str("a + b").unwrap();
        let mutated: Expr = syn::parse_str("a - b").unwrap();
        let guard = expr_guard(&control(), 7, mutated, original);

        assert_eq!(
            guard.to_token_stream().to_string(),
            "(if crate :: __switchboard :: is_active (7) { a - b } else { a + b })"
        );

        let view = guard_view(&guard, "__switchboard").unwrap();
        assert_eq!(view.id, 7);
        assert_eq!(view.form, GuardForm::Expr);
        assert_eq!(
            branch_expr(view.original).unwrap().to_token_stream().to_string(),
            "a + b"
        );
    }

    #[test]
    fn test_stmt_guard_holds_removal() {
        let original: Stmt = syn::parse_str("items.push(1);").unwrap();
        let Stmt::Expr(guard, None) = stmt_guard(&control(), 3, Vec::new(), original) else {
            panic!("statement guard should be a bare expression statement");
        };
        let view = guard_view(&guard, "__switchboard").unwrap();
        assert_eq!(view.id, 3);
        assert_eq!(view.form, GuardForm::Stmt);
        assert!(view.mutated.stmts.is_empty());
        assert_eq!(view.original.stmts.len(), 1);
    }

    #[test]
    fn test_foreign_conditions_are_not_guards() {
        let plain: Expr = syn::parse_str("if ready(1) { a } else { b }").unwrap();
        assert!(guard_view(&plain, "__switchboard").is_none());

        let other_module: Expr =
            syn::parse_str("(if crate::elsewhere::is_active(1) { a } else { b })").unwrap();
        assert!(guard_view(&other_module, "__switchboard").is_none());
    }
}
