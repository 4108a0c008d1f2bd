use crate::domain::Category;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Spend of one category for one billing period, with its sub-categories nested.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorySpendView {
    pub category: Category,
    /// Spend booked directly against this category.
    pub direct_spent: Decimal,
    /// `direct_spent` plus the spend of every descendant.
    pub spent: Decimal,
    pub limit: Decimal,
    pub remaining: Decimal,
    pub percent: Decimal,
    pub children: Vec<CategorySpendView>,
}

/// Builds the category tree for a budget and rolls child spend up into parents.
///
/// Returns roots in input order. A category whose parent is missing from `categories`
/// is returned as a root; so is every category caught in a parent cycle.
pub fn rollup(
    categories: &[Category],
    direct_spend: &HashMap<Uuid, Decimal>,
) -> Vec<CategorySpendView> {
    let known: HashSet<Uuid> = categories.iter().map(|c| c.id).collect();

    let mut children_of: HashMap<Uuid, Vec<usize>> = HashMap::new();
    let mut root_idx = Vec::new();
    for (idx, cat) in categories.iter().enumerate() {
        match cat.parent_id {
            Some(parent) if parent != cat.id && known.contains(&parent) => {
                children_of.entry(parent).or_default().push(idx);
            }
            _ => root_idx.push(idx),
        }
    }

    let mut visited = vec![false; categories.len()];
    let mut roots = Vec::with_capacity(root_idx.len());
    for idx in root_idx {
        roots.push(build_view(idx, categories, direct_spend, &children_of, &mut visited));
    }

    // Anything still unvisited hangs off a parent cycle and has no root above it.
    for idx in 0..categories.len() {
        if !visited[idx] {
            tracing::warn!(
                category = %categories[idx].id,
                "category parent chain forms a cycle; showing it at top level"
            );
            roots.push(build_view(idx, categories, direct_spend, &children_of, &mut visited));
        }
    }

    roots
}

fn build_view(
    idx: usize,
    categories: &[Category],
    direct_spend: &HashMap<Uuid, Decimal>,
    children_of: &HashMap<Uuid, Vec<usize>>,
    visited: &mut [bool],
) -> CategorySpendView {
    visited[idx] = true;
    let category = &categories[idx];
    let direct_spent = direct_spend
        .get(&category.id)
        .copied()
        .unwrap_or(Decimal::ZERO);

    let mut children = Vec::new();
    if let Some(child_idx) = children_of.get(&category.id) {
        for &child in child_idx {
            if visited[child] {
                continue;
            }
            children.push(build_view(child, categories, direct_spend, children_of, visited));
        }
    }
    children.sort_by(|a, b| b.spent.cmp(&a.spent));

    let spent = children
        .iter()
        .fold(direct_spent, |acc, c| acc.saturating_add(c.spent));
    let limit = category.limit;

    CategorySpendView {
        category: category.clone(),
        direct_spent,
        spent,
        limit,
        remaining: limit.saturating_sub(spent),
        percent: percent_of(spent, limit),
        children,
    }
}

/// Percent of `limit` used; 0 without a limit, `Decimal::MAX` when the ratio does not fit.
fn percent_of(spent: Decimal, limit: Decimal) -> Decimal {
    if limit <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    spent
        .checked_div(limit)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::MAX)
}
