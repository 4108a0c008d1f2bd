use crate::domain::{RecurringExpense, Transaction};
use crate::period::day_in_month;
use anyhow::Result;
use chrono::{Datelike, NaiveDate, Utc};
use uuid::Uuid;

/// Marks transactions created by the materializer rather than typed in by a member.
pub const AUTO_PREFIX: &str = "[Recurrente] ";

/// Storage the materializer reads from and writes to.
pub trait RecurringStore {
    fn active_recurring(&self, budget_id: Uuid) -> Result<Vec<RecurringExpense>>;

    /// Inserts `txn` and moves the watermark of `expense` to `due` as one unit.
    ///
    /// The watermark only moves if it still equals `expense.last_generated_date`. Returns
    /// `Ok(false)` when it had already moved; nothing is written in that case. On error
    /// nothing is written either.
    fn commit_generation(
        &self,
        expense: &RecurringExpense,
        due: NaiveDate,
        txn: &Transaction,
    ) -> Result<bool>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaterializeSummary {
    pub generated: usize,
    pub failed: usize,
    /// Due, but another caller generated it first.
    pub raced: usize,
}

/// Returns the date to generate `expense` for on `today`, if it is due.
pub fn due_date(expense: &RecurringExpense, today: NaiveDate) -> Option<NaiveDate> {
    if !expense.is_active {
        return None;
    }

    let due = day_in_month(today.year(), today.month(), expense.day_of_month);
    if today < due {
        return None;
    }

    match expense.last_generated_date {
        None => Some(due),
        Some(last) if (last.year(), last.month()) < (today.year(), today.month()) => Some(due),
        Some(_) => None,
    }
}

/// Generates every recurring expense of `budget_id` that is due on `today`.
///
/// Per-expense failures are logged and skipped so the next run retries them.
pub fn materialize_due(
    store: &impl RecurringStore,
    budget_id: Uuid,
    today: NaiveDate,
) -> Result<MaterializeSummary> {
    let mut summary = MaterializeSummary::default();

    for expense in store.active_recurring(budget_id)? {
        let Some(due) = due_date(&expense, today) else {
            continue;
        };

        let txn = generated_transaction(&expense, due);
        match store.commit_generation(&expense, due, &txn) {
            Ok(true) => {
                tracing::info!(
                    recurring = %expense.id,
                    date = %due,
                    amount = %expense.amount,
                    "generated recurring transaction"
                );
                summary.generated += 1;
            }
            Ok(false) => {
                tracing::info!(
                    recurring = %expense.id,
                    date = %due,
                    "recurring transaction already generated by another run"
                );
                summary.raced += 1;
            }
            Err(err) => {
                tracing::warn!(
                    recurring = %expense.id,
                    date = %due,
                    error = %format!("{err:#}"),
                    "failed to generate recurring transaction; will retry"
                );
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

fn generated_transaction(expense: &RecurringExpense, due: NaiveDate) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        budget_id: expense.budget_id,
        category_id: expense.category_id,
        amount: expense.amount,
        description: format!("{AUTO_PREFIX}{}", expense.description),
        date: due,
        is_recurring: true,
        created_by: expense.created_by.clone(),
        created_at: Utc::now(),
    }
}
