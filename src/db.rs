use crate::config::AppPaths;
use crate::domain::{
    Budget, Category, CategoryType, Invitation, InvitationStatus, Member, RecurringExpense, Role,
    SavingsGoal, Transaction,
};
use crate::period::BillingPeriod;
use crate::recurring::RecurringStore;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(paths: &AppPaths) -> Result<(Self, PathBuf)> {
        fs::create_dir_all(&paths.data_dir)
            .with_context(|| format!("Failed to create data dir {}", paths.data_dir.display()))?;

        let db_path = paths.db_path();
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open DB {}", db_path.display()))?;

        let db = Self { conn };
        db.migrate()?;
        Ok((db, db_path))
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS budgets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                cutoff_day INTEGER NOT NULL CHECK (cutoff_day BETWEEN 1 AND 31),
                currency TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS budget_members (
                budget_id TEXT NOT NULL REFERENCES budgets(id) ON DELETE CASCADE,
                email TEXT NOT NULL,
                role TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (budget_id, email)
            );

            CREATE INDEX IF NOT EXISTS idx_members_email ON budget_members(email);

            CREATE TABLE IF NOT EXISTS invitations (
                id TEXT PRIMARY KEY,
                budget_id TEXT NOT NULL REFERENCES budgets(id) ON DELETE CASCADE,
                email TEXT NOT NULL,
                role TEXT NOT NULL,
                invited_by TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_invitations_email ON invitations(email, status);

            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                budget_id TEXT NOT NULL REFERENCES budgets(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                limit_amount TEXT NOT NULL,
                parent_id TEXT REFERENCES categories(id) ON DELETE CASCADE,
                icon TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_name
                ON categories(budget_id, name COLLATE NOCASE);
            CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id);

            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                budget_id TEXT NOT NULL REFERENCES budgets(id) ON DELETE CASCADE,
                category_id TEXT NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                amount TEXT NOT NULL,
                description TEXT NOT NULL,
                date TEXT NOT NULL,
                is_recurring INTEGER NOT NULL DEFAULT 0,
                created_by TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_budget_date ON transactions(budget_id, date);

            CREATE TABLE IF NOT EXISTS recurring_expenses (
                id TEXT PRIMARY KEY,
                budget_id TEXT NOT NULL REFERENCES budgets(id) ON DELETE CASCADE,
                category_id TEXT NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                description TEXT NOT NULL,
                amount TEXT NOT NULL,
                day_of_month INTEGER NOT NULL CHECK (day_of_month BETWEEN 1 AND 31),
                is_active INTEGER NOT NULL DEFAULT 1,
                last_generated_date TEXT,
                created_by TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_recurring_budget ON recurring_expenses(budget_id, is_active);

            CREATE TABLE IF NOT EXISTS savings_goals (
                id TEXT PRIMARY KEY,
                budget_id TEXT NOT NULL REFERENCES budgets(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                target_amount TEXT NOT NULL,
                current_amount TEXT NOT NULL,
                deadline TEXT,
                created_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_goals_name
                ON savings_goals(budget_id, name COLLATE NOCASE);

            CREATE TABLE IF NOT EXISTS goal_contributions (
                id TEXT PRIMARY KEY,
                goal_id TEXT NOT NULL REFERENCES savings_goals(id) ON DELETE CASCADE,
                amount TEXT NOT NULL,
                contributed_by TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    // --- budgets -------------------------------------------------------------

    /// Inserts the budget and makes its creator the owner.
    pub fn create_budget(&self, budget: &Budget) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO budgets (id, name, cutoff_day, currency, created_by, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                budget.id.to_string(),
                budget.name,
                budget.cutoff_day,
                budget.currency,
                budget.created_by,
                budget.created_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "INSERT INTO budget_members (budget_id, email, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                budget.id.to_string(),
                budget.created_by,
                Role::Owner.as_str(),
                budget.created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_budget(&self, id: Uuid) -> Result<Option<Budget>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, name, cutoff_day, currency, created_by, created_at FROM budgets WHERE id = ?1",
                params![id.to_string()],
                budget_row,
            )
            .optional()?;
        raw.map(RawBudget::into_budget).transpose()
    }

    /// Budgets `email` belongs to, with the role held in each, ordered by name.
    pub fn list_budgets_for(&self, email: &str) -> Result<Vec<(Budget, Role)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT b.id, b.name, b.cutoff_day, b.currency, b.created_by, b.created_at, m.role
            FROM budgets b
            JOIN budget_members m ON m.budget_id = b.id
            WHERE m.email = ?1
            ORDER BY b.name COLLATE NOCASE ASC, b.created_at ASC
            "#,
        )?;

        let rows = stmt.query_map(params![email], |row| {
            let role: String = row.get(6)?;
            Ok((budget_row(row)?, role))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (raw, role) = row?;
            let role = role.parse::<Role>().context("Invalid role in budget_members")?;
            out.push((raw.into_budget()?, role));
        }
        Ok(out)
    }

    /// The budget `email` belongs to under `name` (case-insensitive). Errors when the name is
    /// ambiguous for that user.
    pub fn find_budget_for(&self, email: &str, name: &str) -> Result<Option<Budget>> {
        let wanted = name.trim().to_lowercase();
        let mut matches: Vec<Budget> = self
            .list_budgets_for(email)?
            .into_iter()
            .map(|(b, _)| b)
            .filter(|b| b.name.to_lowercase() == wanted)
            .collect();
        match matches.len() {
            0 | 1 => Ok(matches.pop()),
            n => Err(anyhow!(
                "Budget name '{}' matches {n} of your budgets; rename one with: manejate budget settings --name <new>",
                name.trim()
            )),
        }
    }

    /// Whether `email` belongs to a budget named `name` other than `except`.
    pub fn budget_name_taken(&self, email: &str, name: &str, except: Option<Uuid>) -> Result<bool> {
        let wanted = name.trim().to_lowercase();
        Ok(self
            .list_budgets_for(email)?
            .into_iter()
            .any(|(b, _)| b.name.to_lowercase() == wanted && Some(b.id) != except))
    }

    pub fn update_budget(&self, budget: &Budget) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE budgets SET name = ?2, cutoff_day = ?3, currency = ?4 WHERE id = ?1",
            params![
                budget.id.to_string(),
                budget.name,
                budget.cutoff_day,
                budget.currency,
            ],
        )?;
        Ok(changed)
    }

    pub fn delete_budget(&self, id: Uuid) -> Result<usize> {
        let changed = self
            .conn
            .execute("DELETE FROM budgets WHERE id = ?1", params![id.to_string()])?;
        Ok(changed)
    }

    // --- members & invitations ---------------------------------------------

    pub fn member_role(&self, budget_id: Uuid, email: &str) -> Result<Option<Role>> {
        let role: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM budget_members WHERE budget_id = ?1 AND email = ?2",
                params![budget_id.to_string(), email],
                |row| row.get(0),
            )
            .optional()?;
        role.map(|r| r.parse::<Role>().context("Invalid role in budget_members"))
            .transpose()
    }

    pub fn list_members(&self, budget_id: Uuid) -> Result<Vec<Member>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT email, role, joined_at
            FROM budget_members
            WHERE budget_id = ?1
            ORDER BY joined_at ASC, email ASC
            "#,
        )?;

        let rows = stmt.query_map(params![budget_id.to_string()], |row| {
            let email: String = row.get(0)?;
            let role: String = row.get(1)?;
            let joined_at: String = row.get(2)?;
            Ok((email, role, joined_at))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (email, role, joined_at) = row?;
            out.push(Member {
                email,
                role: role.parse::<Role>().context("Invalid role in budget_members")?,
                joined_at: parse_ts(&joined_at, "joined_at")?,
            });
        }
        Ok(out)
    }

    pub fn set_member_role(&self, budget_id: Uuid, email: &str, role: Role) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE budget_members SET role = ?3 WHERE budget_id = ?1 AND email = ?2",
            params![budget_id.to_string(), email, role.as_str()],
        )?;
        Ok(changed)
    }

    pub fn remove_member(&self, budget_id: Uuid, email: &str) -> Result<usize> {
        let changed = self.conn.execute(
            "DELETE FROM budget_members WHERE budget_id = ?1 AND email = ?2",
            params![budget_id.to_string(), email],
        )?;
        Ok(changed)
    }

    pub fn count_owners(&self, budget_id: Uuid) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM budget_members WHERE budget_id = ?1 AND role = ?2",
            params![budget_id.to_string(), Role::Owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn insert_invitation(&self, inv: &Invitation) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO invitations (id, budget_id, email, role, invited_by, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                inv.id.to_string(),
                inv.budget_id.to_string(),
                inv.email,
                inv.role.as_str(),
                inv.invited_by,
                inv.status.as_str(),
                inv.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn has_pending_invitation(&self, budget_id: Uuid, email: &str) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM invitations WHERE budget_id = ?1 AND email = ?2 AND status = 'pending'",
            params![budget_id.to_string(), email],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Pending invitations addressed to `email`, with the budget name.
    pub fn pending_invitations_for(&self, email: &str) -> Result<Vec<(Invitation, String)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT i.id, i.budget_id, i.email, i.role, i.invited_by, i.status, i.created_at, b.name
            FROM invitations i
            JOIN budgets b ON b.id = i.budget_id
            WHERE i.email = ?1 AND i.status = 'pending'
            ORDER BY i.created_at ASC
            "#,
        )?;

        let rows = stmt.query_map(params![email], |row| {
            let budget_name: String = row.get(7)?;
            Ok((invitation_row(row)?, budget_name))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (raw, budget_name) = row?;
            out.push((raw.into_invitation()?, budget_name));
        }
        Ok(out)
    }

    pub fn find_invitation(&self, email: &str, id_prefix: &str) -> Result<Invitation> {
        let ids = self.ids_with_prefix(
            "SELECT id FROM invitations WHERE email = ?1 AND id LIKE ?2",
            email,
            id_prefix,
        )?;
        let id = single_match(ids, "invitation", id_prefix)?;
        let raw = self.conn.query_row(
            r#"
            SELECT id, budget_id, email, role, invited_by, status, created_at
            FROM invitations WHERE id = ?1
            "#,
            params![id],
            invitation_row,
        )?;
        raw.into_invitation()
    }

    /// Accepts an invitation: adds the member and closes the invitation together.
    pub fn accept_invitation(&self, inv: &Invitation, joined_at: DateTime<Utc>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO budget_members (budget_id, email, role, joined_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(budget_id, email) DO UPDATE SET role = excluded.role
            "#,
            params![
                inv.budget_id.to_string(),
                inv.email,
                inv.role.as_str(),
                joined_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "UPDATE invitations SET status = ?2 WHERE id = ?1",
            params![inv.id.to_string(), InvitationStatus::Accepted.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_invitation_status(&self, id: Uuid, status: InvitationStatus) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE invitations SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.as_str()],
        )?;
        Ok(changed)
    }

    // --- categories ----------------------------------------------------------

    pub fn insert_category(&self, cat: &Category) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO categories (id, budget_id, name, type, limit_amount, parent_id, icon)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                cat.id.to_string(),
                cat.budget_id.to_string(),
                cat.name,
                cat.kind.as_str(),
                cat.limit.to_string(),
                cat.parent_id.map(|p| p.to_string()),
                cat.icon,
            ],
        )?;
        Ok(())
    }

    pub fn update_category(&self, cat: &Category) -> Result<usize> {
        let changed = self.conn.execute(
            r#"
            UPDATE categories
            SET name = ?2, type = ?3, limit_amount = ?4, parent_id = ?5, icon = ?6
            WHERE id = ?1
            "#,
            params![
                cat.id.to_string(),
                cat.name,
                cat.kind.as_str(),
                cat.limit.to_string(),
                cat.parent_id.map(|p| p.to_string()),
                cat.icon,
            ],
        )?;
        Ok(changed)
    }

    /// Deletes a category; its sub-categories and their transactions go with it.
    pub fn delete_category(&self, id: Uuid) -> Result<usize> {
        let changed = self
            .conn
            .execute("DELETE FROM categories WHERE id = ?1", params![id.to_string()])?;
        Ok(changed)
    }

    pub fn list_categories(&self, budget_id: Uuid) -> Result<Vec<Category>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, budget_id, name, type, limit_amount, parent_id, icon
            FROM categories
            WHERE budget_id = ?1
            ORDER BY name COLLATE NOCASE ASC
            "#,
        )?;

        let rows = stmt.query_map(params![budget_id.to_string()], category_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_category()?);
        }
        Ok(out)
    }

    pub fn find_category(&self, budget_id: Uuid, name: &str) -> Result<Option<Category>> {
        let raw = self
            .conn
            .query_row(
                r#"
                SELECT id, budget_id, name, type, limit_amount, parent_id, icon
                FROM categories
                WHERE budget_id = ?1 AND name = ?2 COLLATE NOCASE
                "#,
                params![budget_id.to_string(), name.trim()],
                category_row,
            )
            .optional()?;
        raw.map(RawCategory::into_category).transpose()
    }

    pub fn has_subcategories(&self, id: Uuid) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM categories WHERE parent_id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    // --- transactions --------------------------------------------------------

    pub fn insert_transaction(&self, txn: &Transaction) -> Result<()> {
        insert_transaction_on(&self.conn, txn)
    }

    /// Transactions of a budget, newest first, optionally limited to one billing period.
    pub fn list_transactions(
        &self,
        budget_id: Uuid,
        period: Option<BillingPeriod>,
    ) -> Result<Vec<Transaction>> {
        let (start, end) = period_bounds(period);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, budget_id, category_id, amount, description, date, is_recurring, created_by, created_at
            FROM transactions
            WHERE budget_id = ?1 AND date >= ?2 AND date < ?3
            ORDER BY date DESC, created_at DESC
            "#,
        )?;

        let rows = stmt.query_map(params![budget_id.to_string(), start, end], |row| {
            let id: String = row.get(0)?;
            let budget_id: String = row.get(1)?;
            let category_id: String = row.get(2)?;
            let amount: String = row.get(3)?;
            let description: String = row.get(4)?;
            let date: String = row.get(5)?;
            let is_recurring: bool = row.get(6)?;
            let created_by: Option<String> = row.get(7)?;
            let created_at: String = row.get(8)?;
            Ok((
                id,
                budget_id,
                category_id,
                amount,
                description,
                date,
                is_recurring,
                created_by,
                created_at,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (
                id,
                budget_id,
                category_id,
                amount,
                description,
                date,
                is_recurring,
                created_by,
                created_at,
            ) = row?;
            out.push(Transaction {
                id: parse_uuid(&id, "transaction id")?,
                budget_id: parse_uuid(&budget_id, "transaction budget_id")?,
                category_id: parse_uuid(&category_id, "transaction category_id")?,
                amount: parse_decimal(&amount, "transaction amount")?,
                description,
                date: parse_date(&date, "transaction date")?,
                is_recurring,
                created_by,
                created_at: parse_ts(&created_at, "transaction created_at")?,
            });
        }
        Ok(out)
    }

    /// Sum of transaction amounts per category inside `period`.
    pub fn spend_by_category(
        &self,
        budget_id: Uuid,
        period: BillingPeriod,
    ) -> Result<HashMap<Uuid, Decimal>> {
        let (start, end) = period_bounds(Some(period));
        let mut stmt = self.conn.prepare(
            r#"
            SELECT category_id, amount
            FROM transactions
            WHERE budget_id = ?1 AND date >= ?2 AND date < ?3
            "#,
        )?;

        let rows = stmt.query_map(params![budget_id.to_string(), start, end], |row| {
            let category_id: String = row.get(0)?;
            let amount: String = row.get(1)?;
            Ok((category_id, amount))
        })?;

        let mut out: HashMap<Uuid, Decimal> = HashMap::new();
        for row in rows {
            let (category_id, amount) = row?;
            let category_id = parse_uuid(&category_id, "transaction category_id")?;
            let amount = parse_decimal(&amount, "transaction amount")?;
            let total = out.entry(category_id).or_insert(Decimal::ZERO);
            *total = total
                .checked_add(amount)
                .ok_or_else(|| anyhow!("Spend of category {category_id} overflows"))?;
        }
        Ok(out)
    }

    pub fn resolve_transaction_id(&self, budget_id: Uuid, id_prefix: &str) -> Result<Uuid> {
        let ids = self.ids_with_prefix(
            "SELECT id FROM transactions WHERE budget_id = ?1 AND id LIKE ?2",
            &budget_id.to_string(),
            id_prefix,
        )?;
        parse_uuid(&single_match(ids, "transaction", id_prefix)?, "transaction id")
    }

    pub fn delete_transaction(&self, id: Uuid) -> Result<usize> {
        let changed = self
            .conn
            .execute("DELETE FROM transactions WHERE id = ?1", params![id.to_string()])?;
        Ok(changed)
    }

    // --- recurring expenses --------------------------------------------------

    pub fn insert_recurring(&self, rec: &RecurringExpense) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO recurring_expenses
                (id, budget_id, category_id, description, amount, day_of_month, is_active,
                 last_generated_date, created_by, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                rec.id.to_string(),
                rec.budget_id.to_string(),
                rec.category_id.to_string(),
                rec.description,
                rec.amount.to_string(),
                rec.day_of_month,
                rec.is_active,
                rec.last_generated_date.map(|d| d.to_string()),
                rec.created_by,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_recurring(&self, budget_id: Uuid, only_active: bool) -> Result<Vec<RecurringExpense>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, budget_id, category_id, description, amount, day_of_month, is_active,
                   last_generated_date, created_by
            FROM recurring_expenses
            WHERE budget_id = ?1 AND (?2 = 0 OR is_active = 1)
            ORDER BY day_of_month ASC, created_at ASC
            "#,
        )?;

        let rows = stmt.query_map(params![budget_id.to_string(), only_active], |row| {
            let id: String = row.get(0)?;
            let budget_id: String = row.get(1)?;
            let category_id: String = row.get(2)?;
            let description: String = row.get(3)?;
            let amount: String = row.get(4)?;
            let day_of_month: u32 = row.get(5)?;
            let is_active: bool = row.get(6)?;
            let last_generated_date: Option<String> = row.get(7)?;
            let created_by: Option<String> = row.get(8)?;
            Ok((
                id,
                budget_id,
                category_id,
                description,
                amount,
                day_of_month,
                is_active,
                last_generated_date,
                created_by,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (
                id,
                budget_id,
                category_id,
                description,
                amount,
                day_of_month,
                is_active,
                last_generated_date,
                created_by,
            ) = row?;
            out.push(RecurringExpense {
                id: parse_uuid(&id, "recurring id")?,
                budget_id: parse_uuid(&budget_id, "recurring budget_id")?,
                category_id: parse_uuid(&category_id, "recurring category_id")?,
                description,
                amount: parse_decimal(&amount, "recurring amount")?,
                day_of_month,
                is_active,
                last_generated_date: last_generated_date
                    .as_deref()
                    .map(|d| parse_date(d, "last_generated_date"))
                    .transpose()?,
                created_by,
            });
        }
        Ok(out)
    }

    pub fn resolve_recurring_id(&self, budget_id: Uuid, id_prefix: &str) -> Result<Uuid> {
        let ids = self.ids_with_prefix(
            "SELECT id FROM recurring_expenses WHERE budget_id = ?1 AND id LIKE ?2",
            &budget_id.to_string(),
            id_prefix,
        )?;
        parse_uuid(
            &single_match(ids, "recurring expense", id_prefix)?,
            "recurring id",
        )
    }

    pub fn set_recurring_active(&self, id: Uuid, active: bool) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE recurring_expenses SET is_active = ?2 WHERE id = ?1",
            params![id.to_string(), active],
        )?;
        Ok(changed)
    }

    pub fn delete_recurring(&self, id: Uuid) -> Result<usize> {
        let changed = self.conn.execute(
            "DELETE FROM recurring_expenses WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(changed)
    }

    // --- savings goals -------------------------------------------------------

    pub fn insert_goal(&self, goal: &SavingsGoal) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO savings_goals (id, budget_id, name, target_amount, current_amount, deadline, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                goal.id.to_string(),
                goal.budget_id.to_string(),
                goal.name,
                goal.target_amount.to_string(),
                goal.current_amount.to_string(),
                goal.deadline.map(|d| d.to_string()),
                goal.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_goals(&self, budget_id: Uuid) -> Result<Vec<SavingsGoal>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, budget_id, name, target_amount, current_amount, deadline, created_at
            FROM savings_goals
            WHERE budget_id = ?1
            ORDER BY created_at ASC
            "#,
        )?;
        let rows = stmt.query_map(params![budget_id.to_string()], goal_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_goal()?);
        }
        Ok(out)
    }

    pub fn find_goal(&self, budget_id: Uuid, name: &str) -> Result<Option<SavingsGoal>> {
        let raw = self
            .conn
            .query_row(
                r#"
                SELECT id, budget_id, name, target_amount, current_amount, deadline, created_at
                FROM savings_goals
                WHERE budget_id = ?1 AND name = ?2 COLLATE NOCASE
                "#,
                params![budget_id.to_string(), name.trim()],
                goal_row,
            )
            .optional()?;
        raw.map(RawGoal::into_goal).transpose()
    }

    /// Records a contribution and returns the goal's new balance.
    pub fn contribute_to_goal(
        &self,
        goal: &SavingsGoal,
        amount: Decimal,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Decimal> {
        let tx = self.conn.unchecked_transaction()?;
        let current: String = tx.query_row(
            "SELECT current_amount FROM savings_goals WHERE id = ?1",
            params![goal.id.to_string()],
            |row| row.get(0),
        )?;
        let updated = parse_decimal(&current, "current_amount")?
            .checked_add(amount)
            .ok_or_else(|| anyhow!("Contribution to '{}' overflows the goal balance", goal.name))?;
        tx.execute(
            "UPDATE savings_goals SET current_amount = ?2 WHERE id = ?1",
            params![goal.id.to_string(), updated.to_string()],
        )?;
        tx.execute(
            r#"
            INSERT INTO goal_contributions (id, goal_id, amount, contributed_by, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                Uuid::new_v4().to_string(),
                goal.id.to_string(),
                amount.to_string(),
                by,
                at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn delete_goal(&self, id: Uuid) -> Result<usize> {
        let changed = self
            .conn
            .execute("DELETE FROM savings_goals WHERE id = ?1", params![id.to_string()])?;
        Ok(changed)
    }

    fn ids_with_prefix(&self, sql: &str, scope: &str, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
            return Err(anyhow!("Invalid id '{prefix}'"));
        }
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![scope, format!("{prefix}%")], |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl RecurringStore for Db {
    fn active_recurring(&self, budget_id: Uuid) -> Result<Vec<RecurringExpense>> {
        self.list_recurring(budget_id, true)
    }

    fn commit_generation(
        &self,
        expense: &RecurringExpense,
        due: NaiveDate,
        txn: &Transaction,
    ) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let claimed = tx.execute(
            r#"
            UPDATE recurring_expenses
            SET last_generated_date = ?2
            WHERE id = ?1 AND last_generated_date IS ?3
            "#,
            params![
                expense.id.to_string(),
                due.to_string(),
                expense.last_generated_date.map(|d| d.to_string()),
            ],
        )?;
        if claimed == 0 {
            return Ok(false);
        }

        insert_transaction_on(&tx, txn)
            .with_context(|| format!("Failed to insert transaction for recurring {}", expense.id))?;
        tx.commit()?;
        Ok(true)
    }
}

fn insert_transaction_on(conn: &Connection, txn: &Transaction) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO transactions
            (id, budget_id, category_id, amount, description, date, is_recurring, created_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            txn.id.to_string(),
            txn.budget_id.to_string(),
            txn.category_id.to_string(),
            txn.amount.to_string(),
            txn.description,
            txn.date.to_string(),
            txn.is_recurring,
            txn.created_by,
            txn.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn period_bounds(period: Option<BillingPeriod>) -> (String, String) {
    match period {
        Some(p) => (p.start.to_string(), p.end.to_string()),
        None => ("0000-01-01".to_string(), "9999-12-31".to_string()),
    }
}

fn single_match(ids: Vec<String>, what: &str, prefix: &str) -> Result<String> {
    match ids.len() {
        0 => Err(anyhow!("No such {what}: '{prefix}'")),
        1 => Ok(ids.into_iter().next().unwrap_or_default()),
        n => Err(anyhow!(
            "Id '{prefix}' matches {n} {what}s; use more characters"
        )),
    }
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid UUID in {what}"))
}

fn parse_decimal(raw: &str, what: &str) -> Result<Decimal> {
    raw.parse::<Decimal>()
        .with_context(|| format!("Invalid decimal in {what}"))
}

fn parse_date(raw: &str, what: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("Invalid date in {what}"))
}

fn parse_ts(raw: &str, what: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp in {what}"))?
        .with_timezone(&Utc))
}

struct RawBudget {
    id: String,
    name: String,
    cutoff_day: u32,
    currency: String,
    created_by: String,
    created_at: String,
}

impl RawBudget {
    fn into_budget(self) -> Result<Budget> {
        Ok(Budget {
            id: parse_uuid(&self.id, "budgets")?,
            name: self.name,
            cutoff_day: self.cutoff_day,
            currency: self.currency,
            created_by: self.created_by,
            created_at: parse_ts(&self.created_at, "budgets")?,
        })
    }
}

fn budget_row(row: &Row<'_>) -> rusqlite::Result<RawBudget> {
    Ok(RawBudget {
        id: row.get(0)?,
        name: row.get(1)?,
        cutoff_day: row.get(2)?,
        currency: row.get(3)?,
        created_by: row.get(4)?,
        created_at: row.get(5)?,
    })
}

struct RawInvitation {
    id: String,
    budget_id: String,
    email: String,
    role: String,
    invited_by: String,
    status: String,
    created_at: String,
}

impl RawInvitation {
    fn into_invitation(self) -> Result<Invitation> {
        Ok(Invitation {
            id: parse_uuid(&self.id, "invitations")?,
            budget_id: parse_uuid(&self.budget_id, "invitations")?,
            email: self.email,
            role: self.role.parse::<Role>().context("Invalid role in invitations")?,
            invited_by: self.invited_by,
            status: InvitationStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("Invalid status in invitations: {}", self.status))?,
            created_at: parse_ts(&self.created_at, "invitations")?,
        })
    }
}

fn invitation_row(row: &Row<'_>) -> rusqlite::Result<RawInvitation> {
    Ok(RawInvitation {
        id: row.get(0)?,
        budget_id: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        invited_by: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

struct RawCategory {
    id: String,
    budget_id: String,
    name: String,
    kind: String,
    limit: String,
    parent_id: Option<String>,
    icon: Option<String>,
}

impl RawCategory {
    fn into_category(self) -> Result<Category> {
        Ok(Category {
            id: parse_uuid(&self.id, "categories")?,
            budget_id: parse_uuid(&self.budget_id, "categories")?,
            name: self.name,
            kind: self
                .kind
                .parse::<CategoryType>()
                .context("Invalid type in categories")?,
            limit: parse_decimal(&self.limit, "categories")?,
            parent_id: self
                .parent_id
                .as_deref()
                .map(|p| parse_uuid(p, "categories parent_id"))
                .transpose()?,
            icon: self.icon,
        })
    }
}

fn category_row(row: &Row<'_>) -> rusqlite::Result<RawCategory> {
    Ok(RawCategory {
        id: row.get(0)?,
        budget_id: row.get(1)?,
        name: row.get(2)?,
        kind: row.get(3)?,
        limit: row.get(4)?,
        parent_id: row.get(5)?,
        icon: row.get(6)?,
    })
}

struct RawGoal {
    id: String,
    budget_id: String,
    name: String,
    target_amount: String,
    current_amount: String,
    deadline: Option<String>,
    created_at: String,
}

impl RawGoal {
    fn into_goal(self) -> Result<SavingsGoal> {
        Ok(SavingsGoal {
            id: parse_uuid(&self.id, "savings_goals")?,
            budget_id: parse_uuid(&self.budget_id, "savings_goals")?,
            name: self.name,
            target_amount: parse_decimal(&self.target_amount, "savings_goals target")?,
            current_amount: parse_decimal(&self.current_amount, "savings_goals current")?,
            deadline: self
                .deadline
                .as_deref()
                .map(|d| parse_date(d, "savings_goals deadline"))
                .transpose()?,
            created_at: parse_ts(&self.created_at, "savings_goals")?,
        })
    }
}

fn goal_row(row: &Row<'_>) -> rusqlite::Result<RawGoal> {
    Ok(RawGoal {
        id: row.get(0)?,
        budget_id: row.get(1)?,
        name: row.get(2)?,
        target_amount: row.get(3)?,
        current_amount: row.get(4)?,
        deadline: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::calculate_period;
    use crate::recurring::materialize_due;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn seed_budget(db: &Db) -> Budget {
        let budget = Budget {
            id: Uuid::new_v4(),
            name: "Casa".to_string(),
            cutoff_day: 15,
            currency: "USD".to_string(),
            created_by: "ana@example.com".to_string(),
            created_at: Utc::now(),
        };
        db.create_budget(&budget).unwrap();
        budget
    }

    fn seed_category(db: &Db, budget: &Budget, name: &str, parent: Option<Uuid>) -> Category {
        let cat = Category {
            id: Uuid::new_v4(),
            budget_id: budget.id,
            name: name.to_string(),
            kind: CategoryType::Variable,
            limit: Decimal::from(100u32),
            parent_id: parent,
            icon: None,
        };
        db.insert_category(&cat).unwrap();
        cat
    }

    fn txn(budget: &Budget, cat: &Category, amount: u32, date: NaiveDate) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            budget_id: budget.id,
            category_id: cat.id,
            amount: Decimal::from(amount),
            description: "test".to_string(),
            date,
            is_recurring: false,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn creator_becomes_owner() {
        let db = Db::open_in_memory().unwrap();
        let budget = seed_budget(&db);
        assert_eq!(
            db.member_role(budget.id, "ana@example.com").unwrap(),
            Some(Role::Owner)
        );
        assert_eq!(db.member_role(budget.id, "luis@example.com").unwrap(), None);
        assert_eq!(db.count_owners(budget.id).unwrap(), 1);
    }

    #[test]
    fn spend_is_summed_per_category_inside_the_half_open_period() {
        let db = Db::open_in_memory().unwrap();
        let budget = seed_budget(&db);
        let food = seed_category(&db, &budget, "Food", None);

        db.insert_transaction(&txn(&budget, &food, 10, d(2026, 2, 15))).unwrap();
        db.insert_transaction(&txn(&budget, &food, 5, d(2026, 3, 14))).unwrap();
        db.insert_transaction(&txn(&budget, &food, 99, d(2026, 3, 15))).unwrap();
        db.insert_transaction(&txn(&budget, &food, 99, d(2026, 2, 14))).unwrap();

        let period = calculate_period(15, d(2026, 2, 20));
        let spend = db.spend_by_category(budget.id, period).unwrap();
        assert_eq!(spend.get(&food.id), Some(&Decimal::from(15u32)));
        assert_eq!(db.list_transactions(budget.id, Some(period)).unwrap().len(), 2);
        assert_eq!(db.list_transactions(budget.id, None).unwrap().len(), 4);
    }

    #[test]
    fn spend_overflow_is_an_error_not_a_panic() {
        let db = Db::open_in_memory().unwrap();
        let budget = seed_budget(&db);
        let food = seed_category(&db, &budget, "Food", None);

        for _ in 0..2 {
            let mut big = txn(&budget, &food, 0, d(2026, 2, 16));
            big.amount = Decimal::MAX;
            db.insert_transaction(&big).unwrap();
        }

        let period = calculate_period(15, d(2026, 2, 20));
        let err = db.spend_by_category(budget.id, period).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err:#}");
    }

    #[test]
    fn goal_contribution_overflow_leaves_balance_untouched() {
        let db = Db::open_in_memory().unwrap();
        let budget = seed_budget(&db);
        let goal = SavingsGoal {
            id: Uuid::new_v4(),
            budget_id: budget.id,
            name: "Viaje".to_string(),
            target_amount: Decimal::from(100u32),
            current_amount: Decimal::ZERO,
            deadline: None,
            created_at: Utc::now(),
        };
        db.insert_goal(&goal).unwrap();

        db.contribute_to_goal(&goal, Decimal::MAX, "ana@example.com", Utc::now())
            .unwrap();
        assert!(
            db.contribute_to_goal(&goal, Decimal::ONE, "ana@example.com", Utc::now())
                .is_err()
        );
        let stored = db.find_goal(budget.id, "Viaje").unwrap().unwrap();
        assert_eq!(stored.current_amount, Decimal::MAX);
    }

    #[test]
    fn deleting_a_parent_cascades_to_children_and_their_transactions() {
        let db = Db::open_in_memory().unwrap();
        let budget = seed_budget(&db);
        let food = seed_category(&db, &budget, "Food", None);
        let snacks = seed_category(&db, &budget, "Snacks", Some(food.id));
        db.insert_transaction(&txn(&budget, &snacks, 3, d(2026, 2, 20))).unwrap();

        assert!(db.has_subcategories(food.id).unwrap());
        assert_eq!(db.delete_category(food.id).unwrap(), 1);
        assert!(db.list_categories(budget.id).unwrap().is_empty());
        assert!(db.list_transactions(budget.id, None).unwrap().is_empty());
    }

    #[test]
    fn category_names_are_unique_per_budget_ignoring_case() {
        let db = Db::open_in_memory().unwrap();
        let budget = seed_budget(&db);
        seed_category(&db, &budget, "Food", None);
        let dup = Category {
            id: Uuid::new_v4(),
            budget_id: budget.id,
            name: "FOOD".to_string(),
            kind: CategoryType::Fixed,
            limit: Decimal::ZERO,
            parent_id: None,
            icon: None,
        };
        assert!(db.insert_category(&dup).is_err());
        assert!(db.find_category(budget.id, "food").unwrap().is_some());
    }

    #[test]
    fn recurring_generation_is_idempotent_within_a_month() {
        let db = Db::open_in_memory().unwrap();
        let budget = seed_budget(&db);
        let bills = seed_category(&db, &budget, "Bills", None);
        let rec = RecurringExpense {
            id: Uuid::new_v4(),
            budget_id: budget.id,
            category_id: bills.id,
            description: "Internet".to_string(),
            amount: Decimal::from(45u32),
            day_of_month: 5,
            is_active: true,
            last_generated_date: None,
            created_by: Some("ana@example.com".to_string()),
        };
        db.insert_recurring(&rec).unwrap();

        let first = materialize_due(&db, budget.id, d(2026, 3, 10)).unwrap();
        let second = materialize_due(&db, budget.id, d(2026, 3, 12)).unwrap();
        assert_eq!(first.generated, 1);
        assert_eq!(second.generated, 0);

        let txns = db.list_transactions(budget.id, None).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].date, d(2026, 3, 5));
        assert!(txns[0].is_recurring);

        let stored = db.list_recurring(budget.id, false).unwrap();
        assert_eq!(stored[0].last_generated_date, Some(d(2026, 3, 5)));
    }

    #[test]
    fn stale_watermark_cannot_generate_twice() {
        let db = Db::open_in_memory().unwrap();
        let budget = seed_budget(&db);
        let bills = seed_category(&db, &budget, "Bills", None);
        let rec = RecurringExpense {
            id: Uuid::new_v4(),
            budget_id: budget.id,
            category_id: bills.id,
            description: "Rent".to_string(),
            amount: Decimal::from(700u32),
            day_of_month: 1,
            is_active: true,
            last_generated_date: None,
            created_by: None,
        };
        db.insert_recurring(&rec).unwrap();

        let first = txn(&budget, &bills, 700, d(2026, 3, 1));
        let second = txn(&budget, &bills, 700, d(2026, 3, 1));
        assert!(db.commit_generation(&rec, d(2026, 3, 1), &first).unwrap());
        assert!(!db.commit_generation(&rec, d(2026, 3, 1), &second).unwrap());
        assert_eq!(db.list_transactions(budget.id, None).unwrap().len(), 1);
    }

    #[test]
    fn failed_insert_rolls_back_the_watermark() {
        let db = Db::open_in_memory().unwrap();
        let budget = seed_budget(&db);
        let bills = seed_category(&db, &budget, "Bills", None);
        let rec = RecurringExpense {
            id: Uuid::new_v4(),
            budget_id: budget.id,
            category_id: bills.id,
            description: "Gym".to_string(),
            amount: Decimal::from(30u32),
            day_of_month: 2,
            is_active: true,
            last_generated_date: None,
            created_by: None,
        };
        db.insert_recurring(&rec).unwrap();

        let mut broken = txn(&budget, &bills, 30, d(2026, 3, 2));
        broken.category_id = Uuid::new_v4();
        assert!(db.commit_generation(&rec, d(2026, 3, 2), &broken).is_err());

        let stored = db.list_recurring(budget.id, false).unwrap();
        assert_eq!(stored[0].last_generated_date, None);
    }

    #[test]
    fn id_prefixes_must_be_unambiguous() {
        let db = Db::open_in_memory().unwrap();
        let budget = seed_budget(&db);
        let food = seed_category(&db, &budget, "Food", None);
        let t = txn(&budget, &food, 1, d(2026, 2, 20));
        db.insert_transaction(&t).unwrap();

        let short = &t.id.to_string()[..8];
        assert_eq!(db.resolve_transaction_id(budget.id, short).unwrap(), t.id);
        assert!(db.resolve_transaction_id(budget.id, "zz").is_err());
        assert!(db.resolve_transaction_id(Uuid::new_v4(), short).is_err());
    }

    #[test]
    fn contributions_accumulate_on_the_goal() {
        let db = Db::open_in_memory().unwrap();
        let budget = seed_budget(&db);
        let goal = SavingsGoal {
            id: Uuid::new_v4(),
            budget_id: budget.id,
            name: "Viaje".to_string(),
            target_amount: Decimal::from(1000u32),
            current_amount: Decimal::ZERO,
            deadline: Some(d(2026, 12, 1)),
            created_at: Utc::now(),
        };
        db.insert_goal(&goal).unwrap();

        db.contribute_to_goal(&goal, Decimal::from(250u32), "ana@example.com", Utc::now())
            .unwrap();
        let total = db
            .contribute_to_goal(&goal, Decimal::from(100u32), "ana@example.com", Utc::now())
            .unwrap();
        assert_eq!(total, Decimal::from(350u32));

        let stored = db.find_goal(budget.id, "viaje").unwrap().unwrap();
        assert_eq!(stored.current_amount, Decimal::from(350u32));
        assert_eq!(stored.deadline, Some(d(2026, 12, 1)));
    }
}
