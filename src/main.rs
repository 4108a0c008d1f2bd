mod access;
mod cli;
mod config;
mod db;
mod domain;
mod logging;
mod period;
mod recurring;
mod rollup;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::access::require_role;
use crate::cli::{
    BudgetCmd, CategoryCmd, Cli, Command, GoalCmd, InviteCmd, MemberCmd, PeriodArgs,
    RecurringCmd, TxCmd,
};
use crate::config::{AppConfig, app_paths, load_or_init_config, now_utc, parse_date, write_config};
use crate::db::Db;
use crate::domain::{
    Budget, Category, CategoryType, Invitation, InvitationStatus, RecurringExpense, Role,
    SavingsGoal, Transaction, normalize_email, validate_day,
};
use crate::period::calculate_period;
use crate::rollup::{CategorySpendView, rollup};

fn main() {
    logging::init_tracing();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

struct App {
    db: Db,
    cfg: AppConfig,
    cfg_path: PathBuf,
    user_override: Option<String>,
    budget_override: Option<String>,
    today: NaiveDate,
}

impl App {
    fn user(&self) -> Result<String> {
        config::current_user(&self.cfg, self.user_override.as_deref())
    }

    fn save_config(&self) -> Result<()> {
        write_config(&self.cfg_path, &self.cfg)
    }

    /// Resolves the budget a command targets and checks the acting user's role on it.
    fn budget(&self, required: Role) -> Result<(Budget, String)> {
        let user = self.user()?;
        let budget = match self.budget_override.as_deref() {
            Some(name) => self
                .db
                .find_budget_for(&user, name)?
                .ok_or_else(|| anyhow!("No such budget: '{name}'"))?,
            None => {
                let id = self.cfg.selected_budget(&user).ok_or_else(|| {
                    anyhow!(
                        "No budget selected. Run: manejate budget create <name> (or manejate budget use <name>)"
                    )
                })?;
                self.db.get_budget(id)?.ok_or_else(|| {
                    anyhow!("The selected budget no longer exists. Run: manejate budget use <name>")
                })?
            }
        };
        require_role(&self.db, &budget, &user, required)?;
        Ok((budget, user))
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = app_paths(cli.home.clone())?;
    let (cfg, cfg_path) = load_or_init_config(&paths)?;
    let (db, db_path) = Db::open(&paths)?;
    tracing::debug!(db = %db_path.display(), "opened database");

    let mut app = App {
        db,
        cfg,
        cfg_path,
        user_override: cli.user,
        budget_override: cli.budget,
        today: config::today(cli.today.as_deref())?,
    };

    match cli.command {
        Command::Login { email } => handle_login(&mut app, &email),
        Command::Whoami => {
            println!("{}", app.user()?);
            Ok(())
        }
        Command::Budget(args) => handle_budget(&mut app, args.cmd),
        Command::Member(args) => handle_member(&mut app, args.cmd),
        Command::Invite(args) => handle_invite(&mut app, args.cmd),
        Command::Category(args) => handle_category(&app, args.cmd),
        Command::Tx(args) => handle_tx(&app, args.cmd),
        Command::Recurring(args) => handle_recurring(&app, args.cmd),
        Command::Goal(args) => handle_goal(&app, args.cmd),
        Command::Period(args) => handle_period(&app, args),
        Command::Dashboard => handle_dashboard(&app),
    }
}

fn handle_login(app: &mut App, email: &str) -> Result<()> {
    let email = normalize_email(email);
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(anyhow!("Invalid e-mail: '{email}'"));
    }
    app.cfg.user_email = Some(email.clone());
    app.save_config()?;
    println!("Logged in as {email}.");
    Ok(())
}

fn handle_budget(app: &mut App, cmd: BudgetCmd) -> Result<()> {
    match cmd {
        BudgetCmd::Create {
            name,
            cutoff_day,
            currency,
        } => {
            let user = app.user()?;
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(anyhow!("Budget name must not be empty"));
            }
            if app.db.find_budget_for(&user, &name)?.is_some() {
                return Err(anyhow!("You already have a budget named '{name}'"));
            }

            let cutoff_day =
                validate_day("cutoff day", cutoff_day.unwrap_or(app.cfg.default_cutoff_day))?;
            let currency = currency
                .unwrap_or_else(|| app.cfg.default_currency.clone())
                .to_ascii_uppercase();

            let budget = Budget {
                id: Uuid::new_v4(),
                name: name.clone(),
                cutoff_day,
                currency: currency.clone(),
                created_by: user,
                created_at: now_utc(),
            };
            app.db.create_budget(&budget)?;
            tracing::debug!(budget = %budget.id, "created budget");

            app.cfg.select_budget(&budget.created_by, budget.id);
            app.save_config()?;
            println!("Created budget '{name}' (cutoff day {cutoff_day}, {currency}).");
            Ok(())
        }
        BudgetCmd::List => {
            let user = app.user()?;
            let budgets = app.db.list_budgets_for(&user)?;
            if budgets.is_empty() {
                println!("(no budgets)");
                return Ok(());
            }

            let selected = app.cfg.selected_budget(&user);
            println!("name\trole\tcutoff_day\tcurrency\tcurrent");
            for (b, role) in budgets {
                let current = if selected == Some(b.id) {
                    "*"
                } else {
                    ""
                };
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    b.name, role, b.cutoff_day, b.currency, current
                );
            }
            Ok(())
        }
        BudgetCmd::Use { name } => {
            let user = app.user()?;
            let Some(budget) = app.db.find_budget_for(&user, &name)? else {
                return Err(anyhow!("No such budget: '{name}'"));
            };
            app.cfg.select_budget(&user, budget.id);
            app.save_config()?;
            println!("Using budget '{}'.", budget.name);
            Ok(())
        }
        BudgetCmd::Settings {
            cutoff_day,
            currency,
            name,
        } => {
            if cutoff_day.is_none() && currency.is_none() && name.is_none() {
                let (budget, _) = app.budget(Role::Viewer)?;
                println!("name\t{}", budget.name);
                println!("cutoff_day\t{}", budget.cutoff_day);
                println!("currency\t{}", budget.currency);
                println!("created_by\t{}", budget.created_by);
                return Ok(());
            }

            let (mut budget, user) = app.budget(Role::Owner)?;
            if let Some(day) = cutoff_day {
                budget.cutoff_day = validate_day("cutoff day", day)?;
            }
            if let Some(c) = currency {
                budget.currency = c.trim().to_ascii_uppercase();
            }
            if let Some(new_name) = name {
                let new_name = new_name.trim().to_string();
                if new_name.is_empty() {
                    return Err(anyhow!("Budget name must not be empty"));
                }
                if let Some(other) = app.db.find_budget_for(&user, &new_name)? {
                    if other.id != budget.id {
                        return Err(anyhow!("You already have a budget named '{new_name}'"));
                    }
                }
                for member in app.db.list_members(budget.id)? {
                    if app.db.budget_name_taken(&member.email, &new_name, Some(budget.id))? {
                        return Err(anyhow!(
                            "{} already belongs to a budget named '{new_name}'",
                            member.email
                        ));
                    }
                }
                budget.name = new_name;
            }

            app.db.update_budget(&budget)?;
            println!(
                "Updated budget '{}': cutoff day {}, {}.",
                budget.name, budget.cutoff_day, budget.currency
            );
            Ok(())
        }
        BudgetCmd::Delete { name } => {
            let user = app.user()?;
            let Some(budget) = app.db.find_budget_for(&user, &name)? else {
                return Err(anyhow!("No such budget: '{name}'"));
            };
            require_role(&app.db, &budget, &user, Role::Owner)?;

            app.db.delete_budget(budget.id)?;
            app.cfg.forget_budget(budget.id);
            app.save_config()?;
            println!("Deleted budget '{}'.", budget.name);
            Ok(())
        }
    }
}

fn handle_member(app: &mut App, cmd: MemberCmd) -> Result<()> {
    match cmd {
        MemberCmd::List => {
            let (budget, _) = app.budget(Role::Viewer)?;
            println!("email\trole\tjoined");
            for m in app.db.list_members(budget.id)? {
                println!(
                    "{}\t{}\t{}",
                    m.email,
                    m.role,
                    m.joined_at.format("%Y-%m-%d")
                );
            }
            Ok(())
        }
        MemberCmd::Invite { email, role } => {
            let (budget, user) = app.budget(Role::Owner)?;
            let email = normalize_email(&email);
            let role = role.parse::<Role>()?;

            if app.db.member_role(budget.id, &email)?.is_some() {
                return Err(anyhow!("{email} is already a member of '{}'", budget.name));
            }
            if app.db.has_pending_invitation(budget.id, &email)? {
                return Err(anyhow!(
                    "{email} already has a pending invitation to '{}'",
                    budget.name
                ));
            }

            let inv = Invitation {
                id: Uuid::new_v4(),
                budget_id: budget.id,
                email: email.clone(),
                role,
                invited_by: user,
                status: InvitationStatus::Pending,
                created_at: now_utc(),
            };
            app.db.insert_invitation(&inv)?;
            println!(
                "Invited {email} as {role} to '{}' (invitation {}).",
                budget.name,
                short_id(inv.id)
            );
            Ok(())
        }
        MemberCmd::Remove { email } => {
            let email = normalize_email(&email);
            let user = app.user()?;
            // Anyone may leave; removing someone else takes an owner.
            let required = if email == user { Role::Viewer } else { Role::Owner };
            let (budget, _) = app.budget(required)?;

            let Some(role) = app.db.member_role(budget.id, &email)? else {
                return Err(anyhow!("{email} is not a member of '{}'", budget.name));
            };
            if role == Role::Owner && app.db.count_owners(budget.id)? <= 1 {
                return Err(anyhow!(
                    "Cannot remove the last owner of '{}'. Promote someone else first.",
                    budget.name
                ));
            }

            app.db.remove_member(budget.id, &email)?;
            if email == user && app.cfg.selected_budget(&user) == Some(budget.id) {
                app.cfg.clear_selection(&user);
                app.save_config()?;
            }
            println!("Removed {email} from '{}'.", budget.name);
            Ok(())
        }
        MemberCmd::Role { email, role } => {
            let (budget, _) = app.budget(Role::Owner)?;
            let email = normalize_email(&email);
            let role = role.parse::<Role>()?;

            let Some(current) = app.db.member_role(budget.id, &email)? else {
                return Err(anyhow!("{email} is not a member of '{}'", budget.name));
            };
            if current == Role::Owner && role != Role::Owner && app.db.count_owners(budget.id)? <= 1
            {
                return Err(anyhow!(
                    "Cannot demote the last owner of '{}'. Promote someone else first.",
                    budget.name
                ));
            }

            app.db.set_member_role(budget.id, &email, role)?;
            println!("{email} is now {role} on '{}'.", budget.name);
            Ok(())
        }
    }
}

fn handle_invite(app: &mut App, cmd: InviteCmd) -> Result<()> {
    let user = app.user()?;
    match cmd {
        InviteCmd::List => {
            let pending = app.db.pending_invitations_for(&user)?;
            if pending.is_empty() {
                println!("(no invitations)");
                return Ok(());
            }

            println!("id\tbudget\trole\tinvited_by");
            for (inv, budget_name) in pending {
                println!(
                    "{}\t{}\t{}\t{}",
                    short_id(inv.id),
                    budget_name,
                    inv.role,
                    inv.invited_by
                );
            }
            Ok(())
        }
        InviteCmd::Accept { id } => {
            let inv = pending_invitation(app, &user, &id)?;
            let Some(budget) = app.db.get_budget(inv.budget_id)? else {
                return Err(anyhow!("The budget of invitation {} no longer exists", short_id(inv.id)));
            };
            if app.db.budget_name_taken(&user, &budget.name, Some(budget.id))? {
                return Err(anyhow!(
                    "You already belong to a budget named '{}'. Rename yours (manejate budget settings --name <new>) before accepting.",
                    budget.name
                ));
            }
            app.db.accept_invitation(&inv, now_utc())?;

            let budget_name = budget.name;
            if app.cfg.selected_budget(&user).is_none() {
                app.cfg.select_budget(&user, inv.budget_id);
                app.save_config()?;
            }
            println!("Joined budget '{budget_name}' as {}.", inv.role);
            Ok(())
        }
        InviteCmd::Decline { id } => {
            let inv = pending_invitation(app, &user, &id)?;
            app.db
                .set_invitation_status(inv.id, InvitationStatus::Declined)?;
            println!("Declined invitation {}.", short_id(inv.id));
            Ok(())
        }
    }
}

fn pending_invitation(app: &App, user: &str, id: &str) -> Result<Invitation> {
    let inv = app.db.find_invitation(user, id)?;
    if inv.status != InvitationStatus::Pending {
        return Err(anyhow!(
            "Invitation {} is already {}",
            short_id(inv.id),
            inv.status.as_str()
        ));
    }
    Ok(inv)
}

fn handle_category(app: &App, cmd: CategoryCmd) -> Result<()> {
    match cmd {
        CategoryCmd::Add {
            name,
            kind,
            limit,
            parent,
            icon,
        } => {
            let (budget, _) = app.budget(Role::Editor)?;
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(anyhow!("Category name must not be empty"));
            }
            if app.db.find_category(budget.id, &name)?.is_some() {
                return Err(anyhow!("Category '{name}' already exists"));
            }

            let kind = kind.parse::<CategoryType>()?;
            let limit = match limit {
                Some(raw) => parse_amount(&raw, "limit")?,
                None => Decimal::ZERO,
            };
            let parent_id = match parent.as_deref() {
                Some(p) => Some(top_level_parent(app, &budget, p, None)?.id),
                None => None,
            };

            let category = Category {
                id: Uuid::new_v4(),
                budget_id: budget.id,
                name: name.clone(),
                kind,
                limit,
                parent_id,
                icon,
            };
            app.db
                .insert_category(&category)
                .with_context(|| format!("Failed to create category '{name}'"))?;
            tracing::debug!(category = %category.id, budget = %budget.id, "created category");
            println!(
                "Created category '{}' ({}, limit {}).",
                name,
                kind,
                fmt_amount(limit)
            );
            Ok(())
        }
        CategoryCmd::Edit {
            name,
            rename,
            kind,
            limit,
            parent,
            no_parent,
            icon,
        } => {
            let (budget, _) = app.budget(Role::Editor)?;
            let Some(mut category) = app.db.find_category(budget.id, &name)? else {
                return Err(anyhow!("No such category: '{name}'"));
            };

            if let Some(new_name) = rename {
                let new_name = new_name.trim().to_string();
                if new_name.is_empty() {
                    return Err(anyhow!("Category name must not be empty"));
                }
                if let Some(other) = app.db.find_category(budget.id, &new_name)? {
                    if other.id != category.id {
                        return Err(anyhow!("Category '{new_name}' already exists"));
                    }
                }
                category.name = new_name;
            }
            if let Some(k) = kind {
                category.kind = k.parse::<CategoryType>()?;
            }
            if let Some(raw) = limit {
                category.limit = parse_amount(&raw, "limit")?;
            }
            if no_parent {
                category.parent_id = None;
            } else if let Some(p) = parent.as_deref() {
                if app.db.has_subcategories(category.id)? {
                    return Err(anyhow!(
                        "'{}' has sub-categories and cannot be nested",
                        category.name
                    ));
                }
                category.parent_id = Some(top_level_parent(app, &budget, p, Some(category.id))?.id);
            }
            if icon.is_some() {
                category.icon = icon;
            }

            app.db.update_category(&category)?;
            println!("Updated category '{}'.", category.name);
            Ok(())
        }
        CategoryCmd::Delete { name } => {
            let (budget, _) = app.budget(Role::Editor)?;
            let Some(category) = app.db.find_category(budget.id, &name)? else {
                return Err(anyhow!("No such category: '{name}'"));
            };
            let had_children = app.db.has_subcategories(category.id)?;
            app.db.delete_category(category.id)?;
            tracing::debug!(category = %category.id, had_children, "deleted category");
            if had_children {
                println!(
                    "Deleted category '{}' and its sub-categories.",
                    category.name
                );
            } else {
                println!("Deleted category '{}'.", category.name);
            }
            Ok(())
        }
        CategoryCmd::List => {
            let (budget, _) = app.budget(Role::Viewer)?;
            let categories = app.db.list_categories(budget.id)?;
            if categories.is_empty() {
                println!("(no categories)");
                return Ok(());
            }

            let names: HashMap<Uuid, &str> = categories
                .iter()
                .map(|c| (c.id, c.name.as_str()))
                .collect();
            println!("name\ttype\tlimit\tparent\ticon");
            for c in &categories {
                let parent = c
                    .parent_id
                    .and_then(|p| names.get(&p).copied())
                    .unwrap_or("-");
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    c.name,
                    c.kind,
                    fmt_amount(c.limit),
                    parent,
                    c.icon.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
    }
}

/// Looks up `name` as a parent candidate: it must exist in `budget` and be top-level.
fn top_level_parent(
    app: &App,
    budget: &Budget,
    name: &str,
    child: Option<Uuid>,
) -> Result<Category> {
    let Some(parent) = app.db.find_category(budget.id, name)? else {
        return Err(anyhow!("No such parent category: '{name}'"));
    };
    if Some(parent.id) == child {
        return Err(anyhow!("A category cannot be its own parent"));
    }
    if parent.parent_id.is_some() {
        return Err(anyhow!(
            "'{}' is a sub-category; categories nest only one level deep",
            parent.name
        ));
    }
    Ok(parent)
}

fn handle_tx(app: &App, cmd: TxCmd) -> Result<()> {
    match cmd {
        TxCmd::Add {
            amount,
            category,
            description,
            date,
        } => {
            let (budget, user) = app.budget(Role::Editor)?;
            let amount = parse_amount(&amount, "amount")?;
            let Some(cat) = app.db.find_category(budget.id, &category)? else {
                return Err(anyhow!("No such category: '{category}'"));
            };
            let date = match date.as_deref() {
                Some(raw) => parse_date(raw)?,
                None => app.today,
            };

            let txn = Transaction {
                id: Uuid::new_v4(),
                budget_id: budget.id,
                category_id: cat.id,
                amount,
                description: description.unwrap_or_else(|| cat.name.clone()),
                date,
                is_recurring: false,
                created_by: Some(user),
                created_at: now_utc(),
            };
            app.db.insert_transaction(&txn)?;
            println!(
                "Added {} {} to '{}' on {} ({}).",
                fmt_amount(amount),
                budget.currency,
                cat.name,
                date,
                short_id(txn.id)
            );
            let current = calculate_period(budget.cutoff_day, app.today);
            if !current.contains(date) {
                println!(
                    "Note: {date} is outside the current billing cycle ({} to {}).",
                    current.start, current.end
                );
            }
            Ok(())
        }
        TxCmd::List { all } => {
            let (budget, _) = app.budget(Role::Viewer)?;
            let period = (!all).then(|| calculate_period(budget.cutoff_day, app.today));
            let txns = app.db.list_transactions(budget.id, period)?;
            if txns.is_empty() {
                println!("(no transactions)");
                return Ok(());
            }

            let categories: HashMap<Uuid, Category> = app
                .db
                .list_categories(budget.id)?
                .into_iter()
                .map(|c| (c.id, c))
                .collect();

            println!("date\tkind\tcategory\tamount\tdescription\tid");
            for t in txns {
                let (kind, cat_name) = match categories.get(&t.category_id) {
                    Some(c) if c.kind.is_income() => ("income", c.name.as_str()),
                    Some(c) => ("expense", c.name.as_str()),
                    None => ("expense", "?"),
                };
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    t.date,
                    kind,
                    cat_name,
                    fmt_amount(t.amount),
                    t.description,
                    short_id(t.id)
                );
            }
            Ok(())
        }
        TxCmd::Delete { id } => {
            let (budget, _) = app.budget(Role::Editor)?;
            let id = app.db.resolve_transaction_id(budget.id, &id)?;
            app.db.delete_transaction(id)?;
            println!("Deleted transaction {}.", short_id(id));
            Ok(())
        }
    }
}

fn handle_recurring(app: &App, cmd: RecurringCmd) -> Result<()> {
    match cmd {
        RecurringCmd::Add {
            amount,
            category,
            day,
            description,
        } => {
            let (budget, user) = app.budget(Role::Editor)?;
            let amount = parse_amount(&amount, "amount")?;
            let day = validate_day("day of month", day)?;
            let Some(cat) = app.db.find_category(budget.id, &category)? else {
                return Err(anyhow!("No such category: '{category}'"));
            };

            let rec = RecurringExpense {
                id: Uuid::new_v4(),
                budget_id: budget.id,
                category_id: cat.id,
                description: description.unwrap_or_else(|| cat.name.clone()),
                amount,
                day_of_month: day,
                is_active: true,
                last_generated_date: None,
                created_by: Some(user),
            };
            app.db.insert_recurring(&rec)?;
            println!(
                "Added recurring '{}' {} {} on day {} ({}).",
                rec.description,
                fmt_amount(amount),
                budget.currency,
                day,
                short_id(rec.id)
            );
            Ok(())
        }
        RecurringCmd::List => {
            let (budget, _) = app.budget(Role::Viewer)?;
            let items = app.db.list_recurring(budget.id, false)?;
            if items.is_empty() {
                println!("(no recurring expenses)");
                return Ok(());
            }

            let names: HashMap<Uuid, String> = app
                .db
                .list_categories(budget.id)?
                .into_iter()
                .map(|c| (c.id, c.name))
                .collect();
            println!("id\tday\tamount\tcategory\tdescription\tactive\tlast_generated");
            for r in items {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    short_id(r.id),
                    r.day_of_month,
                    fmt_amount(r.amount),
                    names.get(&r.category_id).map(String::as_str).unwrap_or("?"),
                    r.description,
                    if r.is_active { "yes" } else { "no" },
                    r.last_generated_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Ok(())
        }
        RecurringCmd::Pause { id } => set_recurring_active(app, &id, false),
        RecurringCmd::Resume { id } => set_recurring_active(app, &id, true),
        RecurringCmd::Delete { id } => {
            let (budget, _) = app.budget(Role::Editor)?;
            let id = app.db.resolve_recurring_id(budget.id, &id)?;
            app.db.delete_recurring(id)?;
            println!("Deleted recurring expense {}.", short_id(id));
            Ok(())
        }
    }
}

fn set_recurring_active(app: &App, id: &str, active: bool) -> Result<()> {
    let (budget, _) = app.budget(Role::Editor)?;
    let id = app.db.resolve_recurring_id(budget.id, id)?;
    app.db.set_recurring_active(id, active)?;
    if active {
        println!("Resumed recurring expense {}.", short_id(id));
    } else {
        println!("Paused recurring expense {}.", short_id(id));
    }
    Ok(())
}

fn handle_goal(app: &App, cmd: GoalCmd) -> Result<()> {
    match cmd {
        GoalCmd::Create {
            name,
            target,
            deadline,
        } => {
            let (budget, _) = app.budget(Role::Editor)?;
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(anyhow!("Goal name must not be empty"));
            }
            let target_amount = parse_amount(&target, "target")?;
            if target_amount <= Decimal::ZERO {
                return Err(anyhow!("Goal target must be > 0"));
            }
            if app.db.find_goal(budget.id, &name)?.is_some() {
                return Err(anyhow!("Goal '{name}' already exists"));
            }
            let deadline = deadline.as_deref().map(parse_date).transpose()?;

            let goal = SavingsGoal {
                id: Uuid::new_v4(),
                budget_id: budget.id,
                name: name.clone(),
                target_amount,
                current_amount: Decimal::ZERO,
                deadline,
                created_at: now_utc(),
            };
            app.db
                .insert_goal(&goal)
                .with_context(|| format!("Failed to create goal '{name}'"))?;
            println!(
                "Created goal '{}' target {} {}.",
                name,
                fmt_amount(target_amount),
                budget.currency
            );
            Ok(())
        }
        GoalCmd::Contribute { name, amount } => {
            let (budget, user) = app.budget(Role::Editor)?;
            let Some(goal) = app.db.find_goal(budget.id, &name)? else {
                return Err(anyhow!("No such goal: '{name}'"));
            };
            let amount = parse_amount(&amount, "amount")?;
            if amount <= Decimal::ZERO {
                return Err(anyhow!("Contribution must be > 0"));
            }

            let total = app.db.contribute_to_goal(&goal, amount, &user, now_utc())?;
            println!(
                "Contributed {} {} to '{}' ({} / {}).",
                fmt_amount(amount),
                budget.currency,
                goal.name,
                fmt_amount(total),
                fmt_amount(goal.target_amount)
            );
            Ok(())
        }
        GoalCmd::Status { name } => {
            let (budget, _) = app.budget(Role::Viewer)?;
            let Some(goal) = app.db.find_goal(budget.id, &name)? else {
                return Err(anyhow!("No such goal: '{name}'"));
            };

            let percent_i = goal
                .percent()
                .round_dp(0)
                .to_i32()
                .unwrap_or(0)
                .clamp(0, 100);
            let bar_len = 10usize;
            let filled = ((percent_i as usize) * bar_len) / 100;
            let empty = bar_len.saturating_sub(filled);
            let bar = format!("[{}{}]", "=".repeat(filled), "-".repeat(empty));

            println!(
                "{} {}% ({} / {} {})",
                bar,
                percent_i,
                fmt_amount(goal.current_amount),
                fmt_amount(goal.target_amount),
                budget.currency
            );
            println!(
                "remaining\t{}\t{}",
                budget.currency,
                fmt_amount(goal.remaining())
            );
            if let Some(deadline) = goal.deadline {
                let days_left = (deadline - app.today).num_days();
                println!("deadline\t{deadline}\t{days_left} days");
            }
            Ok(())
        }
        GoalCmd::List => {
            let (budget, _) = app.budget(Role::Viewer)?;
            let goals = app.db.list_goals(budget.id)?;
            if goals.is_empty() {
                println!("(no goals)");
                return Ok(());
            }
            print_goals(&goals);
            Ok(())
        }
        GoalCmd::Delete { name } => {
            let (budget, _) = app.budget(Role::Editor)?;
            let Some(goal) = app.db.find_goal(budget.id, &name)? else {
                return Err(anyhow!("No such goal: '{name}'"));
            };
            app.db.delete_goal(goal.id)?;
            println!("Deleted goal '{}'.", goal.name);
            Ok(())
        }
    }
}

fn print_goals(goals: &[SavingsGoal]) {
    println!("name\tcurrent\ttarget\tpercent\tdeadline");
    for g in goals {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            g.name,
            fmt_amount(g.current_amount),
            fmt_amount(g.target_amount),
            fmt_amount(g.percent()),
            g.deadline
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
}

fn handle_period(app: &App, args: PeriodArgs) -> Result<()> {
    let cutoff_day = match args.cutoff_day {
        Some(day) => validate_day("cutoff day", day)?,
        None => app.budget(Role::Viewer)?.0.cutoff_day,
    };
    let date = match args.date.as_deref() {
        Some(raw) => parse_date(raw)?,
        None => app.today,
    };

    let p = calculate_period(cutoff_day, date);
    println!("start\t{}\t{}", p.start, p.start_at().to_rfc3339());
    println!("end\t{}\t{}", p.end, p.end_at().to_rfc3339());
    Ok(())
}

fn handle_dashboard(app: &App) -> Result<()> {
    let (budget, _) = app.budget(Role::Viewer)?;

    match recurring::materialize_due(&app.db, budget.id, app.today) {
        Ok(summary) if summary.generated + summary.failed + summary.raced > 0 => {
            tracing::info!(
                budget = %budget.id,
                generated = summary.generated,
                failed = summary.failed,
                raced = summary.raced,
                "recurring expenses materialized"
            );
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(budget = %budget.id, error = %format!("{err:#}"), "could not materialize recurring expenses");
        }
    }

    let period = calculate_period(budget.cutoff_day, app.today);
    let categories = app.db.list_categories(budget.id)?;
    let spend = app.db.spend_by_category(budget.id, period)?;

    let mut income = Decimal::ZERO;
    let mut expenses = Decimal::ZERO;
    for c in &categories {
        let amount = spend.get(&c.id).copied().unwrap_or(Decimal::ZERO);
        let total = if c.kind.is_income() {
            &mut income
        } else {
            &mut expenses
        };
        *total = total
            .checked_add(amount)
            .ok_or_else(|| anyhow!("Totals of budget '{}' overflow", budget.name))?;
    }
    let balance = income
        .checked_sub(expenses)
        .ok_or_else(|| anyhow!("Balance of budget '{}' overflows", budget.name))?;

    println!("budget\t{}\t{}", budget.name, budget.currency);
    println!("period\t{}\t{}", period.start, period.end);
    println!("income\t{}", fmt_amount(income));
    println!("expenses\t{}", fmt_amount(expenses));
    println!("balance\t{}", fmt_amount(balance));

    let views = rollup(&categories, &spend);
    if !views.is_empty() {
        println!();
        println!("(categories)");
        println!("category\ttype\tlimit\tspent\tremaining\tpercent");
        for view in &views {
            print_spend_view(view, 0);
        }
    }

    let goals = app.db.list_goals(budget.id)?;
    if !goals.is_empty() {
        println!();
        println!("(goals)");
        print_goals(&goals);
    }
    Ok(())
}

fn print_spend_view(view: &CategorySpendView, depth: usize) {
    println!(
        "{}{}\t{}\t{}\t{}\t{}\t{}",
        "  ".repeat(depth),
        view.category.name,
        view.category.kind,
        fmt_amount(view.limit),
        fmt_amount(view.spent),
        fmt_amount(view.remaining),
        fmt_amount(view.percent)
    );
    for child in &view.children {
        print_spend_view(child, depth + 1);
    }
}

fn parse_amount(raw: &str, field: &'static str) -> Result<Decimal> {
    let amount = raw
        .trim()
        .parse::<Decimal>()
        .with_context(|| format!("Invalid {field}: '{raw}'"))?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(anyhow!("{field} must not be negative"));
    }
    // "-0" parses with the sign bit set.
    Ok(amount.abs())
}

fn fmt_amount(d: Decimal) -> String {
    d.round_dp(2).normalize().to_string()
}

fn short_id(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}
