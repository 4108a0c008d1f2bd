use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "manejate")]
#[command(about = "Shared budgets with billing cycles, category limits and recurring expenses", long_about = None)]
pub struct Cli {
    /// Override Manejate home directory (config/data subdirs will be created inside it).
    #[arg(long, env = "MANEJATE_HOME", global = true)]
    pub home: Option<std::path::PathBuf>,

    /// Act as this user instead of the logged in one.
    #[arg(long, env = "MANEJATE_USER", global = true)]
    pub user: Option<String>,

    /// Budget to operate on (defaults to the one selected with `budget use`).
    #[arg(long, global = true)]
    pub budget: Option<String>,

    /// Reference date (YYYY-MM-DD) for billing cycles and recurring expenses. Defaults to today.
    #[arg(long, env = "MANEJATE_TODAY", global = true)]
    pub today: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set the user commands act as.
    Login { email: String },
    /// Print the user commands act as.
    Whoami,

    Budget(BudgetArgs),
    Member(MemberArgs),
    Invite(InviteArgs),
    Category(CategoryArgs),
    Tx(TxArgs),
    Recurring(RecurringArgs),
    Goal(GoalArgs),

    /// Print the billing cycle for a cutoff day and date.
    Period(PeriodArgs),

    /// Generate due recurring expenses, then show the current cycle's spending.
    Dashboard,
}

#[derive(Debug, Subcommand)]
pub enum BudgetCmd {
    Create {
        name: String,
        /// Day of month a new billing cycle starts (1-31).
        #[arg(long)]
        cutoff_day: Option<u32>,
        #[arg(long)]
        currency: Option<String>,
    },
    List,
    /// Make this budget the default for later commands.
    Use { name: String },
    Settings {
        #[arg(long)]
        cutoff_day: Option<u32>,
        #[arg(long)]
        currency: Option<String>,
        /// Rename the budget.
        #[arg(long)]
        name: Option<String>,
    },
    Delete { name: String },
}

#[derive(Debug, Args)]
pub struct BudgetArgs {
    #[command(subcommand)]
    pub cmd: BudgetCmd,
}

#[derive(Debug, Subcommand)]
pub enum MemberCmd {
    List,
    Invite {
        email: String,
        #[arg(long, default_value = "editor")]
        role: String,
    },
    Remove {
        email: String,
    },
    Role {
        email: String,
        role: String,
    },
}

#[derive(Debug, Args)]
pub struct MemberArgs {
    #[command(subcommand)]
    pub cmd: MemberCmd,
}

#[derive(Debug, Subcommand)]
pub enum InviteCmd {
    /// Pending invitations for the current user.
    List,
    Accept { id: String },
    Decline { id: String },
}

#[derive(Debug, Args)]
pub struct InviteArgs {
    #[command(subcommand)]
    pub cmd: InviteCmd,
}

#[derive(Debug, Subcommand)]
pub enum CategoryCmd {
    Add {
        name: String,
        /// fixed, variable, income or savings.
        #[arg(long = "type")]
        kind: String,
        /// Monthly limit; 0 or omitted means no limit.
        #[arg(long)]
        limit: Option<String>,
        /// Name of a top-level category to nest under.
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        icon: Option<String>,
    },
    Edit {
        name: String,
        #[arg(long)]
        rename: Option<String>,
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long)]
        limit: Option<String>,
        #[arg(long, conflicts_with = "no_parent")]
        parent: Option<String>,
        /// Move the category back to the top level.
        #[arg(long)]
        no_parent: bool,
        #[arg(long)]
        icon: Option<String>,
    },
    Delete {
        name: String,
    },
    List,
}

#[derive(Debug, Args)]
pub struct CategoryArgs {
    #[command(subcommand)]
    pub cmd: CategoryCmd,
}

#[derive(Debug, Subcommand)]
pub enum TxCmd {
    Add {
        amount: String,
        #[arg(long)]
        category: String,
        #[arg(long, short = 'm', alias = "note")]
        description: Option<String>,
        /// Transaction date (YYYY-MM-DD). Defaults to the reference date.
        #[arg(long)]
        date: Option<String>,
    },
    List {
        /// List every transaction instead of the current billing cycle only.
        #[arg(long)]
        all: bool,
    },
    Delete {
        id: String,
    },
}

#[derive(Debug, Args)]
pub struct TxArgs {
    #[command(subcommand)]
    pub cmd: TxCmd,
}

#[derive(Debug, Subcommand)]
pub enum RecurringCmd {
    Add {
        amount: String,
        #[arg(long)]
        category: String,
        /// Day of month the expense is due (1-31).
        #[arg(long)]
        day: u32,
        #[arg(long, short = 'm', alias = "note")]
        description: Option<String>,
    },
    List,
    Pause {
        id: String,
    },
    Resume {
        id: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Debug, Args)]
pub struct RecurringArgs {
    #[command(subcommand)]
    pub cmd: RecurringCmd,
}

#[derive(Debug, Subcommand)]
pub enum GoalCmd {
    Create {
        name: String,
        target: String,
        /// Target date (YYYY-MM-DD).
        #[arg(long)]
        deadline: Option<String>,
    },
    Contribute {
        name: String,
        amount: String,
    },
    Status {
        name: String,
    },
    List,
    Delete {
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct GoalArgs {
    #[command(subcommand)]
    pub cmd: GoalCmd,
}

#[derive(Debug, Args)]
pub struct PeriodArgs {
    /// Cutoff day to use instead of the budget's.
    #[arg(long)]
    pub cutoff_day: Option<u32>,

    /// Date to compute the cycle for (YYYY-MM-DD). Defaults to the reference date.
    #[arg(long)]
    pub date: Option<String>,
}
