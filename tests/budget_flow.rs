use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn manejate_cmd(home: &tempfile::TempDir, today: &str) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("manejate"));
    cmd.env("MANEJATE_HOME", home.path());
    cmd.env("MANEJATE_TODAY", today);
    cmd.env_remove("MANEJATE_USER");
    cmd.env_remove("MANEJATE_LOG");
    cmd
}

fn run_ok(home: &tempfile::TempDir, today: &str, args: &[&str]) {
    manejate_cmd(home, today).args(args).assert().success();
}

fn run_ok_out(home: &tempfile::TempDir, today: &str, args: &[&str]) -> String {
    let out = manejate_cmd(home, today)
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8(out).expect("utf8 stdout")
}

const TODAY: &str = "2026-02-20";

fn setup_casa(home: &tempfile::TempDir) {
    run_ok(home, TODAY, &["login", "ana@example.com"]);
    run_ok(home, TODAY, &["budget", "create", "Casa", "--cutoff-day", "15"]);
    run_ok(
        home,
        TODAY,
        &["category", "add", "Food", "--type", "variable", "--limit", "100"],
    );
    run_ok(
        home,
        TODAY,
        &["category", "add", "Snacks", "--type", "variable", "--parent", "Food"],
    );
    run_ok(home, TODAY, &["category", "add", "Salary", "--type", "income"]);
}

#[test]
fn dashboard_rolls_child_spend_into_parent_for_current_cycle() {
    let home = tempfile::tempdir().expect("tempdir");
    setup_casa(&home);

    run_ok(&home, TODAY, &["tx", "add", "20", "--category", "Food", "--date", "2026-02-16"]);
    run_ok(&home, TODAY, &["tx", "add", "30", "--category", "Snacks", "--date", "2026-02-20"]);
    run_ok(&home, TODAY, &["tx", "add", "1000", "--category", "Salary", "--date", "2026-02-15"]);
    // Outside the cycle on both sides.
    run_ok(&home, TODAY, &["tx", "add", "7", "--category", "Food", "--date", "2026-02-14"]);
    run_ok(&home, TODAY, &["tx", "add", "99", "--category", "Food", "--date", "2026-03-15"]);

    let out = run_ok_out(&home, TODAY, &["dashboard"]);
    assert!(out.contains("budget\tCasa\tUSD"), "dashboard: {out}");
    assert!(out.contains("period\t2026-02-15\t2026-03-15"), "dashboard: {out}");
    assert!(out.contains("income\t1000\n"), "dashboard: {out}");
    assert!(out.contains("expenses\t50\n"), "dashboard: {out}");
    assert!(out.contains("balance\t950\n"), "dashboard: {out}");
    assert!(out.contains("\nFood\tvariable\t100\t50\t50\t50\n"), "dashboard: {out}");
    assert!(out.contains("\n  Snacks\tvariable\t0\t30\t-30\t0\n"), "dashboard: {out}");
}

#[test]
fn cycle_boundary_moves_with_reference_date() {
    let home = tempfile::tempdir().expect("tempdir");
    setup_casa(&home);

    run_ok(&home, TODAY, &["tx", "add", "40", "--category", "Food", "--date", "2026-02-14"]);

    let before = run_ok_out(&home, "2026-02-10", &["dashboard"]);
    assert!(before.contains("period\t2026-01-15\t2026-02-15"), "dashboard: {before}");
    assert!(before.contains("expenses\t40\n"), "dashboard: {before}");

    let after = run_ok_out(&home, TODAY, &["dashboard"]);
    assert!(after.contains("expenses\t0\n"), "dashboard: {after}");
}

#[test]
fn tiny_limit_with_large_spend_still_renders() {
    let home = tempfile::tempdir().expect("tempdir");
    setup_casa(&home);

    run_ok(
        &home,
        TODAY,
        &["category", "add", "Misc", "--type", "variable", "--limit", "0.000000000000000000000001"],
    );
    run_ok(&home, TODAY, &["tx", "add", "100000", "--category", "Misc"]);

    let out = run_ok_out(&home, TODAY, &["dashboard"]);
    assert!(out.contains("expenses\t100000\n"), "dashboard: {out}");
    assert!(out.contains("\nMisc\tvariable\t0\t100000\t"), "dashboard: {out}");
}

#[test]
fn negative_zero_amount_is_stored_as_zero() {
    let home = tempfile::tempdir().expect("tempdir");
    setup_casa(&home);

    run_ok(&home, TODAY, &["tx", "add", "--category", "Food", "-m", "Nada", "--", "-0"]);
    let out = run_ok_out(&home, TODAY, &["tx", "list"]);
    assert!(out.contains("\tFood\t0\tNada"), "tx list: {out}");
    assert!(!out.contains("\t-0\t"), "tx list: {out}");
}

#[test]
fn tx_add_notes_dates_outside_the_current_cycle() {
    let home = tempfile::tempdir().expect("tempdir");
    setup_casa(&home);

    let inside = run_ok_out(&home, TODAY, &["tx", "add", "5", "--category", "Food"]);
    assert!(inside.contains("on 2026-02-20"), "tx add: {inside}");
    assert!(!inside.contains("Note:"), "tx add: {inside}");

    let outside = run_ok_out(
        &home,
        TODAY,
        &["tx", "add", "5", "--category", "Food", "--date", "2026-01-02"],
    );
    assert!(outside.contains("outside the current billing cycle"), "tx add: {outside}");
}

#[test]
fn tx_list_defaults_to_current_cycle() {
    let home = tempfile::tempdir().expect("tempdir");
    setup_casa(&home);

    run_ok(
        &home,
        TODAY,
        &["tx", "add", "12.50", "--category", "Food", "-m", "Mercado", "--date", "2026-02-18"],
    );
    run_ok(
        &home,
        TODAY,
        &["tx", "add", "8", "--category", "Food", "-m", "Pan", "--date", "2026-01-20"],
    );

    let current = run_ok_out(&home, TODAY, &["tx", "list"]);
    assert!(current.contains("2026-02-18\texpense\tFood\t12.5\tMercado"), "tx list: {current}");
    assert!(!current.contains("Pan"), "tx list: {current}");

    let all = run_ok_out(&home, TODAY, &["tx", "list", "--all"]);
    assert!(all.contains("Mercado"), "tx list --all: {all}");
    assert!(all.contains("2026-01-20\texpense\tFood\t8\tPan"), "tx list --all: {all}");
}

#[test]
fn tx_delete_accepts_id_prefix() {
    let home = tempfile::tempdir().expect("tempdir");
    setup_casa(&home);

    run_ok(&home, TODAY, &["tx", "add", "15", "--category", "Food"]);
    let list = run_ok_out(&home, TODAY, &["tx", "list"]);
    let id = list
        .lines()
        .nth(1)
        .and_then(|l| l.split('\t').last())
        .expect("tx row")
        .to_string();

    run_ok(&home, TODAY, &["tx", "delete", &id[..6]]);
    let out = run_ok_out(&home, TODAY, &["tx", "list"]);
    assert!(out.contains("(no transactions)"), "tx list: {out}");
}

#[test]
fn categories_nest_only_one_level() {
    let home = tempfile::tempdir().expect("tempdir");
    setup_casa(&home);

    manejate_cmd(&home, TODAY)
        .args(["category", "add", "Candy", "--type", "variable", "--parent", "Snacks"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nest only one level"));

    manejate_cmd(&home, TODAY)
        .args(["category", "edit", "Food", "--parent", "Salary"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("has sub-categories"));

    manejate_cmd(&home, TODAY)
        .args(["category", "add", "food", "--type", "fixed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn moving_a_category_to_top_level_stops_the_rollup() {
    let home = tempfile::tempdir().expect("tempdir");
    setup_casa(&home);

    run_ok(&home, TODAY, &["tx", "add", "30", "--category", "Snacks"]);
    run_ok(&home, TODAY, &["category", "edit", "Snacks", "--no-parent", "--limit", "40"]);

    let out = run_ok_out(&home, TODAY, &["dashboard"]);
    assert!(out.contains("\nFood\tvariable\t100\t0\t100\t0\n"), "dashboard: {out}");
    assert!(out.contains("\nSnacks\tvariable\t40\t30\t10\t75\n"), "dashboard: {out}");
}

#[test]
fn deleting_a_parent_removes_children_and_their_transactions() {
    let home = tempfile::tempdir().expect("tempdir");
    setup_casa(&home);

    run_ok(&home, TODAY, &["tx", "add", "30", "--category", "Snacks"]);
    let out = run_ok_out(&home, TODAY, &["category", "delete", "Food"]);
    assert!(out.contains("and its sub-categories"), "category delete: {out}");

    let list = run_ok_out(&home, TODAY, &["category", "list"]);
    assert!(!list.contains("Snacks"), "category list: {list}");
    assert!(list.contains("Salary\tincome"), "category list: {list}");

    let txs = run_ok_out(&home, TODAY, &["tx", "list", "--all"]);
    assert!(txs.contains("(no transactions)"), "tx list: {txs}");
}

#[test]
fn budget_settings_change_the_cycle() {
    let home = tempfile::tempdir().expect("tempdir");
    setup_casa(&home);

    run_ok(&home, TODAY, &["budget", "settings", "--cutoff-day", "1", "--currency", "pen"]);

    let settings = run_ok_out(&home, TODAY, &["budget", "settings"]);
    assert!(settings.contains("cutoff_day\t1"), "settings: {settings}");
    assert!(settings.contains("currency\tPEN"), "settings: {settings}");

    let out = run_ok_out(&home, TODAY, &["dashboard"]);
    assert!(out.contains("period\t2026-02-01\t2026-03-01"), "dashboard: {out}");

    manejate_cmd(&home, TODAY)
        .args(["budget", "settings", "--cutoff-day", "32"])
        .assert()
        .failure();
}

#[test]
fn budgets_are_listed_and_switched() {
    let home = tempfile::tempdir().expect("tempdir");
    setup_casa(&home);
    run_ok(&home, TODAY, &["budget", "create", "Viajes", "--currency", "EUR"]);

    let list = run_ok_out(&home, TODAY, &["budget", "list"]);
    assert!(list.contains("Casa\towner\t15\tUSD\t\n"), "budget list: {list}");
    assert!(list.contains("Viajes\towner\t1\tEUR\t*"), "budget list: {list}");

    run_ok(&home, TODAY, &["budget", "use", "casa"]);
    let out = run_ok_out(&home, TODAY, &["dashboard"]);
    assert!(out.contains("budget\tCasa"), "dashboard: {out}");

    let other = run_ok_out(&home, TODAY, &["dashboard", "--budget", "Viajes"]);
    assert!(other.contains("budget\tViajes\tEUR"), "dashboard: {other}");

    run_ok(&home, TODAY, &["budget", "delete", "Casa"]);
    manejate_cmd(&home, TODAY)
        .args(["dashboard"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No budget selected"));
}
