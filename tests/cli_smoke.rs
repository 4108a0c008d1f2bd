use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn cmd_with_home() -> (tempfile::TempDir, Command) {
    let home = tempfile::tempdir().expect("tempdir");
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("manejate"));
    cmd.env("MANEJATE_HOME", home.path());
    cmd.env_remove("MANEJATE_USER");
    cmd.env_remove("MANEJATE_TODAY");
    cmd.env_remove("MANEJATE_LOG");
    (home, cmd)
}

fn period_out(args: &[&str]) -> String {
    let (_home, mut cmd) = cmd_with_home();
    let out = cmd
        .arg("period")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8(out).expect("utf8 stdout")
}

#[test]
fn help_lists_commands() {
    let (_home, mut cmd) = cmd_with_home();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dashboard"))
        .stdout(predicate::str::contains("recurring"));
}

#[test]
fn period_after_cutoff_runs_to_next_month() {
    let out = period_out(&["--cutoff-day", "15", "--date", "2026-02-20"]);
    assert_eq!(
        out,
        "start\t2026-02-15\t2026-02-15T00:00:00+00:00\nend\t2026-03-15\t2026-03-15T00:00:00+00:00\n"
    );
}

#[test]
fn period_before_cutoff_starts_last_month() {
    let out = period_out(&["--cutoff-day", "15", "--date", "2026-02-10"]);
    assert!(out.starts_with("start\t2026-01-15\t"), "period: {out}");
    assert!(out.contains("end\t2026-02-15\t"), "period: {out}");
}

#[test]
fn period_crosses_year_and_clamps_short_months() {
    let out = period_out(&["--cutoff-day", "20", "--date", "2026-01-05"]);
    assert!(out.contains("start\t2025-12-20\t"), "period: {out}");
    assert!(out.contains("end\t2026-01-20\t"), "period: {out}");

    let out = period_out(&["--cutoff-day", "31", "--date", "2024-02-29"]);
    assert!(out.contains("start\t2024-02-29\t"), "period: {out}");
    assert!(out.contains("end\t2024-03-31\t"), "period: {out}");
}

#[test]
fn period_rejects_bad_cutoff() {
    let (_home, mut cmd) = cmd_with_home();
    cmd.args(["period", "--cutoff-day", "0", "--date", "2026-02-20"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cutoff day"));
}

#[test]
fn commands_need_a_login() {
    let (_home, mut cmd) = cmd_with_home();
    cmd.args(["budget", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn login_normalizes_email() {
    let (home, mut cmd) = cmd_with_home();
    cmd.args(["login", "  Ana@Example.COM "])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged in as ana@example.com."));

    let mut whoami = Command::new(assert_cmd::cargo::cargo_bin!("manejate"));
    whoami
        .env("MANEJATE_HOME", home.path())
        .env_remove("MANEJATE_USER")
        .arg("whoami")
        .assert()
        .success()
        .stdout("ana@example.com\n");

    let (_home, mut bad) = cmd_with_home();
    bad.args(["login", "not-an-email"]).assert().failure();
}

#[test]
fn negative_amounts_are_rejected() {
    let (home, mut cmd) = cmd_with_home();
    cmd.args(["login", "ana@example.com"]).assert().success();

    let run = |args: &[&str]| {
        let mut c = Command::new(assert_cmd::cargo::cargo_bin!("manejate"));
        c.env("MANEJATE_HOME", home.path())
            .env_remove("MANEJATE_USER")
            .env("MANEJATE_TODAY", "2026-02-20")
            .args(args)
            .assert()
    };
    run(&["budget", "create", "Casa"]).success();
    run(&["category", "add", "Food", "--type", "variable"]).success();
    run(&["tx", "add", "--category", "Food", "--", "-5"])
        .failure()
        .stderr(predicate::str::contains("must not be negative"));
    run(&["category", "add", "Bad", "--type", "other"])
        .failure()
        .stderr(predicate::str::contains("Unknown category type"));
}
