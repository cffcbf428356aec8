use assert_cmd::Command;
use rust_decimal::Decimal;
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;
use tempfile::tempdir;

fn fleet(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("fleet").expect("Binary not found");
    cmd.current_dir(dir).arg("--db").arg(dir.join("fleet.db"));
    cmd
}

fn run_json(dir: &Path, args: &[&str]) -> Value {
    let output = fleet(dir).args(args).assert().success().get_output().clone();
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

fn id_of(value: &Value) -> String {
    value["id"].as_str().expect("id field").to_string()
}

fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("decimal string")).expect("valid decimal")
}

#[test]
fn init_reports_schema_version() {
    let dir = tempdir().unwrap();
    let report = run_json(dir.path(), &["init"]);
    assert!(report["schema_version"].as_u64().unwrap() >= 3);
    assert!(dir.path().join("fleet.db").exists());
}

#[test]
fn stock_commands_round_trip_through_the_database() {
    let dir = tempdir().unwrap();
    let dir = dir.path();

    let org = id_of(&run_json(dir, &["org", "add", "Northern Depot"]));
    let item = id_of(&run_json(dir, &["stock", "item-add", "--org", org.as_str(), "Diesel"]));
    let warehouse = id_of(&run_json(
        dir,
        &["stock", "location-add", "--org", org.as_str(), "Main warehouse"],
    ));
    let (org, item, warehouse) = (org.as_str(), item.as_str(), warehouse.as_str());

    let income = [
        "stock", "income", "--org", org, "--item", item, "--location", warehouse, "--qty",
        "100", "--at", "2024-01-01", "--ref", "invoice-17",
    ];
    let first = run_json(dir, &income);
    assert_eq!(first["replayed"], Value::Bool(false));
    let replay = run_json(dir, &income);
    assert_eq!(replay["replayed"], Value::Bool(true));
    assert_eq!(replay["movement"]["id"], first["movement"]["id"]);

    fleet(dir)
        .args([
            "stock", "expense", "--org", org, "--item", item, "--location", warehouse,
            "--qty", "150", "--at", "2024-01-02",
        ])
        .assert()
        .failure()
        .code(1);

    run_json(
        dir,
        &[
            "stock", "adjust", "--org", org, "--item", item, "--location", warehouse, "--qty",
            "-2.5", "--at", "2024-01-03",
        ],
    );

    let balance = run_json(
        dir,
        &[
            "stock", "balance", "--org", org, "--location", warehouse, "--item", item,
        ],
    );
    assert_eq!(decimal(&balance["balance"]), Decimal::from_str("97.5").unwrap());

    let early = run_json(
        dir,
        &[
            "stock", "balance", "--org", org, "--location", warehouse, "--item", item, "--at",
            "2024-01-02",
        ],
    );
    assert_eq!(decimal(&early["balance"]), Decimal::from(100));

    let history = run_json(
        dir,
        &["stock", "history", "--location", warehouse, "--item", item],
    );
    assert_eq!(history["lines"].as_array().unwrap().len(), 2);
    assert_eq!(
        decimal(&history["closing_balance"]),
        Decimal::from_str("97.5").unwrap()
    );
}

#[test]
fn table_format_lists_rows() {
    let dir = tempdir().unwrap();
    let dir = dir.path();
    run_json(dir, &["org", "add", "Northern Depot", "--inn", "7701234567"]);

    let output = fleet(dir)
        .args(["--format", "table", "org", "list"])
        .assert()
        .success()
        .get_output()
        .clone();
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines = stdout.lines().collect::<Vec<_>>();
    assert!(lines[0].contains("name"));
    assert!(lines[2].contains("Northern Depot"));
}

#[test]
fn domain_errors_exit_with_code_one() {
    let dir = tempdir().unwrap();
    let output = fleet(dir.path())
        .args(["waybill", "show", "00000000-0000-0000-0000-000000000001"])
        .assert()
        .failure()
        .code(1)
        .get_output()
        .clone();
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.starts_with("fleet error:"));
    assert!(stderr.contains("waybill not found"));
}
