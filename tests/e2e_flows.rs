#![cfg(unix)]

mod common;

use common::{path_str, TestEnv};
use predicates::prelude::*;
use std::fs;

#[test]
fn toolchain_set_then_show_uses_config() {
    let env = TestEnv::new();
    let root = env.fake_toolchain("2.33.1");

    let set = env.run_json(&["toolchain", "set", path_str(&root)]);
    assert_eq!(set["ok"], true);
    let config = fs::read_to_string(env.home.join(".config/stanctl/config.toml")).unwrap();
    assert!(config.contains("cmdstan_path"));

    let show = env.run_json(&["toolchain", "show"]);
    assert_eq!(show["data"]["source"], "config");
    assert_eq!(show["data"]["version"], "2.33.1");
}

#[test]
fn toolchain_resolution_prefers_flag_then_env() {
    let env = TestEnv::new();
    let old = env.fake_toolchain("2.30.0");
    let new = env.fake_toolchain("2.33.1");

    let show = env.run_json(&["toolchain", "show"]);
    assert_eq!(show["data"]["source"], "default_dir");
    assert_eq!(show["data"]["version"], "2.33.1");

    let out = env
        .cmd()
        .env("CMDSTAN", &old)
        .args(["--json", "toolchain", "show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["data"]["source"], "env");

    let flag = env.run_json(&["--cmdstan", path_str(&new), "toolchain", "show"]);
    assert_eq!(flag["data"]["source"], "flag");

    let list = env.run_json(&["toolchain", "list"]);
    let versions: Vec<&str> = list["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["version"].as_str().unwrap())
        .collect();
    assert_eq!(versions, vec!["2.30.0", "2.33.1"]);
}

#[test]
fn empty_cmdstan_env_is_ignored() {
    let env = TestEnv::new();
    env.fake_toolchain("2.33.1");
    let out = env
        .cmd()
        .env("CMDSTAN", "")
        .args(["--json", "toolchain", "show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["data"]["source"], "default_dir");
}

#[test]
fn install_skips_built_toolchain_and_remembers_it() {
    let env = TestEnv::new();
    let root = env.fake_toolchain("2.33.1");
    common::write_script(&root.join("bin/stanc"), "#!/bin/sh\nexit 0\n");

    let v = env.run_json(&[
        "install",
        "--dir",
        path_str(&env.home.join(".cmdstan")),
        "--version",
        "v2.33.1",
    ]);
    assert_eq!(v["data"]["status"], "already_installed");
    assert_eq!(v["data"]["version"], "2.33.1");

    let show = env.run_json(&["toolchain", "show"]);
    assert_eq!(show["data"]["source"], "config");
}

#[test]
fn missing_toolchain_is_reported() {
    let env = TestEnv::new();
    env.cmd()
        .args(["toolchain", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CMDSTAN"));
}

#[test]
fn sample_runs_chains_and_summarizes() {
    let env = TestEnv::new();
    let model = env.fake_model("bernoulli");
    let out_dir = env.root.join("out");

    let v = env.run_json(&[
        "sample",
        path_str(&model),
        "--chains",
        "3",
        "--cores",
        "2",
        "--sampling-iters",
        "50",
        "--warmup-iters",
        "20",
        "--seed",
        "1234",
        "--output-dir",
        path_str(&out_dir),
    ]);
    assert_eq!(v["ok"], true);
    let data = &v["data"];
    assert_eq!(data["model"], "bernoulli");
    assert_eq!(data["num_draws"], 50);
    assert_eq!(data["metric"], "diag_e");
    assert_eq!(data["chains"].as_array().unwrap().len(), 3);
    for (i, chain) in data["chains"].as_array().unwrap().iter().enumerate() {
        assert_eq!(chain["chain_id"], i as u64 + 1);
        assert_eq!(chain["retcode"], 0);
        let csv = chain["csv_file"].as_str().unwrap();
        assert!(csv.ends_with(&format!("-{}.csv", i + 1)));
        assert!(fs::metadata(csv).is_ok());
    }
    let names: Vec<&str> = data["summary"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["lp__", "theta"]);
    let theta = &data["summary"][1];
    let mean = theta["mean"].as_f64().unwrap();
    assert!(mean > 0.2 && mean < 0.8, "{}", mean);
    assert_eq!(data["diagnostics"][0]["divergences"], 0);
    assert_eq!(data["diagnostics"][0]["step_size"], 0.9);
    assert_eq!(data["diagnostics"][2]["inv_metric"], serde_json::json!([0.5]));

    let stdout_file = data["chains"][1]["stdout_file"].as_str().unwrap();
    let log = fs::read_to_string(stdout_file).unwrap();
    assert!(log.contains("id = 2"));
}

#[test]
fn requested_metric_is_reported() {
    let env = TestEnv::new();
    let model = env.fake_model("bernoulli");
    let v = env.run_json(&[
        "sample",
        path_str(&model),
        "--chains",
        "1",
        "--sampling-iters",
        "10",
        "--metric",
        "dense",
        "--output-dir",
        path_str(&env.root.join("out")),
    ]);
    assert_eq!(v["data"]["metric"], "dense_e");
}

#[test]
fn failing_chain_keeps_other_outputs() {
    let env = TestEnv::new();
    let model = env.fake_model("bernoulli");
    let out_dir = env.root.join("out");
    fs::create_dir_all(&out_dir).unwrap();

    env.cmd()
        .env("FAKE_FAIL_CHAIN", "2")
        .args([
            "sample",
            path_str(&model),
            "--chains",
            "2",
            "--sampling-iters",
            "10",
            "--output-basename",
            path_str(&out_dir.join("run")),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("1 of 2 chains failed"))
        .stderr(predicate::str::contains("chain 2 (exit 5"));

    assert!(out_dir.join("run-1.csv").exists());
    let log = fs::read_to_string(out_dir.join("run-2-stdout.txt")).unwrap();
    assert!(log.contains("Rejecting initial value"));
}

#[test]
fn inline_data_is_written_next_to_outputs() {
    let env = TestEnv::new();
    let model = env.fake_model("bernoulli");
    let out_dir = env.root.join("out");

    let v = env.run_json(&[
        "optimize",
        path_str(&model),
        "--data-json",
        r#"{"N": 2, "y": [0, 1]}"#,
        "--algorithm",
        "LBFGS",
        "--output-dir",
        path_str(&out_dir),
    ]);
    assert_eq!(v["data"]["values"]["theta"], 0.25);
    assert_eq!(v["data"]["values"]["lp__"], -5.0);
    assert!(out_dir.join("data-0.json").exists());
}

#[test]
fn optimize_without_data_is_rejected() {
    let env = TestEnv::new();
    let model = env.fake_model("bernoulli");
    env.cmd()
        .args(["optimize", path_str(&model)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("data"));
}

#[test]
fn bad_sampler_arguments_fail_before_launch() {
    let env = TestEnv::new();
    let model = env.fake_model("bernoulli");
    env.cmd()
        .args([
            "sample",
            path_str(&model),
            "--adapt-delta",
            "1.5",
            "--output-dir",
            path_str(&env.root.join("out")),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("adapt_delta"));
    assert!(!env.root.join("out").join("bernoulli-sample-1.csv").exists());
}

#[test]
fn variational_reports_mean_and_eta() {
    let env = TestEnv::new();
    let model = env.fake_model("bernoulli");
    let v = env.run_json(&[
        "variational",
        path_str(&model),
        "--algorithm",
        "meanfield",
        "--output-dir",
        path_str(&env.root.join("out")),
    ]);
    assert_eq!(v["data"]["eta"], 1.0);
    assert_eq!(v["data"]["mean"]["theta"], 0.24);
    assert_eq!(v["data"]["num_draws"], 2);
}

#[test]
fn generate_quantities_follow_fitted_draws() {
    let env = TestEnv::new();
    let model = env.fake_model("bernoulli");
    let fitted_dir = env.root.join("fitted");
    fs::create_dir_all(&fitted_dir).unwrap();
    env.run_json(&[
        "sample",
        path_str(&model),
        "--chains",
        "2",
        "--sampling-iters",
        "12",
        "--output-basename",
        path_str(&fitted_dir.join("fit")),
    ]);

    let v = env.run_json(&[
        "generate-quantities",
        path_str(&model),
        "--fitted-params",
        path_str(&fitted_dir.join("fit-1.csv")),
        path_str(&fitted_dir.join("fit-2.csv")),
        "--output-dir",
        path_str(&env.root.join("gq")),
    ]);
    assert_eq!(v["data"]["generated_columns"], serde_json::json!(["y_sim"]));
    assert_eq!(v["data"]["num_draws"], 12);
    assert_eq!(v["data"]["chains"].as_array().unwrap().len(), 2);
    assert_eq!(v["data"]["summary"][0]["name"], "y_sim");

    let all = env.run_json(&[
        "generate-quantities",
        path_str(&model),
        "--fitted-params",
        path_str(&fitted_dir.join("fit-1.csv")),
        path_str(&fitted_dir.join("fit-2.csv")),
        "--combined",
        "--output-dir",
        path_str(&env.root.join("gq-all")),
    ]);
    let names: Vec<&str> = all["data"]["summary"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["lp__", "theta", "y_sim"]);
    assert_eq!(all["data"]["num_draws"], 12);
}

#[test]
fn save_to_moves_csv_files() {
    let env = TestEnv::new();
    let model = env.fake_model("bernoulli");
    let keep = env.root.join("keep");
    let v = env.run_json(&[
        "sample",
        path_str(&model),
        "--chains",
        "1",
        "--sampling-iters",
        "10",
        "--output-dir",
        path_str(&env.root.join("out")),
        "--save-to",
        path_str(&keep),
    ]);
    let csv = v["data"]["chains"][0]["csv_file"].as_str().unwrap();
    assert!(csv.starts_with(path_str(&keep)));
    assert!(fs::metadata(csv).is_ok());
}

#[test]
fn summary_reads_existing_csvs() {
    let env = TestEnv::new();
    let model = env.fake_model("bernoulli");
    let dir = env.root.join("out");
    fs::create_dir_all(&dir).unwrap();
    env.run_json(&[
        "sample",
        path_str(&model),
        "--chains",
        "2",
        "--sampling-iters",
        "40",
        "--output-basename",
        path_str(&dir.join("run")),
    ]);

    let v = env.run_json(&[
        "summary",
        path_str(&dir.join("run-1.csv")),
        path_str(&dir.join("run-2.csv")),
        "--param",
        "theta",
    ]);
    let rows = v["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "theta");
    assert!(rows[0]["r_hat"].as_f64().is_some());

    env.cmd()
        .args(["summary", path_str(&dir.join("run-1.csv"))])
        .assert()
        .success()
        .stdout(predicate::str::contains("theta"))
        .stdout(predicate::str::contains("r_hat"));
}

#[test]
fn summary_rejects_non_sampler_output() {
    let env = TestEnv::new();
    let csv = env.write_file("opt.csv", "# method = optimize\nlp__,theta\n-5,0.25\n");
    env.cmd()
        .args(["summary", path_str(&csv)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sample"));
}

#[test]
fn stan_file_is_compiled_before_running() {
    if std::process::Command::new("make").arg("--version").output().is_err() {
        return;
    }
    let env = TestEnv::new();
    let root = env.fake_toolchain("2.33.1");
    let src = env.write_file("models/coin.stan", "parameters { real theta; }\n");

    let compiled = env.run_json(&["--cmdstan", path_str(&root), "compile", path_str(&src)]);
    assert_eq!(compiled["data"]["status"], "compiled");
    assert!(env.root.join("models/coin").is_file());

    assert!(compiled["data"].get("code").is_none());

    let again = env.run_json(&[
        "--cmdstan",
        path_str(&root),
        "compile",
        path_str(&src),
        "--show-code",
    ]);
    assert_eq!(again["data"]["status"], "up_to_date");
    assert_eq!(again["data"]["code"], "parameters { real theta; }\n");

    let v = env.run_json(&[
        "--cmdstan",
        path_str(&root),
        "sample",
        path_str(&src),
        "--chains",
        "1",
        "--sampling-iters",
        "8",
        "--output-dir",
        path_str(&env.root.join("out")),
    ]);
    assert_eq!(v["data"]["model"], "coin");
}

#[test]
fn diagnose_runs_toolchain_utility() {
    let env = TestEnv::new();
    let root = env.fake_toolchain("2.33.1");
    let csv = env.write_file("a.csv", "lp__\n");
    let v = env.run_json(&["--cmdstan", path_str(&root), "diagnose", path_str(&csv)]);
    assert!(v["data"]["output"]
        .as_str()
        .unwrap()
        .contains("No problems detected"));
}
