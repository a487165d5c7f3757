#![allow(dead_code)]

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Stand-in model executable. Writes a CSV for whichever method it is given
/// and exits 5 for the chain named in `FAKE_FAIL_CHAIN`.
const FAKE_MODEL: &str = r##"#!/bin/sh
prev=""
id=1
out=""
method=""
num_samples=1000
num_warmup=1000
fitted=""
for a in "$@"; do
  case "$a" in
    id=*) id="${a#id=}" ;;
    method=*) method="${a#method=}" ;;
    num_samples=*) num_samples="${a#num_samples=}" ;;
    num_warmup=*) num_warmup="${a#num_warmup=}" ;;
    fitted_params=*) fitted="${a#fitted_params=}" ;;
    file=*) if [ "$prev" = output ]; then out="${a#file=}"; fi ;;
  esac
  prev="$a"
done
echo "method = $method"
echo "id = $id"
if [ "$FAKE_FAIL_CHAIN" = "$id" ]; then
  echo "Rejecting initial value" >&2
  exit 5
fi
case "$method" in
  sample)
    {
      echo "# model = bernoulli_model"
      echo "# method = sample (Default)"
      echo "#   sample"
      echo "#     num_samples = $num_samples"
      echo "#     num_warmup = $num_warmup"
      echo "#     save_warmup = 0 (Default)"
      echo "#     thin = 1 (Default)"
      echo "#     metric = diag_e (Default)"
      echo "# id = $id"
      echo "lp__,accept_stat__,stepsize__,treedepth__,n_leapfrog__,divergent__,energy__,theta"
      echo "# Adaptation terminated"
      echo "# Step size = 0.9"
      echo "# Diagonal elements of inverse mass matrix:"
      echo "# 0.5"
      awk -v n="$num_samples" -v id="$id" 'BEGIN { srand(id); for (i = 0; i < n; i++) { t = rand(); printf "%.6f,0.9,0.9,2,3,0,7.5,%.6f\n", -7 - t, t } }'
      echo "# "
      echo "#  Elapsed Time: 0.01 seconds (Warm-up)"
      echo "#                0.02 seconds (Sampling)"
      echo "#                0.03 seconds (Total)"
    } > "$out"
    ;;
  optimize)
    printf '# method = optimize\n# id = 1\nlp__,theta\n-5.0,0.25\n' > "$out"
    ;;
  variational)
    printf '# method = variational\nlp__,log_p__,log_g__,theta\n# Stepsize adaptation complete.\n# eta = 1\n0,0,0,0.24\n0,-6.1,-0.5,0.21\n0,-6.3,-0.7,0.27\n' > "$out"
    ;;
  generate_quantities)
    {
      echo "# method = generate_quantities"
      echo "y_sim"
      grep -v '^#' "$fitted" | tail -n +2 | awk -F, '{ printf "%d\n", NR % 2 }'
    } > "$out"
    ;;
esac
exit 0
"##;

pub struct TestEnv {
    _tmp: TempDir,
    pub root: PathBuf,
    pub home: PathBuf,
    cargo_home: PathBuf,
    rustup_home: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let root = tmp.path().to_path_buf();
        let home = root.join("home");
        fs::create_dir_all(&home).expect("create isolated home");

        let orig_home = std::env::var("HOME").unwrap_or_default();
        let cargo_home = PathBuf::from(&orig_home).join(".cargo");
        let rustup_home = PathBuf::from(&orig_home).join(".rustup");

        Self {
            _tmp: tmp,
            root,
            home,
            cargo_home,
            rustup_home,
        }
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("stanctl");
        cmd.env("HOME", &self.home)
            .env("CARGO_HOME", &self.cargo_home)
            .env("RUSTUP_HOME", &self.rustup_home)
            .env_remove("CMDSTAN")
            .env_remove("RUST_LOG")
            .env_remove("FAKE_FAIL_CHAIN");
        cmd
    }

    pub fn run_json(&self, args: &[&str]) -> Value {
        let mut cmd = self.cmd();
        let out = cmd
            .arg("--json")
            .args(args)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&out).expect("valid json output")
    }

    /// A `cmdstan-<version>` directory with a versioned makefile and a
    /// `bin/diagnose` script, under `~/.cmdstan`.
    pub fn fake_toolchain(&self, version: &str) -> PathBuf {
        let root = self.home.join(".cmdstan").join(format!("cmdstan-{}", version));
        fs::create_dir_all(root.join("bin")).expect("create toolchain bin");
        let parts: Vec<&str> = version.split('.').collect();
        let makefile = format!(
            "CMDSTAN_VERSION_MAJOR = {}\nCMDSTAN_VERSION_MINOR = {}\nCMDSTAN_VERSION_PATCH = {}\n\
             makefile: ;\n.DEFAULT:\n\tcp $(CURDIR)/fake-model $@ && chmod +x $@\n",
            parts[0], parts[1], parts[2]
        );
        fs::write(root.join("makefile"), makefile).expect("write makefile");
        write_script(&root.join("fake-model"), FAKE_MODEL);
        write_script(
            &root.join("bin/diagnose"),
            "#!/bin/sh\necho \"Processing csv files: $*\"\necho \"No problems detected.\"\n",
        );
        root
    }

    /// A model executable that needs no toolchain.
    pub fn fake_model(&self, name: &str) -> PathBuf {
        let path = self.root.join("models").join(name);
        fs::create_dir_all(path.parent().expect("models dir")).expect("create models dir");
        write_script(&path, FAKE_MODEL);
        path
    }

    pub fn write_file(&self, rel: &str, body: &str) -> PathBuf {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, body).expect("write file");
        path
    }
}

pub fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    }
}

pub fn path_str(p: &Path) -> &str {
    p.to_str().expect("utf8 path")
}
