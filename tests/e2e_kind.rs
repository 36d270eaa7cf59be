use std::error::Error;
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Returns true if the given binary is accessible in PATH.
fn tool_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

const TEST_NAMESPACE: &str = "drain-e2e";
const DRAIN_LABEL: &str = "drain-e2e=true";
const WORKLOAD_NAME: &str = "drain-e2e-web";

// ---------------------------------------------------------------------------
// E2E drain test
//
// Drains labelled worker nodes of a real Kind cluster with the node-drainer
// binary. Run with: cargo test --test e2e_kind -- --ignored
// ---------------------------------------------------------------------------

/// 1. Start (or reuse) a Kind cluster with three workers.
/// 2. Label two workers for retirement and deploy a small workload.
/// 3. Run `node-drainer run --batch-size 1 --node-selector drain-e2e=true`.
/// 4. Assert both labelled workers are unschedulable and carry no workload pods.
/// 5. Uncordon the workers and delete the test namespace.
#[test]
#[ignore]
fn e2e_drain_labelled_workers() -> Result<(), Box<dyn Error>> {
    // ── Prerequisite check ─────────────────────────────────────────────────────
    for tool in &["kind", "kubectl", "docker"] {
        if !tool_available(tool) {
            eprintln!("Skipping e2e test: `{tool}` not found in PATH.");
            return Ok(());
        }
    }

    let cluster_name = std::env::var("KIND_CLUSTER_NAME").unwrap_or_else(|_| "drain-e2e".into());
    ensure_kind_cluster(&cluster_name)?;

    let workers = worker_nodes()?;
    if workers.len() < 3 {
        return Err(format!("expected 3 workers, found {}", workers.len()).into());
    }
    let targets = &workers[..2];
    for node in targets {
        run_cmd("kubectl", &["label", "node", node, DRAIN_LABEL, "--overwrite"])?;
    }

    // ── Deploy a workload spread across the workers ────────────────────────────
    run_cmd_quiet("kubectl", &["create", "namespace", TEST_NAMESPACE])?;
    run_cmd_with_stdin("kubectl", &["apply", "-f", "-"], &workload_manifest())?;
    run_cmd(
        "kubectl",
        &[
            "rollout",
            "status",
            &format!("deployment/{}", WORKLOAD_NAME),
            "-n",
            TEST_NAMESPACE,
            "--timeout=180s",
        ],
    )?;

    // ── Drain ────────────────────────────────────────────────────────────────
    let output = Command::new(env!("CARGO_BIN_EXE_node-drainer"))
        .args([
            "run",
            "--batch-size",
            "1",
            "--grace-period-seconds",
            "5",
            "--eviction-timeout-seconds",
            "300",
            "--node-selector",
            DRAIN_LABEL,
        ])
        .output()?;
    if !output.status.success() {
        return Err(format!(
            "node-drainer failed\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
        .into());
    }

    // ── Verify ───────────────────────────────────────────────────────────────
    for node in targets {
        let unschedulable = run_cmd(
            "kubectl",
            &["get", "node", node, "-o", "jsonpath={.spec.unschedulable}"],
        )?;
        assert_eq!(unschedulable, "true", "node {} should be cordoned", node);

        wait_for(
            &format!("workload pods to leave {}", node),
            Duration::from_secs(120),
            || {
                let pods = run_cmd(
                    "kubectl",
                    &[
                        "get",
                        "pods",
                        "-n",
                        TEST_NAMESPACE,
                        "--field-selector",
                        &format!("spec.nodeName={}", node),
                        "-o",
                        "name",
                    ],
                )?;
                Ok(pods.is_empty())
            },
        )?;
    }

    // The untouched worker keeps accepting pods.
    let unschedulable = run_cmd(
        "kubectl",
        &["get", "node", &workers[2], "-o", "jsonpath={.spec.unschedulable}"],
    )?;
    assert_ne!(unschedulable, "true");

    // ── Cleanup ──────────────────────────────────────────────────────────────
    for node in targets {
        run_cmd_quiet("kubectl", &["uncordon", node])?;
        run_cmd_quiet("kubectl", &["label", "node", node, "drain-e2e-"])?;
    }
    run_cmd_quiet(
        "kubectl",
        &["delete", "namespace", TEST_NAMESPACE, "--ignore-not-found"],
    )?;
    Ok(())
}

/// The binary exits non-zero when the cluster cannot be reached.
#[test]
#[ignore]
fn e2e_unreachable_cluster_fails() -> Result<(), Box<dyn Error>> {
    let dir = std::env::temp_dir().join("node-drainer-e2e-kubeconfig");
    std::fs::create_dir_all(&dir)?;
    let kubeconfig = dir.join("config");
    std::fs::write(&kubeconfig, unreachable_kubeconfig())?;

    let status = Command::new(env!("CARGO_BIN_EXE_node-drainer"))
        .arg("run")
        .env("KUBECONFIG", &kubeconfig)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    assert!(!status.success());
    Ok(())
}

fn ensure_kind_cluster(name: &str) -> Result<(), Box<dyn Error>> {
    let clusters = run_cmd("kind", &["get", "clusters"])?;
    if clusters.lines().any(|line| line.trim() == name) {
        return Ok(());
    }
    run_cmd_with_stdin(
        "kind",
        &["create", "cluster", "--name", name, "--config", "-"],
        KIND_CONFIG,
    )?;
    Ok(())
}

fn worker_nodes() -> Result<Vec<String>, Box<dyn Error>> {
    let names = run_cmd(
        "kubectl",
        &[
            "get",
            "nodes",
            "-l",
            "!node-role.kubernetes.io/control-plane",
            "-o",
            "jsonpath={.items[*].metadata.name}",
        ],
    )?;
    let mut workers: Vec<String> = names.split_whitespace().map(str::to_string).collect();
    workers.sort();
    Ok(workers)
}

fn run_cmd(program: &str, args: &[&str]) -> Result<String, Box<dyn Error>> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    let output = cmd.output()?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "command failed: {} {:?}\nstdout:\n{}\nstderr:\n{}",
            program, args, stdout, stderr
        )
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn run_cmd_quiet(program: &str, args: &[&str]) -> Result<(), Box<dyn Error>> {
    let _ = Command::new(program).args(args).output();
    Ok(())
}

fn run_cmd_with_stdin(program: &str, args: &[&str], input: &str) -> Result<(), Box<dyn Error>> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        use std::io::Write;
        stdin.write_all(input.as_bytes())?;
        stdin.flush()?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(format!(
            "command failed: {} {:?}\nstderr:\n{}",
            program,
            args,
            String::from_utf8_lossy(&output.stderr)
        )
        .into());
    }
    Ok(())
}

fn wait_for<F>(label: &str, timeout: Duration, mut condition: F) -> Result<(), Box<dyn Error>>
where
    F: FnMut() -> Result<bool, Box<dyn Error>>,
{
    let start = Instant::now();
    loop {
        if condition()? {
            return Ok(());
        }
        if start.elapsed() > timeout {
            return Err(format!("timeout while waiting for {} after {:?}", label, timeout).into());
        }
        sleep(Duration::from_secs(3));
    }
}

const KIND_CONFIG: &str = r#"kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
nodes:
  - role: control-plane
  - role: worker
  - role: worker
  - role: worker
"#;

fn workload_manifest() -> String {
    format!(
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {name}
  namespace: {ns}
spec:
  replicas: 3
  selector:
    matchLabels:
      app: {name}
  template:
    metadata:
      labels:
        app: {name}
    spec:
      terminationGracePeriodSeconds: 5
      containers:
        - name: web
          image: registry.k8s.io/pause:3.9
          resources:
            requests:
              cpu: 10m
              memory: 16Mi
      volumes:
        - name: scratch
          emptyDir: {{}}
"#,
        name = WORKLOAD_NAME,
        ns = TEST_NAMESPACE
    )
}

fn unreachable_kubeconfig() -> &'static str {
    r#"apiVersion: v1
kind: Config
clusters:
  - name: nowhere
    cluster:
      server: https://127.0.0.1:1
      insecure-skip-tls-verify: true
contexts:
  - name: nowhere
    context:
      cluster: nowhere
      user: nobody
current-context: nowhere
users:
  - name: nobody
    user:
      token: invalid
"#
}
