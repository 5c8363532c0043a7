//! Setup pipeline ordering, short-circuit and single-step runs.

mod common;

use async_trait::async_trait;
use cluster::capability::{controlplane_target, snapd_target, CapabilityManager, PackageBackend};
use cluster::controlplane::ControlPlane;
use cluster::error::{ClusterError, ErrorKind, Result};
use cluster::gate::{ConfirmationGate, ScriptedGate};
use cluster::host::{HostFamily, HostInfo};
use cluster::pipeline::{
    setup_pipeline, CloudStep, ControlPlaneStep, PipelineStep, SetupContext, SetupPipeline,
    SnapdStep, SNAPD_SNAP_DIR,
};
use common::{fail, fake_binary, ok, FakeBackend, FakeRunner};
use nix::sys::signal::{signal, SigHandler, Signal};
use std::sync::{Arc, Mutex};

/// Step recording every call into a shared journal.
struct RecordingStep {
    name: &'static str,
    apply_fails: bool,
    verify_holds: bool,
    journal: Arc<Mutex<Vec<String>>>,
}

impl RecordingStep {
    fn boxed(
        name: &'static str,
        apply_fails: bool,
        verify_holds: bool,
        journal: &Arc<Mutex<Vec<String>>>,
    ) -> Box<dyn PipelineStep> {
        Box::new(Self {
            name,
            apply_fails,
            verify_holds,
            journal: Arc::clone(journal),
        })
    }
}

#[async_trait]
impl PipelineStep for RecordingStep {
    fn name(&self) -> &str {
        self.name
    }

    async fn apply(&self) -> Result<()> {
        self.journal.lock().unwrap().push(format!("{}.apply", self.name));
        if self.apply_fails {
            return Err(ClusterError::NotReady(format!("{} broke", self.name)));
        }
        Ok(())
    }

    async fn verify(&self) -> Result<bool> {
        self.journal.lock().unwrap().push(format!("{}.verify", self.name));
        Ok(self.verify_holds)
    }
}

#[tokio::test]
async fn test_pipeline_stops_at_first_failure() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let pipeline = SetupPipeline::new(vec![
        RecordingStep::boxed("a", false, true, &journal),
        RecordingStep::boxed("b", true, true, &journal),
        RecordingStep::boxed("c", false, true, &journal),
    ]);

    let err = pipeline.run().await.unwrap_err();
    assert_eq!(err.failed_step(), Some("b"));
    assert_eq!(err.kind(), ErrorKind::NotReady);
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["a.apply", "a.verify", "b.apply"]
    );
}

#[tokio::test]
async fn test_unmet_postcondition_fails_step() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let pipeline = SetupPipeline::new(vec![
        RecordingStep::boxed("a", false, false, &journal),
        RecordingStep::boxed("b", false, true, &journal),
    ]);

    let err = pipeline.run().await.unwrap_err();
    assert_eq!(err.failed_step(), Some("a"));
    assert_eq!(err.kind(), ErrorKind::NotReady);
    assert_eq!(*journal.lock().unwrap(), vec!["a.apply", "a.verify"]);
}

#[tokio::test]
async fn test_all_steps_complete_in_order() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let pipeline = SetupPipeline::new(vec![
        RecordingStep::boxed("a", false, true, &journal),
        RecordingStep::boxed("b", false, true, &journal),
    ]);

    let report = pipeline.run().await.unwrap();
    assert_eq!(report.completed, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_run_only_named_step() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let pipeline = SetupPipeline::new(vec![
        RecordingStep::boxed("a", false, true, &journal),
        RecordingStep::boxed("b", false, true, &journal),
    ]);

    let report = pipeline.run_only("b").await.unwrap();
    assert_eq!(report.completed, vec!["b".to_string()]);
    assert_eq!(*journal.lock().unwrap(), vec!["b.apply", "b.verify"]);

    let err = pipeline.run_only("zzz").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_setup_step_order() {
    let runner = Arc::new(FakeRunner::new());
    let ctx = SetupContext {
        host: HostInfo {
            family: HostFamily::Debian,
            oracle_cloud: false,
        },
        runner: runner.clone(),
        backend: Arc::new(FakeBackend::new()),
        controlplane: Arc::new(ControlPlane::new(
            common::identity(),
            "/nonexistent/juju",
            runner,
        )),
        gate: Arc::new(ScriptedGate::always(true)),
        operator: "operator".to_string(),
    };

    assert_eq!(
        setup_pipeline(&ctx).step_names(),
        vec![
            "extras",
            "snapd",
            "hypervisor",
            "cloud",
            "controlplane",
            "controlplane-user",
            "builder",
        ]
    );
}

#[tokio::test]
async fn test_hypervisor_step_adds_operator_to_group() {
    let runner = Arc::new(FakeRunner::new());
    runner.on_capture("id -nG operator", common::ok("operator adm\n"));
    runner.on_capture("usermod -a -G lxd operator", common::ok(""));

    let ctx = SetupContext {
        host: HostInfo {
            family: HostFamily::Debian,
            oracle_cloud: false,
        },
        runner: runner.clone(),
        backend: Arc::new(FakeBackend::new()),
        controlplane: Arc::new(ControlPlane::new(
            common::identity(),
            "/nonexistent/juju",
            runner.clone(),
        )),
        gate: Arc::new(ScriptedGate::always(true)),
        operator: "operator".to_string(),
    };
    let pipeline = setup_pipeline(&ctx);

    // Group membership is never observed, so the postcondition fails after usermod.
    let err = pipeline.run_only("hypervisor").await.unwrap_err();
    assert_eq!(err.failed_step(), Some("hypervisor"));
    assert_eq!(err.kind(), ErrorKind::NotReady);
    assert_eq!(runner.count("usermod -a -G lxd operator"), 1);

    runner.on_capture("id -nG operator", common::ok("operator adm lxd\n"));
    pipeline.run_only("hypervisor").await.unwrap();
    assert_eq!(runner.count("usermod"), 1);
}

fn oracle_host(family: HostFamily) -> HostInfo {
    HostInfo {
        family,
        oracle_cloud: true,
    }
}

#[tokio::test]
async fn test_snapd_step_links_snap_root_on_redhat() {
    let temp = tempfile::tempdir().unwrap();
    let snap_root = temp.path().join("snap");
    let backend = Arc::new(FakeBackend::new());
    let manager = CapabilityManager::new(
        "snapd",
        snapd_target(HostFamily::RedHat),
        backend.clone() as Arc<dyn PackageBackend>,
    );
    let step = SnapdStep::new(manager, HostFamily::RedHat).with_snap_root(&snap_root);

    step.apply().await.unwrap();
    assert!(step.verify().await.unwrap());
    assert_eq!(
        std::fs::read_link(&snap_root).unwrap(),
        std::path::PathBuf::from(SNAPD_SNAP_DIR)
    );
    let mutations = backend.mutations();
    assert_eq!(mutations.len(), 3);
    assert!(mutations[0].starts_with("install-packages https://"));
    assert!(mutations[0].ends_with(" snapd"));
    assert_eq!(mutations[1..], ["enable snapd", "start snapd"]);

    // Re-run over a dangling link: nothing to do.
    step.apply().await.unwrap();
    assert_eq!(backend.mutations().len(), 3);
}

#[tokio::test]
async fn test_snapd_step_starts_installed_service() {
    let temp = tempfile::tempdir().unwrap();
    let snap_root = temp.path().join("snap");
    let backend = Arc::new(FakeBackend::satisfied(&["snapd"], &[], &[]));
    let manager = CapabilityManager::new(
        "snapd",
        snapd_target(HostFamily::Debian),
        backend.clone() as Arc<dyn PackageBackend>,
    );
    let step = SnapdStep::new(manager, HostFamily::Debian).with_snap_root(&snap_root);

    assert!(!step.verify().await.unwrap());
    step.apply().await.unwrap();
    assert!(step.verify().await.unwrap());
    assert_eq!(backend.mutations(), vec!["enable snapd", "start snapd"]);
    assert!(snap_root.symlink_metadata().is_err());
}

#[tokio::test]
async fn test_cloud_step_oracle_tolerates_missing_rules() {
    let runner = Arc::new(FakeRunner::new());
    runner
        .on_capture("lxc network set lxdbr0 ipv4.firewall true", ok(""))
        .on_capture("lxc network get lxdbr0 ipv4.firewall", ok("true\n"))
        .on_capture("nft delete", fail(1, "Error: No such file or directory"));
    let step = CloudStep::new(oracle_host(HostFamily::Debian), runner.clone());

    step.apply().await.unwrap();
    assert!(step.verify().await.unwrap());
    assert_eq!(
        runner.calls(),
        vec![
            "lxc network set lxdbr0 ipv4.firewall true",
            "nft delete rule filter INPUT handle 10",
            "nft delete rule filter FORWARD handle 11",
            "lxc network get lxdbr0 ipv4.firewall",
        ]
    );

    let runner = Arc::new(FakeRunner::new());
    runner.on_capture("lxc network set", ok(""));
    CloudStep::new(oracle_host(HostFamily::RedHat), runner.clone())
        .apply()
        .await
        .unwrap();
    assert_eq!(runner.count("nft delete table inet firewalld"), 1);
}

#[tokio::test]
async fn test_cloud_step_requires_bridge_firewall() {
    let runner = Arc::new(FakeRunner::new());
    runner.on_capture("lxc network set", fail(1, "Error: network not found"));
    let step = CloudStep::new(oracle_host(HostFamily::Debian), runner.clone());

    let err = step.apply().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalTool);
    assert_eq!(runner.count("nft"), 0);
    assert!(!step.verify().await.unwrap());

    // Elsewhere the step touches nothing.
    let runner = Arc::new(FakeRunner::new());
    let step = CloudStep::new(
        HostInfo {
            family: HostFamily::Debian,
            oracle_cloud: false,
        },
        runner.clone(),
    );
    step.apply().await.unwrap();
    assert!(step.verify().await.unwrap());
    assert!(runner.calls().is_empty());
}

fn controlplane_step(runner: &Arc<FakeRunner>, juju: &std::path::Path) -> ControlPlaneStep {
    let backend: Arc<dyn PackageBackend> = Arc::new(FakeBackend::satisfied(&[], &["juju"], &[]));
    let controlplane = Arc::new(ControlPlane::new(common::identity(), juju, runner.clone()));
    ControlPlaneStep::new(
        CapabilityManager::new("controlplane", controlplane_target(), backend),
        controlplane,
    )
}

#[tokio::test]
async fn test_controlplane_step_skips_setup_when_ready() {
    let temp = tempfile::tempdir().unwrap();
    let juju = fake_binary(temp.path(), "juju");
    let runner = Arc::new(FakeRunner::new());
    runner
        .on_capture("juju status", ok(""))
        .on_capture(
            "juju controllers --format json",
            ok(r#"{"controllers": {"hpct-controller": {}}}"#),
        );
    let step = controlplane_step(&runner, &juju);

    step.apply().await.unwrap();
    assert!(step.verify().await.unwrap());
    assert!(runner.interactive_calls().is_empty());
    assert_eq!(runner.count("juju controllers"), 1);
}

#[tokio::test]
async fn test_controlplane_step_fails_without_model() {
    let temp = tempfile::tempdir().unwrap();
    let juju = fake_binary(temp.path(), "juju");
    let runner = Arc::new(FakeRunner::new());
    runner.on_capture(
        "juju controllers --format json",
        ok(r#"{"controllers": {"hpct-controller": {}}}"#),
    );
    let step = controlplane_step(&runner, &juju);

    assert!(!step.verify().await.unwrap());

    let pipeline = SetupPipeline::new(vec![Box::new(step)]);
    let err = pipeline.run().await.unwrap_err();
    assert_eq!(err.failed_step(), Some("controlplane"));
    assert_eq!(err.kind(), ErrorKind::NotReady);
    assert_eq!(runner.interactive_calls(), vec!["juju add-model hpct"]);
}

/// Declines every prompt, noting whether SIGINT was ignored when asked.
#[derive(Default)]
struct DispositionGate {
    ignored_while_waiting: Mutex<Vec<bool>>,
}

#[async_trait]
impl ConfirmationGate for DispositionGate {
    async fn confirm(&self, prompt: &str) -> Result<()> {
        // SAFETY: swaps in SIG_IGN and reports the previous disposition. When
        // SIGINT is already ignored this changes nothing.
        let previous = unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) }.unwrap();
        self.ignored_while_waiting
            .lock()
            .unwrap()
            .push(previous == SigHandler::SigIgn);
        Err(ClusterError::UserAbort(prompt.to_string()))
    }

    async fn ask(&self, _question: &str) -> Result<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_gated_step_restores_sigint_after_failure() {
    let temp = tempfile::tempdir().unwrap();
    let juju = fake_binary(temp.path(), "juju");
    let runner = Arc::new(FakeRunner::new());
    let gate = Arc::new(DispositionGate::default());
    let ctx = SetupContext {
        host: HostInfo {
            family: HostFamily::Debian,
            oracle_cloud: false,
        },
        runner: runner.clone(),
        backend: Arc::new(FakeBackend::new()),
        controlplane: Arc::new(ControlPlane::new(common::identity(), &juju, runner.clone())),
        gate: gate.clone(),
        operator: "operator".to_string(),
    };

    // SAFETY: test-only reset to the default disposition.
    unsafe { signal(Signal::SIGINT, SigHandler::SigDfl) }.unwrap();

    let err = setup_pipeline(&ctx)
        .run_only("controlplane-user")
        .await
        .unwrap_err();
    assert_eq!(err.failed_step(), Some("controlplane-user"));
    assert_eq!(err.kind(), ErrorKind::UserAbort);
    assert_eq!(*gate.ignored_while_waiting.lock().unwrap(), vec![true]);
    assert_eq!(runner.interactive_calls(), vec!["juju add-user hpct-admin"]);

    // SAFETY: reads back the disposition by restoring the default.
    let after = unsafe { signal(Signal::SIGINT, SigHandler::SigDfl) }.unwrap();
    assert_eq!(after, SigHandler::SigDfl);
}
