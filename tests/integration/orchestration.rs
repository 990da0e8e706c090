use volqa::mock::{MockTransport, Reply};
use volqa::mount::{MountOptions, UnmountOptions};
use volqa::registry::DriveSelection;
use volqa::{resolve_endpoint, ClientOs, Config, MountTarget, Step, TargetOptions, VolumeOrchestrator};

fn orchestrator(os: ClientOs, mock: &MockTransport) -> VolumeOrchestrator {
    let mut config = Config::testing();
    config.target.os = os;
    let session = mock.clone().on("echo connected", Reply::status("connected", true));
    VolumeOrchestrator::with_transports(config, Box::new(session), None).unwrap()
}

#[test]
fn test_nfsv3_mount_from_onprem_descriptor() {
    let descriptor = serde_json::json!({"mountPoints": [{"server": "10.0.0.5"}], "creationToken": "vol1"});
    let endpoint = resolve_endpoint(&descriptor, None).unwrap();
    let mock = MockTransport::succeeding();
    let mut orchestrator = orchestrator(ClientOs::Linux, &mock);

    let report = orchestrator.mount(&endpoint, MountOptions::new("nfsv3")).unwrap();

    let path = match orchestrator.registry().get("vol1") {
        Some(MountTarget::Path(path)) => path.clone(),
        other => panic!("expected a path, got {:?}", other),
    };
    let suffix = path.strip_prefix("/tmp/vol1-").expect("timestamped mount directory");
    assert!(suffix.parse::<i64>().is_ok());

    let mount = report
        .logs()
        .iter()
        .find(|r| r.command().contains("mount -t nfs"))
        .expect("mount step");
    assert!(mount.command().contains("vers=3"));
    assert!(mount.command().contains("rsize=65536,wsize=65536"));
    assert!(mount.command().ends_with(&format!("10.0.0.5:/vol1 {}", path)));
}

#[test]
fn test_smb_auto_drive_recorded_from_output() {
    let mock = MockTransport::succeeding()
        .on("net use *", Reply::status("Drive Z: is now connected to \\\\10.0.0.5\\vol1.", true))
        .on("dir Z:", Reply::status("    Directory: Z:\\", true));
    let mut orchestrator = orchestrator(ClientOs::Windows, &mock);
    let descriptor = serde_json::json!({
        "properties": {"mountTargets": [{"ipAddress": "10.0.0.5"}], "creationToken": "vol1"}
    });
    let endpoint = resolve_endpoint(&descriptor, None).unwrap();

    let options = MountOptions::new("smb").target(TargetOptions::drive(DriveSelection::Auto));
    let report = orchestrator.mount(&endpoint, options).unwrap();

    assert!(report.passed(), "{}", report.to_json().unwrap());
    assert_eq!(orchestrator.registry().get("vol1"), Some(&MountTarget::Drive('Z')));
}

#[test]
fn test_quick_unmount_is_single_record() {
    let mock = MockTransport::succeeding();
    let mut orchestrator = orchestrator(ClientOs::Linux, &mock);
    let endpoint = resolve_endpoint(
        &serde_json::json!({"mountPoints": [{"server": "10.0.0.5"}], "creationToken": "vol1"}),
        None,
    )
    .unwrap();
    orchestrator.mount(&endpoint, MountOptions::new("nfsv3").quick()).unwrap();

    let report = orchestrator.unmount("vol1", UnmountOptions::quick()).unwrap();
    assert_eq!(report.len(), 1);
    assert!(report.logs()[0].command().starts_with("sudo umount -f /tmp/vol1-"));
}

#[test]
fn test_quick_mount_twice_never_verifies() {
    let mock = MockTransport::succeeding();
    let mut orchestrator = orchestrator(ClientOs::Linux, &mock);
    let endpoint = resolve_endpoint(
        &serde_json::json!({"mountPoints": [{"server": "10.0.0.5"}], "creationToken": "vol1"}),
        None,
    )
    .unwrap();

    for _ in 0..2 {
        let report = orchestrator.mount(&endpoint, MountOptions::new("nfsv3").quick()).unwrap();
        let issued = report
            .logs()
            .iter()
            .filter(|r| r.command().contains("mount -t nfs"))
            .count();
        assert_eq!(issued, 1);
        assert!(report.logs().iter().all(|r| !r.command().starts_with("df")));
        assert!(report.logs().iter().all(|r| !r.command().starts_with("test -d")));
    }
    assert_eq!(mock.count_containing("mount -t nfs"), 2);
}

#[test]
fn test_mount_unmount_round_trip_clears_registry() {
    let mock = MockTransport::succeeding();
    let mut orchestrator = orchestrator(ClientOs::Linux, &mock);
    let endpoint = resolve_endpoint(
        &serde_json::json!({"mountPoints": [{"server": "10.0.0.5"}], "creationToken": "vol1"}),
        None,
    )
    .unwrap();

    orchestrator.mount(&endpoint, MountOptions::new("nfsv4.1")).unwrap();
    assert!(orchestrator.registry().contains("vol1"));
    orchestrator.unmount("vol1", UnmountOptions::default()).unwrap();
    assert!(orchestrator.registry().is_empty());
}

#[test]
fn test_unresolvable_command() {
    let mock = MockTransport::succeeding().on(
        "frobnicate",
        Reply::Output(volqa::transport::RawOutput::stdout("False\n").with_stderr("sh: 1: frobnicate: not found")),
    );
    let mut orchestrator = orchestrator(ClientOs::Linux, &mock);

    let report = orchestrator.execute(&Step::new("Run unknown tool", "frobnicate --now")).unwrap();
    let result = &report.logs()[0];
    assert!(!result.passed());
    assert!(result.output().is_none());
    assert_eq!(result.error(), Some("sh: 1: frobnicate: not found"));
    assert!(!report.passed());
}

#[test]
fn test_report_passed_is_conjunction() {
    let mock = MockTransport::succeeding().on("chmod", Reply::status("", false));
    let mut orchestrator = orchestrator(ClientOs::Linux, &mock);
    let endpoint = resolve_endpoint(
        &serde_json::json!({"mountPoints": [{"server": "10.0.0.5"}], "creationToken": "vol1"}),
        None,
    )
    .unwrap();

    let report = orchestrator.mount(&endpoint, MountOptions::new("nfsv3").quick()).unwrap();
    assert_eq!(report.failures().count(), 1);
    assert!(!report.passed());

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["Passed"], false);
    assert_eq!(json["Logs"]["Log-1"]["Passed"], false);
    assert_eq!(json["Logs"]["Log-0"]["Passed"], true);
    assert!(json["Logs"]["Log-2"]["Command"].as_str().unwrap().contains("vers=3"));
}

#[test]
fn test_authentication_failure_is_fatal() {
    let mock = MockTransport::failing();
    let err = VolumeOrchestrator::with_transports(Config::testing(), Box::new(mock.clone()), None)
        .err()
        .unwrap();
    assert!(matches!(err, volqa::Error::Authentication { .. }));
    assert_eq!(mock.commands().len(), 1);
}
