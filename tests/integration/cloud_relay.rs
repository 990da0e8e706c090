use volqa::mock::{MockTransport, Reply};
use volqa::mount::MountOptions;
use volqa::{resolve_endpoint, Config, ConfigBuilder, Error, VolumeOrchestrator};

fn provider_reply(stdout: &str) -> Reply {
    let message = format!("Enable succeeded: \n[stdout]\n{}\n[stderr]\n", stdout);
    Reply::raw(&serde_json::json!({"value": [{"code": "ProvisioningState/succeeded", "message": message}]}).to_string())
}

fn cloud_config() -> Config {
    ConfigBuilder::from_preset("testing")
        .cloud("rg-qa", "client-vm")
        .build()
        .unwrap()
}

#[test]
fn test_commands_route_through_provider() {
    let session = MockTransport::succeeding().on("echo connected", Reply::status("connected", true));
    let provider = MockTransport::with_default(provider_reply("True"));
    let mut orchestrator = VolumeOrchestrator::with_transports(
        cloud_config(),
        Box::new(session.clone()),
        Some(Box::new(provider.clone())),
    )
    .unwrap();

    let endpoint = resolve_endpoint(
        &serde_json::json!({"mountPoints": [{"server": "10.0.0.5"}], "creationToken": "vol1"}),
        None,
    )
    .unwrap();
    let report = orchestrator.mount(&endpoint, MountOptions::new("nfsv3").quick()).unwrap();

    assert!(report.passed());
    assert_eq!(report.len(), 3);
    // Only the authentication check used the session.
    assert_eq!(session.commands().len(), 1);
    // Each step is a clear followed by an invoke.
    assert_eq!(provider.count_containing("az vm extension delete"), 3);
    assert_eq!(provider.count_containing("az vm run-command invoke"), 3);
    assert_eq!(provider.count_containing("sudo -S"), 0);
}

#[test]
fn test_marker_parse_failure_aborts_operation() {
    let session = MockTransport::succeeding().on("echo connected", Reply::status("connected", true));
    let provider = MockTransport::with_default(Reply::raw("ERROR: (Conflict) run command in progress"));
    let mut orchestrator = VolumeOrchestrator::with_transports(
        cloud_config(),
        Box::new(session),
        Some(Box::new(provider)),
    )
    .unwrap();

    let endpoint = resolve_endpoint(
        &serde_json::json!({"mountPoints": [{"server": "10.0.0.5"}], "creationToken": "vol1"}),
        None,
    )
    .unwrap();
    let err = orchestrator.mount(&endpoint, MountOptions::new("nfsv3")).unwrap_err();
    assert!(matches!(err, Error::CloudParse { .. }));
}
