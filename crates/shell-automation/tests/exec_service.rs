//! Exec service requests and responses

use std::sync::Arc;

use serde_json::json;
use shell_automation::{Context, EngineConfig, ExecRequest, ExecService, Service, Status};
use shell_executor::{
    Credential, Execution, ExecutionOptions, ManagedCommand, MockConnector, SessionRequest, Target,
};

fn context(mock: &MockConnector) -> Context {
    Context::new(Arc::new(mock.clone()), Arc::new(EngineConfig::default()))
}

fn session(url: &str) -> SessionRequest {
    SessionRequest::new(Target::parse(url).unwrap())
}

#[smol_potat::test]
async fn test_open_run_close() {
    let mock = MockConnector::new().respond("cat /etc/app/version", "2.3.1");
    let mut context = context(&mock);
    let service = ExecService::new();

    let response = service
        .run(&mut context, ExecRequest::OpenSession(session("ssh://ops@app01")))
        .await;
    assert!(response.is_ok(), "{}", response.error);
    let body = response.response.unwrap();
    assert_eq!(body["session"], "ops@app01:22");
    assert_eq!(body["os"]["name"], "Ubuntu");

    let response = service
        .run(
            &mut context,
            ExecRequest::RunCommands {
                session: session("ssh://ops@app01"),
                commands: vec!["cat /etc/app/version".to_string()],
                options: ExecutionOptions::new().with_check_error(),
                super_user: false,
            },
        )
        .await;
    assert!(response.is_ok(), "{}", response.error);
    let body = response.response.unwrap();
    assert_eq!(body["commands"][0]["stdin"], "cat /etc/app/version");
    assert_eq!(body["commands"][0]["stdout"], "2.3.1");

    let response = service
        .run(
            &mut context,
            ExecRequest::CloseSession {
                session: "ops@app01:22".to_string(),
            },
        )
        .await;
    assert_eq!(response.response.unwrap()["closed"], true);
    assert_eq!(mock.closed(), ["ops@app01:22"]);
    context.close().await.unwrap();
}

#[smol_potat::test]
async fn test_failures_are_reported_with_breadcrumbs() {
    let mock = MockConnector::new().respond("make", "make: *** No rule to make target");
    let mut context = context(&mock);
    let service = ExecService::new();

    let command = ManagedCommand::new(ExecutionOptions::new())
        .with_execution(Execution::new("make").with_error("No rule"));
    let response = service
        .run(
            &mut context,
            ExecRequest::Run {
                session: session("ssh://ops@app01"),
                command,
                super_user: false,
            },
        )
        .await;
    assert_eq!(response.status, Status::Error);
    assert!(response.error.starts_with("exec.run: encounter error fragment: (No rule)"), "{}", response.error);

    let target = Target::parse("ssh://app01")
        .unwrap()
        .with_credential(Credential::new("ops"));
    let response = service
        .run(
            &mut context,
            ExecRequest::RunCommands {
                session: SessionRequest::new(target),
                commands: vec!["systemctl restart app".to_string()],
                options: ExecutionOptions::new(),
                super_user: true,
            },
        )
        .await;
    assert_eq!(response.status, Status::Error);
    assert!(response.error.contains("credential were empty"), "{}", response.error);
    assert_eq!(mock.count("systemctl restart app"), 0);

    context.close().await.unwrap();
}

#[smol_potat::test]
async fn test_json_requests() {
    let mock = MockConnector::new();
    let mut context = context(&mock);
    let service = ExecService::new();

    let response = service
        .run_json(&mut context, json!({ "action": "reboot" }))
        .await;
    assert_eq!(response.status, Status::Error);
    assert!(response.error.starts_with("exec: invalid request"), "{}", response.error);

    let response = service
        .run_json(
            &mut context,
            json!({ "action": "close_session", "session": "nobody@nowhere:22" }),
        )
        .await;
    assert!(response.is_ok());
    assert_eq!(response.response.unwrap()["closed"], false);

    context.close().await.unwrap();
}
