//! Repeater behavior against scripted work and scripted shells

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, json};
use shell_automation::{
    Context, EngineConfig, Error, ErrorKind, ManagedCommandWork, Output, Repeater, Variable, WorkFn,
};
use shell_executor::{Extract, ExecutionOptions, ManagedCommand, MockConnector, SessionRequest, Target};

fn context(mock: &MockConnector) -> Context {
    Context::new(Arc::new(mock.clone()), Arc::new(EngineConfig::default()))
}

#[smol_potat::test]
async fn test_stops_when_exit_criteria_hold() {
    let mut context = context(&MockConnector::new());
    let statuses = ["running", "running", "done", "done"];
    let mut calls = 0;
    let mut work = WorkFn::new(|| {
        let status = statuses[calls];
        calls += 1;
        Ok(Some(Output::from_value(json!({ "testStatus": status }))))
    });

    let repeater = Repeater::new(10)
        .with_exit("$status:!running")
        .with_variable(Variable::new("status").with_from("testStatus"));
    let mut extracted = Map::new();
    let outcome = repeater.run(&mut context, &mut work, &mut extracted).await.unwrap();

    assert_eq!(outcome.iterations, 3);
    assert!(outcome.exit_satisfied);
    assert_eq!(extracted["status"], "done");
    assert_eq!(context.state().get_string("status").as_deref(), Some("done"));
    context.close().await.unwrap();
}

#[smol_potat::test]
async fn test_regex_extraction_from_text() {
    let mut context = context(&MockConnector::new());
    let mut work = WorkFn::new(|| Ok(Some(Output::from_text(r#"{"testStatus":"done"}"#))));

    let repeater = Repeater::new(3)
        .with_exit("$status = done")
        .with_extract(Extract::new(r#""testStatus":"([^"]+)""#, "status"));
    let mut extracted = Map::new();
    let outcome = repeater.run(&mut context, &mut work, &mut extracted).await.unwrap();

    assert_eq!(outcome.iterations, 1);
    assert_eq!(extracted["status"], "done");
    assert_eq!(extracted["value"], r#"{"testStatus":"done"}"#);
    context.close().await.unwrap();
}

#[smol_potat::test]
async fn test_variables_read_earlier_extractions_for_text_output() {
    let mut context = context(&MockConnector::new());
    let outputs = ["status=running", "status=done"];
    let mut calls = 0;
    let mut work = WorkFn::new(|| {
        let output = outputs[calls];
        calls += 1;
        Ok(Some(Output::from_text(output)))
    });

    let repeater = Repeater::new(5)
        .with_exit("$status = done")
        .with_extract(Extract::new(r"status=(\w+)", "status"))
        .with_variable(Variable::new("previous").with_from("status"));
    let mut extracted = Map::new();
    let outcome = repeater.run(&mut context, &mut work, &mut extracted).await.unwrap();

    assert_eq!(outcome.iterations, 2);
    assert_eq!(extracted["previous"], "running");
    assert_eq!(extracted["status"], "done");
    context.close().await.unwrap();
}

#[smol_potat::test]
async fn test_work_error_stops_immediately() {
    let mut context = context(&MockConnector::new());
    let mut calls = 0;
    let mut work = WorkFn::new(|| {
        calls += 1;
        Err("remote api unavailable".into())
    });

    let err = Repeater::new(5)
        .run(&mut context, &mut work, &mut Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Work { iteration: 1, .. }));
    assert_eq!(err.kind(), ErrorKind::LoopTermination);
    drop(work);
    assert_eq!(calls, 1);
    context.close().await.unwrap();
}

#[smol_potat::test]
async fn test_runs_all_iterations_and_sleeps_after_each() {
    let mut context = context(&MockConnector::new());
    let mut calls = 0;
    let mut work = WorkFn::new(|| {
        calls += 1;
        Ok(None)
    });

    let started = Instant::now();
    let outcome = Repeater::new(3)
        .with_sleep_time(Duration::from_millis(20))
        .with_exit("$never = 1")
        .run(&mut context, &mut work, &mut Map::new())
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(outcome.iterations, 3);
    assert!(!outcome.exit_satisfied);
    drop(work);
    assert_eq!(calls, 3);
    context.close().await.unwrap();
}

#[smol_potat::test]
async fn test_zero_repeat_runs_once_and_bad_exit_runs_nothing() {
    let mut context = context(&MockConnector::new());
    let mut calls = 0;
    let mut work = WorkFn::new(|| {
        calls += 1;
        Ok(Some(Output::from_text("ok")))
    });

    let outcome = Repeater::new(0)
        .run(&mut context, &mut work, &mut Map::new())
        .await
        .unwrap();
    assert_eq!(outcome.iterations, 1);

    let err = Repeater::new(3)
        .with_exit("$a = 1 $b")
        .run(&mut context, &mut work, &mut Map::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    drop(work);
    assert_eq!(calls, 1);
    context.close().await.unwrap();
}

#[smol_potat::test]
async fn test_polls_remote_command() {
    let mock = MockConnector::new().respond_sequence("systemctl is-active app", ["activating", "activating", "active"]);
    let mut context = context(&mock);
    let request = SessionRequest::new(Target::parse("ssh://deploy@app01").unwrap());
    let command = ManagedCommand::from_commands(ExecutionOptions::new(), ["systemctl is-active app"]);
    let mut work = ManagedCommandWork::new(request, command);

    let outcome = Repeater::new(5)
        .with_exit("$value:active")
        .run(&mut context, &mut work, &mut Map::new())
        .await
        .unwrap();
    assert_eq!(outcome.iterations, 3);
    assert_eq!(mock.count("systemctl is-active app"), 3);
    assert_eq!(mock.count("sw_vers"), 1);

    context.close().await.unwrap();
    assert_eq!(mock.closed(), ["deploy@app01:22"]);
}
